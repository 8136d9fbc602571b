use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the alias directory pointing at the default network
pub const MANAGED_NETWORK: &str = "managed";

/// Metadata key holding the per-network CNI config files
pub const CNI_CONFIG_KEY: &str = "cniConfig";

/// Container labels that add CNI_ARGS entries
pub const LABEL_CONTAINER_UUID: &str = "io.rancher.container.uuid";
pub const LABEL_LINK_MTU_OVERHEAD: &str = "io.rancher.cni.link_mtu_overhead";
pub const LABEL_MAC_ADDRESS: &str = "io.rancher.container.mac_address";
pub const LABEL_CONTAINER_IP: &str = "io.rancher.container.ip";

/// Configuration for cnisync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root holding one `<network>.d` directory per network
    pub cni_root: PathBuf,
    /// Directories searched for plugin binaries, in order
    pub plugin_path: Vec<PathBuf>,
    /// Network used when a container does not name one
    pub default_network: String,
    /// Interface name created inside the container
    pub ifname: String,
    /// Every network is rewritten once this much time passed since the last apply
    pub reapply_interval_secs: u64,
    /// Minimum spacing between metadata change checks
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cni_root: PathBuf::from("/etc/cni"),
            plugin_path: [
                "/opt/cni/bin",
                "/var/lib/cni/bin",
                "/usr/local/sbin",
                "/usr/sbin",
                "/sbin",
                "/usr/local/bin",
                "/usr/bin",
                "/bin",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            default_network: "default".to_string(),
            ifname: "eth0".to_string(),
            reapply_interval_secs: 300,
            poll_interval_secs: 5,
        }
    }
}

impl SyncConfig {
    /// Load configuration from a JSON file; absent fields keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: SyncConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if config.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }

        Ok(config)
    }

    /// Directory holding the plugin configs of `network`
    pub fn network_dir(&self, network: &str) -> PathBuf {
        self.cni_root.join(format!("{}.d", network))
    }

    /// Path of the default network alias
    pub fn managed_dir(&self) -> PathBuf {
        self.network_dir(MANAGED_NETWORK)
    }

    pub fn reapply_interval(&self) -> Duration {
        Duration::from_secs(self.reapply_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_under_root() {
        let config = SyncConfig {
            cni_root: PathBuf::from("/tmp/cni"),
            ..Default::default()
        };
        assert_eq!(config.network_dir("net1"), PathBuf::from("/tmp/cni/net1.d"));
        assert_eq!(config.managed_dir(), PathBuf::from("/tmp/cni/managed.d"));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"cni_root":"/srv/cni"}"#).unwrap();
        assert_eq!(config.cni_root, PathBuf::from("/srv/cni"));
        assert_eq!(config.reapply_interval(), Duration::from_secs(300));
        assert_eq!(config.default_network, "default");
        assert_eq!(config.plugin_path[0], PathBuf::from("/opt/cni/bin"));
    }
}
