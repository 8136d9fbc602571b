use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use crate::chain::{cni_add, cni_del};
use crate::config::SyncConfig;
use crate::metadata::Network;
use crate::plugin::conf_files;
use crate::reconcile::ConfigReconciler;
use crate::runtime::{ContainerSpec, NetworkMode};
use crate::types::PluginResult;

/// Read a container spec from `path`, or from stdin when absent
pub fn read_container_spec(path: Option<&Path>) -> Result<ContainerSpec> {
    let data = match path {
        Some(path) => fs::read(path)
            .with_context(|| format!("Failed to read container spec {}", path.display()))?,
        None => {
            let mut data = Vec::new();
            io::stdin()
                .read_to_end(&mut data)
                .context("Failed to read from stdin")?;
            data
        }
    };

    serde_json::from_slice(&data).context("Failed to parse container spec")
}

/// Attach a container and print the address-carrying result
pub fn cmd_add(config: &SyncConfig, spec: &ContainerSpec) -> Result<()> {
    let result = cni_add(spec, config)
        .with_context(|| format!("Failed to attach container {}", spec.container_id))?;

    result.unwrap_or_else(PluginResult::default).print()
}

/// Detach a container
pub fn cmd_del(config: &SyncConfig, spec: &ContainerSpec) -> Result<()> {
    cni_del(spec, config)
        .with_context(|| format!("Failed to detach container {}", spec.container_id))
}

/// Write one network record's configs without running the watcher
pub fn cmd_render(config: &SyncConfig, network_file: &Path) -> Result<Network> {
    let data = fs::read(network_file)
        .with_context(|| format!("Failed to read network {}", network_file.display()))?;
    let network: Network =
        serde_json::from_slice(&data).context("Failed to parse network record")?;

    if network.cni_config().is_none() {
        anyhow::bail!("Network {} has no cniConfig mapping", network.name);
    }

    ConfigReconciler::new(config)
        .apply(&network)
        .with_context(|| format!("Failed to apply network {}", network.name))?;
    Ok(network)
}

/// Where `managed.d` points and which configs a network's chain would run
pub struct Status {
    pub managed_target: Option<String>,
    pub network: String,
    pub chain: Vec<String>,
}

pub fn cmd_status(config: &SyncConfig, network_mode: Option<&str>) -> Result<Status> {
    let managed = config.managed_dir();
    let managed_target = fs::read_link(&managed)
        .ok()
        .map(|target| target.to_string_lossy().into_owned());

    let network_mode = network_mode.unwrap_or_default();
    let network = NetworkMode::parse(network_mode)
        .network_name(&config.default_network)
        .with_context(|| format!("Network mode '{}' runs no plugins", network_mode))?
        .to_string();

    let chain = conf_files(&config.network_dir(&network))?
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();

    Ok(Status {
        managed_target,
        network,
        chain,
    })
}
