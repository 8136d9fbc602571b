//! Rendering network CNI configs to disk
//!
//! Each network gets `<cni_root>/<name>.d/` with one pretty-printed JSON file
//! per `cniConfig` entry. The default network is also reachable through the
//! `managed.d` symlink. Writes are best effort per file; [`AppliedState`] only
//! records a network once every step for it succeeded, so a partial failure
//! is retried in full on the next cycle.

use nix::sys::stat::stat;
use std::collections::HashMap;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt};
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::metadata::Network;

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Networks this process has written successfully
///
/// Owned by a single watcher; never shared or persisted.
#[derive(Debug, Default)]
pub struct AppliedState {
    applied: HashMap<String, Network>,
    last_applied: Option<Instant>,
}

impl AppliedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last snapshot successfully applied for `name`
    pub fn get(&self, name: &str) -> Option<&Network> {
        self.applied.get(name)
    }

    /// Whether `network` differs from what was last applied under its name
    pub fn has_changed(&self, network: &Network) -> bool {
        self.applied.get(&network.name) != Some(network)
    }

    /// Whether more than `interval` passed since the last successful apply
    ///
    /// True when nothing was ever applied.
    pub fn reapply_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_applied {
            Some(last) => now.saturating_duration_since(last) > interval,
            None => true,
        }
    }

    /// Record a fully successful apply
    pub fn commit(&mut self, network: Network, now: Instant) {
        self.applied.insert(network.name.clone(), network);
        self.last_applied = Some(now);
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Writes network configs under a CNI root
#[derive(Debug, Clone)]
pub struct ConfigReconciler {
    config: SyncConfig,
}

impl ConfigReconciler {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Write every config file of `network` and, for the default network,
    /// point `managed.d` at it
    ///
    /// A failing file does not stop the others. Every failure is returned in
    /// [`Error::Apply`]; the last one is available through [`Error::last`].
    pub fn apply(&self, network: &Network) -> Result<()> {
        // The name becomes a path component under the CNI root
        if !is_plain_name(&network.name) {
            return Err(Error::Apply {
                network: network.name.clone(),
                failures: vec![Error::InvalidNetworkName(network.name.clone())],
            });
        }

        let conf_dir = self.config.network_dir(&network.name);
        DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(&conf_dir)
            .map_err(|e| Error::io(&conf_dir, e))?;

        let mut failures = Vec::new();
        if let Some(files) = network.cni_config() {
            for (file, config) in files {
                if let Err(err) = write_config(&conf_dir, file, config) {
                    debug!("Failed to write {} for network {}: {}", file, network.name, err);
                    failures.push(err);
                }
            }
        }

        if network.default {
            if let Err(err) = self.link_managed(&network.name, &conf_dir) {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Apply {
                network: network.name.clone(),
                failures,
            })
        }
    }

    /// Point `managed.d` at `conf_dir` unless it already resolves there
    fn link_managed(&self, name: &str, conf_dir: &Path) -> Result<()> {
        let managed = self.config.managed_dir();
        if same_dir(&managed, conf_dir) {
            debug!("{} already points at {}", managed.display(), conf_dir.display());
            return Ok(());
        }

        // Dangling links, stale links and empty directories all go
        if let Err(e) = fs::remove_file(&managed).or_else(|_| fs::remove_dir(&managed)) {
            debug!("Could not remove {}: {}", managed.display(), e);
        }

        symlink(format!("{}.d", name), &managed).map_err(|e| Error::io(&managed, e))?;
        info!("Linked {} to network {}", managed.display(), name);
        Ok(())
    }
}

/// Write one config file as two-space indented JSON
fn write_config(conf_dir: &Path, file: &str, config: &serde_json::Value) -> Result<()> {
    if !is_plain_name(file) {
        return Err(Error::InvalidFileName(file.to_string()));
    }

    let path = conf_dir.join(file);
    let content = serde_json::to_string_pretty(config).map_err(|source| Error::Serialize {
        path: path.clone(),
        source,
    })?;

    debug!("Writing {}: {}", path.display(), content);
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(FILE_MODE)
        .open(&path)
        .map_err(|e| Error::io(&path, e))?;
    out.write_all(content.as_bytes())
        .map_err(|e| Error::io(&path, e))
}

/// A single path component that stays inside its parent
fn is_plain_name(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains('/'))
}

/// Whether both paths resolve to the same inode
fn same_dir(a: &Path, b: &Path) -> bool {
    match (stat(a), stat(b)) {
        (Ok(a), Ok(b)) => a.st_dev == b.st_dev && a.st_ino == b.st_ino,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_file_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["", ".", "..", "../escape.conf", "sub/10-a.conf"] {
            assert!(matches!(
                write_config(dir.path(), name, &serde_json::json!({})),
                Err(Error::InvalidFileName(_))
            ));
        }
    }

    #[test]
    fn never_applied_is_always_due() {
        let state = AppliedState::new();
        assert!(state.reapply_due(Instant::now(), Duration::from_secs(300)));
    }

    #[test]
    fn due_only_after_interval() {
        let mut state = AppliedState::new();
        let start = Instant::now();
        state.commit(Network::default(), start);
        assert!(!state.reapply_due(start + Duration::from_secs(300), Duration::from_secs(300)));
        assert!(state.reapply_due(start + Duration::from_secs(301), Duration::from_secs(300)));
    }
}
