//! CNI configuration sync for container hosts
//!
//! This crate:
//! - Watches a metadata source for network changes
//! - Renders each network's CNI configs under `<cni_root>/<network>.d`
//! - Keeps `managed.d` pointing at the default network
//! - Runs a network's plugin chain to attach or detach a container

pub mod chain;
pub mod commands;
pub mod config;
pub mod error;
pub mod metadata;
pub mod plugin;
pub mod reconcile;
pub mod runtime;
pub mod types;
pub mod watcher;

// Re-export commonly used items
pub use chain::{cni_add, cni_del, PluginChain};
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use metadata::{FileMetadataClient, Host, MetadataClient, Network};
pub use plugin::{ExecPlugin, NetworkPlugin, PluginConf};
pub use reconcile::{AppliedState, ConfigReconciler};
pub use runtime::{ContainerSpec, NetworkMode, RuntimeContext};
pub use watcher::{CycleReport, Watcher};
