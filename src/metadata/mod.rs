//! Network and host records and the source they are fetched from
//!
//! The real transport lives outside this crate; anything that can answer
//! [`MetadataClient`] can drive the watcher. [`FileMetadataClient`] reads a
//! JSON snapshot written by some other agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use crate::config::CNI_CONFIG_KEY;
use crate::error::{Error, Result};

/// A network as published by the metadata source
///
/// Equality covers the whole record, metadata included, and is what the
/// watcher uses to decide whether a network changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub uuid: String,
    pub name: String,
    pub environment_uuid: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Network {
    /// The `cniConfig` entry, if present and a mapping of file name to config
    pub fn cni_config(&self) -> Option<&Map<String, Value>> {
        self.metadata.get(CNI_CONFIG_KEY).and_then(Value::as_object)
    }
}

/// The host this process runs on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub environment_uuid: String,
}

/// Source of network and host records
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Opaque version; any change means the records may have changed
    async fn version(&self) -> Result<String>;

    /// Every network visible to this host, across environments
    async fn networks(&self) -> Result<Vec<Network>>;

    /// The local host record
    async fn self_host(&self) -> Result<Host>;
}

/// On-disk snapshot read by [`FileMetadataClient`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub networks: Vec<Network>,
    pub self_host: Host,
}

/// Metadata client backed by a JSON snapshot file
pub struct FileMetadataClient {
    path: PathBuf,
}

impl FileMetadataClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Snapshot> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| Error::Metadata(format!("{}: {}", self.path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Metadata(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl MetadataClient for FileMetadataClient {
    async fn version(&self) -> Result<String> {
        let snapshot = self.read().await?;
        if !snapshot.version.is_empty() {
            return Ok(snapshot.version);
        }

        // Unversioned snapshots change whenever the file does
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| Error::Metadata(format!("{}: {}", self.path.display(), e)))?;
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(format!("mtime-{}", nanos))
    }

    async fn networks(&self) -> Result<Vec<Network>> {
        Ok(self.read().await?.networks)
    }

    async fn self_host(&self) -> Result<Host> {
        Ok(self.read().await?.self_host)
    }
}
