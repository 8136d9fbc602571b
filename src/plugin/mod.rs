use itertools::Itertools;
use nix::unistd::{access, AccessFlags};
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runtime::RuntimeContext;
use crate::types::{PluginError, PluginResult};

/// Extensions recognised as plugin config files
const CONF_EXTENSIONS: &[&str] = &["conf", "json"];

/// One step of a plugin chain
///
/// `ExecPlugin` runs a binary; tests substitute in-memory doubles.
pub trait NetworkPlugin {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Attach the container described by `ctx`
    fn add(&self, ctx: &RuntimeContext) -> Result<PluginResult>;

    /// Detach the container described by `ctx`
    fn del(&self, ctx: &RuntimeContext) -> Result<()>;
}

/// A plugin config file loaded from a network directory
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConf {
    pub path: PathBuf,
    /// Plugin binary name (`type`)
    pub plugin_type: String,
    pub name: Option<String>,
    pub cni_version: Option<String>,
    /// File content, passed verbatim on the plugin's stdin
    pub bytes: Vec<u8>,
}

impl PluginConf {
    /// Parse config bytes read from `path`
    pub fn parse(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Result<Self> {
        let path = path.into();
        let json: Value = serde_json::from_slice(&bytes).map_err(|e| Error::PluginLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let plugin_type = match json.get("type") {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => {
                return Err(Error::PluginLoad {
                    path,
                    reason: "missing 'type'".to_string(),
                })
            }
        };
        let field = |key: &str| json.get(key).and_then(Value::as_str).map(str::to_string);

        Ok(Self {
            name: field("name"),
            cni_version: field("cniVersion"),
            plugin_type,
            path,
            bytes,
        })
    }

    /// Load a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|e| Error::PluginLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(path, bytes)
    }
}

/// Config files in `dir`, sorted by name
///
/// A missing directory is an empty chain, not an error.
pub fn conf_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let recognised = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CONF_EXTENSIONS.contains(&ext));
        if recognised {
            files.push(path);
        }
    }

    Ok(files.into_iter().sorted().collect())
}

/// Load every config in `dir` in chain order; the first failure aborts
pub fn load_confs(dir: &Path) -> Result<Vec<PluginConf>> {
    conf_files(dir)?
        .iter()
        .map(|file| PluginConf::from_file(file))
        .collect()
}

/// Plugin that executes its binary per the CNI process contract
pub struct ExecPlugin {
    conf: PluginConf,
    search_path: Vec<PathBuf>,
}

impl ExecPlugin {
    pub fn new(conf: PluginConf, search_path: Vec<PathBuf>) -> Self {
        Self { conf, search_path }
    }

    /// First executable named after the plugin type along the search path
    fn find_binary(&self) -> Result<PathBuf> {
        self.search_path
            .iter()
            .map(|dir| dir.join(&self.conf.plugin_type))
            .find(|candidate| {
                candidate.is_file() && access(candidate.as_path(), AccessFlags::X_OK).is_ok()
            })
            .ok_or_else(|| Error::PluginNotFound(self.conf.plugin_type.clone()))
    }

    fn exec(&self, command: &str, ctx: &RuntimeContext) -> Result<Vec<u8>> {
        let binary = self.find_binary()?;
        let cni_path = self
            .search_path
            .iter()
            .map(|p| p.to_string_lossy())
            .join(":");

        debug!(
            "Running {} {} for container {} (netns '{}')",
            binary.display(),
            command,
            ctx.container_id,
            ctx.netns
        );

        let exec_err = |source| Error::PluginExec {
            plugin: self.conf.plugin_type.clone(),
            source,
        };

        let mut child = Command::new(&binary)
            .env("CNI_COMMAND", command)
            .env("CNI_CONTAINERID", &ctx.container_id)
            .env("CNI_NETNS", &ctx.netns)
            .env("CNI_IFNAME", &ctx.ifname)
            .env("CNI_ARGS", ctx.cni_args())
            .env("CNI_PATH", &cni_path)
            .env("PATH", &cni_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(exec_err)?;

        // A plugin may exit without reading its config; its status decides
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(&self.conf.bytes) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => return Err(exec_err(e)),
                _ => {}
            }
        }

        let output = child.wait_with_output().map_err(exec_err)?;
        if !output.stderr.is_empty() {
            debug!(
                "{} stderr: {}",
                self.conf.plugin_type,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        if output.status.success() {
            return Ok(output.stdout);
        }

        let error = serde_json::from_slice::<PluginError>(&output.stdout).unwrap_or_else(|_| {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                PluginError::message(format!("exited with {}", output.status))
            } else {
                PluginError::message(stderr)
            }
        });

        Err(Error::Plugin {
            plugin: self.conf.plugin_type.clone(),
            error,
        })
    }
}

impl NetworkPlugin for ExecPlugin {
    fn name(&self) -> &str {
        &self.conf.plugin_type
    }

    fn add(&self, ctx: &RuntimeContext) -> Result<PluginResult> {
        let stdout = self.exec("ADD", ctx)?;
        let result = PluginResult::parse(&stdout).map_err(|e| Error::Plugin {
            plugin: self.conf.plugin_type.clone(),
            error: PluginError::message(format!("unparsable result: {}", e)),
        })?;
        info!(
            "Plugin {} added container {} ({})",
            self.conf.plugin_type,
            ctx.container_id,
            self.conf.path.display()
        );
        Ok(result)
    }

    fn del(&self, ctx: &RuntimeContext) -> Result<()> {
        self.exec("DEL", ctx)?;
        info!(
            "Plugin {} removed container {}",
            self.conf.plugin_type, ctx.container_id
        );
        Ok(())
    }
}
