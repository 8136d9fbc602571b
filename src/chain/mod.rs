//! Ordered plugin chains for attaching and detaching containers

use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::plugin::{load_confs, ExecPlugin, NetworkPlugin};
use crate::runtime::{ContainerSpec, NetworkMode, RuntimeContext};
use crate::types::PluginResult;

/// Plugins for one container on one network, in config file order
pub struct PluginChain {
    ctx: RuntimeContext,
    plugins: Vec<Box<dyn NetworkPlugin>>,
}

impl PluginChain {
    pub fn new(ctx: RuntimeContext, plugins: Vec<Box<dyn NetworkPlugin>>) -> Self {
        Self { ctx, plugins }
    }

    /// Build the chain for `spec` from the configs of its network
    ///
    /// Containers in host, none or container mode get an empty chain. A config
    /// that fails to load aborts construction.
    pub fn for_container(spec: &ContainerSpec, config: &SyncConfig) -> Result<Self> {
        let ctx = RuntimeContext::for_container(spec, config);

        let mode = NetworkMode::parse(&spec.network_mode);
        let network = match mode.network_name(&config.default_network) {
            Some(network) => network,
            None => {
                debug!(
                    "Container {} uses network mode '{}', no plugins to run",
                    spec.container_id, spec.network_mode
                );
                return Ok(Self::new(ctx, Vec::new()));
            }
        };

        let dir = config.network_dir(network);
        let plugins = load_confs(&dir)?
            .into_iter()
            .map(|conf| {
                let plugin = ExecPlugin::new(conf, config.plugin_path.clone());
                Box::new(plugin) as Box<dyn NetworkPlugin>
            })
            .collect::<Vec<_>>();

        debug!(
            "Loaded {} plugin config(s) from {} for container {}",
            plugins.len(),
            dir.display(),
            spec.container_id
        );

        Ok(Self::new(ctx, plugins))
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in add order
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Run every plugin's ADD in order, stopping at the first failure
    ///
    /// Plugins that already succeeded stay attached. The returned result is
    /// the last one that carried an address.
    pub fn add(&self) -> Result<Option<PluginResult>> {
        let mut result = None;
        for plugin in &self.plugins {
            let plugin_result = plugin.add(&self.ctx).map_err(|err| {
                warn!(
                    "Plugin {} failed to add container {}: {}",
                    plugin.name(),
                    self.ctx.container_id,
                    err
                );
                err
            })?;
            if plugin_result.has_address() {
                result = Some(plugin_result);
            }
        }

        if !self.is_empty() {
            info!(
                "Attached container {} through {} plugin(s)",
                self.ctx.container_id,
                self.len()
            );
        }
        Ok(result)
    }

    /// Run every plugin's DEL in reverse order without a namespace
    ///
    /// All plugins are attempted; the last error seen is returned.
    pub fn del(&self) -> Result<()> {
        let ctx = self.ctx.without_netns();
        let mut last_err = None;
        for plugin in self.plugins.iter().rev() {
            if let Err(err) = plugin.del(&ctx) {
                warn!(
                    "Plugin {} failed to delete container {}: {}",
                    plugin.name(),
                    ctx.container_id,
                    err
                );
                last_err = Some(err);
            }
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Attach a container to its network
pub fn cni_add(spec: &ContainerSpec, config: &SyncConfig) -> Result<Option<PluginResult>> {
    PluginChain::for_container(spec, config)?.add()
}

/// Detach a container from its network
pub fn cni_del(spec: &ContainerSpec, config: &SyncConfig) -> Result<()> {
    PluginChain::for_container(spec, config)?.del()
}
