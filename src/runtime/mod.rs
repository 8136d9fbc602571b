//! Per-container parameters handed to every plugin in a chain

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::{
    SyncConfig, LABEL_CONTAINER_IP, LABEL_CONTAINER_UUID, LABEL_LINK_MTU_OVERHEAD,
    LABEL_MAC_ADDRESS,
};

/// Container attributes as reported by the container engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container ID
    pub container_id: String,
    /// PID of the container's init process
    pub pid: u32,
    /// Network mode string (`host`, `none`, `container:<id>`, a network name, ...)
    #[serde(default)]
    pub network_mode: String,
    /// Container labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Classified network mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMode {
    Default,
    Bridge,
    Host,
    None,
    /// Shares the network namespace of another container
    Container(String),
    /// User-defined network
    Named(String),
}

impl NetworkMode {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "" | "default" => NetworkMode::Default,
            "bridge" => NetworkMode::Bridge,
            "host" => NetworkMode::Host,
            "none" => NetworkMode::None,
            other => match other.strip_prefix("container:") {
                Some(id) => NetworkMode::Container(id.to_string()),
                None => NetworkMode::Named(other.to_string()),
            },
        }
    }

    /// Host, none and container modes get no plugins at all
    pub fn requires_plugins(&self) -> bool {
        !matches!(
            self,
            NetworkMode::Host | NetworkMode::None | NetworkMode::Container(_)
        )
    }

    /// Network whose config directory drives the chain
    pub fn network_name<'a>(&'a self, default_network: &'a str) -> Option<&'a str> {
        match self {
            NetworkMode::Default => Some(default_network),
            NetworkMode::Bridge => Some("bridge"),
            NetworkMode::Named(name) => Some(name.as_str()),
            NetworkMode::Host | NetworkMode::None | NetworkMode::Container(_) => None,
        }
    }
}

/// Parameters for one ADD or DEL across a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub container_id: String,
    /// Network namespace path; empty when the namespace may already be gone
    pub netns: String,
    pub ifname: String,
    /// CNI_ARGS pairs, order preserved
    pub args: Vec<(String, String)>,
}

impl RuntimeContext {
    /// Build the context for `spec`
    pub fn for_container(spec: &ContainerSpec, config: &SyncConfig) -> Self {
        let mut args = vec![
            ("IgnoreUnknown".to_string(), "1".to_string()),
            ("DOCKER".to_string(), "true".to_string()),
        ];

        let labelled = [
            (LABEL_CONTAINER_UUID, "RancherContainerUUID"),
            (LABEL_LINK_MTU_OVERHEAD, "LinkMTUOverhead"),
            (LABEL_MAC_ADDRESS, "MACAddress"),
        ];
        for (label, key) in labelled {
            if let Some(value) = spec.labels.get(label) {
                args.push((key.to_string(), value.clone()));
            }
        }

        // Calico-style plugins take a fixed address instead of allocating one
        if let Some(cidr) = spec.labels.get(LABEL_CONTAINER_IP) {
            match parse_cidr_ip(cidr) {
                Some(ip) => args.push(("IP".to_string(), ip)),
                None => debug!("Ignoring unparsable {} label: {}", LABEL_CONTAINER_IP, cidr),
            }
        }

        Self {
            container_id: spec.container_id.clone(),
            netns: format!("/proc/{}/ns/net", spec.pid),
            ifname: config.ifname.clone(),
            args,
        }
    }

    /// Copy with the namespace cleared, for best-effort teardown
    pub fn without_netns(&self) -> Self {
        Self {
            netns: String::new(),
            ..self.clone()
        }
    }

    /// Args rendered as CNI_ARGS
    pub fn cni_args(&self) -> String {
        self.args
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Address part of a CIDR; a bare address without prefix is rejected
fn parse_cidr_ip(cidr: &str) -> Option<String> {
    if !cidr.contains('/') {
        return None;
    }
    cidr.parse::<IpNetwork>().ok().map(|net| net.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_ip_extraction() {
        assert_eq!(parse_cidr_ip("10.42.3.7/16").as_deref(), Some("10.42.3.7"));
        assert_eq!(parse_cidr_ip("fd00::5/64").as_deref(), Some("fd00::5"));
        assert_eq!(parse_cidr_ip("10.42.3.7"), None);
        assert_eq!(parse_cidr_ip("not-an-ip/24"), None);
    }

    #[test]
    fn cni_args_joined_in_order() {
        let ctx = RuntimeContext {
            container_id: "c1".to_string(),
            netns: "/proc/1/ns/net".to_string(),
            ifname: "eth0".to_string(),
            args: vec![
                ("IgnoreUnknown".to_string(), "1".to_string()),
                ("IP".to_string(), "10.0.0.2".to_string()),
            ],
        };
        assert_eq!(ctx.cni_args(), "IgnoreUnknown=1;IP=10.0.0.2");
        assert_eq!(ctx.without_netns().netns, "");
        assert_eq!(ctx.without_netns().args, ctx.args);
    }
}
