//! Route generation — one identity route and DNS mapping per instance.
//!
//! `generate` is a pure function of (instance list, active name, config):
//! descriptors are sorted by instance name and carry no timestamps, so
//! identical inputs always serialize to identical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use seatgrid_state::{GatewayOverride, InstanceRecord, LicenseRecord, RouteState};

/// Static routing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Hostnames are `{instance}.{base_domain}`.
    pub base_domain: String,
    /// Address every DNS mapping points at (the gateway).
    pub dns_target: String,
    pub gateway_name: String,
    pub gateway_namespace: Option<String>,
    /// Shared service behind every standby hostname.
    pub standby_service: String,
    pub standby_namespace: Option<String>,
    /// Active backends are `{backend_prefix}{instance}`.
    pub backend_prefix: String,
    pub backend_port: u16,
    pub dns_ttl: u32,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            base_domain: "seats.local".to_string(),
            dns_target: "127.0.0.1".to_string(),
            gateway_name: "default-gateway".to_string(),
            gateway_namespace: None,
            standby_service: "standby-page".to_string(),
            standby_namespace: None,
            backend_prefix: "instance-".to_string(),
            backend_port: 80,
            dns_ttl: 300,
        }
    }
}

impl RouteConfig {
    /// Apply a license's gateway override on top of the static config.
    pub fn with_override(&self, gateway: Option<&GatewayOverride>) -> Self {
        let mut config = self.clone();
        if let Some(gw) = gateway {
            if let Some(domain) = &gw.base_domain {
                config.base_domain = domain.clone();
            }
            if let Some(target) = &gw.dns_target {
                config.dns_target = target.clone();
            }
        }
        config
    }

    /// Hostname of an instance.
    pub fn hostname(&self, instance: &str) -> String {
        format!("{instance}.{}", self.base_domain)
    }
}

/// Service a route forwards to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRef {
    pub service: String,
    /// `None` means the route's own namespace.
    pub namespace: Option<String>,
    pub port: u16,
}

/// Gateway a route attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRef {
    pub name: String,
    pub namespace: String,
}

/// DNS record for a route's hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsMapping {
    pub hostname: String,
    pub record_type: String,
    pub targets: Vec<String>,
    pub ttl: u32,
}

/// Routing assignment for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub namespace: String,
    pub license: String,
    pub instance: String,
    pub hostname: String,
    pub state: RouteState,
    pub backend: BackendRef,
    pub gateway: GatewayRef,
    pub dns: DnsMapping,
}

impl RouteDescriptor {
    /// Identity under which sinks store this descriptor.
    pub fn content_key(&self) -> String {
        format!("route-{}", self.instance)
    }
}

/// All descriptors of one license, sorted by instance name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSet {
    pub namespace: String,
    pub license: String,
    pub routes: Vec<RouteDescriptor>,
}

impl RouteSet {
    /// An empty set (license with no instances).
    pub fn empty(namespace: &str, license: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            license: license.to_string(),
            routes: Vec::new(),
        }
    }

    /// `{namespace}/{license}` key.
    pub fn license_key(&self) -> String {
        format!("{}/{}", self.namespace, self.license)
    }

    /// The active descriptor, if any.
    pub fn active(&self) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.state == RouteState::Active)
    }

    pub fn active_count(&self) -> usize {
        self.routes
            .iter()
            .filter(|r| r.state == RouteState::Active)
            .count()
    }

    pub fn get(&self, instance: &str) -> Option<&RouteDescriptor> {
        self.routes.iter().find(|r| r.instance == instance)
    }

    /// Hex sha-256 over the serialized descriptors.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.routes).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// Generate the route set for a license.
///
/// An instance is active only if its name equals `active`; if `active`
/// names nothing in `instances`, every route is standby.
pub fn generate(
    license: &LicenseRecord,
    instances: &[InstanceRecord],
    active: Option<&str>,
    config: &RouteConfig,
) -> RouteSet {
    let config = config.with_override(license.gateway.as_ref());
    let gateway = GatewayRef {
        name: config.gateway_name.clone(),
        namespace: config
            .gateway_namespace
            .clone()
            .unwrap_or_else(|| license.namespace.clone()),
    };

    let mut routes: Vec<RouteDescriptor> = instances
        .iter()
        .map(|inst| {
            let hostname = config.hostname(&inst.name);
            let is_active = active == Some(inst.name.as_str());
            let (state, backend) = if is_active {
                (
                    RouteState::Active,
                    BackendRef {
                        service: format!("{}{}", config.backend_prefix, inst.name),
                        namespace: None,
                        port: config.backend_port,
                    },
                )
            } else {
                (
                    RouteState::Standby,
                    BackendRef {
                        service: config.standby_service.clone(),
                        namespace: config.standby_namespace.clone(),
                        port: config.backend_port,
                    },
                )
            };

            RouteDescriptor {
                namespace: license.namespace.clone(),
                license: license.name.clone(),
                instance: inst.name.clone(),
                hostname: hostname.clone(),
                state,
                backend,
                gateway: gateway.clone(),
                dns: DnsMapping {
                    hostname,
                    record_type: "A".to_string(),
                    targets: vec![config.dns_target.clone()],
                    ttl: config.dns_ttl,
                },
            }
        })
        .collect();

    routes.sort_by(|a, b| a.instance.cmp(&b.instance));
    routes.dedup_by(|a, b| a.instance == b.instance);

    RouteSet {
        namespace: license.namespace.clone(),
        license: license.name.clone(),
        routes,
    }
}
