use anyhow::{bail, Context};
use edgetrust_types::NodeAddr;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration of an edgetrust node.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EdgeTrustConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub keystore: KeyStoreConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub adversary: AdversaryConfig,
    /// Edges known at startup, before any discovery traffic arrives.
    #[serde(default)]
    pub static_edges: Vec<StaticEdgeConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
    pub addr: Option<NodeAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { name: "sensor".to_string(), addr: None }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Maximum number of key records held at once.
    pub capacity: usize,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_edges: usize,
    pub max_capabilities_per_edge: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_edges: 8, max_capabilities_per_edge: 8 }
    }
}

/// Edge selection strategy.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    #[default]
    FirstAvailable,
    HighestTrust,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub strategy: SelectionStrategy,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    /// Resource path prefix used when binding secure contexts, e.g. `/infer`.
    pub resource_prefix: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { resource_prefix: "/".to_string() }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub listen_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { enabled: false, listen_address: "127.0.0.1:8700".to_string() }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AdversaryConfig {
    pub eavesdrop: Option<EavesdropConfig>,
    pub radio_off: Option<RadioOffConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EavesdropConfig {
    pub listen_address: String,
    #[serde(default = "default_gossip_path")]
    pub path: String,
    /// Largest gossip content the endpoint accepts, excluding the signature.
    pub max_content: usize,
    pub signature_size: usize,
}

fn default_gossip_path() -> String {
    "/trust".to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RadioOffConfig {
    pub interval_ms: u64,
    pub duration_ms: u64,
    /// Feed the watchdog this often during the busy-wait; unset disables feeding.
    pub watchdog_period_ms: Option<u64>,
}

impl RadioOffConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    pub fn watchdog_period(&self) -> Option<Duration> {
        self.watchdog_period_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StaticEdgeConfig {
    pub addr: NodeAddr,
    pub name: String,
    /// Hex encoded Ed25519 public key.
    pub public_key: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl EdgeTrustConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keystore.capacity == 0 {
            bail!("keystore.capacity must be greater than zero");
        }
        if self.registry.max_edges == 0 || self.registry.max_capabilities_per_edge == 0 {
            bail!("registry limits must be greater than zero");
        }
        // every registered edge needs its key held
        if self.keystore.capacity < self.registry.max_edges {
            bail!(
                "keystore.capacity ({}) must be at least registry.max_edges ({})",
                self.keystore.capacity,
                self.registry.max_edges
            );
        }
        if !self.security.resource_prefix.starts_with('/') {
            bail!("security.resource_prefix must start with '/': {}", self.security.resource_prefix);
        }
        if let Some(eavesdrop) = &self.adversary.eavesdrop {
            if eavesdrop.max_content == 0 {
                bail!("adversary.eavesdrop.max_content must be greater than zero");
            }
            if !eavesdrop.path.starts_with('/') {
                bail!("adversary.eavesdrop.path must start with '/': {}", eavesdrop.path);
            }
        }
        if let Some(radio_off) = &self.adversary.radio_off {
            if radio_off.interval_ms == 0 || radio_off.duration_ms == 0 {
                bail!("adversary.radio_off interval and duration must both be non-zero");
            }
            if radio_off.watchdog_period_ms == Some(0) {
                bail!("adversary.radio_off.watchdog_period_ms must be non-zero when set");
            }
        }
        if self.static_edges.len() > self.registry.max_edges {
            bail!(
                "{} static edges configured but registry.max_edges is {}",
                self.static_edges.len(),
                self.registry.max_edges
            );
        }
        Ok(())
    }
}

/// Loads and validates a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<EdgeTrustConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file from {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    Ok(config)
}

/// Parses and validates configuration from a TOML string.
pub fn parse_config(content: &str) -> anyhow::Result<EdgeTrustConfig> {
    let config: EdgeTrustConfig = toml::from_str(content).context("Failed to parse TOML config")?;
    config.validate()?;
    Ok(config)
}

// Example configuration:
/*
[node]
name = "sensor-7"

[policy]
strategy = "highest-trust"

[security]
resource_prefix = "/infer"

[adversary.radio_off]
interval_ms = 10000
duration_ms = 2000
watchdog_period_ms = 500

[[static_edges]]
addr = "fd00::1"
name = "edge-a"
public_key = "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29"
capabilities = ["infer"]
*/
