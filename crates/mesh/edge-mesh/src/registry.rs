use edgetrust_types::{ErrorClass, NodeAddr};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in registry operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown edge node: {0}")]
    UnknownEdge(NodeAddr),

    #[error("Edge {edge} does not advertise capability '{name}'")]
    UnknownCapability { edge: NodeAddr, name: String },

    #[error("Registry full: at most {0} edge nodes")]
    TooManyEdges(usize),

    #[error("Edge {edge} already advertises {limit} capabilities")]
    TooManyCapabilities { edge: NodeAddr, limit: usize },

    #[error("Invalid capability name: '{0}'")]
    InvalidCapabilityName(String),

    #[error("Invalid trust score {score} for '{name}' on {edge}: must be finite and non-negative")]
    InvalidScore { edge: NodeAddr, name: String, score: f64 },
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::ProtocolRejection
    }
}

/// Raw trust signals collected for one capability of one edge.
///
/// The score is written by an external scoring engine; the registry only
/// stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrustInputs {
    pub successes: u32,
    pub failures: u32,
    pub score: f64,
}

/// A named function an edge node offers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    name: String,
    active: bool,
    trust: TrustInputs,
}

impl Capability {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            active: true,
            trust: TrustInputs::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn trust(&self) -> &TrustInputs {
        &self.trust
    }
}

/// A compute-capable peer known to this node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeNode {
    addr: NodeAddr,
    name: String,
    active: bool,
    capabilities: Vec<Capability>,
}

impl EdgeNode {
    fn new(addr: NodeAddr, name: &str) -> Self {
        Self {
            addr,
            name: name.to_string(),
            active: true,
            capabilities: Vec::new(),
        }
    }

    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    fn capability_mut(&mut self, name: &str) -> Option<&mut Capability> {
        self.capabilities.iter_mut().find(|c| c.name == name)
    }

    /// Whether this edge may be selected for `name` right now.
    pub fn offers(&self, name: &str) -> bool {
        self.active && self.capability(name).map_or(false, Capability::is_active)
    }
}

/// Known edge nodes in insertion order.
///
/// Liveness is not tracked here; an external monitor flips the active flag
/// through [`EdgeRegistry::set_active`].
#[derive(Debug)]
pub struct EdgeRegistry {
    edges: Vec<EdgeNode>,
    max_edges: usize,
    max_capabilities: usize,
}

impl EdgeRegistry {
    /// Create an empty registry with the given limits
    pub fn new(max_edges: usize, max_capabilities: usize) -> Self {
        Self {
            edges: Vec::new(),
            max_edges,
            max_capabilities,
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Iterate edges in insertion order.
    ///
    /// The order is stable until an edge is added or removed.
    pub fn iterate(&self) -> impl Iterator<Item = &EdgeNode> {
        self.edges.iter()
    }

    pub fn find(&self, addr: &NodeAddr) -> Option<&EdgeNode> {
        self.edges.iter().find(|e| &e.addr == addr)
    }

    fn find_mut(&mut self, addr: &NodeAddr) -> Result<&mut EdgeNode, RegistryError> {
        self.edges
            .iter_mut()
            .find(|e| &e.addr == addr)
            .ok_or(RegistryError::UnknownEdge(*addr))
    }

    pub fn find_capability(&self, addr: &NodeAddr, name: &str) -> Option<&Capability> {
        self.find(addr).and_then(|e| e.capability(name))
    }

    /// Register an edge, or refresh the name of a known one.
    pub fn add_edge(&mut self, addr: NodeAddr, name: &str) -> Result<&EdgeNode, RegistryError> {
        if let Some(idx) = self.edges.iter().position(|e| e.addr == addr) {
            if self.edges[idx].name != name {
                debug!("Edge {} renamed to '{}'", addr, name);
                self.edges[idx].name = name.to_string();
            }
            return Ok(&self.edges[idx]);
        }
        if self.edges.len() >= self.max_edges {
            return Err(RegistryError::TooManyEdges(self.max_edges));
        }
        info!("Registered edge {} ('{}')", addr, name);
        self.edges.push(EdgeNode::new(addr, name));
        Ok(&self.edges[self.edges.len() - 1])
    }

    pub fn remove_edge(&mut self, addr: &NodeAddr) -> Option<EdgeNode> {
        let idx = self.edges.iter().position(|e| &e.addr == addr)?;
        info!("Removed edge {}", addr);
        Some(self.edges.remove(idx))
    }

    /// Check that `add_edge` followed by advertising `capabilities` would
    /// succeed, without changing anything.
    pub fn check_advertisement(&self, addr: &NodeAddr, capabilities: &[String]) -> Result<(), RegistryError> {
        for name in capabilities {
            check_capability_name(name)?;
        }
        let known = self.find(addr);
        if known.is_none() && self.edges.len() >= self.max_edges {
            return Err(RegistryError::TooManyEdges(self.max_edges));
        }

        let mut names: Vec<&str> = known
            .map(|e| e.capabilities.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default();
        for name in capabilities {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
        if names.len() > self.max_capabilities {
            return Err(RegistryError::TooManyCapabilities {
                edge: *addr,
                limit: self.max_capabilities,
            });
        }
        Ok(())
    }

    /// Record that an edge offers a capability. Re-advertising is a no-op.
    pub fn advertise_capability(&mut self, addr: &NodeAddr, name: &str) -> Result<(), RegistryError> {
        check_capability_name(name)?;
        let limit = self.max_capabilities;
        let edge = self.find_mut(addr)?;
        if edge.capability(name).is_some() {
            return Ok(());
        }
        if edge.capabilities.len() >= limit {
            return Err(RegistryError::TooManyCapabilities { edge: *addr, limit });
        }
        debug!("Edge {} advertises '{}'", addr, name);
        edge.capabilities.push(Capability::new(name));
        Ok(())
    }

    pub fn withdraw_capability(&mut self, addr: &NodeAddr, name: &str) -> Result<bool, RegistryError> {
        let edge = self.find_mut(addr)?;
        let before = edge.capabilities.len();
        edge.capabilities.retain(|c| c.name != name);
        Ok(edge.capabilities.len() != before)
    }

    /// Set an edge's liveness flag. Returns whether the flag changed.
    pub fn set_active(&mut self, addr: &NodeAddr, active: bool) -> Result<bool, RegistryError> {
        let edge = self.find_mut(addr)?;
        if edge.active == active {
            return Ok(false);
        }
        edge.active = active;
        info!("Edge {} is now {}", addr, if active { "active" } else { "inactive" });
        Ok(true)
    }

    /// Set one capability's flag. Returns whether the flag changed.
    pub fn set_capability_active(
        &mut self,
        addr: &NodeAddr,
        name: &str,
        active: bool,
    ) -> Result<bool, RegistryError> {
        let capability = self.capability_mut(addr, name)?;
        if capability.active == active {
            return Ok(false);
        }
        capability.active = active;
        info!(
            "Capability '{}' on {} is now {}",
            name,
            addr,
            if active { "active" } else { "inactive" }
        );
        Ok(true)
    }

    /// Count one direct observation of a delegated interaction.
    pub fn record_observation(
        &mut self,
        addr: &NodeAddr,
        name: &str,
        success: bool,
    ) -> Result<(), RegistryError> {
        let trust = &mut self.capability_mut(addr, name)?.trust;
        if success {
            trust.successes = trust.successes.saturating_add(1);
        } else {
            trust.failures = trust.failures.saturating_add(1);
        }
        Ok(())
    }

    /// Store the score computed by the external scoring engine.
    ///
    /// Scores must be finite and non-negative; anything else is rejected and
    /// the stored score is left as it was.
    pub fn set_trust_score(&mut self, addr: &NodeAddr, name: &str, score: f64) -> Result<(), RegistryError> {
        let capability = self.capability_mut(addr, name)?;
        if !score.is_finite() || score < 0.0 {
            warn!("Rejecting trust score {} for '{}' on {}", score, name, addr);
            return Err(RegistryError::InvalidScore {
                edge: *addr,
                name: name.to_string(),
                score,
            });
        }
        capability.trust.score = score;
        Ok(())
    }

    fn capability_mut(&mut self, addr: &NodeAddr, name: &str) -> Result<&mut Capability, RegistryError> {
        let edge = self.find_mut(addr)?;
        edge.capability_mut(name).ok_or_else(|| RegistryError::UnknownCapability {
            edge: *addr,
            name: name.to_string(),
        })
    }
}

fn check_capability_name(name: &str) -> Result<(), RegistryError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(RegistryError::InvalidCapabilityName(name.to_string()));
    }
    Ok(())
}
