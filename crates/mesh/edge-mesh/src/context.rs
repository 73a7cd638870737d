use crate::association::{AssociationError, AssociationManager, ContextHandle, SecureAssociation, SecureTransport};
use crate::keystore::{KeyRecord, KeyStore, KeyStoreError, PUBLIC_KEY_LENGTH};
use crate::metrics::MeshMetrics;
use crate::policy::{build_policy, PolicyError, SelectionPolicy};
use crate::registry::{EdgeNode, EdgeRegistry, RegistryError};
use edgetrust_config::EdgeTrustConfig;
use edgetrust_types::{ErrorClass, NodeAddr};
use log::{debug, error, info, warn};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by mesh context operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Association(#[from] AssociationError),

    #[error("Invalid static edge {addr}: {reason}")]
    StaticEdge { addr: NodeAddr, reason: String },

    #[error("Edge {0} advertised before announcing its key")]
    UnannouncedEdge(NodeAddr),
}

impl MeshError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MeshError::KeyStore(e) => e.class(),
            MeshError::Registry(e) => e.class(),
            MeshError::Policy(e) => e.class(),
            MeshError::Association(e) => e.class(),
            MeshError::StaticEdge { .. } => ErrorClass::Configuration,
            MeshError::UnannouncedEdge(_) => ErrorClass::ProtocolRejection,
        }
    }

    /// Whether the subsystem that produced this error must stop.
    pub fn is_fatal(&self) -> bool {
        self.class().is_fatal()
    }
}

/// Outcome of a successful delegation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delegation {
    pub edge: NodeAddr,
    pub uri: String,
    pub handle: ContextHandle,
}

impl From<&SecureAssociation> for Delegation {
    fn from(association: &SecureAssociation) -> Self {
        Self {
            edge: association.edge,
            uri: association.uri.clone(),
            handle: association.handle,
        }
    }
}

/// Serializable view of the whole context
#[derive(Debug, Clone, Serialize)]
pub struct MeshSnapshot {
    pub strategy: &'static str,
    pub edges: Vec<EdgeNode>,
    pub keys: Vec<KeyRecord>,
    pub associations: Vec<SecureAssociation>,
}

/// Process-wide delegation state.
///
/// Built once at startup and passed by `&mut` into every operation. Each
/// operation runs to completion without suspending, so a cooperative
/// scheduler never observes a half-applied update.
pub struct MeshContext<T: SecureTransport> {
    keys: KeyStore,
    registry: EdgeRegistry,
    policy: Box<dyn SelectionPolicy>,
    associations: AssociationManager<T>,
    resource_prefix: String,
    metrics: Option<MeshMetrics>,
}

impl<T: SecureTransport> MeshContext<T> {
    pub fn new(
        keys: KeyStore,
        registry: EdgeRegistry,
        policy: Box<dyn SelectionPolicy>,
        transport: T,
        resource_prefix: &str,
    ) -> Self {
        Self {
            keys,
            registry,
            policy,
            associations: AssociationManager::new(transport),
            resource_prefix: resource_prefix.to_string(),
            metrics: None,
        }
    }

    /// Build a context from configuration, seeding statically configured edges.
    pub fn from_config(config: &EdgeTrustConfig, transport: T) -> Result<Self, MeshError> {
        let mut context = Self::new(
            KeyStore::new(config.keystore.capacity),
            EdgeRegistry::new(config.registry.max_edges, config.registry.max_capabilities_per_edge),
            build_policy(config.policy.strategy),
            transport,
            &config.security.resource_prefix,
        );

        for edge in &config.static_edges {
            let public_key = decode_public_key(&edge.public_key).map_err(|reason| MeshError::StaticEdge {
                addr: edge.addr,
                reason,
            })?;
            context.add_edge(edge.addr, &edge.name, public_key, &edge.capabilities)?;
        }

        info!(
            "Mesh context ready: {} static edges, strategy {}",
            config.static_edges.len(),
            context.policy.name()
        );
        Ok(context)
    }

    pub fn with_metrics(mut self, metrics: MeshMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn registry(&self) -> &EdgeRegistry {
        &self.registry
    }

    pub fn associations(&self) -> &AssociationManager<T> {
        &self.associations
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.associations.transport_mut()
    }

    pub fn strategy(&self) -> &'static str {
        self.policy.name()
    }

    /// Resource path bound for a capability, e.g. `/infer`.
    pub fn resource_uri(&self, capability: &str) -> String {
        if self.resource_prefix.ends_with('/') {
            format!("{}{}", self.resource_prefix, capability)
        } else {
            format!("{}/{}", self.resource_prefix, capability)
        }
    }

    /// Ingest an identity/key announcement.
    ///
    /// When the store is full, keys of unregistered nodes are evicted first.
    /// If a registered edge loses its key anyway, the edge is dropped from the
    /// registry so it can no longer be selected.
    pub fn announce_key(
        &mut self,
        addr: NodeAddr,
        public_key: [u8; PUBLIC_KEY_LENGTH],
    ) -> Result<(), MeshError> {
        if self.keys.find(&addr).is_none() && self.keys.is_full() {
            let registry = &self.registry;
            if let Some(orphan) = self.keys.least_recently_used(|r| registry.find(&r.addr()).is_none()) {
                self.keys.evict(&orphan)?;
                debug!("Evicted key of unregistered node {} to make room for {}", orphan, addr);
            }
        }

        if let Some(evicted) = self.keys.announce(addr, public_key)? {
            if self.registry.remove_edge(&evicted.addr()).is_some() {
                warn!("Key store full: dropped edge {} along with its key", evicted.addr());
            }
        }
        Ok(())
    }

    /// Register an edge and the capabilities it advertises. The edge's key
    /// must already be known.
    pub fn advertise(
        &mut self,
        addr: NodeAddr,
        name: &str,
        capabilities: &[String],
    ) -> Result<(), MeshError> {
        if self.keys.find(&addr).is_none() {
            return Err(MeshError::UnannouncedEdge(addr));
        }
        self.registry.check_advertisement(&addr, capabilities)?;
        self.registry.add_edge(addr, name)?;
        for capability in capabilities {
            self.registry.advertise_capability(&addr, capability)?;
        }
        Ok(())
    }

    /// Announce an edge's key and advertise it in one step. Nothing is stored
    /// unless both halves are accepted.
    pub fn add_edge(
        &mut self,
        addr: NodeAddr,
        name: &str,
        public_key: [u8; PUBLIC_KEY_LENGTH],
        capabilities: &[String],
    ) -> Result<(), MeshError> {
        self.registry.check_advertisement(&addr, capabilities)?;
        self.announce_key(addr, public_key)?;
        self.advertise(addr, name, capabilities)
    }

    pub fn set_edge_active(&mut self, addr: &NodeAddr, active: bool) -> Result<bool, MeshError> {
        Ok(self.registry.set_active(addr, active)?)
    }

    pub fn set_capability_active(
        &mut self,
        addr: &NodeAddr,
        capability: &str,
        active: bool,
    ) -> Result<bool, MeshError> {
        Ok(self.registry.set_capability_active(addr, capability, active)?)
    }

    /// Feed one delegation outcome back into the trust inputs.
    pub fn record_outcome(&mut self, addr: &NodeAddr, capability: &str, success: bool) -> Result<(), MeshError> {
        Ok(self.registry.record_observation(addr, capability, success)?)
    }

    pub fn set_trust_score(&mut self, addr: &NodeAddr, capability: &str, score: f64) -> Result<(), MeshError> {
        Ok(self.registry.set_trust_score(addr, capability, score)?)
    }

    /// Run the configured selection policy.
    pub fn choose_edge(&self, capability: &str) -> Result<Option<NodeAddr>, MeshError> {
        let strategy = self.policy.name();
        match self.policy.choose_edge(&self.registry, capability) {
            Ok(Some(edge)) => {
                debug!("{} chose {} for '{}'", strategy, edge.addr(), capability);
                self.count_selection("chosen");
                Ok(Some(edge.addr()))
            }
            Ok(None) => {
                debug!("{} found no provider for '{}'", strategy, capability);
                self.count_selection("none");
                Ok(None)
            }
            Err(e) => {
                error!("{} failed for '{}': {}", strategy, capability, e);
                self.count_selection("error");
                Err(e.into())
            }
        }
    }

    /// Choose an edge for `capability` and make sure a secure association to
    /// it exists. `Ok(None)` means no provider is available right now.
    pub fn delegate(&mut self, capability: &str) -> Result<Option<Delegation>, MeshError> {
        let edge = match self.choose_edge(capability)? {
            Some(edge) => edge,
            None => return Ok(None),
        };
        let uri = self.resource_uri(capability);

        if let Some(existing) = self.associations.get(&edge, &uri) {
            debug!("Reusing association {}{}", edge, uri);
            return Ok(Some(existing.into()));
        }

        let result = self.associations.bind(&mut self.keys, edge, &uri).map(Delegation::from);
        self.count_association("bind", result.is_ok());
        Ok(Some(result?))
    }

    /// Tear down the association for (edge, uri). Returns false when there was
    /// none.
    pub fn release(&mut self, edge: NodeAddr, uri: &str) -> Result<bool, MeshError> {
        let result = self.associations.unbind(&mut self.keys, edge, uri);
        self.count_association("unbind", result.is_ok());
        Ok(result?)
    }

    /// Unbind every live association.
    pub fn shutdown(&mut self) -> Result<usize, MeshError> {
        let released = self.associations.unbind_all(&mut self.keys)?;
        self.count_association("shutdown", true);
        if released > 0 {
            info!("Released {} secure associations", released);
        }
        Ok(released)
    }

    pub fn snapshot(&self) -> MeshSnapshot {
        MeshSnapshot {
            strategy: self.policy.name(),
            edges: self.registry.iterate().cloned().collect(),
            keys: self.keys.iter().cloned().collect(),
            associations: self.associations.iter().cloned().collect(),
        }
    }

    fn count_selection(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.selection(self.policy.name(), outcome);
        }
    }

    fn count_association(&self, operation: &str, ok: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.association(operation, ok, self.associations.len());
        }
    }
}

impl<T: SecureTransport> Drop for MeshContext<T> {
    fn drop(&mut self) {
        if self.associations.is_empty() {
            return;
        }
        if let Err(e) = self.associations.unbind_all(&mut self.keys) {
            warn!("Failed to release associations on teardown: {}", e);
        }
    }
}

fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_LENGTH], String> {
    let bytes = hex::decode(encoded.trim()).map_err(|e| format!("public key is not hex: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("public key must be {} bytes, got {}", PUBLIC_KEY_LENGTH, b.len()))
}
