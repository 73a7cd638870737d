use crate::keystore::{KeyStore, KeyStoreError};
use edgetrust_types::{ErrorClass, NodeAddr};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Handle to a security context installed in the secure transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContextHandle(pub u64);

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Failure reported by the secure transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Secure transport failed for {endpoint}{path}: {reason}")]
pub struct TransportError {
    pub endpoint: NodeAddr,
    pub path: String,
    pub reason: String,
}

/// Errors that can occur while binding or unbinding secure associations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssociationError {
    #[error("Association invariant violated: {0}")]
    InvariantViolation(String),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl AssociationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AssociationError::InvariantViolation(_) => ErrorClass::InvariantViolation,
            AssociationError::KeyStore(e) => e.class(),
            AssociationError::Transport(_) => ErrorClass::External,
        }
    }
}

/// Secure session establishment API, keyed by (endpoint, resource path).
///
/// The wire protocol and handshake live behind this trait.
pub trait SecureTransport {
    fn establish(
        &mut self,
        endpoint: NodeAddr,
        path: &str,
        key: &[u8; 32],
    ) -> Result<ContextHandle, TransportError>;

    /// Remove the context for (endpoint, path). Returns false when there was
    /// nothing to remove.
    fn teardown(&mut self, endpoint: NodeAddr, path: &str) -> bool;
}

/// Transport that keeps contexts in a local table.
///
/// Used by tests and by the node binary when no real secure transport is
/// wired in.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    contexts: HashMap<(NodeAddr, String), ContextHandle>,
    next_handle: u64,
    refuse: Vec<NodeAddr>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future `establish` towards `endpoint` fail.
    pub fn refuse(&mut self, endpoint: NodeAddr) {
        self.refuse.push(endpoint);
    }

    pub fn has_context(&self, endpoint: NodeAddr, path: &str) -> bool {
        self.contexts.contains_key(&(endpoint, path.to_string()))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drop a context behind the manager's back, as a lost session would.
    pub fn forget(&mut self, endpoint: NodeAddr, path: &str) -> bool {
        self.contexts.remove(&(endpoint, path.to_string())).is_some()
    }
}

impl SecureTransport for InMemoryTransport {
    fn establish(
        &mut self,
        endpoint: NodeAddr,
        path: &str,
        _key: &[u8; 32],
    ) -> Result<ContextHandle, TransportError> {
        if self.refuse.contains(&endpoint) {
            return Err(TransportError {
                endpoint,
                path: path.to_string(),
                reason: "handshake refused".to_string(),
            });
        }
        self.next_handle += 1;
        let handle = ContextHandle(self.next_handle);
        self.contexts.insert((endpoint, path.to_string()), handle);
        Ok(handle)
    }

    fn teardown(&mut self, endpoint: NodeAddr, path: &str) -> bool {
        self.contexts.remove(&(endpoint, path.to_string())).is_some()
    }
}

/// A bound secure context for one (edge, resource) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecureAssociation {
    pub edge: NodeAddr,
    pub uri: String,
    pub handle: ContextHandle,
}

/// Binds and unbinds secure contexts, holding a key pin for each one.
pub struct AssociationManager<T> {
    transport: T,
    associations: HashMap<(NodeAddr, String), SecureAssociation>,
    #[cfg_attr(feature = "security", allow(dead_code))]
    next_local_handle: u64,
}

impl<T: SecureTransport> AssociationManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            associations: HashMap::new(),
            next_local_handle: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn get(&self, edge: &NodeAddr, uri: &str) -> Option<&SecureAssociation> {
        self.associations.get(&(*edge, uri.to_string()))
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecureAssociation> {
        self.associations.values()
    }

    /// Pin the edge's key and install a secure context for (edge, uri).
    ///
    /// The edge must have announced its key already and the pair must not be
    /// bound; either condition failing is an invariant violation.
    pub fn bind(
        &mut self,
        keys: &mut KeyStore,
        edge: NodeAddr,
        uri: &str,
    ) -> Result<&SecureAssociation, AssociationError> {
        let key = match keys.find(&edge) {
            Some(record) => *record.context_key(),
            None => {
                return Err(AssociationError::InvariantViolation(format!(
                    "no key record for selected edge {}",
                    edge
                )))
            }
        };
        let slot = (edge, uri.to_string());
        if self.associations.contains_key(&slot) {
            return Err(AssociationError::InvariantViolation(format!(
                "association {}{} is already bound",
                edge, uri
            )));
        }

        keys.pin(&edge)?;
        let handle = match self.install(edge, uri, &key) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Secure context setup for {}{} failed: {}", edge, uri, e);
                keys.unpin(&edge)?;
                return Err(e.into());
            }
        };

        info!("Bound {}{} ({})", edge, uri, handle);
        let association = SecureAssociation {
            edge,
            uri: uri.to_string(),
            handle,
        };
        Ok(self.associations.entry(slot).or_insert(association))
    }

    /// Remove the secure context for (edge, uri) and release its key pin.
    ///
    /// Returns `Ok(false)` when no association exists; nothing was pinned on
    /// its behalf, so nothing is released.
    pub fn unbind(
        &mut self,
        keys: &mut KeyStore,
        edge: NodeAddr,
        uri: &str,
    ) -> Result<bool, AssociationError> {
        let association = match self.associations.remove(&(edge, uri.to_string())) {
            Some(association) => association,
            None => {
                debug!("Unbind of {}{}: no association", edge, uri);
                return Ok(false);
            }
        };

        if !self.uninstall(edge, uri) {
            debug!("Secure transport had no context for {}{}", edge, uri);
        }
        keys.unpin(&edge)?;
        info!("Unbound {}{} ({})", edge, uri, association.handle);
        Ok(true)
    }

    /// Unbind every live association, e.g. at shutdown.
    pub fn unbind_all(&mut self, keys: &mut KeyStore) -> Result<usize, AssociationError> {
        let slots: Vec<(NodeAddr, String)> = self.associations.keys().cloned().collect();
        for (edge, uri) in &slots {
            self.unbind(keys, *edge, uri)?;
        }
        Ok(slots.len())
    }

    #[cfg(feature = "security")]
    fn install(&mut self, edge: NodeAddr, uri: &str, key: &[u8; 32]) -> Result<ContextHandle, TransportError> {
        self.transport.establish(edge, uri, key)
    }

    #[cfg(not(feature = "security"))]
    fn install(&mut self, _edge: NodeAddr, _uri: &str, _key: &[u8; 32]) -> Result<ContextHandle, TransportError> {
        self.next_local_handle += 1;
        Ok(ContextHandle(self.next_local_handle))
    }

    #[cfg(feature = "security")]
    fn uninstall(&mut self, edge: NodeAddr, uri: &str) -> bool {
        self.transport.teardown(edge, uri)
    }

    #[cfg(not(feature = "security"))]
    fn uninstall(&mut self, _edge: NodeAddr, _uri: &str) -> bool {
        true
    }
}
