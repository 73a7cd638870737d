#![deny(unsafe_code)]
//! Edge Mesh - delegation core for constrained sensor nodes
//!
//! This crate provides:
//! - Reference-counted key pinning for announced edge keys
//! - A registry of edge nodes and the capabilities they advertise
//! - Pluggable edge selection (first-available, highest-trust)
//! - Secure association setup/teardown gated on key pins

pub mod keystore;
pub mod registry;
pub mod policy;
pub mod association;
pub mod context;
pub mod metrics;

pub use keystore::{KeyRecord, KeyStore, KeyStoreError, PUBLIC_KEY_LENGTH};
pub use registry::{Capability, EdgeNode, EdgeRegistry, RegistryError, TrustInputs};
pub use policy::{
    build_policy, FirstAvailable, HighestTrust, PolicyError, RecordedScore, SelectionPolicy,
    TrustScorer,
};
pub use association::{
    AssociationError, AssociationManager, ContextHandle, InMemoryTransport, SecureAssociation,
    SecureTransport, TransportError,
};
pub use context::{Delegation, MeshContext, MeshError, MeshSnapshot};
pub use metrics::MeshMetrics;
