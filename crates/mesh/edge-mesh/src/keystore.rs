use edgetrust_types::{ErrorClass, NodeAddr};
use ed25519_dalek::VerifyingKey;
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use ed25519_dalek::PUBLIC_KEY_LENGTH;

/// Domain tag mixed into the derived secure-context key material.
const CONTEXT_KEY_DOMAIN: &[u8] = b"edgetrust/secure-context/v1";

/// Errors that can occur in key store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("Key store invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid public key announced by {0}")]
    InvalidKey(NodeAddr),

    #[error("Key for {0} changed while pinned")]
    PinnedKeyChanged(NodeAddr),

    #[error("Key store full: all {0} records are pinned")]
    Full(usize),
}

impl KeyStoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KeyStoreError::InvariantViolation(_) => ErrorClass::InvariantViolation,
            KeyStoreError::InvalidKey(_) | KeyStoreError::PinnedKeyChanged(_) => {
                ErrorClass::ProtocolRejection
            }
            KeyStoreError::Full(_) => ErrorClass::External,
        }
    }
}

/// Public key material announced by a node, plus its pin state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyRecord {
    addr: NodeAddr,
    #[serde(with = "hex_bytes")]
    public_key: [u8; PUBLIC_KEY_LENGTH],
    #[serde(skip)]
    context_key: [u8; 32],
    pin_count: u32,
    #[serde(skip)]
    last_used: u64,
}

impl KeyRecord {
    fn new(addr: NodeAddr, public_key: [u8; PUBLIC_KEY_LENGTH], tick: u64) -> Self {
        Self {
            addr,
            public_key,
            context_key: derive_context_key(&addr, &public_key),
            pin_count: 0,
            last_used: tick,
        }
    }

    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    /// Opaque key material handed to the secure transport when binding.
    pub fn context_key(&self) -> &[u8; 32] {
        &self.context_key
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Short fingerprint of the public key for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(self.public_key)[..8])
    }
}

fn derive_context_key(addr: &NodeAddr, public_key: &[u8; PUBLIC_KEY_LENGTH]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CONTEXT_KEY_DOMAIN);
    hasher.update(addr.octets());
    hasher.update(public_key);
    hasher.finalize().into()
}

/// Capacity-bound store of announced keys with reference-counted pinning.
///
/// A record with a non-zero pin count backs at least one live secure
/// association and can neither be evicted nor have its key replaced.
#[derive(Debug)]
pub struct KeyStore {
    records: Vec<KeyRecord>,
    capacity: usize,
    tick: u64,
}

impl KeyStore {
    /// Create a new key store holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.iter()
    }

    /// Look up the record for a node. No side effects.
    pub fn find(&self, addr: &NodeAddr) -> Option<&KeyRecord> {
        self.records.iter().find(|r| &r.addr == addr)
    }

    fn position(&self, addr: &NodeAddr) -> Option<usize> {
        self.records.iter().position(|r| &r.addr == addr)
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Ingest an identity/key announcement.
    ///
    /// Creates the record on first discovery and refreshes it afterwards. When
    /// the store is full the least recently used unpinned record is evicted
    /// and handed back to the caller.
    pub fn announce(
        &mut self,
        addr: NodeAddr,
        public_key: [u8; PUBLIC_KEY_LENGTH],
    ) -> Result<Option<KeyRecord>, KeyStoreError> {
        VerifyingKey::from_bytes(&public_key).map_err(|_| KeyStoreError::InvalidKey(addr))?;
        let tick = self.next_tick();

        if let Some(idx) = self.position(&addr) {
            let record = &mut self.records[idx];
            if record.public_key != public_key {
                if record.is_pinned() {
                    warn!("Rejecting key change for pinned record {}", addr);
                    return Err(KeyStoreError::PinnedKeyChanged(addr));
                }
                info!("Replacing key for {} ({} -> new)", addr, record.fingerprint());
                *record = KeyRecord::new(addr, public_key, tick);
            } else {
                record.last_used = tick;
            }
            return Ok(None);
        }

        let evicted = if self.records.len() >= self.capacity {
            let victim = self
                .least_recently_used(|_| true)
                .ok_or(KeyStoreError::Full(self.capacity))?;
            Some(self.evict(&victim)?)
        } else {
            None
        };

        let record = KeyRecord::new(addr, public_key, tick);
        debug!("Stored key {} for {}", record.fingerprint(), addr);
        self.records.push(record);
        Ok(evicted)
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Least recently used unpinned record accepted by `filter`.
    pub fn least_recently_used(&self, filter: impl Fn(&KeyRecord) -> bool) -> Option<NodeAddr> {
        self.records
            .iter()
            .filter(|r| !r.is_pinned() && filter(r))
            .min_by_key(|r| r.last_used)
            .map(|r| r.addr)
    }

    /// Take a reference on a node's key. Returns the new pin count.
    pub fn pin(&mut self, addr: &NodeAddr) -> Result<u32, KeyStoreError> {
        let tick = self.next_tick();
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.addr == addr)
            .ok_or_else(|| {
                KeyStoreError::InvariantViolation(format!("pin of absent key record for {}", addr))
            })?;
        record.pin_count += 1;
        record.last_used = tick;
        debug!("Pinned key for {} (count {})", addr, record.pin_count);
        Ok(record.pin_count)
    }

    /// Release a reference on a node's key. Returns the new pin count.
    pub fn unpin(&mut self, addr: &NodeAddr) -> Result<u32, KeyStoreError> {
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.addr == addr)
            .ok_or_else(|| {
                KeyStoreError::InvariantViolation(format!("unpin of absent key record for {}", addr))
            })?;
        if record.pin_count == 0 {
            return Err(KeyStoreError::InvariantViolation(format!(
                "unpin of {} would make pin count negative",
                addr
            )));
        }
        record.pin_count -= 1;
        debug!("Unpinned key for {} (count {})", addr, record.pin_count);
        Ok(record.pin_count)
    }

    /// Drop a record. Evicting a pinned record is an invariant violation.
    pub fn evict(&mut self, addr: &NodeAddr) -> Result<KeyRecord, KeyStoreError> {
        let idx = self.position(addr).ok_or_else(|| {
            KeyStoreError::InvariantViolation(format!("eviction of absent key record for {}", addr))
        })?;
        if self.records[idx].is_pinned() {
            return Err(KeyStoreError::InvariantViolation(format!(
                "eviction of pinned key record for {} (count {})",
                addr, self.records[idx].pin_count
            )));
        }
        let record = self.records.remove(idx);
        info!("Evicted key record for {}", addr);
        Ok(record)
    }
}

mod hex_bytes {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }
}
