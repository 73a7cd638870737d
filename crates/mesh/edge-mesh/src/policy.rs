use crate::registry::{Capability, EdgeNode, EdgeRegistry};
use edgetrust_config::SelectionStrategy;
use edgetrust_types::{ErrorClass, NodeAddr};
use log::{debug, error, warn};
use thiserror::Error;

/// Errors that can occur while choosing an edge
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// The scorer produced a value outside its contract (NaN, infinite or
    /// negative). This is a configuration error, not a runtime condition.
    #[error("Trust scorer returned invalid score {score} for '{capability}' on {edge}")]
    InvalidScore {
        edge: NodeAddr,
        capability: String,
        score: f64,
    },
}

impl PolicyError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Configuration
    }
}

/// Pure scoring function over (edge, capability).
///
/// Implementations must be total over active capabilities, side-effect free
/// and return finite non-negative values.
pub trait TrustScorer {
    fn score(&self, edge: &EdgeNode, capability: &Capability) -> f64;
}

impl<F> TrustScorer for F
where
    F: Fn(&EdgeNode, &Capability) -> f64,
{
    fn score(&self, edge: &EdgeNode, capability: &Capability) -> f64 {
        self(edge, capability)
    }
}

/// Uses the score last stored in the registry by the external scoring engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedScore;

impl TrustScorer for RecordedScore {
    fn score(&self, _edge: &EdgeNode, capability: &Capability) -> f64 {
        capability.trust().score
    }
}

/// Strategy for picking the edge a capability request is delegated to.
///
/// `Ok(None)` means no edge currently offers the capability; callers treat it
/// as a normal, retryable outcome.
pub trait SelectionPolicy: Send {
    fn name(&self) -> &'static str;

    fn choose_edge<'r>(
        &self,
        registry: &'r EdgeRegistry,
        capability: &str,
    ) -> Result<Option<&'r EdgeNode>, PolicyError>;
}

/// First eligible edge in registry iteration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAvailable;

impl SelectionPolicy for FirstAvailable {
    fn name(&self) -> &'static str {
        "first-available"
    }

    fn choose_edge<'r>(
        &self,
        registry: &'r EdgeRegistry,
        capability: &str,
    ) -> Result<Option<&'r EdgeNode>, PolicyError> {
        Ok(registry.iterate().find(|edge| edge.offers(capability)))
    }
}

/// Eligible edge with the highest trust score; earlier edges win ties.
#[derive(Debug, Clone, Default)]
pub struct HighestTrust<S> {
    scorer: S,
}

impl<S: TrustScorer> HighestTrust<S> {
    pub fn new(scorer: S) -> Self {
        Self { scorer }
    }
}

impl<S: TrustScorer + Send> SelectionPolicy for HighestTrust<S> {
    fn name(&self) -> &'static str {
        "highest-trust"
    }

    fn choose_edge<'r>(
        &self,
        registry: &'r EdgeRegistry,
        capability: &str,
    ) -> Result<Option<&'r EdgeNode>, PolicyError> {
        // Valid scores are >= 0, so a zero-trust edge still beats the sentinel.
        let mut best_score = -1.0_f64;
        let mut best: Option<&'r EdgeNode> = None;

        for edge in registry.iterate().filter(|e| e.is_active()) {
            let cap = match edge.capability(capability) {
                Some(cap) => cap,
                None => {
                    warn!("Policy anomaly: active edge {} lacks capability '{}', skipping", edge.addr(), capability);
                    continue;
                }
            };
            if !cap.is_active() {
                continue;
            }

            let score = self.scorer.score(edge, cap);
            if !score.is_finite() || score < 0.0 {
                error!("Invalid trust score {} for '{}' on {}", score, capability, edge.addr());
                return Err(PolicyError::InvalidScore {
                    edge: edge.addr(),
                    capability: capability.to_string(),
                    score,
                });
            }

            debug!("Edge {} scores {:.3} for '{}'", edge.addr(), score, capability);
            if score > best_score {
                best_score = score;
                best = Some(edge);
            }
        }

        Ok(best)
    }
}

/// Build the configured strategy. Highest-trust reads scores recorded in the
/// registry.
pub fn build_policy(strategy: SelectionStrategy) -> Box<dyn SelectionPolicy> {
    match strategy {
        SelectionStrategy::FirstAvailable => Box::new(FirstAvailable),
        SelectionStrategy::HighestTrust => Box::new(HighestTrust::new(RecordedScore)),
    }
}
