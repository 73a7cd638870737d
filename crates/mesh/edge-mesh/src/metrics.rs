use prometheus::{IntCounterVec, IntGauge, Opts, Registry};

/// Counters for delegation decisions and key pin traffic
#[derive(Clone)]
pub struct MeshMetrics {
    /// Edge selections by strategy and outcome (`chosen`, `none`, `error`)
    pub selections: IntCounterVec,

    /// Bind/unbind attempts by operation and result
    pub associations: IntCounterVec,

    /// Secure associations currently bound
    pub live_associations: IntGauge,
}

impl MeshMetrics {
    /// Create new metrics and register them
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let selections = IntCounterVec::new(
            Opts::new("edgetrust_selections_total", "Edge selection outcomes"),
            &["strategy", "outcome"],
        )?;
        let associations = IntCounterVec::new(
            Opts::new("edgetrust_associations_total", "Secure association operations"),
            &["operation", "result"],
        )?;
        let live_associations = IntGauge::new(
            "edgetrust_live_associations",
            "Secure associations currently bound",
        )?;

        registry.register(Box::new(selections.clone()))?;
        registry.register(Box::new(associations.clone()))?;
        registry.register(Box::new(live_associations.clone()))?;

        Ok(Self {
            selections,
            associations,
            live_associations,
        })
    }

    pub(crate) fn selection(&self, strategy: &str, outcome: &str) {
        self.selections.with_label_values(&[strategy, outcome]).inc();
    }

    pub(crate) fn association(&self, operation: &str, ok: bool, live: usize) {
        let result = if ok { "ok" } else { "error" };
        self.associations.with_label_values(&[operation, result]).inc();
        self.live_associations.set(live as i64);
    }
}
