//! Per-run cache operation statistics.

/// What the coordinator decided for one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Stored signature matched; execution skipped.
    Hit,
    /// No usable stored entry; execution required.
    Miss,
    /// Caching disabled; executed without cache involvement.
    Disabled,
}

/// Record of one cache decision during a run.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// The cache key the decision was made for.
    pub cache_key: String,
    /// The decision.
    pub decision: Decision,
    /// Whether the blob was actually read from storage this run. Always
    /// `false` for misses and for hits whose value no consumer needed.
    pub loaded: bool,
}

/// Collects cache events for a single run.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    events: Vec<CacheEvent>,
}

impl CacheStats {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, cache_key: &str, decision: Decision) {
        self.events.push(CacheEvent {
            cache_key: cache_key.to_string(),
            decision,
            loaded: false,
        });
    }

    pub(crate) fn record_load(&mut self, cache_key: &str) {
        if let Some(event) = self
            .events
            .iter_mut()
            .rev()
            .find(|e| e.cache_key == cache_key)
        {
            event.loaded = true;
        }
    }

    /// Returns all recorded events in decision order.
    pub fn events(&self) -> &[CacheEvent] {
        &self.events
    }

    /// Number of cache hits this run.
    pub fn hits(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.decision == Decision::Hit)
            .count()
    }

    /// Number of cache misses this run.
    pub fn misses(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.decision == Decision::Miss)
            .count()
    }

    /// Number of blobs actually loaded from storage this run.
    pub fn loads(&self) -> usize {
        self.events.iter().filter(|e| e.loaded).count()
    }

    /// One-line summary of the run, e.g.
    /// `foo: HIT (skipped) | bar: MISS | baz: NO-CACHE`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .events
            .iter()
            .map(|e| {
                let status = match (e.decision, e.loaded) {
                    (Decision::Hit, true) => "HIT",
                    (Decision::Hit, false) => "HIT (skipped)",
                    (Decision::Miss, _) => "MISS",
                    (Decision::Disabled, _) => "NO-CACHE",
                };
                format!("{}: {}", e.cache_key, status)
            })
            .collect();
        parts.join(" | ")
    }
}
