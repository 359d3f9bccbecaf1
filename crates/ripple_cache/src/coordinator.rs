//! Hit/miss coordination across a pipeline run.
//!
//! The coordinator walks nodes in the pipeline's topological order,
//! computes each node's candidate signature from its parents'
//! current-run signatures, and compares it to the stored one. A hit
//! yields a deferred handle; the blob is only read when some consumer
//! resolves it, and at most once per run. A miss asks the runner to
//! execute and persists signature and blob together afterwards, blob
//! first, so a stored signature never exists without its completed blob.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use ripple_common::ContentHash;
use tracing::{debug, info};

use crate::backend::CacheBackend;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{item_key, make_cache_key};
use crate::pipeline::{NodeSpec, PipelineSpec};
use crate::signature::{NodeSignature, SignatureComputer};
use crate::stats::{CacheStats, Decision};
use crate::value::{view_of, Fingerprintable, ValueView};

/// Handle to a cached value that has not been loaded yet.
///
/// Resolving through [`CacheCoordinator::resolve`] reads the blob at most
/// once per run; every later consumer shares that load.
#[derive(Debug, Clone)]
pub struct DeferredValue {
    key: String,
}

impl DeferredValue {
    /// The cache key this handle refers to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of visiting one node (or one item of a mapped node).
#[derive(Debug, Clone)]
pub enum CacheDecision {
    /// Stored signature matches; the value stays unloaded until resolved.
    Hit(DeferredValue),
    /// No usable stored entry; the runner must execute the node and hand
    /// the output back via `report_result` / `report_item_result`.
    Miss,
    /// Caching is disabled; the runner executes and nothing is persisted.
    Disabled,
}

impl CacheDecision {
    /// Returns `true` for a hit.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheDecision::Hit(_))
    }
}

/// Wraps a batch of mapped items as one sequence-valued input, for
/// whole-batch caching when per-item caching is off.
struct BatchItems<'a>(&'a [&'a dyn Fingerprintable]);

impl Fingerprintable for BatchItems<'_> {
    fn view(&self) -> ValueView {
        ValueView::Seq(self.0.iter().map(|item| view_of(*item)).collect())
    }
}

/// Drives cache decisions for one pipeline, one run at a time.
///
/// The pipeline definition is borrowed for the coordinator's lifetime;
/// the backend is owned. Call [`begin_run`](Self::begin_run) before each
/// traversal and visit nodes strictly in pipeline order so parents'
/// current-run signatures exist before their children need them.
pub struct CacheCoordinator<'p, B> {
    pipeline: &'p PipelineSpec,
    backend: B,
    config: CacheConfig,
    computer: SignatureComputer,
    /// Current-run signatures by cache key; the source of `deps_hash`.
    current: HashMap<String, NodeSignature>,
    /// Candidate signatures awaiting a successful execution report.
    pending: HashMap<String, NodeSignature>,
    /// Values materialized this run, shared across consumers.
    loaded: HashMap<String, Arc<Vec<u8>>>,
    stats: CacheStats,
}

impl<'p, B: CacheBackend> CacheCoordinator<'p, B> {
    /// Creates a coordinator for the given pipeline, backend, and config.
    pub fn new(pipeline: &'p PipelineSpec, backend: B, config: CacheConfig) -> Self {
        let computer =
            SignatureComputer::new(config.env_hash.as_deref(), config.dependency_depth);
        Self {
            pipeline,
            backend,
            config,
            computer,
            current: HashMap::new(),
            pending: HashMap::new(),
            loaded: HashMap::new(),
            stats: CacheStats::new(),
        }
    }

    /// Resets per-run state. Call at the start of every run.
    pub fn begin_run(&mut self) {
        self.current.clear();
        self.pending.clear();
        self.loaded.clear();
        self.stats = CacheStats::new();
    }

    /// Finishes the run and returns its statistics.
    pub fn end_run(&mut self) -> CacheStats {
        if self.config.verbose && !self.stats.events().is_empty() {
            info!(summary = %self.stats.summary(), "cache run summary");
        }
        mem::take(&mut self.stats)
    }

    /// Statistics collected so far this run.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The current-run signature stored under a cache key, if resolved.
    pub fn current_signature(&self, key: &str) -> Option<&NodeSignature> {
        self.current.get(key)
    }

    /// Removes everything from the backing store and resets run state.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.begin_run();
        self.backend.clear()
    }

    /// Visits an unmapped node and decides hit or miss.
    ///
    /// `direct_inputs` are the node's own parameters: values not produced
    /// by any parent. A storage failure is returned as-is (the
    /// cache-unavailable condition); the caller may then either abort or
    /// degrade via [`force_miss`](Self::force_miss).
    pub fn visit(
        &mut self,
        node_name: &str,
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<CacheDecision, CacheError> {
        let node = self.node(node_name)?;
        if node.is_mapped() {
            return Err(CacheError::MapAxisMismatch {
                node: node_name.to_string(),
                reason: "has a map axis; use visit_mapped".to_string(),
            });
        }
        if !self.config.enabled {
            self.stats.record(node_name, Decision::Disabled);
            return Ok(CacheDecision::Disabled);
        }
        let parent_sigs = self.parent_signatures(node, None)?;
        let candidate =
            self.computer
                .compute(node_name, &node.source, direct_inputs, &parent_sigs);
        let stored = self.backend.get_signature(node_name)?;
        Ok(self.decide(candidate, stored))
    }

    /// Visits a mapped node whose items are raw input values.
    ///
    /// Each item gets its own cache key `node::item_key` and an
    /// independent decision; the item itself is fingerprinted as part of
    /// that entry's inputs. Returns `(item_key, decision)` pairs in item
    /// order. With per-item caching off, the whole batch collapses into a
    /// single entry under the plain node name.
    pub fn visit_mapped(
        &mut self,
        node_name: &str,
        items: &[&dyn Fingerprintable],
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<Vec<(String, CacheDecision)>, CacheError> {
        let node = self.mapped_node(node_name)?;
        let axis = node.map_axis.as_deref().unwrap_or_default();

        if !self.config.per_item_caching {
            let batch = BatchItems(items);
            let mut inputs = direct_inputs.to_vec();
            inputs.push((axis, &batch as &dyn Fingerprintable));
            let decision = self.visit_single(node, node_name, &inputs)?;
            return Ok(vec![(node_name.to_string(), decision)]);
        }

        let mut decisions = Vec::with_capacity(items.len());
        for item in items {
            let ikey = item_key(
                *item,
                node.item_key_attr.as_deref(),
                self.computer.hasher(),
            );
            let key = make_cache_key(node_name, Some(&ikey));
            if !self.config.enabled {
                self.stats.record(&key, Decision::Disabled);
                decisions.push((ikey, CacheDecision::Disabled));
                continue;
            }
            let parent_sigs = self.parent_signatures(node, Some(&ikey))?;
            let mut inputs = direct_inputs.to_vec();
            inputs.push((axis, *item));
            let candidate = self.computer.compute(&key, &node.source, &inputs, &parent_sigs);
            let stored = self.backend.get_signature(&key)?;
            decisions.push((ikey, self.decide(candidate, stored)));
        }
        Ok(decisions)
    }

    /// Visits a mapped node whose items come from a mapped parent.
    ///
    /// Items are aligned with the parent by key, so only the keys are
    /// needed here: invalidation of an item's content flows through the
    /// parent's per-item signature in `deps_hash`, and the item values
    /// themselves stay unloaded (lazy) unless this node misses.
    pub fn visit_mapped_keys(
        &mut self,
        node_name: &str,
        item_keys: &[&str],
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<Vec<(String, CacheDecision)>, CacheError> {
        let node = self.mapped_node(node_name)?;

        if !self.config.per_item_caching {
            let decision = self.visit_single(node, node_name, direct_inputs)?;
            return Ok(vec![(node_name.to_string(), decision)]);
        }

        let mut decisions = Vec::with_capacity(item_keys.len());
        for &ikey in item_keys {
            let key = make_cache_key(node_name, Some(ikey));
            if !self.config.enabled {
                self.stats.record(&key, Decision::Disabled);
                decisions.push((ikey.to_string(), CacheDecision::Disabled));
                continue;
            }
            let parent_sigs = self.parent_signatures(node, Some(ikey))?;
            let candidate =
                self.computer
                    .compute(&key, &node.source, direct_inputs, &parent_sigs);
            let stored = self.backend.get_signature(&key)?;
            decisions.push((ikey.to_string(), self.decide(candidate, stored)));
        }
        Ok(decisions)
    }

    /// Registers a miss without consulting storage.
    ///
    /// Degradation path for when storage reported an error: the node is
    /// treated as a miss, execution proceeds, and persistence is
    /// attempted normally on report.
    pub fn force_miss(
        &mut self,
        node_name: &str,
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<(), CacheError> {
        let node = self.node(node_name)?;
        if node.is_mapped() {
            return Err(CacheError::MapAxisMismatch {
                node: node_name.to_string(),
                reason: "has a map axis; use force_miss_item".to_string(),
            });
        }
        let parent_sigs = self.parent_signatures(node, None)?;
        let candidate =
            self.computer
                .compute(node_name, &node.source, direct_inputs, &parent_sigs);
        self.stats.record(node_name, Decision::Miss);
        self.pending.insert(node_name.to_string(), candidate);
        Ok(())
    }

    /// Per-item form of [`force_miss`](Self::force_miss). Returns the
    /// extracted item key for the runner's records.
    pub fn force_miss_item(
        &mut self,
        node_name: &str,
        item: &dyn Fingerprintable,
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<String, CacheError> {
        let node = self.mapped_node(node_name)?;
        let axis = node.map_axis.as_deref().unwrap_or_default();
        let ikey = item_key(item, node.item_key_attr.as_deref(), self.computer.hasher());
        let key = make_cache_key(node_name, Some(&ikey));
        let parent_sigs = self.parent_signatures(node, Some(&ikey))?;
        let mut inputs = direct_inputs.to_vec();
        inputs.push((axis, item));
        let candidate = self.computer.compute(&key, &node.source, &inputs, &parent_sigs);
        self.stats.record(&key, Decision::Miss);
        self.pending.insert(key, candidate);
        Ok(ikey)
    }

    /// Reports the output of an executed unmapped node (or of a mapped
    /// node cached as a whole batch).
    ///
    /// Persists the blob first and the signature second, so a failure
    /// between the two can never leave a signature without its blob. The
    /// node's current-run signature is registered even if persistence
    /// fails, keeping downstream `deps_hash` computation coherent while
    /// the error is surfaced.
    pub fn report_result(&mut self, node_name: &str, value: &[u8]) -> Result<(), CacheError> {
        self.finish_pending(node_name, value)
    }

    /// Reports the output of one executed item of a mapped node.
    pub fn report_item_result(
        &mut self,
        node_name: &str,
        item_key: &str,
        value: &[u8],
    ) -> Result<(), CacheError> {
        let key = make_cache_key(node_name, Some(item_key));
        self.finish_pending(&key, value)
    }

    /// Resolves a deferred value, loading its blob at most once per run.
    pub fn resolve(&mut self, value: &DeferredValue) -> Result<Arc<Vec<u8>>, CacheError> {
        self.resolve_key(&value.key)
    }

    /// Resolves the value stored under a cache key.
    ///
    /// Values produced by this run's misses are already in memory;
    /// everything else is read from the backend on first use and shared
    /// by later consumers.
    pub fn resolve_key(&mut self, key: &str) -> Result<Arc<Vec<u8>>, CacheError> {
        if let Some(value) = self.loaded.get(key) {
            return Ok(Arc::clone(value));
        }
        let data = self
            .backend
            .get_blob(key)?
            .ok_or_else(|| CacheError::MissingBlob {
                key: key.to_string(),
            })?;
        debug!(key, "loaded cached blob");
        let data = Arc::new(data);
        self.loaded.insert(key.to_string(), Arc::clone(&data));
        self.stats.record_load(key);
        Ok(data)
    }

    fn node(&self, name: &str) -> Result<&'p NodeSpec, CacheError> {
        self.pipeline.node(name).ok_or_else(|| CacheError::UnknownNode {
            name: name.to_string(),
        })
    }

    fn mapped_node(&self, name: &str) -> Result<&'p NodeSpec, CacheError> {
        let node = self.node(name)?;
        if !node.is_mapped() {
            return Err(CacheError::MapAxisMismatch {
                node: name.to_string(),
                reason: "has no map axis; use visit".to_string(),
            });
        }
        Ok(node)
    }

    fn visit_single(
        &mut self,
        node: &NodeSpec,
        key: &str,
        direct_inputs: &[(&str, &dyn Fingerprintable)],
    ) -> Result<CacheDecision, CacheError> {
        if !self.config.enabled {
            self.stats.record(key, Decision::Disabled);
            return Ok(CacheDecision::Disabled);
        }
        let parent_sigs = self.parent_signatures(node, None)?;
        let candidate = self.computer.compute(key, &node.source, direct_inputs, &parent_sigs);
        let stored = self.backend.get_signature(key)?;
        Ok(self.decide(candidate, stored))
    }

    fn decide(
        &mut self,
        candidate: NodeSignature,
        stored: Option<NodeSignature>,
    ) -> CacheDecision {
        let key = candidate.cache_key.clone();
        match stored {
            Some(stored) if stored.matches(&candidate) => {
                debug!(key = %key, "cache hit");
                self.stats.record(&key, Decision::Hit);
                self.current.insert(key.clone(), stored);
                CacheDecision::Hit(DeferredValue { key })
            }
            _ => {
                debug!(key = %key, "cache miss");
                self.stats.record(&key, Decision::Miss);
                self.pending.insert(key, candidate);
                CacheDecision::Miss
            }
        }
    }

    fn finish_pending(&mut self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        if !self.config.enabled {
            return Ok(());
        }
        let signature =
            self.pending
                .remove(key)
                .ok_or_else(|| CacheError::NoPendingExecution {
                    key: key.to_string(),
                })?;

        // Blob before signature: a crash or error in between leaves an
        // orphaned blob (harmless), never a blob-less signature.
        let persisted = self
            .backend
            .put_blob(key, value)
            .and_then(|()| self.backend.put_signature(&signature));

        self.loaded.insert(key.to_string(), Arc::new(value.to_vec()));
        self.current.insert(key.to_string(), signature);
        persisted
    }

    /// Collects the parents' current-run composite signatures in declared
    /// dependency order.
    ///
    /// For a mapped node's item, a mapped parent is aligned by item key
    /// (`parent::item`); an unmapped parent contributes its single
    /// signature to every item.
    fn parent_signatures(
        &self,
        node: &NodeSpec,
        item: Option<&str>,
    ) -> Result<Vec<ContentHash>, CacheError> {
        let mut sigs = Vec::with_capacity(node.parents.len());
        for parent in &node.parents {
            let per_item = item.map(|ikey| make_cache_key(parent, Some(ikey)));
            let sig = per_item
                .as_deref()
                .and_then(|key| self.current.get(key))
                .or_else(|| self.current.get(parent.as_str()))
                .ok_or_else(|| CacheError::ParentNotVisited {
                    node: node.name.clone(),
                    parent: parent.clone(),
                })?;
            sigs.push(sig.composite_hash);
        }
        Ok(sigs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DiskBackend, MemoryBackend};
    use crate::pipeline::NodeSpec;
    use crate::value::instance_identity;
    use std::path::PathBuf;

    fn enabled_config() -> CacheConfig {
        CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        }
    }

    /// DAG from the acceptance scenario: a -> foo -> bar(foo_out, c).
    fn chain_pipeline() -> PipelineSpec {
        PipelineSpec::new(vec![
            NodeSpec::new("foo", "fn foo(a) { a + 1 }"),
            NodeSpec::new("bar", "fn bar(foo_out, c) { foo_out * c }").with_parents(["foo"]),
        ])
        .unwrap()
    }

    fn mapped_pipeline() -> PipelineSpec {
        PipelineSpec::new(vec![NodeSpec::new("score", "fn score(query) { .. }")
            .mapped("query")
            .with_item_key_attr("uuid")])
        .unwrap()
    }

    struct Query {
        uuid: String,
        text: String,
    }

    impl Query {
        fn new(uuid: &str, text: &str) -> Self {
            Self {
                uuid: uuid.to_string(),
                text: text.to_string(),
            }
        }
    }

    impl Fingerprintable for Query {
        fn view(&self) -> ValueView {
            ValueView::record(
                "Query",
                instance_identity(self),
                vec![
                    ("uuid".to_string(), ValueView::Str(self.uuid.clone())),
                    ("text".to_string(), ValueView::Str(self.text.clone())),
                ],
            )
        }
    }

    /// Runs the three-run acceptance scenario and returns the decisions
    /// as (foo, bar) pairs per run, `true` meaning hit.
    fn run_scenario<B: CacheBackend>(backend: B) -> Vec<(bool, bool)> {
        let pipeline = chain_pipeline();
        let mut coord = CacheCoordinator::new(&pipeline, backend, enabled_config());
        let runs: [(i64, i64); 3] = [(1, 1), (1, 2), (2, 2)];
        let mut outcomes = Vec::new();

        for (a, c) in runs {
            coord.begin_run();
            let foo = coord.visit("foo", &[("a", &a)]).unwrap();
            if !foo.is_hit() {
                coord.report_result("foo", format!("{}", a + 1).as_bytes()).unwrap();
            }
            let bar = coord.visit("bar", &[("c", &c)]).unwrap();
            if !bar.is_hit() {
                coord.report_result("bar", b"bar output").unwrap();
            }
            outcomes.push((foo.is_hit(), bar.is_hit()));
            coord.end_run();
        }
        outcomes
    }

    #[test]
    fn scenario_downstream_invalidation() {
        let outcomes = run_scenario(MemoryBackend::new());
        // run1: everything executes.
        assert_eq!(outcomes[0], (false, false));
        // run2: only c changed, so foo hits and bar misses.
        assert_eq!(outcomes[1], (true, false));
        // run3: a changed; foo misses, and bar misses too even though c
        // is unchanged, because foo's new signature changes bar's deps.
        assert_eq!(outcomes[2], (false, false));
    }

    #[test]
    fn backend_parity_memory_vs_disk() {
        let dir = tempfile::tempdir().unwrap();
        let memory = run_scenario(MemoryBackend::new());
        let disk = run_scenario(DiskBackend::open(dir.path()).unwrap());
        assert_eq!(memory, disk);
    }

    #[test]
    fn signatures_survive_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = chain_pipeline();
        {
            let backend = DiskBackend::open(dir.path()).unwrap();
            let mut coord = CacheCoordinator::new(&pipeline, backend, enabled_config());
            coord.begin_run();
            assert!(!coord.visit("foo", &[("a", &1i64)]).unwrap().is_hit());
            coord.report_result("foo", b"2").unwrap();
            assert!(!coord.visit("bar", &[("c", &1i64)]).unwrap().is_hit());
            coord.report_result("bar", b"2").unwrap();
        }
        // Fresh backend over the same directory: same inputs, all hits.
        let backend = DiskBackend::open(dir.path()).unwrap();
        let mut coord = CacheCoordinator::new(&pipeline, backend, enabled_config());
        coord.begin_run();
        assert!(coord.visit("foo", &[("a", &1i64)]).unwrap().is_hit());
        assert!(coord.visit("bar", &[("c", &1i64)]).unwrap().is_hit());
    }

    #[test]
    fn hits_defer_blob_loads() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());

        coord.begin_run();
        coord.visit("foo", &[("a", &1i64)]).unwrap();
        coord.report_result("foo", b"2").unwrap();
        coord.visit("bar", &[("c", &1i64)]).unwrap();
        coord.report_result("bar", b"2").unwrap();
        coord.end_run();

        coord.begin_run();
        let foo = coord.visit("foo", &[("a", &1i64)]).unwrap();
        let bar = coord.visit("bar", &[("c", &1i64)]).unwrap();
        assert!(foo.is_hit() && bar.is_hit());

        // Only the terminal value is consumed; foo's blob stays cold.
        let CacheDecision::Hit(handle) = bar else { panic!() };
        assert_eq!(*coord.resolve(&handle).unwrap(), b"2".to_vec());
        let stats = coord.end_run();
        assert_eq!(stats.loads(), 1);
        let foo_event = stats
            .events()
            .iter()
            .find(|e| e.cache_key == "foo")
            .unwrap();
        assert!(!foo_event.loaded);
    }

    #[test]
    fn resolve_is_shared_within_a_run() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        coord.visit("foo", &[("a", &1i64)]).unwrap();
        coord.report_result("foo", b"2").unwrap();
        coord.end_run();

        coord.begin_run();
        let decision = coord.visit("foo", &[("a", &1i64)]).unwrap();
        let CacheDecision::Hit(handle) = decision else { panic!() };
        let first = coord.resolve(&handle).unwrap();
        let second = coord.resolve(&handle).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(coord.stats().loads(), 1);
    }

    #[test]
    fn miss_output_resolves_without_backend_read() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        coord.visit("foo", &[("a", &1i64)]).unwrap();
        coord.report_result("foo", b"fresh").unwrap();
        assert_eq!(*coord.resolve_key("foo").unwrap(), b"fresh".to_vec());
        // Fresh outputs are in hand, not loaded from storage.
        assert_eq!(coord.stats().loads(), 0);
    }

    #[test]
    fn per_item_isolation() {
        let pipeline = mapped_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());

        let q1 = Query::new("q1", "first query");
        let q2 = Query::new("q2", "second query");

        coord.begin_run();
        let decisions = coord
            .visit_mapped("score", &[&q1, &q2], &[("top_k", &10i64)])
            .unwrap();
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].0, "q1");
        for (ikey, decision) in &decisions {
            assert!(!decision.is_hit());
            coord.report_item_result("score", ikey, b"scored").unwrap();
        }
        coord.end_run();

        // Unchanged items hit.
        coord.begin_run();
        let decisions = coord
            .visit_mapped("score", &[&q1, &q2], &[("top_k", &10i64)])
            .unwrap();
        assert!(decisions.iter().all(|(_, d)| d.is_hit()));
        coord.end_run();

        // Mutating one item's content invalidates only that item.
        let q2_edited = Query::new("q2", "second query, edited");
        coord.begin_run();
        let decisions = coord
            .visit_mapped("score", &[&q1, &q2_edited], &[("top_k", &10i64)])
            .unwrap();
        assert!(decisions[0].1.is_hit());
        assert!(!decisions[1].1.is_hit());
    }

    #[test]
    fn mapped_parent_aligned_by_item_key() {
        let pipeline = PipelineSpec::new(vec![
            NodeSpec::new("fetch", "fn fetch(query) { .. }")
                .mapped("query")
                .with_item_key_attr("uuid"),
            NodeSpec::new("rank", "fn rank(fetched) { .. }")
                .mapped("fetched")
                .with_parents(["fetch"]),
        ])
        .unwrap();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());

        let run = |coord: &mut CacheCoordinator<MemoryBackend>, q1: &Query, q2: &Query| {
            coord.begin_run();
            let fetch = coord.visit_mapped("fetch", &[q1, q2], &[]).unwrap();
            for (ikey, decision) in &fetch {
                if !decision.is_hit() {
                    coord.report_item_result("fetch", ikey, b"fetched").unwrap();
                }
            }
            let rank = coord.visit_mapped_keys("rank", &["q1", "q2"], &[]).unwrap();
            let hits: Vec<bool> = rank.iter().map(|(_, d)| d.is_hit()).collect();
            for (ikey, decision) in &rank {
                if !decision.is_hit() {
                    coord.report_item_result("rank", ikey, b"ranked").unwrap();
                }
            }
            coord.end_run();
            (
                fetch.iter().map(|(_, d)| d.is_hit()).collect::<Vec<_>>(),
                hits,
            )
        };

        let q1 = Query::new("q1", "alpha");
        let q2 = Query::new("q2", "beta");
        let (fetch_hits, rank_hits) = run(&mut coord, &q1, &q2);
        assert_eq!(fetch_hits, vec![false, false]);
        assert_eq!(rank_hits, vec![false, false]);

        let (fetch_hits, rank_hits) = run(&mut coord, &q1, &q2);
        assert_eq!(fetch_hits, vec![true, true]);
        assert_eq!(rank_hits, vec![true, true]);

        // Editing q1 invalidates fetch::q1, which invalidates rank::q1
        // through its deps; q2 stays hit in both nodes.
        let q1_edited = Query::new("q1", "alpha edited");
        let (fetch_hits, rank_hits) = run(&mut coord, &q1_edited, &q2);
        assert_eq!(fetch_hits, vec![false, true]);
        assert_eq!(rank_hits, vec![false, true]);
    }

    #[test]
    fn unmapped_parent_shared_across_items() {
        let pipeline = PipelineSpec::new(vec![
            NodeSpec::new("index", "fn index(corpus) { .. }"),
            NodeSpec::new("score", "fn score(query, index_out) { .. }")
                .mapped("query")
                .with_item_key_attr("uuid")
                .with_parents(["index"]),
        ])
        .unwrap();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        let q1 = Query::new("q1", "alpha");
        let q2 = Query::new("q2", "beta");

        let run = |coord: &mut CacheCoordinator<MemoryBackend>,
                   corpus: i64,
                   q1: &Query,
                   q2: &Query| {
            coord.begin_run();
            let index = coord.visit("index", &[("corpus", &corpus)]).unwrap();
            if !index.is_hit() {
                coord.report_result("index", b"index").unwrap();
            }
            let score = coord.visit_mapped("score", &[q1, q2], &[]).unwrap();
            let hits: Vec<bool> = score.iter().map(|(_, d)| d.is_hit()).collect();
            for (ikey, decision) in &score {
                if !decision.is_hit() {
                    coord.report_item_result("score", ikey, b"scored").unwrap();
                }
            }
            coord.end_run();
            hits
        };

        assert_eq!(run(&mut coord, 1, &q1, &q2), vec![false, false]);
        assert_eq!(run(&mut coord, 1, &q1, &q2), vec![true, true]);
        // Changing the shared parent's input invalidates every item.
        assert_eq!(run(&mut coord, 2, &q1, &q2), vec![false, false]);
    }

    #[test]
    fn whole_batch_caching_when_per_item_off() {
        let pipeline = mapped_pipeline();
        let config = CacheConfig {
            enabled: true,
            per_item_caching: false,
            ..CacheConfig::default()
        };
        let mut coord = CacheCoordinator::new(&pipeline, MemoryBackend::new(), config);
        let q1 = Query::new("q1", "alpha");
        let q2 = Query::new("q2", "beta");

        coord.begin_run();
        let decisions = coord.visit_mapped("score", &[&q1, &q2], &[]).unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0, "score");
        assert!(!decisions[0].1.is_hit());
        coord.report_result("score", b"batch output").unwrap();
        coord.end_run();

        coord.begin_run();
        let decisions = coord.visit_mapped("score", &[&q1, &q2], &[]).unwrap();
        assert!(decisions[0].1.is_hit());
        coord.end_run();

        // One edited item invalidates the whole batch entry.
        let q2_edited = Query::new("q2", "beta edited");
        coord.begin_run();
        let decisions = coord.visit_mapped("score", &[&q1, &q2_edited], &[]).unwrap();
        assert!(!decisions[0].1.is_hit());
    }

    #[test]
    fn disabled_config_skips_storage() {
        let pipeline = chain_pipeline();
        let mut coord = CacheCoordinator::new(
            &pipeline,
            MemoryBackend::new(),
            CacheConfig::default(),
        );
        coord.begin_run();
        assert!(matches!(
            coord.visit("foo", &[("a", &1i64)]).unwrap(),
            CacheDecision::Disabled
        ));
        // Reporting is a no-op when disabled.
        coord.report_result("foo", b"ignored").unwrap();
        assert!(coord
            .backend
            .get_signature("foo")
            .unwrap()
            .is_none());
        let stats = coord.end_run();
        assert_eq!(stats.hits() + stats.misses(), 0);
    }

    #[test]
    fn visit_unknown_node_errors() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let err = coord.visit("ghost", &[]).unwrap_err();
        assert!(matches!(err, CacheError::UnknownNode { .. }));
    }

    #[test]
    fn visit_mapped_on_unmapped_node_errors() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let err = coord.visit_mapped("foo", &[], &[]).unwrap_err();
        assert!(matches!(err, CacheError::MapAxisMismatch { .. }));
    }

    #[test]
    fn child_before_parent_errors() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let err = coord.visit("bar", &[("c", &1i64)]).unwrap_err();
        assert!(matches!(err, CacheError::ParentNotVisited { .. }));
    }

    #[test]
    fn report_without_pending_errors() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let err = coord.report_result("foo", b"x").unwrap_err();
        assert!(matches!(err, CacheError::NoPendingExecution { .. }));
    }

    #[test]
    fn resolve_unknown_key_errors() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let err = coord.resolve_key("never-stored").unwrap_err();
        assert!(matches!(err, CacheError::MissingBlob { .. }));
    }

    #[test]
    fn clear_forgets_everything() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        coord.visit("foo", &[("a", &1i64)]).unwrap();
        coord.report_result("foo", b"2").unwrap();
        coord.clear().unwrap();

        coord.begin_run();
        assert!(!coord.visit("foo", &[("a", &1i64)]).unwrap().is_hit());
    }

    /// Backend whose every operation fails, for the degradation path.
    struct BrokenBackend;

    impl BrokenBackend {
        fn error() -> CacheError {
            CacheError::Io {
                path: PathBuf::from("/broken"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
            }
        }
    }

    impl CacheBackend for BrokenBackend {
        fn get_signature(&self, _key: &str) -> Result<Option<NodeSignature>, CacheError> {
            Err(Self::error())
        }
        fn put_signature(&mut self, _signature: &NodeSignature) -> Result<(), CacheError> {
            Err(Self::error())
        }
        fn get_blob(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(Self::error())
        }
        fn put_blob(&mut self, _key: &str, _data: &[u8]) -> Result<(), CacheError> {
            Err(Self::error())
        }
        fn clear(&mut self) -> Result<(), CacheError> {
            Err(Self::error())
        }
    }

    #[test]
    fn storage_failure_surfaces_and_degrades_to_miss() {
        let pipeline = chain_pipeline();
        let mut coord = CacheCoordinator::new(&pipeline, BrokenBackend, enabled_config());
        coord.begin_run();

        // Unavailable storage is an error, not a silent miss.
        let err = coord.visit("foo", &[("a", &1i64)]).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));

        // The caller opts into degradation; execution proceeds.
        coord.force_miss("foo", &[("a", &1i64)]).unwrap();
        // Persistence fails, but the run state stays coherent.
        assert!(coord.report_result("foo", b"2").is_err());
        assert!(coord.current_signature("foo").is_some());
        assert_eq!(*coord.resolve_key("foo").unwrap(), b"2".to_vec());

        // Downstream nodes can keep degrading against the same run state.
        assert!(coord.visit("bar", &[("c", &1i64)]).is_err());
        coord.force_miss("bar", &[("c", &1i64)]).unwrap();
        assert!(coord.report_result("bar", b"2").is_err());
        assert!(coord.current_signature("bar").is_some());
    }

    #[test]
    fn force_miss_item_registers_pending() {
        let pipeline = mapped_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        let q1 = Query::new("q1", "alpha");
        let ikey = coord.force_miss_item("score", &q1, &[]).unwrap();
        assert_eq!(ikey, "q1");
        coord.report_item_result("score", &ikey, b"scored").unwrap();
        assert!(coord.current_signature("score::q1").is_some());
    }

    #[test]
    fn verbose_summary_reflects_run() {
        let pipeline = chain_pipeline();
        let mut coord =
            CacheCoordinator::new(&pipeline, MemoryBackend::new(), enabled_config());
        coord.begin_run();
        coord.visit("foo", &[("a", &1i64)]).unwrap();
        coord.report_result("foo", b"2").unwrap();
        coord.visit("bar", &[("c", &1i64)]).unwrap();
        coord.report_result("bar", b"2").unwrap();
        let stats = coord.end_run();
        assert_eq!(stats.summary(), "foo: MISS | bar: MISS");
    }
}
