//! The memory graph engine
//!
//! [`MemoryGraph`] wires the store and the scoring, clustering, pattern,
//! pruning, translation and context subsystems together behind one handle.
//! Ingestion scores new nodes and re-clusters; queries flow through a
//! result cache; periodic maintenance runs every engine under one lock so
//! at most one cycle is in flight.
//!
//! Query entry points never error across the boundary: failures come back
//! as a [`QueryOutcome`] with `success == false` and a message.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::clustering::{ClusterReport, ClusteringEngine};
use crate::config::GraphConfig;
use crate::constants::CONTEXT_SUPPLEMENT_LIMIT;
use crate::context::{ContextWindowManager, Interaction, WindowDecayReport};
use crate::errors::{GraphError, Result};
use crate::graph::query::{Query, QueryContext, QueryTarget};
use crate::graph::snapshot::{build_snapshot, restore_snapshot, ImportReport, Snapshot};
use crate::graph::types::{Edge, EdgeId, InteractionKind, Node, NodeId, StoreStats};
use crate::graph::{BatchOp, GraphStore};
use crate::ingest::{Event, IngestReport, Ingestor};
use crate::patterns::{PatternDetector, PatternReport};
use crate::pruning::{PruneReport, PruningEngine};
use crate::relevance::{RecomputeReport, RelevanceEngine};
use crate::translate::TranslationEngine;

/// Result object returned by every query entry point
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutcome {
    pub success: bool,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Failure description when `success` is false
    pub message: Option<String>,
    /// The structured query that ran, when the caller sent natural language
    pub translated: Option<Query>,
    /// Session-context items related to the query but not in the results
    pub context_nodes: Vec<Node>,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// What one maintenance cycle did, phase by phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub recompute: RecomputeReport,
    pub clustering: ClusterReport,
    pub patterns: PatternReport,
    pub pruning: PruneReport,
    pub context: WindowDecayReport,
    pub stats: StoreStats,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

struct CachedResult {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    stored_at: Instant,
}

pub struct MemoryGraph {
    config: GraphConfig,
    store: GraphStore,
    relevance: RelevanceEngine,
    clustering: ClusteringEngine,
    patterns: PatternDetector,
    pruning: PruningEngine,
    context: ContextWindowManager,
    translator: TranslationEngine,
    ingestor: Ingestor,
    /// SHA256(serialized query) -> results. Stable across restarts is not
    /// needed here, but the stable hash avoids collision surprises.
    query_cache: DashMap<[u8; 32], CachedResult>,
    /// At most one maintenance cycle runs at a time
    maintenance_lock: Mutex<()>,
}

impl MemoryGraph {
    pub fn open(config: GraphConfig) -> Result<Self> {
        let store = GraphStore::open(&config.store)?;
        let relevance = RelevanceEngine::new(config.scoring.clone());
        let clustering = ClusteringEngine::new(config.clustering.clone());

        Ok(Self {
            relevance,
            clustering,
            patterns: PatternDetector::new(),
            pruning: PruningEngine::new(config.pruning.clone()),
            context: ContextWindowManager::new(config.context.clone()),
            translator: TranslationEngine::new(),
            ingestor: Ingestor::new(),
            query_cache: DashMap::new(),
            maintenance_lock: Mutex::new(()),
            store,
            config,
        })
    }

    /// Direct store access for callers that need it (exports, tooling).
    /// Writes made here bypass the query cache; the TTL bounds staleness.
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn context(&self) -> &ContextWindowManager {
        &self.context
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    // =========================================================================
    // INGESTION
    // =========================================================================

    /// Ingest a batch of events: create nodes and edges, score the new
    /// nodes, and re-cluster the timeline
    pub fn process_events(&self, events: &[Event]) -> Result<IngestReport> {
        let report = self.ingestor.process(&self.store, events)?;
        if report.nodes_created == 0 {
            return Ok(report);
        }

        self.score_new_nodes(&report.node_ids);

        // Fresh activity shifts the temporal picture
        let token = CancelToken::new();
        if let Err(e) = self.clustering.run(&self.store, &token) {
            tracing::warn!("re-clustering after ingest failed: {e}");
        }

        self.query_cache.clear();
        Ok(report)
    }

    /// First scoring pass over just-created nodes. The blend is half the
    /// strategy's seed (what the source says about itself) and half the
    /// engine's factors (what the graph sees right now); maintenance
    /// recomputes purely from factors afterwards.
    fn score_new_nodes(&self, ids: &[NodeId]) {
        let now = Utc::now();
        let mut ops = Vec::new();
        for id in ids {
            match self.store.try_get_node(*id) {
                Ok(Some(mut node)) => {
                    let (computed, _) = self.relevance.score(&node, now);
                    let seed = node.relevance_score;
                    node.set_relevance(0.5 * seed + 0.5 * computed);
                    ops.push(BatchOp::UpdateNode(node));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(node_id = %id, "scoring new node failed: {e}"),
            }
        }
        if ops.is_empty() {
            return;
        }
        if let Err(e) = self.store.apply_batch(ops) {
            tracing::warn!("persisting ingest scores failed: {e}");
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Run a structured query. Never errors: failures come back in the
    /// outcome with `success == false`.
    pub fn execute(&self, query: Query) -> QueryOutcome {
        let start = Instant::now();
        let ttl = Duration::from_secs(self.config.query_cache_ttl_secs);
        let key = cache_key(&query);

        if let Some(key) = key {
            let mut expired = false;
            if let Some(entry) = self.query_cache.get(&key) {
                if !ttl.is_zero() && entry.stored_at.elapsed() < ttl {
                    tracing::debug!("query cache hit");
                    return QueryOutcome {
                        success: true,
                        nodes: entry.nodes.clone(),
                        edges: entry.edges.clone(),
                        from_cache: true,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        ..Default::default()
                    };
                }
                expired = true;
            }
            if expired {
                self.query_cache.remove(&key);
            }
        }

        let result = match query.target {
            QueryTarget::Nodes => self
                .store
                .query_nodes(&query)
                .map(|nodes| (nodes, Vec::new())),
            QueryTarget::Edges => self
                .store
                .query_edges(&query)
                .map(|edges| (Vec::new(), edges)),
        };

        match result {
            Ok((nodes, edges)) => {
                if let Some(key) = key {
                    if !ttl.is_zero() {
                        self.query_cache.insert(
                            key,
                            CachedResult {
                                nodes: nodes.clone(),
                                edges: edges.clone(),
                                stored_at: Instant::now(),
                            },
                        );
                    }
                }
                QueryOutcome {
                    success: true,
                    nodes,
                    edges,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                }
            }
            Err(e) => {
                tracing::warn!("query failed: {}", e.message());
                QueryOutcome {
                    success: false,
                    message: Some(e.message()),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                }
            }
        }
    }

    /// Run a natural-language query for a session. The text is translated,
    /// executed, and folded into the session's context window; the outcome
    /// carries the translated query and supplemental context items.
    pub fn query_text(&self, text: &str, session_id: &str) -> QueryOutcome {
        let context = QueryContext {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        };
        let query = self.translator.translate(text, context);
        let mut outcome = self.execute(query.clone());
        outcome.translated = Some(query);

        let result_nodes: Vec<NodeId> = outcome.nodes.iter().map(|n| n.id).collect();
        self.context.record_interaction(
            &self.store,
            session_id,
            Interaction::Query {
                text: text.to_string(),
                result_nodes,
            },
        );

        match self
            .context
            .relevant_context(&self.store, session_id, text, CONTEXT_SUPPLEMENT_LIMIT)
        {
            Ok(extra) => {
                outcome.context_nodes = extra
                    .into_iter()
                    .filter(|n| !outcome.nodes.iter().any(|r| r.id == n.id))
                    .collect();
            }
            Err(e) => tracing::warn!(session_id, "context supplement failed: {e}"),
        }
        outcome
    }

    /// Ranked autocomplete hints for a partial query; executes nothing
    pub fn suggest(&self, partial: &str, limit: usize) -> Vec<String> {
        self.translator.suggest(partial, limit)
    }

    // =========================================================================
    // INTERACTIONS
    // =========================================================================

    /// A node was read: bump its access state and the session window
    pub fn record_node_access(
        &self,
        session_id: &str,
        id: NodeId,
        kind: InteractionKind,
    ) -> Result<()> {
        let mut node = self.store.get_node(id)?;
        self.relevance
            .record_interaction(&mut node, kind, Utc::now());
        self.store.update_node(&node)?;
        self.context
            .record_interaction(&self.store, session_id, Interaction::NodeAccess(id));
        Ok(())
    }

    /// An edge was traversed: strengthen it and note it in the window
    pub fn record_edge_interaction(&self, session_id: &str, id: EdgeId) -> Result<()> {
        let mut edge = self.store.get_edge(id)?;
        edge.record_interaction();
        self.store.update_edge(&edge)?;
        self.context
            .record_interaction(&self.store, session_id, Interaction::EdgeInteraction(id));
        Ok(())
    }

    pub fn end_session(&self, session_id: &str) -> bool {
        self.context.end_session(session_id)
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    pub fn perform_maintenance(&self) -> Result<MaintenanceReport> {
        self.perform_maintenance_with(&CancelToken::new())
    }

    /// One maintenance cycle: rescore, re-cluster, refresh patterns, prune,
    /// decay session windows. Phases commit independently; a failed phase
    /// is logged and the cycle moves on. Returns `MaintenanceContention`
    /// when a cycle is already running — callers retry next tick.
    pub fn perform_maintenance_with(&self, token: &CancelToken) -> Result<MaintenanceReport> {
        let Some(_guard) = self.maintenance_lock.try_lock() else {
            tracing::debug!("maintenance already in progress, skipping");
            return Err(GraphError::MaintenanceContention);
        };

        let start = Instant::now();
        let mut report = MaintenanceReport::default();

        match self.relevance.recompute_all(&self.store, token) {
            Ok(r) => report.recompute = r,
            Err(e) => tracing::warn!("relevance recompute failed: {e}"),
        }

        if !token.is_cancelled() {
            match self.clustering.run(&self.store, token) {
                Ok(r) => report.clustering = r,
                Err(e) => tracing::warn!("clustering failed: {e}"),
            }
        }

        if !token.is_cancelled() {
            match self.patterns.refresh(&self.store, token) {
                Ok(r) => report.patterns = r,
                Err(e) => tracing::warn!("pattern refresh failed: {e}"),
            }
        }

        if !token.is_cancelled() {
            match self.pruning.run(&self.store, token) {
                Ok(r) => report.pruning = r,
                Err(e) => tracing::warn!("pruning failed: {e}"),
            }
        }

        report.context = self.context.decay_windows();
        report.stats = self.store.stats();
        report.cancelled = token.is_cancelled();
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        // Scores and membership moved under the cache's feet
        self.query_cache.clear();

        tracing::info!(
            rescored = report.recompute.nodes_scored,
            clusters = report.clustering.clusters_found,
            patterns = report.patterns.replaced,
            pruned = report.pruning.nodes_pruned,
            windows_dropped = report.context.sessions_dropped,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed_ms,
            "maintenance cycle finished"
        );
        Ok(report)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Serialize the whole graph to a portable snapshot
    pub fn export(&self) -> Result<Snapshot> {
        build_snapshot(&self.store)
    }

    /// Load a snapshot; the target store must be empty
    pub fn import(&self, snapshot: &Snapshot) -> Result<ImportReport> {
        let report = restore_snapshot(&self.store, snapshot)?;
        self.query_cache.clear();
        Ok(report)
    }

    #[cfg(test)]
    fn hold_maintenance_lock(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.maintenance_lock.lock()
    }
}

/// Stable cache key for a query; `None` when the query cannot serialize
fn cache_key(query: &Query) -> Option<[u8; 32]> {
    let bytes = serde_json::to_vec(query).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn open_engine() -> (TempDir, MemoryGraph) {
        let dir = TempDir::new().unwrap();
        let config = GraphConfig::at_path(dir.path());
        let engine = MemoryGraph::open(config).unwrap();
        (dir, engine)
    }

    fn note_event(id: &str, text: &str, ts: chrono::DateTime<Utc>) -> Event {
        Event {
            id: id.to_string(),
            category: "note".to_string(),
            timestamp: ts,
            source: "test".to_string(),
            metadata: match serde_json::json!({ "text": text }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            },
        }
    }

    #[test]
    fn test_process_events_scores_and_clusters() {
        let (_dir, engine) = open_engine();
        let base = Utc::now() - ChronoDuration::minutes(20);
        let events: Vec<Event> = (0..5)
            .map(|i| {
                note_event(
                    &format!("e{i}"),
                    &format!("working session entry {i}"),
                    base + ChronoDuration::minutes(i),
                )
            })
            .collect();

        let report = engine.process_events(&events).unwrap();
        assert_eq!(report.nodes_created, 5);
        // Consecutive minutes share a session
        assert_eq!(report.edges_created, 4);

        for id in &report.node_ids {
            let node = engine.store().get_node(*id).unwrap();
            assert!(node.relevance_score > 0.0 && node.relevance_score <= 1.0);
        }
        // Five events a minute apart form at least one temporal cluster
        assert!(!engine.store().clusters().unwrap().is_empty());
    }

    #[test]
    fn test_execute_returns_matches() {
        let (_dir, engine) = open_engine();
        let events = vec![note_event("e1", "database migration plan", Utc::now())];
        engine.process_events(&events).unwrap();

        let outcome = engine.execute(Query::recent_default());
        assert!(outcome.success);
        assert_eq!(outcome.nodes.len(), 1);
        assert!(outcome.message.is_none());
    }

    #[test]
    fn test_query_cache_hits_until_invalidated() {
        let (_dir, engine) = open_engine();
        engine
            .process_events(&[note_event("e1", "cache me", Utc::now())])
            .unwrap();

        let query = Query::recent_default();
        let first = engine.execute(query.clone());
        assert!(!first.from_cache);
        let second = engine.execute(query.clone());
        assert!(second.from_cache);
        assert_eq!(second.nodes.len(), first.nodes.len());

        // Ingestion invalidates
        engine
            .process_events(&[note_event("e2", "newer", Utc::now())])
            .unwrap();
        let third = engine.execute(query);
        assert!(!third.from_cache);
        assert_eq!(third.nodes.len(), 2);
    }

    #[test]
    fn test_query_text_translates_and_updates_session() {
        let (_dir, engine) = open_engine();
        engine
            .process_events(&[note_event("e1", "quarterly planning notes", Utc::now())])
            .unwrap();

        let outcome = engine.query_text("show me recent activities", "s1");
        assert!(outcome.success);
        let translated = outcome.translated.as_ref().unwrap();
        assert_eq!(translated.limit, 20);
        assert!(!outcome.nodes.is_empty());

        let window = engine.context().snapshot("s1").unwrap();
        assert_eq!(window.query_history, vec!["show me recent activities"]);
    }

    #[test]
    fn test_malformed_filter_degrades_not_errors() {
        let (_dir, engine) = open_engine();
        engine
            .process_events(&[note_event("e1", "still reachable", Utc::now())])
            .unwrap();
        // An uncompilable regex is a pass-through filter, not a failure
        let query = Query {
            filters: vec![crate::graph::query::Filter::new(
                "content",
                crate::graph::query::FilterOp::Regex,
                serde_json::json!("(unclosed"),
            )],
            ..Default::default()
        };
        let outcome = engine.execute(query);
        assert!(outcome.success);
        assert_eq!(outcome.nodes.len(), 1);
        assert!(outcome.message.is_none());
    }

    #[test]
    fn test_record_access_bumps_node_and_window() {
        let (_dir, engine) = open_engine();
        let report = engine
            .process_events(&[note_event("e1", "access me", Utc::now())])
            .unwrap();
        let id = report.node_ids[0];

        engine
            .record_node_access("s1", id, InteractionKind::View)
            .unwrap();

        let node = engine.store().get_node(id).unwrap();
        assert_eq!(node.access_count, 1);
        let window = engine.context().snapshot("s1").unwrap();
        assert_eq!(window.recent_nodes[0], id);
    }

    #[test]
    fn test_maintenance_contention_skips() {
        let (_dir, engine) = open_engine();
        let _held = engine.hold_maintenance_lock();
        match engine.perform_maintenance() {
            Err(GraphError::MaintenanceContention) => {}
            other => panic!("expected contention, got {other:?}"),
        }
    }

    #[test]
    fn test_maintenance_cycle_reports_phases() {
        let (_dir, engine) = open_engine();
        let base = Utc::now() - ChronoDuration::minutes(30);
        let events: Vec<Event> = (0..4)
            .map(|i| {
                note_event(
                    &format!("e{i}"),
                    &format!("entry {i}"),
                    base + ChronoDuration::minutes(i * 2),
                )
            })
            .collect();
        engine.process_events(&events).unwrap();

        let report = engine.perform_maintenance().unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.recompute.nodes_scored, 4);
        assert_eq!(report.stats.node_count, 4);
    }

    #[test]
    fn test_cancelled_maintenance_reports_cancelled() {
        let (_dir, engine) = open_engine();
        engine
            .process_events(&[note_event("e1", "x", Utc::now())])
            .unwrap();
        let token = CancelToken::new();
        token.cancel();
        let report = engine.perform_maintenance_with(&token).unwrap();
        assert!(report.cancelled);
    }

    #[test]
    fn test_export_import_round_trip() {
        let (_dir, engine) = open_engine();
        let base = Utc::now() - ChronoDuration::minutes(10);
        engine
            .process_events(&[
                note_event("e1", "first", base),
                note_event("e2", "second", base + ChronoDuration::minutes(1)),
            ])
            .unwrap();

        let snapshot = engine.export().unwrap();

        let (_dir2, fresh) = open_engine();
        let report = fresh.import(&snapshot).unwrap();
        assert_eq!(report.nodes_imported, 2);

        let original = engine.store().stats();
        let restored = fresh.store().stats();
        assert_eq!(original.node_count, restored.node_count);
        assert_eq!(original.edge_count, restored.edge_count);
    }

    #[test]
    fn test_suggest_passthrough() {
        let (_dir, engine) = open_engine();
        let hints = engine.suggest("show", 3);
        assert!(!hints.is_empty());
        assert!(hints.len() <= 3);
    }
}
