//! Graph pruning and garbage collection
//!
//! The pruner works in four phases, each committed separately:
//!
//! 1. **nodes** — active nodes below the relevance threshold are soft-pruned
//!    (flag set, score zeroed, edges deactivated) unless an importance guard
//!    protects them
//! 2. **edges** — active edges whose decayed strength fell below the
//!    threshold are deactivated unless protected
//! 3. **derived** — clusters and patterns below their quality thresholds or
//!    past max age are deleted outright
//! 4. **gc sweep** — orphaned tag index entries, embeddings of long-pruned
//!    nodes, and audit rows past retention
//!
//! Soft-pruned rows stay in the store so history and audit references keep
//! resolving; only derived entities and index garbage are truly deleted.
//! Running the pruner twice with no new writes removes nothing on the
//! second pass.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::config::PruningConfig;
use crate::constants::{ESTIMATED_BYTES_PER_EDGE, ESTIMATED_BYTES_PER_NODE};
use crate::errors::Result;
use crate::graph::types::{AuditAction, Edge, Node, NodeId};
use crate::graph::{BatchOp, GraphStore};

/// What a pruning run removed. Byte figures come from fixed per-entity
/// estimates and are advisory only.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PruneReport {
    pub nodes_pruned: usize,
    pub edges_deactivated: usize,
    pub clusters_removed: usize,
    pub patterns_removed: usize,
    pub tags_collected: usize,
    pub audit_trimmed: usize,
    pub embeddings_shed: usize,
    pub estimated_bytes_freed: usize,
    /// Rate limiter declined the run; nothing was touched
    pub skipped: bool,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl PruneReport {
    pub fn total_removed(&self) -> usize {
        self.nodes_pruned + self.edges_deactivated + self.clusters_removed + self.patterns_removed
    }
}

/// Importance facts computed once per run and shared by the guards
struct GraphProfile {
    max_degree: u32,
    community_sizes: HashMap<String, usize>,
    /// Nodes protected by a structural guard (hubs, dense communities).
    /// Recency-based grace is evaluated per node, not here.
    important: HashSet<NodeId>,
}

pub struct PruningEngine {
    config: PruningConfig,
    last_run: Mutex<Option<Instant>>,
}

impl PruningEngine {
    pub fn new(config: PruningConfig) -> Self {
        Self {
            config,
            last_run: Mutex::new(None),
        }
    }

    /// Rate-limited run; a no-op (skipped report) when called again within
    /// the configured minimum interval
    pub fn run(&self, store: &GraphStore, token: &CancelToken) -> Result<PruneReport> {
        {
            let last = self.last_run.lock();
            if let Some(at) = *last {
                if at.elapsed().as_secs() < self.config.min_interval_secs {
                    tracing::debug!(
                        "Pruning skipped: last run {}s ago, interval {}s",
                        at.elapsed().as_secs(),
                        self.config.min_interval_secs
                    );
                    return Ok(PruneReport {
                        skipped: true,
                        ..Default::default()
                    });
                }
            }
        }
        self.force(store, token)
    }

    /// Run regardless of the rate limiter
    pub fn force(&self, store: &GraphStore, token: &CancelToken) -> Result<PruneReport> {
        *self.last_run.lock() = Some(Instant::now());
        let start = Instant::now();
        let now = Utc::now();
        let mut report = PruneReport::default();

        // Phase 1: nodes
        let profile = self.profile_graph(store)?;
        let batch_report = self.prune_nodes(store, now, &profile)?;
        report.nodes_pruned = batch_report.0;
        report.edges_deactivated = batch_report.1;
        if token.is_cancelled() {
            return Ok(self.finish(report, start, true));
        }

        // Phase 2: weak edges not already deactivated by a node cascade
        report.edges_deactivated += self.prune_edges(store, now, &profile)?;
        if token.is_cancelled() {
            return Ok(self.finish(report, start, true));
        }

        // Phase 3: derived entities
        let (clusters, patterns) = self.prune_derived(store, now)?;
        report.clusters_removed = clusters;
        report.patterns_removed = patterns;
        if token.is_cancelled() {
            return Ok(self.finish(report, start, true));
        }

        // Phase 4: GC sweep
        let (tags, audit, embeddings, embedding_bytes) = self.gc_sweep(store, now)?;
        report.tags_collected = tags;
        report.audit_trimmed = audit;
        report.embeddings_shed = embeddings;

        report.estimated_bytes_freed = report.nodes_pruned * ESTIMATED_BYTES_PER_NODE
            + report.edges_deactivated * ESTIMATED_BYTES_PER_EDGE
            + embedding_bytes;

        Ok(self.finish(report, start, false))
    }

    fn finish(&self, mut report: PruneReport, start: Instant, cancelled: bool) -> PruneReport {
        report.cancelled = cancelled;
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "Pruning: {} nodes, {} edges deactivated, {} clusters, {} patterns, \
             ~{}KB freed in {}ms{}",
            report.nodes_pruned,
            report.edges_deactivated,
            report.clusters_removed,
            report.patterns_removed,
            report.estimated_bytes_freed / 1024,
            report.elapsed_ms,
            if cancelled { " (cancelled)" } else { "" }
        );
        report
    }

    /// One pass over the graph to gather the facts the guards need
    fn profile_graph(&self, store: &GraphStore) -> Result<GraphProfile> {
        let nodes = store.all_nodes()?;
        let mut max_degree = 0u32;
        let mut community_sizes: HashMap<String, usize> = HashMap::new();
        for node in nodes.iter().filter(|n| !n.is_pruned) {
            max_degree = max_degree.max(node.degree);
            if let Some(community) = &node.community_id {
                *community_sizes.entry(community.clone()).or_default() += 1;
            }
        }

        let mut important = HashSet::new();
        for node in nodes.iter().filter(|n| !n.is_pruned) {
            if self.is_structurally_important(node, max_degree, &community_sizes) {
                important.insert(node.id);
            }
        }

        Ok(GraphProfile {
            max_degree,
            community_sizes,
            important,
        })
    }

    fn is_structurally_important(
        &self,
        node: &Node,
        max_degree: u32,
        community_sizes: &HashMap<String, usize>,
    ) -> bool {
        if node.centrality >= self.config.centrality_guard {
            return true;
        }
        if max_degree > 0
            && node.degree as f32 / max_degree as f32 >= self.config.degree_ratio_guard
        {
            return true;
        }
        if let Some(community) = &node.community_id {
            if community_sizes.get(community).copied().unwrap_or(0)
                >= self.config.community_size_guard
            {
                return true;
            }
        }
        false
    }

    /// True when no guard protects the node
    fn should_prune_node(&self, node: &Node, now: DateTime<Utc>, profile: &GraphProfile) -> bool {
        if self.is_structurally_important(node, profile.max_degree, &profile.community_sizes) {
            return false;
        }
        // Fresh node that is already seeing use
        if node.age_days(now) < self.config.young_age_days as f64
            && node.access_count >= self.config.young_min_accesses
        {
            return false;
        }
        // Accessed recently
        if (now - node.last_accessed).num_days() < self.config.access_grace_days {
            return false;
        }
        true
    }

    /// True when no guard protects the edge
    fn should_prune_edge(&self, edge: &Edge, now: DateTime<Utc>, profile: &GraphProfile) -> bool {
        if (now - edge.last_interaction).num_days() < self.config.access_grace_days {
            return false;
        }
        // An edge between two hubs stays even when weak
        if profile.important.contains(&edge.source) && profile.important.contains(&edge.target) {
            return false;
        }
        true
    }

    fn prune_nodes(
        &self,
        store: &GraphStore,
        now: DateTime<Utc>,
        profile: &GraphProfile,
    ) -> Result<(usize, usize)> {
        let candidates = store.nodes_below_relevance(self.config.relevance_threshold)?;
        let ops: Vec<BatchOp> = candidates
            .iter()
            .filter(|n| self.should_prune_node(n, now, profile))
            .map(|n| BatchOp::PruneNode(n.id))
            .collect();
        if ops.is_empty() {
            return Ok((0, 0));
        }
        let report = store.apply_batch(ops)?;
        Ok((report.nodes_written, report.edges_deactivated))
    }

    fn prune_edges(
        &self,
        store: &GraphStore,
        now: DateTime<Utc>,
        profile: &GraphProfile,
    ) -> Result<usize> {
        let ops: Vec<BatchOp> = store
            .all_edges()?
            .iter()
            .filter(|e| {
                e.is_active
                    && e.effective_strength(now) < self.config.edge_strength_threshold
                    && self.should_prune_edge(e, now, profile)
            })
            .map(|e| BatchOp::DeactivateEdge(e.id))
            .collect();
        if ops.is_empty() {
            return Ok(0);
        }
        let report = store.apply_batch(ops)?;
        Ok(report.edges_deactivated)
    }

    fn prune_derived(&self, store: &GraphStore, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let max_age = Duration::days(self.config.derived_max_age_days);

        let stale_clusters: Vec<_> = store
            .clusters()?
            .iter()
            .filter(|c| c.density < self.config.cluster_min_density || now - c.created_at > max_age)
            .map(|c| c.id)
            .collect();
        let clusters_removed = if stale_clusters.is_empty() {
            0
        } else {
            store.delete_clusters(&stale_clusters)?
        };

        let stale_patterns: Vec<_> = store
            .patterns()?
            .iter()
            .filter(|p| {
                p.confidence < self.config.pattern_min_confidence || now - p.detected_at > max_age
            })
            .map(|p| p.id)
            .collect();
        let patterns_removed = if stale_patterns.is_empty() {
            0
        } else {
            store.delete_patterns(&stale_patterns)?
        };

        Ok((clusters_removed, patterns_removed))
    }

    /// Orphaned tag index rows, embeddings of long-pruned nodes, audit rows
    /// past retention. Returns (tags, audit rows, embeddings, embedding bytes).
    fn gc_sweep(
        &self,
        store: &GraphStore,
        now: DateTime<Utc>,
    ) -> Result<(usize, usize, usize, usize)> {
        let tags = store.gc_tag_index()?;
        let audit_cutoff = now - Duration::days(store.audit_retention_days());
        let audit = store.trim_audit_before(audit_cutoff)?;
        let shed_cutoff = now - Duration::days(self.config.embedding_shed_days);
        let (embeddings, embedding_bytes) = store.shed_embeddings_before(shed_cutoff)?;

        if tags + audit + embeddings > 0 {
            store.record_audit(
                AuditAction::GcSweep,
                "gc",
                Some(format!(
                    "tags={tags} audit={audit} embeddings={embeddings}"
                )),
            )?;
        }
        Ok((tags, audit, embeddings, embedding_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::graph::types::{EdgeType, NodeType, SourceType};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, GraphStore) {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = GraphStore::open(&config).unwrap();
        (dir, store)
    }

    /// A node old enough and idle enough that no grace window protects it
    fn stale_node(content: &str, relevance: f32) -> Node {
        let old = Utc::now() - Duration::days(60);
        let mut node = Node::new(NodeType::Activity, content, old, SourceType::Api);
        node.relevance_score = relevance;
        node.created_at = old;
        node.last_accessed = old;
        node
    }

    fn engine() -> PruningEngine {
        PruningEngine::new(PruningConfig::default())
    }

    #[test]
    fn test_low_relevance_node_pruned_with_edge_cascade() {
        let (_dir, store) = open_store();
        let weak = stale_node("forgotten meeting", 0.05);
        let strong = stale_node("active project", 0.9);
        store.create_node(&weak).unwrap();
        store.create_node(&strong).unwrap();
        let edge = Edge::new(weak.id, strong.id, EdgeType::Association);
        store.create_edge(&edge).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_pruned, 1);
        assert_eq!(report.edges_deactivated, 1);
        assert!(report.estimated_bytes_freed > 0);

        let pruned = store.get_node(weak.id).unwrap();
        assert!(pruned.is_pruned);
        assert_eq!(pruned.relevance_score, 0.0);
        assert!(!store.get_edge(edge.id).unwrap().is_active);
        // The healthy endpoint is untouched
        assert!(!store.get_node(strong.id).unwrap().is_pruned);
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let (_dir, store) = open_store();
        for i in 0..10 {
            store
                .create_node(&stale_node(&format!("stale note {i}"), 0.05))
                .unwrap();
        }

        let engine = engine();
        let first = engine.force(&store, &CancelToken::new()).unwrap();
        assert_eq!(first.nodes_pruned, 10);

        let second = engine.force(&store, &CancelToken::new()).unwrap();
        assert_eq!(second.total_removed(), 0, "second pass must remove nothing");
    }

    #[test]
    fn test_rate_limiter_skips_back_to_back_runs() {
        let (_dir, store) = open_store();
        store.create_node(&stale_node("stale", 0.05)).unwrap();

        let engine = engine();
        let first = engine.run(&store, &CancelToken::new()).unwrap();
        assert!(!first.skipped);
        assert_eq!(first.nodes_pruned, 1);

        let second = engine.run(&store, &CancelToken::new()).unwrap();
        assert!(second.skipped);
        assert_eq!(second.total_removed(), 0);
    }

    #[test]
    fn test_centrality_guard_protects_hub() {
        let (_dir, store) = open_store();
        let mut hub = stale_node("hub with low score", 0.05);
        hub.centrality = 0.9;
        store.create_node(&hub).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_pruned, 0);
        assert!(!store.get_node(hub.id).unwrap().is_pruned);
    }

    #[test]
    fn test_recent_access_grace_protects_node() {
        let (_dir, store) = open_store();
        let mut node = stale_node("low score but just used", 0.05);
        node.last_accessed = Utc::now() - Duration::days(2);
        store.create_node(&node).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_pruned, 0);
    }

    #[test]
    fn test_young_active_node_protected() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let mut young = Node::new(NodeType::Activity, "new but busy", now, SourceType::Api);
        young.relevance_score = 0.05;
        young.access_count = 8;
        // Old last_accessed so only the young-node guard can save it
        young.last_accessed = now - Duration::days(30);
        store.create_node(&young).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_pruned, 0);
    }

    #[test]
    fn test_large_community_protects_members() {
        let (_dir, store) = open_store();
        for i in 0..6 {
            let mut node = stale_node(&format!("community member {i}"), 0.05);
            node.community_id = Some("proj-west".to_string());
            store.create_node(&node).unwrap();
        }
        let loner = stale_node("no community", 0.05);
        store.create_node(&loner).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_pruned, 1);
        assert!(store.get_node(loner.id).unwrap().is_pruned);
    }

    #[test]
    fn test_weak_idle_edge_deactivated() {
        let (_dir, store) = open_store();
        let a = stale_node("endpoint a", 0.9);
        let b = stale_node("endpoint b", 0.9);
        store.create_node(&a).unwrap();
        store.create_node(&b).unwrap();

        let old = Utc::now() - Duration::days(120);
        let mut edge = Edge::new(a.id, b.id, EdgeType::Association).with_strength(0.3);
        edge.last_interaction = old;
        store.create_edge(&edge).unwrap();
        assert!(edge.effective_strength(Utc::now()) < 0.1);

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.edges_deactivated, 1);
        assert!(!store.get_edge(edge.id).unwrap().is_active);
        // Endpoints stay: edge pruning never touches nodes
        assert_eq!(report.nodes_pruned, 0);
    }

    #[test]
    fn test_low_density_cluster_removed() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let mut members = Vec::new();
        for i in 0..3 {
            let node = Node::new(
                NodeType::Activity,
                format!("member {i}"),
                now,
                SourceType::Api,
            );
            store.create_node(&node).unwrap();
            members.push(node.id);
        }
        let loose = crate::graph::types::TemporalCluster {
            id: crate::graph::types::ClusterId::new(),
            node_ids: members.clone(),
            start_time: now - Duration::hours(1),
            end_time: now,
            density: 0.05,
            confidence: 0.9,
            centroid: members[0],
            created_at: now,
        };
        let tight = crate::graph::types::TemporalCluster {
            id: crate::graph::types::ClusterId::new(),
            node_ids: members.clone(),
            start_time: now - Duration::hours(1),
            end_time: now,
            density: 0.8,
            confidence: 0.9,
            centroid: members[0],
            created_at: now,
        };
        store.replace_clusters(&[loose, tight.clone()]).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.clusters_removed, 1);
        let remaining = store.clusters().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, tight.id);
    }

    #[test]
    fn test_low_confidence_pattern_removed() {
        let (_dir, store) = open_store();
        let now = Utc::now();
        let make = |confidence: f64| crate::graph::types::DetectedPattern {
            id: crate::graph::types::PatternId::new(),
            kind: crate::graph::types::PatternKind::Burst,
            confidence,
            window_start: now - Duration::hours(2),
            window_end: now,
            description: "test burst".to_string(),
            magnitude: 3.0,
            detected_at: now,
        };
        store.store_patterns(&[make(0.1), make(0.8)]).unwrap();

        let report = engine().force(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.patterns_removed, 1);
        let remaining = store.patterns().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].confidence > 0.5);
    }

    #[test]
    fn test_cancellation_stops_after_current_phase() {
        let (_dir, store) = open_store();
        store.create_node(&stale_node("stale", 0.05)).unwrap();
        let now = Utc::now();
        store
            .store_patterns(&[crate::graph::types::DetectedPattern {
                id: crate::graph::types::PatternId::new(),
                kind: crate::graph::types::PatternKind::Burst,
                confidence: 0.05,
                window_start: now - Duration::hours(2),
                window_end: now,
                description: "doomed".to_string(),
                magnitude: 3.0,
                detected_at: now,
            }])
            .unwrap();

        let token = CancelToken::new();
        token.cancel();
        let report = engine().force(&store, &token).unwrap();
        assert!(report.cancelled);
        // Phase 1 ran before the first check, later phases did not
        assert_eq!(report.nodes_pruned, 1);
        assert_eq!(report.patterns_removed, 0);
        assert_eq!(store.patterns().unwrap().len(), 1);
    }

    #[test]
    fn test_gc_sweep_audited() {
        let (_dir, store) = open_store();
        // A pruned node with an embedding, pruned long enough ago to shed
        let mut node = stale_node("pruned with embedding", 0.05);
        node.embedding = Some(vec![0.5; 128]);
        store.create_node(&node).unwrap();
        store.apply_batch(vec![BatchOp::PruneNode(node.id)]).unwrap();
        let mut pruned = store.get_node(node.id).unwrap();
        pruned.updated_at = Utc::now() - Duration::days(45);
        store.update_node(&pruned).unwrap();

        let config = PruningConfig {
            embedding_shed_days: 30,
            ..Default::default()
        };
        let report = PruningEngine::new(config)
            .force(&store, &CancelToken::new())
            .unwrap();
        assert_eq!(report.embeddings_shed, 1);
        assert!(report.estimated_bytes_freed >= 128 * 4);
        assert!(store.get_node(node.id).unwrap().embedding.is_none());

        let entries = store.audit_entries(None, 1000).unwrap();
        assert!(entries
            .iter()
            .any(|e| e.action == AuditAction::GcSweep));
    }
}
