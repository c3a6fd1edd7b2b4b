//! Multi-factor relevance scoring
//!
//! Every node carries a relevance score in [0,1] blended from six factors:
//!
//! | factor      | signal                                              |
//! |-------------|-----------------------------------------------------|
//! | recency     | multi-scale decay over event and last-access time   |
//! | frequency   | log-scaled access count, burst-boosted              |
//! | interaction | spread and strength of recent user interactions     |
//! | semantic    | term overlap with the active query (or a backend)   |
//! | centrality  | computed centrality, degree fallback                |
//! | type        | per-type prior (projects outrank stale activities)  |
//!
//! Scores are computed on demand with a short-TTL cache, nudged upward on
//! each recorded interaction, and rewritten in bulk by `recompute_all`
//! during maintenance.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::config::ScoringConfig;
use crate::constants::CENTRALITY_DEGREE_SCALE;
use crate::decay::blended_recency;
use crate::errors::Result;
use crate::graph::types::{InteractionKind, Node, NodeId};
use crate::graph::{BatchOp, GraphStore};

/// Days of history consulted by the interaction-consistency factor
const CONSISTENCY_WINDOW_DAYS: i64 = 7;

/// Share of the interaction factor carried by day coverage (the rest comes
/// from mean interaction strength)
const CONSISTENCY_COVERAGE_SHARE: f32 = 0.6;

// =============================================================================
// EXTENSION TRAITS
// =============================================================================

/// Optional external similarity backend (embedding service, search index).
///
/// Returning `None` for a pair falls back to lexical term overlap, so a
/// backend may answer only for nodes it has vectors for.
pub trait SimilarityScorer: Send + Sync {
    /// Similarity in [0,1] between free text and a node
    fn similarity(&self, text: &str, node: &Node) -> Option<f32>;
}

/// Final hook after the weighted blend, for experiments and domain tweaks
pub trait ScoreCorrection: Send + Sync {
    fn correct(&self, node: &Node, raw: f32) -> f32;
}

// =============================================================================
// SCORE BREAKDOWN
// =============================================================================

/// Per-factor breakdown of a computed score, for explain output and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ScoreFactors {
    pub recency: f32,
    pub frequency: f32,
    pub interaction: f32,
    pub semantic: f32,
    pub centrality: f32,
    pub type_weight: f32,
}

impl ScoreFactors {
    /// Weighted blend into a single [0,1] score
    pub fn blend(&self, config: &ScoringConfig) -> f32 {
        let raw = config.recency_weight * self.recency
            + config.frequency_weight * self.frequency
            + config.interaction_weight * self.interaction
            + config.semantic_weight * self.semantic
            + config.centrality_weight * self.centrality
            + config.type_weight * self.type_weight;
        raw.clamp(0.0, 1.0)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

struct CachedScore {
    score: f32,
    factors: ScoreFactors,
    computed_at: Instant,
}

type InteractionRing = VecDeque<(DateTime<Utc>, InteractionKind)>;

/// What a bulk recompute accomplished
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecomputeReport {
    pub nodes_scored: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

pub struct RelevanceEngine {
    config: ScoringConfig,
    similarity: Option<Arc<dyn SimilarityScorer>>,
    correction: Option<Arc<dyn ScoreCorrection>>,

    /// Per-node interaction history, capped at the configured ring size
    interactions: DashMap<NodeId, InteractionRing>,

    /// Context-free score cache. Scores that depend on query terms are
    /// never cached here.
    score_cache: DashMap<NodeId, CachedScore>,
}

impl RelevanceEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            similarity: None,
            correction: None,
            interactions: DashMap::new(),
            score_cache: DashMap::new(),
        }
    }

    pub fn with_similarity(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.similarity = Some(scorer);
        self
    }

    pub fn with_correction(mut self, correction: Arc<dyn ScoreCorrection>) -> Self {
        self.correction = Some(correction);
        self
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    // =========================================================================
    // SCORING
    // =========================================================================

    /// Context-free score, served from cache within the TTL
    pub fn score(&self, node: &Node, now: DateTime<Utc>) -> (f32, ScoreFactors) {
        let ttl = std::time::Duration::from_secs(self.config.score_cache_ttl_secs);
        if let Some(cached) = self.score_cache.get(&node.id) {
            if cached.computed_at.elapsed() < ttl {
                return (cached.score, cached.factors);
            }
        }

        let (score, factors) = self.compute(node, None, now);
        self.score_cache.insert(
            node.id,
            CachedScore {
                score,
                factors,
                computed_at: Instant::now(),
            },
        );
        (score, factors)
    }

    /// Score against free text (uncached: every query context differs)
    pub fn score_with_text(
        &self,
        node: &Node,
        text: &str,
        now: DateTime<Utc>,
    ) -> (f32, ScoreFactors) {
        self.compute(node, Some(text), now)
    }

    fn compute(&self, node: &Node, text: Option<&str>, now: DateTime<Utc>) -> (f32, ScoreFactors) {
        let factors = ScoreFactors {
            recency: self.recency_factor(node, now),
            frequency: self.frequency_factor(node, now),
            interaction: self.interaction_factor(node.id, now),
            semantic: self.semantic_factor(node, text),
            centrality: Self::centrality_factor(node),
            type_weight: self.config.type_weight_for(node.node_type),
        };

        let mut score = factors.blend(&self.config);
        if let Some(correction) = &self.correction {
            score = correction.correct(node, score).clamp(0.0, 1.0);
        }
        (score, factors)
    }

    /// Blended event-time/access-time recency through the multi-scale
    /// decay curve. The per-node decay factor stretches or compresses
    /// elapsed time before it hits the curve.
    fn recency_factor(&self, node: &Node, now: DateTime<Utc>) -> f32 {
        let stretch = f64::from(node.decay_factor.max(0.0));
        let event_hours = (now - node.timestamp).num_seconds().max(0) as f64 / 3600.0 * stretch;
        let access_hours =
            (now - node.last_accessed).num_seconds().max(0) as f64 / 3600.0 * stretch;
        blended_recency(event_hours, access_hours, self.config.access_blend) as f32
    }

    /// Log-scaled access count with a burst boost when the trailing-24h
    /// rate runs well above the node's lifetime baseline
    fn frequency_factor(&self, node: &Node, now: DateTime<Utc>) -> f32 {
        let base = (1.0 + f64::from(node.access_count)).ln()
            / (1.0 + f64::from(self.config.frequency_expected_max)).ln();
        let mut factor = base.min(1.0) as f32;

        let age_days = node.age_days(now).max(1.0 / 24.0);
        let lifetime_rate = f64::from(node.access_count) / age_days;
        let trailing = self.interactions_since(node.id, now - ChronoDuration::hours(24));
        if trailing as f64 > lifetime_rate * f64::from(self.config.burst_rate_multiplier)
            && trailing >= 3
        {
            factor = (factor * self.config.burst_boost).min(1.0);
        }
        factor
    }

    fn interactions_since(&self, id: NodeId, since: DateTime<Utc>) -> usize {
        self.interactions
            .get(&id)
            .map(|ring| ring.iter().filter(|(ts, _)| *ts >= since).count())
            .unwrap_or(0)
    }

    /// Consistency of recent interactions: how many distinct days of the
    /// trailing week saw activity, blended with mean interaction strength
    fn interaction_factor(&self, id: NodeId, now: DateTime<Utc>) -> f32 {
        let Some(ring) = self.interactions.get(&id) else {
            return 0.0;
        };
        let since = now - ChronoDuration::days(CONSISTENCY_WINDOW_DAYS);
        let mut days: HashSet<i64> = HashSet::new();
        let mut strength_sum = 0.0f32;
        let mut count = 0usize;
        for (ts, kind) in ring.iter() {
            if *ts < since {
                continue;
            }
            days.insert(ts.timestamp() / 86_400);
            strength_sum += kind.default_strength();
            count += 1;
        }
        if count == 0 {
            return 0.0;
        }
        let coverage = (days.len() as f32 / CONSISTENCY_WINDOW_DAYS as f32).min(1.0);
        let mean_strength = strength_sum / count as f32;
        CONSISTENCY_COVERAGE_SHARE * coverage + (1.0 - CONSISTENCY_COVERAGE_SHARE) * mean_strength
    }

    /// Similarity to query text. Backend first, lexical overlap second,
    /// neutral 0.5 when there is no query context at all.
    fn semantic_factor(&self, node: &Node, text: Option<&str>) -> f32 {
        let Some(text) = text else {
            return 0.5;
        };
        if let Some(backend) = &self.similarity {
            if let Some(similarity) = backend.similarity(text, node) {
                return similarity.clamp(0.0, 1.0);
            }
        }
        lexical_overlap(text, node)
    }

    fn centrality_factor(node: &Node) -> f32 {
        if node.centrality > 0.0 {
            return node.centrality.min(1.0);
        }
        // Fallback for graphs without a centrality pass: saturating
        // log-degree estimate
        let degree = f64::from(node.degree);
        ((1.0 + degree).ln() / (1.0 + f64::from(CENTRALITY_DEGREE_SCALE)).ln()).min(1.0) as f32
    }

    // =========================================================================
    // INTERACTIONS
    // =========================================================================

    /// Record a user interaction: appends to the history ring, bumps the
    /// node's access state, and nudges its stored relevance upward.
    /// The caller persists the returned node.
    pub fn record_interaction(&self, node: &mut Node, kind: InteractionKind, now: DateTime<Utc>) {
        let mut ring = self.interactions.entry(node.id).or_default();
        ring.push_back((now, kind));
        while ring.len() > self.config.interaction_history_capacity {
            ring.pop_front();
        }
        drop(ring);

        node.record_access();
        let boosted =
            (node.relevance_score * crate::constants::INTERACTION_SCORE_BOOST).clamp(0.0, 1.0);
        node.set_relevance(boosted);
        self.score_cache.remove(&node.id);
    }

    /// Forget cached state for a node (pruned or deleted)
    pub fn forget(&self, id: NodeId) {
        self.interactions.remove(&id);
        self.score_cache.remove(&id);
    }

    pub fn clear_cache(&self) {
        self.score_cache.clear();
    }

    // =========================================================================
    // BULK RECOMPUTE
    // =========================================================================

    /// Rescore every non-pruned node and persist the results in batches.
    ///
    /// Degree is refreshed from the adjacency indexes on the way through so
    /// the centrality fallback stays honest. Each batch commits
    /// independently; cancellation between batches keeps what finished.
    pub fn recompute_all(
        &self,
        store: &GraphStore,
        token: &CancelToken,
    ) -> Result<RecomputeReport> {
        let start = Instant::now();
        let now = Utc::now();
        let mut report = RecomputeReport::default();

        let mut nodes = store.all_nodes()?;
        nodes.retain(|n| !n.is_pruned);

        let batch_size = self.config.recompute_batch_size.max(1);
        for chunk in nodes.chunks(batch_size) {
            if token.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let rescored = if self.config.parallel_recompute {
                self.rescore_chunk_parallel(store, chunk, now)
            } else {
                self.rescore_chunk(store, chunk, now)
            };

            let ops: Vec<BatchOp> = rescored.into_iter().map(BatchOp::UpdateNode).collect();
            if !ops.is_empty() {
                report.nodes_scored += ops.len();
                store.apply_batch(ops)?;
            }
        }

        self.score_cache.clear();
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "Relevance recompute: {} nodes in {}ms{}",
            report.nodes_scored,
            report.elapsed_ms,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    fn rescore_chunk(&self, store: &GraphStore, chunk: &[Node], now: DateTime<Utc>) -> Vec<Node> {
        chunk
            .iter()
            .map(|node| self.rescore_one(store, node, now))
            .collect()
    }

    /// Scoring is read-only, so a chunk can fan out across scoped threads;
    /// writes stay on the calling thread
    fn rescore_chunk_parallel(
        &self,
        store: &GraphStore,
        chunk: &[Node],
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .min(chunk.len().max(1));
        if workers <= 1 {
            return self.rescore_chunk(store, chunk, now);
        }

        let stride = chunk.len().div_ceil(workers);
        let mut rescored: Vec<Node> = Vec::with_capacity(chunk.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .chunks(stride)
                .map(|part| scope.spawn(move || self.rescore_chunk(store, part, now)))
                .collect();
            for handle in handles {
                match handle.join() {
                    Ok(part) => rescored.extend(part),
                    Err(_) => tracing::error!("rescore worker panicked; partial chunk kept"),
                }
            }
        });
        rescored
    }

    fn rescore_one(&self, store: &GraphStore, node: &Node, now: DateTime<Utc>) -> Node {
        let mut node = node.clone();
        match store.active_degree(node.id) {
            Ok(degree) => node.degree = degree,
            Err(e) => tracing::debug!("degree refresh failed for {}: {e}", node.id),
        }
        let (score, _) = self.compute(&node, None, now);
        node.set_relevance(score);
        node
    }
}

/// Share of a query's terms found among the node's terms, with the same
/// stem-prefix tolerance the query matcher uses
pub(crate) fn lexical_overlap(text: &str, node: &Node) -> f32 {
    let query_terms: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1)
        .map(str::to_string)
        .collect();
    if query_terms.is_empty() {
        return 0.0;
    }
    let node_terms = node.terms();
    let hits = query_terms
        .iter()
        .filter(|t| {
            node_terms
                .iter()
                .any(|nt| nt == *t || (t.len() >= 4 && nt.starts_with(t.as_str())))
        })
        .count();
    hits as f32 / query_terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::graph::types::{Edge, EdgeType, NodeType, SourceType};
    use tempfile::TempDir;

    fn engine() -> RelevanceEngine {
        RelevanceEngine::new(ScoringConfig::default())
    }

    fn node_at(hours_ago: i64) -> Node {
        let ts = Utc::now() - ChronoDuration::hours(hours_ago);
        let mut node = Node::new(NodeType::Activity, "wrote some tests", ts, SourceType::Api);
        node.last_accessed = ts;
        node
    }

    #[test]
    fn test_fresh_node_outscores_stale_node() {
        let engine = engine();
        let now = Utc::now();
        let fresh = node_at(1);
        let stale = node_at(24 * 30);

        let (fresh_score, _) = engine.score(&fresh, now);
        let (stale_score, _) = engine.score(&stale, now);
        assert!(
            fresh_score > stale_score,
            "fresh {fresh_score} should beat stale {stale_score}"
        );
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let engine = engine();
        let now = Utc::now();
        let mut node = node_at(0);
        node.access_count = 10_000;
        node.centrality = 5.0; // out-of-range input must not escape
        let (score, factors) = engine.score(&node, now);
        assert!((0.0..=1.0).contains(&score));
        assert!(factors.frequency <= 1.0);
        assert!(factors.centrality <= 1.0);
    }

    #[test]
    fn test_interaction_factor_rewards_spread() {
        let engine = engine();
        let now = Utc::now();
        let mut daily = node_at(24 * 7);
        let mut single = node_at(24 * 7);

        // Five interactions spread over five days vs five in one burst
        for day in 0..5 {
            let ts = now - ChronoDuration::days(day);
            let mut ring = engine.interactions.entry(daily.id).or_default();
            ring.push_back((ts, InteractionKind::Edit));
        }
        for _ in 0..5 {
            let mut ring = engine.interactions.entry(single.id).or_default();
            ring.push_back((now, InteractionKind::Edit));
        }

        let spread = engine.interaction_factor(daily.id, now);
        let burst = engine.interaction_factor(single.id, now);
        assert!(
            spread > burst,
            "spread {spread} should beat one-day burst {burst}"
        );

        // Both still beat silence
        daily.record_access();
        single.record_access();
        assert!(burst > 0.0);
    }

    #[test]
    fn test_record_interaction_boosts_and_caps_history() {
        let engine = engine();
        let now = Utc::now();
        let mut node = node_at(2);
        node.set_relevance(0.5);

        engine.record_interaction(&mut node, InteractionKind::Edit, now);
        assert!(node.relevance_score > 0.5);
        assert_eq!(node.access_count, 1);

        for i in 0..200 {
            engine.record_interaction(
                &mut node,
                InteractionKind::View,
                now + ChronoDuration::seconds(i),
            );
        }
        let ring_len = engine.interactions.get(&node.id).unwrap().len();
        assert_eq!(
            ring_len,
            ScoringConfig::default().interaction_history_capacity
        );
        // Boost compounds but never escapes [0,1]
        assert!(node.relevance_score <= 1.0);
    }

    #[test]
    fn test_semantic_factor_lexical_fallback() {
        let engine = engine();
        let node = Node::new(
            NodeType::Resource,
            "rust borrow checker notes",
            Utc::now(),
            SourceType::Browser,
        );
        let hit = engine.semantic_factor(&node, Some("borrow checker"));
        let miss = engine.semantic_factor(&node, Some("quarterly tax filing"));
        assert!(hit > miss);
        assert_eq!(engine.semantic_factor(&node, None), 0.5);
    }

    #[test]
    fn test_similarity_backend_overrides_lexical() {
        struct Fixed;
        impl SimilarityScorer for Fixed {
            fn similarity(&self, _text: &str, _node: &Node) -> Option<f32> {
                Some(0.91)
            }
        }
        let engine =
            RelevanceEngine::new(ScoringConfig::default()).with_similarity(Arc::new(Fixed));
        let node = node_at(1);
        assert_eq!(engine.semantic_factor(&node, Some("anything")), 0.91);
    }

    #[test]
    fn test_score_correction_hook_applies() {
        struct Halve;
        impl ScoreCorrection for Halve {
            fn correct(&self, _node: &Node, raw: f32) -> f32 {
                raw / 2.0
            }
        }
        let plain = engine();
        let corrected =
            RelevanceEngine::new(ScoringConfig::default()).with_correction(Arc::new(Halve));
        let node = node_at(1);
        let now = Utc::now();
        let (a, _) = plain.score(&node, now);
        let (b, _) = corrected.score(&node, now);
        assert!((b - a / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_recompute_all_persists_scores_and_degree() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = GraphStore::open(&config).unwrap();

        let a = node_at(1);
        let b = node_at(2);
        store.create_node(&a).unwrap();
        store.create_node(&b).unwrap();
        store
            .create_edge(&Edge::new(a.id, b.id, EdgeType::Temporal))
            .unwrap();

        let engine = engine();
        let report = engine.recompute_all(&store, &CancelToken::new()).unwrap();
        assert_eq!(report.nodes_scored, 2);
        assert!(!report.cancelled);

        let reloaded = store.get_node(a.id).unwrap();
        assert!(reloaded.relevance_score > 0.0);
        assert_eq!(reloaded.degree, 1);
    }

    #[test]
    fn test_recompute_respects_cancellation() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = GraphStore::open(&config).unwrap();
        for i in 0..5 {
            store.create_node(&node_at(i)).unwrap();
        }

        let token = CancelToken::new();
        token.cancel();
        let report = engine().recompute_all(&store, &token).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.nodes_scored, 0);
    }
}
