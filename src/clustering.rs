//! Temporal clustering
//!
//! Groups nodes into activity sessions. Every node anchors a candidate
//! window of the configured duration; windows that collect enough members
//! become candidates, and candidates whose time ranges mostly coincide
//! merge (capped at the maximum cluster size, so marathon stretches split
//! rather than ballooning). Surviving clusters get a density score, a
//! confidence blend, and a centroid member.
//!
//! A run replaces the stored cluster set wholesale; a cancelled run
//! commits nothing and leaves the previous set in place.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::cancel::CancelToken;
use crate::config::ClusteringConfig;
use crate::errors::Result;
use crate::graph::types::{ClusterId, Node, NodeId, TemporalCluster};
use crate::graph::GraphStore;

/// Confidence blends four signals with equal weight
const CONFIDENCE_COMPONENT_WEIGHT: f64 = 0.25;

/// What a clustering run produced
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ClusterReport {
    pub clusters_found: usize,
    pub nodes_clustered: usize,
    pub candidates_merged: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

/// A window candidate before merging. `window_end` is the anchor plus the
/// window duration (used for overlap math), independent of where the last
/// member actually sits.
struct Candidate {
    members: HashSet<NodeId>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

impl Candidate {
    fn overlap_ratio(&self, other: &Candidate) -> f64 {
        let overlap_start = self.window_start.max(other.window_start);
        let overlap_end = self.window_end.min(other.window_end);
        let overlap = (overlap_end - overlap_start).num_seconds();
        if overlap <= 0 {
            return 0.0;
        }
        let self_len = (self.window_end - self.window_start).num_seconds();
        let other_len = (other.window_end - other.window_start).num_seconds();
        let shorter = self_len.min(other_len).max(1);
        overlap as f64 / shorter as f64
    }
}

pub struct ClusteringEngine {
    config: ClusteringConfig,
}

impl ClusteringEngine {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Cluster every non-pruned node and replace the stored cluster set
    pub fn run(&self, store: &GraphStore, token: &CancelToken) -> Result<ClusterReport> {
        let start = Instant::now();
        let mut report = ClusterReport::default();

        let mut nodes = store.all_nodes()?;
        nodes.retain(|n| !n.is_pruned);
        nodes.sort_by_key(|n| n.timestamp);

        if token.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let candidates = self.collect_candidates(&nodes);
        let before_merge = candidates.len();
        let Some(merged) = self.merge_candidates(candidates, token) else {
            report.cancelled = true;
            return Ok(report);
        };
        report.candidates_merged = before_merge.saturating_sub(merged.len());

        let by_id: HashMap<NodeId, &Node> = nodes.iter().map(|n| (n.id, n)).collect();
        let clusters: Vec<TemporalCluster> = merged
            .into_iter()
            .filter_map(|candidate| self.finalize(candidate, &by_id))
            .collect();

        report.clusters_found = clusters.len();
        report.nodes_clustered = clusters.iter().map(|c| c.node_ids.len()).sum();

        if token.is_cancelled() {
            // Do not replace a complete previous set with a partial run
            report.cancelled = true;
            return Ok(report);
        }
        store.replace_clusters(&clusters)?;

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "Clustering: {} clusters over {} nodes ({} candidates merged) in {}ms",
            report.clusters_found,
            report.nodes_clustered,
            report.candidates_merged,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Every node anchors a window of the configured duration; the window
    /// collects the nodes inside it and qualifies as a candidate when it
    /// meets the minimum size. Two-pointer sweep over the sorted timeline.
    fn collect_candidates(&self, nodes: &[Node]) -> Vec<Candidate> {
        let window = Duration::minutes(self.config.window_minutes.max(1));
        let mut candidates = Vec::new();
        let mut end_idx = 0usize;

        for (anchor_idx, anchor) in nodes.iter().enumerate() {
            let window_end = anchor.timestamp + window;
            if end_idx < anchor_idx {
                end_idx = anchor_idx;
            }
            while end_idx < nodes.len() && nodes[end_idx].timestamp < window_end {
                end_idx += 1;
            }

            if end_idx - anchor_idx >= self.config.min_cluster_size {
                candidates.push(Candidate {
                    members: nodes[anchor_idx..end_idx].iter().map(|n| n.id).collect(),
                    window_start: anchor.timestamp,
                    window_end,
                });
            }
        }
        candidates
    }

    /// Merge adjacent candidates (start-time order) whose time-overlap
    /// ratio exceeds the configured threshold. A merge that would push the
    /// member union past the maximum cluster size closes the current
    /// cluster instead, so continuous stretches split at the cap.
    /// Returns None when cancelled mid-way.
    fn merge_candidates(
        &self,
        candidates: Vec<Candidate>,
        token: &CancelToken,
    ) -> Option<Vec<Candidate>> {
        let mut merged: Vec<Candidate> = Vec::new();
        for (i, candidate) in candidates.into_iter().enumerate() {
            if i % 64 == 0 && token.is_cancelled() {
                return None;
            }
            let absorb = match merged.last() {
                Some(head) if head.overlap_ratio(&candidate) > self.config.merge_overlap => {
                    let union_size = head.members.union(&candidate.members).count();
                    union_size <= self.config.max_cluster_size
                }
                _ => false,
            };
            if absorb {
                let head = merged.last_mut().expect("head checked above");
                head.members.extend(candidate.members);
                head.window_end = head.window_end.max(candidate.window_end);
            } else {
                merged.push(candidate);
            }
        }
        Some(merged)
    }

    /// Turn a merged candidate into a stored cluster with density,
    /// confidence and centroid. Candidates outside [min, max] are dropped.
    fn finalize(
        &self,
        candidate: Candidate,
        by_id: &HashMap<NodeId, &Node>,
    ) -> Option<TemporalCluster> {
        let mut members: Vec<&Node> = candidate
            .members
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        if members.len() < self.config.min_cluster_size
            || members.len() > self.config.max_cluster_size
        {
            return None;
        }
        members.sort_by_key(|n| n.timestamp);

        let density = gap_density(&members);
        let confidence = self.confidence(&members);
        let centroid = centroid_member(&members);

        Some(TemporalCluster {
            id: ClusterId::new(),
            node_ids: members.iter().map(|n| n.id).collect(),
            start_time: members.first()?.timestamp,
            end_time: members.last()?.timestamp,
            density,
            confidence,
            centroid,
            created_at: Utc::now(),
        })
    }

    /// Equal-weight blend of four signals:
    /// - size proximity to the midpoint of [min, max]
    /// - mean member relevance
    /// - temporal coherence (configured window span vs actual span)
    /// - type homogeneity (inverse of distinct types present)
    fn confidence(&self, members: &[&Node]) -> f64 {
        let min = self.config.min_cluster_size as f64;
        let max = self.config.max_cluster_size as f64;
        let midpoint = (min + max) / 2.0;
        let half_width = ((max - min) / 2.0).max(1.0);
        let size_fit = (1.0 - (members.len() as f64 - midpoint).abs() / half_width).clamp(0.0, 1.0);

        let mean_relevance = members
            .iter()
            .map(|n| f64::from(n.relevance_score))
            .sum::<f64>()
            / members.len() as f64;

        let expected_span = self.config.window_minutes.max(1) as f64;
        let actual_span = (members[members.len() - 1].timestamp - members[0].timestamp)
            .num_seconds() as f64
            / 60.0;
        let coherence = if actual_span <= expected_span {
            1.0
        } else {
            expected_span / actual_span
        };

        let distinct_types: HashSet<&str> =
            members.iter().map(|n| n.node_type.as_str()).collect();
        let homogeneity = 1.0 / distinct_types.len().max(1) as f64;

        (CONFIDENCE_COMPONENT_WEIGHT * size_fit
            + CONFIDENCE_COMPONENT_WEIGHT * mean_relevance
            + CONFIDENCE_COMPONENT_WEIGHT * coherence
            + CONFIDENCE_COMPONENT_WEIGHT * homogeneity)
            .clamp(0.0, 1.0)
    }
}

/// Inverse-variance density over inter-member gaps, in (0,1].
/// Variance is taken over gaps measured in minutes; evenly spaced members
/// score near 1, erratic spacing drags the score toward 0.
fn gap_density(members: &[&Node]) -> f64 {
    if members.len() < 2 {
        return 1.0;
    }
    let gaps: Vec<f64> = members
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64 / 60.0)
        .collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    1.0 / (1.0 + variance)
}

/// The member minimizing relevance-weighted time distance to the rest:
/// central in time, with high-relevance members favored as anchors
fn centroid_member(members: &[&Node]) -> NodeId {
    let mut best = members[0].id;
    let mut best_cost = f64::INFINITY;
    for candidate in members {
        let total_seconds: f64 = members
            .iter()
            .map(|other| {
                (candidate.timestamp - other.timestamp)
                    .num_seconds()
                    .unsigned_abs() as f64
            })
            .sum();
        let cost = total_seconds / (0.5 + f64::from(candidate.relevance_score));
        if cost < best_cost {
            best_cost = cost;
            best = candidate.id;
        }
    }
    best
}
