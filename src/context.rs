//! Per-session context windows
//!
//! A context window is a bounded working set of what a session has touched
//! lately: recent nodes and edges (most-recent-first), a scored relevant
//! set, and a short query history. Windows live in a [`DashMap`] keyed by
//! session id, are seeded lazily from the store on first use, decay each
//! maintenance cycle, and are dropped after the idle timeout.
//!
//! Window state is advisory. It accelerates and personalizes retrieval but
//! is never the source of truth, so seeding and supplementation failures
//! degrade to a smaller window instead of erroring the caller's operation.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::config::ContextConfig;
use crate::constants::CONTEXT_QUERY_BOOST;
use crate::errors::Result;
use crate::graph::query::{Query, QueryTarget, SortSpec};
use crate::graph::types::{Edge, EdgeId, Node, NodeId};
use crate::graph::GraphStore;
use crate::relevance::lexical_overlap;

/// How a session touched the graph
#[derive(Debug, Clone)]
pub enum Interaction {
    /// A query ran and returned these nodes
    Query { text: String, result_nodes: Vec<NodeId> },
    /// A node was read directly
    NodeAccess(NodeId),
    /// An edge was traversed or inspected
    EdgeInteraction(EdgeId),
}

#[derive(Debug, Clone)]
struct WindowItem<K> {
    id: K,
    score: f32,
    last_touched: DateTime<Utc>,
}

/// One session's working set
struct SessionWindow {
    /// Most-recent-first, bounded by `max_recent_nodes`
    recent_nodes: VecDeque<WindowItem<NodeId>>,
    recent_edges: VecDeque<WindowItem<EdgeId>>,
    /// Scored set kept across queries, bounded by `max_relevant_*`
    relevant_nodes: Vec<WindowItem<NodeId>>,
    relevant_edges: Vec<WindowItem<EdgeId>>,
    query_history: VecDeque<String>,
    last_active: DateTime<Utc>,
}

impl SessionWindow {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            recent_nodes: VecDeque::new(),
            recent_edges: VecDeque::new(),
            relevant_nodes: Vec::new(),
            relevant_edges: Vec::new(),
            query_history: VecDeque::new(),
            last_active: now,
        }
    }

    /// Move an id to the front of a recent list, lifting its score to full
    fn touch<K: PartialEq + Copy>(
        list: &mut VecDeque<WindowItem<K>>,
        id: K,
        cap: usize,
        now: DateTime<Utc>,
    ) {
        list.retain(|item| item.id != id);
        list.push_front(WindowItem {
            id,
            score: 1.0,
            last_touched: now,
        });
        list.truncate(cap);
    }

    fn boost_node(&mut self, id: NodeId, factor: f32, now: DateTime<Utc>) {
        for item in self.recent_nodes.iter_mut().chain(self.relevant_nodes.iter_mut()) {
            if item.id == id {
                item.score = (item.score * factor).min(1.0);
                item.last_touched = now;
            }
        }
    }

    fn window_node_score(&self, id: NodeId) -> Option<(f32, DateTime<Utc>)> {
        self.recent_nodes
            .iter()
            .chain(self.relevant_nodes.iter())
            .filter(|item| item.id == id)
            .map(|item| (item.score, item.last_touched))
            .max_by(|a, b| a.0.total_cmp(&b.0))
    }

    /// Distinct node ids currently anywhere in the window
    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .recent_nodes
            .iter()
            .chain(self.relevant_nodes.iter())
            .map(|item| item.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Insert or raise a relevant-set entry, keeping the cap by lowest score
    fn fold_relevant_node(&mut self, id: NodeId, score: f32, cap: usize, now: DateTime<Utc>) {
        if let Some(item) = self.relevant_nodes.iter_mut().find(|item| item.id == id) {
            item.score = item.score.max(score);
            item.last_touched = now;
            return;
        }
        self.relevant_nodes.push(WindowItem {
            id,
            score,
            last_touched: now,
        });
        if self.relevant_nodes.len() > cap {
            self.relevant_nodes
                .sort_by(|a, b| b.score.total_cmp(&a.score));
            self.relevant_nodes.truncate(cap);
        }
    }

    fn fold_relevant_edge(&mut self, id: EdgeId, score: f32, cap: usize, now: DateTime<Utc>) {
        if let Some(item) = self.relevant_edges.iter_mut().find(|item| item.id == id) {
            item.score = item.score.max(score);
            item.last_touched = now;
            return;
        }
        self.relevant_edges.push(WindowItem {
            id,
            score,
            last_touched: now,
        });
        if self.relevant_edges.len() > cap {
            self.relevant_edges
                .sort_by(|a, b| b.score.total_cmp(&a.score));
            self.relevant_edges.truncate(cap);
        }
    }

    fn decay(&mut self, factor: f32, eviction_threshold: f32) -> usize {
        let before = self.recent_nodes.len()
            + self.recent_edges.len()
            + self.relevant_nodes.len()
            + self.relevant_edges.len();
        for item in self.recent_nodes.iter_mut() {
            item.score *= factor;
        }
        for item in self.recent_edges.iter_mut() {
            item.score *= factor;
        }
        for item in self.relevant_nodes.iter_mut() {
            item.score *= factor;
        }
        for item in self.relevant_edges.iter_mut() {
            item.score *= factor;
        }
        self.recent_nodes.retain(|i| i.score >= eviction_threshold);
        self.recent_edges.retain(|i| i.score >= eviction_threshold);
        self.relevant_nodes.retain(|i| i.score >= eviction_threshold);
        self.relevant_edges.retain(|i| i.score >= eviction_threshold);
        before
            - (self.recent_nodes.len()
                + self.recent_edges.len()
                + self.relevant_nodes.len()
                + self.relevant_edges.len())
    }
}

/// Read-only view of a window for callers and tests
#[derive(Debug, Clone, serde::Serialize)]
pub struct WindowSnapshot {
    pub session_id: String,
    /// Most recent first
    pub recent_nodes: Vec<NodeId>,
    pub recent_edges: Vec<EdgeId>,
    /// Score descending
    pub relevant_nodes: Vec<(NodeId, f32)>,
    pub relevant_edges: Vec<(EdgeId, f32)>,
    pub query_history: Vec<String>,
    pub last_active: DateTime<Utc>,
}

/// What a window decay cycle did
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WindowDecayReport {
    pub sessions_dropped: usize,
    pub items_evicted: usize,
}

pub struct ContextWindowManager {
    config: ContextConfig,
    windows: DashMap<String, SessionWindow>,
}

impl ContextWindowManager {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.windows.len()
    }

    /// Fold an interaction into the session's window, creating and seeding
    /// the window on first touch
    pub fn record_interaction(
        &self,
        store: &GraphStore,
        session_id: &str,
        interaction: Interaction,
    ) {
        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(session_id.to_string())
            .or_insert_with(|| self.seed_window(store, session_id, now));
        let window = entry.value_mut();
        window.last_active = now;

        match interaction {
            Interaction::Query { text, result_nodes } => {
                window.query_history.push_back(text);
                while window.query_history.len() > self.config.query_history {
                    window.query_history.pop_front();
                }
                // Only items already tracked get the boost; a query result
                // is weaker evidence than a direct access
                for id in result_nodes {
                    window.boost_node(id, CONTEXT_QUERY_BOOST, now);
                }
            }
            Interaction::NodeAccess(id) => {
                SessionWindow::touch(
                    &mut window.recent_nodes,
                    id,
                    self.config.max_recent_nodes,
                    now,
                );
            }
            Interaction::EdgeInteraction(id) => {
                SessionWindow::touch(
                    &mut window.recent_edges,
                    id,
                    self.config.max_recent_edges,
                    now,
                );
            }
        }
    }

    /// The best context nodes for a query: window items scored by term
    /// overlap, window score and recency, supplemented from the store when
    /// the window cannot fill the limit. Results fold back into the
    /// relevant set.
    pub fn relevant_context(
        &self,
        store: &GraphStore,
        session_id: &str,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<Node>> {
        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(session_id.to_string())
            .or_insert_with(|| self.seed_window(store, session_id, now));
        let window = entry.value_mut();
        window.last_active = now;

        // Score what the window already holds
        let mut scored: Vec<(f32, Node)> = Vec::new();
        let mut covered = 0usize;
        for id in window.node_ids() {
            let node = match store.try_get_node(id)? {
                Some(node) if !node.is_pruned => node,
                _ => continue,
            };
            let (window_score, last_touched) = window
                .window_node_score(id)
                .unwrap_or((0.0, now));
            let overlap = lexical_overlap(query_text, &node);
            if overlap > 0.0 {
                covered += 1;
            }
            let idle_minutes = (now - last_touched).num_minutes() as f32;
            let recency =
                (1.0 - idle_minutes / self.config.idle_timeout_minutes as f32).clamp(0.0, 1.0);
            let score = 0.5 * overlap + 0.3 * recency + 0.2 * window_score;
            if score > 0.0 {
                scored.push((score, node));
            }
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        // Not enough window items actually mention the query: pull
        // candidates from the store. Window size alone is not coverage.
        if covered < limit {
            match self.supplement(store, query_text, limit) {
                Ok(extra) => {
                    for node in extra {
                        if scored.iter().any(|(_, n)| n.id == node.id) {
                            continue;
                        }
                        let score = 0.5 * lexical_overlap(query_text, &node)
                            + 0.2 * node.relevance_score;
                        scored.push((score, node));
                    }
                    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
                }
                Err(e) => {
                    // Degrade to window-only context
                    tracing::warn!("context supplement failed: {e}");
                }
            }
        }

        scored.truncate(limit);
        for (score, node) in &scored {
            window.fold_relevant_node(node.id, *score, self.config.max_relevant_nodes, now);
        }
        Ok(scored.into_iter().map(|(_, node)| node).collect())
    }

    /// Decay every window and drop the idle ones
    pub fn decay_windows(&self) -> WindowDecayReport {
        let now = Utc::now();
        let idle_cutoff = now - Duration::minutes(self.config.idle_timeout_minutes);
        let mut report = WindowDecayReport::default();

        let idle: Vec<String> = self
            .windows
            .iter()
            .filter(|entry| entry.value().last_active < idle_cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        for key in idle {
            if self.windows.remove(&key).is_some() {
                report.sessions_dropped += 1;
            }
        }

        for mut entry in self.windows.iter_mut() {
            report.items_evicted += entry
                .value_mut()
                .decay(self.config.decay_factor, self.config.eviction_threshold);
        }
        report
    }

    /// Read-only copy of a session's window, if one exists
    pub fn snapshot(&self, session_id: &str) -> Option<WindowSnapshot> {
        let entry = self.windows.get(session_id)?;
        let window = entry.value();
        let mut relevant_nodes: Vec<(NodeId, f32)> = window
            .relevant_nodes
            .iter()
            .map(|item| (item.id, item.score))
            .collect();
        relevant_nodes.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut relevant_edges: Vec<(EdgeId, f32)> = window
            .relevant_edges
            .iter()
            .map(|item| (item.id, item.score))
            .collect();
        relevant_edges.sort_by(|a, b| b.1.total_cmp(&a.1));

        Some(WindowSnapshot {
            session_id: session_id.to_string(),
            recent_nodes: window.recent_nodes.iter().map(|i| i.id).collect(),
            recent_edges: window.recent_edges.iter().map(|i| i.id).collect(),
            relevant_nodes,
            relevant_edges,
            query_history: window.query_history.iter().cloned().collect(),
            last_active: window.last_active,
        })
    }

    /// Drop a session's window outright (session ended)
    pub fn end_session(&self, session_id: &str) -> bool {
        self.windows.remove(session_id).is_some()
    }

    /// A fresh window pre-filled with the recent and the relevant, so the
    /// first query of a session still has context to draw on
    fn seed_window(&self, store: &GraphStore, session_id: &str, now: DateTime<Utc>) -> SessionWindow {
        let mut window = SessionWindow::empty(now);

        let since = now - Duration::hours(self.config.seed_window_hours);
        match store.nodes_in_time_range(since, now) {
            Ok(mut nodes) => {
                nodes.retain(|n| !n.is_pruned);
                nodes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                for node in nodes.iter().take(self.config.max_recent_nodes) {
                    window.recent_nodes.push_back(WindowItem {
                        id: node.id,
                        score: node.relevance_score.max(0.1),
                        last_touched: node.timestamp,
                    });
                }
                for node in nodes.iter().take(self.config.max_recent_nodes) {
                    match store.edges_touching(node.id) {
                        Ok(edges) => self.seed_edges(&mut window, edges, now),
                        Err(e) => {
                            tracing::warn!("window seed: edges for {} failed: {e}", node.id)
                        }
                    }
                    if window.recent_edges.len() >= self.config.max_recent_edges {
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(session_id, "window seed (recent) failed: {e}"),
        }

        let relevant = Query {
            sort: vec![SortSpec::desc("relevance")],
            limit: self.config.max_relevant_nodes,
            ..Default::default()
        };
        match store.query_nodes(&relevant) {
            Ok(nodes) => {
                for node in nodes {
                    window.relevant_nodes.push(WindowItem {
                        id: node.id,
                        score: node.relevance_score,
                        last_touched: now,
                    });
                }
            }
            Err(e) => tracing::warn!(session_id, "window seed (relevant) failed: {e}"),
        }

        let strongest = Query {
            sort: vec![SortSpec::desc("strength")],
            limit: self.config.max_relevant_edges,
            target: QueryTarget::Edges,
            ..Default::default()
        };
        match store.query_edges(&strongest) {
            Ok(edges) => {
                for edge in edges {
                    window.fold_relevant_edge(
                        edge.id,
                        edge.strength,
                        self.config.max_relevant_edges,
                        now,
                    );
                }
            }
            Err(e) => tracing::warn!(session_id, "window seed (edges) failed: {e}"),
        }

        tracing::debug!(
            session_id,
            recent = window.recent_nodes.len(),
            relevant = window.relevant_nodes.len(),
            "seeded context window"
        );
        window
    }

    fn seed_edges(&self, window: &mut SessionWindow, edges: Vec<Edge>, now: DateTime<Utc>) {
        for edge in edges {
            if !edge.is_active || window.recent_edges.len() >= self.config.max_recent_edges {
                continue;
            }
            if window.recent_edges.iter().any(|item| item.id == edge.id) {
                continue;
            }
            window.recent_edges.push_back(WindowItem {
                id: edge.id,
                score: edge.strength,
                last_touched: now,
            });
        }
    }

    /// Store-side candidates for a query the window cannot cover
    fn supplement(&self, store: &GraphStore, query_text: &str, limit: usize) -> Result<Vec<Node>> {
        let terms: Vec<String> = query_text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .map(str::to_string)
            .collect();
        let query = if terms.is_empty() {
            Query {
                limit: limit * 2,
                ..Query::recent_default()
            }
        } else {
            Query {
                constraints: vec![crate::graph::query::Constraint::Semantic { terms }],
                sort: vec![SortSpec::desc("relevance")],
                limit: limit * 2,
                target: QueryTarget::Nodes,
                ..Default::default()
            }
        };
        store.query_nodes(&query)
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

    fn manager() -> ContextWindowManager {
        ContextWindowManager::new(ContextConfig::default())
    }

    fn add_node(store: &GraphStore, content: &str) -> Node {
        let node = Node::new(NodeType::Activity, content, Utc::now(), SourceType::Api);
        store.create_node(&node).unwrap();
        node
    }

    #[test]
    fn test_node_accesses_capped_most_recent_first() {
        let (_dir, store) = open_store();
        let manager = manager();
        let ids: Vec<NodeId> = (0..101)
            .map(|i| add_node(&store, &format!("note {i}")).id)
            .collect();

        for id in &ids {
            manager.record_interaction(&store, "s1", Interaction::NodeAccess(*id));
        }

        let snapshot = manager.snapshot("s1").unwrap();
        assert_eq!(snapshot.recent_nodes.len(), 50);
        // The 50 most recently accessed, most recent first
        let expected: Vec<NodeId> = ids[51..].iter().rev().copied().collect();
        assert_eq!(snapshot.recent_nodes, expected);
    }

    #[test]
    fn test_reaccess_moves_to_front_without_duplicate() {
        let (_dir, store) = open_store();
        let manager = manager();
        let a = add_node(&store, "first").id;
        let b = add_node(&store, "second").id;

        manager.record_interaction(&store, "s1", Interaction::NodeAccess(a));
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(b));
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(a));

        let snapshot = manager.snapshot("s1").unwrap();
        assert_eq!(snapshot.recent_nodes[0], a);
        assert_eq!(
            snapshot
                .recent_nodes
                .iter()
                .filter(|id| **id == a)
                .count(),
            1
        );
    }

    #[test]
    fn test_query_history_bounded() {
        let (_dir, store) = open_store();
        let manager = manager();
        let cap = ContextConfig::default().query_history;
        for i in 0..30 {
            manager.record_interaction(
                &store,
                "s1",
                Interaction::Query {
                    text: format!("query {i}"),
                    result_nodes: Vec::new(),
                },
            );
        }
        let snapshot = manager.snapshot("s1").unwrap();
        assert_eq!(snapshot.query_history.len(), cap);
        assert_eq!(snapshot.query_history.last().unwrap(), "query 29");
        assert_eq!(snapshot.query_history.first().unwrap(), &format!("query {}", 30 - cap));
    }

    #[test]
    fn test_window_seeded_from_store() {
        let (_dir, store) = open_store();
        let a = add_node(&store, "today's work");
        let b = add_node(&store, "other recent work");
        let edge = Edge::new(a.id, b.id, EdgeType::Temporal);
        store.create_edge(&edge).unwrap();

        let manager = manager();
        // First touch seeds from the store
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(a.id));
        let snapshot = manager.snapshot("s1").unwrap();
        assert!(snapshot.recent_nodes.contains(&b.id), "seeded recent node");
        assert!(snapshot.recent_edges.contains(&edge.id), "seeded recent edge");
        assert!(
            snapshot.relevant_edges.iter().any(|(id, _)| *id == edge.id),
            "strongest edges land in the relevant set"
        );
    }

    #[test]
    fn test_relevant_context_prefers_overlap() {
        let (_dir, store) = open_store();
        let manager = manager();
        let rust = add_node(&store, "rust compiler notes");
        let cooking = add_node(&store, "pasta recipe");
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(rust.id));
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(cooking.id));

        let results = manager
            .relevant_context(&store, "s1", "rust compiler", 2)
            .unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, rust.id, "overlap should outrank recency");

        // Folded back into the relevant set
        let snapshot = manager.snapshot("s1").unwrap();
        assert!(snapshot.relevant_nodes.iter().any(|(id, _)| *id == rust.id));
    }

    #[test]
    fn test_relevant_context_supplements_from_store() {
        let (_dir, store) = open_store();
        let manager = manager();
        // Bury the match below the relevance seed cutoff and outside the
        // recency seed window, so only store supplementation can reach it
        let mut node = Node::new(
            NodeType::Resource,
            "borrow checker deep dive",
            Utc::now() - Duration::days(10),
            SourceType::Api,
        );
        node.relevance_score = 0.05;
        node.last_accessed = Utc::now() - Duration::days(10);
        store.create_node(&node).unwrap();
        for i in 0..(ContextConfig::default().max_relevant_nodes + 5) {
            let mut filler = Node::new(
                NodeType::Activity,
                format!("unrelated filler {i}"),
                Utc::now() - Duration::days(10),
                SourceType::Api,
            );
            filler.last_accessed = Utc::now() - Duration::days(10);
            store.create_node(&filler).unwrap();
        }

        let results = manager
            .relevant_context(&store, "fresh-session", "borrow checker", 5)
            .unwrap();
        assert!(results.iter().any(|n| n.id == node.id));
        assert_eq!(results[0].id, node.id, "term match outranks idle fillers");
    }

    #[test]
    fn test_query_results_boost_but_do_not_admit() {
        let (_dir, store) = open_store();
        let manager = manager();
        let tracked = add_node(&store, "tracked").id;
        // Outside the seed window, never accessed: not in the window at all
        let untracked = Node::new(
            NodeType::Activity,
            "untracked",
            Utc::now() - Duration::days(3),
            SourceType::Api,
        );
        store.create_node(&untracked).unwrap();
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(tracked));

        manager.record_interaction(
            &store,
            "s1",
            Interaction::Query {
                text: "anything".to_string(),
                result_nodes: vec![tracked, untracked.id],
            },
        );
        let snapshot = manager.snapshot("s1").unwrap();
        assert!(snapshot.recent_nodes.contains(&tracked));
        assert!(
            !snapshot.recent_nodes.contains(&untracked.id),
            "query results alone do not enter the recent list"
        );
        assert_eq!(snapshot.query_history, vec!["anything".to_string()]);
    }

    #[test]
    fn test_decay_evicts_low_scores_and_idle_sessions() {
        let (_dir, store) = open_store();
        let config = ContextConfig {
            decay_factor: 0.5,
            eviction_threshold: 0.3,
            ..Default::default()
        };
        let manager = ContextWindowManager::new(config);
        let id = add_node(&store, "short-lived").id;
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(id));

        // 1.0 -> 0.5 -> 0.25 < 0.3, evicted on the second cycle
        manager.decay_windows();
        assert!(manager.snapshot("s1").unwrap().recent_nodes.contains(&id));
        let report = manager.decay_windows();
        assert!(report.items_evicted >= 1);
        assert!(!manager.snapshot("s1").unwrap().recent_nodes.contains(&id));
        // Session itself still alive (recently active)
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_end_session_drops_window() {
        let (_dir, store) = open_store();
        let manager = manager();
        let id = add_node(&store, "x").id;
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(id));
        assert_eq!(manager.session_count(), 1);
        assert!(manager.end_session("s1"));
        assert_eq!(manager.session_count(), 0);
        assert!(manager.snapshot("s1").is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let (_dir, store) = open_store();
        let manager = manager();
        let a = add_node(&store, "session one work").id;
        let b = add_node(&store, "session two work").id;
        manager.record_interaction(&store, "s1", Interaction::NodeAccess(a));
        manager.record_interaction(&store, "s2", Interaction::NodeAccess(b));

        let s1 = manager.snapshot("s1").unwrap();
        let s2 = manager.snapshot("s2").unwrap();
        assert_eq!(s1.recent_nodes[0], a);
        assert_eq!(s2.recent_nodes[0], b);
    }
}
