//! Session context window tests
//!
//! Exercises per-session working sets through the engine surface:
//! - recent-item lists cap at their configured size, most recent first
//! - queries land in session history; edge interactions are tracked
//! - context supplements never duplicate query results
//! - ending a session drops its state; sessions do not share history

use chrono::Utc;
use tempfile::TempDir;

use engram_graph::config::GraphConfig;
use engram_graph::constants::CONTEXT_MAX_RECENT_NODES;
use engram_graph::engine::MemoryGraph;
use engram_graph::graph::types::{
    Edge, EdgeType, InteractionKind, Node, NodeId, NodeType, SourceType,
};

// ============================================================================
// TEST INFRASTRUCTURE
// ============================================================================

fn test_engine() -> (TempDir, MemoryGraph) {
    let dir = TempDir::new().expect("temp dir");
    let engine = MemoryGraph::open(GraphConfig::at_path(dir.path())).expect("open engine");
    (dir, engine)
}

fn seed_nodes(engine: &MemoryGraph, count: usize, prefix: &str) -> Vec<NodeId> {
    (0..count)
        .map(|i| {
            let node = Node::new(
                NodeType::Activity,
                format!("{prefix} {i}"),
                Utc::now(),
                SourceType::Api,
            );
            engine.store().create_node(&node).expect("create node");
            node.id
        })
        .collect()
}

// ============================================================================
// RECENT-LIST CAPPING
// ============================================================================

#[test]
fn test_access_stream_caps_recent_nodes_most_recent_first() {
    let (_dir, engine) = test_engine();
    let ids = seed_nodes(&engine, 101, "touched item");

    for id in &ids {
        engine
            .record_node_access("s-cap", *id, InteractionKind::View)
            .expect("record access");
    }

    let snapshot = engine.context().snapshot("s-cap").expect("window exists");
    assert_eq!(snapshot.recent_nodes.len(), CONTEXT_MAX_RECENT_NODES);

    // The survivors are the last 50 touches, newest first
    let expected: Vec<NodeId> = ids[ids.len() - CONTEXT_MAX_RECENT_NODES..]
        .iter()
        .rev()
        .copied()
        .collect();
    assert_eq!(snapshot.recent_nodes, expected);
}

#[test]
fn test_reaccess_moves_node_to_front_without_duplicating() {
    let (_dir, engine) = test_engine();
    let ids = seed_nodes(&engine, 3, "revisited item");

    for id in &ids {
        engine
            .record_node_access("s-dedup", *id, InteractionKind::View)
            .expect("record access");
    }
    // Touch the first one again
    engine
        .record_node_access("s-dedup", ids[0], InteractionKind::Edit)
        .expect("record access");

    let snapshot = engine.context().snapshot("s-dedup").expect("window exists");
    assert_eq!(snapshot.recent_nodes[0], ids[0]);
    let occurrences = snapshot
        .recent_nodes
        .iter()
        .filter(|id| **id == ids[0])
        .count();
    assert_eq!(occurrences, 1);
}

// ============================================================================
// QUERY AND EDGE TRACKING
// ============================================================================

#[test]
fn test_queries_land_in_session_history() {
    let (_dir, engine) = test_engine();
    seed_nodes(&engine, 3, "standup summary");

    let outcome = engine.query_text("show me recent activities", "s-hist");
    assert!(outcome.success);
    assert!(outcome.translated.is_some());

    let snapshot = engine.context().snapshot("s-hist").expect("window exists");
    assert_eq!(
        snapshot.query_history,
        vec!["show me recent activities".to_string()]
    );
}

#[test]
fn test_edge_interaction_tracked_and_strengthened() {
    let (_dir, engine) = test_engine();
    let ids = seed_nodes(&engine, 2, "linked item");
    let edge = Edge::new(ids[0], ids[1], EdgeType::Semantic).with_strength(0.5);
    engine.store().create_edge(&edge).expect("create edge");

    engine
        .record_edge_interaction("s-edge", edge.id)
        .expect("record interaction");

    let snapshot = engine.context().snapshot("s-edge").expect("window exists");
    assert!(snapshot.recent_edges.contains(&edge.id));

    let stored = engine.store().get_edge(edge.id).expect("get edge");
    assert_eq!(stored.interaction_count, 1);
    assert!(stored.strength > 0.5, "traversal reinforces the edge");
}

#[test]
fn test_context_nodes_never_duplicate_results() {
    let (_dir, engine) = test_engine();
    seed_nodes(&engine, 8, "kernel profiling session");

    // Warm the window, then query
    let first = engine.query_text("kernel profiling", "s-ctx");
    assert!(first.success);
    let outcome = engine.query_text("kernel profiling", "s-ctx");

    let result_ids: Vec<NodeId> = outcome.nodes.iter().map(|n| n.id).collect();
    for ctx_node in &outcome.context_nodes {
        assert!(
            !result_ids.contains(&ctx_node.id),
            "context supplement repeated a result"
        );
    }
}

// ============================================================================
// SESSION LIFECYCLE
// ============================================================================

#[test]
fn test_end_session_drops_window_state() {
    let (_dir, engine) = test_engine();
    let ids = seed_nodes(&engine, 1, "ephemeral item");
    engine
        .record_node_access("s-end", ids[0], InteractionKind::View)
        .expect("record access");
    assert!(engine.context().snapshot("s-end").is_some());

    assert!(engine.end_session("s-end"));
    assert!(engine.context().snapshot("s-end").is_none());
    assert!(!engine.end_session("s-end"), "second end is a no-op");
}

#[test]
fn test_sessions_keep_separate_histories() {
    let (_dir, engine) = test_engine();
    seed_nodes(&engine, 2, "shared store item");

    engine.query_text("alpha release checklist", "s-one");
    engine.query_text("beta feedback triage", "s-two");

    let one = engine.context().snapshot("s-one").expect("window one");
    let two = engine.context().snapshot("s-two").expect("window two");
    assert_eq!(one.query_history, vec!["alpha release checklist".to_string()]);
    assert_eq!(two.query_history, vec!["beta feedback triage".to_string()]);
}
