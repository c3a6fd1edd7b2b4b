//! Versioned JSON snapshot export/import
//!
//! Design principles:
//! 1. Snapshot rows are decoupled from the storage structs so the on-disk
//!    bincode layout can evolve without breaking old snapshot files.
//! 2. UUIDs and `created_at` are preserved verbatim across round-trips.
//! 3. All enum-valued fields travel as lowercase snake_case strings.
//! 4. Node metadata travels as plain JSON objects (not the internal
//!    closed-enum representation).
//! 5. Import is fail-soft per row: undecodable rows and edges whose
//!    endpoints did not import are skipped and counted, never fatal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{GraphError, Result};
use crate::graph::types::{
    metadata_from_json, metadata_to_json, AuditAction, ClusterId, DetectedPattern, Edge, EdgeId,
    EdgeType, Node, NodeId, NodeType, PatternId, PatternKind, SourceType, TemporalCluster,
};
use crate::graph::{BatchOp, GraphStore};

/// Current snapshot format version. Readers accept any version up to this.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Rows per storage batch during import. Keeps per-batch memory bounded
/// while still amortizing write overhead.
const IMPORT_CHUNK: usize = 1_000;

// =============================================================================
// SCHEMA
// =============================================================================

/// Top-level snapshot document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub generator: SnapshotGenerator,
    pub exported_at: DateTime<Utc>,
    /// Integrity check over row counts; verified on import
    pub checksum: String,
    #[serde(default)]
    pub nodes: Vec<SnapshotNode>,
    #[serde(default)]
    pub edges: Vec<SnapshotEdge>,
    #[serde(default)]
    pub clusters: Vec<SnapshotCluster>,
    #[serde(default)]
    pub patterns: Vec<SnapshotPattern>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotGenerator {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: NodeId,
    /// Lowercase type string: "activity", "resource", "project",
    /// "pattern", "concept", "person"
    pub node_type: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub relevance_score: f32,
    #[serde(default = "default_one")]
    pub decay_factor: f32,
    #[serde(default)]
    pub degree: u32,
    #[serde(default)]
    pub clustering_coefficient: f32,
    #[serde(default)]
    pub centrality: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,
    #[serde(default = "default_one")]
    pub confidence: f32,
    pub source_type: String,
    #[serde(default)]
    pub is_pruned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    /// Lowercase type string: "temporal", "semantic", "causal", "spatial",
    /// "reference", "dependency", "association"
    pub edge_type: String,
    pub strength: f32,
    #[serde(default = "default_edge_decay")]
    pub decay_rate: f32,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub interaction_count: u32,
    pub last_interaction: DateTime<Utc>,
    #[serde(default)]
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCluster {
    pub id: ClusterId,
    pub node_ids: Vec<NodeId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub density: f64,
    pub confidence: f64,
    pub centroid: NodeId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPattern {
    pub id: PatternId,
    /// Lowercase kind string: "burst", "cycle", "trend", "anomaly"
    pub kind: String,
    pub confidence: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub description: String,
    pub magnitude: f64,
    pub detected_at: DateTime<Utc>,
}

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_edge_decay() -> f32 {
    crate::constants::EDGE_DEFAULT_DECAY_RATE
}

/// What an import did (and skipped)
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub nodes_imported: usize,
    pub edges_imported: usize,
    pub clusters_imported: usize,
    pub patterns_imported: usize,
    /// Rows with unrecognized type strings
    pub rows_skipped: usize,
    /// Edges whose endpoints did not import
    pub dangling_edges_skipped: usize,
    pub errors: Vec<String>,
}

// =============================================================================
// EXPORT
// =============================================================================

/// Build a snapshot of the entire store, pruned rows included
pub fn build_snapshot(store: &GraphStore) -> Result<Snapshot> {
    let nodes: Vec<SnapshotNode> = store.all_nodes()?.iter().map(node_to_row).collect();
    let edges: Vec<SnapshotEdge> = store.all_edges()?.iter().map(edge_to_row).collect();
    let clusters: Vec<SnapshotCluster> = store.clusters()?.iter().map(cluster_to_row).collect();
    let patterns: Vec<SnapshotPattern> = store.patterns()?.iter().map(pattern_to_row).collect();

    let checksum = compute_checksum(nodes.len(), edges.len(), clusters.len(), patterns.len());

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        generator: SnapshotGenerator {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        exported_at: Utc::now(),
        checksum,
        nodes,
        edges,
        clusters,
        patterns,
    })
}

fn compute_checksum(nodes: usize, edges: usize, clusters: usize, patterns: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{nodes}:{edges}:{clusters}:{patterns}"));
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn node_to_row(node: &Node) -> SnapshotNode {
    SnapshotNode {
        id: node.id,
        node_type: node.node_type.as_str().to_string(),
        timestamp: node.timestamp,
        content: node.content.clone(),
        metadata: metadata_to_json(&node.metadata),
        relevance_score: node.relevance_score,
        decay_factor: node.decay_factor,
        degree: node.degree,
        clustering_coefficient: node.clustering_coefficient,
        centrality: node.centrality,
        community_id: node.community_id.clone(),
        tags: node.tags.clone(),
        embedding: node.embedding.clone(),
        access_count: node.access_count,
        last_accessed: node.last_accessed,
        confidence: node.confidence,
        source_type: node.source_type.as_str().to_string(),
        is_pruned: node.is_pruned,
        created_at: node.created_at,
        updated_at: node.updated_at,
    }
}

fn edge_to_row(edge: &Edge) -> SnapshotEdge {
    SnapshotEdge {
        id: edge.id,
        source: edge.source,
        target: edge.target,
        edge_type: edge.edge_type.as_str().to_string(),
        strength: edge.strength,
        decay_rate: edge.decay_rate,
        bidirectional: edge.bidirectional,
        is_active: edge.is_active,
        interaction_count: edge.interaction_count,
        last_interaction: edge.last_interaction,
        context: edge.context.clone(),
        created_at: edge.created_at,
        updated_at: edge.updated_at,
    }
}

fn cluster_to_row(cluster: &TemporalCluster) -> SnapshotCluster {
    SnapshotCluster {
        id: cluster.id,
        node_ids: cluster.node_ids.clone(),
        start_time: cluster.start_time,
        end_time: cluster.end_time,
        density: cluster.density,
        confidence: cluster.confidence,
        centroid: cluster.centroid,
        created_at: cluster.created_at,
    }
}

fn pattern_to_row(pattern: &DetectedPattern) -> SnapshotPattern {
    SnapshotPattern {
        id: pattern.id,
        kind: pattern.kind.as_str().to_string(),
        confidence: pattern.confidence,
        window_start: pattern.window_start,
        window_end: pattern.window_end,
        description: pattern.description.clone(),
        magnitude: pattern.magnitude,
        detected_at: pattern.detected_at,
    }
}

// =============================================================================
// IMPORT
// =============================================================================

/// Restore a snapshot into an empty store.
///
/// The target must hold no nodes or edges; a populated store rejects the
/// import before anything is written. Rows are applied in chunks, so a
/// storage failure mid-import can leave a partially filled store — wipe
/// and retry in that case.
pub fn restore_snapshot(store: &GraphStore, snapshot: &Snapshot) -> Result<ImportReport> {
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(GraphError::InvalidInput {
            field: "version".to_string(),
            reason: format!(
                "snapshot version {} is newer than supported {}",
                snapshot.version, SNAPSHOT_VERSION
            ),
        });
    }

    let stats = store.stats();
    if stats.node_count > 0 || stats.edge_count > 0 {
        return Err(GraphError::SnapshotTargetNotEmpty {
            nodes: stats.node_count,
            edges: stats.edge_count,
        });
    }

    let expected = compute_checksum(
        snapshot.nodes.len(),
        snapshot.edges.len(),
        snapshot.clusters.len(),
        snapshot.patterns.len(),
    );
    if expected != snapshot.checksum {
        return Err(GraphError::InvalidInput {
            field: "checksum".to_string(),
            reason: format!("expected {}, found {}", expected, snapshot.checksum),
        });
    }

    let mut report = ImportReport::default();

    // Nodes first so edge foreign keys hold
    let mut imported_ids = std::collections::HashSet::with_capacity(snapshot.nodes.len());
    let mut ops = Vec::with_capacity(IMPORT_CHUNK);
    for row in &snapshot.nodes {
        match row_to_node(row) {
            Ok(node) => {
                imported_ids.insert(node.id);
                ops.push(BatchOp::CreateNode(node));
                report.nodes_imported += 1;
            }
            Err(reason) => {
                report.rows_skipped += 1;
                report.errors.push(format!("node {}: {reason}", row.id));
            }
        }
        if ops.len() >= IMPORT_CHUNK {
            store.apply_batch(std::mem::take(&mut ops))?;
        }
    }
    if !ops.is_empty() {
        store.apply_batch(std::mem::take(&mut ops))?;
    }

    for row in &snapshot.edges {
        if !imported_ids.contains(&row.source) || !imported_ids.contains(&row.target) {
            report.dangling_edges_skipped += 1;
            continue;
        }
        match row_to_edge(row) {
            Ok(edge) => {
                ops.push(BatchOp::CreateEdge(edge));
                report.edges_imported += 1;
            }
            Err(reason) => {
                report.rows_skipped += 1;
                report.errors.push(format!("edge {}: {reason}", row.id));
            }
        }
        if ops.len() >= IMPORT_CHUNK {
            store.apply_batch(std::mem::take(&mut ops))?;
        }
    }
    if !ops.is_empty() {
        store.apply_batch(ops)?;
    }

    // Clusters referencing skipped nodes keep only surviving members
    let mut clusters = Vec::new();
    for row in &snapshot.clusters {
        let mut cluster = row_to_cluster(row);
        cluster.node_ids.retain(|id| imported_ids.contains(id));
        if cluster.node_ids.is_empty() {
            report.rows_skipped += 1;
            continue;
        }
        if !imported_ids.contains(&cluster.centroid) {
            cluster.centroid = cluster.node_ids[0];
        }
        clusters.push(cluster);
        report.clusters_imported += 1;
    }
    if !clusters.is_empty() {
        store.replace_clusters(&clusters)?;
    }

    let mut patterns = Vec::new();
    for row in &snapshot.patterns {
        match row_to_pattern(row) {
            Ok(pattern) => {
                patterns.push(pattern);
                report.patterns_imported += 1;
            }
            Err(reason) => {
                report.rows_skipped += 1;
                report.errors.push(format!("pattern {}: {reason}", row.id));
            }
        }
    }
    if !patterns.is_empty() {
        store.store_patterns(&patterns)?;
    }

    store.record_audit(
        AuditAction::ImportSnapshot,
        snapshot.generator.name.clone(),
        Some(format!(
            "{} nodes, {} edges, {} clusters, {} patterns ({} rows skipped)",
            report.nodes_imported,
            report.edges_imported,
            report.clusters_imported,
            report.patterns_imported,
            report.rows_skipped
        )),
    )?;

    tracing::info!(
        "Snapshot restored: {} nodes, {} edges, {} skipped rows, {} dangling edges",
        report.nodes_imported,
        report.edges_imported,
        report.rows_skipped,
        report.dangling_edges_skipped
    );
    Ok(report)
}

fn row_to_node(row: &SnapshotNode) -> std::result::Result<Node, String> {
    let node_type = NodeType::parse(&row.node_type)
        .ok_or_else(|| format!("unknown node type {:?}", row.node_type))?;
    let source_type = SourceType::parse(&row.source_type)
        .ok_or_else(|| format!("unknown source type {:?}", row.source_type))?;
    if row.content.trim().is_empty() {
        return Err("empty content".to_string());
    }

    Ok(Node {
        id: row.id,
        node_type,
        timestamp: row.timestamp,
        content: row.content.clone(),
        metadata: metadata_from_json(row.metadata.clone()),
        relevance_score: row.relevance_score.clamp(0.0, 1.0),
        decay_factor: row.decay_factor,
        degree: row.degree,
        clustering_coefficient: row.clustering_coefficient,
        centrality: row.centrality,
        community_id: row.community_id.clone(),
        tags: row.tags.clone(),
        embedding: row.embedding.clone(),
        access_count: row.access_count,
        last_accessed: row.last_accessed,
        confidence: row.confidence.clamp(0.0, 1.0),
        source_type,
        is_pruned: row.is_pruned,
        // Preserved verbatim: import must not look like fresh creation
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_edge(row: &SnapshotEdge) -> std::result::Result<Edge, String> {
    let edge_type = EdgeType::parse(&row.edge_type)
        .ok_or_else(|| format!("unknown edge type {:?}", row.edge_type))?;

    Ok(Edge {
        id: row.id,
        source: row.source,
        target: row.target,
        edge_type,
        strength: row.strength.clamp(0.0, 1.0),
        decay_rate: row.decay_rate,
        bidirectional: row.bidirectional,
        is_active: row.is_active,
        interaction_count: row.interaction_count,
        last_interaction: row.last_interaction,
        context: row.context.clone(),
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn row_to_cluster(row: &SnapshotCluster) -> TemporalCluster {
    TemporalCluster {
        id: row.id,
        node_ids: row.node_ids.clone(),
        start_time: row.start_time,
        end_time: row.end_time,
        density: row.density,
        confidence: row.confidence,
        centroid: row.centroid,
        created_at: row.created_at,
    }
}

fn row_to_pattern(row: &SnapshotPattern) -> std::result::Result<DetectedPattern, String> {
    let kind =
        PatternKind::parse(&row.kind).ok_or_else(|| format!("unknown pattern kind {:?}", row.kind))?;
    Ok(DetectedPattern {
        id: row.id,
        kind,
        confidence: row.confidence,
        window_start: row.window_start,
        window_end: row.window_end,
        description: row.description.clone(),
        magnitude: row.magnitude,
        detected_at: row.detected_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::graph::types::MetaValue;
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

    fn seeded_store() -> (TempDir, GraphStore, Node, Node, Edge) {
        let (dir, store) = open_store();
        let mut a = Node::new(
            NodeType::Activity,
            "reviewed the migration plan",
            Utc::now(),
            SourceType::Api,
        );
        a.metadata
            .insert("app".to_string(), MetaValue::Text("editor".to_string()));
        a.tags.push("work".to_string());
        let b = Node::new(
            NodeType::Project,
            "database migration",
            Utc::now(),
            SourceType::System,
        );
        store.create_node(&a).unwrap();
        store.create_node(&b).unwrap();
        let edge = Edge::new(a.id, b.id, EdgeType::Reference);
        store.create_edge(&edge).unwrap();
        (dir, store, a, b, edge)
    }

    #[test]
    fn test_round_trip_preserves_ids_and_created_at() {
        let (_dir, store, a, _b, edge) = seeded_store();
        let snapshot = build_snapshot(&store).unwrap();

        let (_dir2, target) = open_store();
        let report = restore_snapshot(&target, &snapshot).unwrap();
        assert_eq!(report.nodes_imported, 2);
        assert_eq!(report.edges_imported, 1);
        assert_eq!(report.rows_skipped, 0);

        let restored = target.get_node(a.id).unwrap();
        assert_eq!(restored.created_at, a.created_at);
        assert_eq!(restored.content, a.content);
        assert_eq!(
            restored.metadata.get("app"),
            Some(&MetaValue::Text("editor".to_string()))
        );
        assert!(target.get_edge(edge.id).is_ok());
    }

    #[test]
    fn test_import_into_populated_store_rejected() {
        let (_dir, store, ..) = seeded_store();
        let snapshot = build_snapshot(&store).unwrap();

        match restore_snapshot(&store, &snapshot) {
            Err(GraphError::SnapshotTargetNotEmpty { nodes, .. }) => assert_eq!(nodes, 2),
            other => panic!("expected SnapshotTargetNotEmpty, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rows_skipped_not_fatal() {
        let (_dir, store, ..) = seeded_store();
        let mut snapshot = build_snapshot(&store).unwrap();
        snapshot.nodes[0].node_type = "hologram".to_string();

        let (_dir2, target) = open_store();
        let report = restore_snapshot(&target, &snapshot).unwrap();
        assert_eq!(report.nodes_imported, 1);
        assert_eq!(report.rows_skipped, 1);
        // The edge touched the skipped node, so it is dropped too
        assert_eq!(report.dangling_edges_skipped, 1);
        assert_eq!(report.edges_imported, 0);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let (_dir, store, ..) = seeded_store();
        let mut snapshot = build_snapshot(&store).unwrap();
        snapshot.checksum = "sha256:0000".to_string();

        let (_dir2, target) = open_store();
        match restore_snapshot(&target, &snapshot) {
            Err(GraphError::InvalidInput { field, .. }) => assert_eq!(field, "checksum"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_future_version_rejected() {
        let (_dir, store, ..) = seeded_store();
        let mut snapshot = build_snapshot(&store).unwrap();
        snapshot.version = SNAPSHOT_VERSION + 1;

        let (_dir2, target) = open_store();
        match restore_snapshot(&target, &snapshot) {
            Err(GraphError::InvalidInput { field, .. }) => assert_eq!(field, "version"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_serializes_to_plain_json() {
        let (_dir, store, ..) = seeded_store();
        let snapshot = build_snapshot(&store).unwrap();
        let json = serde_json::to_string(&snapshot).unwrap();

        // Type fields travel as lowercase strings, metadata as plain objects
        assert!(json.contains("\"node_type\":\"activity\""));
        assert!(json.contains("\"app\":\"editor\""));

        let parsed: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.nodes.len(), 2);
    }
}
