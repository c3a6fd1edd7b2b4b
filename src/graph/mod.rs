//! Embedded graph store
//!
//! Single RocksDB database holding every persistent entity under a prefixed
//! keyspace:
//!
//! ```text
//! node:{uuid}                  bincode Node
//! edge:{uuid}                  bincode Edge
//! cluster:{uuid}               bincode TemporalCluster
//! pattern:{uuid}               bincode DetectedPattern
//! audit:{millis:013}:{seq:06}  bincode AuditEntry (append-only)
//! stats                        bincode StoreStats
//! ix:type:{type}:{uuid}        node type index
//! ix:ts:{millis:013}:{uuid}    node event-time index (sortable)
//! ix:rel:{bucket:02}:{uuid}    node relevance bucket index
//! ix:pruned:{uuid}             soft-deleted node index
//! ix:tag:{tag}:{uuid}          node tag index
//! ix:etype:{type}:{uuid}       edge type index
//! ix:epair:{src}:{dst}:{type}  edge composite key -> edge uuid
//! ix:esrc:{src}:{uuid}         edge adjacency by source
//! ix:edst:{dst}:{uuid}         edge adjacency by target
//! ```
//!
//! One database (rather than a separate index database) so that a single
//! `WriteBatch` can atomically span primary rows and their index mutations:
//! batch operations are all-or-nothing including every secondary index.
//!
//! Mutations append an audit entry in the same batch; a failure to *build*
//! the audit record is logged and swallowed, never failing the mutation.

pub mod query;
pub mod snapshot;
pub mod types;

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::constants::RELEVANCE_BUCKETS;
use crate::errors::{GraphError, Result};
use query::{apply_page, sort_edges, sort_nodes, FilterOp, Query, QueryTarget};
use types::{
    AuditAction, AuditEntry, ClusterId, DetectedPattern, Edge, EdgeId, EdgeType, Node, NodeId,
    PatternId, StoreStats, TemporalCluster,
};

/// Maximum accepted node content size
///
/// 64KB comfortably holds page excerpts and long notes; anything larger is
/// a document that belongs in external storage with a Resource node
/// pointing at it.
pub const MAX_NODE_CONTENT_BYTES: usize = 64 * 1024;

/// Helper trait to safely iterate over RocksDB results with error logging.
/// Unlike `.flatten()` which silently ignores errors, this logs them.
trait LogErrors<T> {
    fn log_errors(self) -> impl Iterator<Item = T>;
}

impl<I, T, E> LogErrors<T> for I
where
    I: Iterator<Item = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    fn log_errors(self) -> impl Iterator<Item = T> {
        self.filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("RocksDB iterator error (continuing): {}", e);
                None
            }
        })
    }
}

/// Write durability mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// fsync() on every write (durable but slow: 2-10ms per write)
    Sync,
    /// No fsync(); data buffered in OS page cache (fast: <1ms per write).
    /// Survives process crashes but not power loss before the next fsync.
    Async,
}

impl Default for WriteMode {
    fn default() -> Self {
        // Default to async; override with ENGRAM_WRITE_MODE=sync for
        // durability-critical deployments
        match std::env::var("ENGRAM_WRITE_MODE") {
            Ok(mode) if mode.to_lowercase() == "sync" => WriteMode::Sync,
            _ => WriteMode::Async,
        }
    }
}

/// A single operation inside an atomic batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    CreateNode(Node),
    UpdateNode(Node),
    CreateEdge(Edge),
    UpdateEdge(Edge),
    /// Soft-delete a node and deactivate its active edges
    PruneNode(NodeId),
    DeactivateEdge(EdgeId),
    DeleteNode(NodeId),
    DeleteEdge(EdgeId),
}

/// What an applied batch did
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub nodes_written: usize,
    pub edges_written: usize,
    pub nodes_deleted: usize,
    pub edges_deleted: usize,
    pub edges_deactivated: usize,
}

/// Staged overlay of the database while a batch is being built.
/// `None` marks an entity deleted by an earlier op in the same batch.
#[derive(Default)]
struct BatchCtx {
    nodes: HashMap<NodeId, Option<Node>>,
    edges: HashMap<EdgeId, Option<Edge>>,
}

impl BatchCtx {
    fn node_view(&self, store: &GraphStore, id: NodeId) -> Result<Option<Node>> {
        match self.nodes.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => store.try_get_node(id),
        }
    }

    fn edge_view(&self, store: &GraphStore, id: EdgeId) -> Result<Option<Edge>> {
        match self.edges.get(&id) {
            Some(entry) => Ok(entry.clone()),
            None => match store.get_edge(id) {
                Ok(e) => Ok(Some(e)),
                Err(GraphError::EdgeNotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    /// Database edges touching the node, overlaid with this batch's staged
    /// creates, updates and deletes
    fn edges_touching_view(&self, store: &GraphStore, id: NodeId) -> Result<Vec<Edge>> {
        let mut by_id: HashMap<EdgeId, Edge> = store
            .edges_touching(id)?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        for (edge_id, entry) in &self.edges {
            match entry {
                Some(edge) if edge.touches(id) => {
                    by_id.insert(*edge_id, edge.clone());
                }
                _ => {
                    by_id.remove(edge_id);
                }
            }
        }
        Ok(by_id.into_values().collect())
    }
}

/// Signed counter adjustments accumulated while staging a batch,
/// applied only after the batch commits
#[derive(Debug, Default)]
struct CounterDelta {
    nodes: i64,
    pruned: i64,
    edges: i64,
    active_edges: i64,
    clusters: i64,
    patterns: i64,
}

/// The embedded graph store
pub struct GraphStore {
    db: Arc<DB>,
    path: PathBuf,
    write_mode: WriteMode,
    audit_seq: AtomicU64,
    audit_retention_days: i64,

    // O(1) aggregate stats, persisted on flush
    node_count: AtomicI64,
    pruned_count: AtomicI64,
    edge_count: AtomicI64,
    active_edge_count: AtomicI64,
    cluster_count: AtomicI64,
    pattern_count: AtomicI64,
}

impl GraphStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)
            .map_err(|e| GraphError::StorageError(format!("create data dir: {e}")))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // Write path tuning
        opts.set_max_write_buffer_number(4);
        opts.set_write_buffer_size(config.write_buffer_mb * 1024 * 1024);
        opts.set_level_zero_file_num_compaction_trigger(4);
        opts.set_max_background_jobs(4);
        opts.set_level_compaction_dynamic_level_bytes(true);

        // Read path tuning
        use rocksdb::{BlockBasedOptions, Cache};
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits/key = ~1% FPR
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_mb * 1024 * 1024));
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        let db_path = config.path.join("graph");
        let db = Arc::new(DB::open(&opts, db_path)?);

        let write_mode = WriteMode::default();
        tracing::info!(
            "Graph store opened at {:?} with {:?} writes",
            config.path,
            write_mode
        );

        let store = Self {
            db,
            path: config.path.clone(),
            write_mode,
            audit_seq: AtomicU64::new(0),
            audit_retention_days: config.audit_retention_days,
            node_count: AtomicI64::new(0),
            pruned_count: AtomicI64::new(0),
            edge_count: AtomicI64::new(0),
            active_edge_count: AtomicI64::new(0),
            cluster_count: AtomicI64::new(0),
            pattern_count: AtomicI64::new(0),
        };
        store.load_stats()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // CODEC
    // =========================================================================

    fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| GraphError::SerializationError(format!("encode {what}: {e}")))
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
        bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard())
            .map(|(v, _)| v)
            .map_err(|e| {
                GraphError::SerializationError(format!("decode {what} ({} bytes): {e}", bytes.len()))
            })
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.write_mode == WriteMode::Sync);
        write_opts
    }

    fn commit(&self, batch: WriteBatch, delta: CounterDelta) -> Result<()> {
        self.db.write_opt(batch, &self.write_opts())?;
        self.node_count.fetch_add(delta.nodes, Ordering::Relaxed);
        self.pruned_count.fetch_add(delta.pruned, Ordering::Relaxed);
        self.edge_count.fetch_add(delta.edges, Ordering::Relaxed);
        self.active_edge_count
            .fetch_add(delta.active_edges, Ordering::Relaxed);
        self.cluster_count.fetch_add(delta.clusters, Ordering::Relaxed);
        self.pattern_count.fetch_add(delta.patterns, Ordering::Relaxed);
        Ok(())
    }

    /// Iterate (key, value) pairs under a string prefix
    fn prefix_scan(&self, prefix: &str) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + '_ {
        let prefix_owned = prefix.to_string();
        self.db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward))
            .log_errors()
            .take_while(move |(key, _)| key.starts_with(prefix_owned.as_bytes()))
    }

    // =========================================================================
    // KEYS
    // =========================================================================

    fn node_key(id: NodeId) -> String {
        format!("node:{id}")
    }

    fn edge_key(id: EdgeId) -> String {
        format!("edge:{id}")
    }

    fn relevance_bucket(score: f32) -> u32 {
        (score.clamp(0.0, 1.0) * RELEVANCE_BUCKETS as f32) as u32
    }

    fn node_index_keys(node: &Node) -> Vec<String> {
        let mut keys = vec![
            format!("ix:type:{}:{}", node.node_type.as_str(), node.id),
            format!("ix:ts:{:013}:{}", node.timestamp.timestamp_millis(), node.id),
            format!(
                "ix:rel:{:02}:{}",
                Self::relevance_bucket(node.relevance_score),
                node.id
            ),
        ];
        if node.is_pruned {
            keys.push(format!("ix:pruned:{}", node.id));
        }
        for tag in &node.tags {
            keys.push(format!("ix:tag:{}:{}", tag.to_lowercase(), node.id));
        }
        keys
    }

    fn edge_pair_key(source: NodeId, target: NodeId, edge_type: EdgeType) -> String {
        format!("ix:epair:{}:{}:{}", source, target, edge_type.as_str())
    }

    fn edge_index_keys(edge: &Edge) -> Vec<String> {
        vec![
            format!("ix:etype:{}:{}", edge.edge_type.as_str(), edge.id),
            format!("ix:esrc:{}:{}", edge.source, edge.id),
            format!("ix:edst:{}:{}", edge.target, edge.id),
        ]
    }

    // =========================================================================
    // STAGING
    // Every mutation goes through these helpers so single operations and
    // batches share one index-maintenance path.
    // =========================================================================

    fn stage_node_put(
        &self,
        batch: &mut WriteBatch,
        node: &Node,
        old: Option<&Node>,
        delta: &mut CounterDelta,
    ) -> Result<()> {
        if let Some(old) = old {
            for key in Self::node_index_keys(old) {
                batch.delete(key.as_bytes());
            }
            match (old.is_pruned, node.is_pruned) {
                (false, true) => delta.pruned += 1,
                (true, false) => delta.pruned -= 1,
                _ => {}
            }
        } else {
            delta.nodes += 1;
            if node.is_pruned {
                delta.pruned += 1;
            }
        }

        let value = Self::encode(node, "node")?;
        batch.put(Self::node_key(node.id).as_bytes(), &value);
        for key in Self::node_index_keys(node) {
            batch.put(key.as_bytes(), b"1");
        }
        Ok(())
    }

    fn stage_node_delete(&self, batch: &mut WriteBatch, node: &Node, delta: &mut CounterDelta) {
        batch.delete(Self::node_key(node.id).as_bytes());
        for key in Self::node_index_keys(node) {
            batch.delete(key.as_bytes());
        }
        delta.nodes -= 1;
        if node.is_pruned {
            delta.pruned -= 1;
        }
    }

    fn stage_edge_put(
        &self,
        batch: &mut WriteBatch,
        edge: &Edge,
        old: Option<&Edge>,
        delta: &mut CounterDelta,
    ) -> Result<()> {
        if let Some(old) = old {
            for key in Self::edge_index_keys(old) {
                batch.delete(key.as_bytes());
            }
            batch.delete(Self::edge_pair_key(old.source, old.target, old.edge_type).as_bytes());
            match (old.is_active, edge.is_active) {
                (true, false) => delta.active_edges -= 1,
                (false, true) => delta.active_edges += 1,
                _ => {}
            }
        } else {
            delta.edges += 1;
            if edge.is_active {
                delta.active_edges += 1;
            }
        }

        let value = Self::encode(edge, "edge")?;
        batch.put(Self::edge_key(edge.id).as_bytes(), &value);
        for key in Self::edge_index_keys(edge) {
            batch.put(key.as_bytes(), b"1");
        }
        // Composite key points at the edge id for O(1) duplicate checks
        batch.put(
            Self::edge_pair_key(edge.source, edge.target, edge.edge_type).as_bytes(),
            edge.id.to_string().as_bytes(),
        );
        Ok(())
    }

    fn stage_edge_delete(&self, batch: &mut WriteBatch, edge: &Edge, delta: &mut CounterDelta) {
        batch.delete(Self::edge_key(edge.id).as_bytes());
        for key in Self::edge_index_keys(edge) {
            batch.delete(key.as_bytes());
        }
        batch.delete(Self::edge_pair_key(edge.source, edge.target, edge.edge_type).as_bytes());
        delta.edges -= 1;
        if edge.is_active {
            delta.active_edges -= 1;
        }
    }

    /// Append an audit entry to the batch. Building the record can fail
    /// (serialization); that is logged and swallowed — audit never fails a
    /// mutation.
    fn stage_audit(
        &self,
        batch: &mut WriteBatch,
        action: AuditAction,
        entity_id: String,
        detail: Option<String>,
    ) {
        let entry = AuditEntry {
            action,
            entity_id,
            timestamp: Utc::now(),
            detail,
        };
        match Self::encode(&entry, "audit entry") {
            Ok(value) => {
                let seq = self.audit_seq.fetch_add(1, Ordering::Relaxed);
                let key = format!(
                    "audit:{:013}:{:06}",
                    entry.timestamp.timestamp_millis(),
                    seq % 1_000_000
                );
                batch.put(key.as_bytes(), &value);
            }
            Err(e) => {
                tracing::warn!("audit entry dropped ({}): {}", entry.action.as_str(), e);
            }
        }
    }

    // =========================================================================
    // NODE CRUD
    // =========================================================================

    fn validate_node(node: &Node) -> Result<()> {
        if node.content.trim().is_empty() {
            return Err(GraphError::InvalidInput {
                field: "content".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if node.content.len() > MAX_NODE_CONTENT_BYTES {
            return Err(GraphError::InvalidInput {
                field: "content".to_string(),
                reason: format!(
                    "{} bytes exceeds maximum {}",
                    node.content.len(),
                    MAX_NODE_CONTENT_BYTES
                ),
            });
        }
        if !node.relevance_score.is_finite() || !node.confidence.is_finite() {
            return Err(GraphError::InvalidInput {
                field: "relevance_score".to_string(),
                reason: "scores must be finite".to_string(),
            });
        }
        Ok(())
    }

    pub fn create_node(&self, node: &Node) -> Result<()> {
        Self::validate_node(node)?;
        if self.node_exists(node.id)? {
            return Err(GraphError::InvalidInput {
                field: "id".to_string(),
                reason: format!("node {} already exists", node.id),
            });
        }

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        self.stage_node_put(&mut batch, node, None, &mut delta)?;
        self.stage_audit(&mut batch, AuditAction::CreateNode, node.id.to_string(), None);
        self.commit(batch, delta)
    }

    pub fn node_exists(&self, id: NodeId) -> Result<bool> {
        Ok(self.db.get(Self::node_key(id).as_bytes())?.is_some())
    }

    /// Fetch a node, pruned or not
    pub fn get_node(&self, id: NodeId) -> Result<Node> {
        match self.db.get(Self::node_key(id).as_bytes())? {
            Some(value) => Self::decode(&value, "node"),
            None => Err(GraphError::NodeNotFound(id.to_string())),
        }
    }

    pub fn try_get_node(&self, id: NodeId) -> Result<Option<Node>> {
        match self.db.get(Self::node_key(id).as_bytes())? {
            Some(value) => Ok(Some(Self::decode(&value, "node")?)),
            None => Ok(None),
        }
    }

    /// Overwrite a node, reconciling every index it appears in
    pub fn update_node(&self, node: &Node) -> Result<()> {
        Self::validate_node(node)?;
        let old = self.get_node(node.id)?;

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        self.stage_node_put(&mut batch, node, Some(&old), &mut delta)?;
        self.stage_audit(&mut batch, AuditAction::UpdateNode, node.id.to_string(), None);
        self.commit(batch, delta)
    }

    /// Hard-delete a node and every edge touching it, atomically
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        let node = self.get_node(id)?;
        let edges = self.edges_touching(id)?;

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        for edge in &edges {
            self.stage_edge_delete(&mut batch, edge, &mut delta);
            self.stage_audit(
                &mut batch,
                AuditAction::DeleteEdge,
                edge.id.to_string(),
                Some(format!("cascade from node {id}")),
            );
        }
        self.stage_node_delete(&mut batch, &node, &mut delta);
        self.stage_audit(&mut batch, AuditAction::DeleteNode, id.to_string(), None);
        self.commit(batch, delta)
    }

    // =========================================================================
    // EDGE CRUD
    // =========================================================================

    fn validate_edge_endpoints(&self, edge: &Edge) -> Result<()> {
        if edge.source == edge.target {
            return Err(GraphError::InvalidInput {
                field: "target".to_string(),
                reason: "self-edges are not allowed".to_string(),
            });
        }
        if !self.node_exists(edge.source)? {
            return Err(GraphError::NodeNotFound(edge.source.to_string()));
        }
        if !self.node_exists(edge.target)? {
            return Err(GraphError::NodeNotFound(edge.target.to_string()));
        }
        Ok(())
    }

    pub fn create_edge(&self, edge: &Edge) -> Result<()> {
        self.validate_edge_endpoints(edge)?;
        if edge.is_active {
            if let Some(existing) = self.find_edge_between(edge.source, edge.target, edge.edge_type)? {
                if existing.is_active {
                    return Err(GraphError::DuplicateEdge {
                        source: edge.source.to_string(),
                        target: edge.target.to_string(),
                    });
                }
            }
        }

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        self.stage_edge_put(&mut batch, edge, None, &mut delta)?;
        self.stage_audit(&mut batch, AuditAction::CreateEdge, edge.id.to_string(), None);
        self.commit(batch, delta)
    }

    pub fn get_edge(&self, id: EdgeId) -> Result<Edge> {
        match self.db.get(Self::edge_key(id).as_bytes())? {
            Some(value) => Self::decode(&value, "edge"),
            None => Err(GraphError::EdgeNotFound(id.to_string())),
        }
    }

    pub fn update_edge(&self, edge: &Edge) -> Result<()> {
        let old = self.get_edge(edge.id)?;
        // Rewiring an edge to different endpoints must revalidate them
        if old.source != edge.source || old.target != edge.target {
            self.validate_edge_endpoints(edge)?;
        }

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        self.stage_edge_put(&mut batch, edge, Some(&old), &mut delta)?;
        self.stage_audit(&mut batch, AuditAction::UpdateEdge, edge.id.to_string(), None);
        self.commit(batch, delta)
    }

    pub fn delete_edge(&self, id: EdgeId) -> Result<()> {
        let edge = self.get_edge(id)?;
        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        self.stage_edge_delete(&mut batch, &edge, &mut delta);
        self.stage_audit(&mut batch, AuditAction::DeleteEdge, id.to_string(), None);
        self.commit(batch, delta)
    }

    /// O(1) lookup via the composite index
    pub fn find_edge_between(
        &self,
        source: NodeId,
        target: NodeId,
        edge_type: EdgeType,
    ) -> Result<Option<Edge>> {
        let key = Self::edge_pair_key(source, target, edge_type);
        match self.db.get(key.as_bytes())? {
            Some(value) => {
                let id_str = String::from_utf8_lossy(&value);
                match id_str.parse::<EdgeId>() {
                    Ok(id) => Ok(Some(self.get_edge(id)?)),
                    Err(_) => {
                        tracing::warn!("corrupt epair index value for {key}, ignoring");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// All edges with this node as either endpoint (active or not)
    pub fn edges_touching(&self, id: NodeId) -> Result<Vec<Edge>> {
        let mut seen = std::collections::HashSet::new();
        let mut edges = Vec::new();
        for prefix in [format!("ix:esrc:{id}:"), format!("ix:edst:{id}:")] {
            for (key, _) in self.prefix_scan(&prefix) {
                let key_str = String::from_utf8_lossy(&key);
                if let Some(edge_id) = key_str.strip_prefix(&prefix) {
                    if let Ok(edge_id) = edge_id.parse::<EdgeId>() {
                        if seen.insert(edge_id) {
                            match self.get_edge(edge_id) {
                                Ok(edge) => edges.push(edge),
                                Err(e) => {
                                    tracing::warn!("adjacency index points at missing edge: {e}")
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(edges)
    }

    /// Active neighbor edges, optionally restricted to one edge type
    pub fn neighbors(&self, id: NodeId, via: Option<EdgeType>) -> Result<Vec<Edge>> {
        let mut edges = self.edges_touching(id)?;
        edges.retain(|e| e.is_active && via.map_or(true, |t| e.edge_type == t));
        Ok(edges)
    }

    /// Count of active edges touching the node
    pub fn active_degree(&self, id: NodeId) -> Result<u32> {
        Ok(self.neighbors(id, None)?.len() as u32)
    }

    // =========================================================================
    // ATOMIC BATCHES
    // Single validate-and-stage pass. Ops are checked against a staged
    // overlay of the database (so later ops may reference entities earlier
    // ops created), and staged into one WriteBatch as they validate. Any
    // rejection drops the uncommitted batch: all succeed or none are
    // written, secondary indexes included.
    // =========================================================================

    pub fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<BatchReport> {
        let mut ctx = BatchCtx::default();
        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        let mut report = BatchReport::default();

        for (index, op) in ops.into_iter().enumerate() {
            self.stage_op(op, index, &mut ctx, &mut batch, &mut delta, &mut report)
                .map_err(|e| match e {
                    GraphError::BatchRejected { .. } => e,
                    other => GraphError::BatchRejected {
                        index,
                        reason: other.message(),
                    },
                })?;
        }

        self.commit(batch, delta)?;
        Ok(report)
    }

    fn stage_op(
        &self,
        op: BatchOp,
        index: usize,
        ctx: &mut BatchCtx,
        batch: &mut WriteBatch,
        delta: &mut CounterDelta,
        report: &mut BatchReport,
    ) -> Result<()> {
        let reject = |reason: String| GraphError::BatchRejected { index, reason };

        match op {
            BatchOp::CreateNode(node) => {
                Self::validate_node(&node)?;
                if ctx.node_view(self, node.id)?.is_some() {
                    return Err(reject(format!("node {} already exists", node.id)));
                }
                self.stage_node_put(batch, &node, None, delta)?;
                self.stage_audit(batch, AuditAction::CreateNode, node.id.to_string(), None);
                ctx.nodes.insert(node.id, Some(node));
                report.nodes_written += 1;
            }
            BatchOp::UpdateNode(node) => {
                Self::validate_node(&node)?;
                let old = ctx
                    .node_view(self, node.id)?
                    .ok_or_else(|| reject(format!("node {} not found", node.id)))?;
                self.stage_node_put(batch, &node, Some(&old), delta)?;
                self.stage_audit(batch, AuditAction::UpdateNode, node.id.to_string(), None);
                ctx.nodes.insert(node.id, Some(node));
                report.nodes_written += 1;
            }
            BatchOp::CreateEdge(edge) => {
                if edge.source == edge.target {
                    return Err(reject("self-edges are not allowed".to_string()));
                }
                // Foreign keys hold against the staged view: an edge may
                // reference a node created earlier in this batch
                if ctx.node_view(self, edge.source)?.is_none() {
                    return Err(reject(format!("source node {} not found", edge.source)));
                }
                if ctx.node_view(self, edge.target)?.is_none() {
                    return Err(reject(format!("target node {} not found", edge.target)));
                }
                if edge.is_active && self.staged_duplicate_exists(ctx, &edge)? {
                    return Err(reject(format!(
                        "active {} edge already exists between {} and {}",
                        edge.edge_type.as_str(),
                        edge.source,
                        edge.target
                    )));
                }
                self.stage_edge_put(batch, &edge, None, delta)?;
                self.stage_audit(batch, AuditAction::CreateEdge, edge.id.to_string(), None);
                ctx.edges.insert(edge.id, Some(edge));
                report.edges_written += 1;
            }
            BatchOp::UpdateEdge(edge) => {
                let old = ctx
                    .edge_view(self, edge.id)?
                    .ok_or_else(|| reject(format!("edge {} not found", edge.id)))?;
                if ctx.node_view(self, edge.source)?.is_none()
                    || ctx.node_view(self, edge.target)?.is_none()
                {
                    return Err(reject("edge endpoints must exist".to_string()));
                }
                self.stage_edge_put(batch, &edge, Some(&old), delta)?;
                self.stage_audit(batch, AuditAction::UpdateEdge, edge.id.to_string(), None);
                ctx.edges.insert(edge.id, Some(edge));
                report.edges_written += 1;
            }
            BatchOp::PruneNode(id) => {
                // Soft-delete plus cascade deactivation of active edges,
                // all inside this same atomic batch
                let old = ctx
                    .node_view(self, id)?
                    .ok_or_else(|| reject(format!("node {id} not found")))?;
                if old.is_pruned {
                    return Ok(()); // idempotent
                }
                let mut node = old.clone();
                node.mark_pruned();
                self.stage_node_put(batch, &node, Some(&old), delta)?;
                self.stage_audit(batch, AuditAction::PruneNode, id.to_string(), None);
                ctx.nodes.insert(id, Some(node));
                report.nodes_written += 1;

                for old_edge in ctx.edges_touching_view(self, id)? {
                    if !old_edge.is_active {
                        continue;
                    }
                    let mut edge = old_edge.clone();
                    edge.deactivate();
                    self.stage_edge_put(batch, &edge, Some(&old_edge), delta)?;
                    self.stage_audit(
                        batch,
                        AuditAction::DeactivateEdge,
                        edge.id.to_string(),
                        Some(format!("cascade from pruned node {id}")),
                    );
                    ctx.edges.insert(edge.id, Some(edge));
                    report.edges_deactivated += 1;
                }
            }
            BatchOp::DeactivateEdge(id) => {
                let old = ctx
                    .edge_view(self, id)?
                    .ok_or_else(|| reject(format!("edge {id} not found")))?;
                if !old.is_active {
                    return Ok(()); // idempotent
                }
                let mut edge = old.clone();
                edge.deactivate();
                self.stage_edge_put(batch, &edge, Some(&old), delta)?;
                self.stage_audit(batch, AuditAction::DeactivateEdge, id.to_string(), None);
                ctx.edges.insert(id, Some(edge));
                report.edges_deactivated += 1;
            }
            BatchOp::DeleteNode(id) => {
                let node = ctx
                    .node_view(self, id)?
                    .ok_or_else(|| reject(format!("node {id} not found")))?;
                for edge in ctx.edges_touching_view(self, id)? {
                    self.stage_edge_delete(batch, &edge, delta);
                    ctx.edges.insert(edge.id, None);
                    report.edges_deleted += 1;
                }
                self.stage_node_delete(batch, &node, delta);
                self.stage_audit(batch, AuditAction::DeleteNode, id.to_string(), None);
                ctx.nodes.insert(id, None);
                report.nodes_deleted += 1;
            }
            BatchOp::DeleteEdge(id) => {
                let edge = ctx
                    .edge_view(self, id)?
                    .ok_or_else(|| reject(format!("edge {id} not found")))?;
                self.stage_edge_delete(batch, &edge, delta);
                self.stage_audit(batch, AuditAction::DeleteEdge, id.to_string(), None);
                ctx.edges.insert(id, None);
                report.edges_deleted += 1;
            }
        }
        Ok(())
    }

    fn staged_duplicate_exists(&self, ctx: &BatchCtx, edge: &Edge) -> Result<bool> {
        let staged_hit = ctx.edges.values().flatten().any(|e| {
            e.is_active
                && e.source == edge.source
                && e.target == edge.target
                && e.edge_type == edge.edge_type
        });
        if staged_hit {
            return Ok(true);
        }
        // DB hit counts only if this batch has not replaced or removed it
        Ok(self
            .find_edge_between(edge.source, edge.target, edge.edge_type)?
            .map(|e| e.is_active && !ctx.edges.contains_key(&e.id))
            .unwrap_or(false))
    }

    // =========================================================================
    // QUERY EXECUTION
    // Pick the most selective index available, then run every candidate
    // through Query::matches_* (the single source of truth).
    // =========================================================================

    pub fn query_nodes(&self, query: &Query) -> Result<Vec<Node>> {
        debug_assert!(query.target == QueryTarget::Nodes);

        let mut nodes = match self.candidate_node_ids(query)? {
            Some(ids) => self.load_nodes(&ids),
            None => self.all_nodes()?,
        };

        nodes.retain(|n| query.matches_node(n));
        sort_nodes(&mut nodes, &query.sort);
        Ok(apply_page(nodes, query.offset, query.limit))
    }

    pub fn query_edges(&self, query: &Query) -> Result<Vec<Edge>> {
        let mut edges = if let Some((node, via)) = query.structural() {
            self.edges_touching(node)?
                .into_iter()
                .filter(|e| via.map_or(true, |t| e.edge_type == t))
                .collect()
        } else if let Some(edge_type) = Self::pinned_edge_type(query) {
            let prefix = format!("ix:etype:{}:", edge_type.as_str());
            let ids = self.ids_under_prefix::<EdgeId>(&prefix);
            ids.into_iter()
                .filter_map(|id| match self.get_edge(id) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        tracing::warn!("etype index points at missing edge: {e}");
                        None
                    }
                })
                .collect()
        } else {
            self.all_edges()?
        };

        edges.retain(|e| query.matches_edge(e));
        sort_edges(&mut edges, &query.sort);
        Ok(apply_page(edges, query.offset, query.limit))
    }

    fn pinned_edge_type(query: &Query) -> Option<EdgeType> {
        query.filters.iter().find_map(|f| {
            if f.negate {
                return None;
            }
            let field_is_type = matches!(f.field.as_str(), "type" | "edge_type");
            if field_is_type && f.op == FilterOp::Eq {
                f.value.as_str().and_then(EdgeType::parse)
            } else {
                None
            }
        })
    }

    /// Index selection. Returns None when only a full scan can serve the
    /// query. Order of preference: structural adjacency, pinned type,
    /// tag, time range, relevance threshold.
    fn candidate_node_ids(&self, query: &Query) -> Result<Option<Vec<NodeId>>> {
        if let Some((node, via)) = query.structural() {
            let mut ids: Vec<NodeId> = self
                .neighbors(node, via)?
                .into_iter()
                .filter_map(|e| e.other_endpoint(node))
                .collect();
            ids.dedup();
            return Ok(Some(ids));
        }

        if let Some(node_type) = query.pinned_node_type() {
            let prefix = format!("ix:type:{}:", node_type.as_str());
            return Ok(Some(self.ids_under_prefix::<NodeId>(&prefix)));
        }

        if let Some(tag) = Self::pinned_tag(query) {
            let prefix = format!("ix:tag:{}:", tag.to_lowercase());
            return Ok(Some(self.ids_under_prefix::<NodeId>(&prefix)));
        }

        if let Some((start, end)) = query.time_range() {
            if start.is_some() || end.is_some() {
                return Ok(Some(self.ids_in_time_range(start, end)));
            }
        }

        if let Some(threshold) = query.context.relevance_threshold {
            return Ok(Some(self.ids_with_relevance_at_least(threshold)));
        }

        Ok(None)
    }

    fn pinned_tag(query: &Query) -> Option<String> {
        query.filters.iter().find_map(|f| {
            if !f.negate && f.field == "tags" && f.op == FilterOp::Contains {
                f.value.as_str().map(|s| s.to_string())
            } else {
                None
            }
        })
    }

    fn ids_under_prefix<T: std::str::FromStr>(&self, prefix: &str) -> Vec<T> {
        let mut ids = Vec::new();
        for (key, _) in self.prefix_scan(prefix) {
            let key_str = String::from_utf8_lossy(&key);
            if let Some(id_str) = key_str.strip_prefix(prefix) {
                if let Ok(id) = id_str.parse::<T>() {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// Sorted scan over the event-time index
    fn ids_in_time_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<NodeId> {
        let start_key = match start {
            Some(ts) => format!("ix:ts:{:013}", ts.timestamp_millis()),
            None => "ix:ts:".to_string(),
        };
        let end_millis = end.map(|ts| ts.timestamp_millis());

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start_key.as_bytes(), Direction::Forward));
        for (key, _) in iter.log_errors() {
            if !key.starts_with(b"ix:ts:") {
                break;
            }
            let key_str = String::from_utf8_lossy(&key);
            // ix:ts:{millis:013}:{uuid}
            let rest = match key_str.strip_prefix("ix:ts:") {
                Some(r) => r,
                None => break,
            };
            let (millis_str, id_str) = match rest.split_once(':') {
                Some(parts) => parts,
                None => continue,
            };
            if let Some(end_millis) = end_millis {
                match millis_str.parse::<i64>() {
                    Ok(millis) if millis > end_millis => break,
                    Ok(_) => {}
                    Err(_) => continue,
                }
            }
            if let Ok(id) = id_str.parse::<NodeId>() {
                ids.push(id);
            }
        }
        ids
    }

    fn ids_with_relevance_at_least(&self, threshold: f32) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let from_bucket = Self::relevance_bucket(threshold);
        for bucket in from_bucket..=RELEVANCE_BUCKETS {
            let prefix = format!("ix:rel:{bucket:02}:");
            ids.extend(self.ids_under_prefix::<NodeId>(&prefix));
        }
        ids
    }

    fn load_nodes(&self, ids: &[NodeId]) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.try_get_node(*id) {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => tracing::warn!("index points at missing node {id}"),
                Err(e) => tracing::warn!("failed to load node {id}: {e}"),
            }
        }
        nodes
    }

    pub fn all_nodes(&self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        for (_, value) in self.prefix_scan("node:") {
            match Self::decode::<Node>(&value, "node") {
                Ok(node) => nodes.push(node),
                Err(e) => tracing::warn!("skipping undecodable node row: {e}"),
            }
        }
        Ok(nodes)
    }

    pub fn all_node_ids(&self) -> Result<Vec<NodeId>> {
        Ok(self.ids_under_prefix::<NodeId>("node:"))
    }

    pub fn all_edges(&self) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();
        for (_, value) in self.prefix_scan("edge:") {
            match Self::decode::<Edge>(&value, "edge") {
                Ok(edge) => edges.push(edge),
                Err(e) => tracing::warn!("skipping undecodable edge row: {e}"),
            }
        }
        Ok(edges)
    }

    /// Nodes whose event time falls inside [start, end], in time order
    pub fn nodes_in_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Node>> {
        let ids = self.ids_in_time_range(Some(start), Some(end));
        Ok(self.load_nodes(&ids))
    }

    /// Active (non-pruned) nodes below the relevance threshold
    pub fn nodes_below_relevance(&self, threshold: f32) -> Result<Vec<Node>> {
        let mut ids = Vec::new();
        let to_bucket = Self::relevance_bucket(threshold);
        for bucket in 0..=to_bucket {
            let prefix = format!("ix:rel:{bucket:02}:");
            ids.extend(self.ids_under_prefix::<NodeId>(&prefix));
        }
        let mut nodes = self.load_nodes(&ids);
        nodes.retain(|n| !n.is_pruned && n.relevance_score < threshold);
        Ok(nodes)
    }

    /// Ids of soft-deleted nodes
    pub fn pruned_node_ids(&self) -> Result<Vec<NodeId>> {
        Ok(self.ids_under_prefix::<NodeId>("ix:pruned:"))
    }

    // =========================================================================
    // CLUSTERS & PATTERNS
    // =========================================================================

    /// Replace all stored clusters with a fresh run's output
    pub fn replace_clusters(&self, clusters: &[TemporalCluster]) -> Result<()> {
        let old = self.clusters()?;

        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        for cluster in &old {
            batch.delete(format!("cluster:{}", cluster.id).as_bytes());
            delta.clusters -= 1;
        }
        for cluster in clusters {
            let value = Self::encode(cluster, "cluster")?;
            batch.put(format!("cluster:{}", cluster.id).as_bytes(), &value);
            delta.clusters += 1;
            self.stage_audit(&mut batch, AuditAction::StoreCluster, cluster.id.to_string(), None);
        }
        self.commit(batch, delta)
    }

    pub fn clusters(&self) -> Result<Vec<TemporalCluster>> {
        let mut clusters = Vec::new();
        for (_, value) in self.prefix_scan("cluster:") {
            match Self::decode::<TemporalCluster>(&value, "cluster") {
                Ok(c) => clusters.push(c),
                Err(e) => tracing::warn!("skipping undecodable cluster row: {e}"),
            }
        }
        clusters.sort_by_key(|c| c.start_time);
        Ok(clusters)
    }

    pub fn delete_clusters(&self, ids: &[ClusterId]) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        for id in ids {
            batch.delete(format!("cluster:{id}").as_bytes());
            delta.clusters -= 1;
            self.stage_audit(&mut batch, AuditAction::DeleteCluster, id.to_string(), None);
        }
        self.commit(batch, delta)?;
        Ok(ids.len())
    }

    pub fn store_patterns(&self, patterns: &[DetectedPattern]) -> Result<()> {
        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        for pattern in patterns {
            let value = Self::encode(pattern, "pattern")?;
            batch.put(format!("pattern:{}", pattern.id).as_bytes(), &value);
            delta.patterns += 1;
            self.stage_audit(&mut batch, AuditAction::StorePattern, pattern.id.to_string(), None);
        }
        self.commit(batch, delta)
    }

    pub fn patterns(&self) -> Result<Vec<DetectedPattern>> {
        let mut patterns = Vec::new();
        for (_, value) in self.prefix_scan("pattern:") {
            match Self::decode::<DetectedPattern>(&value, "pattern") {
                Ok(p) => patterns.push(p),
                Err(e) => tracing::warn!("skipping undecodable pattern row: {e}"),
            }
        }
        patterns.sort_by_key(|p| p.window_start);
        Ok(patterns)
    }

    pub fn delete_patterns(&self, ids: &[PatternId]) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut delta = CounterDelta::default();
        for id in ids {
            batch.delete(format!("pattern:{id}").as_bytes());
            delta.patterns -= 1;
            self.stage_audit(&mut batch, AuditAction::DeletePattern, id.to_string(), None);
        }
        self.commit(batch, delta)?;
        Ok(ids.len())
    }

    // =========================================================================
    // AUDIT LOG
    // =========================================================================

    /// Append a standalone audit entry outside any mutation batch
    pub fn record_audit(
        &self,
        action: AuditAction,
        entity_id: impl Into<String>,
        detail: Option<String>,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_audit(&mut batch, action, entity_id.into(), detail);
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    /// Audit entries at or after `since`, oldest first
    pub fn audit_entries(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>> {
        let start_key = match since {
            Some(ts) => format!("audit:{:013}", ts.timestamp_millis()),
            None => "audit:".to_string(),
        };
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start_key.as_bytes(), Direction::Forward));
        for (key, value) in iter.log_errors() {
            if !key.starts_with(b"audit:") {
                break;
            }
            match Self::decode::<AuditEntry>(&value, "audit entry") {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("skipping undecodable audit row: {e}"),
            }
            if entries.len() >= limit {
                break;
            }
        }
        Ok(entries)
    }

    /// Remove audit entries older than the cutoff; returns how many
    pub fn trim_audit_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_millis = cutoff.timestamp_millis();
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;
        for (key, _) in self.prefix_scan("audit:") {
            let key_str = String::from_utf8_lossy(&key);
            let millis = key_str
                .strip_prefix("audit:")
                .and_then(|rest| rest.split(':').next())
                .and_then(|m| m.parse::<i64>().ok());
            match millis {
                Some(m) if m < cutoff_millis => {
                    batch.delete(&key);
                    removed += 1;
                }
                Some(_) => break, // keys are time-ordered
                None => continue,
            }
        }
        if removed > 0 {
            self.db.write_opt(batch, &self.write_opts())?;
        }
        Ok(removed)
    }

    pub fn audit_retention_days(&self) -> i64 {
        self.audit_retention_days
    }

    // =========================================================================
    // GC PRIMITIVES (driven by the pruning engine)
    // =========================================================================

    /// Drop tag index entries whose node is gone or no longer carries the tag
    pub fn gc_tag_index(&self) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;
        for (key, _) in self.prefix_scan("ix:tag:") {
            let key_str = String::from_utf8_lossy(&key).to_string();
            let rest = match key_str.strip_prefix("ix:tag:") {
                Some(r) => r,
                None => continue,
            };
            // tag may itself contain ':'; the uuid is the final segment
            let (tag, id_str) = match rest.rsplit_once(':') {
                Some(parts) => parts,
                None => continue,
            };
            let stale = match id_str.parse::<NodeId>() {
                Ok(id) => match self.try_get_node(id)? {
                    Some(node) => !node.tags.iter().any(|t| t.to_lowercase() == tag),
                    None => true,
                },
                Err(_) => true,
            };
            if stale {
                batch.delete(key_str.as_bytes());
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write_opt(batch, &self.write_opts())?;
        }
        Ok(removed)
    }

    /// Shed embedding vectors from nodes pruned before the cutoff;
    /// returns (nodes touched, bytes freed estimate)
    pub fn shed_embeddings_before(&self, cutoff: DateTime<Utc>) -> Result<(usize, usize)> {
        let mut touched = 0usize;
        let mut bytes = 0usize;
        for id in self.pruned_node_ids()? {
            let Some(mut node) = self.try_get_node(id)? else {
                continue;
            };
            if node.updated_at >= cutoff {
                continue;
            }
            if let Some(embedding) = node.embedding.take() {
                bytes += embedding.len() * crate::constants::ESTIMATED_BYTES_PER_EMBEDDING_DIM;
                node.updated_at = Utc::now();
                self.update_node(&node)?;
                touched += 1;
            }
        }
        Ok((touched, bytes))
    }

    // =========================================================================
    // STATS
    // =========================================================================

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            node_count: self.node_count.load(Ordering::Relaxed).max(0) as u64,
            pruned_node_count: self.pruned_count.load(Ordering::Relaxed).max(0) as u64,
            edge_count: self.edge_count.load(Ordering::Relaxed).max(0) as u64,
            active_edge_count: self.active_edge_count.load(Ordering::Relaxed).max(0) as u64,
            cluster_count: self.cluster_count.load(Ordering::Relaxed).max(0) as u64,
            pattern_count: self.pattern_count.load(Ordering::Relaxed).max(0) as u64,
        }
    }

    /// Load persisted stats, or rebuild them by scanning (first open, or
    /// after an unclean shutdown)
    fn load_stats(&self) -> Result<()> {
        if let Some(value) = self.db.get(b"stats")? {
            if let Ok(stats) = Self::decode::<StoreStats>(&value, "stats") {
                self.node_count
                    .store(stats.node_count as i64, Ordering::Relaxed);
                self.pruned_count
                    .store(stats.pruned_node_count as i64, Ordering::Relaxed);
                self.edge_count
                    .store(stats.edge_count as i64, Ordering::Relaxed);
                self.active_edge_count
                    .store(stats.active_edge_count as i64, Ordering::Relaxed);
                self.cluster_count
                    .store(stats.cluster_count as i64, Ordering::Relaxed);
                self.pattern_count
                    .store(stats.pattern_count as i64, Ordering::Relaxed);
                return Ok(());
            }
            tracing::warn!("stats row undecodable, rebuilding by scan");
        }

        let mut nodes = 0i64;
        let mut pruned = 0i64;
        for (_, value) in self.prefix_scan("node:") {
            nodes += 1;
            if let Ok(node) = Self::decode::<Node>(&value, "node") {
                if node.is_pruned {
                    pruned += 1;
                }
            }
        }
        let mut edges = 0i64;
        let mut active = 0i64;
        for (_, value) in self.prefix_scan("edge:") {
            edges += 1;
            if let Ok(edge) = Self::decode::<Edge>(&value, "edge") {
                if edge.is_active {
                    active += 1;
                }
            }
        }
        let clusters = self.prefix_scan("cluster:").count() as i64;
        let patterns = self.prefix_scan("pattern:").count() as i64;

        self.node_count.store(nodes, Ordering::Relaxed);
        self.pruned_count.store(pruned, Ordering::Relaxed);
        self.edge_count.store(edges, Ordering::Relaxed);
        self.active_edge_count.store(active, Ordering::Relaxed);
        self.cluster_count.store(clusters, Ordering::Relaxed);
        self.pattern_count.store(patterns, Ordering::Relaxed);

        if nodes > 0 || edges > 0 {
            tracing::info!(
                "Rebuilt stats by scan: {} nodes ({} pruned), {} edges ({} active)",
                nodes,
                pruned,
                edges,
                active
            );
        }
        Ok(())
    }

    /// Persist the stats row and flush RocksDB memtables
    pub fn flush(&self) -> Result<()> {
        let value = Self::encode(&self.stats(), "stats")?;
        self.db.put_opt(b"stats", &value, &self.write_opts())?;
        let mut flush_opts = rocksdb::FlushOptions::default();
        flush_opts.set_wait(true);
        self.db.flush_opt(&flush_opts)?;
        Ok(())
    }
}
