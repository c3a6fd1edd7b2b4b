//! Core data model for the memory graph
//!
//! Nodes, edges, temporal clusters, detected patterns, audit entries and the
//! aggregate store stats. Everything here is bincode-encoded into RocksDB
//! rows, so no field may require a self-describing format to deserialize
//! (which rules out `serde_json::Value` — see [`MetaValue`]).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::constants::{EDGE_DEFAULT_DECAY_RATE, EDGE_INITIAL_STRENGTH, EDGE_INTERACTION_BOOST};
use crate::decay;

/// Unique identifier for nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)] // Serialize as plain UUID string, not array
pub struct NodeId(pub Uuid);

/// Unique identifier for edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub Uuid);

/// Unique identifier for temporal clusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub Uuid);

/// Unique identifier for detected patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub Uuid);

macro_rules! impl_id {
    ($name:ident) => {
        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

impl_id!(NodeId);
impl_id!(EdgeId);
impl_id!(ClusterId);
impl_id!(PatternId);

// =============================================================================
// METADATA VALUES
// bincode cannot decode serde_json::Value (deserialize_any needs a
// self-describing format), so stored metadata uses this closed value enum.
// JSON conversion happens only at the snapshot/ingestion boundaries.
// =============================================================================

/// JSON-equivalent value that survives the bincode row codec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<MetaValue>),
    Map(HashMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert to a JSON value (for snapshots and filter comparison)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(MetaValue::to_json).collect())
            }
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Self::Text(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(MetaValue::from).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, MetaValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Metadata map attached to nodes
pub type Metadata = HashMap<String, MetaValue>;

/// Convert a [`Metadata`] map to a plain JSON object
pub fn metadata_to_json(metadata: &Metadata) -> serde_json::Value {
    serde_json::Value::Object(
        metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Convert a JSON object into a [`Metadata`] map (non-object values are
/// stored under the "value" key)
pub fn metadata_from_json(value: serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| (k, MetaValue::from(v)))
            .collect(),
        serde_json::Value::Null => Metadata::new(),
        other => {
            let mut map = Metadata::new();
            map.insert("value".to_string(), MetaValue::from(other));
            map
        }
    }
}

// =============================================================================
// CLOSED ENUMS
// =============================================================================

/// Node types recognized by the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// A discrete thing the user did (visited, edited, sent, said)
    Activity,
    /// A document, page, file or artifact the user touched
    Resource,
    /// A long-lived body of work that activities attach to
    Project,
    /// A derived behavioral pattern node
    Pattern,
    /// An abstract topic or idea
    Concept,
    /// A person the user interacts with
    Person,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Resource => "resource",
            Self::Project => "project",
            Self::Pattern => "pattern",
            Self::Concept => "concept",
            Self::Person => "person",
        }
    }

    pub fn all() -> [NodeType; 6] {
        [
            Self::Activity,
            Self::Resource,
            Self::Project,
            Self::Pattern,
            Self::Concept,
            Self::Person,
        ]
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "activity" => Some(Self::Activity),
            "resource" => Some(Self::Resource),
            "project" => Some(Self::Project),
            "pattern" => Some(Self::Pattern),
            "concept" => Some(Self::Concept),
            "person" => Some(Self::Person),
            _ => None,
        }
    }

    /// Default scoring prior for this type
    ///
    /// Long-lived structural nodes (projects, people) rank above transient
    /// activity rows when everything else is equal.
    pub fn default_weight(&self) -> f32 {
        match self {
            Self::Project => 1.0,
            Self::Person => 0.9,
            Self::Concept => 0.8,
            Self::Pattern => 0.75,
            Self::Resource => 0.7,
            Self::Activity => 0.6,
        }
    }
}

/// Where an ingested event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    Browser,
    Mail,
    SourceControl,
    Voice,
    Api,
    System,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Browser => "browser",
            Self::Mail => "mail",
            Self::SourceControl => "source_control",
            Self::Voice => "voice",
            Self::Api => "api",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "browser" => Some(Self::Browser),
            "mail" => Some(Self::Mail),
            "source_control" => Some(Self::SourceControl),
            "voice" => Some(Self::Voice),
            "api" => Some(Self::Api),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Edge types recognized by the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Close in time
    Temporal,
    /// Similar content or topic
    Semantic,
    /// One thing led to another
    Causal,
    /// Same place or origin context
    Spatial,
    /// Explicit link between items
    Reference,
    /// One item requires the other
    Dependency,
    /// Generic learned association
    Association,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Semantic => "semantic",
            Self::Causal => "causal",
            Self::Spatial => "spatial",
            Self::Reference => "reference",
            Self::Dependency => "dependency",
            Self::Association => "association",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "temporal" => Some(Self::Temporal),
            "semantic" => Some(Self::Semantic),
            "causal" => Some(Self::Causal),
            "spatial" => Some(Self::Spatial),
            "reference" => Some(Self::Reference),
            "dependency" => Some(Self::Dependency),
            "association" => Some(Self::Association),
            _ => None,
        }
    }
}

/// Kinds of user interaction a node can receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    View,
    Edit,
    Share,
    Complete,
    Navigate,
}

impl InteractionKind {
    /// Default strength when the caller does not supply one
    pub fn default_strength(&self) -> f32 {
        match self {
            Self::View => 0.2,
            Self::Navigate => 0.3,
            Self::Share => 0.6,
            Self::Edit => 0.7,
            Self::Complete => 0.9,
        }
    }
}

// =============================================================================
// NODE
// =============================================================================

fn default_confidence() -> f32 {
    1.0
}

fn default_decay_factor() -> f32 {
    1.0
}

/// A single memory: something that happened, was read, or was derived
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    /// Event time (when the thing happened, not when it was stored)
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,

    // === Scoring state (owned by the relevance engine) ===
    pub relevance_score: f32,
    /// Per-node decay speed multiplier (1.0 = standard curve)
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f32,

    // === Graph-derived state ===
    #[serde(default)]
    pub degree: u32,
    #[serde(default)]
    pub clustering_coefficient: f32,
    #[serde(default)]
    pub centrality: f32,
    #[serde(default)]
    pub community_id: Option<String>,

    // === Content enrichment ===
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional embedding supplied by an external similarity backend
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,

    // === Access state ===
    #[serde(default)]
    pub access_count: u32,
    pub last_accessed: DateTime<Utc>,

    /// How sure ingestion was about this node's interpretation
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    pub source_type: SourceType,

    /// Soft-delete flag; pruned nodes stay retrievable by id
    #[serde(default)]
    pub is_pruned: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn new(
        node_type: NodeType,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_type: SourceType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            node_type,
            timestamp,
            content: content.into(),
            metadata: Metadata::new(),
            relevance_score: 0.5,
            decay_factor: 1.0,
            degree: 0,
            clustering_coefficient: 0.0,
            centrality: 0.0,
            community_id: None,
            tags: Vec::new(),
            embedding: None,
            access_count: 0,
            last_accessed: now,
            confidence: 1.0,
            source_type,
            is_pruned: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record an access: bump count, stamp times
    pub fn record_access(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
        let now = Utc::now();
        self.last_accessed = now;
        self.updated_at = now;
    }

    /// Set the relevance score, clamped to [0,1]
    pub fn set_relevance(&mut self, score: f32) {
        self.relevance_score = score.clamp(0.0, 1.0);
        self.updated_at = Utc::now();
    }

    /// Soft-delete: flag as pruned and zero the score
    pub fn mark_pruned(&mut self) {
        self.is_pruned = true;
        self.relevance_score = 0.0;
        self.updated_at = Utc::now();
    }

    /// Days since the underlying event
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Days since the node was last touched
    pub fn days_since_access(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_accessed).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Lowercased content + tag terms for overlap scoring
    pub fn terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = self
            .content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();
        terms.extend(self.tags.iter().map(|t| t.to_lowercase()));
        terms
    }
}

// =============================================================================
// EDGE
// =============================================================================

fn default_decay_rate() -> f32 {
    EDGE_DEFAULT_DECAY_RATE
}

fn default_active() -> bool {
    true
}

/// A weighted, typed connection between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub edge_type: EdgeType,
    /// Canonical connection weight in [0,1]
    pub strength: f32,
    /// Per-day strength decay when the edge sits unused
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    #[serde(default)]
    pub bidirectional: bool,
    /// Deactivated edges are skipped by traversals and default queries
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub interaction_count: u32,
    pub last_interaction: DateTime<Utc>,
    /// Free-text note about why this edge exists
    #[serde(default)]
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    pub fn new(source: NodeId, target: NodeId, edge_type: EdgeType) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::new(),
            source,
            target,
            edge_type,
            strength: EDGE_INITIAL_STRENGTH,
            decay_rate: EDGE_DEFAULT_DECAY_RATE,
            bidirectional: false,
            is_active: true,
            interaction_count: 0,
            last_interaction: now,
            context: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength.clamp(0.0, 1.0);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Increase strength, clamped to [0,1]
    pub fn strengthen(&mut self, amount: f32) {
        self.strength = (self.strength + amount).clamp(0.0, 1.0);
        self.updated_at = Utc::now();
    }

    /// Record a traversal/use of this edge
    pub fn record_interaction(&mut self) {
        self.interaction_count = self.interaction_count.saturating_add(1);
        let now = Utc::now();
        self.last_interaction = now;
        self.updated_at = now;
        self.strengthen(EDGE_INTERACTION_BOOST);
    }

    /// Strength after decay for the time since last interaction
    pub fn effective_strength(&self, now: DateTime<Utc>) -> f32 {
        let days_idle = (now - self.last_interaction).num_seconds().max(0) as f64 / 86_400.0;
        decay::edge_strength_decay(self.strength, self.decay_rate, days_idle)
    }

    /// Deactivate (cascade from node pruning); the row stays for audit
    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.updated_at = Utc::now();
    }

    /// Whether this edge touches the given node
    pub fn touches(&self, node: NodeId) -> bool {
        self.source == node || self.target == node
    }

    /// The endpoint opposite to `node`, if this edge touches it
    pub fn other_endpoint(&self, node: NodeId) -> Option<NodeId> {
        if self.source == node {
            Some(self.target)
        } else if self.target == node {
            Some(self.source)
        } else {
            None
        }
    }
}

// =============================================================================
// TEMPORAL CLUSTERS
// =============================================================================

/// A group of nodes that happened close together in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalCluster {
    pub id: ClusterId,
    /// Member node ids in timestamp order
    pub node_ids: Vec<NodeId>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Inverse of inter-node gap variance, in [0,1]
    pub density: f64,
    /// Blend of size fit, member relevance, coherence and type homogeneity
    pub confidence: f64,
    /// Member that minimizes relevance-weighted time distance to the rest
    pub centroid: NodeId,
    pub created_at: DateTime<Utc>,
}

impl TemporalCluster {
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node_ids.contains(&id)
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }
}

// =============================================================================
// DETECTED PATTERNS
// =============================================================================

/// Kinds of behavioral pattern the temporal engine reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    /// Activity spike well above the trailing baseline
    Burst,
    /// Regular same-hour or same-weekday recurrence
    Cycle,
    /// Sustained increase or decrease across days
    Trend,
    /// Statistical outlier bucket
    Anomaly,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Burst => "burst",
            Self::Cycle => "cycle",
            Self::Trend => "trend",
            Self::Anomaly => "anomaly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "burst" => Some(Self::Burst),
            "cycle" => Some(Self::Cycle),
            "trend" => Some(Self::Trend),
            "anomaly" => Some(Self::Anomaly),
            _ => None,
        }
    }
}

/// A behavioral pattern found in the activity timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub id: PatternId,
    pub kind: PatternKind,
    /// Detector-specific confidence in [0,1]
    pub confidence: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Human-readable summary ("commit burst on Tuesday afternoon")
    pub description: String,
    /// Detector-specific magnitude: burst ratio, cycle consistency,
    /// trend slope, or anomaly z-score
    pub magnitude: f64,
    pub detected_at: DateTime<Utc>,
}

// =============================================================================
// AUDIT LOG
// =============================================================================

/// Mutations recorded by the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    CreateNode,
    UpdateNode,
    PruneNode,
    DeleteNode,
    CreateEdge,
    UpdateEdge,
    DeactivateEdge,
    DeleteEdge,
    StoreCluster,
    DeleteCluster,
    StorePattern,
    DeletePattern,
    ImportSnapshot,
    GcSweep,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateNode => "create_node",
            Self::UpdateNode => "update_node",
            Self::PruneNode => "prune_node",
            Self::DeleteNode => "delete_node",
            Self::CreateEdge => "create_edge",
            Self::UpdateEdge => "update_edge",
            Self::DeactivateEdge => "deactivate_edge",
            Self::DeleteEdge => "delete_edge",
            Self::StoreCluster => "store_cluster",
            Self::DeleteCluster => "delete_cluster",
            Self::StorePattern => "store_pattern",
            Self::DeletePattern => "delete_pattern",
            Self::ImportSnapshot => "import_snapshot",
            Self::GcSweep => "gc_sweep",
        }
    }
}

/// One append-only audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// Id of the affected entity (node/edge/cluster/pattern uuid)
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

// =============================================================================
// AGGREGATE STATS
// =============================================================================

/// Aggregate store counters, persisted on flush and rebuilt on open
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub node_count: u64,
    pub pruned_node_count: u64,
    pub edge_count: u64,
    pub active_edge_count: u64,
    pub cluster_count: u64,
    pub pattern_count: u64,
}

impl StoreStats {
    pub fn active_node_count(&self) -> u64 {
        self.node_count.saturating_sub(self.pruned_node_count)
    }
}
