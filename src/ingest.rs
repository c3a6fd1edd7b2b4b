//! Event ingestion
//!
//! Raw activity events become graph nodes through per-category strategies.
//! Each strategy knows how to pull a content line, metadata, tags and a
//! starting relevance out of its event shape. Strategies are registered
//! once at construction and looked up by parsed category, so adding a new
//! event source means adding one strategy, not another string branch.
//!
//! Ingestion is deliberately forgiving: events with categories nobody
//! registered are counted as skipped, and a `related_to` reference that
//! resolves to nothing drops the edge, never the batch.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

use crate::constants::{
    INGEST_REFERENCE_EDGE_STRENGTH, INGEST_SESSION_GAP_MINUTES, INGEST_TEMPORAL_EDGE_STRENGTH,
};
use crate::errors::Result;
use crate::graph::types::{
    metadata_from_json, Edge, EdgeType, Metadata, Node, NodeId, NodeType, SourceType,
};
use crate::graph::{BatchOp, GraphStore};

// =============================================================================
// EVENTS
// =============================================================================

/// A raw activity event as delivered by a collector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Collector-assigned id, unique within a batch
    pub id: String,
    /// Wire category string, parsed into [`EventCategory`]
    pub category: String,
    pub timestamp: chrono::DateTime<Utc>,
    /// Which collector produced this (device, app, integration name)
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// String-valued metadata field, if present
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// The closed set of event categories the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    PageVisit,
    Email,
    Commit,
    VoiceNote,
    Note,
    Meeting,
    Contact,
}

impl EventCategory {
    /// Parse a wire category string. Unknown strings are `None`, which
    /// ingestion counts as skipped rather than failing the batch.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "page_visit" | "browsing" | "browser_history" => Some(Self::PageVisit),
            "email" | "mail" => Some(Self::Email),
            "commit" | "code_commit" => Some(Self::Commit),
            "voice_note" | "voice" => Some(Self::VoiceNote),
            "note" | "text_note" => Some(Self::Note),
            "meeting" | "calendar_event" => Some(Self::Meeting),
            "contact" | "person" => Some(Self::Contact),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageVisit => "page_visit",
            Self::Email => "email",
            Self::Commit => "commit",
            Self::VoiceNote => "voice_note",
            Self::Note => "note",
            Self::Meeting => "meeting",
            Self::Contact => "contact",
        }
    }
}

/// What one ingestion call produced
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub nodes_created: usize,
    pub edges_created: usize,
    /// Events with no registered strategy
    pub skipped: usize,
    /// Ids of the created nodes, in event-time order
    pub node_ids: Vec<NodeId>,
    pub elapsed_ms: u64,
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// Per-category node construction
pub trait EventStrategy: Send + Sync {
    /// Category this strategy handles
    fn category(&self) -> EventCategory;

    /// Node type produced for this category
    fn node_type(&self) -> NodeType;

    /// Where nodes of this category come from
    fn source_type(&self) -> SourceType;

    /// One human-readable content line for the node
    fn content(&self, event: &Event) -> String;

    /// Starting relevance before the scoring engine ever sees the node.
    /// Deliberate artifacts (notes, commits) start higher than ambient
    /// capture (page visits).
    fn seed_relevance(&self, event: &Event) -> f32;

    /// Tags derived from the event. The default picks up an explicit
    /// `tags` array in the metadata; strategies add category-specific ones.
    fn tags(&self, event: &Event) -> Vec<String> {
        explicit_tags(event)
    }

    /// Metadata carried onto the node. The default keeps the whole event
    /// metadata map plus provenance fields.
    fn metadata(&self, event: &Event) -> Metadata {
        base_metadata(event)
    }
}

fn explicit_tags(event: &Event) -> Vec<String> {
    event
        .metadata
        .get("tags")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn base_metadata(event: &Event) -> Metadata {
    let mut metadata =
        metadata_from_json(serde_json::Value::Object(event.metadata.clone()));
    metadata.insert("event_id".to_string(), event.id.as_str().into());
    if !event.source.is_empty() {
        metadata.insert("event_source".to_string(), event.source.as_str().into());
    }
    metadata
}

/// Host part of a URL, without scheme or "www." prefix
fn url_host(url: &str) -> Option<&str> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

struct PageVisitStrategy;

impl EventStrategy for PageVisitStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::PageVisit
    }

    fn node_type(&self) -> NodeType {
        NodeType::Activity
    }

    fn source_type(&self) -> SourceType {
        SourceType::Browser
    }

    fn content(&self, event: &Event) -> String {
        match (event.meta_str("title"), event.meta_str("url")) {
            (Some(title), Some(url)) => format!("{title} ({url})"),
            (Some(title), None) => title.to_string(),
            (None, Some(url)) => url.to_string(),
            (None, None) => "page visit".to_string(),
        }
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        // Browsing is high-volume, low-signal until something links to it
        0.3
    }

    fn tags(&self, event: &Event) -> Vec<String> {
        let mut tags = explicit_tags(event);
        if let Some(host) = event.meta_str("url").and_then(url_host) {
            tags.push(host.to_string());
        }
        tags
    }
}

struct EmailStrategy;

impl EventStrategy for EmailStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::Email
    }

    fn node_type(&self) -> NodeType {
        NodeType::Activity
    }

    fn source_type(&self) -> SourceType {
        SourceType::Mail
    }

    fn content(&self, event: &Event) -> String {
        let subject = event.meta_str("subject").unwrap_or("(no subject)");
        match event.meta_str("from") {
            Some(from) => format!("{subject} (from {from})"),
            None => subject.to_string(),
        }
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        0.4
    }

    fn tags(&self, event: &Event) -> Vec<String> {
        let mut tags = explicit_tags(event);
        // Sender domain groups threads from the same organization
        if let Some(domain) = event.meta_str("from").and_then(|f| f.rsplit_once('@')) {
            tags.push(domain.1.to_string());
        }
        tags
    }
}

struct CommitStrategy;

impl EventStrategy for CommitStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::Commit
    }

    fn node_type(&self) -> NodeType {
        NodeType::Activity
    }

    fn source_type(&self) -> SourceType {
        SourceType::SourceControl
    }

    fn content(&self, event: &Event) -> String {
        let message = event
            .meta_str("message")
            .map(|m| m.lines().next().unwrap_or(m))
            .unwrap_or("commit");
        match event.meta_str("repo") {
            Some(repo) => format!("{message} [{repo}]"),
            None => message.to_string(),
        }
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        // A commit is deliberate work product
        0.6
    }

    fn tags(&self, event: &Event) -> Vec<String> {
        let mut tags = explicit_tags(event);
        if let Some(repo) = event.meta_str("repo") {
            tags.push(repo.to_string());
        }
        tags
    }
}

struct VoiceNoteStrategy;

impl EventStrategy for VoiceNoteStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::VoiceNote
    }

    fn node_type(&self) -> NodeType {
        NodeType::Activity
    }

    fn source_type(&self) -> SourceType {
        SourceType::Voice
    }

    fn content(&self, event: &Event) -> String {
        event
            .meta_str("transcript")
            .unwrap_or("voice note")
            .to_string()
    }

    fn seed_relevance(&self, event: &Event) -> f32 {
        // Untranscribed notes cannot be matched by queries yet
        if event.meta_str("transcript").is_some() {
            0.6
        } else {
            0.4
        }
    }
}

struct NoteStrategy;

impl EventStrategy for NoteStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::Note
    }

    fn node_type(&self) -> NodeType {
        NodeType::Resource
    }

    fn source_type(&self) -> SourceType {
        SourceType::Api
    }

    fn content(&self, event: &Event) -> String {
        event
            .meta_str("text")
            .or_else(|| event.meta_str("title"))
            .unwrap_or("note")
            .to_string()
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        // The user wrote this down on purpose
        0.7
    }
}

struct MeetingStrategy;

impl EventStrategy for MeetingStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::Meeting
    }

    fn node_type(&self) -> NodeType {
        NodeType::Activity
    }

    fn source_type(&self) -> SourceType {
        SourceType::System
    }

    fn content(&self, event: &Event) -> String {
        let title = event.meta_str("title").unwrap_or("meeting");
        match event.meta_str("attendees") {
            Some(attendees) => format!("{title} (with {attendees})"),
            None => title.to_string(),
        }
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        0.5
    }
}

struct ContactStrategy;

impl EventStrategy for ContactStrategy {
    fn category(&self) -> EventCategory {
        EventCategory::Contact
    }

    fn node_type(&self) -> NodeType {
        NodeType::Person
    }

    fn source_type(&self) -> SourceType {
        SourceType::Api
    }

    fn content(&self, event: &Event) -> String {
        event.meta_str("name").unwrap_or("contact").to_string()
    }

    fn seed_relevance(&self, _event: &Event) -> f32 {
        0.5
    }
}

// =============================================================================
// REGISTRY AND INGESTOR
// =============================================================================

/// Strategies registered once, looked up by parsed category
pub struct StrategyRegistry {
    strategies: Vec<Box<dyn EventStrategy>>,
}

impl StrategyRegistry {
    /// Registry with all built-in strategies
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(PageVisitStrategy),
                Box::new(EmailStrategy),
                Box::new(CommitStrategy),
                Box::new(VoiceNoteStrategy),
                Box::new(NoteStrategy),
                Box::new(MeetingStrategy),
                Box::new(ContactStrategy),
            ],
        }
    }

    pub fn find(&self, category: EventCategory) -> Option<&dyn EventStrategy> {
        self.strategies
            .iter()
            .find(|s| s.category() == category)
            .map(|s| s.as_ref())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Ingestor {
    registry: StrategyRegistry,
}

impl Ingestor {
    pub fn new() -> Self {
        Self {
            registry: StrategyRegistry::new(),
        }
    }

    /// Turn a batch of events into nodes and edges, committed atomically.
    ///
    /// Events are processed in timestamp order. Consecutive events closer
    /// together than the session gap are linked with a temporal edge, and
    /// `related_to` metadata (an event id from this batch, or an existing
    /// node id) produces reference edges. Unresolvable references and
    /// unknown categories are skipped, never errors.
    pub fn process(&self, store: &GraphStore, events: &[Event]) -> Result<IngestReport> {
        let start = Instant::now();
        let mut report = IngestReport::default();
        if events.is_empty() {
            return Ok(report);
        }

        let mut ordered: Vec<&Event> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        let mut ops: Vec<BatchOp> = Vec::new();
        // Event id -> node id, for resolving in-batch references
        let mut created: HashMap<&str, NodeId> = HashMap::new();
        // (timestamp, node id) in time order, for session linking
        let mut timeline: Vec<(chrono::DateTime<Utc>, NodeId)> = Vec::new();

        for event in &ordered {
            let Some(category) = EventCategory::parse(&event.category) else {
                tracing::debug!(
                    event_id = %event.id,
                    category = %event.category,
                    "no strategy for category, skipping event"
                );
                report.skipped += 1;
                continue;
            };
            // parse() and the registry cover the same closed set
            let Some(strategy) = self.registry.find(category) else {
                report.skipped += 1;
                continue;
            };

            let mut node = Node::new(
                strategy.node_type(),
                strategy.content(event),
                event.timestamp,
                strategy.source_type(),
            );
            node.metadata = strategy.metadata(event);
            node.tags = strategy.tags(event);
            node.relevance_score = strategy.seed_relevance(event).clamp(0.0, 1.0);

            created.insert(event.id.as_str(), node.id);
            timeline.push((event.timestamp, node.id));
            ops.push(BatchOp::CreateNode(node));
        }

        let session_gap = Duration::minutes(INGEST_SESSION_GAP_MINUTES);
        for pair in timeline.windows(2) {
            let (prev_ts, prev_id) = pair[0];
            let (next_ts, next_id) = pair[1];
            if next_ts - prev_ts <= session_gap {
                let edge = Edge::new(prev_id, next_id, EdgeType::Temporal)
                    .with_strength(INGEST_TEMPORAL_EDGE_STRENGTH)
                    .with_context("same session");
                ops.push(BatchOp::CreateEdge(edge));
            }
        }

        for event in &ordered {
            let Some(&source_id) = created.get(event.id.as_str()) else {
                continue;
            };
            let mut references = related_to(event);
            references.sort();
            references.dedup();
            for reference in references {
                match self.resolve(store, &created, &reference)? {
                    Some(target_id) if target_id != source_id => {
                        let edge = Edge::new(source_id, target_id, EdgeType::Reference)
                            .with_strength(INGEST_REFERENCE_EDGE_STRENGTH)
                            .with_context(format!("related_to from event {}", event.id));
                        ops.push(BatchOp::CreateEdge(edge));
                    }
                    Some(_) => {}
                    None => {
                        tracing::debug!(
                            event_id = %event.id,
                            reference = %reference,
                            "related_to target not found, dropping edge"
                        );
                    }
                }
            }
        }

        let batch = store.apply_batch(ops)?;
        report.nodes_created = batch.nodes_written;
        report.edges_created = batch.edges_written;
        report.node_ids = timeline.iter().map(|(_, id)| *id).collect();
        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            nodes = report.nodes_created,
            edges = report.edges_created,
            skipped = report.skipped,
            elapsed_ms = report.elapsed_ms,
            "ingested event batch"
        );
        Ok(report)
    }

    /// Resolve a `related_to` value: an event id from this batch first,
    /// then an existing node id in the store
    fn resolve(
        &self,
        store: &GraphStore,
        created: &HashMap<&str, NodeId>,
        reference: &str,
    ) -> Result<Option<NodeId>> {
        if let Some(&id) = created.get(reference) {
            return Ok(Some(id));
        }
        let Ok(uuid) = reference.parse::<uuid::Uuid>() else {
            return Ok(None);
        };
        let id = NodeId(uuid);
        Ok(store.try_get_node(id)?.map(|node| node.id))
    }
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new()
    }
}

/// `related_to` metadata as a list: accepts a single string or an array
fn related_to(event: &Event) -> Vec<String> {
    match event.metadata.get("related_to") {
        Some(serde_json::Value::String(s)) => vec![s.clone()],
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
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

    fn event(id: &str, category: &str, metadata: serde_json::Value) -> Event {
        Event {
            id: id.to_string(),
            category: category.to_string(),
            timestamp: Utc::now(),
            source: "test".to_string(),
            metadata: match metadata {
                serde_json::Value::Object(map) => map,
                _ => serde_json::Map::new(),
            },
        }
    }

    #[test]
    fn test_each_category_builds_its_node_shape() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let events = vec![
            event(
                "e1",
                "page_visit",
                serde_json::json!({"title": "Rust Book", "url": "https://doc.rust-lang.org/book/"}),
            ),
            event(
                "e2",
                "commit",
                serde_json::json!({"message": "fix parser\n\nlong body", "repo": "engram"}),
            ),
            event("e3", "note", serde_json::json!({"text": "remember the milk"})),
            event("e4", "contact", serde_json::json!({"name": "Priya Sharma"})),
        ];

        let report = ingestor.process(&store, &events).unwrap();
        assert_eq!(report.nodes_created, 4);
        assert_eq!(report.skipped, 0);

        let nodes = store.all_nodes().unwrap();
        let page = nodes
            .iter()
            .find(|n| n.source_type == SourceType::Browser)
            .unwrap();
        assert_eq!(page.content, "Rust Book (https://doc.rust-lang.org/book/)");
        assert!(page.tags.contains(&"doc.rust-lang.org".to_string()));

        let commit = nodes
            .iter()
            .find(|n| n.source_type == SourceType::SourceControl)
            .unwrap();
        assert_eq!(commit.content, "fix parser [engram]");
        assert!(commit.tags.contains(&"engram".to_string()));

        let note = nodes.iter().find(|n| n.content == "remember the milk").unwrap();
        assert_eq!(note.node_type, NodeType::Resource);
        assert!(note.relevance_score > page.relevance_score);

        let person = nodes.iter().find(|n| n.content == "Priya Sharma").unwrap();
        assert_eq!(person.node_type, NodeType::Person);
    }

    #[test]
    fn test_unknown_category_skipped_not_error() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let events = vec![
            event("e1", "note", serde_json::json!({"text": "kept"})),
            event("e2", "telepathy", serde_json::json!({})),
        ];

        let report = ingestor.process(&store, &events).unwrap();
        assert_eq!(report.nodes_created, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_session_gap_links_consecutive_events() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let base = Utc::now() - Duration::hours(3);

        let mut e1 = event("e1", "note", serde_json::json!({"text": "first"}));
        e1.timestamp = base;
        let mut e2 = event("e2", "note", serde_json::json!({"text": "ten minutes later"}));
        e2.timestamp = base + Duration::minutes(10);
        let mut e3 = event("e3", "note", serde_json::json!({"text": "two hours later"}));
        e3.timestamp = base + Duration::hours(2);

        let report = ingestor.process(&store, &[e1, e2, e3]).unwrap();
        assert_eq!(report.nodes_created, 3);
        // Only the 10-minute pair sits inside one session
        assert_eq!(report.edges_created, 1);

        let edges = store.all_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, EdgeType::Temporal);
        assert!((edges[0].strength - INGEST_TEMPORAL_EDGE_STRENGTH).abs() < 1e-6);
    }

    #[test]
    fn test_related_to_creates_reference_edges() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();

        // Pre-existing node referenced by raw id
        let existing = Node::new(NodeType::Project, "engram", Utc::now(), SourceType::Api);
        store.create_node(&existing).unwrap();

        let base = Utc::now() - Duration::hours(2);
        let mut e1 = event("e1", "note", serde_json::json!({"text": "design sketch"}));
        e1.timestamp = base;
        let mut e2 = event(
            "e2",
            "commit",
            serde_json::json!({
                "message": "implement sketch",
                "repo": "engram",
                "related_to": ["e1", existing.id.0.to_string()],
            }),
        );
        // Outside the session gap so only reference edges are created
        e2.timestamp = base + Duration::hours(1);

        let report = ingestor.process(&store, &[e1, e2]).unwrap();
        assert_eq!(report.nodes_created, 2);
        assert_eq!(report.edges_created, 2);

        let edges = store.all_edges().unwrap();
        assert!(edges.iter().all(|e| e.edge_type == EdgeType::Reference));
        assert!(edges.iter().any(|e| e.target == existing.id));
    }

    #[test]
    fn test_dangling_related_to_drops_edge_keeps_batch() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let missing = uuid::Uuid::new_v4().to_string();
        let events = vec![event(
            "e1",
            "note",
            serde_json::json!({"text": "orphan reference", "related_to": missing}),
        )];

        let report = ingestor.process(&store, &events).unwrap();
        assert_eq!(report.nodes_created, 1);
        assert_eq!(report.edges_created, 0);
    }

    #[test]
    fn test_provenance_kept_in_metadata() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let events = vec![event("evt-42", "note", serde_json::json!({"text": "x"}))];
        ingestor.process(&store, &events).unwrap();

        let node = &store.all_nodes().unwrap()[0];
        assert_eq!(
            node.metadata.get("event_id").map(|v| v.to_json()),
            Some(serde_json::json!("evt-42"))
        );
        assert_eq!(
            node.metadata.get("event_source").map(|v| v.to_json()),
            Some(serde_json::json!("test"))
        );
    }

    #[test]
    fn test_explicit_tags_carried_onto_node() {
        let (_dir, store) = open_store();
        let ingestor = Ingestor::new();
        let events = vec![event(
            "e1",
            "note",
            serde_json::json!({"text": "tagged note", "tags": ["Deep-Work", "planning"]}),
        )];
        ingestor.process(&store, &events).unwrap();

        let node = &store.all_nodes().unwrap()[0];
        assert!(node.tags.contains(&"Deep-Work".to_string()));
        assert!(node.tags.contains(&"planning".to_string()));
    }

    #[test]
    fn test_category_parse_round_trip() {
        for category in [
            EventCategory::PageVisit,
            EventCategory::Email,
            EventCategory::Commit,
            EventCategory::VoiceNote,
            EventCategory::Note,
            EventCategory::Meeting,
            EventCategory::Contact,
        ] {
            assert_eq!(EventCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(EventCategory::parse("astral_projection"), None);
    }

    #[test]
    fn test_url_host_extraction() {
        assert_eq!(url_host("https://www.example.com/page?q=1"), Some("example.com"));
        assert_eq!(url_host("http://docs.rs/serde"), Some("docs.rs"));
        assert_eq!(url_host("example.org"), Some("example.org"));
        assert_eq!(url_host(""), None);
    }
}
