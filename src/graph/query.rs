//! Structured query model
//!
//! A [`Query`] is a list of field filters, higher-level constraints, sort
//! specs and pagination, aimed at either nodes or edges. Matching is
//! fail-soft by design: an unknown field name or a type-mismatched
//! comparison never errors — the filter passes everything through (with a
//! debug log), because queries frequently arrive from natural-language
//! translation rather than from code.
//!
//! [`Query::matches_node`] / [`Query::matches_edge`] are the single source
//! of truth for filtering. The store's index selection only narrows the scan
//! set; every candidate still goes through `matches_*`.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Edge, EdgeType, Node, NodeId, NodeType};
use crate::constants::{DEFAULT_QUERY_LIMIT, DEFAULT_RECENT_DAYS};

lazy_static! {
    /// Compiled-regex cache for FilterOp::Regex (keyed by pattern text).
    /// Bounded in practice by the variety of patterns queries actually use.
    static ref REGEX_CACHE: DashMap<String, Option<Regex>> = DashMap::new();
}

/// Comparison operators for field filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Value must be an array; matches when the field equals any element
    In,
    /// Value must be an array; matches when the field equals no element
    Nin,
    /// Substring on strings, membership on arrays (tags)
    Contains,
    /// Value is a regex pattern applied to the field's string form
    Regex,
}

/// A single field comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
    /// Invert the outcome (skipped when the filter is pass-through)
    #[serde(default)]
    pub negate: bool,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
            negate: false,
        }
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// Higher-level query constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Event time within [start, end] (either side open)
    Temporal {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// At least one term must overlap the node's content/tag terms;
    /// the same terms feed semantic scoring
    Semantic { terms: Vec<String> },
    /// Only entities connected to this node (resolved by the store via
    /// the adjacency index; ignored by row-level matching)
    Structural {
        connected_to: NodeId,
        via: Option<EdgeType>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One sort key; specs apply in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// What kind of entity the query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryTarget {
    Nodes,
    Edges,
}

/// Caller context attached to a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Session whose context window should observe this query
    #[serde(default)]
    pub session_id: Option<String>,
    /// Minimum relevance score for returned nodes
    #[serde(default)]
    pub relevance_threshold: Option<f32>,
    /// Original natural-language text when the query was translated
    #[serde(default)]
    pub source_text: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_target() -> QueryTarget {
    QueryTarget::Nodes
}

/// Structured query over the graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Applied in order; empty means timestamp descending
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_target")]
    pub target: QueryTarget,
    #[serde(default)]
    pub context: QueryContext,
    /// Include soft-deleted nodes (and deactivated edges)
    #[serde(default)]
    pub include_pruned: bool,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            constraints: Vec::new(),
            sort: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
            target: QueryTarget::Nodes,
            context: QueryContext::default(),
            include_pruned: false,
        }
    }
}

impl Query {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }

    /// The fallback query: recent nodes, newest first
    pub fn recent_default() -> Self {
        let now = Utc::now();
        Self {
            constraints: vec![Constraint::Temporal {
                start: Some(now - Duration::days(DEFAULT_RECENT_DAYS)),
                end: Some(now),
            }],
            sort: vec![SortSpec::desc("timestamp")],
            ..Default::default()
        }
    }

    /// Explicit time range carried by a temporal constraint, if any
    pub fn time_range(&self) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Temporal { start, end } => Some((*start, *end)),
            _ => None,
        })
    }

    /// Semantic terms carried by the query, if any
    pub fn semantic_terms(&self) -> Option<&[String]> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Semantic { terms } => Some(terms.as_slice()),
            _ => None,
        })
    }

    /// Structural constraint carried by the query, if any
    pub fn structural(&self) -> Option<(NodeId, Option<EdgeType>)> {
        self.constraints.iter().find_map(|c| match c {
            Constraint::Structural { connected_to, via } => Some((*connected_to, *via)),
            _ => None,
        })
    }

    /// Node type pinned by an Eq/In filter on the type field, if any.
    /// Used by the store for index selection.
    pub fn pinned_node_type(&self) -> Option<NodeType> {
        self.filters.iter().find_map(|f| {
            if f.negate || canonical_field(&f.field) != "type" {
                return None;
            }
            match f.op {
                FilterOp::Eq => f.value.as_str().and_then(NodeType::parse),
                _ => None,
            }
        })
    }

    /// Check a node against every filter and row-level constraint
    pub fn matches_node(&self, node: &Node) -> bool {
        // Soft-deleted nodes are invisible to default queries
        if node.is_pruned && !self.include_pruned {
            return false;
        }

        if let Some(threshold) = self.context.relevance_threshold {
            if node.relevance_score < threshold {
                return false;
            }
        }

        for filter in &self.filters {
            match eval_filter(filter, node_field(node, &filter.field).as_ref()) {
                Some(pass) => {
                    if !pass {
                        return false;
                    }
                }
                // Unknown field or mismatched types: pass-through
                None => continue,
            }
        }

        for constraint in &self.constraints {
            match constraint {
                Constraint::Temporal { start, end } => {
                    if let Some(start) = start {
                        if node.timestamp < *start {
                            return false;
                        }
                    }
                    if let Some(end) = end {
                        if node.timestamp > *end {
                            return false;
                        }
                    }
                }
                Constraint::Semantic { terms } => {
                    if !terms.is_empty() && !terms_overlap(terms, &node.terms()) {
                        return false;
                    }
                }
                // Resolved by the store against the adjacency index
                Constraint::Structural { .. } => {}
            }
        }

        true
    }

    /// Check an edge against every filter and row-level constraint
    pub fn matches_edge(&self, edge: &Edge) -> bool {
        if !edge.is_active && !self.include_pruned {
            return false;
        }

        for filter in &self.filters {
            match eval_filter(filter, edge_field(edge, &filter.field).as_ref()) {
                Some(pass) => {
                    if !pass {
                        return false;
                    }
                }
                None => continue,
            }
        }

        for constraint in &self.constraints {
            match constraint {
                Constraint::Temporal { start, end } => {
                    if let Some(start) = start {
                        if edge.created_at < *start {
                            return false;
                        }
                    }
                    if let Some(end) = end {
                        if edge.created_at > *end {
                            return false;
                        }
                    }
                }
                Constraint::Semantic { terms } => {
                    if !terms.is_empty() {
                        let context = edge.context.to_lowercase();
                        if !terms.iter().any(|t| context.contains(&t.to_lowercase())) {
                            return false;
                        }
                    }
                }
                Constraint::Structural { connected_to, via } => {
                    if !edge.touches(*connected_to) {
                        return false;
                    }
                    if let Some(via) = via {
                        if edge.edge_type != *via {
                            return false;
                        }
                    }
                }
            }
        }

        true
    }
}

/// At least one query term equal to, or a stem-prefix of, a node term.
/// Translation emits stems alongside surface forms ("meet" for "meetings"),
/// so prefix matching lets a stem catch the inflected words it came from.
pub fn terms_overlap(query_terms: &[String], node_terms: &[String]) -> bool {
    query_terms.iter().any(|t| {
        let t = t.to_lowercase();
        node_terms
            .iter()
            .any(|nt| nt == &t || (t.len() >= 4 && nt.starts_with(&t)))
    })
}

// =============================================================================
// FIELD ACCESS
// Canonical field names with the aliases translation produces. Timestamps
// become epoch milliseconds so range operators work numerically.
// =============================================================================

fn canonical_field(field: &str) -> &str {
    match field {
        "type" | "node_type" | "edge_type" => "type",
        "relevance" | "relevance_score" | "score" => "relevance",
        "source" | "source_type" => "source",
        "time" | "timestamp" => "timestamp",
        "active" | "is_active" => "is_active",
        "pruned" | "is_pruned" => "is_pruned",
        other => other,
    }
}

fn ts_millis(ts: DateTime<Utc>) -> Value {
    Value::Number(ts.timestamp_millis().into())
}

fn f32_value(v: f32) -> Value {
    serde_json::Number::from_f64(v as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn node_field(node: &Node, field: &str) -> Option<Value> {
    let value = match canonical_field(field) {
        "id" => Value::String(node.id.to_string()),
        "type" => Value::String(node.node_type.as_str().to_string()),
        "timestamp" => ts_millis(node.timestamp),
        "content" => Value::String(node.content.clone()),
        "relevance" => f32_value(node.relevance_score),
        "confidence" => f32_value(node.confidence),
        "centrality" => f32_value(node.centrality),
        "degree" => Value::Number(node.degree.into()),
        "access_count" => Value::Number(node.access_count.into()),
        "last_accessed" => ts_millis(node.last_accessed),
        "created_at" => ts_millis(node.created_at),
        "updated_at" => ts_millis(node.updated_at),
        "source" => Value::String(node.source_type.as_str().to_string()),
        "is_pruned" => Value::Bool(node.is_pruned),
        "community" | "community_id" => match &node.community_id {
            Some(c) => Value::String(c.clone()),
            None => Value::Null,
        },
        "tags" => Value::Array(
            node.tags
                .iter()
                .map(|t| Value::String(t.clone()))
                .collect(),
        ),
        other => {
            // Fall back to metadata, with or without the "metadata." prefix
            let key = other.strip_prefix("metadata.").unwrap_or(other);
            match node.metadata.get(key) {
                Some(v) => v.to_json(),
                None => {
                    tracing::debug!(field = other, "unknown node filter field, passing through");
                    return None;
                }
            }
        }
    };
    Some(value)
}

fn edge_field(edge: &Edge, field: &str) -> Option<Value> {
    let value = match canonical_field(field) {
        "id" => Value::String(edge.id.to_string()),
        "type" => Value::String(edge.edge_type.as_str().to_string()),
        "strength" => f32_value(edge.strength),
        "source" => Value::String(edge.source.to_string()),
        "target" => Value::String(edge.target.to_string()),
        "is_active" => Value::Bool(edge.is_active),
        "bidirectional" => Value::Bool(edge.bidirectional),
        "interaction_count" => Value::Number(edge.interaction_count.into()),
        "last_interaction" => ts_millis(edge.last_interaction),
        "created_at" => ts_millis(edge.created_at),
        "context" => Value::String(edge.context.clone()),
        other => {
            tracing::debug!(field = other, "unknown edge filter field, passing through");
            return None;
        }
    };
    Some(value)
}

// =============================================================================
// COMPARISON
// =============================================================================

/// Evaluate one filter against a field value.
///
/// Returns None (pass-through) when the field is unknown or the comparison
/// is not meaningful for the value types involved.
fn eval_filter(filter: &Filter, actual: Option<&Value>) -> Option<bool> {
    let actual = actual?;
    let outcome = compare(filter.op, actual, &filter.value)?;
    Some(if filter.negate { !outcome } else { outcome })
}

fn compare(op: FilterOp, actual: &Value, expected: &Value) -> Option<bool> {
    match op {
        FilterOp::Eq => values_equal(actual, expected),
        FilterOp::Ne => values_equal(actual, expected).map(|b| !b),
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let ord = values_ordering(actual, expected)?;
            Some(match op {
                FilterOp::Gt => ord == std::cmp::Ordering::Greater,
                FilterOp::Lt => ord == std::cmp::Ordering::Less,
                FilterOp::Gte => ord != std::cmp::Ordering::Less,
                FilterOp::Lte => ord != std::cmp::Ordering::Greater,
                _ => unreachable!(),
            })
        }
        FilterOp::In => {
            let list = expected.as_array()?;
            Some(
                list.iter()
                    .any(|item| values_equal(actual, item) == Some(true)),
            )
        }
        FilterOp::Nin => {
            let list = expected.as_array()?;
            Some(
                !list
                    .iter()
                    .any(|item| values_equal(actual, item) == Some(true)),
            )
        }
        FilterOp::Contains => match actual {
            Value::String(s) => {
                let needle = expected.as_str()?;
                Some(s.to_lowercase().contains(&needle.to_lowercase()))
            }
            Value::Array(items) => Some(
                items
                    .iter()
                    .any(|item| values_equal(item, expected) == Some(true)),
            ),
            _ => None,
        },
        FilterOp::Regex => {
            let pattern = expected.as_str()?;
            let text = match actual {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let entry = REGEX_CACHE
                .entry(pattern.to_string())
                .or_insert_with(|| match Regex::new(pattern) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        tracing::debug!(pattern, error = %e, "invalid regex filter, passing through");
                        None
                    }
                });
            entry.value().as_ref().map(|re| re.is_match(&text))
        }
    }
}

/// Cross-type equality: numbers compare as f64, strings case-insensitively,
/// date-like strings against epoch-millis numbers.
fn values_equal(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(true),
        (Value::Bool(x), Value::Bool(y)) => Some(x == y),
        (Value::String(x), Value::String(y)) => Some(x.eq_ignore_ascii_case(y)),
        _ => {
            let (x, y) = (as_number(a), as_number(b));
            match (x, y) {
                (Some(x), Some(y)) => Some((x - y).abs() < f64::EPSILON * x.abs().max(1.0)),
                _ => None,
            }
        }
    }
}

fn values_ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Numeric view of a value; date-like strings become epoch milliseconds
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_datetime_millis(s),
        _ => None,
    }
}

fn parse_datetime_millis(s: &str) -> Option<f64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.timestamp_millis() as f64);
    }
    // Bare dates (YYYY-MM-DD) mean midnight UTC
    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let dt = date.and_hms_opt(0, 0, 0)?.and_utc();
        return Some(dt.timestamp_millis() as f64);
    }
    None
}

// =============================================================================
// SORTING & PAGINATION
// =============================================================================

/// Sort nodes by the query's sort specs (timestamp descending when empty)
pub fn sort_nodes(nodes: &mut [Node], sort: &[SortSpec]) {
    let specs: Vec<SortSpec> = if sort.is_empty() {
        vec![SortSpec::desc("timestamp")]
    } else {
        sort.to_vec()
    };

    nodes.sort_by(|a, b| {
        for spec in &specs {
            let va = node_field(a, &spec.field);
            let vb = node_field(b, &spec.field);
            let ord = match (va, vb) {
                (Some(x), Some(y)) => {
                    values_ordering(&x, &y).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => std::cmp::Ordering::Equal,
            };
            let ord = match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Sort edges by the query's sort specs (strength descending when empty)
pub fn sort_edges(edges: &mut [Edge], sort: &[SortSpec]) {
    let specs: Vec<SortSpec> = if sort.is_empty() {
        vec![SortSpec::desc("strength")]
    } else {
        sort.to_vec()
    };

    edges.sort_by(|a, b| {
        for spec in &specs {
            let va = edge_field(a, &spec.field);
            let vb = edge_field(b, &spec.field);
            let ord = match (va, vb) {
                (Some(x), Some(y)) => {
                    values_ordering(&x, &y).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => std::cmp::Ordering::Equal,
            };
            let ord = match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Apply offset + limit
pub fn apply_page<T>(items: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).collect()
}

// =============================================================================
// BUILDER
// =============================================================================

/// Fluent construction for queries
#[derive(Debug, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn node_type(mut self, node_type: NodeType) -> Self {
        self.query.filters.push(Filter::new(
            "type",
            FilterOp::Eq,
            Value::String(node_type.as_str().to_string()),
        ));
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.query.constraints.push(Constraint::Temporal {
            start: Some(start),
            end: Some(end),
        });
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.query.constraints.push(Constraint::Temporal {
            start: Some(start),
            end: None,
        });
        self
    }

    pub fn terms(mut self, terms: Vec<String>) -> Self {
        if !terms.is_empty() {
            self.query.constraints.push(Constraint::Semantic { terms });
        }
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.query.filters.push(Filter::new(
            "tags",
            FilterOp::Contains,
            Value::String(tag.into()),
        ));
        self
    }

    pub fn connected_to(mut self, node: NodeId, via: Option<EdgeType>) -> Self {
        self.query.constraints.push(Constraint::Structural {
            connected_to: node,
            via,
        });
        self
    }

    pub fn min_relevance(mut self, threshold: f32) -> Self {
        self.query.context.relevance_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.query.sort.push(spec);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = offset;
        self
    }

    pub fn include_pruned(mut self) -> Self {
        self.query.include_pruned = true;
        self
    }

    pub fn edges(mut self) -> Self {
        self.query.target = QueryTarget::Edges;
        self
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.query.context.session_id = Some(session_id.into());
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}
