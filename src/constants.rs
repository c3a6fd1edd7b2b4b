//! Documented constants for the memory graph
//!
//! All tunable parameters with justification for their values. Centralizing
//! constants prevents magic numbers and makes tuning easier. Runtime-tunable
//! values live in [`crate::config`]; the defaults there reference these.

// =============================================================================
// RECENCY DECAY CONSTANTS
// Multi-scale exponential decay: three half-lives blended so that both
// "what just happened" and "what mattered this week" contribute.
// =============================================================================

/// Short-scale half-life in hours (working session scale)
///
/// Justification:
/// - 6 hours roughly matches one focused work block
/// - A node untouched since this morning should have visibly cooled by evening
pub const RECENCY_SHORT_HALF_LIFE_HOURS: f64 = 6.0;

/// Medium-scale half-life in hours (daily scale)
///
/// Justification:
/// - 24 hours matches the daily work cycle
/// - Yesterday's context stays warm into today, then fades
pub const RECENCY_MEDIUM_HALF_LIFE_HOURS: f64 = 24.0;

/// Long-scale half-life in hours (weekly scale)
///
/// Justification:
/// - 168 hours (7 days) matches the weekly planning cycle
/// - Keeps last week's projects retrievable without dominating results
/// - Consistent with Ebbinghaus-style forgetting plateaus around one week
pub const RECENCY_LONG_HALF_LIFE_HOURS: f64 = 168.0;

/// Blend weights for the three recency scales
///
/// Short dominates (0.5) because the graph primarily serves "what am I doing
/// right now" queries; medium (0.3) and long (0.2) keep the tail from
/// collapsing to zero within a day.
pub const RECENCY_SHORT_WEIGHT: f64 = 0.5;
pub const RECENCY_MEDIUM_WEIGHT: f64 = 0.3;
pub const RECENCY_LONG_WEIGHT: f64 = 0.2;

/// Weight of the last-access recency boost relative to event-time recency
///
/// A node whose event is old but that was touched minutes ago is still hot.
/// 0.3 lets access recency lift a stale node without overriding the event
/// timeline.
pub const RECENCY_ACCESS_BLEND: f64 = 0.3;

// =============================================================================
// SCORING FACTOR WEIGHTS
// Default blend for node relevance. Must sum to 1.0 so the combined score
// stays in [0,1] without renormalization.
// =============================================================================

/// Weight for temporal recency in the relevance blend
///
/// Justification:
/// - 0.30 makes recency the strongest single factor
/// - A personal activity graph is queried overwhelmingly about recent work
pub const SCORE_RECENCY_WEIGHT: f32 = 0.30;

/// Weight for access frequency
pub const SCORE_FREQUENCY_WEIGHT: f32 = 0.15;

/// Weight for interaction patterns (regularity, recency of interaction)
pub const SCORE_INTERACTION_WEIGHT: f32 = 0.20;

/// Weight for semantic similarity to the active query context
pub const SCORE_SEMANTIC_WEIGHT: f32 = 0.15;

/// Weight for graph centrality
///
/// Kept modest (0.10): hub nodes are already favored by frequency and
/// interaction, and over-weighting centrality buries fresh leaf nodes.
pub const SCORE_CENTRALITY_WEIGHT: f32 = 0.10;

/// Degree at which the fallback centrality estimate saturates
///
/// When no computed centrality is available the engine falls back to
/// `ln(1 + degree) / ln(1 + scale)`. 32 active edges is hub territory in a
/// personal graph; anything beyond that scores as fully central.
pub const CENTRALITY_DEGREE_SCALE: f32 = 32.0;

/// Weight for the per-type prior
pub const SCORE_TYPE_WEIGHT: f32 = 0.10;

/// Expected maximum access count for frequency normalization
///
/// `ln(1 + count) / ln(1 + expected_max)` maps counts into [0,1].
///
/// Justification:
/// - 100 accesses saturates the frequency factor
/// - Observed heavy-use nodes (active project hubs) land around 50-150
///   accesses per month; log scaling keeps the curve useful below that
pub const FREQUENCY_EXPECTED_MAX: f32 = 100.0;

/// Burst detection: trailing-24h rate must exceed this multiple of the
/// per-day baseline before the burst boost applies
pub const BURST_RATE_MULTIPLIER: f32 = 3.0;

/// Multiplier applied to the frequency factor during a detected burst
///
/// 1.25 is enough to float bursting nodes above steady-state peers without
/// letting one busy hour rewrite the ranking.
pub const BURST_BOOST: f32 = 1.25;

/// Per-node interaction history ring capacity
///
/// Justification:
/// - 64 interactions cover several weeks of typical per-node activity
/// - Consistency statistics stabilize after ~10 samples; 64 bounds memory
///   at a few KB per hot node
pub const INTERACTION_HISTORY_CAPACITY: usize = 64;

/// Multiplicative score boost applied when an interaction is recorded
///
/// Small increments over time produce stable reinforcement; large jumps let
/// a single lucky access dominate future rankings.
pub const INTERACTION_SCORE_BOOST: f32 = 1.05;

/// Score cache entry time-to-live in seconds
///
/// 300s keeps repeated scoring of the same working set cheap while ensuring
/// decay is visible within minutes, not hours.
pub const SCORE_CACHE_TTL_SECS: u64 = 300;

// =============================================================================
// EDGE CONSTANTS
// =============================================================================

/// Initial strength for new edges
///
/// 0.5 is neutral: room to strengthen through co-activation and to fade
/// when the association stops being exercised.
pub const EDGE_INITIAL_STRENGTH: f32 = 0.5;

/// Default per-day strength decay rate for edges
pub const EDGE_DEFAULT_DECAY_RATE: f32 = 0.02;

/// Strength floor below which an edge is a pruning candidate
pub const EDGE_MIN_STRENGTH: f32 = 0.15;

/// Strength boost per recorded edge interaction
pub const EDGE_INTERACTION_BOOST: f32 = 0.05;

// =============================================================================
// CLUSTERING CONSTANTS
// =============================================================================

/// Default sliding-window duration in minutes
///
/// 30 minutes matches the granularity of focused activity blocks: browser
/// sessions, commit batches, and call notes land inside one window.
pub const CLUSTER_WINDOW_MINUTES: i64 = 30;

/// Minimum members for an accepted cluster
///
/// Two co-occurring events are routine; three establish a session.
pub const CLUSTER_MIN_SIZE: usize = 3;

/// Maximum members for an accepted cluster
///
/// Above 50, a "cluster" is really the whole day and carries no signal.
pub const CLUSTER_MAX_SIZE: usize = 50;

/// Overlap ratio (shared members / smaller cluster) above which two
/// adjacent candidate clusters merge
pub const CLUSTER_MERGE_OVERLAP: f64 = 0.5;

// =============================================================================
// PATTERN DETECTION CONSTANTS
// =============================================================================

/// Burst threshold: bucket count must exceed this multiple of the trailing
/// baseline mean
pub const PATTERN_BURST_MULTIPLIER: f64 = 2.0;

/// Z-score above which a bucket is an anomaly
///
/// 2.0 standard deviations keeps the false-positive rate near 5% under the
/// roughly normal bucket-count distribution observed in practice.
pub const PATTERN_ANOMALY_SIGMA: f64 = 2.0;

/// Minimum absolute Pearson correlation for a trend to be reported
pub const PATTERN_TREND_MIN_CORRELATION: f64 = 0.6;

/// Minimum day-over-day slope (events/day) for a trend to be reported
pub const PATTERN_TREND_MIN_SLOPE: f64 = 0.5;

/// Coefficient-of-variation ceiling for cyclic behavior
///
/// Same-hour (or same-weekday) bucket counts with stddev/mean below this are
/// regular enough to call a cycle.
pub const PATTERN_CYCLE_MAX_CV: f64 = 0.5;

/// Days of history a pattern-detection run consumes
///
/// 28 days is exactly four weeks, so same-weekday cycle buckets always
/// compare equal numbers of Mondays, Tuesdays, and so on.
pub const PATTERN_LOOKBACK_DAYS: i64 = 28;

/// Minimum events in a bucket before burst/anomaly math applies
///
/// Sparse timelines make ratios meaningless (3 events against a baseline
/// of 0.1 is noise, not a burst).
pub const PATTERN_MIN_BUCKET_EVENTS: u64 = 5;

// =============================================================================
// PRUNING CONSTANTS
// =============================================================================

/// Relevance threshold below which an active node is a pruning candidate
pub const PRUNE_RELEVANCE_THRESHOLD: f32 = 0.2;

/// Minimum seconds between automatic pruning runs
///
/// One hour: pruning is maintenance, not a hot path, and back-to-back runs
/// on an unchanged graph are wasted IO (the second run finds nothing).
pub const PRUNE_MIN_INTERVAL_SECS: u64 = 3600;

/// Centrality above which a node is protected from pruning
pub const PRUNE_CENTRALITY_GUARD: f32 = 0.7;

/// Degree ratio (node degree / max observed degree) above which a node is
/// protected
pub const PRUNE_DEGREE_RATIO_GUARD: f32 = 0.8;

/// Days since last access inside which a node is protected
pub const PRUNE_ACCESS_GRACE_DAYS: i64 = 7;

/// Nodes younger than this many days with at least PRUNE_YOUNG_MIN_ACCESSES
/// accesses are protected (fresh but already active)
pub const PRUNE_YOUNG_AGE_DAYS: i64 = 3;
pub const PRUNE_YOUNG_MIN_ACCESSES: u32 = 5;

/// Community size at or above which membership protects a node
pub const PRUNE_COMMUNITY_SIZE_GUARD: usize = 5;

/// Cluster density below which a cluster row is removed
pub const PRUNE_CLUSTER_MIN_DENSITY: f64 = 0.2;

/// Pattern confidence below which a pattern row is removed
pub const PRUNE_PATTERN_MIN_CONFIDENCE: f64 = 0.3;

/// Maximum age in days for cluster and pattern rows
pub const PRUNE_DERIVED_MAX_AGE_DAYS: i64 = 90;

/// Days a node must have been pruned before its embedding vector is shed
pub const GC_EMBEDDING_SHED_DAYS: i64 = 30;

// =============================================================================
// ADVISORY SIZE ESTIMATES
// Used only for the memory-saved report after pruning. Intentionally rough;
// real sizes vary with content length and metadata.
// =============================================================================

/// Estimated bytes per node row (content + metadata + struct + serialization)
pub const ESTIMATED_BYTES_PER_NODE: usize = 2 * 1024;

/// Estimated bytes per edge row
pub const ESTIMATED_BYTES_PER_EDGE: usize = 256;

/// Estimated bytes per float of a stored embedding vector
pub const ESTIMATED_BYTES_PER_EMBEDDING_DIM: usize = 4;

// =============================================================================
// AUDIT LOG CONSTANTS
// =============================================================================

/// Days of audit history retained before the GC sweep trims entries
///
/// 30 days covers a monthly review cycle; the audit log is diagnostic, not
/// a system of record.
pub const AUDIT_RETENTION_DAYS: i64 = 30;

// =============================================================================
// CONTEXT WINDOW CONSTANTS
// =============================================================================

/// Default capacity of the per-session recent-node window
pub const CONTEXT_MAX_RECENT_NODES: usize = 50;

/// Default capacity of the per-session recent-edge window
pub const CONTEXT_MAX_RECENT_EDGES: usize = 30;

/// Default capacity of the per-session relevant-node window
pub const CONTEXT_MAX_RELEVANT_NODES: usize = 30;

/// Default capacity of the per-session relevant-edge window
pub const CONTEXT_MAX_RELEVANT_EDGES: usize = 20;

/// Queries remembered per session
pub const CONTEXT_QUERY_HISTORY: usize = 20;

/// Multiplicative window-score decay applied per maintenance cycle
pub const CONTEXT_DECAY_FACTOR: f32 = 0.9;

/// Window entries below this score are evicted during decay
pub const CONTEXT_EVICTION_THRESHOLD: f32 = 0.1;

/// Minutes of inactivity before a session window is dropped
pub const CONTEXT_IDLE_TIMEOUT_MINUTES: i64 = 30;

/// Hours of history used to seed a fresh session window's recent set
pub const CONTEXT_SEED_WINDOW_HOURS: i64 = 24;

/// Multiplier applied to a window entry's score when a query surfaces it
/// again. Modest on purpose: repeated hits should compound, a single hit
/// should not pin an entry at the ceiling.
pub const CONTEXT_QUERY_BOOST: f32 = 1.2;

/// Supplemental relevant-context items attached to a translated query's
/// outcome, beyond the direct results
pub const CONTEXT_SUPPLEMENT_LIMIT: usize = 5;

// =============================================================================
// QUERY DEFAULTS
// =============================================================================

/// Default result limit for queries
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Days covered by "recent" when no explicit range is given
pub const DEFAULT_RECENT_DAYS: i64 = 7;

/// Relevance index bucket count (score quantized to one decimal)
pub const RELEVANCE_BUCKETS: u32 = 10;

/// Query-result cache time-to-live in seconds
pub const QUERY_CACHE_TTL_SECS: u64 = 60;

/// Minimum intent-match confidence before translation trusts an intent
/// over the generic search fallback
pub const INTENT_CONFIDENCE_FLOOR: f32 = 0.25;

/// Ceiling for result limits parsed out of natural language. "top 50000"
/// is almost always a typo or an unbounded request; callers that really
/// want everything build the query programmatically.
pub const MAX_TRANSLATED_LIMIT: usize = 500;

// =============================================================================
// INGESTION
// =============================================================================

/// Consecutive events closer together than this are treated as one working
/// session and linked with a temporal edge. 30 minutes matches the common
/// web-analytics session boundary.
pub const INGEST_SESSION_GAP_MINUTES: i64 = 30;

/// Strength given to temporal edges created during ingestion. Above the
/// prune floor but below a deliberate reference.
pub const INGEST_TEMPORAL_EDGE_STRENGTH: f32 = 0.4;

/// Strength given to reference edges created from explicit `related_to`
/// metadata. The user said these belong together.
pub const INGEST_REFERENCE_EDGE_STRENGTH: f32 = 0.7;
