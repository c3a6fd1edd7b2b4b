//! Configuration for the memory graph
//!
//! All configurable parameters in one place with environment variable
//! overrides. Follows the principle: sensible defaults, configurable in
//! production. Defaults reference [`crate::constants`] where a value has a
//! documented justification.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use tracing::info;

use crate::constants::*;
use crate::graph::types::NodeType;

/// Store-level settings (RocksDB tuning + audit retention)
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the RocksDB database
    pub path: PathBuf,
    /// Block cache size in MB
    pub block_cache_mb: usize,
    /// Write buffer size in MB
    pub write_buffer_mb: usize,
    /// Days of audit history kept before GC trims entries
    pub audit_retention_days: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./engram_data"),
            block_cache_mb: 256,
            write_buffer_mb: 64,
            audit_retention_days: AUDIT_RETENTION_DAYS,
        }
    }
}

/// Relevance scoring settings
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Factor weights; should sum to 1.0 (checked with a warning in log())
    pub recency_weight: f32,
    pub frequency_weight: f32,
    pub interaction_weight: f32,
    pub semantic_weight: f32,
    pub centrality_weight: f32,
    pub type_weight: f32,

    /// Access count at which the frequency factor saturates
    pub frequency_expected_max: f32,
    /// Trailing-24h rate multiple that counts as a burst
    pub burst_rate_multiplier: f32,
    /// Frequency-factor multiplier during a burst
    pub burst_boost: f32,
    /// Share of recency given to last-access time (vs event time)
    pub access_blend: f64,

    /// Per-type score priors; falls back to NodeType::default_weight
    pub type_weights: HashMap<NodeType, f32>,

    /// Cached score time-to-live in seconds
    pub score_cache_ttl_secs: u64,
    /// Per-node interaction history ring capacity
    pub interaction_history_capacity: usize,

    /// Recompute batches run on scoped threads instead of sequentially
    pub parallel_recompute: bool,
    /// Nodes per recompute batch (each batch commits independently)
    pub recompute_batch_size: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_weight: SCORE_RECENCY_WEIGHT,
            frequency_weight: SCORE_FREQUENCY_WEIGHT,
            interaction_weight: SCORE_INTERACTION_WEIGHT,
            semantic_weight: SCORE_SEMANTIC_WEIGHT,
            centrality_weight: SCORE_CENTRALITY_WEIGHT,
            type_weight: SCORE_TYPE_WEIGHT,
            frequency_expected_max: FREQUENCY_EXPECTED_MAX,
            burst_rate_multiplier: BURST_RATE_MULTIPLIER,
            burst_boost: BURST_BOOST,
            access_blend: RECENCY_ACCESS_BLEND,
            type_weights: HashMap::new(),
            score_cache_ttl_secs: SCORE_CACHE_TTL_SECS,
            interaction_history_capacity: INTERACTION_HISTORY_CAPACITY,
            parallel_recompute: false,
            recompute_batch_size: 256,
        }
    }
}

impl ScoringConfig {
    /// Prior for a node type, honoring configured overrides
    pub fn type_weight_for(&self, node_type: NodeType) -> f32 {
        self.type_weights
            .get(&node_type)
            .copied()
            .unwrap_or_else(|| node_type.default_weight())
    }

    /// Sum of the six factor weights
    pub fn weight_sum(&self) -> f32 {
        self.recency_weight
            + self.frequency_weight
            + self.interaction_weight
            + self.semantic_weight
            + self.centrality_weight
            + self.type_weight
    }
}

/// Temporal clustering settings
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    /// Sliding-window duration in minutes
    pub window_minutes: i64,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    /// Overlap ratio above which adjacent candidates merge
    pub merge_overlap: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            window_minutes: CLUSTER_WINDOW_MINUTES,
            min_cluster_size: CLUSTER_MIN_SIZE,
            max_cluster_size: CLUSTER_MAX_SIZE,
            merge_overlap: CLUSTER_MERGE_OVERLAP,
        }
    }
}

/// Pruning thresholds and importance guards
///
/// Guards are configuration, not literals: deployments tune how protective
/// the pruner is about hubs, fresh nodes and community members.
#[derive(Debug, Clone)]
pub struct PruningConfig {
    /// Active nodes below this relevance are candidates
    pub relevance_threshold: f32,
    /// Active edges below this effective strength are candidates
    pub edge_strength_threshold: f32,
    /// Minimum seconds between automatic runs
    pub min_interval_secs: u64,

    // === Importance guards ===
    /// Centrality at or above this protects a node
    pub centrality_guard: f32,
    /// Degree / max-observed-degree at or above this protects a node
    pub degree_ratio_guard: f32,
    /// Nodes accessed within this many days are protected
    pub access_grace_days: i64,
    /// Young-but-active guard: age below this many days …
    pub young_age_days: i64,
    /// … with at least this many accesses protects a node
    pub young_min_accesses: u32,
    /// Community membership of at least this size protects a node
    pub community_size_guard: usize,

    // === Derived-entity pruning ===
    pub cluster_min_density: f64,
    pub pattern_min_confidence: f64,
    pub derived_max_age_days: i64,

    // === GC sweep ===
    /// Days after pruning before a node's embedding vector is shed
    pub embedding_shed_days: i64,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: PRUNE_RELEVANCE_THRESHOLD,
            edge_strength_threshold: EDGE_MIN_STRENGTH,
            min_interval_secs: PRUNE_MIN_INTERVAL_SECS,
            centrality_guard: PRUNE_CENTRALITY_GUARD,
            degree_ratio_guard: PRUNE_DEGREE_RATIO_GUARD,
            access_grace_days: PRUNE_ACCESS_GRACE_DAYS,
            young_age_days: PRUNE_YOUNG_AGE_DAYS,
            young_min_accesses: PRUNE_YOUNG_MIN_ACCESSES,
            community_size_guard: PRUNE_COMMUNITY_SIZE_GUARD,
            cluster_min_density: PRUNE_CLUSTER_MIN_DENSITY,
            pattern_min_confidence: PRUNE_PATTERN_MIN_CONFIDENCE,
            derived_max_age_days: PRUNE_DERIVED_MAX_AGE_DAYS,
            embedding_shed_days: GC_EMBEDDING_SHED_DAYS,
        }
    }
}

/// Per-session context window settings
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_recent_nodes: usize,
    pub max_recent_edges: usize,
    pub max_relevant_nodes: usize,
    pub max_relevant_edges: usize,
    pub query_history: usize,
    /// Multiplicative window-score decay per maintenance cycle
    pub decay_factor: f32,
    /// Entries below this score are evicted during decay
    pub eviction_threshold: f32,
    /// Minutes of inactivity before a session window is dropped
    pub idle_timeout_minutes: i64,
    /// Hours of history used to seed a fresh window's recent set
    pub seed_window_hours: i64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_recent_nodes: CONTEXT_MAX_RECENT_NODES,
            max_recent_edges: CONTEXT_MAX_RECENT_EDGES,
            max_relevant_nodes: CONTEXT_MAX_RELEVANT_NODES,
            max_relevant_edges: CONTEXT_MAX_RELEVANT_EDGES,
            query_history: CONTEXT_QUERY_HISTORY,
            decay_factor: CONTEXT_DECAY_FACTOR,
            eviction_threshold: CONTEXT_EVICTION_THRESHOLD,
            idle_timeout_minutes: CONTEXT_IDLE_TIMEOUT_MINUTES,
            seed_window_hours: CONTEXT_SEED_WINDOW_HOURS,
        }
    }
}

/// Query translation settings
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    /// Result limit when the text names none
    pub default_limit: usize,
    /// Days covered by "recent" and the fallback query
    pub recent_days: i64,
    /// Intent-match confidence below which translation falls back to Search
    pub intent_confidence_floor: f32,
    /// Porter-stem extracted keywords
    pub enable_stemming: bool,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
            recent_days: DEFAULT_RECENT_DAYS,
            intent_confidence_floor: INTENT_CONFIDENCE_FLOOR,
            enable_stemming: true,
        }
    }
}

/// Top-level configuration aggregating every engine's settings
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub store: StoreConfig,
    pub scoring: ScoringConfig,
    pub clustering: ClusteringConfig,
    pub pruning: PruningConfig,
    pub context: ContextConfig,
    pub translate: TranslateConfig,
    /// Query-result cache TTL in seconds (0 disables the cache)
    pub query_cache_ttl_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            scoring: ScoringConfig::default(),
            clustering: ClusteringConfig::default(),
            pruning: PruningConfig::default(),
            context: ContextConfig::default(),
            translate: TranslateConfig::default(),
            query_cache_ttl_secs: QUERY_CACHE_TTL_SECS,
        }
    }
}

impl GraphConfig {
    /// Build a config rooted at `path` with defaults everywhere else
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.store.path = path.into();
        config
    }

    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("ENGRAM_DATA_PATH") {
            config.store.path = PathBuf::from(val);
        }

        if let Ok(val) = env::var("ENGRAM_BLOCK_CACHE_MB") {
            if let Ok(n) = val.parse() {
                config.store.block_cache_mb = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_WRITE_BUFFER_MB") {
            if let Ok(n) = val.parse() {
                config.store.write_buffer_mb = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_AUDIT_RETENTION_DAYS") {
            if let Ok(n) = val.parse() {
                config.store.audit_retention_days = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_PRUNE_THRESHOLD") {
            if let Ok(n) = val.parse::<f32>() {
                config.pruning.relevance_threshold = n.clamp(0.0, 1.0);
            }
        }

        if let Ok(val) = env::var("ENGRAM_PRUNE_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.pruning.min_interval_secs = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_CLUSTER_WINDOW_MINUTES") {
            if let Ok(n) = val.parse::<i64>() {
                config.clustering.window_minutes = n.max(1);
            }
        }

        if let Ok(val) = env::var("ENGRAM_CLUSTER_MIN_SIZE") {
            if let Ok(n) = val.parse::<usize>() {
                config.clustering.min_cluster_size = n.max(2);
            }
        }

        if let Ok(val) = env::var("ENGRAM_CONTEXT_MAX_RECENT") {
            if let Ok(n) = val.parse() {
                config.context.max_recent_nodes = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_CONTEXT_IDLE_MINUTES") {
            if let Ok(n) = val.parse() {
                config.context.idle_timeout_minutes = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_QUERY_CACHE_TTL") {
            if let Ok(n) = val.parse() {
                config.query_cache_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_PARALLEL_RECOMPUTE") {
            config.scoring.parallel_recompute = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = env::var("ENGRAM_SCORE_CACHE_TTL") {
            if let Ok(n) = val.parse() {
                config.scoring.score_cache_ttl_secs = n;
            }
        }

        if let Ok(val) = env::var("ENGRAM_DEFAULT_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.translate.default_limit = n.clamp(1, 500);
            }
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("Configuration:");
        info!("   Storage: {:?}", self.store.path);
        info!(
            "   RocksDB: {}MB block cache, {}MB write buffer",
            self.store.block_cache_mb, self.store.write_buffer_mb
        );
        info!("   Audit retention: {} days", self.store.audit_retention_days);
        info!(
            "   Scoring weights: recency={:.2} freq={:.2} interact={:.2} semantic={:.2} central={:.2} type={:.2}",
            self.scoring.recency_weight,
            self.scoring.frequency_weight,
            self.scoring.interaction_weight,
            self.scoring.semantic_weight,
            self.scoring.centrality_weight,
            self.scoring.type_weight,
        );
        let sum = self.scoring.weight_sum();
        if (sum - 1.0).abs() > 0.01 {
            tracing::warn!(
                "Scoring weights sum to {:.3}, not 1.0; combined scores will still clamp to [0,1]",
                sum
            );
        }
        info!(
            "   Clustering: {}min window, size {}..={}, merge overlap {:.2}",
            self.clustering.window_minutes,
            self.clustering.min_cluster_size,
            self.clustering.max_cluster_size,
            self.clustering.merge_overlap,
        );
        info!(
            "   Pruning: threshold {:.2}, min interval {}s",
            self.pruning.relevance_threshold, self.pruning.min_interval_secs
        );
        info!(
            "   Context: {} recent / {} relevant nodes, idle timeout {}min",
            self.context.max_recent_nodes,
            self.context.max_relevant_nodes,
            self.context.idle_timeout_minutes,
        );
        if self.query_cache_ttl_secs > 0 {
            info!("   Query cache TTL: {}s", self.query_cache_ttl_secs);
        } else {
            info!("   Query cache: disabled");
        }
        if self.scoring.parallel_recompute {
            info!(
                "   Recompute: parallel, batch size {}",
                self.scoring.recompute_batch_size
            );
        } else {
            info!(
                "   Recompute: sequential, batch size {}",
                self.scoring.recompute_batch_size
            );
        }
    }
}

/// Environment variable documentation
pub fn print_env_help() {
    println!("engram-graph configuration environment variables:");
    println!();
    println!("  ENGRAM_DATA_PATH              - Storage directory (default: ./engram_data)");
    println!("  ENGRAM_BLOCK_CACHE_MB         - RocksDB block cache MB (default: 256)");
    println!("  ENGRAM_WRITE_BUFFER_MB        - RocksDB write buffer MB (default: 64)");
    println!("  ENGRAM_AUDIT_RETENTION_DAYS   - Audit log retention days (default: 30)");
    println!("  ENGRAM_PRUNE_THRESHOLD        - Relevance pruning threshold (default: 0.2)");
    println!("  ENGRAM_PRUNE_INTERVAL_SECS    - Min seconds between prune runs (default: 3600)");
    println!("  ENGRAM_CLUSTER_WINDOW_MINUTES - Clustering window minutes (default: 30)");
    println!("  ENGRAM_CLUSTER_MIN_SIZE       - Minimum cluster size (default: 3)");
    println!("  ENGRAM_CONTEXT_MAX_RECENT     - Recent nodes per session (default: 50)");
    println!("  ENGRAM_CONTEXT_IDLE_MINUTES   - Session idle timeout (default: 30)");
    println!("  ENGRAM_QUERY_CACHE_TTL        - Query cache TTL seconds, 0 = off (default: 60)");
    println!("  ENGRAM_SCORE_CACHE_TTL        - Score cache TTL seconds (default: 300)");
    println!("  ENGRAM_PARALLEL_RECOMPUTE     - 'true' to recompute scores on threads");
    println!("  ENGRAM_DEFAULT_LIMIT          - Default query result limit (default: 20)");
    println!();
    println!("  RUST_LOG                      - Log level (e.g., info, debug, trace)");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GraphConfig::default();
        assert_eq!(config.clustering.min_cluster_size, 3);
        assert_eq!(config.translate.default_limit, 20);
        assert_eq!(config.pruning.relevance_threshold, 0.2);
        assert_eq!(config.query_cache_ttl_secs, 60);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let scoring = ScoringConfig::default();
        assert!((scoring.weight_sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_type_weight_override() {
        let mut scoring = ScoringConfig::default();
        assert_eq!(scoring.type_weight_for(NodeType::Project), 1.0);
        scoring.type_weights.insert(NodeType::Project, 0.3);
        assert_eq!(scoring.type_weight_for(NodeType::Project), 0.3);
    }

    // Env vars are process-global; one test owns them to avoid interleaving
    #[test]
    fn test_env_override_and_clamp() {
        env::set_var("ENGRAM_PRUNE_THRESHOLD", "0.35");
        env::set_var("ENGRAM_CLUSTER_MIN_SIZE", "4");
        let config = GraphConfig::from_env();
        assert_eq!(config.pruning.relevance_threshold, 0.35);
        assert_eq!(config.clustering.min_cluster_size, 4);

        env::set_var("ENGRAM_PRUNE_THRESHOLD", "7.5");
        let config = GraphConfig::from_env();
        assert_eq!(config.pruning.relevance_threshold, 1.0);

        env::remove_var("ENGRAM_PRUNE_THRESHOLD");
        env::remove_var("ENGRAM_CLUSTER_MIN_SIZE");
    }

    #[test]
    fn test_at_path() {
        let config = GraphConfig::at_path("/tmp/somewhere");
        assert_eq!(config.store.path, PathBuf::from("/tmp/somewhere"));
    }
}
