//! Engram — an embedded personal memory graph
//!
//! Ingests timestamped activity events and stores them as a graph of typed
//! nodes and weighted edges, then keeps that graph alive: relevance scores
//! decay and recover with use, temporal clusters and behavioral patterns
//! are derived continuously, low-value entities are pruned softly, and
//! queries arrive either structured or as natural language.
//!
//! # Key pieces
//! - Graph store on RocksDB: single keyspace, secondary indexes,
//!   atomic multi-op batches, structured query execution
//! - Relevance engine: multi-factor scoring (recency, frequency,
//!   interaction, semantic, centrality) with pluggable similarity
//! - Temporal engine: sliding-window clustering plus burst/cycle/trend/
//!   anomaly detection
//! - Pruning engine: candidate selection with importance guards, soft
//!   deletion, storage GC
//! - Query translation: natural language to structured queries
//! - Context windows: bounded per-session working sets
//!
//! [`engine::MemoryGraph`] ties them together behind one handle.
//!
//! Everything runs in-process: no server, no external database, full
//! offline operation.

pub mod cancel;
pub mod clustering;
pub mod config;
pub mod constants;
pub mod context;
pub mod decay;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod ingest;
pub mod patterns;
pub mod pruning;
pub mod relevance;
pub mod tracing_setup;
pub mod translate;

// Re-export dependencies so tests and benchmarks use the same versions
pub use chrono;
pub use parking_lot;
pub use uuid;
