//! Structured error types for the memory graph
//!
//! Provides categorized errors with machine-readable codes for embedding
//! hosts. Internal plumbing uses `anyhow`; errors crossing the public
//! boundary are converted into [`GraphError`].

use std::fmt;

/// Error taxonomy for the public API surface
#[derive(Debug)]
pub enum GraphError {
    // Validation errors
    InvalidInput { field: String, reason: String },
    /// A batch operation failed validation; nothing was written
    BatchRejected { index: usize, reason: String },

    // Not found errors
    NodeNotFound(String),
    EdgeNotFound(String),

    // Conflict errors
    DuplicateEdge { source: String, target: String },
    SnapshotTargetNotEmpty { nodes: u64, edges: u64 },

    // Internal errors
    StorageError(String),
    SerializationError(String),

    /// Maintenance already running; the attempt was skipped, not queued
    MaintenanceContention,

    /// Operation aborted by a cancellation token or deadline
    Cancelled,

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl GraphError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::BatchRejected { .. } => "BATCH_REJECTED",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::EdgeNotFound(_) => "EDGE_NOT_FOUND",
            Self::DuplicateEdge { .. } => "DUPLICATE_EDGE",
            Self::SnapshotTargetNotEmpty { .. } => "SNAPSHOT_TARGET_NOT_EMPTY",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::MaintenanceContention => "MAINTENANCE_CONTENTION",
            Self::Cancelled => "CANCELLED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Detailed human-readable message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::BatchRejected { index, reason } => {
                format!("Batch rejected at operation {index}: {reason}")
            }
            Self::NodeNotFound(id) => format!("Node not found: {id}"),
            Self::EdgeNotFound(id) => format!("Edge not found: {id}"),
            Self::DuplicateEdge { source, target } => {
                format!("Active edge already exists between {source} and {target}")
            }
            Self::SnapshotTargetNotEmpty { nodes, edges } => format!(
                "Snapshot import requires an empty store (found {nodes} nodes, {edges} edges)"
            ),
            Self::StorageError(msg) => format!("Storage error: {msg}"),
            Self::SerializationError(msg) => format!("Serialization error: {msg}"),
            Self::MaintenanceContention => {
                "Maintenance already in progress; attempt skipped".to_string()
            }
            Self::Cancelled => "Operation cancelled".to_string(),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Whether a retry of the same call can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MaintenanceContention | Self::StorageError(_) | Self::Cancelled
        )
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for GraphError {}

impl From<anyhow::Error> for GraphError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<rocksdb::Error> for GraphError {
    fn from(err: rocksdb::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

/// Helper trait to convert internal errors into field-scoped validation errors
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| GraphError::InvalidInput {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using GraphError
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            GraphError::NodeNotFound("123".to_string()).code(),
            "NODE_NOT_FOUND"
        );
        assert_eq!(GraphError::MaintenanceContention.code(), "MAINTENANCE_CONTENTION");
    }

    #[test]
    fn test_messages_carry_context() {
        let err = GraphError::InvalidInput {
            field: "relevance_threshold".to_string(),
            reason: "must be within [0,1]".to_string(),
        };
        assert!(err.message().contains("relevance_threshold"));
        assert!(err.message().contains("[0,1]"));

        let err = GraphError::BatchRejected {
            index: 3,
            reason: "edge references missing node".to_string(),
        };
        assert!(err.message().contains("operation 3"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(GraphError::MaintenanceContention.is_retryable());
        assert!(!GraphError::NodeNotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_validation_ext() {
        let res: anyhow::Result<()> = Err(anyhow::anyhow!("out of range"));
        let mapped = res.map_validation_err("limit");
        match mapped {
            Err(GraphError::InvalidInput { field, .. }) => assert_eq!(field, "limit"),
            other => panic!("expected InvalidInput, got {other:?}"),
        }
    }
}
