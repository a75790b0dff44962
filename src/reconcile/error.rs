//! Error types for the reconciliation engine

use crate::gateway::GatewayError;
use thiserror::Error;

/// Errors that can escape a reconciliation run
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Event store operation failed
    #[error("event store error: {0}")]
    Store(String),

    /// Policy store operation failed
    #[error("policy store error: {0}")]
    Policy(String),

    /// Messaging gateway failure that was not maskable per-item
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Result type for reconciliation operations
pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ReconcileError::Store("connection refused".to_string());
        assert_eq!(error.to_string(), "event store error: connection refused");

        let error = ReconcileError::Policy("scan failed".to_string());
        assert_eq!(error.to_string(), "policy store error: scan failed");
    }
}
