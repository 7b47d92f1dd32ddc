//! Error taxonomy shared across the control plane.
//!
//! Two enums cover the two failure surfaces: `ServiceError` classifies
//! responses from external collaborators (matchmaking, orchestration,
//! accelerator) and `StoreError` covers the durable stores. Components map
//! these into their own run-level errors.

/// Classified failure from an external service call.
///
/// The classification is what callers branch on: throttling is retryable,
/// not-found is frequently success for idempotent operations, and
/// unavailability aborts the whole invocation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    /// The service rejected the call due to rate or capacity limits.
    #[error("throttled: {0}")]
    Throttled(String),
    /// The referenced resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),
    /// The service could not be reached or returned a server-side failure.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// The response arrived but did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// True when the error means the target resource is already absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }

    /// True when the error is worth retrying with backoff.
    pub fn is_throttled(&self) -> bool {
        matches!(self, ServiceError::Throttled(_))
    }
}

/// Failure from a connection or port-mapping store operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A stored value could not be encoded or decoded.
    #[error("store serialization failed: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_classification() {
        assert!(ServiceError::NotFound("unit-1".into()).is_not_found());
        assert!(!ServiceError::Throttled("slow down".into()).is_not_found());
        assert!(ServiceError::Throttled("slow down".into()).is_throttled());
    }

    #[test]
    fn error_messages_carry_context() {
        let err = StoreError::Unavailable("connection refused".into());
        assert_eq!(err.to_string(), "store unavailable: connection refused");
    }
}
