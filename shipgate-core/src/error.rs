//! Error types for the shipgate crates.

use thiserror::Error;

/// Result type alias using the shipgate error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for gate components.
///
/// Components report failures as tagged variants instead of suppressing them
/// internally; the orchestrator maps every variant to "no signal" so the gate
/// itself never becomes the reason a workflow cannot proceed.
#[derive(Error, Debug)]
pub enum Error {
    /// A persisted resource (marker, document, table row) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A persisted resource exists but cannot be understood
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A subprocess exceeded its timeout
    #[error("timed out after {0} seconds")]
    Timeout(u64),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Check if this is a missing-resource error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a timeout.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_predicates() {
        assert!(Error::NotFound("marker".into()).is_not_found());
        assert!(!Error::Corrupt("marker".into()).is_not_found());
        assert!(Error::Timeout(120).is_timeout());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::Timeout(30);
        assert_eq!(err.to_string(), "timed out after 30 seconds");
        let err = Error::Corrupt("bad yaml".into());
        assert_eq!(err.to_string(), "corrupt data: bad yaml");
    }
}
