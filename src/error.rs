//! Vellum error types

/// Crate-level error type.
///
/// Business-rule outcomes (quota denials, premium gating) are not errors
/// in this sense; they live in [`QuotaDenial`](crate::credits::QuotaDenial)
/// and [`LedgerError`](crate::credits::LedgerError). This type covers
/// configuration, serialization and wiring faults.
#[derive(Debug, thiserror::Error)]
pub enum VellumError {
    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no account store configured")]
    NoAccountStore,

    #[error("unknown AI operation: {0}")]
    UnknownOperation(String),

    // Infrastructure errors
    #[error("account store error: {0}")]
    Store(#[from] crate::credits::StoreError),
}

/// Result type alias for Vellum operations
pub type Result<T> = std::result::Result<T, VellumError>;
