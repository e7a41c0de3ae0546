use vellum::credits::{DenialReason, LedgerError, QuotaDenial, StoreError};
use vellum::{AiOperation, Result, VellumError};

#[test]
fn test_error_display() {
    let err = VellumError::UnknownOperation("write-novel".to_string());
    assert!(err.to_string().contains("write-novel"));
}

#[test]
fn test_configuration_error() {
    let err = VellumError::Configuration("bad value".into());
    assert!(err.to_string().contains("configuration error"));
}

#[test]
fn test_result_alias() {
    fn returns_error() -> Result<()> {
        Err(VellumError::NoAccountStore)
    }
    assert!(returns_error().is_err());
}

#[test]
fn test_json_error_converts() {
    fn parse() -> Result<serde_json::Value> {
        Ok(serde_json::from_str("{not json")?)
    }
    assert!(matches!(parse(), Err(VellumError::Json(_))));
}

#[test]
fn test_store_error_converts() {
    fn store() -> Result<()> {
        Err(VellumError::from(StoreError::Conflict))
    }
    assert!(matches!(store(), Err(VellumError::Store(StoreError::Conflict))));
}

// ============================================================================
// Ledger and denial vocabulary
// ============================================================================

#[test]
fn ledger_errors_map_to_one_reason_each() {
    let cases = [
        (
            LedgerError::InvalidOperation {
                operation: "x".into(),
            },
            DenialReason::InvalidOperation,
        ),
        (
            LedgerError::PremiumRequired {
                operation: AiOperation::TailorResume,
            },
            DenialReason::PremiumRequired,
        ),
        (
            LedgerError::Store(StoreError::Malformed("plan".into())),
            DenialReason::CreditCheckError,
        ),
    ];
    for (err, reason) in cases {
        assert_eq!(QuotaDenial::from_ledger("op", &err).reason, reason);
    }
}

#[test]
fn transient_store_errors() {
    assert!(StoreError::Conflict.is_transient());
    assert!(!StoreError::Unavailable("down".into()).is_transient());
    assert!(!StoreError::Malformed("plan".into()).is_transient());
}

#[test]
fn denial_is_a_std_error() {
    let denial: Box<dyn std::error::Error> = Box::new(QuotaDenial::invalid_operation("x"));
    assert!(denial.to_string().contains("invalid_operation"));
}

// ============================================================================
// Generation errors
// ============================================================================

#[test]
fn generate_error_display_and_sources() {
    use std::error::Error;
    use vellum::GenerateError;

    let denied: GenerateError<std::io::Error> =
        GenerateError::Denied(QuotaDenial::invalid_operation("write-novel"));
    assert_eq!(
        denied.to_string(),
        "request denied: invalid_operation (write-novel)"
    );
    let source = denied.source().unwrap();
    assert!(source.downcast_ref::<QuotaDenial>().is_some());

    let producer: GenerateError<std::io::Error> =
        GenerateError::Producer(std::io::Error::other("model overloaded"));
    assert_eq!(producer.to_string(), "model overloaded");
    assert!(producer.denial().is_none());

    let bad_json = serde_json::from_str::<u32>("\"x\"").unwrap_err();
    let decode: GenerateError<std::io::Error> = GenerateError::Decode(bad_json);
    assert!(decode.to_string().starts_with("failed to decode cached result"));
    assert!(decode.source().unwrap().is::<serde_json::Error>());
}
