//! Vellum - metered, cached AI operations
//!
//! This crate puts two things in front of expensive AI calls:
//!
//! - a content-addressed response cache, keyed by the SHA-256 of a
//!   canonical serialization of `(user, payload)`, with one bounded LRU +
//!   TTL cache per operation;
//! - a per-user monthly credit ledger with atomic check-and-deduct and
//!   premium-only gating.
//!
//! # Example
//!
//! ```rust,no_run
//! use vellum::{KeyValue, Vellum};
//!
//! #[tokio::main]
//! async fn main() -> vellum::Result<()> {
//!     let gateway = Vellum::builder().in_memory_store().build()?;
//!
//!     let payload = KeyValue::object([("resume", KeyValue::from("..."))]);
//!     let summary = gateway
//!         .generate("user-1", "generate-summary", &payload, || async {
//!             Ok::<_, std::io::Error>("A seasoned engineer.".to_string())
//!         })
//!         .await;
//!
//!     match summary {
//!         Ok(cached) => println!("{} (cached: {})", cached.data, cached.from_cache),
//!         Err(e) => eprintln!("{e}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credits;
pub mod error;
pub mod gateway;
pub mod key;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheRegistry, CacheStats, CacheStatsReport, Cached, NamedCache};
pub use config::Config;
pub use credits::{AiOperation, CreditLedger, DenialReason, Plan, QuotaDenial, QuotaGate};
pub use error::{Result, VellumError};
pub use gateway::{GenerateError, MeteredGateway, Vellum, VellumBuilder};
pub use key::{CacheKey, Fingerprint, KeyValue, SharedNode};

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
