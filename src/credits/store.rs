//! Account/plan document store.
//!
//! The ledger never locks anything itself. Every read-check-write runs as
//! one [`AccountStore::transact`] call, and the store's single-document
//! transaction isolation is what keeps concurrent deductions from
//! over-spending.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::Plan;

/// Metered-usage fields of an account document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    #[serde(default)]
    pub credits_used: u32,
    /// When `credits_used` next resets. Unset on brand-new accounts.
    #[serde(default)]
    pub credits_reset_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_credit_reset: Option<DateTime<Utc>>,
}

/// One user's account document, as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDocument {
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub usage: UsageRecord,
}

impl AccountDocument {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            usage: UsageRecord::default(),
        }
    }

    pub fn with_credits_used(mut self, used: u32) -> Self {
        self.usage.credits_used = used;
        self
    }

    pub fn with_reset_date(mut self, at: DateTime<Utc>) -> Self {
        self.usage.credits_reset_date = Some(at);
        self
    }
}

/// Merge-style partial write. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub plan: Option<Plan>,
    pub credits_used: Option<u32>,
    pub credits_reset_date: Option<DateTime<Utc>>,
    pub last_credit_reset: Option<DateTime<Utc>>,
}

impl AccountPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn credits_used(mut self, used: u32) -> Self {
        self.credits_used = Some(used);
        self
    }

    pub fn credits_reset_date(mut self, at: DateTime<Utc>) -> Self {
        self.credits_reset_date = Some(at);
        self
    }

    pub fn last_credit_reset(mut self, at: DateTime<Utc>) -> Self {
        self.last_credit_reset = Some(at);
        self
    }

    /// Apply the set fields to `doc`.
    pub fn apply(&self, doc: &mut AccountDocument) {
        if let Some(plan) = self.plan {
            doc.plan = plan;
        }
        if let Some(used) = self.credits_used {
            doc.usage.credits_used = used;
        }
        if let Some(at) = self.credits_reset_date {
            doc.usage.credits_reset_date = Some(at);
        }
        if let Some(at) = self.last_credit_reset {
            doc.usage.last_credit_reset = Some(at);
        }
    }
}

/// What a transaction body decided.
#[derive(Debug, Clone, PartialEq)]
pub enum TxAction {
    /// Write this document as the new state.
    Commit(AccountDocument),
    /// Leave the stored document untouched.
    Abort,
}

/// Account store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The transaction lost a race and may be retried.
    #[error("transaction conflict")]
    Conflict,

    #[error("account store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed account document: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Whether retrying the same transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Transactional document store keyed by user id.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read a document.
    async fn get(&self, user_id: &str) -> StoreResult<Option<AccountDocument>>;

    /// Run `tx` against the current document as one serializable
    /// transaction. `tx` may be invoked more than once if the store retries
    /// internally; only the invocation whose result is committed counts.
    async fn transact(
        &self,
        user_id: &str,
        tx: &mut (dyn for<'a> FnMut(Option<&'a AccountDocument>) -> TxAction + Send),
    ) -> StoreResult<()>;

    /// Partial write, creating the document if it does not exist.
    async fn merge(&self, user_id: &str, patch: &AccountPatch) -> StoreResult<()>;
}

/// In-process [`AccountStore`].
///
/// Transactions run under the store's mutex, so they are trivially
/// serializable.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    docs: Mutex<HashMap<String, AccountDocument>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document.
    pub fn with_account(self, user_id: impl Into<String>, doc: AccountDocument) -> Self {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user_id.into(), doc);
        self
    }

    /// Synchronous read, for tests and tooling.
    pub fn snapshot(&self, user_id: &str) -> Option<AccountDocument> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, user_id: &str) -> StoreResult<Option<AccountDocument>> {
        Ok(self.snapshot(user_id))
    }

    async fn transact(
        &self,
        user_id: &str,
        tx: &mut (dyn for<'a> FnMut(Option<&'a AccountDocument>) -> TxAction + Send),
    ) -> StoreResult<()> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        if let TxAction::Commit(doc) = tx(docs.get(user_id)) {
            docs.insert(user_id.to_string(), doc);
        }
        Ok(())
    }

    async fn merge(&self, user_id: &str, patch: &AccountPatch) -> StoreResult<()> {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        patch.apply(docs.entry(user_id.to_string()).or_default());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn document_serializes_camel_case() {
        let doc = AccountDocument::new(Plan::Premium).with_credits_used(4);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["plan"], "premium");
        assert_eq!(json["usage"]["creditsUsed"], 4);
        assert!(json["usage"]["creditsResetDate"].is_null());
    }

    #[test]
    fn sparse_document_deserializes_with_defaults() {
        let doc: AccountDocument = serde_json::from_str(r#"{"plan":"free"}"#).unwrap();
        assert_eq!(doc, AccountDocument::new(Plan::Free));
    }

    #[tokio::test]
    async fn abort_leaves_document_untouched() {
        let store = InMemoryAccountStore::new().with_account("u1", AccountDocument::default());
        store
            .transact("u1", &mut |_: Option<&AccountDocument>| TxAction::Abort)
            .await
            .unwrap();
        assert_eq!(store.snapshot("u1"), Some(AccountDocument::default()));

        store
            .transact("u2", &mut |_: Option<&AccountDocument>| TxAction::Abort)
            .await
            .unwrap();
        assert!(store.snapshot("u2").is_none());
    }

    #[tokio::test]
    async fn transact_commits_from_stored_document() {
        let store: Arc<dyn AccountStore> = Arc::new(
            InMemoryAccountStore::new()
                .with_account("u1", AccountDocument::new(Plan::Free).with_credits_used(3)),
        );
        let mut seen = None;
        let mut tx = |current: Option<&AccountDocument>| {
            seen = current.map(|doc| doc.usage.credits_used);
            let mut doc = current.cloned().unwrap_or_default();
            doc.usage.credits_used += 2;
            TxAction::Commit(doc)
        };
        store.transact("u1", &mut tx).await.unwrap();

        assert_eq!(seen, Some(3));
        let doc = store.get("u1").await.unwrap().unwrap();
        assert_eq!(doc.usage.credits_used, 5);
    }

    #[tokio::test]
    async fn merge_creates_and_preserves_other_fields() {
        let store = InMemoryAccountStore::new();
        store
            .merge("u1", &AccountPatch::new().credits_used(7))
            .await
            .unwrap();
        store
            .merge("u1", &AccountPatch::new().plan(Plan::Premium))
            .await
            .unwrap();

        let doc = store.snapshot("u1").unwrap();
        assert_eq!(doc.plan, Plan::Premium);
        assert_eq!(doc.usage.credits_used, 7);
    }

    #[test]
    fn only_conflicts_are_transient() {
        assert!(StoreError::Conflict.is_transient());
        assert!(!StoreError::Unavailable("down".into()).is_transient());
    }
}
