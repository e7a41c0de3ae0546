//! Tests for [`QuotaGate`]: plan resolution, denials and bypass.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use vellum::credits::{
    AccountDocument, AccountPatch, AccountStore, CreditLedger, DenialReason, InMemoryAccountStore,
    ManualClock, Plan, PlanResolver, QuotaGate, StoreError, StoreResult, StorePlanResolver,
    TxAction,
};

fn gate_over(store: Arc<InMemoryAccountStore>) -> QuotaGate {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap());
    let ledger = CreditLedger::new(store.clone()).with_clock(Arc::new(clock));
    QuotaGate::new(Arc::new(ledger), Arc::new(StorePlanResolver::new(store)))
}

// ============================================================================
// Grants
// ============================================================================

#[tokio::test]
async fn free_user_is_charged() {
    let store = Arc::new(InMemoryAccountStore::new());
    let gate = gate_over(store.clone());

    let grant = gate.authorize("u1", "suggest-skills").await.unwrap();
    assert_eq!(grant.plan, Plan::Free);
    assert_eq!(grant.credits_used, 1);
    assert_eq!(grant.credits_remaining, Some(29));
    assert!(!grant.bypassed);
    assert_eq!(store.snapshot("u1").unwrap().usage.credits_used, 1);
}

#[tokio::test]
async fn premium_user_gets_premium_operations() {
    let store = Arc::new(
        InMemoryAccountStore::new().with_account("u1", AccountDocument::new(Plan::Premium)),
    );
    let gate = gate_over(store);

    let grant = gate.authorize("u1", "tailor-resume").await.unwrap();
    assert_eq!(grant.plan, Plan::Premium);
    assert_eq!(grant.credits_remaining, None);
}

// ============================================================================
// Denials
// ============================================================================

#[tokio::test]
async fn exhausted_free_user_is_denied_with_reset_date() {
    let store = Arc::new(InMemoryAccountStore::new().with_account(
        "u1",
        AccountDocument::new(Plan::Free).with_credits_used(30),
    ));
    let gate = gate_over(store);

    let denial = gate.authorize("u1", "improve-bullet").await.unwrap_err();
    assert_eq!(denial.reason, DenialReason::InsufficientCredits);
    assert_eq!(denial.status_code(), 429);
    assert_eq!(denial.credits_required, Some(1));
    assert_eq!(denial.credits_remaining, Some(0));
    assert_eq!(
        denial.reset_date,
        Some(Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(
        denial.message(),
        "Monthly AI credits exhausted. Your credits reset on April 1, 2026."
    );
}

#[tokio::test]
async fn premium_only_operation_denied_for_free_user() {
    let store = Arc::new(InMemoryAccountStore::new());
    let gate = gate_over(store.clone());

    let denial = gate.authorize("u1", "interview-prep").await.unwrap_err();
    assert_eq!(denial.reason, DenialReason::PremiumRequired);
    assert_eq!(denial.status_code(), 403);
    assert!(denial.message().contains("Premium"));
    assert!(store.is_empty());
}

#[tokio::test]
async fn unknown_operation_denied() {
    let gate = gate_over(Arc::new(InMemoryAccountStore::new()));

    let denial = gate.authorize("u1", "write-novel").await.unwrap_err();
    assert_eq!(denial.reason, DenialReason::InvalidOperation);
    assert_eq!(denial.status_code(), 400);
    assert_eq!(denial.operation, "write-novel");
}

// ============================================================================
// Plan cache
// ============================================================================

#[tokio::test]
async fn switch_plan_takes_effect_immediately() {
    let store = Arc::new(InMemoryAccountStore::new());
    let gate = gate_over(store);

    assert_eq!(
        gate.authorize("u1", "tailor-resume").await.unwrap_err().reason,
        DenialReason::PremiumRequired
    );

    gate.switch_plan("u1", Plan::Premium).await.unwrap();
    let grant = gate.authorize("u1", "tailor-resume").await.unwrap();
    assert_eq!(grant.plan, Plan::Premium);
}

#[tokio::test]
async fn resolved_plan_is_cached() {
    let store = Arc::new(InMemoryAccountStore::new());
    let gate = gate_over(store.clone());

    assert_eq!(gate.resolve_plan("u1").await.unwrap(), Plan::Free);

    // Written behind the gate's back: the cached plan still applies.
    store
        .merge("u1", &AccountPatch::new().plan(Plan::Premium))
        .await
        .unwrap();
    assert_eq!(gate.resolve_plan("u1").await.unwrap(), Plan::Free);
}

struct CountingResolver {
    calls: AtomicUsize,
}

#[async_trait]
impl PlanResolver for CountingResolver {
    async fn resolve_plan(&self, _user_id: &str) -> Result<Plan, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Plan::Premium)
    }
}

#[tokio::test]
async fn zero_ttl_disables_plan_cache() {
    let store = Arc::new(InMemoryAccountStore::new());
    let resolver = Arc::new(CountingResolver {
        calls: AtomicUsize::new(0),
    });
    let gate = QuotaGate::new(Arc::new(CreditLedger::new(store)), resolver.clone())
        .with_plan_cache_ttl(std::time::Duration::ZERO);

    gate.resolve_plan("u1").await.unwrap();
    gate.resolve_plan("u1").await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn custom_resolver_decides_plan() {
    let store = Arc::new(InMemoryAccountStore::new());
    let resolver = Arc::new(CountingResolver {
        calls: AtomicUsize::new(0),
    });
    let gate = QuotaGate::new(Arc::new(CreditLedger::new(store)), resolver.clone());

    let grant = gate.authorize("u1", "interview-prep").await.unwrap();
    assert_eq!(grant.plan, Plan::Premium);
    gate.authorize("u1", "interview-prep").await.unwrap();
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Infrastructure failures
// ============================================================================

struct DownStore;

#[async_trait]
impl AccountStore for DownStore {
    async fn get(&self, _user_id: &str) -> StoreResult<Option<AccountDocument>> {
        Err(StoreError::Unavailable("10.0.0.7:5432 refused".into()))
    }

    async fn transact(
        &self,
        _user_id: &str,
        _tx: &mut (dyn for<'a> FnMut(Option<&'a AccountDocument>) -> TxAction + Send),
    ) -> StoreResult<()> {
        Err(StoreError::Unavailable("10.0.0.7:5432 refused".into()))
    }

    async fn merge(&self, _user_id: &str, _patch: &AccountPatch) -> StoreResult<()> {
        Err(StoreError::Unavailable("10.0.0.7:5432 refused".into()))
    }
}

#[tokio::test]
async fn store_outage_is_a_check_error() {
    let store: Arc<dyn AccountStore> = Arc::new(DownStore);
    let gate = QuotaGate::new(
        Arc::new(CreditLedger::new(store.clone())),
        Arc::new(StorePlanResolver::new(store)),
    );

    let denial = gate.authorize("u1", "generate-summary").await.unwrap_err();
    assert_eq!(denial.reason, DenialReason::CreditCheckError);
    assert_eq!(denial.status_code(), 503);
    assert!(!denial.message().contains("10.0.0.7"));
}

#[tokio::test]
async fn ledger_outage_is_a_check_error() {
    // Plans resolve fine, the transaction fails.
    let resolver = Arc::new(CountingResolver {
        calls: AtomicUsize::new(0),
    });
    let gate = QuotaGate::new(Arc::new(CreditLedger::new(Arc::new(DownStore))), resolver);

    let denial = gate.authorize("u1", "generate-summary").await.unwrap_err();
    assert_eq!(denial.reason, DenialReason::CreditCheckError);
}

// ============================================================================
// Bypass
// ============================================================================

#[tokio::test]
async fn bypass_admits_without_charging() {
    let store = Arc::new(InMemoryAccountStore::new());
    let gate = gate_over(store.clone()).with_bypass(true);
    assert!(gate.is_bypassed());

    let grant = gate.authorize("u1", "tailor-resume").await.unwrap();
    assert!(grant.bypassed);
    assert_eq!(grant.plan, Plan::Premium);
    assert_eq!(grant.credits_remaining, None);
    assert!(store.is_empty());
}
