//! Per-user monthly credit ledger.
//!
//! [`CreditLedger::check_and_deduct`] is the only path that consumes
//! credits. The read, the period rollover, the allowance check and the
//! write all happen inside one [`AccountStore::transact`] call, so the
//! store's isolation (not an in-process lock) decides which of two
//! racing deductions wins. A request that would take a free account past
//! its allowance aborts without writing anything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::operation::AiOperation;
use super::period::{Clock, SystemClock, next_period_start};
use super::plan::{Plan, PlanLimits};
use super::store::{AccountDocument, AccountPatch, AccountStore, StoreError, TxAction};
use crate::key::user_fingerprint;
use crate::telemetry;

/// Ledger behaviour settings.
///
/// ```rust
/// # use vellum::credits::{LedgerConfig, PlanLimits};
/// # use std::time::Duration;
/// let config = LedgerConfig::new()
///     .limits(PlanLimits::new(50))
///     .max_attempts(3)
///     .retry_delay(Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub limits: PlanLimits,
    /// Transaction attempts on store conflicts, including the first. Default: 5.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt. Default: 10ms.
    pub retry_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            limits: PlanLimits::default(),
            max_attempts: 5,
            retry_delay: Duration::from_millis(10),
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limits(mut self, limits: PlanLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// A committed deduction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deduction {
    pub operation: AiOperation,
    pub plan: Plan,
    pub cost: u32,
    /// Credits used this period, after the deduction.
    pub credits_used: u32,
    /// `None` means unlimited.
    pub credits_remaining: Option<u32>,
    pub reset_date: DateTime<Utc>,
}

/// Read-only view of a user's balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditStatus {
    pub plan: Plan,
    pub credits_used: u32,
    pub credits_remaining: Option<u32>,
    pub monthly_credits: Option<u32>,
    pub reset_date: DateTime<Utc>,
}

/// Why a deduction did not happen.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("unknown AI operation: {operation}")]
    InvalidOperation { operation: String },

    #[error("{operation} requires the premium plan")]
    PremiumRequired { operation: AiOperation },

    #[error(
        "insufficient credits for {operation}: {credits_required} required, {credits_remaining} remaining"
    )]
    InsufficientCredits {
        operation: AiOperation,
        credits_required: u32,
        credits_remaining: u32,
        reset_date: DateTime<Utc>,
    },

    #[error("account store error: {0}")]
    Store(#[from] StoreError),
}

/// Credit ledger over an [`AccountStore`].
pub struct CreditLedger {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl CreditLedger {
    /// Ledger with the wall clock and default settings.
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: LedgerConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Atomically check the user's allowance and deduct the operation's cost.
    ///
    /// Checks run in order: unknown operation, premium-only operation on a
    /// non-premium plan, then (inside the transaction) period rollover and
    /// the allowance. Premium plans have no allowance.
    pub async fn check_and_deduct(
        &self,
        user_id: &str,
        operation: &str,
        plan: Plan,
    ) -> Result<Deduction, LedgerError> {
        let op: AiOperation = operation
            .parse()
            .map_err(|_| LedgerError::InvalidOperation {
                operation: operation.to_string(),
            })?;
        if op.is_premium_only() && plan != Plan::Premium {
            return Err(LedgerError::PremiumRequired { operation: op });
        }

        let cost = op.credit_cost();
        let allowance = self.config.limits.monthly_credits(plan);
        let mut attempt = 0;

        loop {
            let now = self.clock.now();
            let mut outcome: Option<Result<Deduction, LedgerError>> = None;
            let mut tx = |current: Option<&AccountDocument>| {
                let mut doc = current
                    .cloned()
                    .unwrap_or_else(|| AccountDocument::new(plan));
                let reset_date = roll_period(&mut doc, now);
                let used = doc.usage.credits_used;

                if let Some(limit) = allowance {
                    if used.saturating_add(cost) > limit {
                        outcome = Some(Err(LedgerError::InsufficientCredits {
                            operation: op,
                            credits_required: cost,
                            credits_remaining: limit.saturating_sub(used),
                            reset_date,
                        }));
                        return TxAction::Abort;
                    }
                }

                let credits_used = used.saturating_add(cost);
                doc.usage.credits_used = credits_used;
                outcome = Some(Ok(Deduction {
                    operation: op,
                    plan,
                    cost,
                    credits_used,
                    credits_remaining: allowance.map(|limit| limit.saturating_sub(credits_used)),
                    reset_date,
                }));
                TxAction::Commit(doc)
            };

            match self.store.transact(user_id, &mut tx).await {
                Ok(()) => {
                    let result = outcome.unwrap_or_else(|| {
                        Err(StoreError::Unavailable("transaction body did not run".into()).into())
                    });
                    self.log_outcome(user_id, &result);
                    return result;
                }
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_attempts => {
                    metrics::counter!(telemetry::LEDGER_CONFLICTS_TOTAL).increment(1);
                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        user = %user_tag(user_id),
                        operation = op.as_str(),
                        attempt = attempt + 1,
                        max_attempts = self.config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "credit transaction conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        user = %user_tag(user_id),
                        operation = op.as_str(),
                        error = %e,
                        "credit transaction failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Administrative: zero the period's usage, keeping the reset date.
    pub async fn reset_credits(&self, user_id: &str) -> Result<(), StoreError> {
        let patch = AccountPatch::new()
            .credits_used(0)
            .last_credit_reset(self.clock.now());
        self.store.merge(user_id, &patch).await?;
        info!(user = %user_tag(user_id), "credits reset");
        Ok(())
    }

    /// Administrative: change the stored plan.
    pub async fn switch_plan(&self, user_id: &str, plan: Plan) -> Result<(), StoreError> {
        self.store
            .merge(user_id, &AccountPatch::new().plan(plan))
            .await?;
        info!(user = %user_tag(user_id), plan = plan.as_str(), "plan switched");
        Ok(())
    }

    /// Current balance under `plan`, as the next deduction would see it.
    ///
    /// An elapsed period is reported as reset but nothing is written.
    pub async fn status(&self, user_id: &str, plan: Plan) -> Result<CreditStatus, StoreError> {
        let mut doc = self
            .store
            .get(user_id)
            .await?
            .unwrap_or_else(|| AccountDocument::new(plan));
        let reset_date = roll_period(&mut doc, self.clock.now());
        let monthly_credits = self.config.limits.monthly_credits(plan);
        Ok(CreditStatus {
            plan,
            credits_used: doc.usage.credits_used,
            credits_remaining: monthly_credits
                .map(|limit| limit.saturating_sub(doc.usage.credits_used)),
            monthly_credits,
            reset_date,
        })
    }

    fn log_outcome(&self, user_id: &str, result: &Result<Deduction, LedgerError>) {
        match result {
            Ok(d) => {
                debug!(
                    user = %user_tag(user_id),
                    operation = d.operation.as_str(),
                    cost = d.cost,
                    credits_used = d.credits_used,
                    "credits deducted"
                );
                metrics::counter!(telemetry::CREDITS_DEDUCTED_TOTAL,
                    "operation" => d.operation.as_str(),
                    "plan" => d.plan.as_str(),
                )
                .increment(u64::from(d.cost));
            }
            Err(e) => {
                info!(user = %user_tag(user_id), reason = %e, "credit deduction refused");
            }
        }
    }
}

/// Start a new period on `doc` if the current one has ended, returning the
/// (possibly new) reset date. Unset reset dates are initialised from `now`.
fn roll_period(doc: &mut AccountDocument, now: DateTime<Utc>) -> DateTime<Utc> {
    let reset_at = *doc
        .usage
        .credits_reset_date
        .get_or_insert_with(|| next_period_start(now));
    if now < reset_at {
        return reset_at;
    }
    let next = next_period_start(now);
    doc.usage.credits_used = 0;
    doc.usage.last_credit_reset = Some(now);
    doc.usage.credits_reset_date = Some(next);
    next
}

/// Log-safe user identifier.
fn user_tag(user_id: &str) -> String {
    user_fingerprint(user_id).short()
}
