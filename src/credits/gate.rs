//! Quota gate in front of every metered AI operation.
//!
//! [`QuotaGate::authorize`] resolves the caller's plan, asks the
//! [`CreditLedger`] to deduct the operation's cost, and turns the outcome
//! into either a [`QuotaGrant`] or a [`QuotaDenial`] carrying exactly one
//! [`DenialReason`]. The denial vocabulary is the stable contract HTTP
//! status mapping and UI messaging are built on.
//!
//! # Bypass
//!
//! A gate built with [`with_bypass(true)`](QuotaGate::with_bypass) admits
//! everything without touching the ledger. Enabling it logs a warning, and
//! every bypassed request is logged and counted in
//! [`CREDIT_BYPASS_TOTAL`](crate::telemetry::CREDIT_BYPASS_TOTAL).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::ledger::{CreditLedger, CreditStatus, LedgerError};
use super::operation::AiOperation;
use super::plan::Plan;
use super::store::{AccountStore, StoreError};
use crate::key::user_fingerprint;
use crate::telemetry;

/// Default lifetime of a resolved plan in the gate's plan cache.
const DEFAULT_PLAN_CACHE_TTL: Duration = Duration::from_secs(60);

/// Default number of users whose plan is cached.
const DEFAULT_PLAN_CACHE_MAX: u64 = 10_000;

/// Looks up a user's current plan.
#[async_trait]
pub trait PlanResolver: Send + Sync {
    async fn resolve_plan(&self, user_id: &str) -> Result<Plan, StoreError>;
}

/// Reads the plan from the account document. Missing accounts are free.
pub struct StorePlanResolver {
    store: Arc<dyn AccountStore>,
}

impl StorePlanResolver {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PlanResolver for StorePlanResolver {
    async fn resolve_plan(&self, user_id: &str) -> Result<Plan, StoreError> {
        Ok(self
            .store
            .get(user_id)
            .await?
            .map(|doc| doc.plan)
            .unwrap_or_default())
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    PremiumRequired,
    InsufficientCredits,
    InvalidOperation,
    /// Infrastructure trouble, not a quota decision.
    CreditCheckError,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PremiumRequired => "premium_required",
            Self::InsufficientCredits => "insufficient_credits",
            Self::InvalidOperation => "invalid_operation",
            Self::CreditCheckError => "credit_check_error",
        }
    }

    /// HTTP status for this reason.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PremiumRequired => 403,
            Self::InsufficientCredits => 429,
            Self::InvalidOperation => 400,
            Self::CreditCheckError => 503,
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused request.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{reason} ({operation})")]
pub struct QuotaDenial {
    pub reason: DenialReason,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_required: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_date: Option<DateTime<Utc>>,
}

impl QuotaDenial {
    fn bare(reason: DenialReason, operation: &str) -> Self {
        Self {
            reason,
            operation: operation.to_string(),
            credits_required: None,
            credits_remaining: None,
            reset_date: None,
        }
    }

    pub fn invalid_operation(operation: &str) -> Self {
        Self::bare(DenialReason::InvalidOperation, operation)
    }

    pub fn check_error(operation: &str) -> Self {
        Self::bare(DenialReason::CreditCheckError, operation)
    }

    /// Translate a ledger refusal.
    pub fn from_ledger(operation: &str, err: &LedgerError) -> Self {
        match err {
            LedgerError::InvalidOperation { .. } => Self::invalid_operation(operation),
            LedgerError::PremiumRequired { .. } => {
                Self::bare(DenialReason::PremiumRequired, operation)
            }
            LedgerError::InsufficientCredits {
                credits_required,
                credits_remaining,
                reset_date,
                ..
            } => Self {
                credits_required: Some(*credits_required),
                credits_remaining: Some(*credits_remaining),
                reset_date: Some(*reset_date),
                ..Self::bare(DenialReason::InsufficientCredits, operation)
            },
            LedgerError::Store(_) => Self::check_error(operation),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.reason.status_code()
    }

    /// User-facing message. Never includes internal error detail.
    pub fn message(&self) -> String {
        match self.reason {
            DenialReason::PremiumRequired => {
                "This feature requires a Premium plan. Upgrade to unlock it.".to_string()
            }
            DenialReason::InsufficientCredits => match self.reset_date {
                Some(at) => format!(
                    "Monthly AI credits exhausted. Your credits reset on {}.",
                    at.format("%B %-d, %Y")
                ),
                None => "Monthly AI credits exhausted.".to_string(),
            },
            DenialReason::InvalidOperation => {
                format!("\"{}\" is not a supported AI operation.", self.operation)
            }
            DenialReason::CreditCheckError => {
                "We couldn't check your AI credits right now. Please try again in a moment."
                    .to_string()
            }
        }
    }
}

/// An admitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaGrant {
    pub operation: String,
    pub plan: Plan,
    pub credits_used: u32,
    /// `None` means unlimited.
    pub credits_remaining: Option<u32>,
    /// Admitted by the bypass flag without a ledger check.
    pub bypassed: bool,
}

/// Plan resolution + ledger deduction for AI requests.
pub struct QuotaGate {
    ledger: Arc<CreditLedger>,
    plans: Arc<dyn PlanResolver>,
    plan_cache: Option<Cache<String, Plan>>,
    bypass: bool,
}

impl QuotaGate {
    pub fn new(ledger: Arc<CreditLedger>, plans: Arc<dyn PlanResolver>) -> Self {
        Self {
            ledger,
            plans,
            plan_cache: build_plan_cache(DEFAULT_PLAN_CACHE_TTL),
            bypass: false,
        }
    }

    /// Set how long a resolved plan is reused. Zero disables plan caching.
    pub fn with_plan_cache_ttl(mut self, ttl: Duration) -> Self {
        self.plan_cache = build_plan_cache(ttl);
        self
    }

    /// Admit every request without consulting the ledger.
    pub fn with_bypass(mut self, enabled: bool) -> Self {
        if enabled {
            warn!("credit bypass enabled: AI operations will not be metered");
        }
        self.bypass = enabled;
        self
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Parse an operation name, counting a denial if it is unknown.
    pub fn parse_operation(&self, operation: &str) -> Result<AiOperation, QuotaDenial> {
        operation
            .parse()
            .map_err(|_| self.deny(QuotaDenial::invalid_operation(operation)))
    }

    /// Check and charge `user_id` for one `operation`.
    pub async fn authorize(
        &self,
        user_id: &str,
        operation: &str,
    ) -> Result<QuotaGrant, QuotaDenial> {
        if self.bypass {
            info!(user = %user_fingerprint(user_id).short(), operation, "credit check bypassed");
            metrics::counter!(telemetry::CREDIT_BYPASS_TOTAL, "operation" => operation.to_owned())
                .increment(1);
            return Ok(QuotaGrant {
                operation: operation.to_string(),
                plan: Plan::Premium,
                credits_used: 0,
                credits_remaining: None,
                bypassed: true,
            });
        }

        self.parse_operation(operation)?;

        let plan = match self.resolve_plan(user_id).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(operation, error = %e, "plan lookup failed");
                return Err(self.deny(QuotaDenial::check_error(operation)));
            }
        };

        match self.ledger.check_and_deduct(user_id, operation, plan).await {
            Ok(deduction) => Ok(QuotaGrant {
                operation: operation.to_string(),
                plan: deduction.plan,
                credits_used: deduction.credits_used,
                credits_remaining: deduction.credits_remaining,
                bypassed: false,
            }),
            Err(e) => Err(self.deny(QuotaDenial::from_ledger(operation, &e))),
        }
    }

    /// The user's plan, from the plan cache when fresh.
    pub async fn resolve_plan(&self, user_id: &str) -> Result<Plan, StoreError> {
        match &self.plan_cache {
            Some(cache) => cache
                .try_get_with(user_id.to_string(), self.plans.resolve_plan(user_id))
                .await
                .map_err(|e| (*e).clone()),
            None => self.plans.resolve_plan(user_id).await,
        }
    }

    /// Balance for display, under the user's current plan.
    pub async fn status(&self, user_id: &str) -> Result<CreditStatus, StoreError> {
        let plan = self.resolve_plan(user_id).await?;
        self.ledger.status(user_id, plan).await
    }

    /// Administrative plan change; the cached plan is dropped.
    pub async fn switch_plan(&self, user_id: &str, plan: Plan) -> Result<(), StoreError> {
        self.ledger.switch_plan(user_id, plan).await?;
        if let Some(cache) = &self.plan_cache {
            cache.invalidate(user_id).await;
        }
        Ok(())
    }

    /// Administrative usage reset.
    pub async fn reset_credits(&self, user_id: &str) -> Result<(), StoreError> {
        self.ledger.reset_credits(user_id).await
    }

    fn deny(&self, denial: QuotaDenial) -> QuotaDenial {
        metrics::counter!(telemetry::CREDIT_DENIALS_TOTAL,
            "operation" => denial.operation.clone(),
            "reason" => denial.reason.as_str(),
        )
        .increment(1);
        denial
    }
}

fn build_plan_cache(ttl: Duration) -> Option<Cache<String, Plan>> {
    if ttl.is_zero() {
        return None;
    }
    Some(
        Cache::builder()
            .max_capacity(DEFAULT_PLAN_CACHE_MAX)
            .time_to_live(ttl)
            .build(),
    )
}
