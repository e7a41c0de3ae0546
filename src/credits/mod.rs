//! Credit metering.
//!
//! - [`operation`]: the billable operation catalog and its cost table.
//! - [`plan`]: billing plans and monthly allowances.
//! - [`period`]: billing-period arithmetic and the injectable [`Clock`].
//! - [`store`]: the transactional [`AccountStore`] contract and an
//!   in-memory implementation.
//! - [`ledger`]: [`CreditLedger`], the atomic check-and-deduct path.
//! - [`gate`]: [`QuotaGate`], plan resolution and the denial vocabulary.

pub mod gate;
pub mod ledger;
pub mod operation;
pub mod period;
pub mod plan;
pub mod store;

pub use gate::{
    DenialReason, PlanResolver, QuotaDenial, QuotaGate, QuotaGrant, StorePlanResolver,
};
pub use ledger::{CreditLedger, CreditStatus, Deduction, LedgerConfig, LedgerError};
pub use operation::{AiOperation, PREMIUM_ONLY_OPERATIONS, credit_cost_of};
pub use period::{Clock, ManualClock, SystemClock, next_period_start};
pub use plan::{DEFAULT_FREE_MONTHLY_CREDITS, Plan, PlanLimits};
pub use store::{
    AccountDocument, AccountPatch, AccountStore, InMemoryAccountStore, StoreError, StoreResult,
    TxAction, UsageRecord,
};
