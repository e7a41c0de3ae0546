//! Builder for configuring gateway instances

use std::sync::Arc;

use tracing::info;

use super::MeteredGateway;
use crate::cache::CacheRegistry;
use crate::config::Config;
use crate::credits::{
    AccountStore, Clock, CreditLedger, InMemoryAccountStore, PlanResolver, QuotaGate,
    StorePlanResolver,
};
use crate::{Result, VellumError};

/// Main entry point for creating gateway instances.
pub struct Vellum;

impl Vellum {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> VellumBuilder {
        VellumBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct VellumBuilder {
    config: Config,
    store: Option<Arc<dyn AccountStore>>,
    plans: Option<Arc<dyn PlanResolver>>,
    clock: Option<Arc<dyn Clock>>,
    bypass: Option<bool>,
}

impl VellumBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            plans: None,
            clock: None,
            bypass: None,
        }
    }

    /// Use settings from a loaded [`Config`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Account store backing the credit ledger. Required.
    pub fn account_store(mut self, store: Arc<dyn AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use a fresh in-process account store. Usage is lost on restart.
    pub fn in_memory_store(self) -> Self {
        self.account_store(Arc::new(InMemoryAccountStore::new()))
    }

    /// Resolve plans somewhere other than the account store.
    pub fn plan_resolver(mut self, plans: Arc<dyn PlanResolver>) -> Self {
        self.plans = Some(plans);
        self
    }

    /// Time source for billing periods (default: the system clock).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override `credits.bypass` from the configuration.
    pub fn credit_bypass(mut self, enabled: bool) -> Self {
        self.bypass = Some(enabled);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// [`VellumError::NoAccountStore`] when no store was configured, or
    /// [`VellumError::Configuration`] when the configuration is invalid.
    pub fn build(self) -> Result<MeteredGateway> {
        self.config.validate()?;
        let store = self.store.ok_or(VellumError::NoAccountStore)?;

        let mut ledger = CreditLedger::new(store.clone()).with_config(self.config.ledger_config());
        if let Some(clock) = self.clock {
            ledger = ledger.with_clock(clock);
        }
        let plans = self
            .plans
            .unwrap_or_else(|| Arc::new(StorePlanResolver::new(store)));
        let gate = QuotaGate::new(Arc::new(ledger), plans)
            .with_plan_cache_ttl(self.config.plan_cache_ttl())
            .with_bypass(self.bypass.unwrap_or(self.config.credits.bypass));
        let registry = CacheRegistry::from_config(&self.config);

        info!(
            free_monthly_credits = self.config.credits.free_monthly_credits,
            bypass = gate.is_bypassed(),
            "metered gateway ready"
        );
        Ok(MeteredGateway::new(Arc::new(registry), Arc::new(gate)))
    }
}

impl Default for VellumBuilder {
    fn default() -> Self {
        Self::new()
    }
}
