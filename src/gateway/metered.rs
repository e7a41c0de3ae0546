//! MeteredGateway - response cache in front of the credit gate

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheRegistry, CacheStatsReport, Cached, with_cache};
use crate::credits::{CreditStatus, Plan, QuotaDenial, QuotaGate};
use crate::key::{CacheKey, KeyValue};
use crate::Result;

/// Why [`MeteredGateway::generate`] produced no value.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError<E> {
    /// The quota gate refused the request. Nothing was charged or cached.
    #[error("request denied: {0}")]
    Denied(#[source] QuotaDenial),

    /// The producer failed after credits were deducted.
    #[error(transparent)]
    Producer(E),

    /// The produced value could not be stored as JSON.
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),

    /// The cached JSON does not fit the requested type.
    #[error("failed to decode cached result: {0}")]
    Decode(#[source] serde_json::Error),
}

impl<E> GenerateError<E> {
    pub fn denial(&self) -> Option<&QuotaDenial> {
        match self {
            Self::Denied(denial) => Some(denial),
            _ => None,
        }
    }
}

/// Cache-then-charge front door for AI operations.
///
/// A cache hit returns immediately and costs nothing. A miss is charged
/// through the [`QuotaGate`] before the producer runs; a denial aborts the
/// request and nothing is cached. Producer failures are not refunded.
#[derive(Clone)]
pub struct MeteredGateway {
    registry: Arc<CacheRegistry>,
    gate: Arc<QuotaGate>,
}

impl MeteredGateway {
    pub fn new(registry: Arc<CacheRegistry>, gate: Arc<QuotaGate>) -> Self {
        Self { registry, gate }
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &QuotaGate {
        &self.gate
    }

    /// Serve `operation` for `user_id`, from cache when possible.
    ///
    /// `payload` is everything that determines the result besides the
    /// user; its canonical fingerprint is the cache key.
    pub async fn generate<T, E, F, Fut>(
        &self,
        user_id: &str,
        operation: &str,
        payload: &KeyValue,
        producer: F,
    ) -> std::result::Result<Cached<T>, GenerateError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let op = self
            .gate
            .parse_operation(operation)
            .map_err(GenerateError::Denied)?;
        let key = CacheKey::new(user_id, payload);

        let cached = with_cache(self.registry.cache(op), &key, || async move {
            self.gate
                .authorize(user_id, operation)
                .await
                .map_err(GenerateError::Denied)?;
            let data = producer().await.map_err(GenerateError::Producer)?;
            serde_json::to_value(&data).map_err(GenerateError::Encode)
        })
        .await?;

        let Cached { data, from_cache } = cached;
        let data = serde_json::from_value(data).map_err(GenerateError::Decode)?;
        Ok(Cached { data, from_cache })
    }

    /// Drop the cached result for one request, if any.
    pub fn invalidate(&self, user_id: &str, operation: &str, payload: &KeyValue) -> Result<bool> {
        let op = operation.parse()?;
        let key = CacheKey::new(user_id, payload);
        Ok(self.registry.cache(op).invalidate(&key.fingerprint()))
    }

    pub fn stats_report(&self, top_n: usize) -> CacheStatsReport {
        self.registry.stats_report(top_n)
    }

    pub async fn credit_status(&self, user_id: &str) -> Result<CreditStatus> {
        Ok(self.gate.status(user_id).await?)
    }

    pub async fn reset_credits(&self, user_id: &str) -> Result<()> {
        Ok(self.gate.reset_credits(user_id).await?)
    }

    pub async fn switch_plan(&self, user_id: &str, plan: Plan) -> Result<()> {
        Ok(self.gate.switch_plan(user_id, plan).await?)
    }
}
