use crate::cache::RecommendationCache;
use crate::domain::recommendation::GeneratedRecommendation;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use uuid::Uuid;

pub const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_BATCH_SIZE: usize = 50;

pub fn cache_key(user_id: Uuid) -> String {
    format!("recommendations:{user_id}")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarmOutcome {
    pub users_cached: usize,
    pub cache_failures: usize,
    pub duration_ms: u64,
}

/// A recommendation must be complete before it is cached; serving a partial
/// payload from the fast path is worse than a cache miss. Field checks
/// mirror the readers' requirements.
fn validate_complete(rec: &GeneratedRecommendation) -> Result<()> {
    anyhow::ensure!(!rec.user_id.is_nil(), "recommendation missing userId");
    anyhow::ensure!(!rec.items.is_empty(), "recommendation has no items");
    anyhow::ensure!(
        !rec.base_currency.trim().is_empty(),
        "recommendation missing baseCurrency"
    );
    anyhow::ensure!(
        !rec.total_investable.trim().is_empty(),
        "recommendation missing totalInvestable"
    );
    anyhow::ensure!(
        !rec.audit_trail.scores_correlation_id.is_nil(),
        "recommendation missing auditTrail correlation"
    );
    anyhow::ensure!(
        !rec.allocation_gaps.is_empty(),
        "recommendation missing allocationGaps"
    );
    Ok(())
}

/// Push recommendations into the external cache, batch by batch; within a
/// batch writes fan out concurrently and each entry fails alone. Cache
/// failures are reported, never escalated; the primary store stays
/// authoritative.
pub async fn warm_recommendations(
    cache: Arc<dyn RecommendationCache>,
    recommendations: Vec<GeneratedRecommendation>,
    batch_size: Option<usize>,
) -> WarmOutcome {
    let started = Instant::now();
    let batch_size = batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1);

    let mut users_cached = 0usize;
    let mut cache_failures = 0usize;

    for batch in recommendations.chunks(batch_size) {
        let mut join_set = JoinSet::new();

        for rec in batch {
            if let Err(err) = validate_complete(rec) {
                tracing::warn!(user_id = %rec.user_id, error = %err, "incomplete recommendation rejected from cache");
                cache_failures += 1;
                continue;
            }

            let payload = match serde_json::to_value(rec) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(user_id = %rec.user_id, error = %err, "recommendation serialization failed");
                    cache_failures += 1;
                    continue;
                }
            };

            let cache = Arc::clone(&cache);
            let user_id = rec.user_id;
            join_set.spawn(async move {
                let res = cache.set(&cache_key(user_id), &payload, CACHE_TTL).await;
                (user_id, res)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => users_cached += 1,
                Ok((user_id, Err(err))) => {
                    tracing::warn!(%user_id, error = %err, "cache write failed");
                    cache_failures += 1;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "cache write task panicked");
                    cache_failures += 1;
                }
            }
        }
    }

    WarmOutcome {
        users_cached,
        cache_failures,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::market::ExchangeRates;
    use crate::domain::recommendation::{AllocationGap, AuditTrail, RecommendationItem};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_recommendation(user_id: Uuid) -> GeneratedRecommendation {
        let class_id = Uuid::new_v4();
        GeneratedRecommendation {
            user_id,
            portfolio_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            total_investable: "1000.00".to_string(),
            base_currency: "USD".to_string(),
            items: vec![RecommendationItem {
                asset_id: Uuid::new_v4(),
                symbol: "VOO".to_string(),
                class_id,
                score: "12.0000".to_string(),
                percentage: "80.0000".to_string(),
                recommended_amount: "1000.00".to_string(),
                is_over_allocated: false,
            }],
            allocation_gaps: vec![AllocationGap {
                class_id,
                class_name: "Equities".to_string(),
                current_allocation: "50.0000".to_string(),
                target_min: "40".to_string(),
                target_max: "80".to_string(),
                target_midpoint: "60.0000".to_string(),
                gap: "10.0000".to_string(),
            }],
            audit_trail: AuditTrail {
                criteria_version_id: Uuid::new_v4(),
                exchange_rates_snapshot: ExchangeRates {
                    base: "USD".to_string(),
                    rates: BTreeMap::new(),
                    fetched_at: Utc::now(),
                    source: "test".to_string(),
                },
                scores_correlation_id: Uuid::new_v4(),
                prices_as_of: Utc::now(),
                rates_as_of: Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn caches_complete_recommendations() {
        let cache = Arc::new(MemoryCache::new());
        let recs = vec![
            sample_recommendation(Uuid::new_v4()),
            sample_recommendation(Uuid::new_v4()),
        ];

        let outcome = warm_recommendations(cache.clone(), recs.clone(), None).await;
        assert_eq!(outcome.users_cached, 2);
        assert_eq!(outcome.cache_failures, 0);

        let cached = cache.get(&cache_key(recs[0].user_id)).await.unwrap();
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn incomplete_payload_is_rejected_not_cached() {
        let cache = Arc::new(MemoryCache::new());
        let user_id = Uuid::new_v4();
        let mut rec = sample_recommendation(user_id);
        // Strip the audit trail's correlation: payload is no longer complete.
        rec.audit_trail.scores_correlation_id = Uuid::nil();

        let outcome = warm_recommendations(cache.clone(), vec![rec], None).await;
        assert_eq!(outcome.users_cached, 0);
        assert_eq!(outcome.cache_failures, 1);
        assert!(cache.get(&cache_key(user_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_failing_entry_does_not_poison_the_batch() {
        struct FlakyCache {
            inner: MemoryCache,
            poison_key: String,
        }

        #[async_trait::async_trait]
        impl RecommendationCache for FlakyCache {
            async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
                self.inner.get(key).await
            }

            async fn set(
                &self,
                key: &str,
                value: &serde_json::Value,
                ttl: Duration,
            ) -> Result<()> {
                if key == self.poison_key {
                    anyhow::bail!("connection reset");
                }
                self.inner.set(key, value, ttl).await
            }

            async fn delete(&self, key: &str) -> Result<()> {
                self.inner.delete(key).await
            }
        }

        let bad_user = Uuid::new_v4();
        let cache = Arc::new(FlakyCache {
            inner: MemoryCache::new(),
            poison_key: cache_key(bad_user),
        });

        let recs = vec![
            sample_recommendation(Uuid::new_v4()),
            sample_recommendation(bad_user),
            sample_recommendation(Uuid::new_v4()),
        ];

        let outcome = warm_recommendations(cache, recs, Some(3)).await;
        assert_eq!(outcome.users_cached, 2);
        assert_eq!(outcome.cache_failures, 1);
    }
}
