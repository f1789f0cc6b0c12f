//! Per-user daily download quota over the shared cache.

use chrono::{Duration as ChronoDuration, Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::CacheStore;

/// Quota configuration defaults, overridable per user from the users
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Default daily limit for users without an explicit one.
    #[serde(default = "default_limit_per_day")]
    pub limit_per_day: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit_per_day: default_limit_per_day(),
        }
    }
}

fn default_limit_per_day() -> u32 {
    10
}

/// Outcome of a quota check or consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Remaining allowance after this call; `None` when unlimited.
    pub remaining: Option<u32>,
}

impl QuotaDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
        }
    }

    fn denied() -> Self {
        Self {
            allowed: false,
            remaining: Some(0),
        }
    }
}

/// Counts downloads per user per local calendar day.
///
/// Counter keys expire at local midnight so a new day starts from
/// zero. Cache failures never block a download: check and consume
/// fail open, refund failures are logged and dropped.
#[derive(Clone)]
pub struct QuotaManager {
    cache: Arc<dyn CacheStore>,
    config: QuotaConfig,
}

impl QuotaManager {
    pub fn new(cache: Arc<dyn CacheStore>, config: QuotaConfig) -> Self {
        Self { cache, config }
    }

    fn counter_key(user: &str) -> String {
        format!("quota:{}:{}", user, Local::now().format("%Y%m%d"))
    }

    fn ttl_until_midnight() -> Duration {
        let now = Local::now();
        let midnight = (now.date_naive() + ChronoDuration::days(1))
            .and_time(NaiveTime::MIN)
            .and_local_timezone(now.timezone())
            .earliest()
            .unwrap_or(now + ChronoDuration::days(1));
        let secs = (midnight - now).num_seconds().max(60) as u64;
        Duration::from_secs(secs)
    }

    async fn read_counter(&self, key: &str) -> Option<u32> {
        match self.cache.get(key).await {
            Ok(Some(value)) => value.as_u64().map(|v| v as u32),
            Ok(None) => Some(0),
            Err(e) => {
                warn!(error = %e, "Quota cache read failed, allowing");
                None
            }
        }
    }

    /// Pre-flight check that never mutates the counter.
    pub async fn check(&self, user: &str, limit: Option<u32>) -> QuotaDecision {
        let limit = match self.effective_limit(limit) {
            Some(limit) => limit,
            None => return QuotaDecision::unlimited(),
        };
        match self.read_counter(&Self::counter_key(user)).await {
            Some(used) if used >= limit => QuotaDecision::denied(),
            Some(used) => QuotaDecision {
                allowed: true,
                remaining: Some(limit - used),
            },
            None => QuotaDecision::unlimited(),
        }
    }

    /// Consume one unit. Returns the allowance remaining after
    /// consumption, or a denial when the limit is already reached.
    pub async fn consume(&self, user: &str, limit: Option<u32>) -> QuotaDecision {
        let limit = match self.effective_limit(limit) {
            Some(limit) => limit,
            None => return QuotaDecision::unlimited(),
        };
        let key = Self::counter_key(user);
        let used = match self.read_counter(&key).await {
            Some(used) => used,
            None => return QuotaDecision::unlimited(),
        };
        if used >= limit {
            return QuotaDecision::denied();
        }

        let next = used + 1;
        if let Err(e) = self
            .cache
            .set(&key, next.into(), Some(Self::ttl_until_midnight()))
            .await
        {
            warn!(error = %e, user, "Quota counter write failed, allowing");
            return QuotaDecision::unlimited();
        }
        QuotaDecision {
            allowed: true,
            remaining: Some(limit - next),
        }
    }

    /// Give one unit back after a consumed attempt failed downstream.
    pub async fn refund(&self, user: &str) {
        let key = Self::counter_key(user);
        let used = match self.read_counter(&key).await {
            Some(used) if used > 0 => used,
            _ => return,
        };
        if let Err(e) = self
            .cache
            .set(&key, (used - 1).into(), Some(Self::ttl_until_midnight()))
            .await
        {
            warn!(error = %e, user, "Quota refund write failed");
        }
    }

    fn effective_limit(&self, per_user: Option<u32>) -> Option<u32> {
        if !self.config.enabled {
            return None;
        }
        Some(per_user.unwrap_or(self.config.limit_per_day))
    }
}
