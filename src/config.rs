use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Retry and backoff settings for the single-job driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total remote calls allowed per attempt sequence.
    pub max_attempts: u32,
    /// Wait used when a rate-limit error carries no suggested delay.
    pub rate_limit_default_secs: u64,
    /// Added on top of a server-suggested delay.
    pub rate_limit_margin_secs: u64,
    /// Upper bound on a server-suggested delay.
    pub rate_limit_max_secs: u64,
    /// Overload backoff is `overload_unit_secs * attempt`.
    pub overload_unit_secs: u64,
    /// Length of one countdown tick.
    pub tick_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_default_secs: 30,
            rate_limit_margin_secs: 1,
            rate_limit_max_secs: 3600,
            overload_unit_secs: 5,
            tick_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Seconds to wait after a rate-limit error, given the delay the server suggested.
    ///
    /// Suggestions above `rate_limit_max_secs` are capped there.
    pub fn rate_limit_wait(&self, suggested_secs: Option<f64>) -> u64 {
        match suggested_secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => {
                let capped = secs.ceil().min(self.rate_limit_max_secs as f64) as u64;
                capped.saturating_add(self.rate_limit_margin_secs)
            }
            _ => self.rate_limit_default_secs,
        }
    }

    /// Seconds to wait after the `attempt`-th (1-indexed) call hit an overloaded service.
    pub fn overload_wait(&self, attempt: u32) -> u64 {
        self.overload_unit_secs.saturating_mul(u64::from(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum jobs driven at once by a batch.
    pub concurrency: usize,
    /// Buffer of the store's change feed.
    pub event_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            event_capacity: 256,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Defaults overridden by `SCENE_QUEUE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "SCENE_QUEUE_CONCURRENCY")? {
            config.concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "SCENE_QUEUE_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "SCENE_QUEUE_RATE_LIMIT_DEFAULT_SECS")? {
            config.retry.rate_limit_default_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SCENE_QUEUE_OVERLOAD_UNIT_SECS")? {
            config.retry.overload_unit_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidConfig("concurrency must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig("event_capacity must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.retry.tick_ms == 0 {
            return Err(Error::InvalidConfig("tick_ms must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("{key}: cannot parse {raw:?}"))),
    }
}
