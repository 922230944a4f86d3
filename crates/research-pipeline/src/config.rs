//! Configuration for the research pipeline

use research_core::{Error, Result, StageName};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one pipeline instance
///
/// Freshness windows default to the original data-source lifetimes: 15
/// minutes for price-derived stages, 5 minutes for news, an hour for
/// fundamentals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum attempts per external call (first try included)
    pub max_attempts: u32,

    /// Initial backoff delay; doubles per attempt
    pub retry_base_delay: Duration,

    /// Backoff budget across all attempts of one call
    pub retry_max_total_wait: Duration,

    /// Timeout applied to each individual attempt
    pub attempt_timeout: Duration,

    /// Consecutive call failures before a breaker opens
    pub breaker_failure_threshold: u32,

    /// Sliding window within which failures count as consecutive
    pub breaker_window: Duration,

    /// How long an open breaker rejects calls before re-attempting
    pub breaker_cooldown: Duration,

    /// Bound on concurrently executing stages
    pub max_concurrent_stages: usize,

    /// Default whole-run deadline when the caller passes none
    pub run_timeout: Duration,

    /// Soft bound on cached entries
    pub cache_capacity: usize,

    pub freshness_market_data: Duration,
    pub freshness_news: Duration,
    pub freshness_fundamentals: Duration,
    pub freshness_technicals: Duration,
    pub freshness_strategy: Duration,
    pub freshness_report: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_total_wait: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
            breaker_failure_threshold: 5,
            breaker_window: Duration::from_secs(60),
            breaker_cooldown: Duration::from_secs(60),
            max_concurrent_stages: 4,
            run_timeout: Duration::from_secs(180),
            cache_capacity: 200,
            freshness_market_data: Duration::from_secs(900),
            freshness_news: Duration::from_secs(300),
            freshness_fundamentals: Duration::from_secs(3600),
            freshness_technicals: Duration::from_secs(900),
            freshness_strategy: Duration::from_secs(900),
            freshness_report: Duration::from_secs(900),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Freshness window for a stage's cached result
    pub fn freshness(&self, stage: StageName) -> Duration {
        match stage {
            StageName::MarketData => self.freshness_market_data,
            StageName::News => self.freshness_news,
            StageName::Fundamentals => self.freshness_fundamentals,
            StageName::Technicals => self.freshness_technicals,
            StageName::Strategy => self.freshness_strategy,
            StageName::Report => self.freshness_report,
        }
    }

    /// Backoff delay before the given retry attempt (0-based)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay * 2_u32.saturating_pow(attempt)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_stages == 0 {
            return Err(Error::Configuration(
                "max_concurrent_stages must be greater than 0".to_string(),
            ));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(Error::Configuration(
                "breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(Error::Configuration(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PipelineConfig
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    max_attempts: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_total_wait: Option<Duration>,
    attempt_timeout: Option<Duration>,
    breaker_failure_threshold: Option<u32>,
    breaker_window: Option<Duration>,
    breaker_cooldown: Option<Duration>,
    max_concurrent_stages: Option<usize>,
    run_timeout: Option<Duration>,
    cache_capacity: Option<usize>,
    freshness_market_data: Option<Duration>,
    freshness_news: Option<Duration>,
    freshness_fundamentals: Option<Duration>,
    freshness_technicals: Option<Duration>,
    freshness_strategy: Option<Duration>,
    freshness_report: Option<Duration>,
}

impl PipelineConfigBuilder {
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn retry_max_total_wait(mut self, wait: Duration) -> Self {
        self.retry_max_total_wait = Some(wait);
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = Some(threshold);
        self
    }

    pub fn breaker_window(mut self, window: Duration) -> Self {
        self.breaker_window = Some(window);
        self
    }

    pub fn breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = Some(cooldown);
        self
    }

    pub fn max_concurrent_stages(mut self, max: usize) -> Self {
        self.max_concurrent_stages = Some(max);
        self
    }

    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    pub fn freshness(mut self, stage: StageName, window: Duration) -> Self {
        let slot = match stage {
            StageName::MarketData => &mut self.freshness_market_data,
            StageName::News => &mut self.freshness_news,
            StageName::Fundamentals => &mut self.freshness_fundamentals,
            StageName::Technicals => &mut self.freshness_technicals,
            StageName::Strategy => &mut self.freshness_strategy,
            StageName::Report => &mut self.freshness_report,
        };
        *slot = Some(window);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();

        let config = PipelineConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            retry_base_delay: self.retry_base_delay.unwrap_or(defaults.retry_base_delay),
            retry_max_total_wait: self
                .retry_max_total_wait
                .unwrap_or(defaults.retry_max_total_wait),
            attempt_timeout: self.attempt_timeout.unwrap_or(defaults.attempt_timeout),
            breaker_failure_threshold: self
                .breaker_failure_threshold
                .unwrap_or(defaults.breaker_failure_threshold),
            breaker_window: self.breaker_window.unwrap_or(defaults.breaker_window),
            breaker_cooldown: self.breaker_cooldown.unwrap_or(defaults.breaker_cooldown),
            max_concurrent_stages: self
                .max_concurrent_stages
                .unwrap_or(defaults.max_concurrent_stages),
            run_timeout: self.run_timeout.unwrap_or(defaults.run_timeout),
            cache_capacity: self.cache_capacity.unwrap_or(defaults.cache_capacity),
            freshness_market_data: self
                .freshness_market_data
                .unwrap_or(defaults.freshness_market_data),
            freshness_news: self.freshness_news.unwrap_or(defaults.freshness_news),
            freshness_fundamentals: self
                .freshness_fundamentals
                .unwrap_or(defaults.freshness_fundamentals),
            freshness_technicals: self
                .freshness_technicals
                .unwrap_or(defaults.freshness_technicals),
            freshness_strategy: self
                .freshness_strategy
                .unwrap_or(defaults.freshness_strategy),
            freshness_report: self.freshness_report.unwrap_or(defaults.freshness_report),
        };

        config.validate()?;
        Ok(config)
    }
}
