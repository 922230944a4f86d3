//! Configuration for the stage collaborators

use crate::news::HeadlineSource;
use serde::{Deserialize, Serialize};

/// Settings shared by the stage implementations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSettings {
    /// Calendar days of daily history fetched by the market-data stage
    pub history_days: i64,

    /// Articles kept per news source
    pub news_limit_per_source: usize,

    /// Per-source request budget for news fetches
    pub news_requests_per_minute: u32,

    /// Request budget for the fundamentals provider (free tier: 5)
    pub fundamentals_requests_per_minute: u32,

    /// Fundamentals provider API key; without it the stage degrades to the
    /// ratios available from the market profile
    pub fundamentals_api_key: Option<String>,

    /// News sources to fan out over
    pub news_sources: Vec<HeadlineSource>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            history_days: 365,
            news_limit_per_source: 5,
            news_requests_per_minute: 10,
            fundamentals_requests_per_minute: 5,
            fundamentals_api_key: None,
            news_sources: HeadlineSource::defaults(),
        }
    }
}

impl StageSettings {
    /// Load the fundamentals API key from the environment
    pub fn with_env_api_key(mut self) -> Self {
        if let Ok(key) = std::env::var("ALPHA_VANTAGE_API_KEY") {
            self.fundamentals_api_key = Some(key);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = StageSettings::default();
        assert_eq!(settings.history_days, 365);
        assert_eq!(settings.news_sources.len(), 3);
        assert!(settings.fundamentals_api_key.is_none());
    }
}
