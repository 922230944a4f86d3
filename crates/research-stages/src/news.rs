//! News stage: three-source fan-out with headline sentiment
//!
//! Each source is a thin JSON feed client behind its own rate limiter. One
//! source failing degrades the stage; only all sources failing fails it.

use crate::settings::StageSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use research_core::payload::{NewsArticle, NewsDigest, Sentiment};
use research_core::{Error, Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Most material items surfaced in the digest
const HIGHLIGHT_LIMIT: usize = 5;

/// A configurable news feed endpoint; `{symbol}` in the URL is replaced by
/// the lower-cased ticker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadlineSource {
    pub name: String,
    pub endpoint: String,
}

impl HeadlineSource {
    /// The three sources the original assistant aggregated
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "moneycontrol".to_string(),
                endpoint: "https://www.moneycontrol.com/news/tags/{symbol}.json".to_string(),
            },
            Self {
                name: "economictimes".to_string(),
                endpoint: "https://economictimes.indiatimes.com/topic/{symbol}.json".to_string(),
            },
            Self {
                name: "businessstandard".to_string(),
                endpoint: "https://www.business-standard.com/api/news?tag={symbol}".to_string(),
            },
        ]
    }
}

/// One item as the feeds deliver it
#[derive(Debug, Clone, Deserialize)]
pub struct RawHeadline {
    #[serde(alias = "headline")]
    pub title: String,
    #[serde(default, alias = "description")]
    pub summary: String,
    #[serde(default, alias = "link")]
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// Rate-limited client for one headline feed
pub struct HeadlineClient {
    source: HeadlineSource,
    client: Client,
    rate_limiter: SharedRateLimiter,
}

impl HeadlineClient {
    /// Create a client with a per-minute request budget
    pub fn new(source: HeadlineSource, requests_per_minute: u32) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            source,
            client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    /// Fetch up to `limit` headlines for a symbol
    pub async fn fetch(&self, symbol: &Symbol, limit: usize) -> Result<Vec<RawHeadline>> {
        self.rate_limiter.until_ready().await;

        let url = self
            .source
            .endpoint
            .replace("{symbol}", &symbol.ticker().to_lowercase());

        let response = self.client.get(&url).send().await.map_err(|e| {
            Error::ExternalCall(format!("{} request failed: {e}", self.source.name))
        })?;

        if !response.status().is_success() {
            return Err(Error::ExternalCall(format!(
                "{} returned {}",
                self.source.name,
                response.status()
            )));
        }

        let items: Vec<RawHeadline> = response.json().await.map_err(|e| {
            Error::ExternalCall(format!("{} response unparsable: {e}", self.source.name))
        })?;

        Ok(items.into_iter().take(limit).collect())
    }
}

// Headline lexicon for the Bullish/Bearish/Neutral scale. Crude on purpose:
// the classifier only has headlines and summaries to work with.
const BULLISH_TERMS: &[&str] = &[
    "surge", "surges", "gain", "gains", "rally", "record", "beat", "beats", "upgrade",
    "upgraded", "profit", "wins", "win", "growth", "strong", "buyback", "dividend",
    "expansion", "jumps", "soars", "outperform",
];
const BEARISH_TERMS: &[&str] = &[
    "fall", "falls", "loss", "losses", "drop", "drops", "slump", "slumps", "downgrade",
    "downgraded", "probe", "fraud", "penalty", "weak", "decline", "declines", "miss",
    "misses", "cuts", "recall", "lawsuit", "underperform", "plunge", "plunges",
];

/// Classify one headline (plus summary) by lexicon hit counts
pub fn classify_headline(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let hits = |terms: &[&str]| words.iter().filter(|w| terms.contains(*w)).count();
    let bullish = hits(BULLISH_TERMS);
    let bearish = hits(BEARISH_TERMS);
    match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Sentiment::Bullish,
        std::cmp::Ordering::Less => Sentiment::Bearish,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

fn overall_sentiment(articles: &[NewsArticle]) -> Sentiment {
    let bullish = articles
        .iter()
        .filter(|a| a.sentiment == Sentiment::Bullish)
        .count();
    let bearish = articles
        .iter()
        .filter(|a| a.sentiment == Sentiment::Bearish)
        .count();
    match bullish.cmp(&bearish) {
        std::cmp::Ordering::Greater => Sentiment::Bullish,
        std::cmp::Ordering::Less => Sentiment::Bearish,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// Merge, dedupe, and order articles; sentiment-bearing items first within
/// equal timestamps is not needed, recency is.
fn build_digest(mut articles: Vec<NewsArticle>, sources_consulted: Vec<String>) -> NewsDigest {
    let mut seen = HashSet::new();
    articles.retain(|a| seen.insert(a.headline.to_lowercase()));
    articles.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.headline.cmp(&b.headline))
    });

    let overall = overall_sentiment(&articles);
    let mut highlights: Vec<String> = articles
        .iter()
        .filter(|a| a.sentiment != Sentiment::Neutral)
        .take(HIGHLIGHT_LIMIT)
        .map(|a| a.headline.clone())
        .collect();
    if highlights.is_empty() {
        highlights = articles
            .iter()
            .take(HIGHLIGHT_LIMIT)
            .map(|a| a.headline.clone())
            .collect();
    }

    NewsDigest {
        articles,
        overall,
        highlights,
        sources_consulted,
    }
}

/// The news aggregation stage
pub struct NewsStage {
    clients: Vec<HeadlineClient>,
    limit_per_source: usize,
}

impl NewsStage {
    pub fn new(settings: &StageSettings) -> Self {
        let clients = settings
            .news_sources
            .iter()
            .cloned()
            .map(|source| HeadlineClient::new(source, settings.news_requests_per_minute))
            .collect();
        Self {
            clients,
            limit_per_source: settings.news_limit_per_source,
        }
    }
}

#[async_trait]
impl Stage for NewsStage {
    fn name(&self) -> StageName {
        StageName::News
    }

    async fn execute(&self, symbol: &Symbol, _inputs: &StageInputs) -> Result<StageOutput> {
        let fetches = self
            .clients
            .iter()
            .map(|client| client.fetch(symbol, self.limit_per_source));
        let outcomes = futures::future::join_all(fetches).await;

        let mut articles = Vec::new();
        let mut sources_consulted = Vec::new();
        let mut caveats = Vec::new();
        for (client, outcome) in self.clients.iter().zip(outcomes) {
            match outcome {
                Ok(raw) => {
                    debug!(source = client.name(), count = raw.len(), "headlines fetched");
                    sources_consulted.push(client.name().to_string());
                    articles.extend(raw.into_iter().map(|item| {
                        let sentiment =
                            classify_headline(&format!("{} {}", item.title, item.summary));
                        NewsArticle {
                            headline: item.title,
                            summary: item.summary,
                            source: client.name().to_string(),
                            url: item.url,
                            published_at: item.published_at,
                            sentiment,
                        }
                    }));
                }
                Err(err) => {
                    warn!(source = client.name(), %err, "news source failed");
                    caveats.push(format!("{} unavailable: {err}", client.name()));
                }
            }
        }

        if sources_consulted.is_empty() {
            return Err(Error::ExternalCall(format!(
                "all news sources failed for {symbol}"
            )));
        }

        let digest = build_digest(articles, sources_consulted);
        Ok(StageOutput {
            payload: StagePayload::News(digest),
            caveats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(headline: &str, sentiment: Sentiment) -> NewsArticle {
        NewsArticle {
            headline: headline.to_string(),
            summary: String::new(),
            source: "test".to_string(),
            url: String::new(),
            published_at: None,
            sentiment,
        }
    }

    #[test]
    fn test_classify_headline() {
        assert_eq!(
            classify_headline("TCS profit surges on record deal wins"),
            Sentiment::Bullish
        );
        assert_eq!(
            classify_headline("Shares slump after regulatory probe"),
            Sentiment::Bearish
        );
        assert_eq!(
            classify_headline("Board meeting scheduled for Tuesday"),
            Sentiment::Neutral
        );
        // Mixed signals cancel out
        assert_eq!(
            classify_headline("Profit gains offset by one-time loss, shares drop"),
            Sentiment::Neutral
        );
    }

    #[test]
    fn test_digest_dedupes_and_ranks() {
        let digest = build_digest(
            vec![
                article("Quarterly results announced", Sentiment::Neutral),
                article("quarterly results announced", Sentiment::Neutral),
                article("Profit surges", Sentiment::Bullish),
            ],
            vec!["moneycontrol".to_string()],
        );
        assert_eq!(digest.articles.len(), 2);
        assert_eq!(digest.overall, Sentiment::Bullish);
        assert_eq!(digest.highlights, vec!["Profit surges".to_string()]);
    }

    #[test]
    fn test_digest_falls_back_to_neutral_highlights() {
        let digest = build_digest(
            vec![article("Board meeting on Tuesday", Sentiment::Neutral)],
            vec!["economictimes".to_string()],
        );
        assert_eq!(digest.overall, Sentiment::Neutral);
        assert_eq!(digest.highlights.len(), 1);
    }

    #[test]
    fn test_default_sources() {
        let sources = HeadlineSource::defaults();
        assert_eq!(sources.len(), 3);
        assert!(sources.iter().all(|s| s.endpoint.contains("{symbol}")));
    }
}
