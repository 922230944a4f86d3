//! Fundamentals stage: ratio retrieval and threshold scoring

use crate::settings::StageSettings;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use research_core::payload::{
    FundamentalRating, FundamentalSnapshot, Impact, RatioAssessment,
};
use research_core::{Error, Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::debug;

const BASE_URL: &str = "https://www.alphavantage.co/query";

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

// Assessment thresholds carried over from the original assistant.
const PE_LOW: f64 = 15.0;
const PE_HIGH: f64 = 30.0;
const PB_LOW: f64 = 1.0;
const PB_HIGH: f64 = 5.0;
const DEBT_EQUITY_MAX: f64 = 1.5;
const ROE_MIN_PCT: f64 = 15.0;
const EARNINGS_GROWTH_MIN_PCT: f64 = 10.0;

/// Company overview as the provider delivers it (string-typed throughout)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompanyOverview {
    #[serde(rename = "PERatio")]
    pub pe_ratio: Option<String>,
    #[serde(rename = "ForwardPE")]
    pub forward_pe: Option<String>,
    #[serde(rename = "PriceToBookRatio")]
    pub pb_ratio: Option<String>,
    #[serde(rename = "EVToEBITDA")]
    pub ev_to_ebitda: Option<String>,
    #[serde(rename = "ReturnOnEquityTTM")]
    pub roe: Option<String>,
    #[serde(rename = "ReturnOnAssetsTTM")]
    pub roa: Option<String>,
    #[serde(rename = "ProfitMargin")]
    pub profit_margin: Option<String>,
    #[serde(rename = "OperatingMarginTTM")]
    pub operating_margin: Option<String>,
    #[serde(rename = "EPS")]
    pub eps: Option<String>,
    #[serde(rename = "BookValue")]
    pub book_value: Option<String>,
    #[serde(rename = "DividendYield")]
    pub dividend_yield: Option<String>,
    #[serde(rename = "PayoutRatio")]
    pub payout_ratio: Option<String>,
    #[serde(rename = "QuarterlyEarningsGrowthYOY")]
    pub earnings_growth: Option<String>,
    #[serde(rename = "QuarterlyRevenueGrowthYOY")]
    pub revenue_growth: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    pub market_cap: Option<String>,
}

/// Numeric value of a provider field; `"None"`, `"-"`, and empty strings
/// all mean absent
fn parse_field(field: &Option<String>) -> Option<f64> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "None" && *v != "-")
        .and_then(|v| v.parse().ok())
}

/// Rate-limited client for the fundamentals provider
pub struct FundamentalsClient {
    client: Client,
    api_key: String,
    rate_limiter: SharedRateLimiter,
}

impl FundamentalsClient {
    /// Create a new client with API key and per-minute request budget
    pub fn new(api_key: impl Into<String>, rate_limit: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate_limit).unwrap_or(NonZeroU32::MIN));
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Fetch the company overview for a symbol
    pub async fn overview(&self, symbol: &Symbol) -> Result<CompanyOverview> {
        self.rate_limiter.until_ready().await;

        let ticker = symbol.ticker().to_string();
        let mut params = HashMap::new();
        params.insert("function", "OVERVIEW");
        params.insert("symbol", ticker.as_str());
        params.insert("apikey", self.api_key.as_str());

        let response = self
            .client
            .get(BASE_URL)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::ExternalCall(format!("overview request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::ExternalCall(format!(
                "overview returned {}",
                response.status()
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::ExternalCall(format!("overview unparsable: {e}")))?;

        if let Some(message) = data.get("Error Message") {
            return Err(Error::DataUnavailable {
                symbol: symbol.to_string(),
                reason: message.to_string(),
            });
        }
        if data.get("Note").is_some() {
            return Err(Error::ExternalCall(
                "fundamentals provider rate limit exceeded".to_string(),
            ));
        }

        serde_json::from_value(data)
            .map_err(|e| Error::ExternalCall(format!("overview shape unexpected: {e}")))
    }
}

/// Score present ratios against the fixed thresholds
///
/// Only metrics the provider returned count toward the maximum score, so a
/// thin overview does not drag the rating down artificially.
pub fn score_ratios(snapshot: &mut FundamentalSnapshot) {
    let mut assessments = Vec::new();
    let mut score = 0u32;
    let mut max_score = 0u32;

    if let Some(pe) = snapshot.pe_ratio.filter(|v| *v > 0.0) {
        max_score += 10;
        if pe < PE_LOW {
            assessments.push(RatioAssessment {
                metric: "PE Ratio".to_string(),
                value: pe,
                assessment: "Undervalued".to_string(),
                impact: Impact::Positive,
            });
            score += 10;
        } else if pe > PE_HIGH {
            assessments.push(RatioAssessment {
                metric: "PE Ratio".to_string(),
                value: pe,
                assessment: "Overvalued".to_string(),
                impact: Impact::Negative,
            });
        } else {
            assessments.push(RatioAssessment {
                metric: "PE Ratio".to_string(),
                value: pe,
                assessment: "Fair Valued".to_string(),
                impact: Impact::Neutral,
            });
            score += 5;
        }
    }

    if let Some(pb) = snapshot.pb_ratio.filter(|v| *v > 0.0) {
        max_score += 10;
        if pb < PB_LOW {
            assessments.push(RatioAssessment {
                metric: "PB Ratio".to_string(),
                value: pb,
                assessment: "Undervalued".to_string(),
                impact: Impact::Positive,
            });
            score += 10;
        } else if pb > PB_HIGH {
            assessments.push(RatioAssessment {
                metric: "PB Ratio".to_string(),
                value: pb,
                assessment: "Overvalued".to_string(),
                impact: Impact::Negative,
            });
        } else {
            score += 5;
        }
    }

    if let Some(roe) = snapshot.roe.filter(|v| *v > 0.0) {
        max_score += 10;
        let roe_pct = roe * 100.0;
        if roe_pct >= ROE_MIN_PCT {
            assessments.push(RatioAssessment {
                metric: "ROE".to_string(),
                value: roe_pct,
                assessment: "Strong".to_string(),
                impact: Impact::Positive,
            });
            score += 10;
        } else if roe_pct >= 10.0 {
            score += 5;
        }
    }

    if let Some(de) = snapshot.debt_to_equity.filter(|v| *v > 0.0) {
        max_score += 10;
        if de <= DEBT_EQUITY_MAX {
            assessments.push(RatioAssessment {
                metric: "Debt/Equity".to_string(),
                value: de,
                assessment: "Healthy".to_string(),
                impact: Impact::Positive,
            });
            score += 10;
        } else {
            assessments.push(RatioAssessment {
                metric: "Debt/Equity".to_string(),
                value: de,
                assessment: "High Debt".to_string(),
                impact: Impact::Negative,
            });
        }
    }

    if let Some(growth) = snapshot.earnings_growth.filter(|v| *v > 0.0) {
        max_score += 10;
        let growth_pct = growth * 100.0;
        if growth_pct >= EARNINGS_GROWTH_MIN_PCT {
            assessments.push(RatioAssessment {
                metric: "Earnings Growth".to_string(),
                value: growth_pct,
                assessment: "Strong Growth".to_string(),
                impact: Impact::Positive,
            });
            score += 10;
        } else {
            score += 5;
        }
    }

    snapshot.assessments = assessments;
    snapshot.score = score;
    snapshot.max_score = max_score;
    snapshot.rating = (max_score > 0).then(|| {
        let pct = f64::from(score) / f64::from(max_score) * 100.0;
        if pct >= 70.0 {
            FundamentalRating::StrongBuy
        } else if pct >= 55.0 {
            FundamentalRating::Buy
        } else if pct >= 40.0 {
            FundamentalRating::Hold
        } else if pct >= 25.0 {
            FundamentalRating::Sell
        } else {
            FundamentalRating::StrongSell
        }
    });
}

/// The fundamental-ratio evaluation stage
pub struct FundamentalsStage {
    client: Option<FundamentalsClient>,
}

impl FundamentalsStage {
    pub fn new(settings: &StageSettings) -> Self {
        let client = settings.fundamentals_api_key.as_ref().map(|key| {
            FundamentalsClient::new(key.clone(), settings.fundamentals_requests_per_minute)
        });
        Self { client }
    }
}

#[async_trait]
impl Stage for FundamentalsStage {
    fn name(&self) -> StageName {
        StageName::Fundamentals
    }

    async fn execute(&self, symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput> {
        let market = inputs
            .payload(StageName::MarketData)
            .and_then(StagePayload::as_market_data);
        let mut caveats = Vec::new();

        let mut snapshot = match &self.client {
            Some(client) => {
                let overview = client.overview(symbol).await?;
                debug!(%symbol, "fundamentals overview fetched");
                FundamentalSnapshot {
                    pe_ratio: parse_field(&overview.pe_ratio),
                    forward_pe: parse_field(&overview.forward_pe),
                    pb_ratio: parse_field(&overview.pb_ratio),
                    ev_to_ebitda: parse_field(&overview.ev_to_ebitda),
                    roe: parse_field(&overview.roe),
                    roa: parse_field(&overview.roa),
                    profit_margin: parse_field(&overview.profit_margin),
                    operating_margin: parse_field(&overview.operating_margin),
                    eps: parse_field(&overview.eps),
                    book_value: parse_field(&overview.book_value),
                    dividend_yield: parse_field(&overview.dividend_yield),
                    payout_ratio: parse_field(&overview.payout_ratio),
                    earnings_growth: parse_field(&overview.earnings_growth),
                    revenue_growth: parse_field(&overview.revenue_growth),
                    market_cap: parse_field(&overview.market_cap),
                    ..FundamentalSnapshot::default()
                }
            }
            None => {
                caveats.push(
                    "fundamentals provider not configured; ratios limited to market profile"
                        .to_string(),
                );
                let profile = market.map(|m| &m.profile);
                FundamentalSnapshot {
                    pe_ratio: profile.and_then(|p| p.pe_ratio),
                    dividend_yield: profile.and_then(|p| p.dividend_yield),
                    market_cap: profile.and_then(|p| p.market_cap),
                    ..FundamentalSnapshot::default()
                }
            }
        };

        // Prefer the live market cap when the provider's figure is missing.
        if snapshot.market_cap.is_none() {
            snapshot.market_cap = market.and_then(|m| m.profile.market_cap);
        }

        score_ratios(&mut snapshot);
        if snapshot.rating.is_none() {
            caveats.push("insufficient ratio coverage for an overall rating".to_string());
        }

        Ok(StageOutput {
            payload: StagePayload::Fundamentals(snapshot),
            caveats,
        })
    }
}
