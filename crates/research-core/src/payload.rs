//! Typed per-stage payloads
//!
//! Each stage produces one of these closed variants; the aggregator and the
//! report composer consume them without downcasting.

use crate::stage::StageName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar
///
/// Provider contract: `high >= max(open, close)` and `low <= min(open, close)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub adjclose: f64,
}

/// Company profile metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub name: Option<String>,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
}

/// Output of the market-data stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub quote: Quote,
    pub profile: CompanyProfile,
    /// Daily bars, oldest first
    pub history: Vec<Quote>,
    pub average_volume_20d: Option<f64>,
    pub volume_ratio: Option<f64>,
    /// Unusual activity worth surfacing (volume spikes, gaps)
    pub notables: Vec<String>,
}

/// Headline-level market sentiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// A single aggregated news item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub headline: String,
    pub summary: String,
    pub source: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub sentiment: Sentiment,
}

/// Output of the news stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsDigest {
    pub articles: Vec<NewsArticle>,
    pub overall: Sentiment,
    /// The most material items, at most five
    pub highlights: Vec<String>,
    pub sources_consulted: Vec<String>,
}

/// Direction of a ratio's contribution to the overall rating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Impact {
    Positive,
    Negative,
    Neutral,
}

/// One ratio measured against its threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioAssessment {
    pub metric: String,
    pub value: f64,
    pub assessment: String,
    pub impact: Impact,
}

/// Overall fundamental rating ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FundamentalRating {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

/// Output of the fundamentals stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundamentalSnapshot {
    pub pe_ratio: Option<f64>,
    pub forward_pe: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub ev_to_ebitda: Option<f64>,
    pub roe: Option<f64>,
    pub roa: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub current_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub book_value: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub payout_ratio: Option<f64>,
    pub earnings_growth: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub market_cap: Option<f64>,
    pub assessments: Vec<RatioAssessment>,
    pub score: u32,
    pub max_score: u32,
    pub rating: Option<FundamentalRating>,
}

/// Moving-average readings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAverages {
    pub sma_20: f64,
    pub sma_50: f64,
    /// Absent when fewer than 200 bars are available
    pub sma_200: Option<f64>,
    pub ema_12: f64,
    pub ema_26: f64,
}

/// MACD (12, 26, 9) readings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Bollinger band readings (20, 2 sigma)
///
/// Contract: `upper >= middle >= lower`; `position` is the price's location
/// within the band in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub position: f64,
}

/// Classic pivot levels from the latest bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResistance {
    pub pivot: f64,
    pub resistance_1: f64,
    pub resistance_2: f64,
    pub support_1: f64,
    pub support_2: f64,
    pub recent_high: f64,
    pub recent_low: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

/// Trend read across horizons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSummary {
    pub short_term: TrendDirection,
    pub medium_term: TrendDirection,
    pub long_term: Option<TrendDirection>,
    pub golden_cross: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    Strong,
    Moderate,
    Weak,
}

/// One indicator's trading signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub indicator: String,
    pub signal: String,
    pub strength: SignalStrength,
}

/// Output of the technicals stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalSnapshot {
    pub current_price: f64,
    pub moving_averages: MovingAverages,
    /// Always within `[0, 100]`
    pub rsi_14: f64,
    pub macd: Macd,
    pub bollinger: Bollinger,
    pub atr_14: f64,
    pub volume_ratio: f64,
    pub support_resistance: SupportResistance,
    pub trend: TrendSummary,
    pub signals: Vec<TradeSignal>,
    pub overall: Sentiment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conviction {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

/// Output of the strategy stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyView {
    pub recommendation: Recommendation,
    pub conviction: Conviction,
    pub horizon: Horizon,
    pub entry: Option<f64>,
    pub stop_loss: Option<f64>,
    pub target: Option<f64>,
    pub position_size_hint: String,
    pub risks: Vec<String>,
    pub review_triggers: Vec<String>,
    pub rationale: Vec<String>,
    /// Upstream inputs that were unavailable when synthesizing
    pub gaps: Vec<String>,
}

/// Output of the report-composition stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDocument {
    pub markdown: String,
}

/// Closed union of every stage's payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StagePayload {
    MarketData(MarketSnapshot),
    News(NewsDigest),
    Fundamentals(FundamentalSnapshot),
    Technicals(TechnicalSnapshot),
    Strategy(StrategyView),
    Report(ReportDocument),
}

impl StagePayload {
    /// The stage this payload belongs to
    pub fn stage(&self) -> StageName {
        match self {
            StagePayload::MarketData(_) => StageName::MarketData,
            StagePayload::News(_) => StageName::News,
            StagePayload::Fundamentals(_) => StageName::Fundamentals,
            StagePayload::Technicals(_) => StageName::Technicals,
            StagePayload::Strategy(_) => StageName::Strategy,
            StagePayload::Report(_) => StageName::Report,
        }
    }

    pub fn as_market_data(&self) -> Option<&MarketSnapshot> {
        match self {
            StagePayload::MarketData(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn as_news(&self) -> Option<&NewsDigest> {
        match self {
            StagePayload::News(digest) => Some(digest),
            _ => None,
        }
    }

    pub fn as_fundamentals(&self) -> Option<&FundamentalSnapshot> {
        match self {
            StagePayload::Fundamentals(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn as_technicals(&self) -> Option<&TechnicalSnapshot> {
        match self {
            StagePayload::Technicals(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn as_strategy(&self) -> Option<&StrategyView> {
        match self {
            StagePayload::Strategy(view) => Some(view),
            _ => None,
        }
    }

    pub fn as_report(&self) -> Option<&ReportDocument> {
        match self {
            StagePayload::Report(document) => Some(document),
            _ => None,
        }
    }
}
