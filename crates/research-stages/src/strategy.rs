//! Strategy stage: synthesizes fundamentals, technicals, and news sentiment
//!
//! Pure synthesis over upstream payloads; runs degraded with an explicit gap
//! list when an upstream is unavailable, and fails only when every input is
//! missing.

use async_trait::async_trait;
use research_core::payload::{
    Conviction, FundamentalRating, FundamentalSnapshot, Horizon, NewsDigest, Recommendation,
    Sentiment, StrategyView, TechnicalSnapshot,
};
use research_core::{Error, Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};

/// ATR above this share of price counts as elevated volatility
const ATR_RISK_PCT: f64 = 3.0;

fn fundamental_score(rating: Option<FundamentalRating>) -> i32 {
    match rating {
        Some(FundamentalRating::StrongBuy) => 2,
        Some(FundamentalRating::Buy) => 1,
        Some(FundamentalRating::Hold) | None => 0,
        Some(FundamentalRating::Sell) => -1,
        Some(FundamentalRating::StrongSell) => -2,
    }
}

fn sentiment_score(sentiment: Sentiment) -> i32 {
    match sentiment {
        Sentiment::Bullish => 1,
        Sentiment::Bearish => -1,
        Sentiment::Neutral => 0,
    }
}

/// The investment-strategy stage
#[derive(Debug, Default)]
pub struct StrategyStage {}

impl StrategyStage {
    pub fn new() -> Self {
        Self {}
    }

    fn synthesize(
        fundamentals: Option<&FundamentalSnapshot>,
        technicals: Option<&TechnicalSnapshot>,
        news: Option<&NewsDigest>,
    ) -> StrategyView {
        let fundamental_contribution = fundamentals.map(|f| fundamental_score(f.rating));
        let technical_contribution = technicals.map(|t| sentiment_score(t.overall));
        let news_contribution = news.map(|n| sentiment_score(n.overall));

        let total: i32 = [
            fundamental_contribution,
            technical_contribution,
            news_contribution,
        ]
        .iter()
        .flatten()
        .sum();

        let recommendation = if total >= 2 {
            Recommendation::Buy
        } else if total <= -2 {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        };

        let contributions: Vec<i32> = [
            fundamental_contribution,
            technical_contribution,
            news_contribution,
        ]
        .iter()
        .flatten()
        .copied()
        .collect();
        let available = contributions.len();
        let aligned = contributions.iter().all(|c| *c >= 0)
            || contributions.iter().all(|c| *c <= 0);
        let conviction = if available == 3 && aligned {
            Conviction::High
        } else if available >= 2 {
            Conviction::Medium
        } else {
            Conviction::Low
        };

        let horizon = match recommendation {
            Recommendation::Hold => Horizon::MediumTerm,
            _ if fundamental_contribution.unwrap_or(0).abs() >= 1 => Horizon::LongTerm,
            _ if technical_contribution.is_some() => Horizon::ShortTerm,
            _ => Horizon::MediumTerm,
        };

        let (entry, stop_loss, target) = match (recommendation, technicals) {
            (Recommendation::Buy, Some(t)) => (
                Some(t.current_price),
                Some(t.support_resistance.support_1),
                Some(t.support_resistance.resistance_1),
            ),
            (Recommendation::Sell, Some(t)) => (
                Some(t.current_price),
                Some(t.support_resistance.resistance_1),
                Some(t.support_resistance.support_1),
            ),
            _ => (None, None, None),
        };

        let position_size_hint = match conviction {
            Conviction::High => "standard position within allocation limits".to_string(),
            Conviction::Medium => "half position; add on confirmation".to_string(),
            Conviction::Low => "token position or wait for more data".to_string(),
        };

        let mut risks = Vec::new();
        if let Some(t) = technicals {
            if t.rsi_14 > 70.0 {
                risks.push(format!("momentum stretched (RSI {:.0})", t.rsi_14));
            }
            if t.current_price > 0.0 && t.atr_14 / t.current_price * 100.0 > ATR_RISK_PCT {
                risks.push("elevated daily volatility (wide ATR)".to_string());
            }
        }
        if news.is_some_and(|n| n.overall == Sentiment::Bearish) {
            risks.push("negative news flow".to_string());
        }
        if fundamentals.is_some_and(|f| {
            matches!(
                f.rating,
                Some(FundamentalRating::Sell | FundamentalRating::StrongSell)
            )
        }) {
            risks.push("weak fundamental rating".to_string());
        }
        risks.push("broad market drawdowns".to_string());

        let mut review_triggers = Vec::new();
        if let Some(stop) = stop_loss {
            review_triggers.push(format!("price closing below {stop:.2}"));
        }
        if let Some(target) = target {
            review_triggers.push(format!("price reaching {target:.2}"));
        }
        review_triggers.push("next quarterly results".to_string());

        let mut rationale = Vec::new();
        if let Some(f) = fundamentals {
            if let Some(rating) = f.rating {
                rationale.push(format!(
                    "fundamental rating {rating:?} ({}/{} ratio score)",
                    f.score, f.max_score
                ));
            }
        }
        if let Some(t) = technicals {
            rationale.push(format!(
                "technical bias {:?} from {} signals",
                t.overall,
                t.signals.len()
            ));
        }
        if let Some(n) = news {
            rationale.push(format!(
                "news sentiment {:?} across {} articles",
                n.overall,
                n.articles.len()
            ));
        }

        StrategyView {
            recommendation,
            conviction,
            horizon,
            entry,
            stop_loss,
            target,
            position_size_hint,
            risks,
            review_triggers,
            rationale,
            gaps: Vec::new(),
        }
    }
}

#[async_trait]
impl Stage for StrategyStage {
    fn name(&self) -> StageName {
        StageName::Strategy
    }

    async fn execute(&self, symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput> {
        let fundamentals = inputs
            .payload(StageName::Fundamentals)
            .and_then(StagePayload::as_fundamentals);
        let technicals = inputs
            .payload(StageName::Technicals)
            .and_then(StagePayload::as_technicals);
        let news = inputs.payload(StageName::News).and_then(StagePayload::as_news);

        if fundamentals.is_none() && technicals.is_none() && news.is_none() {
            return Err(Error::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no upstream analysis available to synthesize".to_string(),
            });
        }

        let mut view = Self::synthesize(fundamentals, technicals, news);
        let gaps: Vec<String> = inputs.missing().iter().map(ToString::to_string).collect();
        view.gaps = gaps.clone();

        let mut output = StageOutput::clean(StagePayload::Strategy(view));
        for gap in gaps {
            output = output.with_caveat(format!("synthesized without {gap} input"));
        }
        Ok(output)
    }
}
