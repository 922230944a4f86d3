//! Report-composition stage
//!
//! Renders the final markdown document from a template, with an explicit
//! placeholder line for every upstream section that is unavailable.

use async_trait::async_trait;
use minijinja::Environment;
use research_core::payload::{
    FundamentalSnapshot, MarketSnapshot, NewsDigest, ReportDocument, StrategyView,
    TechnicalSnapshot,
};
use research_core::{Error, Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};
use serde::Serialize;

const TEMPLATE_NAME: &str = "research_report";

const REPORT_TEMPLATE: &str = r"# Equity Research Report: {{ symbol }}
{% if as_of %}_Data as of {{ as_of }}._{% endif %}

## Executive Summary
{% if strategy %}- Recommendation: **{{ strategy.recommendation }}** ({{ strategy.conviction }} conviction, {{ strategy.horizon }})
{% for line in strategy.rationale %}- {{ line }}
{% endfor %}{% else %}- Strategy synthesis unavailable for this run.
{% endif %}
## Company Snapshot
{% if market %}- Last close {{ market.quote.close | round(2) }}, day range {{ market.quote.low | round(2) }} - {{ market.quote.high | round(2) }}, volume {{ market.quote.volume }}
- Exchange: {{ exchange }} | Sector: {{ sector }}
{% for note in market.notables %}- Notable: {{ note }}
{% endfor %}{% else %}_Market data unavailable._
{% endif %}
## Fundamental Highlights
{% if fundamentals %}{% if fundamentals.rating %}- Overall rating: **{{ fundamentals.rating }}** ({{ fundamentals.score }}/{{ fundamentals.max_score }})
{% endif %}{% for item in fundamentals.assessments %}- {{ item.metric }}: {{ item.assessment }} ({{ item.value | round(2) }})
{% endfor %}{% if fundamentals.assessments | length == 0 %}- No ratio assessments available.
{% endif %}{% else %}_Fundamental analysis unavailable._
{% endif %}
## Technical View
{% if technicals %}- Trend: short {{ technicals.trend.short_term }}, medium {{ technicals.trend.medium_term }}{% if technicals.trend.long_term %}, long {{ technicals.trend.long_term }}{% endif %}
- RSI(14) {{ technicals.rsi_14 | round(2) }} | MACD {{ technicals.macd.line | round(2) }} vs signal {{ technicals.macd.signal | round(2) }}
- Bollinger {{ technicals.bollinger.lower | round(2) }} / {{ technicals.bollinger.middle | round(2) }} / {{ technicals.bollinger.upper | round(2) }} | ATR(14) {{ technicals.atr_14 | round(2) }}
- Support {{ technicals.support_resistance.support_1 | round(2) }} ({{ technicals.support_resistance.support_2 | round(2) }}) | Resistance {{ technicals.support_resistance.resistance_1 | round(2) }} ({{ technicals.support_resistance.resistance_2 | round(2) }})
{% for s in technicals.signals %}- {{ s.indicator }}: {{ s.signal }} ({{ s.strength }})
{% endfor %}{% else %}_Technical analysis unavailable._
{% endif %}
## News & Sentiment
{% if news %}- Overall sentiment **{{ news.overall }}** across {{ news.articles | length }} articles ({{ news.sources_consulted | join(', ') }})
{% for headline in news.highlights %}- {{ headline }}
{% endfor %}{% else %}_News coverage unavailable._
{% endif %}
## Risk Assessment
{% if strategy %}{% for risk in strategy.risks %}- {{ risk }}
{% endfor %}{% else %}- Risk synthesis unavailable; size positions conservatively.
{% endif %}
## Recommendation
{% if strategy %}**{{ strategy.recommendation }}**{% if strategy.entry %} | Entry {{ strategy.entry | round(2) }}{% endif %}{% if strategy.stop_loss %} | Stop-loss {{ strategy.stop_loss | round(2) }}{% endif %}{% if strategy.target %} | Target {{ strategy.target | round(2) }}{% endif %}

- Position sizing: {{ strategy.position_size_hint }}
{% for trigger in strategy.review_triggers %}- Review on: {{ trigger }}
{% endfor %}{% else %}_No recommendation - strategy stage unavailable._
{% endif %}
---
*Generated for educational purposes only. Not investment advice.*
";

#[derive(Serialize)]
struct ReportContext<'a> {
    symbol: String,
    as_of: Option<String>,
    exchange: String,
    sector: String,
    market: Option<&'a MarketSnapshot>,
    news: Option<&'a NewsDigest>,
    fundamentals: Option<&'a FundamentalSnapshot>,
    technicals: Option<&'a TechnicalSnapshot>,
    strategy: Option<&'a StrategyView>,
}

/// The final composition stage
pub struct ReportComposerStage {
    env: Environment<'static>,
}

impl ReportComposerStage {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template(TEMPLATE_NAME, REPORT_TEMPLATE)
            .map_err(|e| Error::Configuration(format!("report template invalid: {e}")))?;
        Ok(Self { env })
    }
}

#[async_trait]
impl Stage for ReportComposerStage {
    fn name(&self) -> StageName {
        StageName::Report
    }

    async fn execute(&self, symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput> {
        let market = inputs
            .payload(StageName::MarketData)
            .and_then(StagePayload::as_market_data);
        let context = ReportContext {
            symbol: symbol.to_string(),
            as_of: market.map(|m| m.quote.timestamp.format("%Y-%m-%d").to_string()),
            exchange: market
                .and_then(|m| m.profile.exchange.clone())
                .unwrap_or_else(|| symbol.exchange().to_string()),
            sector: market
                .and_then(|m| m.profile.sector.clone())
                .unwrap_or_else(|| "n/a".to_string()),
            market,
            news: inputs.payload(StageName::News).and_then(StagePayload::as_news),
            fundamentals: inputs
                .payload(StageName::Fundamentals)
                .and_then(StagePayload::as_fundamentals),
            technicals: inputs
                .payload(StageName::Technicals)
                .and_then(StagePayload::as_technicals),
            strategy: inputs
                .payload(StageName::Strategy)
                .and_then(StagePayload::as_strategy),
        };

        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| Error::Configuration(format!("report template missing: {e}")))?;
        let markdown = template
            .render(minijinja::value::Value::from_serialize(&context))
            .map_err(|e| Error::ExternalCall(format!("report render failed: {e}")))?;

        let mut output = StageOutput::clean(StagePayload::Report(ReportDocument { markdown }));
        for gone in inputs.missing() {
            output = output.with_caveat(format!("{gone} section replaced with placeholder"));
        }
        Ok(output)
    }
}
