//! Market-data stage: price, volume, history, and company profile

use crate::api::YahooFinanceClient;
use crate::settings::StageSettings;
use async_trait::async_trait;
use research_core::payload::MarketSnapshot;
use research_core::{Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};
use tracing::debug;

/// Bars considered when judging a volume spike
const VOLUME_WINDOW: usize = 20;

/// Opening gap worth flagging, in percent of the previous close
const GAP_THRESHOLD_PCT: f64 = 2.0;

/// The mandatory root stage: everything else builds on its output
pub struct MarketDataStage {
    client: YahooFinanceClient,
    history_days: i64,
}

impl MarketDataStage {
    pub fn new(settings: &StageSettings) -> Self {
        Self {
            client: YahooFinanceClient::new(),
            history_days: settings.history_days,
        }
    }
}

#[async_trait]
impl Stage for MarketDataStage {
    fn name(&self) -> StageName {
        StageName::MarketData
    }

    async fn execute(&self, symbol: &Symbol, _inputs: &StageInputs) -> Result<StageOutput> {
        let (quote, history) = tokio::join!(
            self.client.latest_quote(symbol),
            self.client.daily_history(symbol, self.history_days),
        );

        // No usable quote means no report at all; history is recoverable.
        let quote = quote?;
        let mut caveats = Vec::new();
        let history = match history {
            Ok(bars) => bars,
            Err(err) => {
                caveats.push(format!("historical data unavailable: {err}"));
                Vec::new()
            }
        };
        let profile = self.client.company_profile(symbol).await?;

        debug!(%symbol, bars = history.len(), "market data fetched");

        let recent_volumes: Vec<f64> = history
            .iter()
            .rev()
            .take(VOLUME_WINDOW)
            .map(|q| q.volume as f64)
            .collect();
        let average_volume_20d = (!recent_volumes.is_empty())
            .then(|| recent_volumes.iter().sum::<f64>() / recent_volumes.len() as f64)
            .filter(|avg| *avg > 0.0);
        let volume_ratio = average_volume_20d.map(|avg| quote.volume as f64 / avg);

        let mut notables = Vec::new();
        if let Some(ratio) = volume_ratio.filter(|r| *r > 2.0) {
            notables.push(format!(
                "volume is {ratio:.1}x the {VOLUME_WINDOW}-day average"
            ));
        }
        if history.len() >= 2 {
            let previous = &history[history.len() - 2];
            if previous.close > 0.0 {
                let gap_pct = (quote.open - previous.close) / previous.close * 100.0;
                if gap_pct.abs() > GAP_THRESHOLD_PCT {
                    let direction = if gap_pct > 0.0 { "above" } else { "below" };
                    notables.push(format!(
                        "opened {:.1}% {direction} the previous close",
                        gap_pct.abs()
                    ));
                }
            }
        }

        let snapshot = MarketSnapshot {
            symbol: symbol.to_string(),
            quote,
            profile,
            history,
            average_volume_20d,
            volume_ratio,
            notables,
        };

        Ok(StageOutput {
            payload: StagePayload::MarketData(snapshot),
            caveats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_identity() {
        let stage = MarketDataStage::new(&StageSettings::default());
        assert_eq!(stage.name(), StageName::MarketData);
    }
}
