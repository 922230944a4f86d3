//! Technicals stage: indicator computation over the market-data history
//!
//! Works entirely from the market-data stage's payload; it never refetches.
//! Indicator parameters mirror the original assistant's configuration
//! (SMA 20/50/200, EMA 12/26, RSI 14, MACD 12/26/9, Bollinger 20/2, ATR 14).

use async_trait::async_trait;
use research_core::payload::{
    Bollinger, Macd, MarketSnapshot, MovingAverages, Quote, Sentiment, SignalStrength,
    SupportResistance, TechnicalSnapshot, TradeSignal, TrendDirection, TrendSummary,
};
use research_core::{Error, Result, Stage, StageInputs, StageName, StageOutput, StagePayload, Symbol};
use ta::indicators::{
    AverageTrueRange, BollingerBands as BollingerIndicator, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};

/// Minimum daily bars for a meaningful indicator set
pub const MIN_BARS: usize = 50;

/// Window for recent high/low and volume averaging
const RECENT_WINDOW: usize = 20;

/// Price-vs-average band treated as sideways, in percent
const TREND_EPSILON_PCT: f64 = 0.5;

fn indicator_config_error(err: impl std::fmt::Display) -> Error {
    Error::Configuration(format!("indicator period invalid: {err}"))
}

fn run_over<I>(mut indicator: I, values: &[f64]) -> Option<I::Output>
where
    I: Next<f64>,
{
    let mut last = None;
    for &value in values {
        last = Some(indicator.next(value));
    }
    last
}

fn direction(value: f64, reference: f64) -> TrendDirection {
    if reference <= 0.0 {
        return TrendDirection::Sideways;
    }
    let deviation_pct = (value / reference - 1.0) * 100.0;
    if deviation_pct > TREND_EPSILON_PCT {
        TrendDirection::Up
    } else if deviation_pct < -TREND_EPSILON_PCT {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    }
}

/// Compute the full indicator snapshot from daily history (oldest first)
pub fn compute_snapshot(history: &[Quote]) -> Result<TechnicalSnapshot> {
    let closes: Vec<f64> = history.iter().map(|q| q.close).collect();
    let current_price = closes.last().copied().unwrap_or_default();

    let sma_20 = run_over(
        SimpleMovingAverage::new(20).map_err(indicator_config_error)?,
        &closes,
    )
    .unwrap_or_default();
    let sma_50 = run_over(
        SimpleMovingAverage::new(50).map_err(indicator_config_error)?,
        &closes,
    )
    .unwrap_or_default();
    let sma_200 = if closes.len() >= 200 {
        run_over(
            SimpleMovingAverage::new(200).map_err(indicator_config_error)?,
            &closes,
        )
    } else {
        None
    };
    let ema_12 = run_over(
        ExponentialMovingAverage::new(12).map_err(indicator_config_error)?,
        &closes,
    )
    .unwrap_or_default();
    let ema_26 = run_over(
        ExponentialMovingAverage::new(26).map_err(indicator_config_error)?,
        &closes,
    )
    .unwrap_or_default();

    let mut rsi_indicator = RelativeStrengthIndex::new(14).map_err(indicator_config_error)?;
    let mut rsi_14 = 50.0;
    for &close in &closes {
        rsi_14 = rsi_indicator.next(close);
    }
    // Contractual bound regardless of indicator numerics.
    let rsi_14 = rsi_14.clamp(0.0, 100.0);

    let mut macd_indicator =
        MovingAverageConvergenceDivergence::new(12, 26, 9).map_err(indicator_config_error)?;
    let mut macd_current = None;
    let mut macd_previous = None;
    for &close in &closes {
        macd_previous = macd_current;
        macd_current = Some(macd_indicator.next(close));
    }
    let macd = macd_current.as_ref().map_or(
        Macd {
            line: 0.0,
            signal: 0.0,
            histogram: 0.0,
        },
        |out| Macd {
            line: out.macd,
            signal: out.signal,
            histogram: out.histogram,
        },
    );

    let mut bollinger_indicator =
        BollingerIndicator::new(20, 2.0).map_err(indicator_config_error)?;
    let mut bands = None;
    for &close in &closes {
        bands = Some(bollinger_indicator.next(close));
    }
    let bollinger = bands.map_or(
        Bollinger {
            upper: current_price,
            middle: current_price,
            lower: current_price,
            position: 0.5,
        },
        |out| {
            // Keep the band ordering invariant even if the numerics wobble.
            let middle = out.average;
            let upper = out.upper.max(middle);
            let lower = out.lower.min(middle);
            let width = upper - lower;
            let position = if width > 0.0 {
                ((current_price - lower) / width).clamp(0.0, 1.0)
            } else {
                0.5
            };
            Bollinger {
                upper,
                middle,
                lower,
                position,
            }
        },
    );

    let mut atr_indicator = AverageTrueRange::new(14).map_err(indicator_config_error)?;
    let mut atr_14 = 0.0;
    for quote in history {
        let item = DataItem::builder()
            .open(quote.open)
            .high(quote.high)
            .low(quote.low)
            .close(quote.close)
            .volume(quote.volume as f64)
            .build();
        // Skip bars that violate OHLC consistency rather than failing the run.
        if let Ok(item) = item {
            atr_14 = atr_indicator.next(&item);
        }
    }

    let recent = &history[history.len().saturating_sub(RECENT_WINDOW)..];
    let recent_high = recent.iter().map(|q| q.high).fold(f64::MIN, f64::max);
    let recent_low = recent.iter().map(|q| q.low).fold(f64::MAX, f64::min);
    let volumes: Vec<f64> = recent.iter().map(|q| q.volume as f64).collect();
    let average_volume = volumes.iter().sum::<f64>() / volumes.len().max(1) as f64;
    let current_volume = history.last().map(|q| q.volume as f64).unwrap_or_default();
    let volume_ratio = if average_volume > 0.0 {
        current_volume / average_volume
    } else {
        1.0
    };

    let support_resistance = history.last().map_or(
        SupportResistance {
            pivot: current_price,
            resistance_1: current_price,
            resistance_2: current_price,
            support_1: current_price,
            support_2: current_price,
            recent_high,
            recent_low,
        },
        |last| {
            let pivot = (last.high + last.low + last.close) / 3.0;
            SupportResistance {
                pivot,
                resistance_1: 2.0 * pivot - last.low,
                resistance_2: pivot + (last.high - last.low),
                support_1: 2.0 * pivot - last.high,
                support_2: pivot - (last.high - last.low),
                recent_high,
                recent_low,
            }
        },
    );

    let trend = TrendSummary {
        short_term: direction(current_price, sma_20),
        medium_term: direction(sma_20, sma_50),
        long_term: sma_200.map(|sma| direction(current_price, sma)),
        golden_cross: sma_200.is_some_and(|sma| sma_50 > sma),
    };

    let mut signals = Vec::new();
    if rsi_14 < 30.0 {
        signals.push(TradeSignal {
            indicator: "RSI".to_string(),
            signal: "Oversold - Potential Buy".to_string(),
            strength: SignalStrength::Strong,
        });
    } else if rsi_14 > 70.0 {
        signals.push(TradeSignal {
            indicator: "RSI".to_string(),
            signal: "Overbought - Potential Sell".to_string(),
            strength: SignalStrength::Strong,
        });
    } else if rsi_14 < 40.0 {
        signals.push(TradeSignal {
            indicator: "RSI".to_string(),
            signal: "Approaching Oversold".to_string(),
            strength: SignalStrength::Moderate,
        });
    } else if rsi_14 > 60.0 {
        signals.push(TradeSignal {
            indicator: "RSI".to_string(),
            signal: "Approaching Overbought".to_string(),
            strength: SignalStrength::Moderate,
        });
    }

    if let (Some(current), Some(previous)) = (&macd_current, &macd_previous) {
        if current.macd > current.signal && previous.macd <= previous.signal {
            signals.push(TradeSignal {
                indicator: "MACD".to_string(),
                signal: "Bullish Crossover - Buy".to_string(),
                strength: SignalStrength::Strong,
            });
        } else if current.macd < current.signal && previous.macd >= previous.signal {
            signals.push(TradeSignal {
                indicator: "MACD".to_string(),
                signal: "Bearish Crossover - Sell".to_string(),
                strength: SignalStrength::Strong,
            });
        }
    }

    if current_price <= bollinger.lower {
        signals.push(TradeSignal {
            indicator: "Bollinger Bands".to_string(),
            signal: "At Lower Band - Potential Reversal".to_string(),
            strength: SignalStrength::Moderate,
        });
    } else if current_price >= bollinger.upper {
        signals.push(TradeSignal {
            indicator: "Bollinger Bands".to_string(),
            signal: "At Upper Band - Potential Pullback".to_string(),
            strength: SignalStrength::Moderate,
        });
    }

    if volume_ratio > 2.0 {
        signals.push(TradeSignal {
            indicator: "Volume".to_string(),
            signal: "Unusually High Volume - Confirm Trend".to_string(),
            strength: SignalStrength::Strong,
        });
    }

    if current_price > sma_20 && sma_20 > sma_50 {
        signals.push(TradeSignal {
            indicator: "Moving Averages".to_string(),
            signal: "Strong Uptrend".to_string(),
            strength: SignalStrength::Moderate,
        });
    } else if current_price < sma_20 && sma_20 < sma_50 {
        signals.push(TradeSignal {
            indicator: "Moving Averages".to_string(),
            signal: "Strong Downtrend".to_string(),
            strength: SignalStrength::Moderate,
        });
    }

    let bullish = signals
        .iter()
        .filter(|s| {
            s.signal.contains("Buy") || s.signal.contains("Bullish") || s.signal.contains("Uptrend")
        })
        .count();
    let bearish = signals
        .iter()
        .filter(|s| {
            s.signal.contains("Sell")
                || s.signal.contains("Bearish")
                || s.signal.contains("Downtrend")
        })
        .count();
    let overall = if bullish > bearish + 1 {
        Sentiment::Bullish
    } else if bearish > bullish + 1 {
        Sentiment::Bearish
    } else {
        Sentiment::Neutral
    };

    Ok(TechnicalSnapshot {
        current_price,
        moving_averages: MovingAverages {
            sma_20,
            sma_50,
            sma_200,
            ema_12,
            ema_26,
        },
        rsi_14,
        macd,
        bollinger,
        atr_14,
        volume_ratio,
        support_resistance,
        trend,
        signals,
        overall,
    })
}

/// The technical-indicator stage
#[derive(Debug, Default)]
pub struct TechnicalsStage {}

impl TechnicalsStage {
    pub fn new() -> Self {
        Self {}
    }
}

#[async_trait]
impl Stage for TechnicalsStage {
    fn name(&self) -> StageName {
        StageName::Technicals
    }

    async fn execute(&self, symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput> {
        let market: &MarketSnapshot = inputs
            .payload(StageName::MarketData)
            .and_then(StagePayload::as_market_data)
            .ok_or_else(|| Error::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "market data upstream unavailable".to_string(),
            })?;

        if market.history.len() < MIN_BARS {
            return Err(Error::DataUnavailable {
                symbol: symbol.to_string(),
                reason: format!(
                    "need at least {MIN_BARS} bars of history, got {}",
                    market.history.len()
                ),
            });
        }

        let snapshot = compute_snapshot(&market.history)?;
        let mut output = StageOutput::clean(StagePayload::Technicals(snapshot));
        if market.history.len() < 200 {
            output = output.with_caveat("fewer than 200 bars; long-term trend unavailable");
        }
        Ok(output)
    }
}
