//! Exchange-qualified security identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized security identifier, e.g. `NSE:TCS`
///
/// A symbol is immutable once a run starts; every stage within one run sees
/// exactly the same symbol. Parsing accepts `EXCHANGE:TICKER` or a bare
/// ticker, which defaults to the NSE.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Symbol {
    exchange: String,
    ticker: String,
}

/// Exchange assumed for unqualified tickers
pub const DEFAULT_EXCHANGE: &str = "NSE";

impl Symbol {
    /// Parse and normalize a symbol string
    ///
    /// Input is trimmed and upper-cased. Tickers must start with an
    /// alphanumeric character and may contain `.`, `&`, and `-` afterwards
    /// (covers NSE names like `M&M` and `BAJAJ-AUTO`).
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidSymbol("empty symbol".to_string()));
        }

        let (exchange, ticker) = match trimmed.split_once(':') {
            Some((ex, t)) => (ex.trim(), t.trim()),
            None => (DEFAULT_EXCHANGE, trimmed),
        };

        let exchange = exchange.to_uppercase();
        let ticker = ticker.to_uppercase();

        if exchange.is_empty() || !exchange.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::InvalidSymbol(format!(
                "bad exchange in {trimmed:?}"
            )));
        }

        let mut chars = ticker.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric());
        let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '&' | '-'));
        if !head_ok || !tail_ok {
            return Err(Error::InvalidSymbol(format!("bad ticker in {trimmed:?}")));
        }

        Ok(Self { exchange, ticker })
    }

    /// The exchange qualifier, e.g. `NSE`
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The bare ticker, e.g. `TCS`
    pub fn ticker(&self) -> &str {
        &self.ticker
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.ticker)
    }
}

impl FromStr for Symbol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.to_string()
    }
}

impl TryFrom<String> for Symbol {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_ticker_defaults_exchange() {
        let symbol = Symbol::parse("tcs").unwrap();
        assert_eq!(symbol.exchange(), "NSE");
        assert_eq!(symbol.ticker(), "TCS");
        assert_eq!(symbol.to_string(), "NSE:TCS");
    }

    #[test]
    fn test_parse_qualified() {
        let symbol = Symbol::parse("bse:reliance").unwrap();
        assert_eq!(symbol.exchange(), "BSE");
        assert_eq!(symbol.ticker(), "RELIANCE");
    }

    #[test]
    fn test_parse_special_tickers() {
        assert!(Symbol::parse("M&M").is_ok());
        assert!(Symbol::parse("BAJAJ-AUTO").is_ok());
        assert!(Symbol::parse("NSE:M&M").is_ok());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("  ").is_err());
        assert!(Symbol::parse(":TCS").is_err());
        assert!(Symbol::parse("N$E:TCS").is_err());
        assert!(Symbol::parse("NSE:&TCS").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let symbol = Symbol::parse("NSE:INFY").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"NSE:INFY\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, symbol);
    }
}
