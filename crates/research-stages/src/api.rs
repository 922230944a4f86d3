//! Yahoo Finance API client

use chrono::{DateTime, Utc};
use research_core::payload::{CompanyProfile, Quote};
use research_core::{Error, Result, Symbol};
use time::OffsetDateTime;
use yahoo_finance_api as yahoo;

/// Yahoo Finance API client
#[derive(Debug, Clone, Default)]
pub struct YahooFinanceClient {}

impl YahooFinanceClient {
    /// Create a new Yahoo Finance client
    pub fn new() -> Self {
        Self {}
    }

    /// Yahoo's ticker form for an exchange-qualified symbol
    ///
    /// NSE tickers get the `.NS` suffix, BSE tickers `.BO`; anything else is
    /// passed through bare.
    fn yahoo_symbol(symbol: &Symbol) -> String {
        match symbol.exchange() {
            "NSE" => format!("{}.NS", symbol.ticker()),
            "BSE" => format!("{}.BO", symbol.ticker()),
            _ => symbol.ticker().to_string(),
        }
    }

    /// Get the latest daily quote for a symbol
    pub async fn latest_quote(&self, symbol: &Symbol) -> Result<Quote> {
        let provider =
            yahoo::YahooConnector::new().map_err(|e| Error::ExternalCall(e.to_string()))?;

        let ticker = Self::yahoo_symbol(symbol);
        let response = provider
            .get_latest_quotes(&ticker, "1d")
            .await
            .map_err(|e| Error::ExternalCall(format!("yahoo quote for {ticker}: {e}")))?;

        let quote = response.last_quote().map_err(|e| Error::DataUnavailable {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Quote {
            timestamp: DateTime::from_timestamp(quote.timestamp as i64, 0)
                .unwrap_or_else(Utc::now),
            open: quote.open,
            high: quote.high,
            low: quote.low,
            close: quote.close,
            volume: quote.volume,
            adjclose: quote.adjclose,
        })
    }

    /// Get daily history covering the past `days` calendar days
    pub async fn daily_history(&self, symbol: &Symbol, days: i64) -> Result<Vec<Quote>> {
        let provider =
            yahoo::YahooConnector::new().map_err(|e| Error::ExternalCall(e.to_string()))?;

        let end = Utc::now();
        let start = end - chrono::Duration::days(days);

        let start_odt = OffsetDateTime::from_unix_timestamp(start.timestamp())
            .map_err(|e| Error::ExternalCall(format!("invalid start timestamp: {e}")))?;
        let end_odt = OffsetDateTime::from_unix_timestamp(end.timestamp())
            .map_err(|e| Error::ExternalCall(format!("invalid end timestamp: {e}")))?;

        let ticker = Self::yahoo_symbol(symbol);
        let response = provider
            .get_quote_history(&ticker, start_odt, end_odt)
            .await
            .map_err(|e| Error::ExternalCall(format!("yahoo history for {ticker}: {e}")))?;

        let quotes = response.quotes().map_err(|e| Error::DataUnavailable {
            symbol: symbol.to_string(),
            reason: e.to_string(),
        })?;

        Ok(quotes
            .iter()
            .map(|q| Quote {
                timestamp: DateTime::from_timestamp(q.timestamp as i64, 0)
                    .unwrap_or_else(Utc::now),
                open: q.open,
                high: q.high,
                low: q.low,
                close: q.close,
                volume: q.volume,
                adjclose: q.adjclose,
            })
            .collect())
    }

    /// Get company information (basic implementation - the quote endpoints
    /// expose very little profile data)
    pub async fn company_profile(&self, symbol: &Symbol) -> Result<CompanyProfile> {
        Ok(CompanyProfile {
            name: None,
            exchange: Some(symbol.exchange().to_string()),
            sector: None,
            industry: None,
            market_cap: None,
            pe_ratio: None,
            dividend_yield: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yahoo_symbol_mapping() {
        let nse = Symbol::parse("TCS").unwrap();
        assert_eq!(YahooFinanceClient::yahoo_symbol(&nse), "TCS.NS");

        let bse = Symbol::parse("BSE:RELIANCE").unwrap();
        assert_eq!(YahooFinanceClient::yahoo_symbol(&bse), "RELIANCE.BO");

        let us = Symbol::parse("NASDAQ:AAPL").unwrap();
        assert_eq!(YahooFinanceClient::yahoo_symbol(&us), "AAPL");
    }
}
