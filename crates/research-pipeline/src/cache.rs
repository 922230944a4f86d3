//! Process-wide stage result cache
//!
//! The only state shared across concurrent runs. Entries are scoped by
//! (symbol, stage) and expire per the stage's freshness window. Failed
//! results are never stored, so the next request retries them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use research_core::{StageName, StageResult, Symbol};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: Symbol,
    stage: StageName,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: StageResult,
    expires_at: DateTime<Utc>,
}

/// Concurrent, sharded result cache
///
/// Reads and writes for different keys do not block each other; same-key
/// writes replace the entry atomically (last writer wins), never mutating
/// it in place.
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    capacity: usize,
}

impl ResultCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
        }
    }

    /// The cached result for (symbol, stage), marked `Cached`, if unexpired
    ///
    /// Expired entries are evicted on the way out.
    pub fn get(&self, symbol: &Symbol, stage: StageName, now: DateTime<Utc>) -> Option<StageResult> {
        let key = CacheKey {
            symbol: symbol.clone(),
            stage,
        };
        if let Some(entry) = self.entries.get(&key) {
            if now < entry.expires_at {
                return Some(entry.result.as_cached());
            }
        }
        // Either missing or stale; drop a stale entry eagerly.
        self.entries.remove_if(&key, |_, entry| now >= entry.expires_at);
        None
    }

    /// Store a non-Failed result with expiry `now + freshness`
    ///
    /// Storing a Failed result is a no-op.
    pub fn put(
        &self,
        symbol: &Symbol,
        stage: StageName,
        result: &StageResult,
        freshness: Duration,
        now: DateTime<Utc>,
    ) {
        if !result.is_usable() {
            return;
        }
        let Ok(freshness) = chrono::Duration::from_std(freshness) else {
            return;
        };
        let key = CacheKey {
            symbol: symbol.clone(),
            stage,
        };
        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                expires_at: now + freshness,
            },
        );
        self.enforce_capacity(now);
    }

    /// Evict every entry for the symbol; returns how many were dropped
    pub fn invalidate_symbol(&self, symbol: &Symbol) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.symbol != *symbol);
        let dropped = before.saturating_sub(self.entries.len());
        if dropped > 0 {
            debug!(%symbol, dropped, "invalidated cached stages");
        }
        dropped
    }

    /// Evict one (symbol, stage) entry; returns whether one existed
    pub fn invalidate_stage(&self, symbol: &Symbol, stage: StageName) -> bool {
        self.entries
            .remove(&CacheKey {
                symbol: symbol.clone(),
                stage,
            })
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Soft capacity bound: purge expired entries first, then the entries
    /// closest to expiry.
    fn enforce_capacity(&self, now: DateTime<Utc>) {
        if self.entries.len() <= self.capacity {
            return;
        }
        self.entries.retain(|_, entry| now < entry.expires_at);

        while self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::StagePayload;
    use research_core::payload::ReportDocument;

    fn symbol(ticker: &str) -> Symbol {
        Symbol::parse(ticker).unwrap()
    }

    fn success(stage: StageName) -> StageResult {
        StageResult::success(
            stage,
            StagePayload::Report(ReportDocument {
                markdown: "# x".to_string(),
            }),
        )
    }

    #[test]
    fn test_put_then_get_within_window() {
        let cache = ResultCache::new(10);
        let now = Utc::now();
        let tcs = symbol("TCS");

        cache.put(
            &tcs,
            StageName::Report,
            &success(StageName::Report),
            Duration::from_secs(60),
            now,
        );

        let hit = cache.get(&tcs, StageName::Report, now).unwrap();
        assert_eq!(hit.source, research_core::DataSource::Cached);
        assert!(hit.is_usable());
    }

    #[test]
    fn test_expired_entry_misses_and_evicts() {
        let cache = ResultCache::new(10);
        let now = Utc::now();
        let tcs = symbol("TCS");

        cache.put(
            &tcs,
            StageName::Report,
            &success(StageName::Report),
            Duration::from_secs(60),
            now,
        );

        let later = now + chrono::Duration::seconds(61);
        assert!(cache.get(&tcs, StageName::Report, later).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_results_are_never_stored() {
        let cache = ResultCache::new(10);
        let now = Utc::now();
        let tcs = symbol("TCS");
        let failed = StageResult::failed(StageName::News, "unreachable");

        cache.put(&tcs, StageName::News, &failed, Duration::from_secs(60), now);

        assert!(cache.get(&tcs, StageName::News, now).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_same_key_put_is_last_writer_wins() {
        let cache = ResultCache::new(10);
        let now = Utc::now();
        let tcs = symbol("TCS");

        let first = StageResult::success(
            StageName::Report,
            StagePayload::Report(ReportDocument {
                markdown: "first".to_string(),
            }),
        );
        let second = StageResult::success(
            StageName::Report,
            StagePayload::Report(ReportDocument {
                markdown: "second".to_string(),
            }),
        );

        cache.put(&tcs, StageName::Report, &first, Duration::from_secs(60), now);
        cache.put(&tcs, StageName::Report, &second, Duration::from_secs(60), now);

        let hit = cache.get(&tcs, StageName::Report, now).unwrap();
        let markdown = hit
            .payload
            .as_ref()
            .and_then(StagePayload::as_report)
            .map(|d| d.markdown.clone())
            .unwrap();
        assert_eq!(markdown, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_scopes() {
        let cache = ResultCache::new(10);
        let now = Utc::now();
        let tcs = symbol("TCS");
        let infy = symbol("INFY");

        for stage in [StageName::MarketData, StageName::News] {
            cache.put(&tcs, stage, &success(stage), Duration::from_secs(60), now);
            cache.put(&infy, stage, &success(stage), Duration::from_secs(60), now);
        }

        assert!(cache.invalidate_stage(&tcs, StageName::News));
        assert!(!cache.invalidate_stage(&tcs, StageName::News));
        assert_eq!(cache.len(), 3);

        assert_eq!(cache.invalidate_symbol(&tcs), 1);
        assert!(cache.get(&tcs, StageName::MarketData, now).is_none());
        assert!(cache.get(&infy, StageName::MarketData, now).is_some());
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry_first() {
        let cache = ResultCache::new(2);
        let now = Utc::now();

        cache.put(
            &symbol("AAA"),
            StageName::Report,
            &success(StageName::Report),
            Duration::from_secs(10),
            now,
        );
        cache.put(
            &symbol("BBB"),
            StageName::Report,
            &success(StageName::Report),
            Duration::from_secs(1000),
            now,
        );
        cache.put(
            &symbol("CCC"),
            StageName::Report,
            &success(StageName::Report),
            Duration::from_secs(1000),
            now,
        );

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&symbol("AAA"), StageName::Report, now).is_none());
        assert!(cache.get(&symbol("BBB"), StageName::Report, now).is_some());
        assert!(cache.get(&symbol("CCC"), StageName::Report, now).is_some());
    }
}
