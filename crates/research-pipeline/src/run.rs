//! Per-run state
//!
//! A `RunContext` is owned by exactly one executor invocation. Nothing here
//! is shared across concurrent runs; the cache is the only cross-run state.

use chrono::{DateTime, Utc};
use research_core::{StageName, StageResult, Symbol};
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;
use tracing::debug;

/// Cooperative cancellation signal for one run
///
/// Stages observe the flag at their own suspension points; signalling never
/// force-kills an already-dispatched external call.
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: watch::Sender<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Signal cancellation; idempotent
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// A receiver for await-style observation of the flag
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one report request, filled progressively by the executor
#[derive(Debug)]
pub struct RunContext {
    pub symbol: Symbol,
    pub started_at: DateTime<Utc>,
    settled_at: DateTime<Utc>,
    results: HashMap<StageName, StageResult>,
    started: HashSet<StageName>,
    cancel: CancelToken,
    abort_reason: Option<String>,
}

impl RunContext {
    pub fn new(symbol: Symbol) -> Self {
        let now = Utc::now();
        Self {
            symbol,
            started_at: now,
            settled_at: now,
            results: HashMap::new(),
            started: HashSet::new(),
            cancel: CancelToken::new(),
            abort_reason: None,
        }
    }

    /// Record a settled stage result
    pub fn record(&mut self, result: StageResult) {
        debug!(
            symbol = %self.symbol,
            stage = %result.stage,
            status = ?result.status,
            source = ?result.source,
            "stage settled"
        );
        self.results.insert(result.stage, result);
    }

    /// Note that a stage was launched (used to tell timed-out stages apart
    /// from never-started ones)
    pub fn mark_started(&mut self, stage: StageName) {
        self.started.insert(stage);
    }

    pub fn was_started(&self, stage: StageName) -> bool {
        self.started.contains(&stage)
    }

    pub fn result(&self, stage: StageName) -> Option<&StageResult> {
        self.results.get(&stage)
    }

    pub fn results(&self) -> &HashMap<StageName, StageResult> {
        &self.results
    }

    pub fn is_settled(&self, stage: StageName) -> bool {
        self.results.contains_key(&stage)
    }

    /// Names of every settled stage
    pub fn settled_names(&self) -> HashSet<StageName> {
        self.results.keys().copied().collect()
    }

    /// Abort the run: remember the reason and signal cancellation
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.into());
        }
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stamp the moment every reachable stage settled (or the run gave up)
    pub fn mark_settled(&mut self) {
        self.settled_at = Utc::now();
    }

    pub fn settled_at(&self) -> DateTime<Utc> {
        self.settled_at
    }
}
