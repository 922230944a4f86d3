//! Dependency-driven stage executor
//!
//! Drives one report request to completion: computes the ready set from the
//! graph, launches ready stages concurrently on a bounded pool, consults the
//! cache before every collaborator call, wraps collaborator calls in the
//! retry policy, and folds every failure into a stage result. The only
//! fatal condition is the mandatory stage failing.

use crate::aggregator::Aggregator;
use crate::cache::ResultCache;
use crate::config::PipelineConfig;
use crate::graph::StageGraph;
use crate::retry::RetryPolicy;
use crate::run::RunContext;
use chrono::Utc;
use research_core::{Error, Report, Result, Stage, StageInputs, StageName, StageResult, Symbol};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Executes research runs against one stage graph
pub struct Executor {
    graph: StageGraph,
    stages: HashMap<StageName, Arc<dyn Stage>>,
    cache: Arc<ResultCache>,
    retry: Arc<RetryPolicy>,
    limiter: Arc<Semaphore>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Create a new executor builder
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// The process-wide cache backing this executor
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Produce a report for one symbol
    ///
    /// Never returns an error: every stage failure, timeout, and abort is
    /// folded into the returned `Report`'s status and sections. The timeout
    /// applies to the whole run and defaults from the configuration.
    pub async fn run(
        &self,
        symbol: Symbol,
        force_refresh: bool,
        timeout: Option<Duration>,
    ) -> Report {
        let mut ctx = RunContext::new(symbol);
        info!(symbol = %ctx.symbol, force_refresh, "starting research run");

        if force_refresh {
            self.cache.invalidate_symbol(&ctx.symbol);
        }

        let deadline = timeout.unwrap_or(self.config.run_timeout);
        if tokio::time::timeout(deadline, self.drive(&mut ctx))
            .await
            .is_err()
        {
            warn!(symbol = %ctx.symbol, ?deadline, "run deadline exceeded");
            ctx.cancel_token().cancel();
            let unfinished: Vec<StageName> = self
                .graph
                .stages()
                .filter(|s| ctx.was_started(*s) && !ctx.is_settled(*s))
                .collect();
            for stage in unfinished {
                ctx.record(StageResult::failed(
                    stage,
                    format!("run timed out after {deadline:?}"),
                ));
            }
        }

        ctx.mark_settled();
        let report = Aggregator::assemble(&ctx, &self.graph);
        info!(symbol = %ctx.symbol, status = ?report.status, "run settled");
        report
    }

    /// The scheduling loop: launch ready stages, await settlements, abort
    /// on mandatory failure. Runs until every reachable stage settled.
    async fn drive(&self, ctx: &mut RunContext) {
        let mut in_flight = std::collections::HashSet::new();
        let mut task_names: HashMap<tokio::task::Id, StageName> = HashMap::new();
        let mut tasks: JoinSet<(StageName, StageResult)> = JoinSet::new();

        loop {
            if !ctx.is_aborted() {
                let settled = ctx.settled_names();
                for name in self.graph.ready_set(&settled, &in_flight) {
                    let Some(stage) = self.stages.get(&name).cloned() else {
                        // build() guarantees coverage; keep the run moving anyway
                        ctx.record(StageResult::failed(name, "no implementation registered"));
                        continue;
                    };
                    let freshness = self
                        .graph
                        .definition(name)
                        .map(|d| d.freshness)
                        .unwrap_or_default();
                    let dependencies: HashMap<StageName, StageResult> = self
                        .graph
                        .definition(name)
                        .map(|d| {
                            d.depends_on
                                .iter()
                                .filter_map(|dep| ctx.result(*dep).cloned().map(|r| (*dep, r)))
                                .collect()
                        })
                        .unwrap_or_default();

                    let inputs = StageInputs::new(dependencies);
                    let symbol = ctx.symbol.clone();
                    let cancel = ctx.cancel_token().clone();
                    let cache = Arc::clone(&self.cache);
                    let retry = Arc::clone(&self.retry);
                    let limiter = Arc::clone(&self.limiter);

                    ctx.mark_started(name);
                    in_flight.insert(name);
                    let handle = tasks.spawn(async move {
                        let _permit = match limiter.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                return (name, StageResult::failed(name, "worker pool closed"));
                            }
                        };
                        if cancel.is_cancelled() {
                            return (name, StageResult::failed(name, "run cancelled"));
                        }
                        if let Some(hit) = cache.get(&symbol, name, Utc::now()) {
                            debug!(stage = %name, symbol = %symbol, "cache hit");
                            return (name, hit);
                        }
                        let outcome = retry
                            .call(name.as_str(), || stage.execute(&symbol, &inputs))
                            .await;
                        let result = match outcome {
                            Ok(output) => StageResult::from_output(name, output),
                            Err(err) => StageResult::failed(name, err.to_string()),
                        };
                        cache.put(&symbol, name, &result, freshness, Utc::now());
                        (name, result)
                    });
                    task_names.insert(handle.id(), name);
                }
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };
            let (name, result) = match joined {
                Ok((id, output)) => {
                    task_names.remove(&id);
                    output
                }
                Err(join_error) => {
                    let Some(name) = task_names.remove(&join_error.id()) else {
                        error!(%join_error, "settled task has no stage attribution");
                        continue;
                    };
                    (
                        name,
                        StageResult::failed(name, format!("stage task failed: {join_error}")),
                    )
                }
            };

            in_flight.remove(&name);
            if ctx.is_aborted() {
                debug!(stage = %name, "discarding result settled after abort");
                continue;
            }

            let mandatory_failed = !result.is_usable() && self.graph.is_mandatory(name);
            let reason = result.error.clone();
            ctx.record(result);
            if mandatory_failed {
                let reason = reason.unwrap_or_else(|| "unknown".to_string());
                warn!(symbol = %ctx.symbol, stage = %name, %reason, "aborting run");
                ctx.abort(format!("mandatory stage {name} failed: {reason}"));
            }
        }

        // A validated DAG cannot stall here; record anything left instead
        // of spinning or panicking.
        if !ctx.is_aborted() {
            let unsettled: Vec<StageName> = self
                .graph
                .stages()
                .filter(|s| !ctx.is_settled(*s))
                .collect();
            if !unsettled.is_empty() {
                error!(?unsettled, "scheduler deadlock, failing remaining stages");
                for stage in unsettled {
                    ctx.record(StageResult::failed(
                        stage,
                        "scheduler deadlock: dependencies can never settle",
                    ));
                }
            }
        }
    }
}

/// Builder for Executor
pub struct ExecutorBuilder {
    graph: Option<StageGraph>,
    stages: HashMap<StageName, Arc<dyn Stage>>,
    cache: Option<Arc<ResultCache>>,
    config: PipelineConfig,
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            graph: None,
            stages: HashMap::new(),
            cache: None,
            config: PipelineConfig::default(),
        }
    }

    /// Set the stage graph (defaults to the standard research graph)
    pub fn graph(mut self, graph: StageGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Register a stage implementation, keyed by its own name
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.name(), stage);
        self
    }

    /// Register several stage implementations at once
    pub fn stages(mut self, stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
        for stage in stages {
            self.stages.insert(stage.name(), stage);
        }
        self
    }

    /// Share an existing cache (defaults to a fresh one sized from config)
    pub fn cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the executor
    ///
    /// Fails with `Error::Configuration` when the config is invalid or a
    /// graph stage has no registered implementation.
    pub fn build(self) -> Result<Executor> {
        self.config.validate()?;

        let graph = match self.graph {
            Some(graph) => graph,
            None => StageGraph::research(&self.config)?,
        };

        for stage in graph.stages() {
            if !self.stages.contains_key(&stage) {
                return Err(Error::Configuration(format!(
                    "stage {stage} has no registered implementation"
                )));
            }
        }

        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ResultCache::new(self.config.cache_capacity)));

        Ok(Executor {
            retry: Arc::new(RetryPolicy::new(&self.config)),
            limiter: Arc::new(Semaphore::new(self.config.max_concurrent_stages)),
            graph,
            stages: self.stages,
            cache,
            config: self.config,
        })
    }
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use research_core::payload::ReportDocument;
    use research_core::{DataSource, ReportSection, RunStatus, StageOutput, StagePayload};
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Behavior {
        Succeed,
        FailAlways,
        FailFirst(u32),
        NoteMissingUpstreams,
        Hang,
    }

    struct TestStage {
        name: StageName,
        behavior: Behavior,
        calls: AtomicU32,
    }

    impl TestStage {
        fn new(name: StageName, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                behavior,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn payload(&self) -> StagePayload {
            StagePayload::Report(ReportDocument {
                markdown: format!("{} payload", self.name),
            })
        }
    }

    #[async_trait]
    impl Stage for TestStage {
        fn name(&self) -> StageName {
            self.name
        }

        async fn execute(&self, _symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => Ok(StageOutput::clean(self.payload())),
                Behavior::FailAlways => Err(Error::ExternalCall("provider down".to_string())),
                Behavior::FailFirst(k) if n < *k => {
                    Err(Error::ExternalCall("transient".to_string()))
                }
                Behavior::FailFirst(_) => Ok(StageOutput::clean(self.payload())),
                Behavior::NoteMissingUpstreams => {
                    let mut output = StageOutput::clean(self.payload());
                    for gone in inputs.missing() {
                        output = output.with_caveat(format!("{gone} unavailable"));
                    }
                    Ok(output)
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(StageOutput::clean(self.payload()))
                }
            }
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig::builder()
            .max_attempts(2)
            .retry_base_delay(Duration::from_millis(10))
            .attempt_timeout(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    struct Fleet {
        market: Arc<TestStage>,
        news: Arc<TestStage>,
        fundamentals: Arc<TestStage>,
        technicals: Arc<TestStage>,
        strategy: Arc<TestStage>,
        report: Arc<TestStage>,
    }

    impl Fleet {
        fn new(market: Behavior, news: Behavior) -> Self {
            Self {
                market: TestStage::new(StageName::MarketData, market),
                news: TestStage::new(StageName::News, news),
                fundamentals: TestStage::new(StageName::Fundamentals, Behavior::Succeed),
                technicals: TestStage::new(StageName::Technicals, Behavior::Succeed),
                strategy: TestStage::new(StageName::Strategy, Behavior::NoteMissingUpstreams),
                report: TestStage::new(StageName::Report, Behavior::NoteMissingUpstreams),
            }
        }

        fn executor(&self, config: PipelineConfig) -> Executor {
            Executor::builder()
                .config(config)
                .stages([
                    Arc::clone(&self.market) as Arc<dyn Stage>,
                    Arc::clone(&self.news) as Arc<dyn Stage>,
                    Arc::clone(&self.fundamentals) as Arc<dyn Stage>,
                    Arc::clone(&self.technicals) as Arc<dyn Stage>,
                    Arc::clone(&self.strategy) as Arc<dyn Stage>,
                    Arc::clone(&self.report) as Arc<dyn Stage>,
                ])
                .build()
                .unwrap()
        }
    }

    fn symbol() -> Symbol {
        Symbol::parse("TCS").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_stages_succeed_is_complete() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        let report = executor.run(symbol(), false, None).await;

        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(report.ready_count(), 6);
        for stage in StageName::ALL {
            assert!(report.section(stage).unwrap().is_ready(), "{stage} not ready");
        }
        assert_eq!(fleet.market.calls(), 1);
        assert_eq!(fleet.report.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let fleet = Fleet::new(Behavior::FailFirst(1), Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        let report = executor.run(symbol(), false, None).await;

        assert_eq!(report.status, RunStatus::Complete);
        assert_eq!(fleet.market.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mandatory_failure_aborts_and_skips_dependents() {
        let fleet = Fleet::new(Behavior::FailAlways, Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        let report = executor.run(symbol(), false, None).await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.abort_reason.as_deref().unwrap().contains("market-data"));
        // Retries exhausted on the mandatory root
        assert_eq!(fleet.market.calls(), 2);
        // Dependents never launched
        assert_eq!(fleet.fundamentals.calls(), 0);
        assert_eq!(fleet.technicals.calls(), 0);
        assert_eq!(fleet.strategy.calls(), 0);
        assert_eq!(fleet.report.calls(), 0);
        // Every other section reads not-attempted
        for stage in StageName::ALL.into_iter().filter(|s| *s != StageName::MarketData) {
            assert!(matches!(
                report.section(stage),
                Some(ReportSection::NotAttempted)
            ));
        }
        assert!(matches!(
            report.section(StageName::MarketData),
            Some(ReportSection::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_news_failure_degrades_instead_of_aborting() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::FailAlways);
        let executor = fleet.executor(fast_config());

        let report = executor.run(symbol(), false, None).await;

        assert_eq!(report.status, RunStatus::PartiallyComplete);
        assert!(matches!(
            report.section(StageName::News),
            Some(ReportSection::Unavailable { .. })
        ));
        // Strategy still ran, noting the gap
        assert_eq!(fleet.strategy.calls(), 1);
        match report.section(StageName::Strategy) {
            Some(ReportSection::Ready { caveats, .. }) => {
                assert!(caveats.iter().any(|c| c.contains("news")));
            }
            other => panic!("unexpected strategy section: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_served_from_cache() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        let first = executor.run(symbol(), false, None).await;
        let second = executor.run(symbol(), false, None).await;

        assert_eq!(fleet.market.calls(), 1);
        match (
            first.section(StageName::MarketData),
            second.section(StageName::MarketData),
        ) {
            (
                Some(ReportSection::Ready {
                    payload: fresh,
                    source: DataSource::Fresh,
                    ..
                }),
                Some(ReportSection::Ready {
                    payload: cached,
                    source: DataSource::Cached,
                    ..
                }),
            ) => {
                let fresh = serde_json::to_string(fresh).unwrap();
                let cached = serde_json::to_string(cached).unwrap();
                assert_eq!(fresh, cached);
            }
            other => panic!("unexpected sections: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_bypasses_fresh_cache() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        executor.run(symbol(), false, None).await;
        let second = executor.run(symbol(), true, None).await;

        assert_eq!(fleet.market.calls(), 2);
        assert!(matches!(
            second.section(StageName::MarketData),
            Some(ReportSection::Ready {
                source: DataSource::Fresh,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stage_is_not_cached() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::FailFirst(2));
        let executor = fleet.executor(fast_config());

        let first = executor.run(symbol(), false, None).await;
        assert_eq!(first.status, RunStatus::PartiallyComplete);
        let news_attempts = fleet.news.calls();
        assert_eq!(news_attempts, 2);

        // The failure was not cached, so the next run retries and succeeds.
        let second = executor.run(symbol(), false, None).await;
        assert!(fleet.news.calls() > news_attempts);
        assert!(second.section(StageName::News).unwrap().is_ready());
        // Strategy settled degraded in the first run and that IS cached, so
        // its gap caveat persists until the window expires or a refresh.
        assert_eq!(second.status, RunStatus::PartiallyComplete);

        let third = executor.run(symbol(), true, None).await;
        assert_eq!(third.status, RunStatus::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_reflects_what_settled() {
        let fleet = Fleet::new(Behavior::Succeed, Behavior::Hang);
        let executor = fleet.executor(fast_config());

        let report = executor
            .run(symbol(), false, Some(Duration::from_secs(5)))
            .await;

        assert_eq!(report.status, RunStatus::PartiallyComplete);
        match report.section(StageName::News) {
            Some(ReportSection::Unavailable { reason }) => {
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected news section: {other:?}"),
        }
        // Strategy waits on news, so it never started
        assert!(matches!(
            report.section(StageName::Strategy),
            Some(ReportSection::NotAttempted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mandatory_timeout_aborts() {
        let fleet = Fleet::new(Behavior::Hang, Behavior::Succeed);
        let executor = fleet.executor(fast_config());

        let report = executor
            .run(symbol(), false, Some(Duration::from_secs(5)))
            .await;

        assert_eq!(report.status, RunStatus::Aborted);
        assert!(
            report
                .abort_reason
                .as_deref()
                .unwrap()
                .contains("timed out")
        );
    }

    #[tokio::test]
    async fn test_builder_rejects_missing_stage_impl() {
        let error = Executor::builder()
            .stage(TestStage::new(StageName::MarketData, Behavior::Succeed) as Arc<dyn Stage>)
            .build()
            .unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }
}
