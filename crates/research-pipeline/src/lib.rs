//! Pipeline orchestration core for equity-research-rs
//!
//! This crate owns the scheduling problem: a validated stage dependency
//! graph, an executor that launches ready stages concurrently on a bounded
//! pool, a retry policy with circuit breaking around every collaborator
//! call, a process-wide result cache, and a deterministic aggregator that
//! folds whatever settled into one report.
//!
//! # Example
//!
//! ```no_run
//! use research_pipeline::{Executor, PipelineConfig};
//! use research_core::Symbol;
//!
//! # async fn example(stages: Vec<std::sync::Arc<dyn research_core::Stage>>) -> research_core::Result<()> {
//! let executor = Executor::builder()
//!     .config(PipelineConfig::default())
//!     .stages(stages)
//!     .build()?;
//!
//! let report = executor
//!     .run(Symbol::parse("TCS")?, false, None)
//!     .await;
//! println!("{:?}", report.status);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod executor;
pub mod graph;
pub mod retry;
pub mod run;

pub use aggregator::Aggregator;
pub use cache::ResultCache;
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use executor::{Executor, ExecutorBuilder};
pub use graph::{AnalysisProfile, StageDefinition, StageGraph};
pub use retry::RetryPolicy;
pub use run::{CancelToken, RunContext};
