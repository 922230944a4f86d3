//! Core abstractions for equity-research-rs
//!
//! This crate defines the vocabulary shared by the pipeline and the stage
//! implementations: security symbols, the stage contract, per-stage results
//! and payloads, the final report shape, and the error taxonomy.

pub mod error;
pub mod payload;
pub mod report;
pub mod result;
pub mod stage;
pub mod symbol;

pub use error::{Error, Result};
pub use payload::StagePayload;
pub use report::{Report, ReportSection, RunStatus};
pub use result::{DataSource, StageResult, StageStatus};
pub use stage::{Stage, StageInputs, StageName, StageOutput};
pub use symbol::Symbol;
