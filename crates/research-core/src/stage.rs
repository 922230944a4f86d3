//! The stage contract
//!
//! A stage is one analytical unit of work with declared dependencies. The
//! set of stages is closed and enumerated; the executor drives every stage
//! through the same narrow interface.

use crate::error::Result;
use crate::payload::StagePayload;
use crate::result::StageResult;
use crate::symbol::Symbol;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The closed set of analytical stages
///
/// Declaration order doubles as report section order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageName {
    /// Price, volume, and company profile retrieval (mandatory root)
    MarketData,
    /// News aggregation with sentiment
    News,
    /// Fundamental-ratio evaluation
    Fundamentals,
    /// Technical-indicator computation
    Technicals,
    /// Strategy synthesis
    Strategy,
    /// Final report composition
    Report,
}

impl StageName {
    /// Every stage, in declaration order
    pub const ALL: [StageName; 6] = [
        StageName::MarketData,
        StageName::News,
        StageName::Fundamentals,
        StageName::Technicals,
        StageName::Strategy,
        StageName::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::MarketData => "market-data",
            StageName::News => "news",
            StageName::Fundamentals => "fundamentals",
            StageName::Technicals => "technicals",
            StageName::Strategy => "strategy",
            StageName::Report => "report",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settled dependency results handed to a stage at launch
///
/// A failed dependency is still present in the map so a stage can see the
/// explicit upstream-unavailable marker and choose to run degraded.
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    results: HashMap<StageName, StageResult>,
}

impl StageInputs {
    pub fn new(results: HashMap<StageName, StageResult>) -> Self {
        Self { results }
    }

    /// The settled result for a dependency, failed or not
    pub fn result(&self, stage: StageName) -> Option<&StageResult> {
        self.results.get(&stage)
    }

    /// The dependency's payload, only when it settled usable
    pub fn payload(&self, stage: StageName) -> Option<&StagePayload> {
        self.results
            .get(&stage)
            .filter(|r| r.is_usable())
            .and_then(|r| r.payload.as_ref())
    }

    /// Whether the dependency settled with a usable payload
    pub fn is_available(&self, stage: StageName) -> bool {
        self.payload(stage).is_some()
    }

    /// Dependencies that settled without a usable payload, in stage order
    pub fn missing(&self) -> Vec<StageName> {
        let mut gone: Vec<StageName> = self
            .results
            .iter()
            .filter(|(_, r)| !r.is_usable())
            .map(|(name, _)| *name)
            .collect();
        gone.sort_unstable();
        gone
    }
}

/// What a stage hands back on completion
///
/// Caveats mark partial or lower-confidence output; a non-empty caveat list
/// settles the stage as Degraded rather than Success.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub payload: StagePayload,
    pub caveats: Vec<String>,
}

impl StageOutput {
    /// A full-confidence output with no caveats
    pub fn clean(payload: StagePayload) -> Self {
        Self {
            payload,
            caveats: Vec::new(),
        }
    }

    pub fn with_caveat(mut self, caveat: impl Into<String>) -> Self {
        self.caveats.push(caveat.into());
        self
    }
}

/// Contract implemented by every analytical stage collaborator
///
/// Implementations are expected to be idempotent and side-effect-free beyond
/// cache writes, so the executor may retry them freely.
#[async_trait]
pub trait Stage: Send + Sync {
    /// The stage's identity in the graph
    fn name(&self) -> StageName;

    /// Run the stage for one symbol with its settled dependencies
    async fn execute(&self, symbol: &Symbol, inputs: &StageInputs) -> Result<StageOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ReportDocument;

    #[test]
    fn test_stage_name_order_matches_all() {
        let mut sorted = StageName::ALL;
        sorted.sort_unstable();
        assert_eq!(sorted, StageName::ALL);
    }

    #[test]
    fn test_stage_name_serde_kebab() {
        let json = serde_json::to_string(&StageName::MarketData).unwrap();
        assert_eq!(json, "\"market-data\"");
    }

    #[test]
    fn test_inputs_expose_upstream_unavailable() {
        let mut results = HashMap::new();
        results.insert(
            StageName::News,
            StageResult::failed(StageName::News, "site unreachable"),
        );
        results.insert(
            StageName::Report,
            StageResult::success(
                StageName::Report,
                StagePayload::Report(ReportDocument {
                    markdown: "# ok".to_string(),
                }),
            ),
        );
        let inputs = StageInputs::new(results);

        assert!(!inputs.is_available(StageName::News));
        assert!(inputs.result(StageName::News).is_some());
        assert!(inputs.is_available(StageName::Report));
        assert_eq!(inputs.missing(), vec![StageName::News]);
    }

    #[test]
    fn test_output_caveats_accumulate() {
        let output = StageOutput::clean(StagePayload::Report(ReportDocument {
            markdown: String::new(),
        }))
        .with_caveat("one source down");
        assert_eq!(output.caveats.len(), 1);
    }
}
