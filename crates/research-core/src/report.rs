//! The assembled research report

use crate::payload::StagePayload;
use crate::result::DataSource;
use crate::stage::StageName;
use crate::symbol::Symbol;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run-level outcome flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every stage succeeded
    Complete,
    /// The mandatory stage produced data but at least one other did not
    PartiallyComplete,
    /// The mandatory stage failed; the report carries only an error summary
    Aborted,
}

/// One stage's slot in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ReportSection {
    /// The stage settled usable; caveats are non-empty for degraded output
    Ready {
        payload: StagePayload,
        caveats: Vec<String>,
        source: DataSource,
    },
    /// The stage settled failed
    Unavailable { reason: String },
    /// The stage never started (aborted or timed-out run)
    NotAttempted,
}

impl ReportSection {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReportSection::Ready { .. })
    }
}

/// The aggregator's output: one section per reachable stage plus run status
///
/// Sections are keyed by stage in declaration order, so serializing the same
/// report twice yields byte-identical output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub symbol: Symbol,
    pub status: RunStatus,
    pub sections: BTreeMap<StageName, ReportSection>,
    pub started_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
    pub abort_reason: Option<String>,
}

impl Report {
    pub fn section(&self, stage: StageName) -> Option<&ReportSection> {
        self.sections.get(&stage)
    }

    /// The composed markdown document, when the report stage settled usable
    pub fn document(&self) -> Option<&str> {
        match self.sections.get(&StageName::Report)? {
            ReportSection::Ready { payload, .. } => {
                payload.as_report().map(|d| d.markdown.as_str())
            }
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.status == RunStatus::Aborted
    }

    /// Count of sections that settled usable
    pub fn ready_count(&self) -> usize {
        self.sections.values().filter(|s| s.is_ready()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::ReportDocument;

    fn report_with(section: ReportSection) -> Report {
        let mut sections = BTreeMap::new();
        sections.insert(StageName::Report, section);
        Report {
            symbol: Symbol::parse("TCS").unwrap(),
            status: RunStatus::PartiallyComplete,
            sections,
            started_at: Utc::now(),
            settled_at: Utc::now(),
            abort_reason: None,
        }
    }

    #[test]
    fn test_document_from_ready_section() {
        let report = report_with(ReportSection::Ready {
            payload: StagePayload::Report(ReportDocument {
                markdown: "# TCS".to_string(),
            }),
            caveats: Vec::new(),
            source: DataSource::Fresh,
        });
        assert_eq!(report.document(), Some("# TCS"));
        assert_eq!(report.ready_count(), 1);
    }

    #[test]
    fn test_document_absent_when_unavailable() {
        let report = report_with(ReportSection::Unavailable {
            reason: "upstream failure".to_string(),
        });
        assert!(report.document().is_none());
        assert_eq!(report.ready_count(), 0);
    }
}
