//! Deterministic report assembly
//!
//! A pure function of the settled run context and the static graph: no I/O,
//! no retries, no clock reads. Feeding the same context in twice yields
//! byte-identical output.

use crate::graph::StageGraph;
use crate::run::RunContext;
use research_core::{Report, ReportSection, RunStatus, StageResult, StageStatus};
use std::collections::BTreeMap;

pub struct Aggregator;

impl Aggregator {
    /// Assemble the report for a run whose reachable stages have settled
    pub fn assemble(ctx: &RunContext, graph: &StageGraph) -> Report {
        let mandatory = graph.mandatory_stage();
        let mandatory_result = ctx.result(mandatory);
        let mandatory_ok = mandatory_result.is_some_and(StageResult::is_usable);

        let status = if mandatory_ok {
            let all_succeeded = graph
                .stages()
                .all(|s| ctx.result(s).is_some_and(|r| r.status == StageStatus::Success));
            if all_succeeded {
                RunStatus::Complete
            } else {
                RunStatus::PartiallyComplete
            }
        } else {
            RunStatus::Aborted
        };

        let abort_reason = (status == RunStatus::Aborted).then(|| {
            ctx.abort_reason().map_or_else(
                || match mandatory_result.and_then(|r| r.error.clone()) {
                    Some(reason) => format!("mandatory stage {mandatory} failed: {reason}"),
                    None => format!("mandatory stage {mandatory} never settled"),
                },
                str::to_string,
            )
        });

        let mut sections = BTreeMap::new();
        for stage in graph.stages() {
            let section = if status == RunStatus::Aborted {
                // Error summary only: siblings that happened to settle are
                // discarded along with everything never launched.
                if stage == mandatory {
                    ReportSection::Unavailable {
                        reason: mandatory_result
                            .and_then(|r| r.error.clone())
                            .unwrap_or_else(|| "never settled".to_string()),
                    }
                } else {
                    ReportSection::NotAttempted
                }
            } else {
                match ctx.result(stage) {
                    Some(result) => match (&result.payload, result.is_usable()) {
                        (Some(payload), true) => ReportSection::Ready {
                            payload: payload.clone(),
                            caveats: result.caveats.clone(),
                            source: result.source,
                        },
                        _ => ReportSection::Unavailable {
                            reason: result
                                .error
                                .clone()
                                .unwrap_or_else(|| "no payload produced".to_string()),
                        },
                    },
                    None => ReportSection::NotAttempted,
                }
            };
            sections.insert(stage, section);
        }

        Report {
            symbol: ctx.symbol.clone(),
            status,
            sections,
            started_at: ctx.started_at,
            settled_at: ctx.settled_at(),
            abort_reason,
        }
    }
}
