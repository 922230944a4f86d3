//! Stage collaborators for equity-research-rs
//!
//! The six analytical stages behind the pipeline's uniform `Stage` contract:
//! market data (Yahoo Finance), news fan-out with headline sentiment,
//! fundamental-ratio scoring, technical indicators, strategy synthesis, and
//! report composition.

pub mod api;
pub mod fundamental;
pub mod market_data;
pub mod news;
pub mod report;
pub mod settings;
pub mod strategy;
pub mod technical;

pub use api::YahooFinanceClient;
pub use fundamental::{FundamentalsClient, FundamentalsStage};
pub use market_data::MarketDataStage;
pub use news::{HeadlineClient, HeadlineSource, NewsStage};
pub use report::ReportComposerStage;
pub use settings::StageSettings;
pub use strategy::StrategyStage;
pub use technical::TechnicalsStage;

use research_core::{Result, Stage};
use std::sync::Arc;

/// Build the full set of research stages from one settings block
pub fn research_stages(settings: &StageSettings) -> Result<Vec<Arc<dyn Stage>>> {
    Ok(vec![
        Arc::new(MarketDataStage::new(settings)),
        Arc::new(NewsStage::new(settings)),
        Arc::new(FundamentalsStage::new(settings)),
        Arc::new(TechnicalsStage::new()),
        Arc::new(StrategyStage::new()),
        Arc::new(ReportComposerStage::new()?),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use research_core::StageName;

    #[test]
    fn test_full_stage_set_covers_every_name() {
        let stages = research_stages(&StageSettings::default()).unwrap();
        let mut names: Vec<StageName> = stages.iter().map(|s| s.name()).collect();
        names.sort_unstable();
        assert_eq!(names, StageName::ALL);
    }
}
