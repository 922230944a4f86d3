//! Command-line interface for equity-research-rs

use clap::{Parser, ValueEnum};
use research_core::{ReportSection, RunStatus, StageName, Symbol};
use research_pipeline::{AnalysisProfile, Executor, PipelineConfig, StageGraph};
use research_stages::{StageSettings, research_stages};
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// All six stages
    Full,
    /// Market data, technicals, report
    Quick,
    /// Market data and technicals only
    TechnicalOnly,
}

impl From<Profile> for AnalysisProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Full => AnalysisProfile::Full,
            Profile::Quick => AnalysisProfile::Quick,
            Profile::TechnicalOnly => AnalysisProfile::TechnicalOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "research-cli")]
#[command(about = "Multi-stage equity research reports from the command line", long_about = None)]
struct Args {
    /// Security to analyze, e.g. TCS or NSE:RELIANCE
    symbol: String,

    /// Which analysis profile to run
    #[arg(long, value_enum, default_value_t = Profile::Full)]
    profile: Profile,

    /// Drop cached stage results for this symbol before running
    #[arg(long)]
    force_refresh: bool,

    /// Whole-run deadline in seconds
    #[arg(long, default_value_t = 180)]
    timeout_secs: u64,
}

/// Initialize tracing subscriber with default configuration
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn status_line(section: &ReportSection) -> String {
    match section {
        ReportSection::Ready { caveats, source, .. } => {
            let mut line = format!("ok ({source:?})");
            if !caveats.is_empty() {
                line.push_str(&format!(" - {}", caveats.join("; ")));
            }
            line
        }
        ReportSection::Unavailable { reason } => format!("unavailable - {reason}"),
        ReportSection::NotAttempted => "not attempted".to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();

    let args = Args::parse();
    let symbol = Symbol::parse(&args.symbol)?;

    let config = PipelineConfig::default();
    let graph = StageGraph::research(&config)?.restricted(args.profile.into())?;
    let settings = StageSettings::default().with_env_api_key();

    let executor = Executor::builder()
        .config(config)
        .graph(graph)
        .stages(research_stages(&settings)?)
        .build()?;

    info!(%symbol, profile = ?args.profile, "starting analysis");
    let report = executor
        .run(
            symbol,
            args.force_refresh,
            Some(Duration::from_secs(args.timeout_secs)),
        )
        .await;

    match report.document() {
        Some(markdown) => println!("{markdown}"),
        None => println!("No composed report for {}.", report.symbol),
    }

    println!("---");
    println!(
        "Run status: {:?} ({} of {} sections ready)",
        report.status,
        report.ready_count(),
        report.sections.len()
    );
    for stage in StageName::ALL {
        if let Some(section) = report.section(stage) {
            println!("  {stage}: {}", status_line(section));
        }
    }
    if let Some(reason) = &report.abort_reason {
        println!("Aborted: {reason}");
    }

    Ok(match report.status {
        RunStatus::Complete | RunStatus::PartiallyComplete => ExitCode::SUCCESS,
        RunStatus::Aborted => ExitCode::FAILURE,
    })
}
