use anyhow::{bail, Context};
use clap::Parser;
use log::debug;
use pain_physio::config::{Args, Command, SessionConfig};
use pain_physio::eda_analysis::run_eda_pipeline;
use pain_physio::error::PipelineError;
use pain_physio::heart_analysis::run_ppg_pipeline;
use pain_physio::merger::merge_features;
use pain_physio::session::run_session;

/// Merge failures are reported and swallowed so a batch of shell calls keeps going.
fn report_merge_error(err: &PipelineError) {
    if err.is_missing_file() {
        println!("File not found: {}", err);
    } else {
        println!("Error occurred: {}", err);
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();
    debug!("{:?}", args);

    match args.command {
        Command::Eda { config, subject } => {
            let report = run_eda_pipeline(&config, &subject)
                .with_context(|| format!("EDA pipeline failed for {}", config.input.display()))?;
            println!(
                "Processed {} EDA samples, baseline tonic {:.3}, {} files written",
                report.samples,
                report.baseline,
                report.written.len()
            );
        }
        Command::Ppg { config, subject } => {
            let report = run_ppg_pipeline(&config, &subject)
                .with_context(|| format!("PPG pipeline failed for {}", config.input.display()))?;
            println!(
                "Processed {} PPG samples: {} windows, {} merged rows, {} files written",
                report.samples,
                report.window_records,
                report.merged.len(),
                report.written.len()
            );
        }
        Command::Merge { config, subject } => match merge_features(&config, &subject) {
            Ok(report) => println!("Merged {} rows", report.rows),
            Err(e) => report_merge_error(&e),
        },
        Command::Run { config, fail_fast } => {
            let session = SessionConfig::from_path(&config)
                .with_context(|| format!("Cannot load session {}", config.display()))?;
            let summary = run_session(&session, fail_fast).context("session aborted")?;
            if !summary.failed.is_empty() {
                bail!("failed jobs: {}", summary.failed_names().join(", "));
            }
        }
    }

    Ok(())
}
