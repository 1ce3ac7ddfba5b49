mod common;
pub mod config;
pub mod console;
pub mod listing;
pub mod report;
pub mod tally;

use crate::{
    common::*,
    config::{Config, ReportConfig},
    report::{run_report, ReportSummary},
};

/// Load the saved detector and run the reporting pass.
pub async fn start(config: Arc<Config>) -> Result<ReportSummary> {
    let model_file = config.output.model_file.clone();
    let device = config.report.device;
    info!("load detector from '{}'", model_file.display());
    let detector =
        tokio::task::spawn_blocking(move || Detector::load(&model_file, device)).await??;

    report(detector, &config.report).await
}

/// Run the reporting pass with a detector in memory.
pub async fn report(detector: Detector, config: &ReportConfig) -> Result<ReportSummary> {
    let summary = run_report(detector, config.clone()).await?;
    info!(
        "processed {} images, {} with every label present",
        summary.num_images,
        summary.triggered.len()
    );
    Ok(summary)
}
