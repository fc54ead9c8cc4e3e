mod bootstrap;
mod input;
mod render;

use anyhow::{Context, Result};
use cur_core::settings::Settings;
use cur_data::analysis::analyze_report;

fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("cur-top v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Report: {}, top-k: {}, format: {}",
        settings.report.display(),
        settings.top_k,
        settings.format
    );

    let options = settings.aggregate_options()?;
    let reader = input::open_report(&settings)?;
    let result = analyze_report(reader, &options)
        .with_context(|| format!("Failed to process {}", settings.report.display()))?;

    match settings.format.as_str() {
        "json" => println!("{}", render::render_json(&result)?),
        _ => print!("{}", render::render_text(&result.report)),
    }

    Ok(())
}
