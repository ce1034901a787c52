#![allow(clippy::uninlined_format_args)]

use phishscope::config::Config;
use phishscope::orchestrator::{AnalysisRequest, Orchestrator, Services};
use phishscope::scoring::EnabledChecks;
use phishscope::writer::JsonLinesSink;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(email_file) = args.next() else {
        anyhow::bail!("usage: test-analyze-email <file.eml> [config.yaml]");
    };
    let config_path = args.next().unwrap_or_else(|| "phishscope.yaml".to_string());

    let mut config = Config::load_or_default(&config_path)?;
    config.apply_env();
    println!("Analysing {} (deadline {:?})", email_file, config.request_timeout());

    let services = Services::from_config(&config)?;
    let orchestrator = Orchestrator::new(Arc::new(services), config.request_timeout());

    let raw = std::fs::read(&email_file)?;
    let prepared = orchestrator.prepare(AnalysisRequest::new(raw, EnabledChecks::all()))?;
    println!("Sandbox: {}", prepared.sandbox_root().display());

    let sink = JsonLinesSink::new(tokio::io::stdout());
    let scores = prepared.run(sink).await;

    println!("\n=== Final scores ===");
    println!("  Base: {}", scores.base_score);
    println!(
        "  Text path: {}/{} ({:.1}%)",
        scores.final_score_text, scores.max_possible_score, scores.text_percentage
    );
    println!(
        "  Rendered path: {}/{} ({:.1}%)",
        scores.final_score_rendered, scores.max_possible_score, scores.rendered_percentage
    );
    Ok(())
}
