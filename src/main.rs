use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use phishscope::config::Config;
use phishscope::orchestrator::{AnalysisRequest, Orchestrator, Services};
use phishscope::scoring::{self, Category, EnabledChecks};
use phishscope::writer::JsonLinesSink;
use std::path::Path;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let matches = Command::new("phishscope")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Streaming email risk assessment")
        .long_about(
            "Scores an email's trustworthiness by checking its sender domain, links, \
             attachments and content, streaming each result as soon as it is known.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("phishscope.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a default configuration file and exit")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-email")
                .long("test-email")
                .value_name("FILE")
                .help("Analyse one .eml file and print each event as a JSON line")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("skip")
                .long("skip")
                .value_name("CATEGORY")
                .help("Disable a check category for --test-email (e.g. checkUrls)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("list-checks")
                .long("list-checks")
                .help("List the scoring checks and the maximum score")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Start the HTTP streaming server")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        generate_default_config(path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("phishscope.yaml");
    let config_found = Path::new(config_path).exists();
    let mut config = if config_found {
        match Config::from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading configuration: {e}");
                process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        config.logging.level_filter()
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if !config_found {
        log::warn!("Configuration file {config_path} not found, using defaults");
    }
    config.apply_env();
    let config = Arc::new(config);

    if matches.get_flag("list-checks") {
        list_checks();
        return;
    }

    let orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("Failed to initialise services: {e}");
            process::exit(1);
        }
    };

    if let Some(email_file) = matches.get_one::<String>("test-email") {
        let skipped: Vec<&String> = matches
            .get_many::<String>("skip")
            .map(|values| values.collect())
            .unwrap_or_default();
        if let Err(e) = test_email_file(&orchestrator, email_file, &skipped).await {
            log::error!("{e}");
            process::exit(1);
        }
        return;
    }

    if matches.get_flag("serve") {
        if let Err(e) = phishscope::server::serve(&config.server.listen, orchestrator).await {
            log::error!("{e:#}");
            process::exit(1);
        }
        return;
    }

    eprintln!("Nothing to do: pass --serve, --test-email FILE or --list-checks");
    process::exit(2);
}

fn build_orchestrator(config: &Config) -> anyhow::Result<Orchestrator> {
    let services = Services::from_config(config)?;
    Ok(Orchestrator::new(Arc::new(services), config.request_timeout()))
}

fn generate_default_config(path: &str) {
    match Config::default().to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("API keys are read from the environment and are not stored in the file.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

fn list_checks() {
    println!("{:<22} {:>6}  Description", "Check", "Impact");
    for check in scoring::ALL_CHECKS {
        println!("{:<22} {:>6}  {}", check.name, check.impact, check.description);
    }
    println!();
    println!(
        "Maximum achievable score with every category enabled: {}",
        scoring::max_achievable_score(&EnabledChecks::all())
    );
}

async fn test_email_file(
    orchestrator: &Orchestrator,
    email_file: &str,
    skipped: &[&String],
) -> anyhow::Result<()> {
    let raw = std::fs::read(email_file)
        .map_err(|e| anyhow::anyhow!("Error reading email file {email_file}: {e}"))?;

    let mut enabled = EnabledChecks::all();
    for key in skipped {
        match Category::ALL.iter().find(|c| c.key() == key.as_str()) {
            Some(category) => enabled = enabled.with(*category, false),
            None => log::warn!("Unknown check category {key}"),
        }
    }

    let prepared = orchestrator.prepare(AnalysisRequest::new(raw, enabled))?;
    let scores = prepared.run(JsonLinesSink::new(tokio::io::stdout())).await;
    log::info!(
        "{email_file}: text {}/{} ({:.1}%), rendered {}/{} ({:.1}%)",
        scores.final_score_text,
        scores.max_possible_score,
        scores.text_percentage,
        scores.final_score_rendered,
        scores.max_possible_score,
        scores.rendered_percentage
    );
    Ok(())
}
