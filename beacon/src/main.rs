//! Command line entry point: sends one-off reports through the configured
//! strategy, the way an application's own triggers would.
use anyhow::{Context, Result};
use beacon::{
    CallSpec, Config, QueueSelection, ReportDefinition, Tracker, deferred::TokioDeferrer, logger,
    queue::WorkerQueue, sender,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::{path::PathBuf, sync::Arc};

/// Define command line arguments using clap
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "BEACON_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment environment, overrides the config file
    #[arg(short, long, env = "BEACON_ENV")]
    env: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a single report
    Report {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        user: Option<String>,

        #[arg(short, long)]
        group: Option<String>,

        /// Metric as key=value; the value is parsed as JSON when possible
        #[arg(short, long = "measure", value_parser = parse_pair)]
        measures: Vec<(String, Value)>,

        /// Aggregate as key=value
        #[arg(short, long = "aggregate", value_parser = parse_pair)]
        aggregates: Vec<(String, Value)>,
    },
}

fn parse_pair(s: &str) -> Result<(String, Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid key=value: no `=` found in `{s}`"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let _logger = logger::init();

    let cli = Cli::parse();
    tracing::debug!("Config path: {:?}", cli.config);
    if let Err(e) = run(cli).await {
        eprintln!("beacon: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::new(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(env) = cli.env {
        config.environment = env;
    }

    match cli.command {
        Command::Report {
            name,
            user,
            group,
            measures,
            aggregates,
        } => {
            let mut definition = ReportDefinition::generic(CallSpec::literal(name))
                .created_at(CallSpec::now())
                .user(user.map(CallSpec::literal).unwrap_or_default())
                .group(group.map(CallSpec::literal).unwrap_or_default());
            for (key, value) in measures {
                definition = definition.measure(key, Some(CallSpec::literal(value)));
            }
            for (key, value) in aggregates {
                definition = definition.aggregate(key, Some(CallSpec::literal(value)));
            }
            send_report(config, definition).await
        }
    }
}

async fn send_report(config: Config, definition: ReportDefinition) -> Result<()> {
    let sender = sender::create_sender(&config)?;

    let mut builder = Tracker::builder(config);
    let worker_queue = if builder.config().queue_selection() == QueueSelection::Resque {
        let queue = Arc::new(WorkerQueue::start(&builder.config().worker, sender.clone()));
        builder.job_queue(queue.clone());
        Some(queue)
    } else {
        None
    };
    let deferrer = Arc::new(TokioDeferrer::new());
    builder.deferrer(deferrer.clone());

    let handle = builder.register(definition)?;
    let tracker = builder.build(sender)?;
    let outcome = tracker.hook(handle)?.call(&()).await;

    // Background deliveries must finish before the process exits.
    if let Some(queue) = worker_queue {
        queue.shutdown().await;
    }
    deferrer.drain().await;

    tracing::info!("report finished: {:?}", outcome?);
    Ok(())
}
