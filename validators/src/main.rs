mod args;
mod data_integrity;
mod graph_health;
mod monitor;
mod report;
mod smoke;

use std::time::Duration;

use clap::Parser;
use common::{
    storage::{graph::GraphClient, vector::VectorClient},
    utils::config::get_config,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    args::{Args, Command},
    report::{emit, Verdict},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let args = Args::parse();
    let config = get_config()?;

    let exit_code = match args.command {
        Command::GraphHealth { list_orphans } => {
            let graph = GraphClient::connect(&config).await?;
            let report = graph_health::run(&graph, list_orphans).await?;
            emit(&report, report.verdict)
        }
        Command::DataIntegrity { sample } => {
            let graph = GraphClient::connect(&config).await?;
            let vector = VectorClient::new(&config)?;
            let report = data_integrity::run(&config, &graph, &vector, sample).await?;
            emit(&report, report.verdict)
        }
        Command::Monitor {
            interval_secs,
            iterations,
            webhook,
        } => {
            let graph = GraphClient::connect(&config).await?;
            let vector = VectorClient::new(&config)?;
            monitor::run(
                &config,
                &graph,
                &vector,
                Duration::from_secs(interval_secs),
                iterations,
                webhook,
            )
            .await?;
            Verdict::Healthy.exit_code()
        }
        Command::Smoke {
            base_url,
            timeout_secs,
        } => {
            let vector = VectorClient::new(&config)?;
            let base_url = base_url.unwrap_or_else(|| config.public_base_url.clone());
            let report = smoke::run(
                &config,
                &vector,
                &base_url,
                Duration::from_secs(timeout_secs),
            )
            .await?;
            emit(&report, report.verdict)
        }
    };

    std::process::exit(exit_code);
}
