use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "validators",
    about = "Operational validators for the ingestion pipeline"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check graph topology: containment coverage, orphans, density, and
    /// expected relationship types.
    GraphHealth {
        /// Maximum orphaned files to list in the report.
        #[arg(long, default_value_t = 50)]
        list_orphans: usize,
    },
    /// Verify vector collection coverage and payload filtering against the
    /// graph's view of completed documents.
    DataIntegrity {
        /// How many completed documents to sample.
        #[arg(long, default_value_t = 100)]
        sample: usize,
    },
    /// Periodically sample topic offsets, store growth, and dependency
    /// health; optionally push each sample to a webhook.
    Monitor {
        #[arg(long, default_value_t = 30)]
        interval_secs: u64,
        /// Stop after this many samples; run forever when omitted.
        #[arg(long)]
        iterations: Option<u64>,
        #[arg(long)]
        webhook: Option<String>,
    },
    /// Critical-path smoke test: submit a synthetic document and verify a
    /// correctly-dimensioned vector point appears.
    Smoke {
        /// Producer base URL; defaults to the configured public base URL.
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}
