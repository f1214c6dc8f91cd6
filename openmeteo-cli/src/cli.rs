use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use openmeteo_core::{
    Config, CursorStore, JsonLinesSink, Orchestrator, RawConfig, RecordSink, StateSnapshot,
    StreamSchema, provider::provider_from_config,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "tap-openmeteo",
    version,
    about = "Incremental weather extraction from Open-Meteo"
)]
pub struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct ConfigArg {
    /// Config file (.json or .toml). Defaults to config.json in the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl ConfigArg {
    fn load(&self) -> Result<Config> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => RawConfig::default_path()?,
        };
        let raw = RawConfig::load(&path)?;
        Config::validate(raw).with_context(|| format!("Invalid configuration in {}", path.display()))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the schema of every active stream.
    Discover {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Check a configuration file without contacting the API.
    Validate {
        #[command(flatten)]
        config: ConfigArg,
    },

    /// Run one sync and write messages to stdout.
    Sync {
        #[command(flatten)]
        config: ConfigArg,

        /// Prior state file, as written by a previous run's final STATE message value.
        #[arg(short, long)]
        state: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Discover { config } => {
                let config = config.load()?;
                let mut sink = JsonLinesSink::new(io::stdout().lock());
                for &stream in &config.streams {
                    sink.write_schema(&StreamSchema::for_stream(stream, &config))?;
                }
                sink.flush()?;
            }
            Command::Validate { config } => {
                let config = config.load()?;
                let streams: Vec<_> = config.streams.iter().map(|s| s.as_str()).collect();
                println!(
                    "Configuration OK: {} location(s), streams: {}",
                    config.locations.len(),
                    streams.join(", ")
                );
            }
            Command::Sync { config, state } => {
                let config = config.load()?;
                let prior = match state {
                    Some(path) => load_state(&path)?,
                    None => StateSnapshot::default(),
                };
                let mut cursors = CursorStore::from_snapshot(&prior)?;
                let client = provider_from_config(&config)?;
                let mut sink = JsonLinesSink::new(io::stdout().lock());

                let report = Orchestrator::new(&config, &client, &mut cursors)
                    .run(&mut sink)
                    .await?;

                for skipped in &report.skipped {
                    info!(stream = %skipped.stream, "Skipped: {}", skipped.reason);
                }
                for failure in &report.failures {
                    warn!(
                        stream = %failure.stream,
                        location = %failure.location,
                        kind = ?failure.kind,
                        "{}",
                        failure.detail
                    );
                }
                info!(
                    records = report.total_records(),
                    failed = report.failures.len(),
                    "Run finished"
                );
            }
        }

        Ok(())
    }
}

fn load_state(path: &Path) -> Result<StateSnapshot> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;

    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))
}
