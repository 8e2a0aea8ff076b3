//! telemetryd - command-line front end for the local telemetry queue.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use telemetry_config_and_utils::{init_logging, Config, Paths};
use telemetry_database::Stream;

/// Telemetry pipeline command-line interface.
#[derive(Parser)]
#[command(name = "telemetryd")]
#[command(about = "Queue telemetry locally and deliver it to the ingestion endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, queue, logs). Defaults to ~/.telemetry
    #[arg(long, global = true, env = "TELEMETRY_HOME")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue one payload
    Track {
        /// Stream to queue into (events, people, groups)
        #[arg(short, long, default_value = "events")]
        stream: Stream,
        /// Project token owning the record
        #[arg(short, long)]
        token: String,
        /// Serialized JSON payload
        payload: String,
        /// Flush right after queueing
        #[arg(long)]
        flush: bool,
    },
    /// Queue newline-delimited payloads from stdin until EOF or Ctrl-C
    Ingest {
        #[arg(short, long, default_value = "events")]
        stream: Stream,
        #[arg(short, long)]
        token: String,
    },
    /// Flush every stream now and print the report
    Flush,
    /// Print queued record counts per stream and token
    Status,
    /// Delete records older than the given age
    Purge {
        /// Age in milliseconds
        #[arg(long)]
        older_than_ms: u64,
    },
    /// Delete every queued record for a token
    Clear {
        #[arg(short, long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let mut config = Config::load(&paths)?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    init_logging("telemetryd", &config.log_level, &paths);

    match cli.command {
        Commands::Track {
            stream,
            token,
            payload,
            flush,
        } => app::track(&config, &paths, stream, token, payload, flush).await?,
        Commands::Ingest { stream, token } => app::ingest(&config, &paths, stream, token).await?,
        Commands::Flush => app::flush(&config, &paths).await?,
        Commands::Status => app::status(&config, &paths).await?,
        Commands::Purge { older_than_ms } => app::purge(&config, &paths, older_than_ms).await?,
        Commands::Clear { token } => app::clear(&config, &paths, token).await?,
    }

    Ok(())
}
