//! Subcommand implementations.

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use telemetry_config_and_utils::{Config, Paths};
use telemetry_database::{QueueStore, Stream};
use telemetry_pipeline::{Dispatcher, HttpSubmitter};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{info, warn};

fn build_dispatcher(config: &Config, paths: &Paths) -> anyhow::Result<Dispatcher> {
    let endpoint = config.endpoint_url().context("invalid endpoint")?;
    let submitter = HttpSubmitter::new(endpoint, config.pipeline.submit_timeout())?;

    let dispatcher = Dispatcher::new(
        Handle::current(),
        paths.database_file(),
        Arc::new(config.pipeline.clone()),
        Arc::new(submitter),
    )?;
    Ok(dispatcher)
}

async fn open_store(config: &Config, paths: &Paths) -> anyhow::Result<QueueStore> {
    QueueStore::open(&paths.database_file(), config.pipeline.max_rows_per_stream)
        .await
        .context("failed to open queue store")
}

pub async fn track(
    config: &Config,
    paths: &Paths,
    stream: Stream,
    token: String,
    payload: String,
    flush: bool,
) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config, paths)?;
    dispatcher.track(stream, payload, token);

    if flush {
        let report = dispatcher.flush_and_wait(true).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    dispatcher.shutdown().await?;
    Ok(())
}

/// Queue stdin lines until EOF or Ctrl-C. The scheduled flush timer keeps
/// running the whole time.
pub async fn ingest(
    config: &Config,
    paths: &Paths,
    stream: Stream,
    token: String,
) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config, paths)?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut queued = 0u64;

    info!(stream = %stream, "Reading payloads from stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => {
                        dispatcher.track(stream, line, token.as_str());
                        queued += 1;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    let stats = dispatcher.stats();
    info!(queued, dropped = stats.dropped_commands, "Input finished");

    if let Err(e) = dispatcher.shutdown().await {
        warn!(error = %e, "Pipeline did not shut down cleanly");
        return Err(e.into());
    }
    println!("{}", serde_json::to_string_pretty(&dispatcher.stats())?);
    Ok(())
}

pub async fn flush(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config, paths)?;
    let report = dispatcher.flush_and_wait(true).await?;
    dispatcher.shutdown().await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn status(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let store = open_store(config, paths).await?;
    let counts = store.status().await?;
    store.close().await?;

    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

pub async fn purge(config: &Config, paths: &Paths, older_than_ms: u64) -> anyhow::Result<()> {
    let cutoff = Utc::now().timestamp_millis() - i64::try_from(older_than_ms)?;
    let store = open_store(config, paths).await?;

    let mut total = 0;
    for stream in Stream::ALL {
        let purged = store.purge_older_than(stream, cutoff).await?;
        if purged > 0 {
            info!(stream = %stream, purged, "Purged records");
        }
        total += purged;
    }
    store.close().await?;

    println!("purged {} records", total);
    Ok(())
}

pub async fn clear(config: &Config, paths: &Paths, token: String) -> anyhow::Result<()> {
    let dispatcher = build_dispatcher(config, paths)?;
    dispatcher.clear(token);
    dispatcher.shutdown().await?;
    Ok(())
}
