use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

use gather_client::{CacheBackend, CacheKind, CommandExtractor, RedisConfig};
use gather_core::{Dispatcher, DispatcherConfig, Envelope, JobKind, derive_key};

#[derive(Parser)]
#[command(name = "gather", version, about = "Deduplicating review extraction dispatcher")]
struct Cli {
    /// Cache backend: redis, memory or none
    #[arg(long, global = true, env = "GATHER_CACHE", default_value = "redis")]
    cache: CacheKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the cache key a URL maps to
    Key {
        /// Source kind (yandex, 2gis, google, doctors)
        #[arg(short, long)]
        kind: JobKind,

        #[arg(short, long)]
        url: String,
    },

    /// Extract one or more URLs of the same kind concurrently
    Submit {
        /// Source kind (yandex, 2gis, google, doctors)
        #[arg(short, long)]
        kind: JobKind,

        /// Target URL (repeatable)
        #[arg(short, long = "url", required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        extractor: ExtractorArgs,
    },

    /// Read `<kind> <url>` lines from stdin and extract them concurrently
    Batch {
        #[command(flatten)]
        extractor: ExtractorArgs,
    },
}

#[derive(Args)]
struct ExtractorArgs {
    /// Program run for each job as `<program> [args..] <kind> <url>`
    #[arg(long, env = "GATHER_EXTRACTOR")]
    extractor: PathBuf,

    /// Argument passed to the extractor before kind and URL (repeatable)
    #[arg(long = "extractor-arg", allow_hyphen_values = true)]
    extractor_args: Vec<String>,
}

/// One JSON line of output.
#[derive(Serialize)]
struct OutputLine {
    kind: String,
    url: String,
    #[serde(flatten)]
    envelope: Envelope,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gather=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key { kind, url } => {
            println!("{}", derive_key(kind, &url));
        }
        Commands::Submit {
            kind,
            urls,
            extractor,
        } => {
            let dispatcher = start_dispatcher(cli.cache, &extractor).await?;
            let result = cmd_submit(&dispatcher, kind, urls).await;
            dispatcher.shutdown().await;
            result?;
        }
        Commands::Batch { extractor } => {
            let dispatcher = start_dispatcher(cli.cache, &extractor).await?;
            cmd_batch(dispatcher).await?;
        }
    }

    Ok(())
}

async fn start_dispatcher(
    cache: CacheKind,
    extractor: &ExtractorArgs,
) -> Result<Arc<Dispatcher<CacheBackend>>> {
    let config = DispatcherConfig::from_env().context("Invalid dispatcher configuration")?;
    let redis = RedisConfig::from_env().context("Invalid Redis configuration")?;

    let backend = CacheBackend::connect(cache, &redis).await;
    if backend.kind() != cache {
        tracing::warn!(requested = %cache, active = %backend.kind(), "Cache backend degraded");
    }

    let extractors = CommandExtractor::table(&extractor.extractor, &extractor.extractor_args);
    let dispatcher = Dispatcher::start(config, backend, extractors)
        .context("Failed to start dispatcher")?;
    Ok(Arc::new(dispatcher))
}

async fn cmd_submit(
    dispatcher: &Arc<Dispatcher<CacheBackend>>,
    kind: JobKind,
    urls: Vec<String>,
) -> Result<()> {
    let handles: Vec<_> = urls
        .into_iter()
        .map(|url| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                let envelope = dispatcher.submit_envelope(kind, &url).await;
                OutputLine {
                    kind: kind.to_string(),
                    url,
                    envelope,
                }
            })
        })
        .collect();

    let total = handles.len();
    let mut failed = 0;
    for handle in handles {
        let line = handle.await.context("Submission task failed")?;
        if !line.envelope.success {
            failed += 1;
        }
        println!("{}", serde_json::to_string(&line)?);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} submissions failed");
    }
    Ok(())
}

/// How often a long batch logs dispatcher health.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Exit status after a second interrupt (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

async fn cmd_batch(dispatcher: Arc<Dispatcher<CacheBackend>>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut health_tick = tokio::time::interval(HEALTH_LOG_INTERVAL);
    health_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    health_tick.tick().await;
    let mut interrupted = false;

    loop {
        tokio::select! {
            () = &mut shutdown => {
                interrupted = true;
                break;
            }
            _ = health_tick.tick() => {
                tracing::info!(health = ?dispatcher.health(), pending = tasks.len(), "Batch progress");
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                print_line(&joined.context("Submission task failed")?)?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_line(&line) {
                    None => {}
                    Some(Ok((kind, url))) => {
                        let dispatcher = dispatcher.clone();
                        tasks.spawn(async move {
                            let envelope = dispatcher.submit_envelope(kind, &url).await;
                            OutputLine {
                                kind: kind.to_string(),
                                url,
                                envelope,
                            }
                        });
                    }
                    Some(Err(line)) => print_line(&line)?,
                }
            }
        }
    }

    // A first interrupt while draining stops admission like one during
    // reading; a second one leaves immediately.
    loop {
        let drain = drain_batch(&dispatcher, &mut tasks, interrupted, &mut health_tick);
        tokio::select! {
            result = drain => return result,
            () = shutdown_signal() => {
                if interrupted {
                    // Blocking extractions cannot be cancelled and the
                    // runtime waits for them on drop.
                    tracing::warn!(health = ?dispatcher.health(), "Second interrupt, exiting without waiting");
                    std::process::exit(FORCED_EXIT_CODE);
                }
                interrupted = true;
            }
        }
    }
}

/// Wait for every submitted line and print its result.
async fn drain_batch(
    dispatcher: &Dispatcher<CacheBackend>,
    tasks: &mut JoinSet<OutputLine>,
    interrupted: bool,
    health_tick: &mut Interval,
) -> Result<()> {
    if interrupted {
        tracing::info!(health = ?dispatcher.health(), pending = tasks.len(), "Batch interrupted");
        // Queued jobs resolve as abandoned; running ones finish first.
        let abandoned = dispatcher.shutdown().await;
        tracing::info!(abandoned, pending = tasks.len(), "Dispatcher stopped");
    }

    loop {
        tokio::select! {
            joined = tasks.join_next() => {
                let Some(joined) = joined else { break };
                print_line(&joined.context("Submission task failed")?)?;
            }
            _ = health_tick.tick() => {
                tracing::info!(health = ?dispatcher.health(), pending = tasks.len(), "Waiting for results");
            }
        }
    }

    tracing::info!(health = ?dispatcher.health(), "Batch complete");
    if !interrupted {
        dispatcher.shutdown().await;
    }
    Ok(())
}

/// Parse a `<kind> <url>` batch line.
///
/// Blank lines and `#` comments yield `None`; malformed lines yield a
/// ready-made failure line.
fn parse_line(line: &str) -> Option<Result<(JobKind, String), OutputLine>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let mut parts = line.split_whitespace();
    let raw_kind = parts.next().unwrap_or_default();
    let (Some(url), None) = (parts.next(), parts.next()) else {
        return Some(Err(OutputLine {
            kind: raw_kind.to_string(),
            url: String::new(),
            envelope: Envelope {
                success: false,
                data: None,
                error: Some(format!("Malformed line, expected `<kind> <url>`: {line}")),
            },
        }));
    };

    Some(match raw_kind.parse::<JobKind>() {
        Ok(kind) => Ok((kind, url.to_string())),
        Err(e) => Err(OutputLine {
            kind: raw_kind.to_string(),
            url: url.to_string(),
            envelope: Envelope::err(&e),
        }),
    })
}

fn print_line(line: &OutputLine) -> Result<()> {
    println!("{}", serde_json::to_string(line)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
