//! Timeline Archiver main entry point
//!
//! This is the command-line interface for managing archived subjects and
//! running the crawl dispatcher and queue workers.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use timeline_archiver::config::{load_config_with_hash, Config};
use timeline_archiver::crawler::{
    crawl_resource, dispatch_crawls, ArchiveContext, Runner, Worker, WorkerOptions,
};
use timeline_archiver::model::{ResourceFlags, ResourceKind, SubjectId, WorkMessage};
use timeline_archiver::output::{load_statistics, print_statistics};
use timeline_archiver::queue::{MessageQueue, SqliteQueue};
use timeline_archiver::storage::{SqliteStorage, SubjectRegistry};
use tracing_subscriber::EnvFilter;

/// Timeline Archiver: incremental archiving of social accounts
///
/// Subjects are registered with the resource kinds to archive. The runner
/// enqueues crawl work, and workers fetch pages, advance watermarks and
/// resolve referenced posts and media.
#[derive(Parser, Debug)]
#[command(name = "timeline-archiver")]
#[command(version)]
#[command(about = "Incremental social account archiver", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG", default_value = "archiver.toml", global = true)]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage per-subject resource kinds
    #[command(subcommand)]
    Flags(FlagsCommand),

    /// Crawl one resource kind of one subject
    Crawl {
        subject: SubjectId,
        kind: ResourceKind,
        /// Run the crawl step in this process instead of enqueueing it
        #[arg(long)]
        inline: bool,
    },

    /// Enqueue crawl work for every subject once
    Dispatch {
        /// Only dispatch this resource kind (default: the runner's configured kinds)
        #[arg(long)]
        kind: Option<ResourceKind>,
        /// Dispatch to every registered subject regardless of its flags
        #[arg(long)]
        all: bool,
    },

    /// Dispatch crawl work periodically until interrupted
    Runner,

    /// Consume the work queue
    Worker {
        /// Exit once the queue is empty
        #[arg(long)]
        drain: bool,
    },

    /// Re-inject posts into the resolver queue
    Requeue {
        #[arg(required = true)]
        post_ids: Vec<u64>,
    },

    /// Show archive and queue statistics
    Stats,
}

#[derive(Subcommand, Debug)]
enum FlagsCommand {
    /// Replace the resource kinds archived for a subject
    Set {
        subject: SubjectId,
        #[arg(required = true)]
        kinds: Vec<ResourceKind>,
    },
    /// List registered subjects
    List,
    /// Remove a subject (its watermarks are kept)
    Delete { subject: SubjectId },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    match cli.command {
        Command::Flags(command) => handle_flags(&config, command),
        Command::Crawl {
            subject,
            kind,
            inline,
        } => handle_crawl(&config, subject, kind, inline).await,
        Command::Dispatch { kind, all } => handle_dispatch(&config, kind, all).await,
        Command::Runner => handle_runner(&config).await,
        Command::Worker { drain } => handle_worker(&config, drain).await,
        Command::Requeue { post_ids } => handle_requeue(&config, &post_ids).await,
        Command::Stats => handle_stats(&config),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("timeline_archiver=info,warn"),
            1 => EnvFilter::new("timeline_archiver=debug,info"),
            2 => EnvFilter::new("timeline_archiver=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_storage(config: &Config) -> anyhow::Result<SqliteStorage> {
    SqliteStorage::new(Path::new(&config.storage.database_path))
        .with_context(|| format!("failed to open {}", config.storage.database_path))
}

fn open_queue(config: &Config) -> anyhow::Result<SqliteQueue> {
    SqliteQueue::new(
        Path::new(&config.queue.database_path),
        config.queue.visibility_timeout(),
        config.queue.max_receive_count,
    )
    .with_context(|| format!("failed to open queue {}", config.queue.database_path))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Interrupt received, shutting down");
}

/// Handles `flags set|list|delete`
fn handle_flags(config: &Config, command: FlagsCommand) -> anyhow::Result<()> {
    let storage = open_storage(config)?;

    match command {
        FlagsCommand::Set { subject, kinds } => {
            let flags: ResourceFlags = kinds.into_iter().collect();
            storage.set_flags(subject, &flags)?;
            println!("{}: {}", subject, flags);
        }
        FlagsCommand::List => {
            let subjects = storage.list_subjects()?;
            if subjects.is_empty() {
                println!("No subjects registered");
            }
            for subject in subjects {
                println!(
                    "{}\t{}\t(bits {})\t{}",
                    subject.id,
                    subject.flags,
                    subject.flags.bits(),
                    subject.updated_at.as_deref().unwrap_or("-")
                );
            }
        }
        FlagsCommand::Delete { subject } => {
            if storage.delete_subject(subject)? {
                println!("Deleted subject {}", subject);
            } else {
                anyhow::bail!("subject {} is not registered", subject);
            }
        }
    }

    Ok(())
}

/// Handles `crawl`: enqueue one crawl step, or run it here with `--inline`
async fn handle_crawl(
    config: &Config,
    subject: SubjectId,
    kind: ResourceKind,
    inline: bool,
) -> anyhow::Result<()> {
    if !inline {
        let queue = open_queue(config)?;
        queue
            .send(&WorkMessage::crawl_resource(subject, kind, &config.work_context()))
            .await?;
        println!("Enqueued {} crawl for subject {}", kind, subject);
        return Ok(());
    }

    let ctx = ArchiveContext::from_config(config)?;
    match crawl_resource(&ctx, subject, kind).await {
        Ok(outcome) => {
            println!("{:?}", outcome);
            Ok(())
        }
        Err(e) => {
            tracing::error!(subject, resource = %kind, "Crawl failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles `dispatch`: one round of the crawl dispatcher
async fn handle_dispatch(
    config: &Config,
    kind: Option<ResourceKind>,
    all: bool,
) -> anyhow::Result<()> {
    let storage = open_storage(config)?;
    let queue = open_queue(config)?;
    let context = config.work_context();

    let kinds = match kind {
        Some(kind) => vec![kind],
        None => config.runner.resources.clone(),
    };

    let mut total = 0;
    for kind in kinds {
        total += dispatch_crawls(&storage, &queue, &context, kind, !all).await?;
    }
    println!("Dispatched {} crawl messages", total);
    Ok(())
}

/// Handles `runner`: periodic dispatch until Ctrl-C
async fn handle_runner(config: &Config) -> anyhow::Result<()> {
    let runner = Runner::new(
        Arc::new(open_storage(config)?),
        Arc::new(open_queue(config)?),
        config.work_context(),
        config.runner.resources.clone(),
        config.runner.interval(),
    );

    tracing::info!(
        "Dispatching {:?} every {:?}",
        config.runner.resources,
        config.runner.interval()
    );
    runner.run_until(shutdown_signal()).await;
    Ok(())
}

/// Handles `worker`: consume the queue until empty or until Ctrl-C
async fn handle_worker(config: &Config, drain: bool) -> anyhow::Result<()> {
    let ctx = Arc::new(ArchiveContext::from_config(config)?);
    let worker = Worker::new(ctx, WorkerOptions::from_config(config));

    let stats = if drain {
        worker.drain().await?
    } else {
        tracing::info!(
            "Worker started with concurrency {}",
            config.worker.concurrency
        );
        worker.run_until(shutdown_signal()).await?
    };

    println!(
        "Processed {} messages: {} stored, {} already stored, {} crawls, {} retrying, {} failed",
        stats.total(),
        stats.stored,
        stats.already_stored,
        stats.crawled,
        stats.retrying,
        stats.failed
    );
    Ok(())
}

/// Handles `requeue`: manual recovery of missed references
async fn handle_requeue(config: &Config, post_ids: &[u64]) -> anyhow::Result<()> {
    let queue = open_queue(config)?;
    let context = config.work_context();

    for &post_id in post_ids {
        queue
            .send(&WorkMessage::resolve_post(post_id, None, &context))
            .await
            .with_context(|| format!("failed to requeue post {}", post_id))?;
    }
    println!("Requeued {} posts", post_ids.len());
    Ok(())
}

/// Handles `stats`
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}", config.storage.database_path);
    println!("Queue: {}\n", config.queue.database_path);

    let storage = open_storage(config)?;
    let depth = match open_queue(config).and_then(|q| Ok(q.depth()?)) {
        Ok(depth) => Some(depth),
        Err(e) => {
            tracing::warn!("Queue unavailable: {:#}", e);
            None
        }
    };

    let stats = load_statistics(&storage, depth)?;
    print_statistics(&stats);
    Ok(())
}
