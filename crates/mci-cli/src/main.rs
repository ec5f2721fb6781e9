//! `mci` - drive run plans, inspect the job ledger and run chunked jobs

mod demo;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use mci_checkpoint::{ChunkedJobRunner, ChunkedJobStore, StageCheckpointStore};
use mci_core::{
    ArtifactCache, ExecutionMode, PipelineConfig, PipelineOrchestrator, PlanReport, StageKind, WorkItem,
    WorkItemCatalog,
};
use mci_jobs::{JobLedger, JobRecord};
use mci_storage::{FallbackStore, FileStore, SharedStore, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("mci")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Pipeline orchestration, job ledger and resumable chunked jobs")
        .subcommand_required(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .global(true)
                .default_value(".mci")
                .value_parser(value_parser!(PathBuf))
                .help("Directory holding persisted records"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .subcommand(
            Command::new("run")
                .about("Run a plan over work items and stages with the demo stages")
                .arg(
                    Arg::new("items")
                        .long("items")
                        .required(true)
                        .value_delimiter(',')
                        .help("Comma-separated work item ids"),
                )
                .arg(
                    Arg::new("stages")
                        .long("stages")
                        .required(true)
                        .value_delimiter(',')
                        .value_parser(|s: &str| s.parse::<StageKind>())
                        .help("Comma-separated stages (needs, demand, deep-analysis, synthesis)"),
                )
                .arg(
                    Arg::new("mode")
                        .long("mode")
                        .default_value("by-item")
                        .value_parser(["by-item", "by-stage"])
                        .help("Visit order of (work item, stage) pairs"),
                )
                .arg(
                    Arg::new("fail")
                        .long("fail")
                        .action(ArgAction::Append)
                        .value_parser(parse_failure)
                        .help("Make a stage fail for a work item, as item:stage"),
                )
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Simulated duration of each demo stage"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("jobs")
                .about("List recent jobs, newest first")
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_parser(value_parser!(usize))
                        .help("Number of jobs to show"),
                )
                .arg(
                    Arg::new("logs")
                        .long("logs")
                        .action(ArgAction::SetTrue)
                        .help("Include job log lines"),
                ),
        )
        .subcommand(
            Command::new("chunks")
                .about("Show progress of a chunked job")
                .arg(Arg::new("window").long("window").required(true))
                .arg(Arg::new("item").long("item").required(true)),
        )
        .subcommand(
            Command::new("warmup")
                .about("Run a chunked job to completion with the demo fetcher")
                .arg(Arg::new("window").long("window").required(true))
                .arg(Arg::new("item").long("item").required(true))
                .arg(
                    Arg::new("keys-file")
                        .long("keys-file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File with one key per line"),
                ),
        )
        .subcommand(
            Command::new("reset")
                .about("Clear persisted records")
                .arg(
                    Arg::new("target")
                        .required(true)
                        .value_parser(["jobs", "chunks", "checkpoints", "artifacts", "all"]),
                ),
        )
        .subcommand(Command::new("ping").about("Ledger self-test"))
}

fn parse_failure(value: &str) -> Result<(String, StageKind), String> {
    let (item, stage) = value
        .split_once(':')
        .ok_or_else(|| format!("expected item:stage, got {value}"))?;
    Ok((item.to_string(), stage.parse()?))
}

/// Everything a subcommand needs, built from global arguments
struct AppContext {
    config: PipelineConfig,
    backend: SharedStore,
}

impl AppContext {
    fn from_args(matches: &ArgMatches) -> Result<Self> {
        let config = match matches.get_one::<PathBuf>("config") {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        let data_dir = matches
            .get_one::<PathBuf>("data-dir")
            .cloned()
            .unwrap_or_else(|| PathBuf::from(".mci"));
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let primary: SharedStore = Arc::new(FileStore::new(data_dir));
        let backend: SharedStore = Arc::new(FallbackStore::new(primary));
        Ok(Self { config, backend })
    }

    fn storage(&self) -> Storage {
        Storage::with_config(Arc::clone(&self.backend), self.config.storage)
    }

    fn ledger(&self) -> JobLedger {
        JobLedger::with_config(self.storage(), self.config.ledger)
    }

    fn chunk_store(&self) -> ChunkedJobStore {
        ChunkedJobStore::with_config(self.storage(), self.config.chunking)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let matches = cli().get_matches();
    let ctx = AppContext::from_args(&matches)?;

    match matches.subcommand() {
        Some(("run", args)) => run_plan(&ctx, args).await,
        Some(("jobs", args)) => list_jobs(&ctx, args).await,
        Some(("chunks", args)) => show_chunks(&ctx, args).await,
        Some(("warmup", args)) => warmup(&ctx, args).await,
        Some(("reset", args)) => reset(&ctx, args).await,
        Some(("ping", _)) => ping(&ctx).await,
        _ => bail!("no subcommand given"),
    }
}

async fn run_plan(ctx: &AppContext, args: &ArgMatches) -> Result<()> {
    let items: Vec<String> = args.get_many::<String>("items").into_iter().flatten().cloned().collect();
    let stages: Vec<StageKind> = args.get_many::<StageKind>("stages").into_iter().flatten().copied().collect();
    let mode: ExecutionMode = args
        .get_one::<String>("mode")
        .map_or(Ok(ExecutionMode::default()), |m| m.parse())
        .map_err(anyhow::Error::msg)?;
    let failures: Vec<(String, StageKind)> = args
        .get_many::<(String, StageKind)>("fail")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let latency = Duration::from_millis(args.get_one::<u64>("latency-ms").copied().unwrap_or(200));

    let catalog: WorkItemCatalog = items.iter().map(|id| WorkItem::new(id.clone(), id.replace('-', " "))).collect();
    let orchestrator = Arc::new(
        PipelineOrchestrator::new(
            ctx.ledger(),
            ArtifactCache::with_config(ctx.storage(), ctx.config.cache),
            demo::registry(&failures, latency),
            catalog,
        )
        .with_window_id(ctx.config.window_id.clone())
        .with_plan_config(ctx.config.plan),
    );

    let stopper = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping plan");
                orchestrator.stop_plan();
            }
        })
    };

    let mut plan = orchestrator.create_plan(&items, &stages, mode);
    let report = orchestrator.execute_plan(&mut plan).await;
    stopper.abort();

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &PlanReport) {
    println!(
        "Plan {}: {} ({}/{} tasks completed)",
        report.plan_id, report.status, report.completed_tasks, report.total_tasks
    );
    for item in &report.work_items {
        println!("  {}", item.work_item_id);
        for record in &item.stages {
            match &record.job_id {
                Some(job_id) => println!("    {:<14} {} [{}]", record.stage.label(), record.outcome, job_id),
                None => println!("    {:<14} {}", record.stage.label(), record.outcome),
            }
        }
    }
    for id in &report.unknown_work_items {
        println!("  {id}: unknown work item, skipped");
    }
}

async fn list_jobs(ctx: &AppContext, args: &ArgMatches) -> Result<()> {
    let ledger = ctx.ledger();
    let limit = args
        .get_one::<usize>("limit")
        .copied()
        .unwrap_or(ledger.config().recent_jobs_limit);
    let jobs = ledger.recent_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No jobs recorded");
    }
    for job in &jobs {
        print_job(job, args.get_flag("logs"));
    }
    Ok(())
}

fn print_job(job: &JobRecord, with_logs: bool) {
    println!(
        "{}  {:<10} {:>3}%  {}  {}",
        job.started_at.format("%Y-%m-%d %H:%M:%S"),
        job.status,
        job.progress.percent(),
        job.job_id,
        job.message
    );
    if let Some(error) = &job.error {
        println!("    error: {error}");
    }
    if with_logs {
        for line in &job.logs {
            println!("    {line}");
        }
    }
}

async fn show_chunks(ctx: &AppContext, args: &ArgMatches) -> Result<()> {
    let window = required(args, "window")?;
    let item = required(args, "item")?;
    let job = ctx.chunk_store().require_job(window, item).await?;

    println!(
        "{}: {:?} chunk {}/{}, {} processed, {} failed, {} remaining",
        job.id(),
        job.status,
        job.current_chunk_index.min(job.frozen_chunks.len()),
        job.frozen_chunks.len(),
        job.processed_keys.len(),
        job.failed_keys.len(),
        job.remaining_keys()
    );
    for chunk in &job.frozen_chunks {
        println!(
            "  #{:<4} {:?} attempts={} keys={}",
            chunk.index,
            chunk.status,
            chunk.attempt_count,
            chunk.keys.len()
        );
    }
    Ok(())
}

async fn warmup(ctx: &AppContext, args: &ArgMatches) -> Result<()> {
    let window = required(args, "window")?;
    let item = required(args, "item")?;
    let path = args
        .get_one::<PathBuf>("keys-file")
        .context("--keys-file is required")?;
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let runner = ChunkedJobRunner::new(ctx.chunk_store());
    let mut job = runner
        .store()
        .initialize_job(window, item, text.lines())
        .await?
        .into_value();

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let result = runner.run_to_completion(&mut job, &demo::DemoFetcher, &cancel).await;
    interrupt.abort();

    match result {
        Ok(summary) => {
            println!(
                "{}: {} keys processed, {} failed in {} ticks",
                job.id(),
                summary.processed_keys,
                summary.failed_keys,
                summary.ticks
            );
            Ok(())
        }
        Err(e) if e.is_cancellation() => {
            println!("{}: interrupted at chunk {}, rerun to resume", job.id(), job.current_chunk_index);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn reset(ctx: &AppContext, args: &ArgMatches) -> Result<()> {
    let target = required(args, "target")?;
    let all = target == "all";
    if all || target == "jobs" {
        ctx.ledger().reset().await?;
    }
    if all || target == "chunks" {
        ctx.chunk_store().clear_all().await?;
    }
    if all || target == "checkpoints" {
        StageCheckpointStore::<serde_json::Value>::new(ctx.storage()).clear_all().await?;
    }
    if all || target == "artifacts" {
        ArtifactCache::new(ctx.storage()).clear().await?;
    }
    println!("Cleared {target}");
    Ok(())
}

async fn ping(ctx: &AppContext) -> Result<()> {
    let created = ctx.ledger().ping().await;
    match created.degraded_reason() {
        None => println!("PONG {}", created.value().job_id),
        Some(reason) => println!("PONG {} (degraded: {reason})", created.value().job_id),
    }
    Ok(())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    match args.get_one::<String>(name) {
        Some(value) => Ok(value.as_str()),
        None => bail!("--{name} is required"),
    }
}
