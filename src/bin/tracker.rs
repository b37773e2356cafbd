//! tracker CLI: operator interface to chunk dependency tracking.

use std::collections::BTreeSet;
use std::sync::Arc;

use chunk_tracker::config::Config;
use chunk_tracker::config::secrets::ExposeSecret;
use chunk_tracker::db::Db;
use chunk_tracker::model::{DependencyTracking, SchedulingStatus, TrackingKey};
use chunk_tracker::service::DependencyTrackingService;
use chunk_tracker::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};

type Service = DependencyTrackingService<Db>;

#[derive(Parser)]
#[command(name = "tracker", about = "Inspect and repair chunk dependency tracking")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations
    Migrate,
    /// Check database connectivity
    Health,
    /// Tracker counts per sink and status
    Stats,
    /// Show one tracker
    Show {
        /// Tracker key as job/chunk
        key: TrackingKey,
    },
    /// List every tracker of a job
    Job { job_id: i32 },
    /// List blocked chunks, most urgent first
    Blocked {
        #[arg(long)]
        sink: Option<i32>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Force chunks of the given jobs back to an earlier status
    Retransmit {
        #[arg(required = true)]
        job_ids: Vec<i32>,
        #[arg(long, default_value = "queued_for_delivery")]
        from: SchedulingStatus,
        #[arg(long, default_value = "ready_for_delivery")]
        to: SchedulingStatus,
    },
    /// Release blocked chunks whose prerequisites have vanished
    Recheck,
    /// Remove every tracker of a job
    RemoveJob { job_id: i32 },
    /// Delete trackers retained as completed
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "chunk-tracker".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    match cli.command {
        Command::Migrate => {
            println!("Migrations applied.");
            Ok(())
        }
        Command::Health => {
            db.health_check().await?;
            println!("Database OK.");
            Ok(())
        }
        command => {
            let service = DependencyTrackingService::new(Arc::new(db), config.service);
            let loaded = service.init().await?;
            tracing::debug!(loaded, "map warmed");
            run(&service, command).await
        }
    }
}

async fn run(service: &Service, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Stats => cmd_stats(service).await,
        Command::Show { key } => {
            let tracker = service.require(key).await?;
            print_tracker(&tracker);
            Ok(())
        }
        Command::Job { job_id } => {
            let trackers = service.snapshot(job_id).await;
            if trackers.is_empty() {
                println!("No trackers for job {job_id}.");
                return Ok(());
            }
            print_table(&trackers);
            Ok(())
        }
        Command::Blocked { sink, limit } => {
            let keys = service
                .find(SchedulingStatus::Blocked, sink, Some(limit))
                .await;
            for key in &keys {
                if let Some(tracker) = service.get(*key).await {
                    let waiting: Vec<String> =
                        tracker.waiting_on.iter().map(ToString::to_string).collect();
                    println!(
                        "{:<12}  sink {:<6}  pri {:<4}  waiting on {}",
                        key.to_string(),
                        tracker.sink_id,
                        tracker.priority,
                        waiting.join(", ")
                    );
                }
            }
            println!("\n{} blocked chunk(s)", keys.len());
            Ok(())
        }
        Command::Retransmit { job_ids, from, to } => {
            let count = service.reset_status(from, to, &job_ids).await?;
            println!("Reset {count} tracker(s) from {from} to {to}.");
            Ok(())
        }
        Command::Recheck => {
            let repaired = service.recheck_blocks().await?;
            println!("Repaired {} tracker(s).", repaired.len());
            Ok(())
        }
        Command::RemoveJob { job_id } => {
            let removed = service.remove_job(job_id).await?;
            println!("Removed {} tracker(s) of job {job_id}.", removed.len());
            Ok(())
        }
        Command::Purge => {
            let purged = service.purge_completed().await?;
            println!("Purged {} completed tracker(s).", purged.len());
            Ok(())
        }
        Command::Migrate | Command::Health => Ok(()),
    }
}

async fn cmd_stats(service: &Service) -> anyhow::Result<()> {
    let counts = service.status_counts(&BTreeSet::new()).await;
    if counts.is_empty() {
        println!("No trackers.");
        return Ok(());
    }

    println!(
        "{:<6}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}  {:>6}",
        "SINK", "RDY_PRC", "QUE_PRC", "BLOCKED", "RDY_DLV", "QUE_DLV", "DONE", "JOBS"
    );
    println!("{}", "-".repeat(80));
    for (sink, status) in &counts {
        let jobs = service.job_count(*sink).await;
        println!(
            "{:<6}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}  {:>6}",
            sink,
            status.processing.ready,
            status.processing.enqueued,
            status.blocked,
            status.delivering.ready,
            status.delivering.enqueued,
            status.completed,
            jobs.jobs
        );
    }

    // cross-check against the table itself
    let stored: i64 = service
        .map()
        .store()
        .count_by_sink_and_status()
        .await?
        .iter()
        .map(|(_, _, n)| n)
        .sum();
    let cached = service.map().len().await;
    println!("\n{cached} tracker(s) in memory, {stored} in database");
    Ok(())
}

fn print_table(trackers: &[DependencyTracking]) {
    println!(
        "{:<12}  {:<6}  {:<22}  {:<4}  {:<7}  WAITING_ON",
        "KEY", "SINK", "STATUS", "PRI", "RETRIES"
    );
    println!("{}", "-".repeat(80));
    for tracker in trackers {
        println!(
            "{:<12}  {:<6}  {:<22}  {:<4}  {:<7}  {}",
            tracker.key.to_string(),
            tracker.sink_id,
            tracker.status.to_string(),
            tracker.priority,
            tracker.retries,
            tracker.waiting_on.len()
        );
    }
    println!("\n{} tracker(s)", trackers.len());
}

fn print_tracker(tracker: &DependencyTracking) {
    let waiting: Vec<String> = tracker.waiting_on.iter().map(ToString::to_string).collect();
    let keys: Vec<&str> = tracker.match_keys.iter().map(String::as_str).collect();
    println!("Key:         {}", tracker.key);
    println!("Sink:        {}", tracker.sink_id);
    println!("Submitter:   {}", tracker.submitter);
    println!("Status:      {}", tracker.status);
    println!("Priority:    {}", tracker.priority);
    println!("Retries:     {}", tracker.retries);
    println!(
        "Waiting On:  {}",
        if waiting.is_empty() {
            "-".to_string()
        } else {
            waiting.join(", ")
        }
    );
    println!("Match Keys:  {}", keys.join(", "));
    println!("Modified:    {}", tracker.last_modified);
}
