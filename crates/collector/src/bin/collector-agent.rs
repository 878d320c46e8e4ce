//! collector-agent: runs the task configurations of a TOML file on the
//! worker pool for a while, then prints the collected run statistics.
//!
//! # Usage
//!
//! ```bash
//! # Run config/tasks.toml for a minute
//! collector-agent
//!
//! # Custom task file, shorter run
//! collector-agent --tasks path/to/tasks.toml --run-for 10
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;

use vigil_collector::loaders;
use vigil_collector::{
    Collector, Runner, RunnerCollector, RunnerStats, ScheduleMembership, Task, TaskScheduler,
};
use vigil_core::config::load_dotenv;
use vigil_core::{AgentConfig, TaskConfigFile};

#[derive(Parser, Debug)]
#[command(name = "collector-agent", version, about)]
struct Cli {
    /// Task configuration file (defaults to the VIGIL_TASKS_FILE setting).
    #[arg(long, env = "VIGIL_TASKS_FILE")]
    tasks: Option<PathBuf>,

    /// Seconds to keep dispatching recurring tasks before shutting down.
    #[arg(long, default_value_t = 60)]
    run_for: u64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = AgentConfig::from_env();
    config.log_summary();

    let tasks_file = cli.tasks.unwrap_or_else(|| config.tasks_file.clone());
    let configs = TaskConfigFile::from_file(&tasks_file)
        .with_context(|| format!("loading {}", tasks_file.display()))?
        .tasks;
    tracing::info!(file = %tasks_file.display(), configs = configs.len(), "task configs loaded");

    // ── Wiring ───────────────────────────────────────────────────────
    let stats = Arc::new(RunnerStats::new());
    let runner = Runner::new(&config, stats.clone());
    let collector = RunnerCollector::new(Arc::clone(&runner), stats.clone());
    let scheduler = TaskScheduler::new(collector.clone());
    for loader in loaders::catalog() {
        scheduler.add_loader(loader);
    }

    let ids = scheduler.schedule(&configs);
    tracing::info!(scheduled = ids.len(), workers = runner.num_workers(), "tasks scheduled");

    // ── Cadence ──────────────────────────────────────────────────────
    let recurring: Vec<Arc<dyn Task>> = scheduler
        .get_tasks_from_configs(&configs)
        .into_iter()
        .filter(|t| !t.is_one_shot() && collector.is_scheduled(t.id()))
        .collect();
    dispatch_until(&runner, recurring, Duration::from_secs(cli.run_for))?;

    // ── Report & shutdown ────────────────────────────────────────────
    println!("{}", serde_json::to_string_pretty(&stats.snapshot())?);
    let errors = scheduler.error_stats().snapshot();
    if !errors.loader_errors.is_empty() || !errors.run_errors.is_empty() {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    }

    scheduler.unschedule(&configs);
    collector.stop();
    Ok(())
}

/// Re-dispatch every recurring task on its interval until `run_for` elapses.
fn dispatch_until(runner: &Runner, tasks: Vec<Arc<dyn Task>>, run_for: Duration) -> anyhow::Result<()> {
    let chan = runner.get_chan();
    let start = Instant::now();
    let deadline = start + run_for;
    let mut due: Vec<(Instant, Arc<dyn Task>)> =
        tasks.into_iter().map(|t| (start + t.interval(), t)).collect();

    loop {
        let next = due.iter().map(|(at, _)| *at).min().unwrap_or(deadline).min(deadline);
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        }
        if Instant::now() >= deadline {
            return Ok(());
        }

        for (at, task) in due.iter_mut() {
            if *at <= Instant::now() {
                chan.send(Arc::clone(task))?;
                *at += task.interval();
            }
        }
    }
}
