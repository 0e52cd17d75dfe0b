use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use nightshift::artifacts::ArtifactStore;
use nightshift::cli::{Cli, Commands, RunArgs};
use nightshift::config::Config;
use nightshift::cycle::CycleStatus;
use nightshift::memory::MemoryLog;
use nightshift::notify::Notifier;
use nightshift::report::Reporter;
use nightshift::scheduler::{RunSummary, Scheduler};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nightshift")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("nightshift.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_loop(args: &RunArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);

    let scheduler = Scheduler::new(config);

    // Coarse cancellation: Ctrl-C stops the loop between cycles.
    let interrupt = scheduler.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "interrupt received; finishing the current cycle".yellow());
            interrupt.store(true, Ordering::Release);
        }
    });

    let summary = scheduler.run().await.context("Run failed")?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("{} {}", "Run complete:".green(), summary.run_id);
    for cycle in &summary.cycles {
        let status = match cycle.status {
            CycleStatus::Succeeded => cycle.status.as_str().green(),
            CycleStatus::TestsFailed => cycle.status.as_str().yellow(),
            _ => cycle.status.as_str().red(),
        };
        let pr = cycle
            .publication
            .pr_number
            .map(|n| format!(" PR #{}", n))
            .unwrap_or_default();
        println!(
            "  {} [{}] {}{} ({})",
            cycle.id,
            status,
            cycle.branch().unwrap_or("-"),
            pr,
            cycle.publication.outcome.as_str()
        );
    }
}

async fn run_baseline(config: Config) -> Result<()> {
    let memory = MemoryLog::new(config.storage.log_root.join("memory.jsonl"));
    let notifier = Notifier::new(config.notify.endpoint.clone());
    let scheduler = Scheduler::new(config);

    scheduler.baseline(&notifier, &memory).await.context("Baseline check failed")?;
    println!("{}", "Baseline check passed".green());
    Ok(())
}

fn rebuild_report(run_id: &str, config: &Config) -> Result<()> {
    let store = ArtifactStore::open(config.storage.log_root.join(run_id))
        .context(format!("No artifacts found for {}", run_id))?;
    let reporter = Reporter::new(&store);
    let cycles = reporter.load_cycles().context("Failed to load cycle records")?;
    if cycles.is_empty() {
        println!("{} {}", "No cycle records found for".yellow(), run_id);
        return Ok(());
    }
    let report = reporter.write_run_report(run_id, &cycles).context("Failed to write report")?;
    let plan = reporter
        .write_next_session_plan(run_id, &cycles)
        .context("Failed to write next-session plan")?;
    println!("{} {}", "Report:".green(), report.display());
    println!("{} {}", "Next session plan:".green(), plan.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => run_loop(&RunArgs::default(), config).await,
        Some(Commands::Run(args)) => run_loop(args, config).await,
        Some(Commands::Baseline) => run_baseline(config).await,
        Some(Commands::Report { run_id }) => rebuild_report(run_id, &config),
    }
}
