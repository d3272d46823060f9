use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch, Mutex};

use slotbench::bench::{CallJournal, SimFixture, SimProgrammer, SimSocket};
use slotbench::config::{BenchSettings, BoardSettings, SettingsManager};
use slotbench::log_collector::{ensure_logs_dir_exists, get_global_logs_path, LineKind};
use slotbench::orchestrator::CommandOutcome;
use slotbench::{AppError, Bench, BenchPair, CommandRegistry, LogCollector, LogLine, SequenceRunner, Session};

#[derive(Parser, Debug)]
#[command(name = "slotbench", version, about = "Multi-slot test bench sequencer")]
struct Cli {
    /// Settings file (defaults to config/bench.json, then ~/.config/slotbench/bench.json)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    operator: Option<String>,
    #[arg(long)]
    batch: Option<String>,
    #[arg(long, default_value = "")]
    batch_info: String,
    /// Print the session as JSON when the command finishes
    #[arg(long)]
    report: bool,
    /// Also write the session JSON to this file
    #[arg(long)]
    report_out: Option<PathBuf>,
    /// Record debug lines (raw readings, skipped calls) in the logs
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the available commands
    List,
    /// Run one command on the simulated bench
    Run {
        /// Command name as shown by `list`
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging first, so settings problems reach the log files too
    let log_dir = get_global_logs_path().map_err(|e| anyhow!(e))?;
    ensure_logs_dir_exists(&log_dir).map_err(|e| anyhow!(e))?;
    let (console_tx, mut console_rx) = mpsc::channel::<LogLine>(1024);
    let (level, filter) = if cli.verbose {
        (log::Level::Debug, log::LevelFilter::Debug)
    } else {
        (log::Level::Info, log::LevelFilter::Info)
    };
    let collector = LogCollector::new(log_dir, Some(console_tx))
        .map_err(|e| anyhow!(e))?
        .with_max_level(level);
    if let Err(e) = log::set_boxed_logger(Box::new(collector.clone())).map(|()| log::set_max_level(filter)) {
        eprintln!("[Main] WARNING: Failed to set LogCollector as global logger: {}", e);
    }

    let console = tokio::spawn(async move {
        while let Some(line) = console_rx.recv().await {
            match line.kind {
                LineKind::Error | LineKind::Warning => eprintln!("{} {}", line.timestamp, line.message),
                _ => println!("{} {}", line.timestamp, line.message),
            }
        }
    });

    let config_path = SettingsManager::resolve_path(cli.config.as_deref());
    let settings = SettingsManager::load(&config_path).map_err(AppError::from)?;
    let registry = CommandRegistry::for_settings(&settings);

    let result = match cli.command {
        Commands::List => {
            for name in registry.names() {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::Run { ref name } => run_command(&cli, &collector, settings, &registry, name).await,
    };

    let _ = collector.wait_for_empty().await;
    drop(collector);
    console.abort();
    result
}

async fn run_command(
    cli: &Cli,
    collector: &LogCollector,
    settings: BenchSettings,
    registry: &CommandRegistry,
    name: &str,
) -> Result<()> {
    let session = Session::start(
        cli.operator.as_deref().unwrap_or_default(),
        cli.batch.as_deref().unwrap_or_default(),
        &cli.batch_info,
    )
    .map_err(|e| anyhow!(e.user_message()))?;

    let stamp = session.start_time.format("%Y%m%d_%H%M%S");
    collector
        .start_new_session(&format!("{}_{}.log", stamp, session.batch_number))
        .map_err(|e| anyhow!(e))?;
    log::info!(
        "[Main] Session started by {} for batch {}",
        session.operator_name,
        session.batch_number
    );

    let session = Arc::new(Mutex::new(session));
    let bench = build_sim_bench(&settings, &CallJournal::default());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("[Main] Stop requested, finishing the current stage");
            let _ = cancel_tx.send(true);
        }
    });

    let runner = SequenceRunner::new(Arc::new(bench), settings, cancel_rx).with_session(session.clone());
    let outcome = registry
        .run(&runner, name)
        .await
        .map_err(|e| anyhow!(AppError::from(e).user_message()))?;

    match outcome {
        CommandOutcome::Cycle(summary) => println!(
            "{} passed, {} failed, {} unfinished ({} ms)",
            summary.passed, summary.failed, summary.unfinished, summary.duration_ms
        ),
        CommandOutcome::Stage(tally) => println!(
            "{} eligible, {} failed, {} skipped",
            tally.eligible, tally.failed, tally.skipped
        ),
    }

    let session = session.lock().await;
    if cli.report {
        let json = session.to_json().context("Failed to serialize session")?;
        println!("{}", json);
    }
    if let Some(ref path) = cli.report_out {
        session.save(path).map_err(|e| anyhow!(e.user_message()))?;
    }
    Ok(())
}

/// Simulated bench from the configured boards, or a single default board.
fn build_sim_bench(settings: &BenchSettings, journal: &CallJournal) -> Bench {
    let mut boards: Vec<BoardSettings> = settings.enabled_boards().cloned().collect();
    if boards.is_empty() {
        boards.push(BoardSettings {
            programmer_serial: "SIM-0".to_string(),
            ..BoardSettings::default()
        });
    }

    let pairs = boards
        .iter()
        .enumerate()
        .map(|(i, board)| {
            let mut fixture = SimFixture::new(format!("fixture-{}", i + 1), journal.clone());
            for slot in 1..=settings.slots_per_bank {
                fixture = fixture.with_socket(slot, SimSocket::healthy(&format!("{:08X}{:08X}", i + 1, slot)));
            }
            let programmer = SimProgrammer::new(board.programmer_serial.clone(), journal.clone());
            BenchPair::new(Box::new(fixture), Box::new(programmer)).with_dut_numbers(board.dut_numbers.clone())
        })
        .collect();

    Bench::new(pairs)
}
