use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use ward_tour::config::Config;
use ward_tour::logging;
use ward_tour::sim::{SimTiming, SimulatedDashboard};
use ward_tour::{
    data_ready_channel, AnchorRegistry, CompletionStore, FileCompletionStore,
    MemoryCompletionStore, Notice, ReadinessGate, StepCatalog, TourController, TourPorts,
    TourSettings, TourSnapshot, TourState,
};

#[derive(Parser)]
#[command(name = "ward-tour")]
#[command(about = "Guided walkthrough orchestration for the ward statistics dashboard")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tour headless against a simulated dashboard
    Run {
        /// Viewport width in pixels (selects the compact or expanded catalog)
        #[arg(short, long, default_value_t = 1280)]
        width: u32,

        /// Anchors the simulated page never renders
        #[arg(short, long)]
        missing: Vec<String>,

        /// How long the simulated user reads each step before clicking next
        #[arg(long, default_value_t = 500)]
        dwell_ms: u64,

        /// Skip the tour when this step index is reached
        #[arg(long)]
        skip_at: Option<usize>,

        /// Neither read nor write the completion record
        #[arg(long)]
        ignore_completion: bool,

        /// Print snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Print the step catalog for a viewport
    Steps {
        #[arg(short, long, default_value_t = 1280)]
        width: u32,

        #[arg(long)]
        json: bool,
    },

    /// Show the completion record
    Status,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (needed for logging setup)
    let config = Config::load(cli.config.as_deref())?;
    let logging_handle = logging::init_logging(&config, cli.debug)?;
    if let Some(path) = &logging_handle.log_file_path {
        info!(path = %path.display(), "logging to file");
    }

    match cli.command {
        Commands::Run {
            width,
            missing,
            dwell_ms,
            skip_at,
            ignore_completion,
            json,
        } => {
            let options = RunOptions {
                width,
                missing,
                dwell: Duration::from_millis(dwell_ms),
                skip_at,
                ignore_completion,
                json,
            };
            cmd_run(&config, options).await?;
        }
        Commands::Steps { width, json } => {
            cmd_steps(&config, width, json)?;
        }
        Commands::Status => {
            cmd_status(&config)?;
        }
    }

    Ok(())
}

struct RunOptions {
    width: u32,
    missing: Vec<String>,
    dwell: Duration,
    skip_at: Option<usize>,
    ignore_completion: bool,
    json: bool,
}

async fn cmd_run(config: &Config, options: RunOptions) -> Result<()> {
    let catalog = StepCatalog::for_viewport(options.width, config.catalog.compact_breakpoint_px);
    info!(width = options.width, layout = ?catalog.layout(), "catalog selected");

    let store: Arc<dyn CompletionStore> = if options.ignore_completion {
        Arc::new(MemoryCompletionStore::new())
    } else {
        Arc::new(FileCompletionStore::new(config.completion_path()))
    };

    let registry = Arc::new(AnchorRegistry::with_body());
    let dashboard = SimulatedDashboard::new(
        registry.clone(),
        &catalog,
        options.missing,
        SimTiming::default(),
    );
    let (notifier, signal) = data_ready_channel();

    if ReadinessGate::new(store.clone(), signal.clone()).is_completed() {
        println!("Tour already completed; run with --ignore-completion to replay it.");
        return Ok(());
    }

    let handle = TourController::spawn(
        TourSettings::from_config(&config.tour),
        catalog,
        TourPorts {
            ui: Arc::new(dashboard.clone()),
            dom: registry,
            store,
            data: signal,
        },
    );

    let json = options.json;
    handle.on_state_change(move |snapshot| print_snapshot(snapshot, json));

    handle.start();
    dashboard.load_data(notifier);

    let mut snapshots = handle.subscribe();
    let mut acted_on = None;
    let outcome = loop {
        snapshots
            .changed()
            .await
            .context("Tour controller stopped unexpectedly")?;
        let snapshot = snapshots.borrow_and_update().clone();

        match snapshot.state {
            TourState::Active(index) if snapshot.revealed && acted_on != Some(index) => {
                acted_on = Some(index);
                if options.skip_at == Some(index) {
                    handle.skip();
                } else {
                    let user = handle.clone();
                    let dwell = options.dwell;
                    tokio::spawn(async move {
                        tokio::time::sleep(dwell).await;
                        user.next();
                    });
                }
            }
            TourState::Finished | TourState::Skipped => break snapshot,
            TourState::Idle if snapshot.notice == Some(Notice::DataUnavailable) => {
                break snapshot
            }
            _ => {}
        }
    };
    handle.shutdown();

    if !json {
        println!();
        match outcome.state {
            TourState::Finished => println!("Tour finished."),
            TourState::Skipped => println!("Tour skipped at step {}.", outcome.step_index + 1),
            _ => println!("Dashboard data never loaded; tour not started."),
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &TourSnapshot, json: bool) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Failed to serialize snapshot: {e}"),
        }
        return;
    }

    let state = match snapshot.state {
        TourState::Idle => "idle".to_string(),
        TourState::Preparing => "waiting for data".to_string(),
        TourState::Active(_) if snapshot.revealed => "showing".to_string(),
        TourState::Active(_) => "locating anchor".to_string(),
        TourState::Paused(_) => "waiting for transition".to_string(),
        TourState::Finished => "finished".to_string(),
        TourState::Skipped => "skipped".to_string(),
    };

    match (snapshot.progress(), &snapshot.step) {
        (Some((position, total)), Some(step)) => {
            println!("[{position}/{total}] {:<24} {:<22} {state}", step.title, step.anchor);
        }
        _ => println!("{state}"),
    }

    if let Some(Notice::StepSkipped(id)) = snapshot.notice {
        if snapshot.revealed {
            println!("         (skipped {id:?}: anchor never appeared)");
        }
    }
}

fn cmd_steps(config: &Config, width: u32, json: bool) -> Result<()> {
    let catalog = StepCatalog::for_viewport(width, config.catalog.compact_breakpoint_px);

    if json {
        let output =
            serde_json::to_string_pretty(&catalog).context("Failed to serialize catalog")?;
        println!("{output}");
        return Ok(());
    }

    println!("Layout: {:?} ({} steps)", catalog.layout(), catalog.len());
    println!();
    for (index, step) in catalog.steps().iter().enumerate() {
        let requires = match step.required_ui_state {
            Some(state) if state.panel_open => format!("panel, section {}", state.active_section),
            Some(_) => "panel closed".to_string(),
            None => "-".to_string(),
        };
        let animated = if step.causes_transition { " *" } else { "" };
        println!(
            "{:>2}. {:<16} {:<22} {:<18}{animated}",
            index + 1,
            step.title,
            step.anchor,
            requires
        );
    }
    println!();
    println!("* moving to or from this step waits for an animation");
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = FileCompletionStore::new(config.completion_path());
    let record = store.load()?;

    println!("Completion record: {}", store.path().display());
    match (record.completed, record.completed_at) {
        (true, Some(at)) => println!("Status: completed at {}", at.to_rfc3339()),
        (true, None) => println!("Status: completed"),
        (false, _) => println!("Status: not completed"),
    }
    Ok(())
}
