//! companion-daemon: watches a coding agent from the outside.
//!
//! Supervises the agent's memory footprint, resolves its layered
//! configuration, and reconstructs live session state from lifecycle events
//! pushed over a local socket (or mined from transcripts when nothing is
//! pushed). State is published as a JSON status file for UI clients.
//!
//! ## Subcommands
//!
//! - `run`: Start all engines and block until SIGINT/SIGTERM
//! - `config`: Print the effective configuration for a project
//! - `target`: Print the agent process the supervisor would track

mod bridge;
mod companion;
mod hub;
mod logging;
mod monitor;
mod settings;
mod status;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use serde_json::json;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

use companion_core::process::find_target;
use companion_core::{
    validate, ConfigDocument, ConfigResolver, MemorySampler, SysinfoProcessSource,
};

use companion::Companion;
use settings::CompanionSettings;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const EXIT_NO_CONFIG: i32 = 2;

#[derive(Parser)]
#[command(name = "companion-daemon")]
#[command(about = "Memory, configuration and session companion for a coding agent")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $COMPANION_SETTINGS, then the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the companion until interrupted
    Run {
        /// Project root whose configuration layers are tracked (defaults to cwd)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,
    },

    /// Resolve and validate the agent configuration
    Config {
        /// Project root (defaults to cwd)
        #[arg(long, value_name = "DIR")]
        project: Option<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the agent process that would be supervised
    Target,
}

fn main() {
    let cli = Cli::parse();

    let (mut settings, load_error) = match settings::load_settings(cli.settings.as_deref()) {
        Ok(settings) => (settings, None),
        Err(err) => (CompanionSettings::default(), Some(err)),
    };
    let fixes = settings.sanitize();

    let log_dir = match &cli.command {
        Commands::Run { .. } => settings.log_directory(),
        _ => None,
    };
    let guard = logging::init(log_dir.as_deref());

    if let Some(err) = load_error {
        warn!(error = %err, "Failed to load settings; using defaults");
    }
    for fix in fixes {
        warn!("{}", fix);
    }

    let code = match cli.command {
        Commands::Run { project } => run(&settings, project),
        Commands::Config { project, json } => show_config(&settings, project, json),
        Commands::Target => show_target(&settings),
    };

    drop(guard);
    std::process::exit(code);
}

fn project_root(project: Option<PathBuf>) -> Option<PathBuf> {
    project.or_else(|| env::current_dir().ok())
}

fn run(settings: &CompanionSettings, project: Option<PathBuf>) -> i32 {
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, Arc::clone(&shutdown)) {
            error!(error = %err, signal, "Failed to register signal handler");
            return 1;
        }
    }

    let companion = match Companion::start(settings, project_root(project)) {
        Ok(companion) => companion,
        Err(err) => {
            error!(error = %err, "Failed to start companion");
            return 1;
        }
    };

    let status_path = settings.status_path();
    let status_interval = settings.status_interval();
    let mut next_status = Instant::now();

    while !shutdown.load(Ordering::SeqCst) {
        if Instant::now() >= next_status {
            if let Some(path) = &status_path {
                publish_status(path, &companion);
            }
            next_status = Instant::now() + status_interval;
        }
        thread::sleep(SHUTDOWN_POLL);
    }

    info!("Shutdown requested");
    companion.stop();
    if let Some(path) = &status_path {
        let _ = fs_err::remove_file(path);
    }
    0
}

fn publish_status(path: &Path, companion: &Companion) {
    if let Err(err) = status::write_status_file(path, &companion.status()) {
        warn!(error = %err, path = %path.display(), "Failed to publish status");
    }
}

fn show_config(settings: &CompanionSettings, project: Option<PathBuf>, as_json: bool) -> i32 {
    let root = project_root(project);
    let resolver = ConfigResolver::for_agent(settings.agent.name.clone());
    let report = resolver.resolve_report(root.as_deref());
    let validation = report.document.as_ref().map(validate);
    let document = report.document.as_ref().map(ConfigDocument::redacted);

    if as_json {
        let payload = json!({
            "project_root": &root,
            "document": &document,
            "layers": &report.layers,
            "skipped": &report.skipped,
            "validation": &validation,
        });
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                error!(error = %err, "Failed to serialize configuration");
                return 1;
            }
        }
    } else {
        for layer in &report.layers {
            println!("layer {}  {}", layer.priority, layer.path.display());
        }
        for failure in &report.skipped {
            println!(
                "skipped  {}  ({})",
                failure.source.path.display(),
                failure.reason
            );
        }
        if let Some(document) = &document {
            match serde_json::to_string_pretty(document) {
                Ok(text) => println!("{}", text),
                Err(err) => error!(error = %err, "Failed to serialize configuration"),
            }
        }
        if let Some(validation) = &validation {
            for message in &validation.errors {
                println!("error: {}", message);
            }
        }
    }

    if report.document.is_some() {
        return 0;
    }
    if !as_json {
        println!("no {} configuration found", settings.agent.name);
    }
    EXIT_NO_CONFIG
}

fn show_target(settings: &CompanionSettings) -> i32 {
    let source = SysinfoProcessSource::new();
    match find_target(&source, &settings.target_matcher()) {
        Some(process) => {
            let memory_mb = source.sample_mb(process.pid);
            println!(
                "{}  pid {}  {} MB  {}",
                process.name, process.pid, memory_mb, process.command_line
            );
            0
        }
        None => {
            println!("{} is not running", settings.agent.name);
            1
        }
    }
}
