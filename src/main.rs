//! repo-migrate - command-line entry point
//!
//! Wires the directory source, JSON journal, shell executor and git commit
//! step into a migration engine and reports how far the run got.

use anyhow::Result;
use repomigrate::cli::{Cli, Commands, SettingsArgs};
use repomigrate::{Cancellation, MigrationSettings, ProcessGuard, process_guard};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code when the run was cancelled (128 + SIGINT)
const EXIT_CANCELLED: u8 = 130;

/// Initialize logging; RUST_LOG overrides the default level
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!("CLI arguments parsed");

    let result = match cli.command {
        Some(Commands::Validate { config }) => validate(&config),
        Some(Commands::Pending(args)) => pending(&args),
        Some(Commands::Migrate(args)) => migrate(&args),
        None => migrate(&SettingsArgs::default()),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            eprintln!("✗ {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn validate(path: &std::path::Path) -> Result<ExitCode> {
    info!("Validating settings file: {:?}", path);
    let settings = MigrationSettings::load_from_file(path)?;
    settings.validate()?;
    println!("✓ Settings file is valid: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn pending(args: &SettingsArgs) -> Result<ExitCode> {
    let settings = args.resolve()?;
    settings.validate()?;

    let engine = settings.build_engine();
    let scripts = engine.pending_scripts(&Cancellation::new())?;

    if scripts.is_empty() {
        println!("No pending scripts");
    } else {
        println!("{} pending script(s):", scripts.len());
        for script in &scripts {
            println!("  - {}", script.name());
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn migrate(args: &SettingsArgs) -> Result<ExitCode> {
    let settings = args.resolve()?;
    settings.validate()?;
    debug!(?settings, "Resolved settings");

    let cancellation = Cancellation::new();
    if let Err(e) = process_guard::init_signal_handlers(cancellation.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    // Terminates any child still running when main returns
    let _guard = ProcessGuard::new();

    let engine = settings.build_engine();
    let result = engine.perform_migration(&cancellation);

    print!("{}", result.summary());

    let code = match result.failure_cause() {
        None => ExitCode::SUCCESS,
        Some(cause) if cause.is_cancelled() => ExitCode::from(EXIT_CANCELLED),
        Some(_) => ExitCode::FAILURE,
    };
    Ok(code)
}
