use crate::config_file::MigrationSettings;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// repo-migrate - apply migration scripts to a repository exactly once
#[derive(Parser, Debug)]
#[command(name = "repo-migrate")]
#[command(about = "Applies ordered migration scripts to a repository, tracked by a journal")]
#[command(version)]
pub struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every script not yet recorded in the journal (default)
    Migrate(SettingsArgs),
    /// List the scripts the next migration would run, without running them
    Pending(SettingsArgs),
    /// Validate a settings file
    Validate {
        /// Path to the settings file
        config: PathBuf,
    },
}

/// Settings flags shared by `migrate` and `pending`.
#[derive(Args, Debug, Default, Clone)]
pub struct SettingsArgs {
    /// JSON settings file; flags below override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory containing migration scripts
    #[arg(short, long)]
    pub scripts_dir: Option<PathBuf>,

    /// Journal file recording executed scripts
    #[arg(short, long)]
    pub journal: Option<PathBuf>,

    /// Repository the scripts run against
    #[arg(short, long)]
    pub target_dir: Option<PathBuf>,

    /// Interpreter used to run each script
    #[arg(short, long)]
    pub interpreter: Option<String>,

    /// Do not commit each script's changes to git
    #[arg(long)]
    pub no_commit: bool,

    /// Substitution variable, replaces $KEY$ in scripts (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_variable)]
    pub variables: Vec<(String, String)>,
}

fn parse_variable(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

impl SettingsArgs {
    /// Load the settings file (if any) and apply flag overrides.
    pub fn resolve(&self) -> Result<MigrationSettings> {
        let mut settings = match &self.config {
            Some(path) => MigrationSettings::load_from_file(path)
                .with_context(|| format!("Failed to load settings file {:?}", path))?,
            None => MigrationSettings::default(),
        };

        if let Some(dir) = &self.scripts_dir {
            settings.scripts_directory = dir.clone();
        }
        if let Some(journal) = &self.journal {
            settings.journal_path = journal.clone();
        }
        if let Some(dir) = &self.target_dir {
            settings.target_directory = dir.clone();
        }
        if let Some(interpreter) = &self.interpreter {
            settings.interpreter = interpreter.clone();
        }
        if self.no_commit {
            settings.commit = false;
        }
        for (key, value) in &self.variables {
            settings.variables.insert(key.clone(), value.clone());
        }

        Ok(settings)
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
