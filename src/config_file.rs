//! Migration settings: loading, saving, validation and engine wiring.
//!
//! Settings come from an optional JSON file and are then overridden by
//! command-line flags (see `cli`).
//!
//! ```json
//! {
//!   "scriptsDirectory": "./scripts",
//!   "journalPath": "./journal.json",
//!   "targetDirectory": "/srv/repo",
//!   "interpreter": "bash",
//!   "commit": true,
//!   "variables": { "BRANCH": "main" }
//! }
//! ```

use crate::directory_source::{DEFAULT_SCRIPTS_DIR, DirectoryScriptSource};
use crate::engine::{MigrationConfiguration, MigrationEngine};
use crate::git_commit::GitCommitPostExecutor;
use crate::journal::{DEFAULT_JOURNAL_FILE, JsonJournal};
use crate::preprocessors::{RepositoryDirectoryPreprocessor, VariableSubstitutionPreprocessor};
use crate::script_runner::{DEFAULT_INTERPRETER, ShellScriptExecutor};
use crate::script_traits::ScriptPreprocessor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything needed to wire a migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MigrationSettings {
    /// Directory holding the migration scripts
    pub scripts_directory: PathBuf,
    /// JSON journal file
    pub journal_path: PathBuf,
    /// Repository the scripts run against
    pub target_directory: PathBuf,
    /// Interpreter invoked on each script file
    pub interpreter: String,
    /// Commit each script's changes to git in the target directory
    pub commit: bool,
    /// `$NAME$` substitutions applied to script content
    pub variables: BTreeMap<String, String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            scripts_directory: PathBuf::from(DEFAULT_SCRIPTS_DIR),
            journal_path: PathBuf::from(DEFAULT_JOURNAL_FILE),
            target_directory: PathBuf::from("."),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            commit: true,
            variables: BTreeMap::new(),
        }
    }
}

impl MigrationSettings {
    /// Save settings to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize settings to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write settings to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load settings from a JSON file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let settings: Self =
            serde_json::from_str(&content).context("Failed to parse settings JSON")?;

        Ok(settings)
    }

    /// Check that the settings describe a runnable migration
    pub fn validate(&self) -> Result<()> {
        if !self.scripts_directory.is_dir() {
            anyhow::bail!(
                "Scripts directory does not exist: {}",
                self.scripts_directory.display()
            );
        }

        if !self.target_directory.is_dir() {
            anyhow::bail!(
                "Target directory does not exist: {}",
                self.target_directory.display()
            );
        }

        if self.journal_path.as_os_str().is_empty() {
            anyhow::bail!("Journal path must be specified");
        }
        if self.journal_path.is_dir() {
            anyhow::bail!(
                "Journal path is a directory: {}",
                self.journal_path.display()
            );
        }

        if self.interpreter.trim().is_empty() {
            anyhow::bail!("Interpreter must be specified");
        }

        for name in self.variables.keys() {
            if name.is_empty() {
                anyhow::bail!("Variable names cannot be empty");
            }
            if name.contains('$') {
                anyhow::bail!("Variable name cannot contain '$': {}", name);
            }
        }

        Ok(())
    }

    /// Preprocessor stages implied by these settings
    pub fn preprocessors(&self) -> Vec<Box<dyn ScriptPreprocessor>> {
        let mut stages: Vec<Box<dyn ScriptPreprocessor>> = vec![Box::new(
            RepositoryDirectoryPreprocessor::new(absolute(&self.target_directory)),
        )];
        if !self.variables.is_empty() {
            stages.push(Box::new(VariableSubstitutionPreprocessor::new(
                self.variables.clone(),
            )));
        }
        stages
    }

    /// Wire the directory source, JSON journal, shell executor, preprocessors
    /// and (when `commit` is set) the git post-executor into an engine.
    pub fn build_engine(&self) -> MigrationEngine {
        let configuration = MigrationConfiguration::new(
            JsonJournal::new(&self.journal_path),
            ShellScriptExecutor::new(self.interpreter.trim()),
        )
        .with_source(DirectoryScriptSource::new(&self.scripts_directory))
        .with_preprocessors(self.preprocessors());

        let configuration = if self.commit {
            configuration.with_post_executor(GitCommitPostExecutor::new(&self.target_directory))
        } else {
            configuration
        };

        MigrationEngine::new(configuration)
    }
}

/// Absolute form of `path`, falling back to `path` if the working directory
/// is unavailable
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
