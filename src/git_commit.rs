//! Post-executor that commits each script's changes to git.

use crate::cancellation::Cancellation;
use crate::script::Script;
use crate::script_runner::run_supervised;
use crate::script_traits::PostScriptExecutor;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Commit message recorded for `script`
pub fn commit_message(script: &Script) -> String {
    format!("chore: apply migration script `{}`", script.name())
}

/// Stages every change in the target repository and commits it.
///
/// A script that changed nothing produces no commit; that is not an error.
#[derive(Debug, Clone)]
pub struct GitCommitPostExecutor {
    target_directory: PathBuf,
}

impl GitCommitPostExecutor {
    pub fn new(target_directory: impl Into<PathBuf>) -> Self {
        Self {
            target_directory: target_directory.into(),
        }
    }

    pub fn target_directory(&self) -> &Path {
        &self.target_directory
    }

    fn git(&self, args: &[&str], script: &Script, cancellation: &Cancellation) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(self.target_directory());
        let label = format!("git {} ({})", args[0], script.name());
        let output = run_supervised(&mut cmd, &label, cancellation)?;
        output.ensure_success(&label)?;
        Ok(output.stdout)
    }
}

impl PostScriptExecutor for GitCommitPostExecutor {
    fn execute(&self, script: &Script, cancellation: &Cancellation) -> Result<()> {
        info!("Committing staged and un-staged files.");
        self.git(&["add", "--all"], script, cancellation)
            .context("Failed to stage changes")?;

        let status = self
            .git(&["status", "--porcelain"], script, cancellation)
            .context("Failed to read repository status")?;
        if status.trim().is_empty() {
            debug!(script = script.name(), "No changes to commit");
            return Ok(());
        }

        let message = commit_message(script);
        self.git(&["commit", "--quiet", "-m", &message], script, cancellation)
            .context("Failed to commit changes")?;
        Ok(())
    }
}
