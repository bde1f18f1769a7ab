//! Script source backed by a directory of files.

use crate::cancellation::Cancellation;
use crate::script::Script;
use crate::script_traits::ScriptSource;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default scripts directory, relative to the working directory
pub const DEFAULT_SCRIPTS_DIR: &str = "scripts";

/// Yields one script per regular file directly inside `directory`.
///
/// Subdirectories are ignored. A script is named by its path relative to
/// `directory`, which for top-level files is the file name.
#[derive(Debug, Clone)]
pub struct DirectoryScriptSource {
    directory: PathBuf,
}

impl DirectoryScriptSource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read_script(&self, path: &Path) -> Result<Script> {
        let name = path
            .strip_prefix(&self.directory)
            .unwrap_or(path)
            .to_str()
            .with_context(|| format!("Script file name is not valid UTF-8: {:?}", path))?
            .to_string();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {:?}", path))?;
        Ok(Script::new(name, content))
    }
}

impl ScriptSource for DirectoryScriptSource {
    fn get_scripts(&self, cancellation: &Cancellation) -> Result<Vec<Script>> {
        let entries = fs::read_dir(&self.directory).with_context(|| {
            format!("Failed to read scripts directory {:?}", self.directory)
        })?;

        let mut scripts = Vec::new();
        for entry in entries {
            cancellation.check()?;
            let entry = entry.with_context(|| {
                format!("Failed to list scripts directory {:?}", self.directory)
            })?;
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to stat {:?}", entry.path()))?;
            // Symlinks are followed; anything that is not a file is skipped
            let is_file = file_type.is_file() || (file_type.is_symlink() && entry.path().is_file());
            if !is_file {
                tracing::trace!(path = ?entry.path(), "Skipping non-file entry");
                continue;
            }
            scripts.push(self.read_script(&entry.path())?);
        }

        tracing::debug!(
            directory = ?self.directory,
            count = scripts.len(),
            "Loaded scripts from directory"
        );
        Ok(scripts)
    }
}
