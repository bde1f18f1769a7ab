//! JSON file journal.
//!
//! The journal file holds an array of entries:
//!
//! ```json
//! [
//!   { "scriptName": "001-init.sh" },
//!   { "scriptName": "002-add.sh" }
//! ]
//! ```
//!
//! A missing or blank file is initialised to `[]`. Every append rewrites the
//! whole file through a temporary file in the same directory followed by a
//! rename, so a crash leaves either the old or the new contents.

use crate::cancellation::Cancellation;
use crate::script::Script;
use crate::script_traits::Journal;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Default journal file name
pub const DEFAULT_JOURNAL_FILE: &str = "journal.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JournalEntry {
    #[serde(alias = "ScriptName", alias = "script_name")]
    script_name: String,
}

impl JournalEntry {
    /// Entries are keyed by the exact script name, which must be a plain
    /// file name so it matches what the directory source yields on later runs
    fn for_script(script: &Script) -> Result<Self> {
        let name = script.name();
        if name.is_empty() || name.chars().any(std::path::is_separator) {
            anyhow::bail!(
                "Cannot journal script {:?}: name must be a file name without path separators",
                name
            );
        }
        Ok(Self {
            script_name: name.to_string(),
        })
    }
}

/// Journal persisted as a JSON array of entries.
#[derive(Debug)]
pub struct JsonJournal {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl JsonJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the journal file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file as `[]` if it is missing or blank
    fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            let content = fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read journal {:?}", self.path))?;
            if !content.trim().is_empty() {
                return Ok(());
            }
        } else if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create journal directory {:?}", parent)
                })?;
            }
        }

        tracing::debug!(path = ?self.path, "Initialising empty journal");
        self.write_entries(&[])
    }

    fn read_entries(&self) -> Result<Vec<JournalEntry>> {
        let content = fs::read(&self.path)
            .with_context(|| format!("Failed to read journal {:?}", self.path))?;
        serde_json::from_slice(&content).with_context(|| {
            format!(
                "Failed to parse journal {:?}: expected an array of {{\"scriptName\": ...}} entries",
                self.path
            )
        })
    }

    fn write_entries(&self, entries: &[JournalEntry]) -> Result<()> {
        let json =
            serde_json::to_string_pretty(entries).context("Failed to serialize journal entries")?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary journal in {:?}", dir))?;
        tmp.write_all(json.as_bytes())
            .context("Failed to write temporary journal")?;
        tmp.as_file()
            .sync_all()
            .context("Failed to flush temporary journal")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace journal {:?}", self.path))?;
        Ok(())
    }
}

impl Journal for JsonJournal {
    fn executed_names(&self, cancellation: &Cancellation) -> Result<BTreeSet<String>> {
        cancellation.check()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_exists()?;
        let entries = self.read_entries()?;
        Ok(entries.into_iter().map(|entry| entry.script_name).collect())
    }

    fn mark_executed(&self, script: &Script, _cancellation: &Cancellation) -> Result<()> {
        // Not cancellable: the script has already run and must be recorded
        let entry = JournalEntry::for_script(script)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_exists()?;
        let mut entries = self.read_entries()?;
        entries.push(entry);
        self.write_entries(&entries)?;
        tracing::debug!(script = script.name(), path = ?self.path, "Journal updated");
        Ok(())
    }
}
