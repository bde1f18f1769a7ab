//! Test doubles shared by the integration tests.
//!
//! Every double is a cheap handle over shared state so a test can hand one
//! clone to the engine and inspect another afterwards.

#![allow(dead_code)]

use anyhow::{Result, bail};
use repomigrate::{
    Cancellation, Journal, MigrationConfiguration, PostScriptExecutor, Script, ScriptExecutor,
    ScriptSource,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Ordered record of collaborator calls, e.g. `execute:001`, `journal:001`.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Script names of events with the given prefix, in order
    pub fn names(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&format!("{prefix}:")).map(str::to_string))
            .collect()
    }
}

pub fn scripts(names: &[&str]) -> Vec<Script> {
    names
        .iter()
        .map(|name| Script::new(*name, format!("echo {name}")))
        .collect()
}

/// Source returning a fixed list of scripts
#[derive(Clone)]
pub struct StubSource {
    scripts: Vec<Script>,
}

impl StubSource {
    pub fn new(names: &[&str]) -> Self {
        Self {
            scripts: scripts(names),
        }
    }
}

impl ScriptSource for StubSource {
    fn get_scripts(&self, _cancellation: &Cancellation) -> Result<Vec<Script>> {
        Ok(self.scripts.clone())
    }
}

/// Source that always fails
pub struct FailingSource;

impl ScriptSource for FailingSource {
    fn get_scripts(&self, _cancellation: &Cancellation) -> Result<Vec<Script>> {
        bail!("scripts directory unreadable")
    }
}

#[derive(Default)]
struct JournalState {
    names: BTreeSet<String>,
    fail_read: bool,
    fail_write_on: Option<String>,
}

/// In-memory journal
#[derive(Clone, Default)]
pub struct MemoryJournal {
    state: Arc<Mutex<JournalState>>,
    log: EventLog,
}

impl MemoryJournal {
    pub fn new(log: &EventLog) -> Self {
        Self {
            state: Arc::default(),
            log: log.clone(),
        }
    }

    pub fn with_entries(self, names: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .names
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn failing_read(self) -> Self {
        self.state.lock().unwrap().fail_read = true;
        self
    }

    pub fn failing_write_on(self, name: &str) -> Self {
        self.state.lock().unwrap().fail_write_on = Some(name.to_string());
        self
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().names.clone()
    }
}

impl Journal for MemoryJournal {
    fn executed_names(&self, _cancellation: &Cancellation) -> Result<BTreeSet<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_read {
            bail!("journal corrupted");
        }
        Ok(state.names.clone())
    }

    fn mark_executed(&self, script: &Script, _cancellation: &Cancellation) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_write_on.as_deref() == Some(script.name()) {
            bail!("disk full");
        }
        state.names.insert(script.name().to_string());
        self.log.push(format!("journal:{}", script.name()));
        Ok(())
    }
}

/// Executor that records calls and fails scripts whose name contains a marker
#[derive(Clone, Default)]
pub struct RecordingExecutor {
    log: EventLog,
    fail_marker: Option<String>,
    contents: Arc<Mutex<Vec<String>>>,
    cancel_after: Option<String>,
}

impl RecordingExecutor {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            ..Default::default()
        }
    }

    /// Fail every script whose name contains `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Request cancellation after successfully executing `name`
    pub fn cancelling_after(mut self, name: &str) -> Self {
        self.cancel_after = Some(name.to_string());
        self
    }

    /// Content of every script executed, in order
    pub fn contents(&self) -> Vec<String> {
        self.contents.lock().unwrap().clone()
    }
}

impl ScriptExecutor for RecordingExecutor {
    fn execute(&self, script: &Script, cancellation: &Cancellation) -> Result<()> {
        self.log.push(format!("execute:{}", script.name()));
        self.contents.lock().unwrap().push(script.content().to_string());
        if let Some(marker) = &self.fail_marker {
            if script.name().contains(marker.as_str()) {
                bail!("script {} exited with code 1", script.name());
            }
        }
        if self.cancel_after.as_deref() == Some(script.name()) {
            cancellation.cancel();
        }
        Ok(())
    }
}

/// Executor that stops with the cancellation marker, like an interpreter
/// killed mid-script
pub struct CancelledExecutor;

impl ScriptExecutor for CancelledExecutor {
    fn execute(&self, _script: &Script, cancellation: &Cancellation) -> Result<()> {
        cancellation.cancel();
        cancellation.check()?;
        Ok(())
    }
}

/// Post-executor that records calls and optionally fails on one script
#[derive(Clone, Default)]
pub struct CountingPostExecutor {
    log: EventLog,
    fail_on: Option<String>,
}

impl CountingPostExecutor {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            fail_on: None,
        }
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.fail_on = Some(name.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.log.names("post").len()
    }
}

impl PostScriptExecutor for CountingPostExecutor {
    fn execute(&self, script: &Script, _cancellation: &Cancellation) -> Result<()> {
        self.log.push(format!("post:{}", script.name()));
        if self.fail_on.as_deref() == Some(script.name()) {
            bail!("nothing to commit");
        }
        Ok(())
    }
}

/// Doubles wired into a configuration, plus handles to inspect them.
pub struct Harness {
    pub log: EventLog,
    pub journal: MemoryJournal,
    pub executor: RecordingExecutor,
    pub post: CountingPostExecutor,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            journal: MemoryJournal::new(&log),
            executor: RecordingExecutor::new(&log),
            post: CountingPostExecutor::new(&log),
            log,
        }
    }

    /// Configuration using this harness's doubles and one stub source per entry
    pub fn configuration(&self, sources: &[&[&str]]) -> MigrationConfiguration {
        sources.iter().fold(
            MigrationConfiguration::new(self.journal.clone(), self.executor.clone())
                .with_post_executor(self.post.clone()),
            |config, names| config.with_source(StubSource::new(names)),
        )
    }
}
