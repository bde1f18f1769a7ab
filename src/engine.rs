//! Migration engine
//!
//! Runs every script that the journal has not seen yet, one at a time, in
//! ordinal name order, and records each one before moving on.
//!
//! # Run Protocol
//!
//! ```text
//! Running
//!   ↓
//! read sources ─→ reject duplicate names ─→ read journal ─→ sort ─→ subtract
//!   ↓
//! for each pending script:
//!   cancelled? ─→ preprocess ─→ execute ─→ journal ─→ post-execute
//!   ↓
//! Succeeded | Failed
//! ```
//!
//! # Invariants
//!
//! - A journaled name is never executed again
//! - A script is journaled only after its executor call succeeds and before
//!   its post-executor call
//! - `scripts_executed` is always a prefix of the planned order
//! - Exactly one terminal status is published per run, and it is the last

use crate::cancellation::Cancellation;
use crate::error::{MigrationError, is_cancellation};
use crate::pipeline::PreprocessorPipeline;
use crate::script::Script;
use crate::script_traits::{
    Journal, NoopPostScriptExecutor, PostScriptExecutor, ScriptExecutor, ScriptPreprocessor,
    ScriptSource,
};
use crate::status::{MigrationStatus, StatusStream};
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::thread;
use tracing::{debug, info, warn};

/// Collaborators a `MigrationEngine` is built from.
pub struct MigrationConfiguration {
    sources: Vec<Box<dyn ScriptSource>>,
    journal: Box<dyn Journal>,
    pipeline: PreprocessorPipeline,
    executor: Box<dyn ScriptExecutor>,
    post_executor: Box<dyn PostScriptExecutor>,
}

impl MigrationConfiguration {
    /// Start a configuration from the two mandatory collaborators.
    ///
    /// No sources, no preprocessors and a no-op post-executor until added.
    pub fn new(journal: impl Journal + 'static, executor: impl ScriptExecutor + 'static) -> Self {
        Self {
            sources: Vec::new(),
            journal: Box::new(journal),
            pipeline: PreprocessorPipeline::empty(),
            executor: Box::new(executor),
            post_executor: Box::new(NoopPostScriptExecutor),
        }
    }

    /// Add a script source
    pub fn with_source(mut self, source: impl ScriptSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Replace the preprocessor stages
    pub fn with_preprocessors(mut self, stages: Vec<Box<dyn ScriptPreprocessor>>) -> Self {
        self.pipeline = PreprocessorPipeline::new(stages);
        self
    }

    /// Replace the post-executor
    pub fn with_post_executor(mut self, post_executor: impl PostScriptExecutor + 'static) -> Self {
        self.post_executor = Box::new(post_executor);
        self
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn pipeline(&self) -> &PreprocessorPipeline {
        &self.pipeline
    }
}

/// Outcome of one migration run.
#[derive(Debug)]
pub struct MigrationResult {
    scripts_executed: Vec<Script>,
    failure: Option<MigrationError>,
}

impl MigrationResult {
    fn success(scripts_executed: Vec<Script>) -> Self {
        Self {
            scripts_executed,
            failure: None,
        }
    }

    fn failure(scripts_executed: Vec<Script>, cause: MigrationError) -> Self {
        Self {
            scripts_executed,
            failure: Some(cause),
        }
    }

    /// Scripts that were executed and journaled, in execution order.
    ///
    /// These are the planned scripts, before preprocessing.
    pub fn scripts_executed(&self) -> &[Script] {
        &self.scripts_executed
    }

    /// Names of the executed scripts, in execution order
    pub fn executed_names(&self) -> Vec<&str> {
        self.scripts_executed.iter().map(Script::name).collect()
    }

    /// Why the run stopped early, if it did
    pub fn failure_cause(&self) -> Option<&MigrationError> {
        self.failure.as_ref()
    }

    /// Returns true if the run processed every pending script
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Operator-facing report of how far the run got.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let count = self.scripts_executed.len();
        let noun = if count == 1 { "script" } else { "scripts" };

        match &self.failure {
            None => {
                let _ = writeln!(out, "Migration succeeded: {count} {noun} executed");
            }
            Some(cause) => {
                let _ = writeln!(
                    out,
                    "Migration failed ({}): {count} {noun} executed before stopping",
                    cause.kind()
                );
            }
        }
        for script in &self.scripts_executed {
            let _ = writeln!(out, "  - {}", script.name());
        }
        if let Some(cause) = &self.failure {
            let _ = writeln!(out, "Cause: {cause}");
        }
        out
    }
}

/// Orchestrates sources, journal, pipeline, executor and post-executor.
pub struct MigrationEngine {
    configuration: MigrationConfiguration,
    status: StatusStream,
}

impl MigrationEngine {
    pub fn new(configuration: MigrationConfiguration) -> Self {
        Self {
            configuration,
            status: StatusStream::new(),
        }
    }

    /// Status stream of this engine. Subscribe before a run to observe it.
    pub fn status(&self) -> &StatusStream {
        &self.status
    }

    pub fn configuration(&self) -> &MigrationConfiguration {
        &self.configuration
    }

    /// Scripts the next run would execute, in order.
    ///
    /// Reads sources and journal only; publishes no status.
    pub fn pending_scripts(&self, cancellation: &Cancellation) -> Result<Vec<Script>, MigrationError> {
        let candidates = self.collect_scripts(cancellation)?;
        reject_duplicates(&candidates)?;
        let executed = self.read_journal(cancellation)?;
        Ok(plan(candidates, &executed))
    }

    /// Run every pending script.
    pub fn perform_migration(&self, cancellation: &Cancellation) -> MigrationResult {
        self.status.publish(MigrationStatus::Running);
        info!(sources = self.configuration.sources.len(), "Starting migration");

        let result = self.run(cancellation);

        match result.failure_cause() {
            None => {
                info!(
                    executed = result.scripts_executed().len(),
                    "Migration succeeded"
                );
                self.status.publish(MigrationStatus::Succeeded);
            }
            Some(cause) => {
                warn!(
                    executed = result.scripts_executed().len(),
                    kind = %cause.kind(),
                    "Migration failed: {cause}"
                );
                self.status.publish(MigrationStatus::Failed);
            }
        }
        result
    }

    fn run(&self, cancellation: &Cancellation) -> MigrationResult {
        let pending = match self.pending_scripts(cancellation) {
            Ok(pending) => pending,
            Err(cause) => return MigrationResult::failure(Vec::new(), cause),
        };
        debug!(pending = pending.len(), "Planned migration");

        let mut executed = Vec::with_capacity(pending.len());
        for script in pending {
            if let Err(cause) = self.run_one(&script, cancellation, &mut executed) {
                return MigrationResult::failure(executed, cause);
            }
        }
        MigrationResult::success(executed)
    }

    /// Execute, journal and post-execute one script.
    ///
    /// `executed` gains `script` once it is journaled, even if the
    /// post-executor then fails.
    fn run_one(
        &self,
        script: &Script,
        cancellation: &Cancellation,
        executed: &mut Vec<Script>,
    ) -> Result<(), MigrationError> {
        if cancellation.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        let prepared = self.configuration.pipeline.process(script, cancellation)?;

        info!("Executing script {}", script.name());
        self.configuration
            .executor
            .execute(&prepared, cancellation)
            .map_err(|source| {
                classify(source, |source| MigrationError::Execution {
                    script: script.name().to_string(),
                    source,
                })
            })?;

        self.configuration
            .journal
            .mark_executed(script, cancellation)
            .map_err(|source| MigrationError::Acknowledgment {
                script: script.name().to_string(),
                source,
            })?;
        executed.push(script.clone());
        debug!(script = script.name(), "Recorded script in journal");

        self.configuration
            .post_executor
            .execute(script, cancellation)
            .map_err(|source| {
                classify(source, |source| MigrationError::PostExecution {
                    script: script.name().to_string(),
                    source,
                })
            })
    }

    /// Read every source, one scoped thread per source.
    fn collect_scripts(&self, cancellation: &Cancellation) -> Result<Vec<Script>, MigrationError> {
        let sources = &self.configuration.sources;
        let batches: Vec<anyhow::Result<Vec<Script>>> = match sources.len() {
            0 => Vec::new(),
            1 => vec![sources[0].get_scripts(cancellation)],
            _ => thread::scope(|scope| {
                let handles: Vec<_> = sources
                    .iter()
                    .map(|source| scope.spawn(move || source.get_scripts(cancellation)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(anyhow::anyhow!("script source panicked")))
                    })
                    .collect()
            }),
        };

        let mut scripts = Vec::new();
        for batch in batches {
            let batch = batch.map_err(|source| {
                classify(source, |source| MigrationError::ScriptSource { source })
            })?;
            scripts.extend(batch);
        }
        debug!(candidates = scripts.len(), "Collected candidate scripts");
        Ok(scripts)
    }

    fn read_journal(&self, cancellation: &Cancellation) -> Result<BTreeSet<String>, MigrationError> {
        self.configuration
            .journal
            .executed_names(cancellation)
            .map_err(|source| classify(source, |source| MigrationError::JournalRead { source }))
    }
}

/// Map a collaborator error to `Cancelled` or to the phase error built by `wrap`.
fn classify(
    source: anyhow::Error,
    wrap: impl FnOnce(anyhow::Error) -> MigrationError,
) -> MigrationError {
    if is_cancellation(&source) {
        MigrationError::Cancelled
    } else {
        wrap(source)
    }
}

fn reject_duplicates(candidates: &[Script]) -> Result<(), MigrationError> {
    let mut seen = HashSet::with_capacity(candidates.len());
    for script in candidates {
        if !seen.insert(script.name()) {
            return Err(MigrationError::DuplicateScriptName {
                name: script.name().to_string(),
            });
        }
    }
    Ok(())
}

/// Sort candidates by ordinal name and drop the ones already journaled.
fn plan(mut candidates: Vec<Script>, executed: &BTreeSet<String>) -> Vec<Script> {
    candidates.sort_by(Script::cmp_by_name);
    candidates.retain(|script| !executed.contains(script.name()));
    candidates
}
