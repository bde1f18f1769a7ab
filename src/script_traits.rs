//! Contracts between the migration engine and its collaborators.
//!
//! The engine only knows these traits. Concrete implementations (directory
//! source, JSON journal, shell executor, git commit step, preprocessors) live
//! in their own modules and can be swapped for test doubles.
//!
//! # Contract
//!
//! - Every call receives the run's `Cancellation`. Long-running calls should
//!   check it and return `Cancelled` (see `crate::error`) when it fires.
//! - Failures are reported as `anyhow::Error`; the engine decides which phase
//!   of the run they belong to.
//! - All collaborators are `Send + Sync` so sources can be read from scoped
//!   threads and an engine can be shared across threads.

use crate::cancellation::Cancellation;
use crate::script::Script;
use anyhow::Result;
use std::collections::BTreeSet;

/// Produces candidate scripts, in any order.
pub trait ScriptSource: Send + Sync {
    fn get_scripts(&self, cancellation: &Cancellation) -> Result<Vec<Script>>;
}

/// Durable record of which scripts have already been executed.
pub trait Journal: Send + Sync {
    /// Names of every script recorded so far.
    fn executed_names(&self, cancellation: &Cancellation) -> Result<BTreeSet<String>>;

    /// Record `script` as executed.
    ///
    /// The record must be durable when this returns `Ok`.
    fn mark_executed(&self, script: &Script, cancellation: &Cancellation) -> Result<()>;
}

/// Runs a script's content in an external runtime.
pub trait ScriptExecutor: Send + Sync {
    fn execute(&self, script: &Script, cancellation: &Cancellation) -> Result<()>;
}

/// Side effect run after a script has been executed and journaled.
pub trait PostScriptExecutor: Send + Sync {
    fn execute(&self, script: &Script, cancellation: &Cancellation) -> Result<()>;
}

/// One stage of the preprocessing pipeline.
///
/// Stages run in ascending `order()`. Stages sharing an order run in
/// ascending `name()` (ordinal), then in registration order.
pub trait ScriptPreprocessor: Send + Sync {
    /// Position of this stage in the pipeline
    fn order(&self) -> i32;

    /// Stable identifier used for tie-breaking and error messages
    fn name(&self) -> &str;

    /// Build the transformed script. Must not depend on other scripts.
    fn process(&self, script: Script, cancellation: &Cancellation) -> Result<Script>;
}

/// Post-executor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPostScriptExecutor;

impl PostScriptExecutor for NoopPostScriptExecutor {
    fn execute(&self, _script: &Script, _cancellation: &Cancellation) -> Result<()> {
        Ok(())
    }
}
