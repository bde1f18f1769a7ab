//! Error handling for migration runs
//!
//! Every failure a run can end with is a `MigrationError`. Collaborators report
//! failures as `anyhow::Error`; the engine wraps them in the variant matching
//! the phase that failed, keeping the original error as the source.

use std::fmt;
use thiserror::Error;

/// Marker error raised when a run stops because cancellation was requested.
///
/// Collaborators return it (usually through `Cancellation::check`) so the
/// engine can tell a requested stop apart from a genuine failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Coarse classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A script source or the journal read failed before any script ran
    Planning,
    /// A preprocessor stage or the executor failed; the script was not journaled
    Execution,
    /// The script ran but the journal write failed
    Acknowledgment,
    /// The script ran and was journaled but the post-executor failed
    PostExecution,
    /// The run was stopped on request
    Cancellation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning failure",
            Self::Execution => "execution failure",
            Self::Acknowledgment => "acknowledgment failure",
            Self::PostExecution => "post-execution failure",
            Self::Cancellation => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a migration run did not succeed.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A script source could not produce its scripts
    #[error("Failed to read scripts from source: {source:#}")]
    ScriptSource {
        #[source]
        source: anyhow::Error,
    },

    /// Two sources supplied a script with the same name
    #[error("Duplicate script name: {name}")]
    DuplicateScriptName { name: String },

    /// The journal could not be read
    #[error("Failed to read journal: {source:#}")]
    JournalRead {
        #[source]
        source: anyhow::Error,
    },

    /// A preprocessor stage rejected the script
    #[error("Preprocessor '{stage}' failed on script {script}: {source:#}")]
    Preprocessing {
        script: String,
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// The executor reported failure for the script
    #[error("Script {script} failed: {source:#}")]
    Execution {
        script: String,
        #[source]
        source: anyhow::Error,
    },

    /// The script ran, but recording it in the journal failed.
    ///
    /// The script is not counted as executed and the next run attempts it
    /// again, so operators must check whether it is safe to repeat.
    #[error(
        "Script {script} ran but could not be recorded in the journal \
         (it will run again on the next migration): {source:#}"
    )]
    Acknowledgment {
        script: String,
        #[source]
        source: anyhow::Error,
    },

    /// The post-executor failed after the script was journaled
    #[error("Post-execution step failed for script {script}: {source:#}")]
    PostExecution {
        script: String,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation was requested before the run finished
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrationError {
    /// Classify this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::ScriptSource { .. } | Self::DuplicateScriptName { .. } | Self::JournalRead { .. } => {
                FailureKind::Planning
            }
            Self::Preprocessing { .. } | Self::Execution { .. } => FailureKind::Execution,
            Self::Acknowledgment { .. } => FailureKind::Acknowledgment,
            Self::PostExecution { .. } => FailureKind::PostExecution,
            Self::Cancelled => FailureKind::Cancellation,
        }
    }

    /// Name of the script the run failed on, if the failure concerns one.
    pub fn script_name(&self) -> Option<&str> {
        match self {
            Self::DuplicateScriptName { name } => Some(name),
            Self::Preprocessing { script, .. }
            | Self::Execution { script, .. }
            | Self::Acknowledgment { script, .. }
            | Self::PostExecution { script, .. } => Some(script),
            Self::ScriptSource { .. } | Self::JournalRead { .. } | Self::Cancelled => None,
        }
    }

    /// Returns true if the run stopped because cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Returns true if `err` (or anything in its chain) is the `Cancelled` marker.
pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Result type alias for migration runs
pub type Result<T> = std::result::Result<T, MigrationError>;
