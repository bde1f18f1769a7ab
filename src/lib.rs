//! repomigrate library
//!
//! Applies migration scripts to a repository exactly once. The
//! `MigrationEngine` plans a run from its script sources and journal, then
//! executes pending scripts one at a time in ordinal name order, journaling
//! each before moving on and stopping at the first failure.

pub mod cancellation;
pub mod cli;
pub mod config_file;
pub mod directory_source;
pub mod engine;
pub mod error;
pub mod git_commit;
pub mod journal;
pub mod pipeline;
pub mod preprocessors;
pub mod process_guard;
pub mod script;
pub mod script_runner;
pub mod script_traits;
pub mod status;

// Re-export main types for convenience
pub use cancellation::Cancellation;
pub use config_file::MigrationSettings;
pub use directory_source::DirectoryScriptSource;
pub use engine::{MigrationConfiguration, MigrationEngine, MigrationResult};
pub use error::{Cancelled, FailureKind, MigrationError};
pub use git_commit::GitCommitPostExecutor;
pub use journal::JsonJournal;
pub use pipeline::PreprocessorPipeline;
pub use preprocessors::{RepositoryDirectoryPreprocessor, VariableSubstitutionPreprocessor};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use script::Script;
pub use script_runner::{ScriptOutput, ShellScriptExecutor, run_supervised};
pub use script_traits::{
    Journal, NoopPostScriptExecutor, PostScriptExecutor, ScriptExecutor, ScriptPreprocessor,
    ScriptSource,
};
pub use status::{MigrationStatus, StatusStream, StatusSubscription};
