//! Built-in preprocessor stages.

use crate::cancellation::Cancellation;
use crate::script::Script;
use crate::script_traits::ScriptPreprocessor;
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Order of `RepositoryDirectoryPreprocessor`
pub const REPOSITORY_DIRECTORY_ORDER: i32 = 0;
/// Order of `VariableSubstitutionPreprocessor`
pub const VARIABLE_SUBSTITUTION_ORDER: i32 = 100;

/// Quote `value` for a POSIX shell using single quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Prepends a `cd` into the target repository so scripts run against it.
#[derive(Debug, Clone)]
pub struct RepositoryDirectoryPreprocessor {
    directory: PathBuf,
}

impl RepositoryDirectoryPreprocessor {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

impl ScriptPreprocessor for RepositoryDirectoryPreprocessor {
    fn order(&self) -> i32 {
        REPOSITORY_DIRECTORY_ORDER
    }

    fn name(&self) -> &str {
        "repository-directory"
    }

    fn process(&self, script: Script, _cancellation: &Cancellation) -> Result<Script> {
        let directory = self.directory.to_string_lossy();
        let content = format!("cd {} || exit 1\n{}", shell_quote(&directory), script.content());
        Ok(script.with_content(content))
    }
}

/// Replaces `$NAME$` tokens with configured values.
///
/// Variables are substituted in name order. Unknown tokens are left as is.
#[derive(Debug, Clone, Default)]
pub struct VariableSubstitutionPreprocessor {
    variables: BTreeMap<String, String>,
}

impl VariableSubstitutionPreprocessor {
    pub fn new(variables: BTreeMap<String, String>) -> Self {
        Self { variables }
    }

    /// Token that `name` is substituted for
    pub fn token(name: &str) -> String {
        format!("${name}$")
    }
}

impl ScriptPreprocessor for VariableSubstitutionPreprocessor {
    fn order(&self) -> i32 {
        VARIABLE_SUBSTITUTION_ORDER
    }

    fn name(&self) -> &str {
        "variable-substitution"
    }

    fn process(&self, script: Script, _cancellation: &Cancellation) -> Result<Script> {
        if self.variables.is_empty() {
            return Ok(script);
        }
        let mut content = script.content().to_string();
        for (name, value) in &self.variables {
            content = content.replace(&Self::token(name), value);
        }
        Ok(script.with_content(content))
    }
}
