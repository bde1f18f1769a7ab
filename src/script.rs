//! The migration script value type.

use std::cmp::Ordering;
use std::fmt;

/// One named unit of work: a name and the text to execute.
///
/// Scripts are never modified in place. Preprocessors build a new value with
/// `with_content`, leaving the planned script untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Script {
    name: String,
    content: String,
}

impl Script {
    /// Create a script from its name and content
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Identity of the script, used for journal lookups and ordering
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text handed to the executor
    #[inline]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Copy of this script with different content
    pub fn with_content(&self, content: impl Into<String>) -> Self {
        Self {
            name: self.name.clone(),
            content: content.into(),
        }
    }

    /// Copy of this script under a different name
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: self.content.clone(),
        }
    }

    /// Ordinal (byte-wise, locale-independent) ordering by name.
    pub fn cmp_by_name(&self, other: &Self) -> Ordering {
        self.name.as_bytes().cmp(other.name.as_bytes())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
