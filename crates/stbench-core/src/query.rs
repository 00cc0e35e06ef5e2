use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lang::Language;

/// A pattern string tied to a language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Query {
    pub language: Language,
    pub syntax: String,
}

impl Query {
    pub fn new(language: Language, syntax: impl Into<String>) -> Self {
        Self {
            language,
            syntax: syntax.into(),
        }
    }

    /// Same language, different syntax.
    pub fn with_syntax(&self, syntax: impl Into<String>) -> Self {
        Self {
            language: self.language,
            syntax: syntax.into(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.language, self.syntax)
    }
}
