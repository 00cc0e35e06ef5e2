//! Supported source languages.
//!
//! The set is closed: constructing a [`Language`] from a name that is not
//! supported (after alias resolution) fails with a [`LanguageError`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LanguageError;

/// A source language both engines can search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Language {
    JavaScript,
}

const ALIASES: &[(&str, &str)] = &[("js", "javascript")];

impl Language {
    pub const ALL: &'static [Language] = &[Language::JavaScript];

    /// Resolve a language name or alias.
    pub fn new(name: &str) -> Result<Self, LanguageError> {
        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, target)| *target)
            .unwrap_or(name);

        Self::ALL
            .iter()
            .copied()
            .find(|l| l.name() == canonical)
            .ok_or_else(|| LanguageError {
                language: name.to_string(),
                supported: Self::ALL
                    .iter()
                    .map(|l| l.name())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn supports(name: &str) -> bool {
        Self::new(name).is_ok()
    }

    /// Canonical name, as understood by both engines.
    pub fn name(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
        }
    }

    /// File extensions, including the leading dot.
    pub fn exts(&self) -> &'static [&'static str] {
        match self {
            Language::JavaScript => &[".js"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = LanguageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Language {
    type Error = LanguageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.name().to_string()
    }
}
