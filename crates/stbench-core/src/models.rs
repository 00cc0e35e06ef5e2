//! Spec bundles: one canonical query expressed for each participating tool.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::LanguageError;
use crate::lang::Language;
use crate::query::Query;

/// Reserved key holding the shared language.
pub const LANG_KEY: &str = "lang";

/// Tool name → engine syntax, plus the shared language under `"lang"`.
///
/// Keys are kept sorted so the JSON form, and therefore [`SpecData::key`],
/// does not depend on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecData(BTreeMap<String, String>);

impl SpecData {
    pub fn new(language: Language) -> Self {
        let mut data = BTreeMap::new();
        data.insert(LANG_KEY.to_string(), language.name().to_string());
        Self(data)
    }

    /// Add `tool`'s syntax. The query must share the bundle's language.
    pub fn with(mut self, tool: &str, query: &Query) -> Self {
        debug_assert_eq!(
            self.0.get(LANG_KEY).map(String::as_str),
            Some(query.language.name())
        );
        self.0.insert(tool.to_string(), query.syntax.clone());
        self
    }

    /// Bundle `(tool, query)` pairs; `None` if empty or the languages differ.
    pub fn bundle<'a>(queries: impl IntoIterator<Item = (&'a str, &'a Query)>) -> Option<Self> {
        let mut queries = queries.into_iter().peekable();
        let language = queries.peek()?.1.language;
        let mut data = Self::new(language);
        for (tool, query) in queries {
            if query.language != language {
                return None;
            }
            data = data.with(tool, query);
        }
        Some(data)
    }

    pub fn language(&self) -> Result<Language, LanguageError> {
        Language::new(self.0.get(LANG_KEY).map(String::as_str).unwrap_or_default())
    }

    pub fn syntax(&self, tool: &str) -> Option<&str> {
        if tool == LANG_KEY {
            return None;
        }
        self.0.get(tool).map(String::as_str)
    }

    /// `tool`'s query, if the bundle has one for it.
    pub fn query(&self, tool: &str) -> Option<Query> {
        let syntax = self.syntax(tool)?;
        let language = self.language().ok()?;
        Some(Query::new(language, syntax))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Content key: SHA-256 of the sorted JSON form.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.to_json().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn js(syntax: &str) -> Query {
        Query::new(Language::JavaScript, syntax)
    }

    #[test]
    fn test_key_ignores_insertion_order() {
        let (sg, st) = (js("f($H1)"), js("f($_)"));
        let a = SpecData::bundle([("semgrep", &sg), ("stsearch", &st)]).unwrap();
        let b = SpecData::bundle([("stsearch", &st), ("semgrep", &sg)]).unwrap();
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn test_key_differs_by_content() {
        let a = SpecData::new(Language::JavaScript).with("stsearch", &js("a()"));
        let b = SpecData::new(Language::JavaScript).with("stsearch", &js("b()"));
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_query_lookup() {
        let data = SpecData::new(Language::JavaScript).with("stsearch", &js("x"));
        assert_eq!(data.query("stsearch"), Some(js("x")));
        assert_eq!(data.query("semgrep"), None);
        assert_eq!(data.query(LANG_KEY), None);
    }

    #[test]
    fn test_json_round_trip() {
        let data = SpecData::new(Language::JavaScript).with("semgrep", &js("$H1 == $H2"));
        let json = data.to_json();
        assert_eq!(json, r#"{"lang":"javascript","semgrep":"$H1 == $H2"}"#);
        assert_eq!(SpecData::from_json(&json).unwrap(), data);
    }

    #[test]
    fn test_empty_bundle() {
        assert!(SpecData::bundle(std::iter::empty()).is_none());
    }
}
