//! Rule loading and shallow pattern extraction.
//!
//! A rule file is a JSON document `{"rules": [...]}` in semgrep's rule
//! schema. [`patterns`] walks one rule (or any operator inside it) and
//! returns every plain pattern it mentions, once per target language.
//! Operators that do not carry a searchable pattern (regexes, focus,
//! metavariable comparisons and analyzers) contribute nothing.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::RuleError;
use crate::lang::Language;
use crate::query::Query;

/// `"=~/regex/"` string matching.
static STRING_MATCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""=~/([^/]|\\/)*/""#).expect("string match regex is valid"));

/// `<... expr ...>` deep expressions.
static DEEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<\.{3}(?P<inner>.*?)\.{3}>").expect("deep expression regex is valid"));

static DEPRECATED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rule (is|has been) deprecated").expect("deprecation regex is valid"));

const PATTERN_KEYS: &[&str] = &["pattern", "pattern-not", "pattern-inside", "pattern-not-inside"];
const NESTED_KEYS: &[&str] = &["patterns", "pattern-either"];
const IGNORED_KEYS: &[&str] = &[
    "focus-metavariable",
    "pattern-regex",
    "pattern-not-regex",
    "metavariable-regex",
    "metavariable-comparison",
    "metavariable-analysis",
];
const TAINT_OPTIONAL_KEYS: &[&str] = &["pattern-propagators", "pattern-sanitizers"];

/// One rule read from a rule file.
#[derive(Debug, Clone)]
pub struct Rule {
    pub source: PathBuf,
    pub id: String,
    pub tree: Value,
}

impl Rule {
    /// Whether the rule's message announces its deprecation.
    pub fn deprecated(&self) -> bool {
        self.tree
            .get("message")
            .and_then(Value::as_str)
            .is_some_and(|msg| DEPRECATED.is_match(msg))
    }
}

#[derive(Clone, Copy)]
enum RuleFormat {
    Yaml,
    Json,
}

impl RuleFormat {
    fn of(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(RuleFormat::Yaml),
            "json" => Some(RuleFormat::Json),
            _ => None,
        }
    }

    fn parse(self, path: &Path, text: &str) -> Result<Value, RuleError> {
        match self {
            RuleFormat::Yaml => serde_yaml::from_str(text).map_err(|e| RuleError::Yaml {
                path: path.to_path_buf(),
                source: e,
            }),
            RuleFormat::Json => serde_json::from_str(text).map_err(|e| RuleError::Json {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Load every rule under `source`, a rule file or a directory walked
/// recursively for `.yaml`, `.yml` and `.json` rule files. Entries are
/// visited in name order.
pub fn load_rules(source: &Path) -> Result<Vec<Rule>, RuleError> {
    let mut rules = Vec::new();
    collect_rules(source, &mut rules)?;
    Ok(rules)
}

fn collect_rules(source: &Path, rules: &mut Vec<Rule>) -> Result<(), RuleError> {
    let io = |e| RuleError::Io {
        path: source.to_path_buf(),
        source: e,
    };

    if source.is_dir() {
        let mut entries = std::fs::read_dir(source)
            .map_err(io)?
            .map(|e| e.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io)?;
        entries.sort();
        for entry in entries {
            collect_rules(&entry, rules)?;
        }
    } else if let Some(format) = RuleFormat::of(source) {
        let text = std::fs::read_to_string(source).map_err(io)?;
        let config = format.parse(source, &text)?;
        let Some(list) = config.get("rules").and_then(Value::as_array) else {
            return Err(RuleError::NotARuleFile {
                path: source.to_path_buf(),
            });
        };
        for tree in list {
            let id = tree
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            rules.push(Rule {
                source: source.to_path_buf(),
                id,
                tree: tree.clone(),
            });
        }
    }
    Ok(())
}

/// Extract all shallow patterns of a rule, config, or operator.
///
/// `languages` is the inherited target set; a `languages` key on `rule`
/// replaces it with the supported subset of the listed names.
pub fn patterns(rule: &Value, languages: &BTreeSet<Language>) -> Result<Vec<Query>, RuleError> {
    let mut out = Vec::new();
    walk(rule, languages, &mut out)?;
    Ok(out)
}

fn walk(rule: &Value, inherited: &BTreeSet<Language>, out: &mut Vec<Query>) -> Result<(), RuleError> {
    let object = match rule {
        Value::Null => return Ok(()),
        Value::Object(object) => object,
        other => return Err(RuleError::UnknownOperator(other.to_string())),
    };

    let narrowed;
    let languages = match object.get("languages").and_then(Value::as_array) {
        Some(names) if !names.is_empty() => {
            narrowed = names
                .iter()
                .filter_map(Value::as_str)
                .filter_map(|name| Language::new(name).ok())
                .collect::<BTreeSet<_>>();
            &narrowed
        }
        _ => inherited,
    };

    if let Some(Value::Array(nested)) = object.get("rules") {
        return walk_all(nested, languages, out);
    }

    if let Some(pattern) = PATTERN_KEYS.iter().find_map(|key| object.get(*key)) {
        let Value::String(pattern) = pattern else {
            return Err(RuleError::NotAPattern(pattern.to_string()));
        };
        let shallow = STRING_MATCH.replace_all(pattern, r#""...""#);
        let shallow = DEEP.replace_all(&shallow, "...");
        for language in languages {
            out.push(Query::new(*language, &*shallow));
        }
        for deep in DEEP.captures_iter(pattern) {
            let inner = Value::String(deep["inner"].to_string());
            walk(&single("pattern", inner), languages, out)?;
        }
        return Ok(());
    }

    if let Some(nested) = object.get("metavariable-pattern") {
        if nested.get("metavariable").is_none() {
            return Err(RuleError::UnknownOperator(nested.to_string()));
        }
        return match nested.get("language").and_then(Value::as_str) {
            None => walk(nested, languages, out),
            Some(name) => match Language::new(name) {
                Ok(language) => walk(nested, &BTreeSet::from([language]), out),
                Err(_) => Ok(()),
            },
        };
    }

    if let Some(nested) = NESTED_KEYS.iter().find_map(|key| object.get(*key)) {
        return walk_list(nested, languages, out);
    }

    if IGNORED_KEYS.iter().any(|key| object.contains_key(*key)) {
        return Ok(());
    }

    if let (Some(sources), Some(sinks)) = (object.get("pattern-sources"), object.get("pattern-sinks")) {
        walk_list(sources, languages, out)?;
        walk_list(sinks, languages, out)?;
        for key in TAINT_OPTIONAL_KEYS {
            if let Some(nested) = object.get(*key).filter(|v| !v.is_null()) {
                walk_list(nested, languages, out)?;
            }
        }
        return Ok(());
    }

    Err(RuleError::UnknownOperator(rule.to_string()))
}

fn walk_list(nested: &Value, languages: &BTreeSet<Language>, out: &mut Vec<Query>) -> Result<(), RuleError> {
    match nested {
        Value::Array(items) => walk_all(items, languages, out),
        other => Err(RuleError::UnknownOperator(other.to_string())),
    }
}

fn walk_all(items: &[Value], languages: &BTreeSet<Language>, out: &mut Vec<Query>) -> Result<(), RuleError> {
    for item in items {
        walk(item, languages, out)?;
    }
    Ok(())
}

fn single(key: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(key.to_string(), value);
    Value::Object(object)
}
