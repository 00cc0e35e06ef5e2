//! Query canonicalization and cross-engine translation.
//!
//! [`canonical`] collapses syntactic variation that does not change what a
//! semgrep pattern matches, so equivalent patterns deduplicate to one key:
//!
//! 1. trim, collapse inline whitespace runs, drop blank lines;
//! 2. strip typed-metavariable annotations `($X : T)` down to `$X`;
//! 3. rename metavariable occurrences to `$H{n}` / `$...H{n}`, left to
//!    right with one counter shared by both kinds;
//! 4. merge ellipses separated only by a comma or newline, until stable;
//! 5. bind a trailing `= ...` to a fresh metavariable;
//! 6. drop one leading and one trailing unbounded ellipsis;
//! 7. drop the lone terminating `;` of a single-line statement.
//!
//! The pipeline is repeated until its output stops changing, which makes
//! `canonical(canonical(q)) == canonical(q)` hold for every input.
//!
//! [`to_stsearch`] rewrites a canonical semgrep pattern for stsearch, which
//! has neither named metavariables nor named ellipses.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::query::Query;

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("canonicalization regex is valid")
}

/// `$X`, `$FOO_1`, and ellipsis metavariables `$...ARGS`.
pub static METAVAR: LazyLock<Regex> =
    LazyLock::new(|| regex(r"(?P<name>\$(?P<kind>(?:\.{3})?)[A-Z0-9_]+)"));

/// `($X : SomeType)`.
static TYPED_METAVAR: LazyLock<Regex> =
    LazyLock::new(|| regex(r"\(\s*(?P<metavar>\$[A-Z_]+)\s*:[^\(\)]+\)"));

static INLINE_SPACE: LazyLock<Regex> = LazyLock::new(|| regex(r"[^\S\n\r]+"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| regex(r"\n(\r?)\s*\n\r?"));
static REDUNDANT_ELLIPSIS: LazyLock<Regex> = LazyLock::new(|| regex(r"\.{3}\s*(,|\n)\s*\.{3}"));
static TRAILING_ASSIGN: LazyLock<Regex> = LazyLock::new(|| regex(r"=\s*\.{3}$"));
static ELLIPSIS_COMMAS: LazyLock<Regex> = LazyLock::new(|| regex(r",?(\s*\.{3}\s*),?"));

/// Canonical form of a semgrep query.
pub fn canonical(query: &Query) -> Query {
    // Past the first pass, every change removes an ellipsis or shortens
    // the pattern.
    let mut syntax = query.syntax.clone();
    loop {
        let next = canonical_once(&syntax);
        if next == syntax {
            return query.with_syntax(syntax);
        }
        syntax = next;
    }
}

/// Whether `query` is already in canonical form.
pub fn is_canonical(query: &Query) -> bool {
    canonical(query).syntax == query.syntax
}

fn canonical_once(pattern: &str) -> String {
    let pattern = INLINE_SPACE.replace_all(pattern.trim(), " ");
    let pattern = BLANK_LINES.replace_all(&pattern, "\n${1}");
    let pattern = TYPED_METAVAR.replace_all(&pattern, "${metavar}");

    let mut count = 0usize;
    let mut pattern = METAVAR
        .replace_all(&pattern, |caps: &Captures| {
            count += 1;
            format!("${}H{}", &caps["kind"], count)
        })
        .into_owned();

    // Merges can expose new adjacent pairs.
    loop {
        match REDUNDANT_ELLIPSIS.replace_all(&pattern, "...") {
            Cow::Borrowed(_) => break,
            Cow::Owned(merged) => pattern = merged,
        }
    }

    if let Some(m) = TRAILING_ASSIGN.find(&pattern) {
        pattern = format!("{}= $H{}", &pattern[..m.start()], count + 1);
    }

    let mut pattern = strip_unbounded_ellipsis(pattern.trim()).trim().to_string();

    if pattern.ends_with(';') && pattern.matches(';').count() == 1 && !pattern.contains('\n') {
        pattern.pop();
        pattern.truncate(pattern.trim_end().len());
    }

    pattern
}

fn whitespace_len(s: &str) -> usize {
    s.chars()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum()
}

fn trailing_whitespace_len(s: &str) -> usize {
    s.chars()
        .rev()
        .take_while(|c| c.is_whitespace())
        .map(char::len_utf8)
        .sum()
}

/// Remove a leading `...` (not part of a longer dot run) and a trailing
/// `...` (not preceded by a dot), each with its adjacent whitespace.
fn strip_unbounded_ellipsis(s: &str) -> &str {
    let mut begin = 0;
    if let Some(rest) = s.strip_prefix("...") {
        let ws = whitespace_len(rest);
        if !rest[ws..].starts_with('.') {
            begin = 3 + ws;
        } else if ws > 0 {
            // Give back the last whitespace char so the ellipsis stands alone.
            let last = rest[..ws].chars().next_back().map_or(0, char::len_utf8);
            begin = 3 + ws - last;
        }
    }

    let mut end = s.len();
    if let Some(body) = s.strip_suffix("...") {
        let dots = body.len();
        if dots >= begin {
            let mut at = dots - trailing_whitespace_len(&body[begin..]);
            loop {
                if !s[..at].ends_with('.') {
                    end = at;
                    break;
                }
                if at == dots {
                    break;
                }
                at += s[at..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    &s[begin..end]
}

/// Translate a canonical semgrep query into stsearch syntax.
pub fn to_stsearch(query: &Query) -> Query {
    let pattern = METAVAR.replace_all(&query.syntax, |caps: &Captures| {
        if &caps["kind"] == "..." {
            "..."
        } else {
            "$_"
        }
    });
    let pattern = ELLIPSIS_COMMAS.replace_all(&pattern, "${1}");
    query.with_syntax(collapse_dotted_ellipsis(&pattern))
}

/// `x. ... .y` → `x... .y`: drop the member dot that collides with an
/// ellipsis standing in for a member chain.
fn collapse_dotted_ellipsis(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut copied = 0;
    let mut i = 0;
    while i < s.len() {
        if let Some((keep, end)) = dotted_ellipsis_at(s, i) {
            out.push_str(&s[copied..i]);
            out.push_str(&s[keep..end]);
            copied = end;
            i = end;
            continue;
        }
        i += s[i..].chars().next().map_or(1, char::len_utf8);
    }
    out.push_str(&s[copied..]);
    out
}

fn dotted_ellipsis_at(s: &str, i: usize) -> Option<(usize, usize)> {
    if !s[i..].starts_with('.') || s[..i].ends_with('.') {
        return None;
    }
    let keep = i + 1 + whitespace_len(&s[i + 1..]);
    if !s[keep..].starts_with("...") {
        return None;
    }
    let close = keep + 3 + whitespace_len(&s[keep + 3..]);
    if !s[close..].starts_with('.') {
        return None;
    }
    let end = close + 1;
    if s[end..].starts_with('.') {
        return None;
    }
    Some((keep, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;

    fn js(syntax: &str) -> Query {
        Query::new(Language::JavaScript, syntax)
    }

    fn canon(syntax: &str) -> String {
        canonical(&js(syntax)).syntax
    }

    fn st(syntax: &str) -> String {
        to_stsearch(&js(syntax)).syntax
    }

    const SAMPLES: &[&str] = &[
        "foo(  $X ,\t$Y )",
        "$X = ...",
        "...\nfoo($X);\n...",
        "... ... bar()",
        "eval($CODE) ;",
        "f(..., ...)",
        "f(...,\n...)",
        "$OBJ.$...PROPS.run()",
        "(($X : string)).length",
        "if ($C) {\n\n  ...\n\n}",
        "$A == ...",
        "x....",
        "... ... ... ... ... ... ... ... ... ... x",
        "...",
        "require('child_process').exec($CMD, ...)",
        "a;\nb;",
    ];

    #[test]
    fn test_whitespace_collapsed() {
        assert_eq!(canon("  foo(  bar ,\t baz )  "), "foo( bar , baz )");
        assert_eq!(canon("a;\n\n\n  b;"), "a;\n b;");
    }

    #[test]
    fn test_zero_metavars_unchanged_modulo_whitespace() {
        assert_eq!(canon("document.write(x)"), "document.write(x)");
    }

    #[test]
    fn test_metavars_renamed_by_occurrence() {
        assert_eq!(canon("$X + $Y"), "$H1 + $H2");
        assert_eq!(canon("$X + $X"), "$H1 + $H2");
        assert_eq!(canon("f($...ARGS, $LAST)"), "f($...H1, $H2)");
    }

    #[test]
    fn test_metavar_spelling_irrelevant() {
        assert_eq!(canon("$A.query($SQL)"), canon("$DB.query($Q_1)"));
        assert_eq!(canon("f($...XS)"), canon("f($...REST)"));
    }

    #[test]
    fn test_typed_metavar_stripped() {
        assert_eq!(canon("foo(($X : string))"), "foo($H1)");
    }

    #[test]
    fn test_redundant_ellipsis_merged() {
        assert_eq!(canon("f(..., ...)"), "f(...)");
        assert_eq!(canon("f(...,\n...,\n...)"), "f(...)");
    }

    #[test]
    fn test_trailing_assignment_bound() {
        assert_eq!(canon("$X = ..."), "$H1 = $H2");
        assert_eq!(canon("var x = ..."), "var x = $H1");
        assert_eq!(canon("$A == ..."), "$H1 == $H2");
    }

    #[test]
    fn test_unbounded_ellipsis_stripped() {
        assert_eq!(canon("...\nfoo($X);\n..."), "foo($H1)");
        assert_eq!(canon("... ... bar()"), "bar()");
        assert_eq!(canon("..."), "");
        assert_eq!(canon("x...."), "x....");
        assert_eq!(canon("f(...)"), "f(...)");
    }

    #[test]
    fn test_single_semicolon_dropped() {
        assert_eq!(canon("eval($CODE);"), "eval($H1)");
        assert_eq!(canon("eval($CODE) ;"), "eval($H1)");
        assert_eq!(canon("a; b;"), "a; b;");
        assert_eq!(canon("a;\nb;"), "a;\nb;");
    }

    #[test]
    fn test_idempotent() {
        for sample in SAMPLES {
            let once = canonical(&js(sample));
            let twice = canonical(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", sample);
            assert!(is_canonical(&once));
        }
    }

    #[test]
    fn test_long_ellipsis_runs_strip_completely() {
        let pattern = format!("{}x", "... ".repeat(10));
        assert_eq!(canonical(&js(&pattern)).syntax, "x");
        let pattern = format!("f(){}", " ...".repeat(10));
        assert_eq!(canonical(&js(&pattern)).syntax, "f()");
    }

    #[test]
    fn test_stsearch_wildcards() {
        assert_eq!(st("foo($H1)"), "foo($_)");
        assert_eq!(st("f($H1, $...H2)"), "f($_ ...)");
    }

    #[test]
    fn test_stsearch_ellipsis_commas() {
        assert_eq!(st("f(a, ..., b)"), "f(a ... b)");
        assert_eq!(st("f(...)"), "f(...)");
    }

    #[test]
    fn test_stsearch_member_dots() {
        assert_eq!(st("$H1.$...H2.run()"), "$_....run()");
        assert_eq!(st("a.b.c"), "a.b.c");
    }
}
