//! Token prefixes of a query, used as partial queries.
//!
//! A partial query is an accumulated prefix of a complete query's tokens
//! that is already in canonical form. Prefixes ending in whitespace or in
//! an ambiguous ellipsis are rejected by the canonical check.

use std::sync::LazyLock;

use regex::Regex;

use crate::canonical::is_canonical;
use crate::query::Query;

/// JavaScript tokens, tried in order at each position.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\$(?:\.{3})?[A-Z0-9_]+",
        r"|\s+",
        r"|//[^\n]*",
        r"|/\*(?s:.*?)\*/",
        r#"|"(?:[^"\\\n]|\\.)*"?"#,
        r"|'(?:[^'\\\n]|\\.)*'?",
        r"|`(?s:(?:[^`\\]|\\.)*)`?",
        r"|[A-Za-z_$][A-Za-z0-9_$]*",
        r"|[0-9](?:[0-9A-Za-z_]|\.[0-9])*",
        r"|\.\.\.|>>>=|===|!==|\*\*=|<<=|>>=|>>>",
        r"|=>|==|!=|<=|>=|&&|\|\||\?\?|\?\.|\+\+|--|\+=|-=|\*=|/=|%=|&=|\|=|\^=|<<|>>|\*\*",
        r"|(?s:.)",
    ))
    .expect("token regex is valid")
});

/// Split `syntax` into tokens; concatenating them restores the input.
pub fn tokens(syntax: &str) -> Vec<&str> {
    TOKEN.find_iter(syntax).map(|m| m.as_str()).collect()
}

/// All canonical token prefixes of `query`, shortest first. The query
/// itself is the last item when it is canonical.
pub fn prefixes(query: &Query) -> Vec<Query> {
    let mut end = 0;
    tokens(&query.syntax)
        .into_iter()
        .filter_map(|token| {
            end += token.len();
            let prefix = query.with_syntax(&query.syntax[..end]);
            is_canonical(&prefix).then_some(prefix)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Language;

    fn syntaxes(syntax: &str) -> Vec<String> {
        prefixes(&Query::new(Language::JavaScript, syntax))
            .into_iter()
            .map(|q| q.syntax)
            .collect()
    }

    #[test]
    fn test_tokens_cover_input() {
        let src = "$H1.exec(`ls ${x}`, \"a\\\"b\", ...) // go\n$...H2 >>>= 0x1f;";
        let toks = tokens(src);
        assert_eq!(toks.concat(), src);
        assert!(toks.contains(&"$H1"));
        assert!(toks.contains(&"$...H2"));
        assert!(toks.contains(&"`ls ${x}`"));
        assert!(toks.contains(&"\"a\\\"b\""));
        assert!(toks.contains(&"..."));
        assert!(toks.contains(&">>>="));
        assert!(toks.contains(&"// go"));
    }

    #[test]
    fn test_call_prefixes() {
        assert_eq!(
            syntaxes("foo($H1)"),
            vec!["foo", "foo(", "foo($H1", "foo($H1)"]
        );
    }

    #[test]
    fn test_whitespace_prefixes_skipped() {
        assert_eq!(syntaxes("a + b"), vec!["a", "a +", "a + b"]);
    }

    #[test]
    fn test_member_chain() {
        assert_eq!(
            syntaxes("$H1.query($H2)"),
            vec!["$H1", "$H1.", "$H1.query", "$H1.query(", "$H1.query($H2", "$H1.query($H2)"]
        );
    }

    #[test]
    fn test_trailing_ellipsis_prefix_rejected() {
        assert!(syntaxes("...").is_empty());
        // `f(...` would lose its trailing ellipsis.
        assert_eq!(syntaxes("f(...)"), vec!["f", "f(", "f(...)"]);
    }
}
