//! Snap a narrower match onto a wider reference match.
//!
//! Engines disagree about where an expression starts and ends when it is
//! wrapped in parentheses or sits inside a template literal. A result is
//! promoted to the tightest reference match that contains it when the
//! surplus text on either side is inert padding. The padding grammar is
//! tuned for JavaScript and is deliberately narrow: a real mismatch left in
//! place is preferable to one that gets masked.

use std::collections::HashSet;
use std::io;
use std::sync::LazyLock;

use regex::Regex;

use crate::span::Match;

/// Only opening parentheses and whitespace.
static LEADING_PADDING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\(\s*)*$").expect("leading padding regex is valid"));

/// An optional `` }` `` closing a template substitution, then only closing
/// parentheses and whitespace.
static TRAILING_PADDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\}?`)?(?:\s*\))*$").expect("trailing padding regex is valid")
});

/// Reconcile `result` against `reference`, reading candidate text from disk.
pub fn reconcile(result: &Match, reference: &HashSet<Match>) -> Match {
    reconcile_in(result, reference, Match::text)
}

/// Reconcile `result` against `reference`, reading candidate text through
/// `text`. Candidates whose text cannot be read are skipped.
pub fn reconcile_in<F>(result: &Match, reference: &HashSet<Match>, text: F) -> Match
where
    F: Fn(&Match) -> io::Result<String>,
{
    if reference.contains(result) {
        return result.clone();
    }

    let mut candidates: Vec<&Match> = reference.iter().filter(|c| c.contains(result)).collect();
    // Tightest first; ties broken by position so the order is deterministic.
    candidates.sort_by_key(|c| {
        let extent = c.range.adjusted(c.range.start).map(|r| r.end).ok();
        (extent, c.range)
    });

    for candidate in candidates {
        let Ok(context) = text(candidate) else {
            continue;
        };
        if padded_only(result, candidate, &context) {
            return candidate.clone();
        }
    }

    result.clone()
}

fn padded_only(result: &Match, candidate: &Match, context: &str) -> bool {
    let Ok(relative) = result.range.adjusted(candidate.range.start) else {
        return false;
    };
    let Ok(span) = relative.span(context) else {
        return false;
    };
    match (context.get(..span.start), context.get(span.end..)) {
        (Some(before), Some(after)) => {
            LEADING_PADDING.is_match(before) && TRAILING_PADDING.is_match(after)
        }
        _ => false,
    }
}
