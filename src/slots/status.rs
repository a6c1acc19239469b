//! STATUS slot: one word of the configured status vocabulary.

use std::ops::Range;

use crate::error::{NlsqlError, NlsqlResult};
use crate::normalizer::Normalized;

const SLOT: &str = "status";

fn vocabulary_word(vocabulary: &[String], word: &str) -> bool {
    vocabulary.iter().any(|v| v.eq_ignore_ascii_case(word))
}

/// Token after an explicit `with status X`, `status is X` or `status equals X`.
fn introduced_value(n: &Normalized, from: usize) -> Option<usize> {
    (from..n.len()).find_map(|i| {
        let explicit = n.phrase_at(i, &["with", "status"])
            || n.phrase_at(i, &["status", "is"])
            || n.phrase_at(i, &["status", "equals"]);
        (explicit && i + 2 < n.len()).then_some(i + 2)
    })
}

pub(super) fn detect(n: &Normalized, from: usize, vocabulary: &[String]) -> bool {
    n.tokens
        .iter()
        .skip(from)
        .any(|t| vocabulary_word(vocabulary, &t.text))
        || introduced_value(n, from).is_some()
}

pub(super) fn extract(
    n: &Normalized,
    from: usize,
    vocabulary: &[String],
) -> NlsqlResult<Option<(String, Range<usize>)>> {
    if let Some(token) = n
        .tokens
        .iter()
        .skip(from)
        .find(|t| vocabulary_word(vocabulary, &t.text))
    {
        let i = token.position;
        let negated = i > from && matches!(n.text(i - 1), Some("not" | "non"));
        if negated && token.text == "active" && vocabulary_word(vocabulary, "inactive") {
            return Ok(Some(("INACTIVE".to_string(), i - 1..i + 1)));
        }
        return Ok(Some((token.text.to_uppercase(), i..i + 1)));
    }

    if let Some(at) = introduced_value(n, from) {
        return Err(NlsqlError::slot_parse(
            SLOT,
            n.tokens[at].raw.clone(),
            format!("not one of {}", vocabulary.join(", ")),
        ));
    }
    Ok(None)
}
