//! NUMERIC_COMPARISON slot: a comparator phrase followed by a number.

use std::ops::Range;

use crate::ast::{Operator, Value};
use crate::error::{NlsqlError, NlsqlResult};
use crate::normalizer::Normalized;

const SLOT: &str = "numeric comparison";

/// Longest phrases first so `no less than` wins over `less than`.
const PHRASES: &[(&[&str], Operator)] = &[
    (&["greater", "than", "or", "equal", "to"], Operator::Gte),
    (&["more", "than", "or", "equal", "to"], Operator::Gte),
    (&["less", "than", "or", "equal", "to"], Operator::Lte),
    (&["no", "less", "than"], Operator::Gte),
    (&["not", "less", "than"], Operator::Gte),
    (&["no", "more", "than"], Operator::Lte),
    (&["not", "more", "than"], Operator::Lte),
    (&["greater", "than"], Operator::Gt),
    (&["more", "than"], Operator::Gt),
    (&["higher", "than"], Operator::Gt),
    (&["at", "least"], Operator::Gte),
    (&["minimum", "of"], Operator::Gte),
    (&["less", "than"], Operator::Lt),
    (&["fewer", "than"], Operator::Lt),
    (&["lower", "than"], Operator::Lt),
    (&["at", "most"], Operator::Lte),
    (&["maximum", "of"], Operator::Lte),
    (&["up", "to"], Operator::Lte),
    (&["equal", "to"], Operator::Eq),
    (&["over"], Operator::Gt),
    (&["above"], Operator::Gt),
    (&["exceeds"], Operator::Gt),
    (&["exceeding"], Operator::Gt),
    (&["under"], Operator::Lt),
    (&["below"], Operator::Lt),
    (&["equals"], Operator::Eq),
    (&["exactly"], Operator::Eq),
];

/// The comparator phrase starting at `i`, if any.
fn phrase_at(n: &Normalized, i: usize) -> Option<(Operator, usize)> {
    PHRASES
        .iter()
        .find(|(words, _)| n.phrase_at(i, words))
        .map(|(words, op)| (*op, words.len()))
}

/// Whether a comparator phrase ends right before token `i`.
pub(super) fn comparator_before(n: &Normalized, i: usize) -> bool {
    PHRASES
        .iter()
        .any(|(words, _)| i >= words.len() && n.phrase_at(i - words.len(), words))
}

pub(super) fn detect(n: &Normalized, from: usize) -> bool {
    (from..n.len()).any(|i| phrase_at(n, i).is_some())
}

pub(super) fn extract(
    n: &Normalized,
    from: usize,
) -> NlsqlResult<Option<(Operator, Value, Range<usize>)>> {
    for i in from..n.len() {
        let Some((op, len)) = phrase_at(n, i) else {
            continue;
        };
        let at = i + len;
        let Some(token) = n.tokens.get(at) else {
            let phrase: Vec<&str> = n.tokens[i..at].iter().map(|t| t.raw.as_str()).collect();
            return Err(NlsqlError::slot_parse(SLOT, phrase.join(" "), "expected a number"));
        };
        let number: f64 = token.text.parse().map_err(|_| {
            let phrase: Vec<&str> = n.tokens[i..=at].iter().map(|t| t.raw.as_str()).collect();
            NlsqlError::slot_parse(SLOT, phrase.join(" "), "expected a number")
        })?;
        if !number.is_finite() {
            return Err(NlsqlError::slot_parse(SLOT, token.raw.clone(), "expected a finite number"));
        }
        tracing::debug!("Numeric comparison {} {}", op, number);
        return Ok(Some((op, Value::number(number), i..at + 1)));
    }
    Ok(None)
}
