//! CODE slot: an alphanumeric identifier such as an ER code or part number.

use std::ops::Range;

use crate::config::SlotConfig;
use crate::error::{NlsqlError, NlsqlResult};
use crate::normalizer::Normalized;

const SLOT: &str = "code";

/// Words that introduce a code; the token after them is preferred.
const TRIGGERS: &[&str] = &["code", "er", "numbers", "id"];

/// Words allowed between a trigger and its code.
const FILLERS: &[&str] = &["is", "of", "with", "equals"];

/// Whether `raw` has the configured code shape.
pub fn is_code(raw: &str, config: &SlotConfig) -> bool {
    raw.chars().count() >= config.code_min_len
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && raw.starts_with(|c: char| c.is_ascii_alphanumeric())
        && (!config.code_require_letter || raw.chars().any(|c| c.is_ascii_alphabetic()))
        && (!config.code_require_digit || raw.chars().any(|c| c.is_ascii_digit()))
        && !is_ordinal(raw)
}

/// `15th`, `2nd`.
fn is_ordinal(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ["st", "nd", "rd", "th"].iter().any(|suffix| {
        lower
            .strip_suffix(suffix)
            .is_some_and(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
    })
}

/// A shaped token, or the explicit word `code`.
pub(super) fn detect(n: &Normalized, from: usize, config: &SlotConfig) -> bool {
    n.tokens
        .iter()
        .skip(from)
        .any(|t| t.text == "code" || is_code(&t.raw, config))
}

pub(super) fn extract(
    n: &Normalized,
    from: usize,
    config: &SlotConfig,
) -> NlsqlResult<Option<(String, Range<usize>)>> {
    // Prefer the first shaped token following a trigger.
    for i in from..n.len() {
        if !TRIGGERS.contains(&n.tokens[i].text.as_str()) {
            continue;
        }
        let mut j = i + 1;
        while n
            .text(j)
            .is_some_and(|t| TRIGGERS.contains(&t) || FILLERS.contains(&t))
        {
            j += 1;
        }
        if let Some(token) = n.tokens.get(j) {
            if is_code(&token.raw, config) {
                return Ok(Some((token.raw.clone(), j..j + 1)));
            }
        }
    }

    if let Some(token) = n.tokens.iter().skip(from).find(|t| is_code(&t.raw, config)) {
        return Ok(Some((token.raw.clone(), token.position..token.position + 1)));
    }

    if let Some(i) = (from..n.len()).find(|&i| n.tokens[i].text == "code") {
        let text: Vec<&str> = n.tokens[i..(i + 2).min(n.len())]
            .iter()
            .map(|t| t.raw.as_str())
            .collect();
        return Err(NlsqlError::slot_parse(
            SLOT,
            text.join(" "),
            format!(
                "expected at least {} letters and digits",
                config.code_min_len
            ),
        ));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;
    use pretty_assertions::assert_eq;

    fn cfg() -> SlotConfig {
        SlotConfig::default()
    }

    #[test]
    fn test_code_after_trigger_keeps_case() {
        let n = normalize("Parts with ER code XYZ789");
        let (code, span) = extract(&n, 0, &cfg()).unwrap().unwrap();
        assert_eq!(code, "XYZ789");
        assert_eq!(span, 4..5);
    }

    #[test]
    fn test_prefers_token_after_trigger() {
        let n = normalize("AB12 items with part number CD34-X");
        let (code, _) = extract(&n, 0, &cfg()).unwrap().unwrap();
        assert_eq!(code, "CD34-X");
    }

    #[test]
    fn test_shape_rules() {
        assert!(is_code("XYZ789", &cfg()));
        assert!(!is_code("R1", &cfg()));
        assert!(!is_code("2024", &cfg()));
        assert!(!is_code("items", &cfg()));
        assert!(!is_code("15th", &cfg()));
        assert!(!is_code("2024-02-01", &cfg()));

        let relaxed = SlotConfig {
            code_min_len: 2,
            ..SlotConfig::default()
        };
        assert!(is_code("R1", &relaxed));
    }

    #[test]
    fn test_code_word_without_value_fails() {
        let err = extract(&normalize("items with er code banana"), 0, &cfg()).unwrap_err();
        assert!(matches!(err, NlsqlError::SlotParse { .. }));
    }

    #[test]
    fn test_absent() {
        let n = normalize("list all part numbers");
        assert!(!detect(&n, 0, &cfg()));
        assert!(extract(&n, 0, &cfg()).unwrap().is_none());
    }
}
