//! Question normalizer.
//!
//! Lowercases, strips punctuation and canonicalizes synonyms. Code-like
//! tokens (`XYZ789`, `2024-02-01`, `03/15/2024`, `10.5`) keep their internal
//! punctuation so the slot extractors can still read them.

use serde::{Deserialize, Serialize};

/// One word of a normalized question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Lowercased, synonym-mapped form used for matching.
    pub text: String,
    /// Original casing with punctuation stripped.
    pub raw: String,
    /// Index in the token sequence.
    pub position: usize,
}

/// A normalized question: tokens plus the untouched original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub original: String,
    pub tokens: Vec<Token>,
}

impl Normalized {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn text(&self, i: usize) -> Option<&str> {
        self.tokens.get(i).map(|t| t.text.as_str())
    }

    /// Whether `words` occur as consecutive tokens starting at `i`.
    pub fn phrase_at(&self, i: usize, words: &[&str]) -> bool {
        words
            .iter()
            .enumerate()
            .all(|(k, w)| self.text(i + k) == Some(*w))
    }

    pub fn texts(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }
}

/// Normalize a raw question. Never fails; empty input gives no tokens.
pub fn normalize(question: &str) -> Normalized {
    let mut tokens = Vec::new();

    for chunk in question.split_whitespace() {
        let chunk: String = chunk
            .chars()
            .filter(|c| *c != '\'' && *c != '\u{2019}')
            .collect();
        let chunk = join_digit_groups(&chunk);
        let trimmed = chunk.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.is_empty() {
            continue;
        }

        if is_code_like(trimmed) {
            push(&mut tokens, trimmed);
        } else {
            for word in trimmed.split(|c: char| !c.is_alphanumeric()) {
                if !word.is_empty() {
                    push(&mut tokens, word);
                }
            }
        }
    }

    Normalized {
        original: question.to_string(),
        tokens,
    }
}

fn push(tokens: &mut Vec<Token>, raw: &str) {
    let lower = raw.to_lowercase();
    let text = canonical(&lower).unwrap_or(&lower).to_string();
    tokens.push(Token {
        text,
        raw: raw.to_string(),
        position: tokens.len(),
    });
}

/// At least one digit, alphanumerics with internal `-`, `/` or `.`.
pub fn is_code_like(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit())
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '/' | '.'))
        && s.starts_with(|c: char| c.is_ascii_alphanumeric())
        && s.ends_with(|c: char| c.is_ascii_alphanumeric())
}

/// `1,000` -> `1000`.
fn join_digit_groups(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|(i, c)| {
            !(**c == ','
                && *i > 0
                && chars[i - 1].is_ascii_digit()
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))
        })
        .map(|(_, c)| *c)
        .collect()
}

/// Fixed synonym table.
fn canonical(word: &str) -> Option<&'static str> {
    Some(match word {
        "part" | "parts" | "item" | "items" | "product" | "products" => "items",
        "number" => "numbers",
        "description" => "descriptions",
        "added" | "made" | "entered" => "created",
        "modified" | "changed" | "edited" => "updated",
        "cost" | "costs" | "prices" => "price",
        "supplier" | "vendor" | "vendors" => "suppliers",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_synonyms_and_case() {
        let n = normalize("Show me all Parts!");
        assert_eq!(n.texts(), vec!["show", "me", "all", "items"]);
        assert_eq!(n.tokens[3].raw, "Parts");
    }

    #[test]
    fn test_codes_keep_case_and_punctuation() {
        let n = normalize("Parts with ER code XYZ789, created 2024-02-01.");
        assert_eq!(
            n.texts(),
            vec!["items", "with", "er", "code", "xyz789", "created", "2024-02-01"]
        );
        assert_eq!(n.tokens[4].raw, "XYZ789");
    }

    #[test]
    fn test_apostrophes_dropped() {
        assert_eq!(normalize("what's the weather?").texts(), vec!["whats", "the", "weather"]);
    }

    #[test]
    fn test_numbers() {
        let n = normalize("price over $1,000 or 10.5");
        assert_eq!(n.texts(), vec!["price", "over", "1000", "or", "10.5"]);
    }

    #[test]
    fn test_hyphenated_words_split() {
        assert_eq!(normalize("non-orderable").texts(), vec!["non", "orderable"]);
    }

    #[test]
    fn test_empty() {
        assert!(normalize("  ?! ").is_empty());
    }
}
