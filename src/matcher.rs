//! Pattern matcher.
//!
//! A pattern is a candidate when its literal anchors occur in template order
//! and every one of its slots is detected in the question. Candidates are
//! ranked by a total order, so the winner never depends on store iteration:
//!
//! 1. more required slots
//! 2. higher `priority * confidence`
//! 3. higher priority
//! 4. longer token template
//! 5. lexicographically smaller id
//!
//! Slots are only extracted for the winner.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::NlsqlResult;
use crate::normalizer::Normalized;
use crate::pattern::{ExtractionRule, Pattern, SlotSpec, TemplateToken};
use crate::slots::{Slot, SlotExtractor};
use crate::store::PatternStore;

/// The winning pattern with the slots extracted for it, keyed by slot name.
#[derive(Debug, Clone)]
pub struct MatchedPattern {
    pub pattern: Pattern,
    pub slots: BTreeMap<String, Slot>,
}

/// Rank two candidates; `Greater` means `a` wins.
pub fn rank(a: &Pattern, b: &Pattern) -> Ordering {
    a.slot_specs
        .len()
        .cmp(&b.slot_specs.len())
        .then_with(|| a.score().total_cmp(&b.score()))
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.token_template.len().cmp(&b.token_template.len()))
        .then_with(|| b.id.cmp(&a.id))
}

/// Whether the literal anchors occur in order in the question.
pub fn anchors_match(pattern: &Pattern, n: &Normalized) -> bool {
    let mut words = n.tokens.iter().map(|t| t.text.as_str());
    pattern
        .anchors()
        .all(|anchor| words.by_ref().any(|w| anchor.accepts(w)))
}

/// First token index a slot may be read from.
fn search_start(spec: &SlotSpec, n: &Normalized) -> Option<usize> {
    match &spec.rule {
        ExtractionRule::Anywhere => Some(0),
        ExtractionRule::After(word) => n
            .tokens
            .iter()
            .position(|t| TemplateToken::Literal(word.clone()).accepts(&t.text))
            .map(|i| i + 1),
    }
}

pub fn is_candidate(pattern: &Pattern, n: &Normalized, extractor: &SlotExtractor) -> bool {
    anchors_match(pattern, n)
        && pattern.slot_specs.iter().all(|spec| {
            search_start(spec, n).is_some_and(|from| extractor.detect(spec.slot_type, n, from))
        })
}

/// Pick the best pattern and extract its slots. `Ok(None)` is "no match".
pub fn best_match(
    store: &PatternStore,
    n: &Normalized,
    extractor: &SlotExtractor,
) -> NlsqlResult<Option<MatchedPattern>> {
    if n.is_empty() {
        return Ok(None);
    }

    let winner = store
        .iter()
        .filter(|p| is_candidate(p, n, extractor))
        .inspect(|p| {
            tracing::debug!(
                "Candidate {} (slots={}, score={:.3}, priority={})",
                p.id,
                p.slot_specs.len(),
                p.score(),
                p.priority
            )
        })
        .max_by(|a, b| rank(a, b));

    let Some(pattern) = winner else {
        tracing::debug!("No pattern matched '{}'", n.original);
        return Ok(None);
    };
    tracing::debug!("Matched pattern {}", pattern.id);

    let mut slots = BTreeMap::new();
    for spec in &pattern.slot_specs {
        let from = search_start(spec, n).unwrap_or(0);
        if let Some(slot) = extractor.extract_from(spec.slot_type, n, from)? {
            slots.insert(spec.name.clone(), slot);
        }
    }

    Ok(Some(MatchedPattern {
        pattern: pattern.clone(),
        slots,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotConfig;
    use crate::error::NlsqlError;
    use crate::normalizer::normalize;
    use crate::pattern::Origin;
    use chrono::NaiveDate;

    fn extractor() -> SlotExtractor {
        SlotExtractor::new(
            SlotConfig::default(),
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
        )
    }

    fn matched(q: &str) -> Option<String> {
        best_match(&PatternStore::builtin(), &normalize(q), &extractor())
            .unwrap()
            .map(|m| m.pattern.id)
    }

    #[test]
    fn test_builtin_routing() {
        assert_eq!(matched("Show me all parts").as_deref(), Some("list_items"));
        assert_eq!(matched("List all part numbers").as_deref(), Some("list_part_numbers"));
        assert_eq!(matched("Parts with ER code XYZ789").as_deref(), Some("items_by_er_code"));
        assert_eq!(matched("Items created in February 2024").as_deref(), Some("items_created_in"));
        assert_eq!(matched("Items updated in 2023").as_deref(), Some("items_updated_in"));
        assert_eq!(matched("Active items only").as_deref(), Some("items_by_status"));
        assert_eq!(
            matched("active items created last month").as_deref(),
            Some("items_by_status_created_in")
        );
        assert_eq!(matched("parts that cost more than 100").as_deref(), Some("items_by_price"));
        assert_eq!(matched("items with no supplier listed").as_deref(), Some("items_without_supplier"));
        assert_eq!(matched("what's the weather"), None);
        assert_eq!(matched(""), None);
    }

    #[test]
    fn test_anchors_must_be_in_order() {
        let p = PatternStore::builtin().get("items_created_in").unwrap().clone();
        assert!(anchors_match(&p, &normalize("items created in 2020")));
        assert!(!anchors_match(&p, &normalize("created items in 2020")));
    }

    #[test]
    fn test_after_rule_limits_detection() {
        let store = PatternStore::builtin();
        let p = store.get("items_updated_in").unwrap();
        // the only date precedes "updated"
        assert!(!is_candidate(p, &normalize("items from 2020 updated recently"), &extractor()));
    }

    #[test]
    fn test_slot_parse_error_surfaces() {
        let err = best_match(
            &PatternStore::builtin(),
            &normalize("parts with price greater than banana"),
            &extractor(),
        )
        .unwrap_err();
        assert!(matches!(err, NlsqlError::SlotParse { .. }));
    }

    fn twin(id: &str) -> Pattern {
        let mut p = PatternStore::builtin().get("items_by_status").unwrap().clone();
        p.id = id.to_string();
        p.origin = Origin::Learned;
        p
    }

    #[test]
    fn test_tie_break_independent_of_order() {
        let a = twin("learned_0001");
        let b = twin("learned_0002");
        assert_eq!(rank(&a, &b), Ordering::Greater);
        assert_eq!(rank(&b, &a), Ordering::Less);

        let mut forward = PatternStore::empty();
        forward.insert(a.clone()).unwrap();
        forward.insert(b.clone()).unwrap();
        let mut backward = PatternStore::empty();
        backward.insert(b).unwrap();
        backward.insert(a).unwrap();

        let n = normalize("active items");
        let first = best_match(&forward, &n, &extractor()).unwrap().unwrap();
        let second = best_match(&backward, &n, &extractor()).unwrap().unwrap();
        assert_eq!(first.pattern.id, "learned_0001");
        assert_eq!(second.pattern.id, "learned_0001");
    }

    #[test]
    fn test_more_slots_beat_higher_score() {
        let mut single = twin("x_single");
        single.slot_specs.clear();
        single.output_template.predicates.clear();
        single.token_template.pop();
        single.priority = 100;
        let double = twin("x_double");
        assert_eq!(rank(&double, &single), Ordering::Greater);
    }

    #[test]
    fn test_ranking_chain() {
        let mut a = twin("a");
        let mut b = twin("b");
        b.confidence = 0.4;
        assert_eq!(rank(&a, &b), Ordering::Greater);

        // equal score, higher priority wins
        a.priority = 20;
        a.confidence = 0.5;
        b.priority = 10;
        b.confidence = 1.0;
        assert_eq!(rank(&a, &b), Ordering::Greater);

        // equal score and priority, longer template wins
        b.priority = 20;
        b.confidence = 0.5;
        b.token_template.push(TemplateToken::Literal("only".into()));
        assert_eq!(rank(&b, &a), Ordering::Greater);
    }
}
