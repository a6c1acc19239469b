//! Feedback learner.
//!
//! Turns feedback records into pattern store changes:
//!
//! - accepted pattern answer: confidence up, bounded by the ceiling
//! - correction that only changes literal values: confidence down
//! - structural correction: confidence down, plus a synthesized pattern
//! - correction of a fallback answer: a seeded pattern
//!
//! Every change is a pure function of the store and the record, so the
//! store can be rebuilt from the log with [`replay`].

use crate::ast::{Predicate, QueryAst, Value};
use crate::builder::slot_predicates;
use crate::config::LearnerConfig;
use crate::error::NlsqlResult;
use crate::feedback::{FeedbackRecord, Outcome};
use crate::normalizer::normalize;
use crate::parser::parse;
use crate::pattern::{ExtractionRule, Origin, OutputTemplate, Pattern, PredicateTemplate, SlotSpec, TemplateToken};
use crate::schema::SchemaRegistry;
use crate::slots::{Slot, SlotExtractor, SlotType};
use crate::store::PatternStore;
use crate::validator::validate;

/// Words never used as anchors of a synthesized pattern.
const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "be", "been", "by", "can", "do", "does", "display",
    "find", "for", "from", "get", "give", "had", "has", "have", "help", "i", "in", "is", "list",
    "me", "need", "of", "on", "or", "please", "pull", "show", "thank", "thanks", "that", "the",
    "their", "them", "there", "these", "those", "to", "want", "was", "were", "what", "whats",
    "which", "with", "you",
];

/// One store change made by the learner.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Confidence { id: String, from: f64, to: f64 },
    Synthesized { id: String, template: String },
    SynthesisSkipped { reason: String },
    Unchanged,
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Change::Confidence { id, from, to } => {
                write!(f, "{}: confidence {:.2} -> {:.2}", id, from, to)
            }
            Change::Synthesized { id, template } => write!(f, "learned {} ({})", id, template),
            Change::SynthesisSkipped { reason } => write!(f, "no pattern learned: {}", reason),
            Change::Unchanged => write!(f, "no change"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Learner {
    config: LearnerConfig,
    extractor: SlotExtractor,
}

impl Learner {
    pub fn new(config: LearnerConfig, extractor: SlotExtractor) -> Self {
        Self { config, extractor }
    }

    /// Apply one record. `generated` and `corrected` are the validated ASTs
    /// of the record's SQL; `generated` is only needed for corrections.
    pub fn apply(
        &self,
        store: &mut PatternStore,
        record: &FeedbackRecord,
        generated: Option<&QueryAst>,
        corrected: Option<&QueryAst>,
    ) -> NlsqlResult<Vec<Change>> {
        let matched = record
            .pattern_id
            .as_deref()
            .filter(|id| store.contains(id) && !record.route.is_fallback());

        let corrected = match (record.outcome, corrected) {
            (Outcome::Accepted, _) => {
                let change = match matched {
                    Some(id) => self.adjust(store, id, self.config.accept_boost),
                    None => Change::Unchanged,
                };
                return Ok(vec![change]);
            }
            (Outcome::Corrected, None) => return Ok(vec![Change::Unchanged]),
            (Outcome::Corrected, Some(corrected)) => corrected,
        };

        if generated.is_some_and(|g| g == corrected) {
            tracing::debug!("Correction of '{}' is identical to the generated SQL", record.question);
            return Ok(vec![Change::Unchanged]);
        }

        let mut changes = Vec::new();
        let origin = match (matched, generated) {
            (Some(id), Some(g)) if g.same_shape(corrected) => {
                changes.push(self.adjust(store, id, -self.config.value_slip_penalty));
                return Ok(changes);
            }
            (Some(id), _) => {
                changes.push(self.adjust(store, id, -self.config.structural_penalty));
                Origin::Learned
            }
            (None, _) if record.route.is_fallback() => Origin::Seeded,
            (None, _) => Origin::Learned,
        };

        let extractor = self.extractor.on(record.timestamp.date_naive());
        changes.push(self.synthesize(store, &extractor, &record.question, corrected, origin)?);
        Ok(changes)
    }

    /// Move a pattern's confidence by `delta` within `[floor, ceiling]`,
    /// never against the direction of `delta`.
    fn adjust(&self, store: &mut PatternStore, id: &str, delta: f64) -> Change {
        let Some(current) = store.get(id).map(|p| p.confidence) else {
            return Change::Unchanged;
        };
        let target = (current + delta).clamp(self.config.floor, self.config.ceiling);
        let next = if delta >= 0.0 {
            target.max(current)
        } else {
            target.min(current)
        };
        if next == current {
            return Change::Unchanged;
        }
        store.set_confidence(id, next);
        tracing::info!("Pattern {} confidence {:.3} -> {:.3}", id, current, next);
        Change::Confidence {
            id: id.to_string(),
            from: current,
            to: next,
        }
    }

    /// Build a pattern from the question and the corrected query and add it
    /// to the store.
    fn synthesize(
        &self,
        store: &mut PatternStore,
        extractor: &SlotExtractor,
        question: &str,
        corrected: &QueryAst,
        origin: Origin,
    ) -> NlsqlResult<Change> {
        let n = normalize(question);

        // Slots that parse cleanly; a slot parse failure just means no slot.
        let recovered: Vec<Slot> = SlotType::ALL
            .iter()
            .filter_map(|ty| extractor.extract(*ty, &n).ok().flatten())
            .collect();

        let mut bound: Vec<&Slot> = Vec::new();
        let mut predicates = Vec::new();
        let mut k = 0;
        while k < corrected.predicates.len() {
            let rest = &corrected.predicates[k..];
            let hit = recovered
                .iter()
                .filter(|s| !bound.iter().any(|b| b.slot_type == s.slot_type))
                .find_map(|s| {
                    let expected = slot_predicates(&rest[0].column, &s.value);
                    covers(rest, &expected).then_some((s, expected.len()))
                });
            match hit {
                Some((slot, len)) => {
                    predicates.push(PredicateTemplate::Slot {
                        column: rest[0].column.clone(),
                        slot: slot.slot_type.placeholder().to_string(),
                    });
                    bound.push(slot);
                    k += len;
                }
                None => {
                    predicates.push(PredicateTemplate::Fixed {
                        column: rest[0].column.clone(),
                        op: rest[0].op,
                        value: rest[0].value.clone(),
                    });
                    k += 1;
                }
            }
        }

        let mut token_template = Vec::new();
        for (i, token) in n.tokens.iter().enumerate() {
            if let Some(slot) = bound.iter().find(|s| s.span.contains(&i)) {
                if slot.span.start == i {
                    token_template.push(TemplateToken::Slot(slot.slot_type.placeholder().to_string()));
                }
                continue;
            }
            if recovered.iter().any(|s| s.span.contains(&i)) || STOP_WORDS.contains(&token.text.as_str()) {
                continue;
            }
            token_template.push(TemplateToken::Literal(token.text.clone()));
        }

        if !token_template.iter().any(|t| matches!(t, TemplateToken::Literal(_))) {
            let reason = format!("no anchor words left in '{}'", question);
            tracing::info!("Skipped pattern synthesis: {}", reason);
            return Ok(Change::SynthesisSkipped { reason });
        }

        // slot specs in output order
        let slot_specs = predicates
            .iter()
            .filter_map(|p| match p {
                PredicateTemplate::Slot { slot, .. } => Some(slot),
                PredicateTemplate::Fixed { .. } => None,
            })
            .filter_map(|name| bound.iter().find(|s| s.slot_type.placeholder() == name))
            .map(|s| SlotSpec {
                name: s.slot_type.placeholder().to_string(),
                slot_type: s.slot_type,
                rule: ExtractionRule::Anywhere,
            })
            .collect();

        let output_template = OutputTemplate {
            table: corrected.table.clone(),
            columns: corrected.columns.clone(),
            predicates,
        };

        if let Some(existing) = store
            .iter()
            .find(|p| p.token_template == token_template && p.output_template == output_template)
        {
            let reason = format!("same as {}", existing.id);
            tracing::info!("Skipped pattern synthesis: {}", reason);
            return Ok(Change::SynthesisSkipped { reason });
        }

        let confidence = match origin {
            Origin::Seeded => self.config.fallback_seed_confidence,
            _ => self.config.learned_confidence,
        };
        let priority = store
            .min_priority()
            .unwrap_or(1)
            .saturating_sub(self.config.learned_priority_gap)
            .max(1);

        let pattern = Pattern {
            id: store.next_learned_id(),
            token_template,
            slot_specs,
            output_template,
            priority,
            confidence,
            origin,
            source_question: Some(question.to_string()),
        };
        let change = Change::Synthesized {
            id: pattern.id.clone(),
            template: pattern.template_text(),
        };
        tracing::info!(
            "Synthesized pattern {} '{}' (priority {}, confidence {:.2})",
            pattern.id,
            pattern.template_text(),
            priority,
            confidence
        );
        store.insert(pattern)?;
        Ok(change)
    }
}

/// Whether `actual` starts with `expected`, comparing text case-insensitively.
fn covers(actual: &[Predicate], expected: &[Predicate]) -> bool {
    !expected.is_empty()
        && actual.len() >= expected.len()
        && actual.iter().zip(expected).all(|(a, e)| {
            a.column == e.column
                && a.op == e.op
                && match (&a.value, &e.value) {
                    (Value::Text(x), Value::Text(y)) => x.eq_ignore_ascii_case(y),
                    (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
                        (*x as f64) == *y
                    }
                    (x, y) => x == y,
                }
        })
}

/// Parse and validate the SQL of a record.
pub fn record_asts(
    schema: &SchemaRegistry,
    record: &FeedbackRecord,
) -> NlsqlResult<(Option<QueryAst>, Option<QueryAst>)> {
    let corrected = match &record.corrected_sql {
        Some(sql) => Some(validate(schema, parse(sql)?)?),
        None => None,
    };
    let generated = match corrected {
        Some(_) => Some(validate(schema, parse(&record.generated_sql)?)?),
        None => None,
    };
    Ok((generated, corrected))
}

/// Rebuild the store from the built-in set and the feedback log. Records
/// whose SQL no longer validates are skipped.
pub fn replay(
    learner: &Learner,
    schema: &SchemaRegistry,
    records: &[FeedbackRecord],
) -> NlsqlResult<PatternStore> {
    let mut store = PatternStore::builtin();
    for (i, record) in records.iter().enumerate() {
        let (generated, corrected) = match record_asts(schema, record) {
            Ok(asts) => asts,
            Err(e) => {
                tracing::warn!("Skipping feedback record {}: {}", i + 1, e);
                continue;
            }
        };
        learner.apply(&mut store, record, generated.as_ref(), corrected.as_ref())?;
    }
    tracing::info!("Replayed {} feedback records into {} patterns", records.len(), store.len());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::config::SlotConfig;
    use crate::feedback::Route;
    use crate::matcher::best_match;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn learner() -> Learner {
        Learner::new(
            LearnerConfig::default(),
            SlotExtractor::new(SlotConfig::default(), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()),
        )
    }

    fn sql(s: &str) -> QueryAst {
        validate(&SchemaRegistry::builtin(), parse(s).unwrap()).unwrap()
    }

    fn record(question: &str, generated: &str, corrected: Option<&str>, route: Route, id: Option<&str>) -> FeedbackRecord {
        FeedbackRecord::new(
            question,
            generated,
            corrected.map(str::to_string),
            route,
            id.map(str::to_string),
        )
    }

    const ER_SQL: &str =
        "SELECT PART_NUMBER, DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'";

    #[test]
    fn test_accept_raises_confidence_to_ceiling() {
        let mut store = PatternStore::builtin();
        let r = record("Parts with ER code XYZ789", ER_SQL, None, Route::Pattern, Some("items_by_er_code"));
        for _ in 0..10 {
            learner().apply(&mut store, &r, None, None).unwrap();
        }
        assert_eq!(store.get("items_by_er_code").unwrap().confidence, 0.99);
        assert_eq!(learner().apply(&mut store, &r, None, None).unwrap(), vec![Change::Unchanged]);
    }

    #[test]
    fn test_value_slip_lowers_confidence_only() {
        let mut store = PatternStore::builtin();
        let corrected = "SELECT PART_NUMBER, DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ788'";
        let r = record("Parts with ER code XYZ789", ER_SQL, Some(corrected), Route::Pattern, Some("items_by_er_code"));
        let changes = learner()
            .apply(&mut store, &r, Some(&sql(ER_SQL)), Some(&sql(corrected)))
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert!((store.get("items_by_er_code").unwrap().confidence - 0.75).abs() < 1e-9);
        assert_eq!(store.learned_count(), 0);
    }

    #[test]
    fn test_structural_correction_synthesizes() {
        let mut store = PatternStore::builtin();
        let question = "Please pull all the PTO models for ER R1X";
        let generated = "SELECT PART_NUMBER, DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'R1X'";
        let corrected = "SELECT ER_CODE, PART_NUMBER, ITEM_TYPE_NAME FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'R1X' AND ITEM_TYPE_NAME = 'PTO Model'";
        let r = record(question, generated, Some(corrected), Route::Pattern, Some("items_by_er_code"));
        let changes = learner()
            .apply(&mut store, &r, Some(&sql(generated)), Some(&sql(corrected)))
            .unwrap();

        assert!(matches!(changes[0], Change::Confidence { .. }));
        assert!(matches!(changes[1], Change::Synthesized { ref id, .. } if id == "learned_0001"));

        let learned = store.get("learned_0001").unwrap();
        assert_eq!(learned.origin, Origin::Learned);
        assert_eq!(learned.template_text(), "pto models er {code}");
        assert_eq!(learned.priority, 9);
        assert_eq!(learned.confidence, 0.30);
        assert_eq!(
            learned.output_template.predicates[1],
            PredicateTemplate::Fixed {
                column: "ITEM_TYPE_NAME".into(),
                op: crate::ast::Operator::Eq,
                value: Value::Text("PTO Model".into()),
            }
        );
    }

    #[test]
    fn test_synthesized_pattern_reproduces_correction() {
        let mut store = PatternStore::builtin();
        let question = "Show active parts made in 2023 with no supplier";
        let generated = "SELECT * FROM vMTL_SYSTEM_ITEMS WHERE INVENTORY_ITEM_STATUS_CODE = 'ACTIVE' AND CREATION_DATE >= '2023-01-01' AND CREATION_DATE <= '2023-12-31'";
        let corrected = "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS WHERE INVENTORY_ITEM_STATUS_CODE = 'ACTIVE' AND CREATION_DATE >= '2023-01-01' AND CREATION_DATE <= '2023-12-31' AND SUPPLIER IS NULL";
        let r = record(question, generated, Some(corrected), Route::Pattern, Some("items_by_status_created_in"));
        learner()
            .apply(&mut store, &r, Some(&sql(generated)), Some(&sql(corrected)))
            .unwrap();

        let learned = store.get("learned_0001").unwrap().clone();
        assert_eq!(learned.slot_specs.len(), 2);

        let mut only = PatternStore::empty();
        only.insert(learned).unwrap();
        let m = best_match(&only, &normalize(question), &learner().extractor)
            .unwrap()
            .unwrap();
        assert_eq!(build(&m).unwrap(), sql(corrected));
    }

    #[test]
    fn test_fallback_correction_seeds() {
        let mut store = PatternStore::builtin();
        let generated = "SELECT * FROM vMTL_SYSTEM_ITEMS";
        let corrected = "SELECT PART_NUMBER, HAZARD_CLASS_DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE HAZARD_CLASS_DESCRIPTION IS NOT NULL";
        let r = record("which hazardous goods do we stock", generated, Some(corrected), Route::Degraded, None);
        learner()
            .apply(&mut store, &r, Some(&sql(generated)), Some(&sql(corrected)))
            .unwrap();
        let seeded = store.get("learned_0001").unwrap();
        assert_eq!(seeded.origin, Origin::Seeded);
        assert_eq!(seeded.confidence, 0.50);
        assert_eq!(seeded.template_text(), "hazardous goods we stock");
    }

    #[test]
    fn test_identical_correction_changes_nothing() {
        let mut store = PatternStore::builtin();
        let r = record("Parts with ER code XYZ789", ER_SQL, Some(ER_SQL), Route::Pattern, Some("items_by_er_code"));
        let before = store.clone();
        let changes = learner()
            .apply(&mut store, &r, Some(&sql(ER_SQL)), Some(&sql(ER_SQL)))
            .unwrap();
        assert_eq!(changes, vec![Change::Unchanged]);
        assert_eq!(store, before);
    }

    #[test]
    fn test_no_anchor_skips_synthesis() {
        let mut store = PatternStore::builtin();
        let generated = "SELECT * FROM vMTL_SYSTEM_ITEMS";
        let corrected = "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS";
        let r = record("show me all of them", generated, Some(corrected), Route::Degraded, None);
        let changes = learner()
            .apply(&mut store, &r, Some(&sql(generated)), Some(&sql(corrected)))
            .unwrap();
        assert!(matches!(changes[0], Change::SynthesisSkipped { .. }));
        assert_eq!(store.learned_count(), 0);
    }

    #[test]
    fn test_repeated_correction_is_not_duplicated() {
        let mut store = PatternStore::builtin();
        let generated = "SELECT * FROM vMTL_SYSTEM_ITEMS";
        let corrected = "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS";
        let r = record("which widgets exist", generated, Some(corrected), Route::Degraded, None);
        for _ in 0..2 {
            learner()
                .apply(&mut store, &r, Some(&sql(generated)), Some(&sql(corrected)))
                .unwrap();
        }
        assert_eq!(store.learned_count(), 1);
    }

    #[test]
    fn test_replay_matches_live_application() {
        let generated = "SELECT * FROM vMTL_SYSTEM_ITEMS";
        let records = vec![
            record("Show me all parts", generated, None, Route::Pattern, Some("list_items")),
            record("which widgets exist", generated, Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS"), Route::Degraded, None),
            record("Parts with ER code XYZ789", ER_SQL, Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'"), Route::Pattern, Some("items_by_er_code")),
        ];
        let schema = SchemaRegistry::builtin();

        let mut live = PatternStore::builtin();
        for r in &records {
            let (g, c) = record_asts(&schema, r).unwrap();
            learner().apply(&mut live, r, g.as_ref(), c.as_ref()).unwrap();
        }

        let first = replay(&learner(), &schema, &records).unwrap();
        let second = replay(&learner(), &schema, &records).unwrap();
        assert_eq!(first, live);
        assert_eq!(first, second);
        assert_eq!(first.learned_count(), 2);
    }
}
