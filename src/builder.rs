//! Query builder: matched pattern plus slots to [`QueryAst`].
//!
//! Predicates follow the pattern's output template order, never the order
//! slots were found in the question.

use std::collections::BTreeMap;

use crate::ast::{Operator, Predicate, QueryAst, Value};
use crate::error::{NlsqlError, NlsqlResult};
use crate::matcher::MatchedPattern;
use crate::pattern::{Pattern, PredicateTemplate};
use crate::slots::{DateRange, Slot, SlotValue};

pub fn build(matched: &MatchedPattern) -> NlsqlResult<QueryAst> {
    build_from(&matched.pattern, &matched.slots)
}

pub fn build_from(pattern: &Pattern, slots: &BTreeMap<String, Slot>) -> NlsqlResult<QueryAst> {
    let template = &pattern.output_template;
    let mut ast = QueryAst::new(template.table.clone());
    ast.columns = template.columns.clone();

    for predicate in &template.predicates {
        match predicate {
            PredicateTemplate::Fixed { column, op, value } => {
                ast.predicates.push(Predicate::new(column.clone(), *op, value.clone()));
            }
            PredicateTemplate::Slot { column, slot } => {
                let bound = slots.get(slot).ok_or_else(|| NlsqlError::IncompleteBinding {
                    pattern: pattern.id.clone(),
                    placeholder: slot.clone(),
                })?;
                ast.predicates.extend(slot_predicates(column, &bound.value));
            }
        }
    }
    Ok(ast)
}

/// Predicates a slot value expands to on `column`.
pub fn slot_predicates(column: &str, value: &SlotValue) -> Vec<Predicate> {
    match value {
        SlotValue::DateRange(range) => date_predicates(column, range),
        SlotValue::Code(code) => vec![Predicate::new(column, Operator::Eq, code.as_str())],
        SlotValue::Status(status) => vec![Predicate::new(column, Operator::Eq, status.as_str())],
        SlotValue::Comparison { op, value } => vec![Predicate::new(column, *op, value.clone())],
    }
}

/// One `=` for a single day, `>=` then `<=` for a closed range, one bound
/// for an open range.
pub fn date_predicates(column: &str, range: &DateRange) -> Vec<Predicate> {
    match (range.start, range.end) {
        (Some(start), Some(end)) if start == end => {
            vec![Predicate::new(column, Operator::Eq, Value::Date(start))]
        }
        (start, end) => {
            let mut out = Vec::with_capacity(2);
            if let Some(start) = start {
                out.push(Predicate::new(column, Operator::Gte, Value::Date(start)));
            }
            if let Some(end) = end {
                out.push(Predicate::new(column, Operator::Lte, Value::Date(end)));
            }
            out
        }
    }
}
