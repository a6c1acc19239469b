//! Pattern data model and the built-in pattern set.
//!
//! A [`Pattern`] maps a phrasing (literal anchors plus typed slots) to an
//! output template. Patterns are immutable once created; only `confidence`
//! is adjusted by the learner.

use serde::{Deserialize, Serialize};

use crate::ast::{Operator, Value};
use crate::error::{NlsqlError, NlsqlResult};
use crate::schema::ITEMS_TABLE;
use crate::slots::SlotType;

/// Confidence every built-in pattern starts with.
pub const BUILTIN_CONFIDENCE: f64 = 0.8;

/// One element of a token template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TemplateToken {
    /// Anchor word. `a|b` accepts either alternative.
    Literal(String),
    /// Placeholder naming a slot spec.
    Slot(String),
}

impl TemplateToken {
    /// Parse `"items er {er_code}"` into literals and placeholders.
    pub fn parse_template(template: &str) -> Vec<TemplateToken> {
        template
            .split_whitespace()
            .map(|word| match word.strip_prefix('{').and_then(|w| w.strip_suffix('}')) {
                Some(name) => TemplateToken::Slot(name.to_string()),
                None => TemplateToken::Literal(word.to_string()),
            })
            .collect()
    }

    pub fn accepts(&self, word: &str) -> bool {
        match self {
            TemplateToken::Literal(alternatives) => alternatives.split('|').any(|a| a == word),
            TemplateToken::Slot(_) => false,
        }
    }
}

impl std::fmt::Display for TemplateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateToken::Literal(w) => f.write_str(w),
            TemplateToken::Slot(name) => write!(f, "{{{}}}", name),
        }
    }
}

/// Where in the question a slot is looked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "word", rename_all = "snake_case")]
pub enum ExtractionRule {
    #[default]
    Anywhere,
    /// Only after the first occurrence of this anchor word.
    After(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub slot_type: SlotType,
    #[serde(default)]
    pub rule: ExtractionRule,
}

/// One WHERE entry of an output template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateTemplate {
    /// Bound from a slot; the slot decides operator(s) and value.
    Slot { column: String, slot: String },
    Fixed {
        column: String,
        op: Operator,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputTemplate {
    pub table: String,
    /// Empty means `*`.
    pub columns: Vec<String>,
    pub predicates: Vec<PredicateTemplate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Builtin,
    /// Synthesized from a correction of a pattern answer.
    Learned,
    /// Synthesized from a correction of a fallback answer.
    Seeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub token_template: Vec<TemplateToken>,
    pub slot_specs: Vec<SlotSpec>,
    pub output_template: OutputTemplate,
    pub priority: u32,
    pub confidence: f64,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_question: Option<String>,
}

impl Pattern {
    pub fn score(&self) -> f64 {
        f64::from(self.priority) * self.confidence
    }

    pub fn anchors(&self) -> impl Iterator<Item = &TemplateToken> {
        self.token_template
            .iter()
            .filter(|t| matches!(t, TemplateToken::Literal(_)))
    }

    pub fn slot_spec(&self, name: &str) -> Option<&SlotSpec> {
        self.slot_specs.iter().find(|s| s.name == name)
    }

    pub fn is_learned(&self) -> bool {
        self.origin != Origin::Builtin
    }

    /// Template as text, e.g. `items er {er_code}`.
    pub fn template_text(&self) -> String {
        self.token_template
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Every placeholder must name a slot spec and the pattern needs an anchor.
    pub fn check(&self) -> NlsqlResult<()> {
        let bad = |what: String| NlsqlError::Config(format!("Pattern '{}': {}", self.id, what));

        if self.anchors().next().is_none() {
            return Err(bad("no literal anchor".to_string()));
        }
        for token in &self.token_template {
            if let TemplateToken::Slot(name) = token {
                if self.slot_spec(name).is_none() {
                    return Err(bad(format!("template placeholder '{}' has no slot spec", name)));
                }
            }
        }
        for (i, spec) in self.slot_specs.iter().enumerate() {
            if self.slot_specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(bad(format!("duplicate slot '{}'", spec.name)));
            }
        }
        for predicate in &self.output_template.predicates {
            if let PredicateTemplate::Slot { slot, .. } = predicate {
                if self.slot_spec(slot).is_none() {
                    return Err(bad(format!("output placeholder '{}' has no slot spec", slot)));
                }
            }
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(bad(format!("confidence {} outside [0, 1]", self.confidence)));
        }
        Ok(())
    }
}

/// Fluent construction for the shipped patterns.
struct PatternDef {
    pattern: Pattern,
}

impl PatternDef {
    fn new(id: &str, template: &str, priority: u32) -> Self {
        Self {
            pattern: Pattern {
                id: id.to_string(),
                token_template: TemplateToken::parse_template(template),
                slot_specs: Vec::new(),
                output_template: OutputTemplate {
                    table: ITEMS_TABLE.to_string(),
                    columns: Vec::new(),
                    predicates: Vec::new(),
                },
                priority,
                confidence: BUILTIN_CONFIDENCE,
                origin: Origin::Builtin,
                source_question: None,
            },
        }
    }

    fn slot(mut self, name: &str, slot_type: SlotType, rule: ExtractionRule) -> Self {
        self.pattern.slot_specs.push(SlotSpec {
            name: name.to_string(),
            slot_type,
            rule,
        });
        self
    }

    fn select(mut self, columns: &[&str]) -> Self {
        self.pattern.output_template.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    fn where_slot(mut self, column: &str, slot: &str) -> Self {
        self.pattern.output_template.predicates.push(PredicateTemplate::Slot {
            column: column.to_string(),
            slot: slot.to_string(),
        });
        self
    }

    fn where_fixed(mut self, column: &str, op: Operator, value: Value) -> Self {
        self.pattern.output_template.predicates.push(PredicateTemplate::Fixed {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    fn build(self) -> Pattern {
        self.pattern
    }
}

/// The shipped pattern set, all on the inventory items table.
pub fn builtin_patterns() -> Vec<Pattern> {
    use ExtractionRule::{After, Anywhere};
    use SlotType::*;

    vec![
        PatternDef::new("list_items", "items", 10).build(),
        PatternDef::new("list_part_numbers", "items numbers", 20)
            .select(&["PART_NUMBER"])
            .build(),
        PatternDef::new("list_descriptions", "items descriptions", 20)
            .select(&["PART_NUMBER", "DESCRIPTION"])
            .build(),
        PatternDef::new("items_by_er_code", "items er {er_code}", 30)
            .slot("er_code", Code, Anywhere)
            .select(&["PART_NUMBER", "DESCRIPTION"])
            .where_slot("ER_CODE", "er_code")
            .build(),
        PatternDef::new("items_by_part_number", "items numbers {part_number}", 30)
            .slot("part_number", Code, Anywhere)
            .where_slot("PART_NUMBER", "part_number")
            .build(),
        PatternDef::new("items_created_in", "items created {created}", 30)
            .slot("created", DateRange, After("created".into()))
            .where_slot("CREATION_DATE", "created")
            .build(),
        PatternDef::new("items_updated_in", "items updated {updated}", 30)
            .slot("updated", DateRange, After("updated".into()))
            .where_slot("LAST_UPDATE_DATE", "updated")
            .build(),
        PatternDef::new("items_by_status", "items {status}", 30)
            .slot("status", Status, Anywhere)
            .where_slot("INVENTORY_ITEM_STATUS_CODE", "status")
            .build(),
        PatternDef::new("items_by_status_created_in", "items {status} created {created}", 40)
            .slot("status", Status, Anywhere)
            .slot("created", DateRange, After("created".into()))
            .where_slot("INVENTORY_ITEM_STATUS_CODE", "status")
            .where_slot("CREATION_DATE", "created")
            .build(),
        PatternDef::new("items_by_price", "price {price}", 30)
            .slot("price", NumericComparison, Anywhere)
            .select(&["PART_NUMBER", "DESCRIPTION", "LIST_PRICE_PER_UNIT"])
            .where_slot("LIST_PRICE_PER_UNIT", "price")
            .build(),
        PatternDef::new("items_by_lead_time", "lead time {lead_time}", 30)
            .slot("lead_time", NumericComparison, Anywhere)
            .select(&["PART_NUMBER", "DESCRIPTION", "CUM_MANUFACTURING_LEAD_TIME"])
            .where_slot("CUM_MANUFACTURING_LEAD_TIME", "lead_time")
            .build(),
        PatternDef::new("items_by_order_quantity", "order quantity {quantity}", 30)
            .slot("quantity", NumericComparison, Anywhere)
            .select(&["PART_NUMBER", "MINIMUM_ORDER_QUANTITY"])
            .where_slot("MINIMUM_ORDER_QUANTITY", "quantity")
            .build(),
        PatternDef::new("items_by_max_order_quantity", "maximum order quantity {quantity}", 31)
            .slot("quantity", NumericComparison, After("quantity".into()))
            .select(&["PART_NUMBER", "MAXIMUM_ORDER_QUANTITY"])
            .where_slot("MAXIMUM_ORDER_QUANTITY", "quantity")
            .build(),
        PatternDef::new("items_without_supplier", "items no|without suppliers", 30)
            .select(&["PART_NUMBER", "SUPPLIER"])
            .where_fixed("SUPPLIER", Operator::IsNull, Value::Null)
            .build(),
    ]
}
