//! Slot extractor.
//!
//! One typed parser per [`SlotType`]. Each reports `Ok(None)` when its slot
//! is simply absent and [`NlsqlError::SlotParse`] when trigger words are
//! present but the value cannot be read.

pub mod code;
pub mod date;
pub mod numeric;
pub mod status;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::ast::{Operator, Value};
use crate::config::SlotConfig;
use crate::error::NlsqlResult;
use crate::normalizer::Normalized;

pub use date::DateRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotType {
    DateRange,
    Code,
    Status,
    NumericComparison,
}

impl SlotType {
    pub const ALL: [SlotType; 4] = [
        SlotType::DateRange,
        SlotType::Code,
        SlotType::Status,
        SlotType::NumericComparison,
    ];

    /// Default placeholder name for a slot of this type.
    pub fn placeholder(self) -> &'static str {
        match self {
            SlotType::DateRange => "date_range",
            SlotType::Code => "code",
            SlotType::Status => "status",
            SlotType::NumericComparison => "numeric_comparison",
        }
    }
}

impl std::fmt::Display for SlotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SlotType::DateRange => "DATE_RANGE",
            SlotType::Code => "CODE",
            SlotType::Status => "STATUS",
            SlotType::NumericComparison => "NUMERIC_COMPARISON",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    DateRange(DateRange),
    /// Case preserved from the question.
    Code(String),
    /// Canonical upper-case vocabulary word.
    Status(String),
    Comparison { op: Operator, value: Value },
}

/// A typed value extracted from the question.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub slot_type: SlotType,
    pub value: SlotValue,
    /// Token indices the value was read from.
    pub span: Range<usize>,
}

/// Runs the typed slot parsers. Relative dates resolve against `today`.
#[derive(Debug, Clone)]
pub struct SlotExtractor {
    config: SlotConfig,
    today: NaiveDate,
}

impl SlotExtractor {
    pub fn new(config: SlotConfig, today: NaiveDate) -> Self {
        Self { config, today }
    }

    /// Same parsers, different reference date.
    pub fn on(&self, today: NaiveDate) -> Self {
        Self {
            config: self.config.clone(),
            today,
        }
    }

    /// Whether the slot's trigger words occur at or after token `from`.
    pub fn detect(&self, slot_type: SlotType, n: &Normalized, from: usize) -> bool {
        match slot_type {
            SlotType::DateRange => date::detect(n, from),
            SlotType::Code => code::detect(n, from, &self.config),
            SlotType::Status => status::detect(n, from, &self.config.status_vocabulary),
            SlotType::NumericComparison => numeric::detect(n, from),
        }
    }

    pub fn extract(&self, slot_type: SlotType, n: &Normalized) -> NlsqlResult<Option<Slot>> {
        self.extract_from(slot_type, n, 0)
    }

    /// Extract the first slot of `slot_type` at or after token `from`.
    pub fn extract_from(
        &self,
        slot_type: SlotType,
        n: &Normalized,
        from: usize,
    ) -> NlsqlResult<Option<Slot>> {
        let found = match slot_type {
            SlotType::DateRange => date::extract(n, from, self.today)?
                .map(|(range, span)| (SlotValue::DateRange(range), span)),
            SlotType::Code => code::extract(n, from, &self.config)?
                .map(|(code, span)| (SlotValue::Code(code), span)),
            SlotType::Status => status::extract(n, from, &self.config.status_vocabulary)?
                .map(|(status, span)| (SlotValue::Status(status), span)),
            SlotType::NumericComparison => numeric::extract(n, from)?
                .map(|(op, value, span)| (SlotValue::Comparison { op, value }, span)),
        };
        Ok(found.map(|(value, span)| Slot {
            slot_type,
            value,
            span,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::normalize;

    fn extractor() -> SlotExtractor {
        SlotExtractor::new(
            SlotConfig::default(),
            NaiveDate::from_ymd_opt(2024, 3, 20).unwrap(),
        )
    }

    #[test]
    fn test_extract_each_type() {
        let n = normalize("active parts with ER code XYZ789 created in 2023 priced over 10");
        let ex = extractor();
        assert!(matches!(
            ex.extract(SlotType::Status, &n).unwrap().unwrap().value,
            SlotValue::Status(ref s) if s == "ACTIVE"
        ));
        assert!(matches!(
            ex.extract(SlotType::Code, &n).unwrap().unwrap().value,
            SlotValue::Code(ref c) if c == "XYZ789"
        ));
        assert!(matches!(
            ex.extract(SlotType::DateRange, &n).unwrap().unwrap().value,
            SlotValue::DateRange(_)
        ));
        assert!(matches!(
            ex.extract(SlotType::NumericComparison, &n).unwrap().unwrap().value,
            SlotValue::Comparison { op: Operator::Gt, .. }
        ));
    }

    #[test]
    fn test_extract_from_skips_earlier_tokens() {
        let n = normalize("created in 2021 updated in 2023");
        let slot = extractor()
            .extract_from(SlotType::DateRange, &n, 3)
            .unwrap()
            .unwrap();
        assert_eq!(slot.span, 5..6);
    }

    #[test]
    fn test_slot_type_names() {
        assert_eq!(SlotType::NumericComparison.to_string(), "NUMERIC_COMPARISON");
        assert_eq!(
            serde_json::to_string(&SlotType::DateRange).unwrap(),
            "\"DATE_RANGE\""
        );
    }
}
