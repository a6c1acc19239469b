//! Structured representation of a generated SELECT statement.
//!
//! A [`QueryAst`] is built by the query builder (or parsed from corrected
//! SQL), checked once by the validator and then rendered. It is never
//! shared or mutated after rendering.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single-table SELECT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAst {
    pub table: String,
    /// Selected columns in output order. Empty means `*`.
    pub columns: Vec<String>,
    /// WHERE predicates, joined with AND, in render order.
    pub predicates: Vec<Predicate>,
}

impl QueryAst {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            predicates: Vec::new(),
        }
    }

    /// Add a selected column.
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    /// Add a WHERE predicate.
    pub fn filter(mut self, column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::new(column, op, value));
        self
    }

    /// Same table, columns and predicate shapes; literal values may differ.
    pub fn same_shape(&self, other: &QueryAst) -> bool {
        self.table.eq_ignore_ascii_case(&other.table)
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
            && self.predicates.len() == other.predicates.len()
            && self
                .predicates
                .iter()
                .zip(&other.predicates)
                .all(|(a, b)| a.same_shape(b))
    }
}

/// One `column op value` condition. The column may still be written
/// `table.column` until the validator resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub op: Operator,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn same_shape(&self, other: &Predicate) -> bool {
        self.column.eq_ignore_ascii_case(&other.column) && self.op == other.op
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Null checks take no right-hand value.
    pub fn is_unary(self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A literal on the right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    /// Numeric literal from a parsed number, preferring integers.
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
            Value::Int(n as i64)
        } else {
            Value::Float(n)
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Date(d) => write!(f, "'{}'", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display_escapes_quotes() {
        assert_eq!(Value::from("O'Brien").to_string(), "'O''Brien'");
    }

    #[test]
    fn test_number_prefers_int() {
        assert_eq!(Value::number(100.0), Value::Int(100));
        assert_eq!(Value::number(2.5), Value::Float(2.5));
    }

    #[test]
    fn test_same_shape_ignores_values() {
        let a = QueryAst::new("vMTL_SYSTEM_ITEMS").filter("ER_CODE", Operator::Eq, "XYZ789");
        let b = QueryAst::new("vMTL_SYSTEM_ITEMS").filter("ER_CODE", Operator::Eq, "ABC123");
        let c = QueryAst::new("vMTL_SYSTEM_ITEMS")
            .column("PART_NUMBER")
            .filter("ER_CODE", Operator::Eq, "ABC123");
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
    }
}
