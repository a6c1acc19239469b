//! SQL renderer for [`QueryAst`].
//!
//! Rendering is pure and infallible: anything that reaches this stage has
//! already passed the schema validator.

use crate::ast::*;

/// Trait for converting AST nodes to SQL.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

impl ToSql for QueryAst {
    fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        // Columns
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }

        // FROM
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        // WHERE, in builder order
        if !self.predicates.is_empty() {
            let conditions: Vec<String> = self.predicates.iter().map(|p| p.to_sql()).collect();
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql
    }
}

impl ToSql for Predicate {
    fn to_sql(&self) -> String {
        if self.op.is_unary() {
            format!("{} {}", self.column, self.op)
        } else {
            format!("{} {} {}", self.column, self.op, self.value)
        }
    }
}
