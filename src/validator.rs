//! Schema validator and corrector.
//!
//! Checks a [`QueryAst`] against the [`SchemaRegistry`], rewriting aliases,
//! case mismatches and allowed-value spellings to their canonical form.
//! Anything it cannot repair is a [`NlsqlError::SchemaViolation`] naming the
//! offending identifier.

use crate::ast::{Operator, QueryAst, Value};
use crate::error::{NlsqlError, NlsqlResult};
use crate::schema::{DataType, Resolution, SchemaColumn, SchemaRegistry, TableDef};

pub fn validate(schema: &SchemaRegistry, mut ast: QueryAst) -> NlsqlResult<QueryAst> {
    let (table, how) = schema
        .resolve_table(&ast.table)
        .ok_or_else(|| NlsqlError::violation(&ast.table, "unknown table"))?;
    if how != Resolution::Exact {
        tracing::info!("Corrected table '{}' -> '{}'", ast.table, table.name);
        ast.table = table.name.clone();
    }

    for column in ast.columns.iter_mut() {
        let resolved = resolve(schema, table, column)?;
        *column = resolved.column.clone();
    }

    for predicate in ast.predicates.iter_mut() {
        let resolved = resolve(schema, table, &predicate.column)?;
        predicate.column = resolved.column.clone();
        check_value(resolved, predicate.op, &mut predicate.value)?;
    }

    Ok(ast)
}

/// Resolve `col` or `table.col` against `table`.
fn resolve<'a>(
    schema: &SchemaRegistry,
    table: &'a TableDef,
    reference: &str,
) -> NlsqlResult<&'a SchemaColumn> {
    let name = match reference.split_once('.') {
        Some((qualifier, name)) => {
            let same_table = schema
                .resolve_table(qualifier)
                .is_some_and(|(t, _)| t.name == table.name);
            if !same_table {
                return Err(NlsqlError::violation(
                    reference,
                    format!("qualifier does not name {}", table.name),
                ));
            }
            name
        }
        None => reference,
    };

    let (column, how) = schema.resolve_column(table, name).ok_or_else(|| {
        NlsqlError::violation(reference, format!("not a column of {}", table.name))
    })?;
    if how != Resolution::Exact || name != reference {
        tracing::info!(
            "Corrected column '{}' -> '{}' on {}",
            reference,
            column.column,
            table.name
        );
    }
    Ok(column)
}

fn check_value(column: &SchemaColumn, op: Operator, value: &mut Value) -> NlsqlResult<()> {
    if op.is_unary() {
        return Ok(());
    }
    let mismatch = |what: &str| {
        NlsqlError::violation(
            &column.column,
            format!("{} column compared with {}", type_name(column.data_type), what),
        )
    };

    match (column.data_type, &*value) {
        (_, Value::Null) => Err(NlsqlError::violation(
            &column.column,
            format!("'{}' NULL; use IS NULL", op),
        )),
        (DataType::Date, Value::Date(_)) => Ok(()),
        (DataType::Date, Value::Text(_)) => Err(mismatch("text")),
        (DataType::Date, _) => Err(mismatch("a number")),
        (_, Value::Date(_)) => Err(mismatch("a date")),
        (DataType::Number, Value::Text(text)) => match text.trim().parse::<f64>() {
            Ok(n) => {
                tracing::info!("Corrected quoted number '{}' on {}", text, column.column);
                *value = Value::number(n);
                Ok(())
            }
            Err(_) => Err(mismatch("text")),
        },
        (DataType::Number, _) => Ok(()),
        (DataType::Text, Value::Text(text)) => match column.canonical_value(text) {
            Some(canonical) if canonical == text => Ok(()),
            Some(canonical) => {
                tracing::info!(
                    "Corrected value '{}' -> '{}' on {}",
                    text,
                    canonical,
                    column.column
                );
                let canonical = canonical.to_string();
                *value = Value::Text(canonical);
                Ok(())
            }
            None => Err(NlsqlError::violation(
                &column.column,
                format!("'{}' is not an allowed value", text),
            )),
        },
        (DataType::Text, _) => Ok(()),
    }
}

fn type_name(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Text => "text",
        DataType::Number => "number",
        DataType::Date => "date",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::transpiler::ToSql;
    use pretty_assertions::assert_eq;

    fn check(sql: &str) -> NlsqlResult<String> {
        validate(&SchemaRegistry::builtin(), parse(sql)?).map(|ast| ast.to_sql())
    }

    #[test]
    fn test_valid_query_unchanged() {
        let sql = "SELECT PART_NUMBER, DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'";
        assert_eq!(check(sql).unwrap(), sql);
    }

    #[test]
    fn test_aliases_corrected() {
        assert_eq!(
            check("select part_no, LIST_PRICE from parts where status = 'active' and ACTUAL_PRICE > 10").unwrap(),
            "SELECT PART_NUMBER, LIST_PRICE_PER_UNIT FROM vMTL_SYSTEM_ITEMS WHERE INVENTORY_ITEM_STATUS_CODE = 'ACTIVE' AND LIST_PRICE_PER_UNIT > 10"
        );
    }

    #[test]
    fn test_qualified_columns() {
        assert_eq!(
            check("SELECT vMTL_SYSTEM_ITEMS.PART_NUMBER FROM vMTL_SYSTEM_ITEMS").unwrap(),
            "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS"
        );
        let err = check("SELECT other.PART_NUMBER FROM vMTL_SYSTEM_ITEMS").unwrap_err();
        assert!(err.to_string().contains("other.PART_NUMBER"));
    }

    #[test]
    fn test_unknown_table_and_column() {
        let err = check("SELECT * FROM weather").unwrap_err();
        assert!(matches!(err, NlsqlError::SchemaViolation { ref identifier, .. } if identifier == "weather"));

        let err = check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE COLOR = 'red'").unwrap_err();
        assert!(matches!(err, NlsqlError::SchemaViolation { ref identifier, .. } if identifier == "COLOR"));
    }

    #[test]
    fn test_status_must_be_allowed() {
        let err = check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE INVENTORY_ITEM_STATUS_CODE = 'RETIRED'")
            .unwrap_err();
        assert!(err.to_string().contains("RETIRED"));
    }

    #[test]
    fn test_date_values_need_date_columns() {
        assert!(check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE PART_NUMBER >= '2024-01-01'").is_err());
        assert!(check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE CREATION_DATE >= 'last week'").is_err());
        assert!(check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE CREATION_DATE >= '2024-01-01'").is_ok());
    }

    #[test]
    fn test_quoted_number_corrected() {
        assert_eq!(
            check("SELECT * FROM vMTL_SYSTEM_ITEMS WHERE LIST_PRICE_PER_UNIT > '100'").unwrap(),
            "SELECT * FROM vMTL_SYSTEM_ITEMS WHERE LIST_PRICE_PER_UNIT > 100"
        );
    }
}
