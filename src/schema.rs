//! Schema registry.
//!
//! Static description of the tables, columns, types and allowed values the
//! engine may reference. Loaded once at startup and never mutated.
//!
//! # File format
//!
//! ```json
//! {
//!   "tables": [
//!     { "name": "vMTL_SYSTEM_ITEMS",
//!       "columns": [
//!         { "name": "PART_NUMBER", "type": "text" },
//!         { "name": "CREATION_DATE", "type": "date" },
//!         { "name": "INVENTORY_ITEM_STATUS_CODE", "type": "text",
//!           "allowed_values": ["ACTIVE", "INACTIVE"] }
//!       ] }
//!   ],
//!   "aliases": {
//!     "tables": { "parts": "vMTL_SYSTEM_ITEMS" },
//!     "columns": { "LIST_PRICE": "LIST_PRICE_PER_UNIT" }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{NlsqlError, NlsqlResult};

/// The inventory table every built-in pattern targets.
pub const ITEMS_TABLE: &str = "vMTL_SYSTEM_ITEMS";

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[serde(alias = "varchar", alias = "string", alias = "char")]
    Text,
    #[serde(alias = "integer", alias = "int", alias = "numeric", alias = "decimal")]
    Number,
    #[serde(alias = "timestamp", alias = "datetime")]
    Date,
}

impl DataType {
    pub fn is_date_like(self) -> bool {
        self == DataType::Date
    }
}

/// One column of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub table: String,
    pub column: String,
    pub data_type: DataType,
    pub allowed_values: Option<Vec<String>>,
}

impl SchemaColumn {
    /// Canonical spelling of `value` if it is allowed (case-insensitive).
    /// Columns without an allowed set accept anything.
    pub fn canonical_value<'a>(&'a self, value: &'a str) -> Option<&'a str> {
        match &self.allowed_values {
            None => Some(value),
            Some(allowed) => allowed
                .iter()
                .find(|a| a.eq_ignore_ascii_case(value))
                .map(String::as_str),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
}

impl TableDef {
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.column == name)
    }

    fn column_ignore_case(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(name))
    }
}

/// How a name was resolved against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Exact,
    /// Same identifier, different case.
    Case,
    /// Known deprecated or alternative name.
    Alias,
}

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    /// Keyed by upper-cased table name.
    tables: BTreeMap<String, TableDef>,
    /// Upper-cased alias -> canonical table name.
    table_aliases: BTreeMap<String, String>,
    /// Upper-cased alias -> canonical column name.
    column_aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    tables: Vec<TableEntry>,
    #[serde(default)]
    aliases: AliasEntry,
}

#[derive(Debug, Deserialize)]
struct TableEntry {
    name: String,
    columns: Vec<ColumnEntry>,
}

#[derive(Debug, Deserialize)]
struct ColumnEntry {
    name: String,
    #[serde(rename = "type")]
    data_type: DataType,
    #[serde(default)]
    allowed_values: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct AliasEntry {
    #[serde(default)]
    tables: BTreeMap<String, String>,
    #[serde(default)]
    columns: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// Load a schema definition file. Built-in aliases apply unless the
    /// file overrides them.
    pub fn load(path: impl AsRef<Path>) -> NlsqlResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NlsqlError::Config(format!("Failed to read schema {}: {}", path.display(), e))
        })?;
        let registry = Self::from_json(&content)?;
        tracing::info!(
            "Loaded {} table schemas from {}",
            registry.tables.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn from_json(content: &str) -> NlsqlResult<Self> {
        let file: SchemaFile = serde_json::from_str(content)
            .map_err(|e| NlsqlError::Config(format!("Failed to parse schema: {}", e)))?;

        let mut registry = Self::empty();
        for entry in file.tables {
            let columns = entry
                .columns
                .into_iter()
                .map(|c| SchemaColumn {
                    table: entry.name.clone(),
                    column: c.name,
                    data_type: c.data_type,
                    allowed_values: c.allowed_values,
                })
                .collect();
            registry.add_table(TableDef {
                name: entry.name,
                columns,
            })?;
        }

        // Built-in table aliases that point outside a custom schema are dropped.
        for (alias, target) in builtin_table_aliases() {
            if registry.tables.contains_key(&target.to_ascii_uppercase()) {
                registry.table_aliases.insert(alias.to_ascii_uppercase(), target);
            }
        }
        for (alias, target) in file.aliases.tables {
            if !registry.tables.contains_key(&target.to_ascii_uppercase()) {
                return Err(NlsqlError::Config(format!(
                    "Table alias '{}' targets unknown table '{}'",
                    alias, target
                )));
            }
            registry.table_aliases.insert(alias.to_ascii_uppercase(), target);
        }
        for (alias, target) in builtin_column_aliases().into_iter().chain(file.aliases.columns) {
            registry.column_aliases.insert(alias.to_ascii_uppercase(), target);
        }
        Ok(registry)
    }

    /// The inventory schema used when no schema file is configured.
    pub fn builtin() -> Self {
        use DataType::*;

        let flag = || Some(vec!["Y".to_string(), "N".to_string()]);
        let spec: &[(&str, DataType, Option<Vec<String>>)] = &[
            ("ORGANIZATION_ID", Number, None),
            ("ORGANIZATION_CODE", Text, None),
            ("INVENTORY_ITEM_ID", Number, None),
            ("PART_NUMBER", Text, None),
            ("DESCRIPTION", Text, None),
            ("ITEM_TYPE", Text, None),
            ("ITEM_TYPE_NAME", Text, None),
            (
                "INVENTORY_ITEM_STATUS_CODE",
                Text,
                Some(
                    ["ACTIVE", "INACTIVE", "OBSOLETE", "PENDING", "ORDERABLE"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                ),
            ),
            ("PLANNER_CODE", Text, None),
            ("PLANNER_NAME", Text, None),
            ("BUYER_NAME", Text, None),
            (
                "PLANNING_MAKE_BUY_CODE_NAME",
                Text,
                Some(vec!["Make".to_string(), "Buy".to_string()]),
            ),
            ("ER_CODE", Text, None),
            ("SUPPLIER", Text, None),
            ("MAIN_CATEGORY", Text, None),
            ("TAX_CODE", Text, None),
            ("COST_OF_SALES_ACCOUNT", Text, None),
            ("EXPENSE_ACCOUNT", Text, None),
            ("SALES_ACCOUNT", Text, None),
            ("SERIAL_NUMBER_CONTROL_CODE", Text, None),
            ("HAZARD_CLASS_DESCRIPTION", Text, None),
            ("ENVIRONMENTAL_COMPLIANCE_STATUS", Text, None),
            ("ATTRIBUTE11", Text, None),
            ("CREATION_DATE", Date, None),
            ("LAST_UPDATE_DATE", Date, None),
            ("LIST_PRICE_PER_UNIT", Number, None),
            ("CUM_MANUFACTURING_LEAD_TIME", Number, None),
            ("FIXED_LEAD_TIME", Number, None),
            ("MINIMUM_ORDER_QUANTITY", Number, None),
            ("MAXIMUM_ORDER_QUANTITY", Number, None),
            ("FIXED_ORDER_QUANTITY", Number, None),
            ("PLANNING_TIME_FENCE_DAYS", Number, None),
            ("WARRANTY_VENDOR_ID", Number, None),
            ("ORDERABLE_ON_WEB_FLAG", Text, flag()),
            ("BACK_ORDERABLE_FLAG", Text, flag()),
            ("INTERNAL_ORDER_ENABLED_FLAG", Text, flag()),
            ("CUSTOMER_ORDER_ENABLED_FLAG", Text, flag()),
            ("INSPECTION_REQUIRED_FLAG", Text, flag()),
            ("RETURNABLE_FLAG", Text, flag()),
            ("BOM_ENABLED_FLAG", Text, flag()),
            ("COSTING_ENABLED_FLAG", Text, flag()),
        ];

        let columns = spec
            .iter()
            .map(|(name, data_type, allowed)| SchemaColumn {
                table: ITEMS_TABLE.to_string(),
                column: name.to_string(),
                data_type: *data_type,
                allowed_values: allowed.clone(),
            })
            .collect();

        let mut registry = Self::empty();
        registry.tables.insert(
            ITEMS_TABLE.to_ascii_uppercase(),
            TableDef {
                name: ITEMS_TABLE.to_string(),
                columns,
            },
        );
        for (alias, target) in builtin_table_aliases() {
            registry.table_aliases.insert(alias.to_ascii_uppercase(), target);
        }
        for (alias, target) in builtin_column_aliases() {
            registry.column_aliases.insert(alias.to_ascii_uppercase(), target);
        }
        registry
    }

    fn empty() -> Self {
        Self {
            tables: BTreeMap::new(),
            table_aliases: BTreeMap::new(),
            column_aliases: BTreeMap::new(),
        }
    }

    fn add_table(&mut self, table: TableDef) -> NlsqlResult<()> {
        let key = table.name.to_ascii_uppercase();
        if self.tables.contains_key(&key) {
            return Err(NlsqlError::Config(format!("Duplicate table '{}'", table.name)));
        }
        for (i, col) in table.columns.iter().enumerate() {
            if table.columns[..i]
                .iter()
                .any(|c| c.column.eq_ignore_ascii_case(&col.column))
            {
                return Err(NlsqlError::Config(format!(
                    "Duplicate column '{}' on '{}'",
                    col.column, table.name
                )));
            }
            if col.data_type.is_date_like() && col.allowed_values.is_some() {
                return Err(NlsqlError::Config(format!(
                    "Date column '{}.{}' cannot declare allowed values",
                    table.name, col.column
                )));
            }
        }
        tracing::debug!("Loaded schema for table: {}", table.name);
        self.tables.insert(key, table);
        Ok(())
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Resolve a table name: exact, then case-insensitive, then alias.
    pub fn resolve_table(&self, name: &str) -> Option<(&TableDef, Resolution)> {
        let key = name.to_ascii_uppercase();
        if let Some(table) = self.tables.get(&key) {
            let how = if table.name == name {
                Resolution::Exact
            } else {
                Resolution::Case
            };
            return Some((table, how));
        }
        let target = self.table_aliases.get(&key)?;
        self.tables
            .get(&target.to_ascii_uppercase())
            .map(|t| (t, Resolution::Alias))
    }

    /// Resolve a column of `table`: exact, then case-insensitive, then alias.
    pub fn resolve_column<'a>(
        &self,
        table: &'a TableDef,
        name: &str,
    ) -> Option<(&'a SchemaColumn, Resolution)> {
        if let Some(col) = table.column(name) {
            return Some((col, Resolution::Exact));
        }
        if let Some(col) = table.column_ignore_case(name) {
            return Some((col, Resolution::Case));
        }
        let target = self.column_aliases.get(&name.to_ascii_uppercase())?;
        table.column(target).map(|c| (c, Resolution::Alias))
    }

    /// Look up a column by canonical names.
    pub fn column(&self, table: &str, column: &str) -> Option<&SchemaColumn> {
        self.tables
            .get(&table.to_ascii_uppercase())
            .and_then(|t| t.column(column))
    }

    /// One line per table, `- TABLE (COL, COL, ...)`, for the fallback prompt.
    pub fn summary(&self) -> String {
        let mut out = String::from("Tables:\n");
        for table in self.tables.values() {
            let cols: Vec<&str> = table.columns.iter().map(|c| c.column.as_str()).collect();
            out.push_str(&format!("- {} ({})\n", table.name, cols.join(", ")));
        }
        out
    }
}

fn builtin_table_aliases() -> Vec<(String, String)> {
    ["parts", "items", "MTL_SYSTEM_ITEMS"]
        .iter()
        .map(|a| (a.to_string(), ITEMS_TABLE.to_string()))
        .collect()
}

fn builtin_column_aliases() -> Vec<(String, String)> {
    [
        ("LIST_PRICE", "LIST_PRICE_PER_UNIT"),
        ("ACTUAL_PRICE", "LIST_PRICE_PER_UNIT"),
        ("PRICE", "LIST_PRICE_PER_UNIT"),
        ("STATUS", "INVENTORY_ITEM_STATUS_CODE"),
        ("ITEM_STATUS", "INVENTORY_ITEM_STATUS_CODE"),
        ("PART_NO", "PART_NUMBER"),
        ("BACKORDERABLE_FLAG", "BACK_ORDERABLE_FLAG"),
        ("ORDERABLE_FLAG", "ORDERABLE_ON_WEB_FLAG"),
        ("HAZARD_CLASS_DESC", "HAZARD_CLASS_DESCRIPTION"),
        ("CATEGORY_NAME", "MAIN_CATEGORY"),
    ]
    .iter()
    .map(|(a, t)| (a.to_string(), t.to_string()))
    .collect()
}
