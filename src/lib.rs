//! # nlsql: natural-language questions to SQL
//!
//! Turns questions about an inventory database into schema-valid SQL with a
//! deterministic pattern engine, and learns new patterns from corrections.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use nlsql::prelude::*;
//!
//! let engine = Engine::open(Config::load(None)?)?;
//!
//! let answer = engine.process("Show me all parts with ER code XYZ789").await?;
//! // => "SELECT PART_NUMBER, DESCRIPTION FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'"
//!
//! // Teach it
//! engine.record_feedback(
//!     "Show me all parts with ER code XYZ789",
//!     &answer.sql,
//!     Some("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'"),
//! )?;
//! engine.save()?;
//! ```
//!
//! ## Pipeline
//!
//! | Stage      | Module        | Output                        |
//! |------------|---------------|-------------------------------|
//! | Normalize  | `normalizer`  | token stream                  |
//! | Match      | `matcher`     | best pattern, or none         |
//! | Extract    | `slots`       | typed slot values             |
//! | Build      | `builder`     | `QueryAst`                    |
//! | Validate   | `validator`   | corrected `QueryAst`          |
//! | Render     | `transpiler`  | SQL text                      |
//! | Fallback   | `fallback`    | generated or generic query    |

pub mod ast;
pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod fallback;
pub mod feedback;
pub mod learner;
pub mod matcher;
pub mod normalizer;
pub mod parser;
pub mod pattern;
pub mod schema;
pub mod slots;
pub mod store;
pub mod transpiler;
pub mod validator;

pub mod prelude {
    pub use crate::ast::*;
    pub use crate::config::Config;
    pub use crate::engine::{Engine, Stats, Translation};
    pub use crate::error::*;
    pub use crate::fallback::{CommandGenerator, SequenceGenerator};
    pub use crate::feedback::{FeedbackRecord, Outcome, Route};
    pub use crate::learner::Change;
    pub use crate::parser::parse;
    pub use crate::pattern::Pattern;
    pub use crate::schema::SchemaRegistry;
    pub use crate::store::PatternStore;
    pub use crate::transpiler::ToSql;
}

/// Parse the supported SQL subset into a query AST.
///
/// # Example
///
/// ```
/// use nlsql::parse;
///
/// let ast = parse("SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS WHERE ER_CODE = 'XYZ789'").unwrap();
/// assert_eq!(ast.table, "vMTL_SYSTEM_ITEMS");
/// ```
pub fn parse(input: &str) -> Result<ast::QueryAst, error::NlsqlError> {
    parser::parse(input)
}
