//! Fallback dispatcher.
//!
//! Used only when no pattern matches. Hands the question and a schema summary
//! to an external [`SequenceGenerator`] under a timeout. Generated SQL goes
//! through the same parser and validator as everything else. When the
//! generator is missing, fails, times out or returns something unparsable,
//! the answer degrades to `SELECT * FROM <default table>`.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::ast::QueryAst;
use crate::config::FallbackConfig;
use crate::error::{NlsqlError, NlsqlResult};
use crate::feedback::Route;
use crate::parser::parse;
use crate::schema::SchemaRegistry;
use crate::validator::validate;

/// External text-to-SQL model. The engine owns nothing of its lifecycle.
#[async_trait]
pub trait SequenceGenerator: Send + Sync {
    async fn generate(&self, question: &str, schema_summary: &str) -> NlsqlResult<String>;
}

/// Runs an external program: prompt on stdin, SQL on stdout.
///
/// The child is killed if the call is dropped, which is what a timeout does.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(argv: &[String]) -> NlsqlResult<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| NlsqlError::Config("fallback.command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Prompt text handed to a generator.
pub fn prompt(question: &str, schema_summary: &str) -> String {
    format!(
        "{}\nConvert this question to SQL. Use proper SQL syntax with quotes for string values: {}\n",
        schema_summary.trim_end(),
        question
    )
}

#[async_trait]
impl SequenceGenerator for CommandGenerator {
    async fn generate(&self, question: &str, schema_summary: &str) -> NlsqlResult<String> {
        let unavailable = |e: std::io::Error| {
            NlsqlError::FallbackUnavailable(format!("{}: {}", self.program, e))
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(unavailable)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt(question, schema_summary).as_bytes())
                .await
                .map_err(unavailable)?;
        }

        let output = child.wait_with_output().await.map_err(unavailable)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NlsqlError::FallbackUnavailable(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        String::from_utf8(output.stdout).map_err(|e| {
            NlsqlError::FallbackUnavailable(format!("{} wrote invalid UTF-8: {}", self.program, e))
        })
    }
}

/// Strip markdown code fences, leading prose and a trailing `;`.
pub fn clean_generated(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = if let Some(s) = trimmed.strip_prefix("```sql") {
        s
    } else if let Some(s) = trimmed.strip_prefix("```") {
        s
    } else {
        trimmed
    };
    let sql = inner.strip_suffix("```").unwrap_or(inner).trim();
    let sql = match sql.to_ascii_lowercase().find("select") {
        Some(start) => &sql[start..],
        None => sql,
    };
    sql.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

/// Result of a fallback dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAnswer {
    pub ast: QueryAst,
    /// `Fallback` for generated SQL, `Degraded` for the generic answer.
    pub route: Route,
}

pub struct FallbackDispatcher {
    generator: Option<Arc<dyn SequenceGenerator>>,
    timeout: Duration,
    default_table: String,
}

impl FallbackDispatcher {
    pub fn new(config: &FallbackConfig, generator: Option<Arc<dyn SequenceGenerator>>) -> Self {
        Self {
            generator,
            timeout: Duration::from_millis(config.timeout_ms),
            default_table: config.default_table.clone(),
        }
    }

    /// Build the dispatcher described by the config, running
    /// `fallback.command` when one is set.
    pub fn from_config(config: &FallbackConfig) -> NlsqlResult<Self> {
        let generator = match &config.command {
            Some(argv) => Some(Arc::new(CommandGenerator::new(argv)?) as Arc<dyn SequenceGenerator>),
            None => None,
        };
        Ok(Self::new(config, generator))
    }

    pub fn with_generator(mut self, generator: Arc<dyn SequenceGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// The generic answer used when generation is not possible.
    pub fn degraded(&self, schema: &SchemaRegistry) -> NlsqlResult<QueryAst> {
        validate(schema, QueryAst::new(self.default_table.clone()))
    }

    pub async fn dispatch(&self, question: &str, schema: &SchemaRegistry) -> NlsqlResult<FallbackAnswer> {
        match self.generate(question, schema).await {
            Ok(raw) => {
                let sql = clean_generated(&raw);
                match parse(&sql) {
                    Ok(ast) => {
                        let ast = validate(schema, ast)?;
                        tracing::info!("Fallback generated SQL for '{}'", question);
                        return Ok(FallbackAnswer {
                            ast,
                            route: Route::Fallback,
                        });
                    }
                    Err(e) => {
                        tracing::warn!("Fallback output unusable ({}), degrading: {}", e, sql);
                    }
                }
            }
            Err(e) => tracing::warn!("{}, degrading", e),
        }

        Ok(FallbackAnswer {
            ast: self.degraded(schema)?,
            route: Route::Degraded,
        })
    }

    async fn generate(&self, question: &str, schema: &SchemaRegistry) -> NlsqlResult<String> {
        let generator = self.generator.as_ref().ok_or_else(|| {
            NlsqlError::FallbackUnavailable("no sequence generator configured".to_string())
        })?;
        let summary = schema.summary();
        match tokio::time::timeout(self.timeout, generator.generate(question, &summary)).await {
            Ok(result) => result,
            Err(_) => Err(NlsqlError::FallbackUnavailable(format!(
                "timed out after {} ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transpiler::ToSql;
    use pretty_assertions::assert_eq;

    struct Fixed(&'static str);

    #[async_trait]
    impl SequenceGenerator for Fixed {
        async fn generate(&self, _question: &str, _schema_summary: &str) -> NlsqlResult<String> {
            Ok(self.0.to_string())
        }
    }

    struct Down;

    #[async_trait]
    impl SequenceGenerator for Down {
        async fn generate(&self, _question: &str, _schema_summary: &str) -> NlsqlResult<String> {
            Err(NlsqlError::FallbackUnavailable("connection refused".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl SequenceGenerator for Slow {
        async fn generate(&self, _question: &str, _schema_summary: &str) -> NlsqlResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("SELECT * FROM vMTL_SYSTEM_ITEMS".to_string())
        }
    }

    fn dispatcher(generator: Option<Arc<dyn SequenceGenerator>>) -> FallbackDispatcher {
        let config = FallbackConfig {
            timeout_ms: 50,
            ..FallbackConfig::default()
        };
        FallbackDispatcher::new(&config, generator)
    }

    #[test]
    fn test_clean_generated() {
        assert_eq!(
            clean_generated("```sql\nSELECT * FROM t;\n```"),
            "SELECT * FROM t"
        );
        assert_eq!(clean_generated("Here you go: select A from t ;"), "select A from t");
    }

    #[test]
    fn test_prompt_contains_summary_and_question() {
        let p = prompt("what's the weather", "Tables:\n- T (A, B)\n");
        assert!(p.starts_with("Tables:\n- T (A, B)\n"));
        assert!(p.ends_with("what's the weather\n"));
    }

    #[tokio::test]
    async fn test_generated_sql_is_validated_and_corrected() {
        let d = dispatcher(Some(Arc::new(Fixed(
            "```sql\nSELECT part_no FROM parts WHERE status = 'obsolete';\n```",
        ))));
        let answer = d.dispatch("obsolete part numbers", &SchemaRegistry::builtin()).await.unwrap();
        assert_eq!(answer.route, Route::Fallback);
        assert_eq!(
            answer.ast.to_sql(),
            "SELECT PART_NUMBER FROM vMTL_SYSTEM_ITEMS WHERE INVENTORY_ITEM_STATUS_CODE = 'OBSOLETE'"
        );
    }

    #[tokio::test]
    async fn test_unavailable_generator_degrades() {
        for generator in [None, Some(Arc::new(Down) as Arc<dyn SequenceGenerator>)] {
            let answer = dispatcher(generator)
                .dispatch("what's the weather", &SchemaRegistry::builtin())
                .await
                .unwrap();
            assert_eq!(answer.route, Route::Degraded);
            assert_eq!(answer.ast.to_sql(), "SELECT * FROM vMTL_SYSTEM_ITEMS");
        }
    }

    #[tokio::test]
    async fn test_timeout_degrades() {
        let answer = dispatcher(Some(Arc::new(Slow)))
            .dispatch("anything", &SchemaRegistry::builtin())
            .await
            .unwrap();
        assert_eq!(answer.route, Route::Degraded);
    }

    #[tokio::test]
    async fn test_unparsable_output_degrades() {
        let answer = dispatcher(Some(Arc::new(Fixed("I don't know"))))
            .dispatch("anything", &SchemaRegistry::builtin())
            .await
            .unwrap();
        assert_eq!(answer.route, Route::Degraded);
    }

    #[tokio::test]
    async fn test_invalid_generated_sql_is_violation() {
        let err = dispatcher(Some(Arc::new(Fixed("SELECT temperature FROM weather"))))
            .dispatch("what's the weather", &SchemaRegistry::builtin())
            .await
            .unwrap_err();
        assert!(matches!(err, NlsqlError::SchemaViolation { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_generator() {
        let generator = CommandGenerator::new(&[
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; echo 'SELECT * FROM vMTL_SYSTEM_ITEMS'".to_string(),
        ])
        .unwrap();
        let out = generator.generate("q", "Tables:\n").await.unwrap();
        assert_eq!(out.trim(), "SELECT * FROM vMTL_SYSTEM_ITEMS");

        let missing = CommandGenerator::new(&["/nonexistent/generator".to_string()]).unwrap();
        assert!(matches!(
            missing.generate("q", "").await,
            Err(NlsqlError::FallbackUnavailable(_))
        ));
        assert!(CommandGenerator::new(&[]).is_err());
    }
}
