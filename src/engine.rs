//! Translation engine.
//!
//! Owns the schema, the pattern store and the feedback log, and exposes the
//! two entry points used by every front end: [`Engine::process`] and
//! [`Engine::record_feedback`].
//!
//! Readers work on an `Arc<PatternStore>` snapshot. Mutations are serialized
//! on one writer lock that owns the feedback log: the writer copies the
//! current store, applies the learner, appends the record and then publishes
//! the new snapshot.

use chrono::{Local, NaiveDate};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::ast::QueryAst;
use crate::builder::build;
use crate::config::Config;
use crate::error::NlsqlResult;
use crate::fallback::{FallbackDispatcher, SequenceGenerator};
use crate::feedback::{FeedbackLog, FeedbackRecord, Outcome, Route};
use crate::learner::{record_asts, replay, Change, Learner};
use crate::matcher::best_match;
use crate::normalizer::normalize;
use crate::parser::parse;
use crate::schema::SchemaRegistry;
use crate::slots::SlotExtractor;
use crate::store::PatternStore;
use crate::transpiler::ToSql;
use crate::validator::validate;

/// Answer to one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub sql: String,
    pub route: Route,
    /// Winning pattern, for `Route::Pattern`.
    pub pattern_id: Option<String>,
}

impl std::fmt::Display for Translation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql)
    }
}

/// How a correction differs from the generated query. The first matching
/// category wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    ChangedTable,
    MissingWhereClause,
    ExtraColumns,
    ChangedValues,
}

impl ErrorCategory {
    pub fn classify(generated: &QueryAst, corrected: &QueryAst) -> Option<Self> {
        if generated.table != corrected.table {
            Some(Self::ChangedTable)
        } else if generated.predicates.is_empty() && !corrected.predicates.is_empty() {
            Some(Self::MissingWhereClause)
        } else if generated.columns != corrected.columns {
            Some(Self::ExtraColumns)
        } else if generated.same_shape(corrected) && generated != corrected {
            Some(Self::ChangedValues)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ChangedTable => "changed_table",
            Self::MissingWhereClause => "missing_where_clause",
            Self::ExtraColumns => "extra_columns",
            Self::ChangedValues => "changed_values",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Requests answered by this process.
    pub total: u64,
    pub pattern: u64,
    pub fallback: u64,
    pub degraded: u64,
    /// Feedback counts, from the whole log.
    pub accepted: usize,
    pub corrected: usize,
    pub learned_patterns: usize,
    pub errors: BTreeMap<ErrorCategory, usize>,
}

impl Stats {
    /// Share of logged feedback that was accepted as generated.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.accepted + self.corrected;
        (total > 0).then(|| self.accepted as f64 / total as f64)
    }
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "requests:         {}", self.total)?;
        writeln!(f, "  pattern:        {}", self.pattern)?;
        writeln!(f, "  fallback:       {}", self.fallback)?;
        writeln!(f, "  degraded:       {}", self.degraded)?;
        writeln!(f, "accepted:         {}", self.accepted)?;
        writeln!(f, "corrected:        {}", self.corrected)?;
        if let Some(rate) = self.success_rate() {
            writeln!(f, "success rate:     {:.1}%", rate * 100.0)?;
        }
        writeln!(f, "learned patterns: {}", self.learned_patterns)?;
        for (category, count) in &self.errors {
            writeln!(f, "  {}: {}", category, count)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    pattern: AtomicU64,
    fallback: AtomicU64,
    degraded: AtomicU64,
}

impl Counters {
    fn count(&self, route: Route) {
        let counter = match route {
            Route::Pattern => &self.pattern,
            Route::Fallback => &self.fallback,
            Route::Degraded => &self.degraded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Writer {
    log: FeedbackLog,
    learner: Learner,
}

pub struct Engine {
    config: Config,
    schema: SchemaRegistry,
    store: RwLock<Arc<PatternStore>>,
    writer: Mutex<Writer>,
    dispatcher: FallbackDispatcher,
    reference_date: Option<NaiveDate>,
    persisted: AtomicBool,
    counters: Counters,
}

impl Engine {
    /// Load schema, pattern store and feedback log from the configured
    /// paths. A missing pattern file with a non-empty log is rebuilt by
    /// replaying the log.
    pub fn open(config: Config) -> NlsqlResult<Self> {
        let schema = match &config.paths.schema {
            Some(path) => SchemaRegistry::load(path)?,
            None => SchemaRegistry::builtin(),
        };
        let log = FeedbackLog::open(&config.paths.feedback)?;
        let store = if !config.paths.patterns.exists() && !log.is_empty() {
            let learner = Learner::new(config.learner.clone(), extractor(&config, None));
            replay(&learner, &schema, log.records())?
        } else {
            PatternStore::load(&config.paths.patterns)?
        };
        let dispatcher = FallbackDispatcher::from_config(&config.fallback)?;
        tracing::info!(
            "Engine ready: {} patterns, {} feedback records",
            store.len(),
            log.len()
        );
        Ok(Self::new(config, schema, store, log, dispatcher))
    }

    pub fn new(
        config: Config,
        schema: SchemaRegistry,
        store: PatternStore,
        log: FeedbackLog,
        dispatcher: FallbackDispatcher,
    ) -> Self {
        let learner = Learner::new(config.learner.clone(), extractor(&config, None));
        Self {
            config,
            schema,
            store: RwLock::new(Arc::new(store)),
            writer: Mutex::new(Writer { log, learner }),
            dispatcher,
            reference_date: None,
            persisted: AtomicBool::new(true),
            counters: Counters::default(),
        }
    }

    /// Built-in schema and patterns with an in-memory log.
    pub fn in_memory(config: Config) -> NlsqlResult<Self> {
        let dispatcher = FallbackDispatcher::from_config(&config.fallback)?;
        Ok(Self::new(
            config,
            SchemaRegistry::builtin(),
            PatternStore::builtin(),
            FeedbackLog::in_memory(),
            dispatcher,
        ))
    }

    pub fn with_generator(mut self, generator: Arc<dyn SequenceGenerator>) -> Self {
        self.dispatcher = self.dispatcher.with_generator(generator);
        self
    }

    /// Resolve relative dates against `date` instead of the local date.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Last published pattern store.
    pub fn patterns(&self) -> Arc<PatternStore> {
        self.store
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// `false` after a failed write, until a save writes the store and every
    /// queued feedback record.
    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Translate a question to SQL.
    pub async fn process(&self, question: &str) -> NlsqlResult<Translation> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        match self.translate(question).await {
            Ok(translation) => {
                self.counters.count(translation.route);
                tracing::info!(
                    "Answered '{}' via {} ({})",
                    question,
                    translation.route,
                    translation.pattern_id.as_deref().unwrap_or("-")
                );
                tracing::debug!("'{}' -> {}", question, translation.sql);
                Ok(translation)
            }
            Err(e) if e.is_request_error() => {
                tracing::warn!("Request '{}' aborted: {}", question, e);
                Err(e)
            }
            Err(e) => {
                tracing::error!("Request '{}' failed: {}", question, e);
                Err(e)
            }
        }
    }

    async fn translate(&self, question: &str) -> NlsqlResult<Translation> {
        let store = self.patterns();
        let normalized = normalize(question);

        let translation = match best_match(&store, &normalized, &extractor(&self.config, self.reference_date))? {
            Some(matched) => {
                let ast = validate(&self.schema, build(&matched)?)?;
                Translation {
                    sql: ast.to_sql(),
                    route: Route::Pattern,
                    pattern_id: Some(matched.pattern.id),
                }
            }
            None => {
                let answer = self.dispatcher.dispatch(question, &self.schema).await?;
                Translation {
                    sql: answer.ast.to_sql(),
                    route: answer.route,
                    pattern_id: None,
                }
            }
        };
        Ok(translation)
    }

    /// Record whether `generated` was right. A correction must parse and
    /// validate, otherwise nothing is recorded.
    pub fn record_feedback(
        &self,
        question: &str,
        generated: &str,
        corrected: Option<&str>,
    ) -> NlsqlResult<Vec<Change>> {
        let mut writer = self.lock_writer();
        let current = self.patterns();

        let (route, pattern_id) = self.route_of(&current, question, generated)?;
        let record = FeedbackRecord::new(
            question,
            generated,
            corrected.map(str::to_string),
            route,
            pattern_id,
        );
        let (generated_ast, corrected_ast) = record_asts(&self.schema, &record)?;

        let mut next = PatternStore::clone(&current);
        let changes = writer.learner.apply(
            &mut next,
            &record,
            generated_ast.as_ref(),
            corrected_ast.as_ref(),
        )?;
        let appended = writer.log.append(record);

        *self.store.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(next);

        if let Err(e) = appended {
            self.persisted.store(false, Ordering::SeqCst);
            tracing::warn!("Feedback kept in memory only: {}", e);
            return Err(e);
        }
        Ok(changes)
    }

    /// Write queued feedback records and the pattern store checkpoint.
    pub fn save(&self) -> NlsqlResult<()> {
        let mut writer = self.lock_writer();
        let flushed = writer.log.flush_pending();
        let saved = self.patterns().save(&self.config.paths.patterns);

        match flushed.and(saved) {
            Ok(()) => {
                self.persisted.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                self.persisted.store(false, Ordering::SeqCst);
                tracing::warn!("Not saved: {}", e);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> Stats {
        let writer = self.lock_writer();
        let mut stats = Stats {
            total: self.counters.total.load(Ordering::Relaxed),
            pattern: self.counters.pattern.load(Ordering::Relaxed),
            fallback: self.counters.fallback.load(Ordering::Relaxed),
            degraded: self.counters.degraded.load(Ordering::Relaxed),
            learned_patterns: self.patterns().learned_count(),
            ..Stats::default()
        };

        for record in writer.log.records() {
            match record.outcome {
                Outcome::Accepted => stats.accepted += 1,
                Outcome::Corrected => stats.corrected += 1,
            }
            let Some(corrected) = &record.corrected_sql else {
                continue;
            };
            if let (Ok(g), Ok(c)) = (parse(&record.generated_sql), parse(corrected)) {
                if let Some(category) = ErrorCategory::classify(&g, &c) {
                    *stats.errors.entry(category).or_insert(0) += 1;
                }
            }
        }
        stats
    }

    /// Which stage would have produced `generated` for `question` under
    /// `store`.
    fn route_of(
        &self,
        store: &PatternStore,
        question: &str,
        generated: &str,
    ) -> NlsqlResult<(Route, Option<String>)> {
        let normalized = normalize(question);
        let extractor = extractor(&self.config, self.reference_date);
        if let Some(matched) = best_match(store, &normalized, &extractor)? {
            return Ok((Route::Pattern, Some(matched.pattern.id)));
        }
        let degraded = self.dispatcher.degraded(&self.schema)?;
        let is_degraded = parse(generated)
            .and_then(|ast| validate(&self.schema, ast))
            .is_ok_and(|ast| ast == degraded);
        if is_degraded {
            Ok((Route::Degraded, None))
        } else {
            Ok((Route::Fallback, None))
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn extractor(config: &Config, reference_date: Option<NaiveDate>) -> SlotExtractor {
    let today = reference_date.unwrap_or_else(|| Local::now().date_naive());
    SlotExtractor::new(config.slots.clone(), today)
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("patterns", &self.patterns().len())
            .field("generator", &self.dispatcher.has_generator())
            .field("persisted", &self.is_persisted())
            .finish()
    }
}
