//! Pattern store.
//!
//! Patterns keyed by id in a `BTreeMap`, so iteration order is fixed. The
//! store is persisted as JSON Lines and only written on an explicit
//! checkpoint, through a temp file that is renamed over the old one.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{NlsqlError, NlsqlResult};
use crate::pattern::{builtin_patterns, Origin, Pattern};

/// Prefix of synthesized pattern ids.
pub const LEARNED_PREFIX: &str = "learned_";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternStore {
    patterns: BTreeMap<String, Pattern>,
}

impl PatternStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The shipped pattern set.
    pub fn builtin() -> Self {
        let mut store = Self::empty();
        for pattern in builtin_patterns() {
            store.patterns.insert(pattern.id.clone(), pattern);
        }
        store
    }

    /// Built-in set overlaid with the persisted patterns. A missing file is
    /// not an error.
    pub fn load(path: impl AsRef<Path>) -> NlsqlResult<Self> {
        let path = path.as_ref();
        let mut store = Self::builtin();
        if !path.exists() {
            tracing::info!("No pattern store at {}, using built-in patterns", path.display());
            return Ok(store);
        }

        let reader = BufReader::new(File::open(path)?);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let pattern: Pattern = serde_json::from_str(&line).map_err(|e| {
                NlsqlError::Config(format!("{} line {}: {}", path.display(), i + 1, e))
            })?;
            pattern.check()?;
            store.patterns.insert(pattern.id.clone(), pattern);
        }
        tracing::info!("Loaded {} patterns from {}", store.len(), path.display());
        Ok(store)
    }

    /// Rewrite the store file atomically: temp file, fsync, rename.
    pub fn save(&self, path: impl AsRef<Path>) -> NlsqlResult<()> {
        let path = path.as_ref();
        self.write_atomic(path)
            .map_err(|e| NlsqlError::Persistence(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Saved {} patterns to {}", self.len(), path.display());
        Ok(())
    }

    fn write_atomic(&self, path: &Path) -> NlsqlResult<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = tmp_path(path);
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for pattern in self.patterns.values() {
                serde_json::to_writer(&mut out, pattern)?;
                out.write_all(b"\n")?;
            }
            let file = out.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Pattern> {
        self.patterns.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.patterns.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Add a pattern. Ids are unique; an existing id is an error.
    pub fn insert(&mut self, pattern: Pattern) -> NlsqlResult<()> {
        pattern.check()?;
        if self.patterns.contains_key(&pattern.id) {
            return Err(NlsqlError::Config(format!("Duplicate pattern id '{}'", pattern.id)));
        }
        self.patterns.insert(pattern.id.clone(), pattern);
        Ok(())
    }

    /// Set a pattern's confidence, returning the previous value.
    pub fn set_confidence(&mut self, id: &str, confidence: f64) -> Option<f64> {
        let pattern = self.patterns.get_mut(id)?;
        let previous = pattern.confidence;
        pattern.confidence = confidence;
        Some(previous)
    }

    pub fn min_priority(&self) -> Option<u32> {
        self.patterns.values().map(|p| p.priority).min()
    }

    pub fn learned_count(&self) -> usize {
        self.patterns.values().filter(|p| p.origin != Origin::Builtin).count()
    }

    /// Next free `learned_NNNN` id.
    pub fn next_learned_id(&self) -> String {
        let next = self
            .patterns
            .keys()
            .filter_map(|id| id.strip_prefix(LEARNED_PREFIX))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1);
        format!("{}{:04}", LEARNED_PREFIX, next)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
