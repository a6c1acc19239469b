//! Configuration from `nlsql.toml`.
//!
//! Every section is optional; missing keys take the defaults below.
//!
//! ```toml
//! [paths]
//! schema = "schema.json"
//! patterns = "patterns.jsonl"
//! feedback = "feedback.jsonl"
//!
//! [learner]
//! accept_boost = 0.05
//! structural_penalty = 0.10
//!
//! [fallback]
//! timeout_ms = 5000
//! command = ["python3", "generate.py"]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{NlsqlError, NlsqlResult};
use crate::schema::ITEMS_TABLE;

pub const CONFIG_FILE: &str = "nlsql.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub learner: LearnerConfig,
    pub fallback: FallbackConfig,
    pub slots: SlotConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Schema definition file. `None` uses the built-in inventory schema.
    pub schema: Option<PathBuf>,
    pub patterns: PathBuf,
    pub feedback: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let dir = dirs::data_dir()
            .map(|d| d.join("nlsql"))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            schema: None,
            patterns: dir.join("patterns.jsonl"),
            feedback: dir.join("feedback.jsonl"),
        }
    }
}

/// Confidence adjustment magnitudes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub accept_boost: f64,
    /// Applied when a correction only changes literal values.
    pub value_slip_penalty: f64,
    /// Applied when a correction adds or removes columns or predicates.
    pub structural_penalty: f64,
    pub ceiling: f64,
    pub floor: f64,
    pub learned_confidence: f64,
    pub fallback_seed_confidence: f64,
    /// How far below the lowest existing priority a learned pattern starts.
    pub learned_priority_gap: u32,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            accept_boost: 0.05,
            value_slip_penalty: 0.05,
            structural_penalty: 0.10,
            ceiling: 0.99,
            floor: 0.05,
            learned_confidence: 0.30,
            fallback_seed_confidence: 0.50,
            learned_priority_gap: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub timeout_ms: u64,
    /// Table queried by the degraded answer.
    pub default_table: String,
    /// Program and arguments of an external generator.
    pub command: Option<Vec<String>>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            default_table: ITEMS_TABLE.to_string(),
            command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    pub code_min_len: usize,
    pub code_require_letter: bool,
    pub code_require_digit: bool,
    pub status_vocabulary: Vec<String>,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            code_min_len: 3,
            code_require_letter: true,
            code_require_digit: true,
            status_vocabulary: ["active", "inactive", "obsolete", "pending", "orderable"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load from an explicit path, else `./nlsql.toml`, else the user
    /// config dir. No file at all yields the defaults.
    pub fn load(explicit: Option<&Path>) -> NlsqlResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Self::from_file(&local);
        }
        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("nlsql").join(CONFIG_FILE);
            if user.exists() {
                return Self::from_file(&user);
            }
        }
        tracing::debug!("No {} found, using defaults", CONFIG_FILE);
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> NlsqlResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NlsqlError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> NlsqlResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| NlsqlError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> NlsqlResult<()> {
        let l = &self.learner;
        if !(0.0..=1.0).contains(&l.floor) || !(0.0..=1.0).contains(&l.ceiling) || l.floor > l.ceiling {
            return Err(NlsqlError::Config(format!(
                "learner floor {} / ceiling {} must satisfy 0 <= floor <= ceiling <= 1",
                l.floor, l.ceiling
            )));
        }
        for (name, value) in [
            ("learned_confidence", l.learned_confidence),
            ("fallback_seed_confidence", l.fallback_seed_confidence),
        ] {
            if !(l.floor..=l.ceiling).contains(&value) {
                return Err(NlsqlError::Config(format!(
                    "learner {} {} must lie within floor {} and ceiling {}",
                    name, value, l.floor, l.ceiling
                )));
            }
        }
        if l.accept_boost < 0.0 || l.value_slip_penalty < 0.0 || l.structural_penalty < 0.0 {
            return Err(NlsqlError::Config(
                "learner adjustments must not be negative".to_string(),
            ));
        }
        if self.slots.code_min_len == 0 {
            return Err(NlsqlError::Config("slots.code_min_len must be at least 1".to_string()));
        }
        Ok(())
    }
}
