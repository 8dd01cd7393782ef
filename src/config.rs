//! Engine configuration
//!
//! `EngineConfig` aggregates the per-component configs. It can be loaded
//! from a YAML file whose durations use the Go-style format (`"5m"`,
//! `"10s"`, `"1h30m"`, `"250ms"`); every field is optional.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::CacheConfig;
use crate::error::{Error, Result};
use crate::grading::{EvaluationRoles, GradingConfig, DEFAULT_COEFFICIENT, DEFAULT_SCALE_MAX};
use crate::orchestrator::OrchestratorConfig;
use crate::queue::{default_workers, QueueConfig};

/// Runtime configuration for every component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub grading: GradingConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
}

impl EngineConfig {
    /// Load and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content)?;
        info!(path = %path.display(), "Loaded engine configuration");
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: EngineConfigFile = serde_yaml::from_str(yaml)?;
        file.into_config()
    }

    pub fn validate(&self) -> Result<()> {
        self.grading.validate()?;
        if self.cache.default_ttl.is_zero() {
            return Err(Error::Config("cache ttl must be positive".to_string()));
        }
        if self.queue.max_pending == 0 {
            return Err(Error::Config("queue max_pending must be positive".to_string()));
        }
        if self.orchestrator.batch_concurrency == 0 {
            return Err(Error::Config(
                "orchestrator batch_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// File Format
// =============================================================================

/// YAML layout of [`EngineConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfigFile {
    pub grading: GradingSection,
    pub cache: CacheSection,
    pub queue: QueueSection,
    pub orchestrator: OrchestratorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingSection {
    #[serde(default = "default_scale_max")]
    pub scale_max: f64,

    #[serde(default = "default_coefficient")]
    pub default_coefficient: f64,

    /// Codes resolved to continuous assessment
    #[serde(default = "default_continuous_codes")]
    pub continuous_assessment_codes: Vec<String>,

    /// Codes resolved to final exam
    #[serde(default = "default_final_exam_codes")]
    pub final_exam_codes: Vec<String>,
}

impl Default for GradingSection {
    fn default() -> Self {
        Self {
            scale_max: default_scale_max(),
            default_coefficient: default_coefficient(),
            continuous_assessment_codes: default_continuous_codes(),
            final_exam_codes: default_final_exam_codes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl: String,

    #[serde(default = "default_purge_interval")]
    pub purge_interval: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: default_cache_ttl(),
            purge_interval: default_purge_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_pending: default_max_pending(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            batch_concurrency: default_batch_concurrency(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

fn default_scale_max() -> f64 {
    DEFAULT_SCALE_MAX
}

fn default_coefficient() -> f64 {
    DEFAULT_COEFFICIENT
}

fn default_continuous_codes() -> Vec<String> {
    vec!["cc".into(), "continu".into(), "controle continu".into()]
}

fn default_final_exam_codes() -> Vec<String> {
    vec!["ef".into(), "ex".into(), "examen".into(), "final".into()]
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> String {
    "5m".to_string()
}

fn default_purge_interval() -> String {
    "1m".to_string()
}

fn default_max_pending() -> usize {
    10_000
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_fetch_timeout() -> String {
    "10s".to_string()
}

impl EngineConfigFile {
    /// Parse durations, build the role table and validate.
    pub fn into_config(self) -> Result<EngineConfig> {
        let evaluation_roles = EvaluationRoles::from_codes(
            self.grading.continuous_assessment_codes.as_slice(),
            self.grading.final_exam_codes.as_slice(),
        )?;

        let config = EngineConfig {
            grading: GradingConfig {
                scale_max: self.grading.scale_max,
                default_coefficient: self.grading.default_coefficient,
                evaluation_roles,
            },
            cache: CacheConfig {
                enabled: self.cache.enabled,
                default_ttl: parse_duration(&self.cache.ttl)?,
                purge_interval: parse_duration(&self.cache.purge_interval)?,
            },
            queue: QueueConfig {
                workers: self.queue.workers,
                max_pending: self.queue.max_pending,
            },
            orchestrator: OrchestratorConfig {
                batch_concurrency: self.orchestrator.batch_concurrency,
                fetch_timeout: parse_duration(&self.orchestrator.fetch_timeout)?,
            },
        };

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a Go-style duration string (e.g. "1h", "30m", "1h30m", "250ms").
///
/// Supported units: `d`, `h`, `m`, `s`, `ms`. A trailing bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let invalid_number = || Error::DurationParse(format!("invalid number in duration: {}", s));
    let overflow = || Error::DurationParse(format!("duration out of range: {}", s));

    let mut total = Duration::ZERO;
    let mut num_buf = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf.parse().map_err(|_| invalid_number())?;
        num_buf.clear();

        let unit = match c.to_ascii_lowercase() {
            'd' => Duration::from_secs(86_400),
            'h' => Duration::from_secs(3_600),
            'm' if matches!(chars.peek(), Some('s') | Some('S')) => {
                chars.next();
                Duration::from_millis(1)
            }
            'm' => Duration::from_secs(60),
            's' => Duration::from_secs(1),
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        let amount = u32::try_from(num).map_err(|_| invalid_number())?;
        total = unit
            .checked_mul(amount)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(overflow)?;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf.parse().map_err(|_| invalid_number())?;
        total = total
            .checked_add(Duration::from_secs(num))
            .ok_or_else(overflow)?;
    }

    if total.is_zero() {
        return Err(Error::DurationParse(format!(
            "duration must be positive: {}",
            s
        )));
    }

    Ok(total)
}
