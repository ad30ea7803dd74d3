//! Configuration for compilation, serving and experiment tracking.
//!
//! Configuration is layered: defaults, then a JSON/YAML/TOML file, then
//! `PROMPTC_*` environment variables. [`PromptcConfig::validate`] runs last.
//!
//! ```toml
//! [lm]
//! model = "gpt-4o-mini"
//! num_threads = 4
//! request_timeout = "30s"
//!
//! [optimizer.bootstrap]
//! max_bootstrapped_demos = 4
//! ```

use crate::error::{ConfigError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptcConfig {
    pub lm: LmConfig,
    pub optimizer: OptimizerConfig,
    pub tracking: TrackingConfig,
    pub serving: ServingConfig,
    pub store: StoreConfig,
}

/// Language model settings shared by compilation and serving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Task model name
    pub model: String,

    /// Model used to bootstrap demonstrations and propose instructions;
    /// the task model when unset
    pub teacher_model: Option<String>,

    /// Examples evaluated concurrently
    pub num_threads: usize,

    /// Timeout for a single model call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Cache identical model calls
    pub cache_enabled: bool,

    /// Cached responses kept per model, oldest evicted first
    pub cache_capacity: usize,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            teacher_model: None,
            num_threads: 1,
            request_timeout: Duration::from_secs(60),
            cache_enabled: true,
            cache_capacity: 1024,
        }
    }
}

impl LmConfig {
    pub fn teacher_model(&self) -> &str {
        self.teacher_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OptimizerConfig {
    pub bootstrap: BootstrapConfig,
    pub random_search: RandomSearchConfig,
    pub instruction: InstructionSearchConfig,
    pub mipro: MiproConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,
    /// A bootstrapped trace is kept only when its score is strictly above this
    pub metric_threshold: f64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_bootstrapped_demos: 4,
            max_labeled_demos: 4,
            metric_threshold: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RandomSearchConfig {
    pub num_candidate_programs: usize,
    pub seed: u64,
}

impl Default for RandomSearchConfig {
    fn default() -> Self {
        Self {
            num_candidate_programs: 16,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionSearchConfig {
    /// Candidates per round, including the current best
    pub breadth: usize,
    /// Number of proposal rounds
    pub depth: usize,
    pub init_temperature: f32,
}

impl Default for InstructionSearchConfig {
    fn default() -> Self {
        Self {
            breadth: 10,
            depth: 3,
            init_temperature: 1.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiproConfig {
    /// Instructions proposed and demo sets built, each
    pub num_candidates: usize,
    pub init_temperature: f32,
    /// Upper bound on the (instruction, demo set) pairs scored
    pub num_batches: usize,
    pub max_bootstrapped_demos: usize,
    pub max_labeled_demos: usize,
    pub seed: u64,
}

impl Default for MiproConfig {
    fn default() -> Self {
        Self {
            num_candidates: 10,
            init_temperature: 1.0,
            num_batches: 30,
            max_bootstrapped_demos: 8,
            max_labeled_demos: 16,
            seed: 0,
        }
    }
}

/// Where experiment parameters and metrics go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackend {
    None,
    #[default]
    Tracing,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub backend: TrackingBackend,
    pub experiment_name: String,
    /// Root directory for the file backend
    pub run_dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::Tracing,
            experiment_name: "promptc-experiments".to_string(),
            run_dir: PathBuf::from("runs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    pub model_cache_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub model_cache_ttl: Duration,
    pub feedback_enabled: bool,
    /// Maximum number of prediction traces kept in memory
    pub trace_capacity: usize,
    /// Maximum number of feedback records kept in memory
    pub feedback_capacity: usize,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_cache_enabled: true,
            model_cache_ttl: Duration::from_secs(3600),
            feedback_enabled: true,
            trace_capacity: 10_000,
            feedback_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `prompts/` and `programs/`
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl PromptcConfig {
    /// Load configuration from a file.
    ///
    /// Supports JSON, YAML, and TOML formats based on file extension.
    /// Environment overrides are applied before validation.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_e| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let invalid = |reason: String| ConfigError::InvalidFormat {
            path: path.display().to_string(),
            reason,
        };

        let mut config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| invalid(e.to_string()))?,
            _ => {
                return Err(
                    invalid("Unsupported file format. Use .json, .yaml, or .toml".to_string())
                        .into(),
                )
            }
        };

        config.apply_env(&std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> CoreResult<Self> {
        let mut config = Self::default();
        config.apply_env(&std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PROMPTC_*` overrides from the given variables.
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> CoreResult<()> {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("PROMPTC_") else {
                continue;
            };
            match name {
                "MODEL" => self.lm.model = value.clone(),
                "TEACHER_MODEL" => self.lm.teacher_model = Some(value.clone()),
                "NUM_THREADS" => self.lm.num_threads = parse_env(key, value)?,
                "REQUEST_TIMEOUT" => {
                    self.lm.request_timeout =
                        humantime_serde::re::humantime::parse_duration(value).map_err(|e| {
                            ConfigError::InvalidValue {
                                parameter: key.clone(),
                                value: value.clone(),
                                reason: e.to_string(),
                            }
                        })?
                }
                "CACHE_ENABLED" => self.lm.cache_enabled = parse_env(key, value)?,
                "CACHE_CAPACITY" => self.lm.cache_capacity = parse_env(key, value)?,
                "MAX_BOOTSTRAPPED_DEMOS" => {
                    self.optimizer.bootstrap.max_bootstrapped_demos = parse_env(key, value)?
                }
                "MAX_LABELED_DEMOS" => {
                    self.optimizer.bootstrap.max_labeled_demos = parse_env(key, value)?
                }
                "SEED" => self.optimizer.random_search.seed = parse_env(key, value)?,
                "MIPRO_NUM_CANDIDATES" => {
                    self.optimizer.mipro.num_candidates = parse_env(key, value)?
                }
                "MIPRO_INIT_TEMPERATURE" => {
                    self.optimizer.mipro.init_temperature = parse_env(key, value)?
                }
                "MIPRO_NUM_BATCHES" => self.optimizer.mipro.num_batches = parse_env(key, value)?,
                "MIPRO_MAX_BOOTSTRAPPED_DEMOS" => {
                    self.optimizer.mipro.max_bootstrapped_demos = parse_env(key, value)?
                }
                "MIPRO_MAX_LABELED_DEMOS" => {
                    self.optimizer.mipro.max_labeled_demos = parse_env(key, value)?
                }
                "STORE_ROOT" => self.store.root = PathBuf::from(value),
                "MODEL_CACHE_ENABLED" => self.serving.model_cache_enabled = parse_env(key, value)?,
                "MODEL_CACHE_TTL" => {
                    self.serving.model_cache_ttl = Duration::from_secs(parse_env(key, value)?)
                }
                "FEEDBACK_ENABLED" => self.serving.feedback_enabled = parse_env(key, value)?,
                _ => tracing::debug!("Ignoring unknown environment override {}", key),
            }
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> CoreResult<()> {
        if self.lm.model.trim().is_empty() {
            return Err(ConfigError::MissingParameter {
                parameter: "lm.model".to_string(),
            }
            .into());
        }

        if self.lm.num_threads == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "lm.num_threads".to_string(),
                value: "0".to_string(),
                reason: "At least one worker is required".to_string(),
            }
            .into());
        }

        if self.lm.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                parameter: "lm.request_timeout".to_string(),
                value: "0s".to_string(),
                reason: "Timeout must be positive".to_string(),
            }
            .into());
        }

        if self.lm.cache_enabled && self.lm.cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                parameter: "lm.cache_capacity".to_string(),
                value: "0".to_string(),
                reason: "An enabled cache needs room for one entry".to_string(),
            }
            .into());
        }

        let threshold = self.optimizer.bootstrap.metric_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                parameter: "optimizer.bootstrap.metric_threshold".to_string(),
                value: threshold.to_string(),
                reason: "Threshold must be within [0, 1]".to_string(),
            }
            .into());
        }

        if self.optimizer.instruction.breadth < 2 {
            return Err(ConfigError::InvalidValue {
                parameter: "optimizer.instruction.breadth".to_string(),
                value: self.optimizer.instruction.breadth.to_string(),
                reason: "Breadth must be at least 2".to_string(),
            }
            .into());
        }

        for (parameter, value) in [
            ("optimizer.mipro.num_candidates", self.optimizer.mipro.num_candidates),
            ("optimizer.mipro.num_batches", self.optimizer.mipro.num_batches),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    parameter: parameter.to_string(),
                    value: "0".to_string(),
                    reason: "Must be at least 1".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            parameter: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
