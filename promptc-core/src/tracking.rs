//! Experiment tracking.
//!
//! Loggers receive run parameters, metrics and artifacts. The compilation
//! loop only talks to them through [`Tracker`], which swallows failures.

use crate::config::{TrackingBackend, TrackingConfig};
use crate::error::TrackingError;
use async_trait::async_trait;
use promptc_common::truncate_param;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Sink for experiment data.
#[async_trait]
pub trait ExperimentLogger: Send + Sync {
    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError>;

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), TrackingError>;

    async fn log_artifact(&self, name: &str, bytes: &[u8]) -> Result<(), TrackingError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

#[async_trait]
impl ExperimentLogger for NoopLogger {
    async fn log_params(&self, _params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn log_metrics(&self, _metrics: &BTreeMap<String, f64>) -> Result<(), TrackingError> {
        Ok(())
    }

    async fn log_artifact(&self, _name: &str, _bytes: &[u8]) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// Emits experiment data as tracing events.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    experiment: String,
}

impl TracingLogger {
    pub fn new(experiment: impl Into<String>) -> Self {
        Self {
            experiment: experiment.into(),
        }
    }
}

#[async_trait]
impl ExperimentLogger for TracingLogger {
    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        for (key, value) in params {
            info!(experiment = %self.experiment, param = %key, "{}", value);
        }
        Ok(())
    }

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), TrackingError> {
        for (key, value) in metrics {
            info!(experiment = %self.experiment, metric = %key, value = *value);
        }
        Ok(())
    }

    async fn log_artifact(&self, name: &str, bytes: &[u8]) -> Result<(), TrackingError> {
        info!(experiment = %self.experiment, artifact = %name, size = bytes.len());
        Ok(())
    }
}

/// Writes one directory per run: `params.json`, `metrics.jsonl` and
/// `artifacts/<name>`.
#[derive(Debug, Clone)]
pub struct FileRunLogger {
    run_dir: PathBuf,
}

impl FileRunLogger {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// New run directory named after the experiment and the current time.
    pub fn for_experiment(root: impl Into<PathBuf>, experiment: &str) -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        Self::new(root.into().join(format!("{}-{}", experiment, stamp)))
    }

    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }
}

#[async_trait]
impl ExperimentLogger for FileRunLogger {
    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        tokio::fs::create_dir_all(&self.run_dir).await?;
        let path = self.run_dir.join("params.json");

        let mut merged: BTreeMap<String, String> = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

        tokio::fs::write(&path, serde_json::to_vec_pretty(&merged)?).await?;
        Ok(())
    }

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), TrackingError> {
        tokio::fs::create_dir_all(&self.run_dir).await?;
        let line = json!({
            "timestamp": chrono::Utc::now(),
            "metrics": metrics,
        });

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir.join("metrics.jsonl"))
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn log_artifact(&self, name: &str, bytes: &[u8]) -> Result<(), TrackingError> {
        let dir = self.run_dir.join("artifacts");
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = std::path::Path::new(name)
            .file_name()
            .ok_or_else(|| TrackingError::Unavailable {
                reason: format!("invalid artifact name '{}'", name),
            })?;
        tokio::fs::write(dir.join(file_name), bytes).await?;
        Ok(())
    }
}

/// Build the logger selected by configuration.
pub fn logger_from_config(config: &TrackingConfig) -> Arc<dyn ExperimentLogger> {
    match config.backend {
        TrackingBackend::None => Arc::new(NoopLogger),
        TrackingBackend::Tracing => Arc::new(TracingLogger::new(config.experiment_name.clone())),
        TrackingBackend::File => Arc::new(FileRunLogger::for_experiment(
            config.run_dir.clone(),
            &config.experiment_name,
        )),
    }
}

/// Front for an [`ExperimentLogger`] that never fails: errors are logged
/// with `warn!` and dropped. Parameters are truncated to the tracker limit.
#[derive(Clone)]
pub struct Tracker {
    logger: Arc<dyn ExperimentLogger>,
}

impl Tracker {
    pub fn new(logger: Arc<dyn ExperimentLogger>) -> Self {
        Self { logger }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopLogger))
    }

    pub async fn params<I, K, V>(&self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let params: BTreeMap<String, String> = params
            .into_iter()
            .map(|(k, v)| (k.into(), truncate_param(v.as_ref())))
            .collect();
        if let Err(e) = self.logger.log_params(&params).await {
            warn!("Failed to log parameters: {}", e);
        }
    }

    pub async fn metrics<I, K>(&self, metrics: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let metrics: BTreeMap<String, f64> =
            metrics.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if let Err(e) = self.logger.log_metrics(&metrics).await {
            warn!("Failed to log metrics: {}", e);
        }
    }

    pub async fn artifact(&self, name: &str, bytes: &[u8]) {
        if let Err(e) = self.logger.log_artifact(name, bytes).await {
            warn!("Failed to log artifact {}: {}", name, e);
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::noop()
    }
}
