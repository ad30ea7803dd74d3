//! Task files: what to compile.
//!
//! ```toml
//! input_fields = ["topic"]
//! output_fields = ["joke"]
//! instructions = "Tell a short joke about the topic."
//! module = "ChainOfThought"
//! optimizer = "BootstrapFewShot"
//!
//! [metric]
//! kind = "llm_judge"
//! judge_config_id = "JokeJudge"
//! ```

use anyhow::{bail, Context, Result};
use promptc_common::{MatchMode, MetricKind, ModuleKind, OptimizerKind};
use promptc_core::{build_signature, MetricConfig, Signature};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskMetric {
    pub kind: MetricKind,
    /// Defaults to every output field of the task
    #[serde(default)]
    pub output_fields: Option<Vec<String>>,
    #[serde(default)]
    pub judge_config_id: Option<String>,
    #[serde(default)]
    pub use_compiled_judge: bool,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl Default for TaskMetric {
    fn default() -> Self {
        Self {
            kind: MetricKind::ExactMatch,
            output_fields: None,
            judge_config_id: None,
            use_compiled_judge: false,
            match_mode: MatchMode::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskFile {
    pub input_fields: Vec<String>,
    pub output_fields: Vec<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub input_descriptions: Vec<String>,
    #[serde(default)]
    pub output_descriptions: Vec<String>,
    #[serde(default)]
    pub module: ModuleKind,
    #[serde(default = "default_optimizer")]
    pub optimizer: OptimizerKind,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub metric: TaskMetric,
}

fn default_optimizer() -> OptimizerKind {
    OptimizerKind::BootstrapFewShot
}

impl TaskFile {
    /// Parse a task file; the format follows the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {}", path.display()))?;
        let task = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            _ => bail!(
                "Unsupported task file {}. Use .toml, .json or .yaml",
                path.display()
            ),
        };
        Ok(task)
    }

    pub fn signature(&self) -> Result<Signature> {
        let signature = build_signature(
            self.input_fields.as_slice(),
            self.output_fields.as_slice(),
            &self.instructions,
            Some(self.input_descriptions.as_slice()),
            Some(self.output_descriptions.as_slice()),
        )?;
        Ok(signature)
    }

    pub fn metric_config(&self) -> MetricConfig {
        let metric = &self.metric;
        MetricConfig {
            kind: metric.kind,
            output_fields: metric
                .output_fields
                .clone()
                .unwrap_or_else(|| self.output_fields.clone()),
            judge_config_id: metric.judge_config_id.clone(),
            use_compiled_judge: metric.use_compiled_judge,
            match_mode: metric.match_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_task(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_toml_task_with_judge() {
        let file = write_task(
            ".toml",
            r#"
input_fields = ["topic"]
output_fields = ["joke"]
instructions = "Tell a joke."
module = "ChainOfThought"

[metric]
kind = "llm_judge"
judge_config_id = "JokeJudge"
"#,
        );
        let task = TaskFile::load(file.path()).unwrap();
        assert_eq!(task.module, ModuleKind::ChainOfThought);
        assert_eq!(task.optimizer, OptimizerKind::BootstrapFewShot);

        let metric = task.metric_config();
        assert_eq!(metric.kind, MetricKind::LlmJudge);
        assert_eq!(metric.output_fields, vec!["joke".to_string()]);
        assert_eq!(metric.judge_config_id.as_deref(), Some("JokeJudge"));
        assert_eq!(task.signature().unwrap().display_string(), "topic -> joke");
    }

    #[test]
    fn test_json_task_defaults_to_exact_match() {
        let file = write_task(
            ".json",
            r#"{"input_fields": ["question"], "output_fields": ["answer"]}"#,
        );
        let task = TaskFile::load(file.path()).unwrap();
        assert_eq!(task.metric_config().kind, MetricKind::ExactMatch);
        assert_eq!(task.module, ModuleKind::Predict);
    }

    #[test]
    fn test_invalid_signature_reported() {
        let file = write_task(
            ".yaml",
            "input_fields: [\"text\"]\noutput_fields: []\n",
        );
        let task = TaskFile::load(file.path()).unwrap();
        assert!(task.signature().is_err());

        let file = write_task(".ini", "");
        assert!(TaskFile::load(file.path()).is_err());
    }
}
