//! Persistence of compiled programs.
//!
//! Every program has two documents: a [`ProgramRecord`] describing it
//! (fields, models, scores) and a [`ProgramArtifact`] holding what is needed
//! to run it (signature, module and demos). Judge configurations are plain
//! program records.

use crate::error::{SignatureError, StoreError};
use crate::signature::{build_signature, Signature};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use promptc_common::{Demonstration, ModuleKind, OptimizerKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Descriptive metadata of a compiled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    #[serde(alias = "id")]
    pub human_readable_id: String,
    pub input_fields: Vec<String>,
    #[serde(default, alias = "input_descs")]
    pub input_descriptions: Vec<String>,
    pub output_fields: Vec<String>,
    #[serde(default, alias = "output_descs")]
    pub output_descriptions: Vec<String>,
    #[serde(alias = "dspy_module", default)]
    pub module: ModuleKind,
    #[serde(default)]
    pub instructions: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub llm_model: String,
    #[serde(default)]
    pub teacher_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerKind>,
    /// `a, b -> c` rendering, informational only
    #[serde(default)]
    pub signature: String,
    /// Output field carrying the score when the program is used as a judge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_fingerprint: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ProgramRecord {
    /// Minimal record for a signature, e.g. a hand-written judge.
    pub fn new(id: impl Into<String>, signature: &Signature, module: ModuleKind) -> Self {
        Self {
            human_readable_id: id.into(),
            input_fields: signature.input_names().map(str::to_string).collect(),
            input_descriptions: signature
                .input_fields()
                .iter()
                .map(|f| f.description.clone())
                .collect(),
            output_fields: signature.output_names().map(str::to_string).collect(),
            output_descriptions: signature
                .output_fields()
                .iter()
                .map(|f| f.description.clone())
                .collect(),
            module,
            instructions: signature.instructions().to_string(),
            hint: None,
            llm_model: String::new(),
            teacher_model: String::new(),
            optimizer: None,
            signature: signature.display_string(),
            score_field: None,
            baseline_score: None,
            evaluation_score: None,
            dataset_fingerprint: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_score_field(mut self, field: impl Into<String>) -> Self {
        self.score_field = Some(field.into());
        self
    }

    /// Rebuild the signature this record describes.
    pub fn build_signature(&self) -> Result<Signature, SignatureError> {
        build_signature(
            self.input_fields.as_slice(),
            self.output_fields.as_slice(),
            &self.instructions,
            Some(self.input_descriptions.as_slice()),
            Some(self.output_descriptions.as_slice()),
        )
    }
}

/// Runnable state of a compiled program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramArtifact {
    pub signature: Signature,
    pub module: ModuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub demos: Vec<Demonstration>,
}

/// Storage for program records and artifacts, keyed by program id.
#[async_trait]
pub trait ProgramStore: Send + Sync {
    async fn load_record(&self, id: &str) -> Result<ProgramRecord, StoreError>;

    async fn load_artifact(&self, id: &str) -> Result<ProgramArtifact, StoreError>;

    async fn save(&self, record: &ProgramRecord, artifact: &ProgramArtifact)
        -> Result<(), StoreError>;

    /// Ids of every stored record, sorted.
    async fn list(&self) -> Result<Vec<String>, StoreError>;
}

fn check_id(id: &str) -> Result<(), StoreError> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidId { id: id.to_string() })
    }
}

/// JSON files under `<root>/prompts/<id>.json` and `<root>/programs/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.root.join("prompts").join(format!("{}.json", id))
    }

    fn artifact_path(&self, id: &str) -> PathBuf {
        self.root.join("programs").join(format!("{}.json", id))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &Path,
        kind: &'static str,
        id: &str,
    ) -> Result<T, StoreError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                })
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
            kind,
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    async fn write_json<T: Serialize>(
        path: &Path,
        kind: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(value).map_err(|e| StoreError::Malformed {
            kind,
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(path, content).await.map_err(io_err)
    }
}

#[async_trait]
impl ProgramStore for JsonFileStore {
    async fn load_record(&self, id: &str) -> Result<ProgramRecord, StoreError> {
        check_id(id)?;
        Self::read_json(&self.record_path(id), "program record", id).await
    }

    async fn load_artifact(&self, id: &str) -> Result<ProgramArtifact, StoreError> {
        check_id(id)?;
        Self::read_json(&self.artifact_path(id), "program artifact", id).await
    }

    async fn save(
        &self,
        record: &ProgramRecord,
        artifact: &ProgramArtifact,
    ) -> Result<(), StoreError> {
        let id = &record.human_readable_id;
        check_id(id)?;
        Self::write_json(&self.artifact_path(id), "program artifact", artifact).await?;
        Self::write_json(&self.record_path(id), "program record", record).await?;
        debug!("Saved program {} under {}", id, self.root.display());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join("prompts");
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        let mut ids = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|source| StoreError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, ProgramRecord>>,
    artifacts: RwLock<HashMap<String, ProgramArtifact>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record without an artifact.
    pub async fn insert_record(&self, record: ProgramRecord) {
        self.records
            .write()
            .await
            .insert(record.human_readable_id.clone(), record);
    }
}

#[async_trait]
impl ProgramStore for MemoryStore {
    async fn load_record(&self, id: &str) -> Result<ProgramRecord, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "program record",
                id: id.to_string(),
            })
    }

    async fn load_artifact(&self, id: &str) -> Result<ProgramArtifact, StoreError> {
        self.artifacts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "program artifact",
                id: id.to_string(),
            })
    }

    async fn save(
        &self,
        record: &ProgramRecord,
        artifact: &ProgramArtifact,
    ) -> Result<(), StoreError> {
        check_id(&record.human_readable_id)?;
        self.artifacts
            .write()
            .await
            .insert(record.human_readable_id.clone(), artifact.clone());
        self.records
            .write()
            .await
            .insert(record.human_readable_id.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
