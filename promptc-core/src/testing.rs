//! Scripted models, embedders and loggers for tests.
//!
//! Enabled for this crate's own tests and for dependents through the
//! `testing` feature.

use crate::error::{LmError, LmResult, TrackingError};
use crate::lm::{EmbeddingService, LanguageModel, LmRequest, LmResponse};
use crate::tracking::ExperimentLogger;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(&LmRequest) -> LmResult<LmResponse> + Send + Sync>;
type DelayFn = Box<dyn Fn(&LmRequest) -> Duration + Send + Sync>;

/// Language model driven by a closure. Counts calls and records requests.
pub struct ScriptedModel {
    name: String,
    responder: Responder,
    delay: Option<DelayFn>,
    concurrent: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<LmRequest>>,
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responder: Box::new(|_| {
                Err(LmError::InvalidResponse {
                    reason: "no scripted response".to_string(),
                })
            }),
            delay: None,
            concurrent: true,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with<F>(self, respond: F) -> Self
    where
        F: Fn(&LmRequest) -> LmResponse + Send + Sync + 'static,
    {
        self.try_respond_with(move |request| Ok(respond(request)))
    }

    pub fn try_respond_with<F>(mut self, respond: F) -> Self
    where
        F: Fn(&LmRequest) -> LmResult<LmResponse> + Send + Sync + 'static,
    {
        self.responder = Box::new(respond);
        self
    }

    /// Answer `output_field` by looking up the value of `input_field`.
    /// Unknown inputs fail with an invalid response.
    pub fn lookup(self, input_field: &str, output_field: &str, table: &[(&str, &str)]) -> Self {
        let input_field = input_field.to_string();
        let output_field = output_field.to_string();
        let table: HashMap<String, String> = table
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.try_respond_with(move |request| {
            let key = request.inputs.get(&input_field).unwrap_or_default();
            match table.get(key) {
                Some(value) => Ok(LmResponse::default().with_field(output_field.clone(), value.clone())),
                None => Err(LmError::InvalidResponse {
                    reason: format!("no scripted answer for '{}'", key),
                }),
            }
        })
    }

    /// Fail every call with the given error.
    pub fn failing(self, error: LmError) -> Self {
        self.try_respond_with(move |_| Err(error.clone()))
    }

    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&LmRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Some(Box::new(delay));
        self
    }

    pub fn not_concurrent(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<LmRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: LmRequest) -> LmResult<LmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some(delay) = &self.delay {
            tokio::time::sleep(delay(&request)).await;
        }
        let result = (self.responder)(&request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn is_concurrent(&self) -> bool {
        self.concurrent
    }
}

/// Embedder with fixed vectors per text.
#[derive(Default)]
pub struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    failure: Option<LmError>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing(mut self, error: LmError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, text: &str) -> LmResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| LmError::InvalidResponse {
                reason: format!("no vector for '{}'", text),
            })
    }
}

/// Logger that keeps everything in memory, optionally failing every call.
#[derive(Default)]
pub struct RecordingLogger {
    params: Mutex<BTreeMap<String, String>>,
    metrics: Mutex<BTreeMap<String, f64>>,
    artifacts: Mutex<Vec<(String, Vec<u8>)>>,
    fail: bool,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        self.params.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn artifact_names(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .map(|a| a.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }

    fn check(&self) -> Result<(), TrackingError> {
        if self.fail {
            return Err(TrackingError::Unavailable {
                reason: "tracker offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ExperimentLogger for RecordingLogger {
    async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        self.check()?;
        if let Ok(mut stored) = self.params.lock() {
            stored.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    async fn log_metrics(&self, metrics: &BTreeMap<String, f64>) -> Result<(), TrackingError> {
        self.check()?;
        if let Ok(mut stored) = self.metrics.lock() {
            stored.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        }
        Ok(())
    }

    async fn log_artifact(&self, name: &str, bytes: &[u8]) -> Result<(), TrackingError> {
        self.check()?;
        if let Ok(mut stored) = self.artifacts.lock() {
            stored.push((name.to_string(), bytes.to_vec()));
        }
        Ok(())
    }
}
