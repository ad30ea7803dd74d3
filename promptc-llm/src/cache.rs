use async_trait::async_trait;
use promptc_core::{LanguageModel, LmRequest, LmResponse, LmResult};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

#[derive(Default)]
struct Entries {
    responses: HashMap<String, LmResponse>,
    /// Keys oldest first
    order: VecDeque<String>,
}

/// Response cache in front of a language model.
///
/// Entries are keyed by the model name and the full rendered request, so
/// only identical requests share a response. At capacity the oldest entry
/// is evicted. Failed calls are not cached. Requests that set an explicit
/// temperature are sampled and always reach the model.
pub struct CachedModel {
    inner: Arc<dyn LanguageModel>,
    capacity: usize,
    entries: Mutex<Entries>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CachedModel {
    pub fn new(inner: Arc<dyn LanguageModel>) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn LanguageModel>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: Mutex::new(Entries::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.responses.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(&self, request: &LmRequest) -> String {
        json!({
            "model": self.inner.name(),
            "signature": request.signature.as_ref(),
            "demos": request.demos,
            "inputs": request.inputs,
            "hint": request.hint,
            "reasoning": request.reasoning,
        })
        .to_string()
    }

    fn lookup(&self, key: &str) -> Option<LmResponse> {
        self.entries.lock().ok()?.responses.get(key).cloned()
    }

    fn store(&self, key: String, response: LmResponse) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.responses.contains_key(&key) {
            entries.responses.insert(key, response);
            return;
        }
        while entries.order.len() >= self.capacity {
            if let Some(oldest) = entries.order.pop_front() {
                entries.responses.remove(&oldest);
            }
        }
        entries.order.push_back(key.clone());
        entries.responses.insert(key, response);
    }
}

#[async_trait]
impl LanguageModel for CachedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: LmRequest) -> LmResult<LmResponse> {
        if request.temperature.is_some() {
            return self.inner.invoke(request).await;
        }

        let key = self.key(&request);
        if let Some(response) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", self.inner.name());
            return Ok(response);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let response = self.inner.invoke(request).await?;
        self.store(key, response.clone());
        Ok(response)
    }

    fn is_concurrent(&self) -> bool {
        self.inner.is_concurrent()
    }
}
