//! Loading compiled programs with a TTL cache in front of the store.

use crate::error::ServingResult;
use promptc_core::config::ServingConfig;
use promptc_core::{Predictor, ProgramRecord, ProgramStore};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A program ready to run: its record and the rebuilt predictor.
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub record: ProgramRecord,
    pub predictor: Predictor,
}

impl LoadedProgram {
    pub fn id(&self) -> &str {
        &self.record.human_readable_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_loads: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub invalidations: u64,
    pub cached_programs: usize,
}

impl CacheStats {
    /// Share of loads served from the cache, zero before the first load.
    pub fn hit_rate(&self) -> f64 {
        if self.total_loads == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_loads as f64
        }
    }
}

struct CacheEntry {
    program: Arc<LoadedProgram>,
    loaded_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Program loader with an optional time-bounded cache.
///
/// A zero TTL keeps entries until they are invalidated.
pub struct ModelManager {
    store: Arc<dyn ProgramStore>,
    enabled: bool,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl ModelManager {
    pub fn new(store: Arc<dyn ProgramStore>, config: &ServingConfig) -> Self {
        Self {
            store,
            enabled: config.model_cache_enabled,
            ttl: config.model_cache_ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgramStore> {
        &self.store
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.ttl.is_zero() || entry.loaded_at.elapsed() < self.ttl
    }

    /// Load a program by id, from the cache when a fresh entry exists.
    pub async fn load(&self, id: &str) -> ServingResult<Arc<LoadedProgram>> {
        if self.enabled {
            let mut state = self.state.write().await;
            state.stats.total_loads += 1;
            let cached = state
                .entries
                .get(id)
                .filter(|entry| self.is_fresh(entry))
                .map(|entry| Arc::clone(&entry.program));
            if let Some(program) = cached {
                state.stats.cache_hits += 1;
                debug!("Serving {} from the program cache", id);
                return Ok(program);
            }
            state.stats.cache_misses += 1;
        }

        let program = Arc::new(self.load_uncached(id).await?);

        if self.enabled {
            let mut state = self.state.write().await;
            state.entries.insert(
                id.to_string(),
                CacheEntry {
                    program: Arc::clone(&program),
                    loaded_at: Instant::now(),
                },
            );
        }
        Ok(program)
    }

    async fn load_uncached(&self, id: &str) -> ServingResult<LoadedProgram> {
        let record = self.store.load_record(id).await?;
        let artifact = self.store.load_artifact(id).await?;
        info!(
            "Loaded program {} ({}, {} demos)",
            id,
            artifact.signature.display_string(),
            artifact.demos.len()
        );
        Ok(LoadedProgram {
            record,
            predictor: Predictor::from_artifact(artifact),
        })
    }

    /// Drop one cached program. Returns whether it was cached.
    pub async fn invalidate(&self, id: &str) -> bool {
        let mut state = self.state.write().await;
        let removed = state.entries.remove(id).is_some();
        if removed {
            state.stats.invalidations += 1;
            debug!("Invalidated cached program {}", id);
        }
        removed
    }

    pub async fn invalidate_all(&self) {
        let mut state = self.state.write().await;
        let count = state.entries.len() as u64;
        state.entries.clear();
        state.stats.invalidations += count;
        info!("Invalidated {} cached programs", count);
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            cached_programs: state.entries.len(),
            ..state.stats
        }
    }
}
