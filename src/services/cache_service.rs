//! AnalysisCache — the ephemeral, content-addressed object store.
//!
//! Two independent maps, both keyed by canonical hash: raw file payloads
//! and their analysis verdicts. Entirely memory-backed by design; contents
//! are lossy across restarts. Bounded two ways:
//!
//! - **TTL**: a background sweeper removes entries older than the TTL on a
//!   fixed period. Reads never lazily expire entries mid-request.
//! - **Size cap**: before each file insert, oldest-`stored_at` files are
//!   evicted until the incoming payload fits under the cap. The incoming
//!   file is always written, even when it alone exceeds the headroom.

use crate::models::stored_file::{AnalysisResult, StoredFile};
use crate::services::hashing::{canonical_key, hash_variants};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Ceiling on aggregate stored file bytes: 10 GiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Entries older than this are swept: 24 hours.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Sweep period: hourly.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no stored file for hash `{0}`")]
    FileNotFound(String),
    #[error("no analysis result for hash `{0}`")]
    ResultNotFound(String),
}

/// Tuning knobs for the cache, filled from [`crate::config::AppConfig`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_total_bytes: u64,
    pub ttl: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_MAX_CACHE_BYTES,
            ttl: chrono::Duration::hours(DEFAULT_TTL_HOURS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

/// Shared, process-wide cache handle. Constructed once in `main` and
/// injected into request handlers; cloning shares the same maps.
#[derive(Clone)]
pub struct AnalysisCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    files: RwLock<HashMap<String, StoredFile>>,
    results: RwLock<HashMap<String, AnalysisResult>>,
    config: CacheConfig,

    /// One-time-init guard so repeated `ensure_sweeper` calls never spawn
    /// duplicate timers.
    sweeper_started: AtomicBool,
}

impl AnalysisCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                files: RwLock::new(HashMap::new()),
                results: RwLock::new(HashMap::new()),
                config,
                sweeper_started: AtomicBool::new(false),
            }),
        }
    }

    /// Insert a complete file under its canonical hash key.
    ///
    /// Runs size-cap eviction before inserting and lazily starts the
    /// sweeper on first use. Eviction of other entries is invisible to the
    /// current request; this call never fails for capacity reasons.
    pub async fn put_file(&self, hash: &str, bytes: Bytes, file_name: &str, mime_type: &str) {
        self.ensure_sweeper();

        let key = canonical_key(hash);
        let size_bytes = bytes.len() as u64;
        let mut files = self.inner.files.write().await;
        Self::evict_for(&mut files, self.inner.config.max_total_bytes, size_bytes);
        files.insert(
            key.clone(),
            StoredFile {
                bytes,
                file_name: file_name.to_string(),
                mime_type: mime_type.to_string(),
                size_bytes,
                stored_at: Utc::now(),
            },
        );
        debug!(key = %key, size_bytes, "stored file in cache");
    }

    /// Insert (or overwrite) the analysis verdict for a hash, returning the
    /// stored record. The key/id is always the canonical hash form, so a
    /// reanalysis overwrite preserves the original id.
    pub async fn put_result(&self, hash: &str, verdict: serde_json::Value) -> AnalysisResult {
        self.ensure_sweeper();

        let key = canonical_key(hash);
        let result = AnalysisResult {
            id: key.clone(),
            created_at: Utc::now(),
            verdict,
        };
        let mut results = self.inner.results.write().await;
        results.insert(key, result.clone());
        result
    }

    /// Encoding-agnostic file lookup: tries identity, standard-padded, and
    /// URL-safe forms in order, first hit wins.
    pub async fn get_file(&self, hash: &str) -> Result<StoredFile, CacheError> {
        let files = self.inner.files.read().await;
        lookup(&files, hash)
            .cloned()
            .ok_or_else(|| CacheError::FileNotFound(hash.to_string()))
    }

    /// Encoding-agnostic result lookup.
    pub async fn get_result(&self, hash: &str) -> Result<AnalysisResult, CacheError> {
        let results = self.inner.results.read().await;
        lookup(&results, hash)
            .cloned()
            .ok_or_else(|| CacheError::ResultNotFound(hash.to_string()))
    }

    pub async fn file_count(&self) -> usize {
        self.inner.files.read().await.len()
    }

    pub async fn result_count(&self) -> usize {
        self.inner.results.read().await.len()
    }

    pub async fn total_file_bytes(&self) -> u64 {
        self.inner
            .files
            .read()
            .await
            .values()
            .map(|f| f.size_bytes)
            .sum()
    }

    pub fn sweeper_running(&self) -> bool {
        self.inner.sweeper_started.load(Ordering::SeqCst)
    }

    /// Start the background sweeper if it is not already running.
    ///
    /// Called lazily from the write paths; safe to call any number of
    /// times. The task holds only a weak handle so it winds down when the
    /// last cache handle is dropped.
    pub fn ensure_sweeper(&self) {
        if self
            .inner
            .sweeper_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so a fresh cache is
            // not swept at startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        Self::sweep(&inner, Utc::now()).await;
                    }
                    None => break,
                }
            }
        });
        info!(period_secs = period.as_secs(), "cache sweeper started");
    }

    /// One sweep cycle: purge files and results older than the TTL.
    ///
    /// Exposed so tests can drive expiry with a synthetic clock.
    pub async fn run_sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        Self::sweep(&self.inner, now).await
    }

    async fn sweep(inner: &CacheInner, now: DateTime<Utc>) -> (usize, usize) {
        let cutoff = now - inner.config.ttl;

        let removed_files = {
            let mut files = inner.files.write().await;
            let before = files.len();
            files.retain(|_, f| f.stored_at >= cutoff);
            before - files.len()
        };

        let removed_results = {
            let mut results = inner.results.write().await;
            let before = results.len();
            results.retain(|_, r| r.created_at >= cutoff);
            before - results.len()
        };

        if removed_files > 0 || removed_results > 0 {
            info!(removed_files, removed_results, "cache sweep evicted expired entries");
        }
        (removed_files, removed_results)
    }

    /// Pre-insert eviction: drop oldest-`stored_at` files until the incoming
    /// payload fits under the cap, or the map is empty.
    fn evict_for(files: &mut HashMap<String, StoredFile>, cap: u64, incoming: u64) {
        let mut total: u64 = files.values().map(|f| f.size_bytes).sum();
        if total + incoming <= cap {
            return;
        }

        let mut by_age: Vec<(String, DateTime<Utc>, u64)> = files
            .iter()
            .map(|(k, f)| (k.clone(), f.stored_at, f.size_bytes))
            .collect();
        by_age.sort_by_key(|(_, stored_at, _)| *stored_at);

        for (key, _, size) in by_age {
            if total + incoming <= cap {
                break;
            }
            files.remove(&key);
            total -= size;
            debug!(key = %key, size, "evicted file to respect cache size cap");
        }
    }
}

fn lookup<'a, T>(map: &'a HashMap<String, T>, hash: &str) -> Option<&'a T> {
    hash_variants(hash).iter().find_map(|form| map.get(form))
}
