//! Translation cache with hybrid recency/frequency eviction
//!
//! Entries are keyed by a [`Fingerprint`] of the trimmed source text and the
//! language pair. Capacity is bounded both by entry count and by an estimated
//! byte size; every mutating call restores both bounds before it returns.
//!
//! Victims are grouped by effective recency bucket: the idle-time bucket,
//! pulled toward the present by `floor(frequency_weight * log2(1 + hits))`
//! whole buckets and never past the newest one. Within a bucket, larger
//! entries go first, then least-accessed ones.
//! [`TranslationCache::optimize_eviction_policy`] moves `frequency_weight`
//! according to the observed hit rate.
//!
//! The cache is never a hard dependency: when disabled, or when its lock has
//! been poisoned, lookups miss and writes are dropped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fixed per-entry bookkeeping overhead added to size estimates
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to make every lookup miss
    pub enabled: bool,
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum total estimated size in bytes
    pub max_size_bytes: usize,
    /// Entry lifetime; 0 disables expiry
    pub ttl_seconds: u64,
    /// Seconds between background expiry sweeps
    pub sweep_interval_seconds: u64,
    /// Eviction tuning knobs
    pub eviction: EvictionTuningConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            max_size_bytes: 16 * 1024 * 1024,
            ttl_seconds: 24 * 60 * 60,
            sweep_interval_seconds: 300,
            eviction: EvictionTuningConfig::default(),
        }
    }
}

/// Knobs for the recency/frequency balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionTuningConfig {
    /// Width of a recency bucket; entries idle for the same number of buckets tie on recency
    pub recency_bucket_seconds: u64,
    /// Starting weight of access frequency, in recency buckets per doubling of hits
    pub initial_frequency_weight: f64,
    /// Upper bound for the frequency weight
    pub max_frequency_weight: f64,
    /// Adjustment applied per tuning pass
    pub weight_step: f64,
    /// Below this hit rate frequency gains weight
    pub low_hit_rate: f64,
    /// Above this hit rate (with little reuse) recency gains weight
    pub high_hit_rate: f64,
    /// Share of reused entries under which the cache counts as recency-driven
    pub repeat_share_floor: f64,
    /// Lookups required in a window before tuning acts
    pub min_lookups: u64,
}

impl Default for EvictionTuningConfig {
    fn default() -> Self {
        Self {
            recency_bucket_seconds: 60,
            initial_frequency_weight: 0.5,
            max_frequency_weight: 4.0,
            weight_step: 0.5,
            low_hit_rate: 0.3,
            high_hit_rate: 0.7,
            repeat_share_floor: 0.2,
            min_lookups: 50,
        }
    }
}

/// Deterministic cache key for (text, source, target)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint. Text is trimmed but not case-folded.
    pub fn compute(text: &str, source_lang: &str, target_lang: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalize(text).as_bytes());
        hasher.update(&[0]);
        hasher.update(source_lang.as_bytes());
        hasher.update(&[0]);
        hasher.update(target_lang.as_bytes());
        Fingerprint(format!("trans:{}", hasher.finalize().to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Text normalization applied before fingerprinting and dispatch
pub fn normalize(text: &str) -> &str {
    text.trim()
}

/// Cached translation
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub translation: String,
    pub created_at: Instant,
    pub last_access: Instant,
    pub access_count: u64,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn new(text: &str, source_lang: &str, target_lang: &str, translation: String, now: Instant) -> Self {
        let size_bytes = normalize(text).len()
            + source_lang.len()
            + target_lang.len()
            + translation.len()
            + ENTRY_OVERHEAD_BYTES;
        Self {
            translation,
            created_at: now,
            last_access: now,
            access_count: 0,
            size_bytes,
        }
    }

    fn is_expired(&self, now: Instant, ttl: Option<Duration>) -> bool {
        match ttl {
            Some(ttl) => now.saturating_duration_since(self.created_at) >= ttl,
            None => false,
        }
    }
}

/// Which signal currently dominates eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionBias {
    RecencyLeaning,
    FrequencyLeaning,
}

impl EvictionBias {
    fn from_weight(weight: f64) -> Self {
        if weight < 1.0 {
            EvictionBias::RecencyLeaning
        } else {
            EvictionBias::FrequencyLeaning
        }
    }
}

/// Outcome of one tuning pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionTuning {
    pub previous_weight: f64,
    pub frequency_weight: f64,
    pub bias: EvictionBias,
    pub window_hit_rate: Option<f64>,
    pub repeat_share: f64,
}

/// Cache usage analytics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub frequency_weight: f64,
    pub bias: EvictionBias,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    insertions: u64,
    evictions: u64,
    expirations: u64,
    window_hits: u64,
    window_misses: u64,
}

#[derive(Debug)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    total_bytes: usize,
    frequency_weight: f64,
    counters: Counters,
}

impl CacheState {
    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn insert(&mut self, key: Fingerprint, entry: CacheEntry) {
        self.total_bytes += entry.size_bytes;
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
        }
        self.counters.insertions += 1;
    }
}

/// Content-keyed translation cache
#[derive(Debug)]
pub struct TranslationCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl TranslationCache {
    /// Create a new cache
    pub fn new(config: CacheConfig) -> Self {
        let frequency_weight = config.eviction.initial_frequency_weight;
        Self {
            config,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                total_bytes: 0,
                frequency_weight,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn ttl(&self) -> Option<Duration> {
        (self.config.ttl_seconds > 0).then(|| Duration::from_secs(self.config.ttl_seconds))
    }

    fn lock(&self) -> Option<MutexGuard<'_, CacheState>> {
        if !self.config.enabled {
            return None;
        }
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!("Translation cache unavailable, treating as miss");
                None
            }
        }
    }

    /// Look up a translation, refreshing its recency and access count
    pub fn get(&self, text: &str, source_lang: &str, target_lang: &str) -> Option<String> {
        let mut state = self.lock()?;
        let key = Fingerprint::compute(text, source_lang, target_lang);
        let now = Instant::now();

        let expired = match state.entries.get(&key) {
            Some(entry) => entry.is_expired(now, self.ttl()),
            None => {
                state.counters.misses += 1;
                state.counters.window_misses += 1;
                return None;
            }
        };

        if expired {
            state.remove(&key);
            state.counters.expirations += 1;
            state.counters.misses += 1;
            state.counters.window_misses += 1;
            return None;
        }

        state.counters.hits += 1;
        state.counters.window_hits += 1;
        let entry = state.entries.get_mut(&key)?;
        entry.last_access = now;
        entry.access_count += 1;
        Some(entry.translation.clone())
    }

    /// Insert or overwrite a translation, evicting as needed
    pub fn put(&self, text: &str, source_lang: &str, target_lang: &str, translation: impl Into<String>) {
        let Some(mut state) = self.lock() else {
            return;
        };
        let now = Instant::now();
        let key = Fingerprint::compute(text, source_lang, target_lang);
        let entry = CacheEntry::new(text, source_lang, target_lang, translation.into(), now);

        if entry.size_bytes > self.config.max_size_bytes {
            debug!(size = entry.size_bytes, "Entry larger than cache budget, not cached");
            return;
        }

        state.insert(key.clone(), entry);
        self.evict(&mut state, Some(&key), now);
    }

    /// Bulk insert prefetched translations with a single eviction pass
    pub fn preload<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = (String, String, String, String)>,
    {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let mut inserted = 0;

        for (text, source_lang, target_lang, translation) in entries {
            let entry = CacheEntry::new(&text, &source_lang, &target_lang, translation, now);
            if entry.size_bytes > self.config.max_size_bytes {
                continue;
            }
            state.insert(Fingerprint::compute(&text, &source_lang, &target_lang), entry);
            inserted += 1;
        }

        let evicted = self.evict(&mut state, None, now);
        info!(inserted, evicted, "Preloaded translation cache");
        inserted
    }

    /// Drop every entry older than the TTL
    pub fn cleanup_expired_entries(&self) -> usize {
        let Some(mut state) = self.lock() else {
            return 0;
        };
        let now = Instant::now();
        let ttl = self.ttl();

        let expired: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now, ttl))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        state.counters.expirations += expired.len() as u64;

        if !expired.is_empty() {
            debug!(removed = expired.len(), "Swept expired cache entries");
        }
        expired.len()
    }

    /// Rebalance recency against frequency from the hit rate seen since the last pass
    pub fn optimize_eviction_policy(&self) -> Option<EvictionTuning> {
        let mut state = self.lock()?;
        let tuning = &self.config.eviction;

        let lookups = state.counters.window_hits + state.counters.window_misses;
        let reused = state.entries.values().filter(|e| e.access_count > 0).count();
        let repeat_share = if state.entries.is_empty() {
            0.0
        } else {
            reused as f64 / state.entries.len() as f64
        };
        let previous_weight = state.frequency_weight;

        if lookups < tuning.min_lookups {
            return Some(EvictionTuning {
                previous_weight,
                frequency_weight: previous_weight,
                bias: EvictionBias::from_weight(previous_weight),
                window_hit_rate: None,
                repeat_share,
            });
        }

        let hit_rate = state.counters.window_hits as f64 / lookups as f64;
        let mut weight = previous_weight;
        if hit_rate < tuning.low_hit_rate {
            weight = (weight + tuning.weight_step).min(tuning.max_frequency_weight);
        } else if hit_rate > tuning.high_hit_rate && repeat_share < tuning.repeat_share_floor {
            weight = (weight - tuning.weight_step).max(0.0);
        }

        state.frequency_weight = weight;
        state.counters.window_hits = 0;
        state.counters.window_misses = 0;

        if weight != previous_weight {
            info!(
                previous_weight,
                frequency_weight = weight,
                hit_rate,
                "Adjusted cache eviction policy"
            );
        }

        Some(EvictionTuning {
            previous_weight,
            frequency_weight: weight,
            bias: EvictionBias::from_weight(weight),
            window_hit_rate: Some(hit_rate),
            repeat_share,
        })
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the cache
    pub fn clear(&self) {
        if let Some(mut state) = self.lock() {
            state.entries.clear();
            state.total_bytes = 0;
        }
    }

    /// Snapshot of usage analytics
    pub fn stats(&self) -> CacheStats {
        let weight = self.config.eviction.initial_frequency_weight;
        let Some(state) = self.lock() else {
            return CacheStats {
                entries: 0,
                total_bytes: 0,
                hits: 0,
                misses: 0,
                hit_rate: 0.0,
                insertions: 0,
                evictions: 0,
                expirations: 0,
                frequency_weight: weight,
                bias: EvictionBias::from_weight(weight),
            };
        };

        let c = &state.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            entries: state.entries.len(),
            total_bytes: state.total_bytes,
            hits: c.hits,
            misses: c.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
            insertions: c.insertions,
            evictions: c.evictions,
            expirations: c.expirations,
            frequency_weight: state.frequency_weight,
            bias: EvictionBias::from_weight(state.frequency_weight),
        }
    }

    fn over_capacity(&self, state: &CacheState) -> bool {
        state.entries.len() > self.config.max_entries
            || state.total_bytes > self.config.max_size_bytes
    }

    /// Evict until both bounds hold. `protect` is never chosen as a victim.
    fn evict(&self, state: &mut CacheState, protect: Option<&Fingerprint>, now: Instant) -> usize {
        if !self.over_capacity(state) {
            return 0;
        }

        let bucket = Duration::from_secs(self.config.eviction.recency_bucket_seconds.max(1));
        let weight = state.frequency_weight;

        let mut candidates: Vec<(Fingerprint, u64, usize, u64, Instant)> = state
            .entries
            .iter()
            .filter(|(key, _)| Some(*key) != protect)
            .map(|(key, entry)| {
                let idle = now.saturating_duration_since(entry.last_access);
                let age_bucket = idle.as_secs() / bucket.as_secs();
                let credit = frequency_credit(weight, entry.access_count);
                (
                    key.clone(),
                    age_bucket.saturating_sub(credit),
                    entry.size_bytes,
                    entry.access_count,
                    entry.last_access,
                )
            })
            .collect();

        // Most evictable first
        candidates.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.3.cmp(&b.3))
                .then_with(|| a.4.cmp(&b.4))
                .then_with(|| a.0.as_str().cmp(b.0.as_str()))
        });

        let mut evicted = 0;
        for (key, ..) in candidates {
            if !self.over_capacity(state) {
                break;
            }
            if state.remove(&key).is_some() {
                evicted += 1;
            }
        }

        state.counters.evictions += evicted as u64;
        if evicted > 0 {
            debug!(evicted, entries = state.entries.len(), "Evicted cache entries");
        }
        evicted
    }
}

/// Whole recency buckets an entry is forgiven for its access count
fn frequency_credit(weight: f64, access_count: u64) -> u64 {
    let credit = weight * (1.0 + access_count as f64).log2();
    if credit.is_finite() && credit > 0.0 {
        credit.floor() as u64
    } else {
        0
    }
}
