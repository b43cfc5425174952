//! Per-client bucket registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::clock::Clock;
use super::key::ClientKey;
use super::rules::LimiterConfig;

/// A client's bucket together with the last time the client was seen.
#[derive(Debug)]
pub struct RegistryEntry {
    bucket: TokenBucket,
    last_seen: Mutex<Instant>,
}

impl RegistryEntry {
    fn new(config: &LimiterConfig, now: Instant) -> Self {
        Self {
            bucket: TokenBucket::new(config, now),
            last_seen: Mutex::new(now),
        }
    }

    /// The client's token bucket.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    /// Last time the client was seen.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Record that the client was seen at `now`. Never moves backwards.
    pub fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }
}

/// Maps client keys to their buckets for one route group.
///
/// The map is sharded by key hash, so lookups for unrelated clients rarely
/// contend. Bucket arithmetic happens under the bucket's own lock, outside
/// the shard lock. Entries are handed out as `Arc`s: a check that races with
/// eviction keeps using its (now orphaned) bucket, and the next request for
/// that key starts a fresh, full bucket.
#[derive(Debug)]
pub struct ClientRegistry {
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<ClientKey, Arc<RegistryEntry>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
        }
    }

    /// Get the entry for `key`, creating a full bucket if the key is unseen.
    ///
    /// The lookup itself counts as seeing the client.
    pub fn get_or_create(&self, key: &ClientKey) -> Arc<RegistryEntry> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            entry.touch(now);
            return Arc::clone(entry.value());
        }

        // The shard write lock makes check-then-insert atomic: racing first
        // requests all land on the same entry.
        let entry = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(
                    key = %key,
                    burst = self.config.burst,
                    refill_interval = ?self.config.refill_interval,
                    "Creating new client bucket"
                );
                Arc::new(RegistryEntry::new(&self.config, now))
            });
        entry.touch(now);
        Arc::clone(entry.value())
    }

    /// Update the last-seen time for `key`, if it is still registered.
    pub fn touch(&self, key: &ClientKey) {
        if let Some(entry) = self.entries.get(key) {
            entry.touch(self.clock.now());
        }
    }

    /// Look up `key` and try to take a token from its bucket.
    pub fn admit(&self, key: &ClientKey) -> bool {
        let entry = self.get_or_create(key);
        let admitted = entry.bucket().admit(self.clock.now());
        self.touch(key);

        trace!(key = %key, admitted = admitted, "Admission checked");
        admitted
    }

    /// Remove every entry unseen for longer than `idle_ttl` as of `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, idle_ttl: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.idle_for(now) <= idle_ttl;
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.entries.len(),
                "Evicted idle client buckets"
            );
        }
        removed
    }

    /// Whether `key` currently has a bucket.
    pub fn contains(&self, key: &ClientKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every tracked client.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// The limiter settings new buckets are created with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The registry's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
