//! Bounded key/value cache with per-entry expiry.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// When an entry's clock is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Entry expires a fixed time after it was inserted.
    AfterWrite(Duration),
    /// Entry expires after it has not been read for the given time.
    AfterAccess(Duration),
}

impl Expiry {
    fn ttl(self) -> Duration {
        match self {
            Self::AfterWrite(ttl) | Self::AfterAccess(ttl) => ttl,
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    touched_at: Instant,
}

/// Read-through cache used for active webhooks, goals, traffic windows and
/// GeoIP lookups.
///
/// Callers only see `get_or_compute`; expiry and the capacity bound are
/// handled internally. When full, expired entries are purged first and then
/// the least recently touched entry is evicted.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    expiry: Expiry,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(expiry: Expiry, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expiry,
            max_entries: max_entries.max(1),
        }
    }

    fn is_live(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.touched_at) < self.expiry.ttl()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now()).await
    }

    async fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let live = entries.get(key).map(|entry| self.is_live(entry, now))?;
        if !live {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        if matches!(self.expiry, Expiry::AfterAccess(_)) {
            entry.touched_at = now;
        }
        Some(entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.insert_locked(&mut entries, key, value, now);
    }

    fn insert_locked(&self, entries: &mut HashMap<K, Entry<V>>, key: K, value: V, now: Instant) {
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let ttl = self.expiry.ttl();
            entries.retain(|_, entry| now.saturating_duration_since(entry.touched_at) < ttl);
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.touched_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                touched_at: now,
            },
        );
    }

    /// Return the cached value for `key`, or run `loader`, cache its result
    /// and return it. Loader errors are returned and nothing is cached.
    ///
    /// The lock is not held while `loader` runs; two concurrent misses for the
    /// same key may both load, and the later insert wins.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) for infallible,
    /// synchronous initialisers. Check and insert happen under one lock.
    pub async fn get_or_insert_with<F>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> V,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            if self.is_live(entry, now) {
                if matches!(self.expiry, Expiry::AfterAccess(_)) {
                    entry.touched_at = now;
                }
                return entry.value.clone();
            }
        }
        let value = init();
        self.insert_locked(&mut entries, key, value.clone(), now);
        value
    }

    pub async fn invalidate(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn loader_runs_once_while_entry_is_fresh() {
        let cache: TtlCache<String, u32> =
            TtlCache::new(Expiry::AfterWrite(Duration::from_secs(60)), 10);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_compute("k".to_string(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::convert::Infallible>(42)
                })
                .await
                .expect("infallible");
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_error_is_not_cached() {
        let cache: TtlCache<&'static str, u32> =
            TtlCache::new(Expiry::AfterWrite(Duration::from_secs(60)), 10);
        let err = cache
            .get_or_compute("k", || async { Err::<u32, _>("boom") })
            .await;
        assert_eq!(err, Err("boom"));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn expired_entries_are_reloaded() {
        let cache: TtlCache<&'static str, u32> =
            TtlCache::new(Expiry::AfterWrite(Duration::from_millis(20)), 10);
        cache.insert("k", 1).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"k").await, None);
        let value = cache
            .get_or_compute("k", || async { Ok::<_, ()>(2) })
            .await
            .expect("load");
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_touched() {
        let cache: TtlCache<u32, u32> =
            TtlCache::new(Expiry::AfterAccess(Duration::from_secs(60)), 2);
        cache.insert(1, 10).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.insert(2, 20).await;
        tokio::time::sleep(Duration::from_millis(2)).await;
        // Touch 1 so that 2 becomes the oldest.
        assert_eq!(cache.get(&1).await, Some(10));
        cache.insert(3, 30).await;
        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get(&2).await, None);
        assert_eq!(cache.get(&1).await, Some(10));
        assert_eq!(cache.get(&3).await, Some(30));
    }

    #[tokio::test]
    async fn get_or_insert_with_shares_value() {
        let cache: TtlCache<&'static str, std::sync::Arc<AtomicUsize>> =
            TtlCache::new(Expiry::AfterAccess(Duration::from_secs(60)), 4);
        let a = cache
            .get_or_insert_with("p", || std::sync::Arc::new(AtomicUsize::new(0)))
            .await;
        a.fetch_add(1, Ordering::SeqCst);
        let b = cache
            .get_or_insert_with("p", || std::sync::Arc::new(AtomicUsize::new(0)))
            .await;
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }
}
