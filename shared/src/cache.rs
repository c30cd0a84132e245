//! Generic in-memory key/value cache with combinable eviction.
//!
//! A cache can run without eviction, with LRU or with LFU eviction, and any of those can be
//! combined with TTL expiry. The configuration can be swapped at runtime with
//! [`Cache::set_config`]: every record is always kept in all three orderings (use count,
//! recency of use, recency of write), so a new policy takes effect immediately.
//!
//! Records live in a dense arena and are addressed by integer handles. Each ordering is an
//! intrusive doubly-linked list threaded through the arena, so repositioning a record and
//! finding an eviction candidate never walk the whole cache. The hot end of every list is
//! its head; eviction candidates are taken from the tail.
//!
//! Locking: one read-write lock guards the index and all lists, a second one guards the
//! configuration. A lookup checks membership under a shared read lock, so misses run in
//! parallel. A hit always repositions the record (a read counts as a use) and takes the write
//! lock, so read-heavy workloads contend on it in proportion to their hit rate.

use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Never evict on growth; a full cache rejects new keys.
    #[default]
    None,
    Lru,
    Lfu,
}

#[derive(Debug, Clone, Error)]
#[error("unknown eviction policy: {0}")]
pub struct UnknownEvictionPolicy(String);

impl FromStr for EvictionPolicy {
    type Err = UnknownEvictionPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" | "simple" => Ok(EvictionPolicy::None),
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            _ => Err(UnknownEvictionPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of records, 0 means unbounded.
    pub max_size: u64,
    pub eviction_policy: EvictionPolicy,
    /// Record lifetime counted from its last write, 0 means records never expire.
    pub ttl_secs: u64,
}

impl CacheConfig {
    fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    fn is_full(&self, len: usize) -> bool {
        self.max_size > 0 && len as u64 >= self.max_size
    }
}

type Handle = usize;

#[derive(Debug, Clone, Copy)]
enum Rank {
    Lfu,
    Lru,
    Ttl,
}

const RANKS: [Rank; 3] = [Rank::Lfu, Rank::Lru, Rank::Ttl];

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<Handle>,
    next: Option<Handle>,
}

#[derive(Debug, Clone, Copy, Default)]
struct List {
    head: Option<Handle>,
    tail: Option<Handle>,
}

#[derive(Debug)]
struct Node<K, V> {
    key: K,
    value: V,
    lfu_count: u64,
    used_at: Instant,
    lfu: Links,
    lru: Links,
    ttl: Links,
}

impl<K, V> Node<K, V> {
    fn links(&self, rank: Rank) -> Links {
        match rank {
            Rank::Lfu => self.lfu,
            Rank::Lru => self.lru,
            Rank::Ttl => self.ttl,
        }
    }

    fn links_mut(&mut self, rank: Rank) -> &mut Links {
        match rank {
            Rank::Lfu => &mut self.lfu,
            Rank::Lru => &mut self.lru,
            Rank::Ttl => &mut self.ttl,
        }
    }
}

struct Store<K, V> {
    nodes: Vec<Node<K, V>>,
    index: HashMap<K, Handle>,
    lfu: List,
    lru: List,
    ttl: List,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
            lfu: List::default(),
            lru: List::default(),
            ttl: List::default(),
        }
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn list(&self, rank: Rank) -> List {
        match rank {
            Rank::Lfu => self.lfu,
            Rank::Lru => self.lru,
            Rank::Ttl => self.ttl,
        }
    }

    fn list_mut(&mut self, rank: Rank) -> &mut List {
        match rank {
            Rank::Lfu => &mut self.lfu,
            Rank::Lru => &mut self.lru,
            Rank::Ttl => &mut self.ttl,
        }
    }

    fn unlink(&mut self, h: Handle, rank: Rank) {
        let Links { prev, next } = self.nodes[h].links(rank);
        match prev {
            Some(p) => self.nodes[p].links_mut(rank).next = next,
            None => self.list_mut(rank).head = next,
        }
        match next {
            Some(n) => self.nodes[n].links_mut(rank).prev = prev,
            None => self.list_mut(rank).tail = prev,
        }
        *self.nodes[h].links_mut(rank) = Links::default();
    }

    fn push_front(&mut self, h: Handle, rank: Rank) {
        let head = self.list(rank).head;
        *self.nodes[h].links_mut(rank) = Links { prev: None, next: head };
        match head {
            Some(old) => self.nodes[old].links_mut(rank).prev = Some(h),
            None => self.list_mut(rank).tail = Some(h),
        }
        self.list_mut(rank).head = Some(h);
    }

    fn push_back(&mut self, h: Handle, rank: Rank) {
        let tail = self.list(rank).tail;
        *self.nodes[h].links_mut(rank) = Links { prev: tail, next: None };
        match tail {
            Some(old) => self.nodes[old].links_mut(rank).next = Some(h),
            None => self.list_mut(rank).head = Some(h),
        }
        self.list_mut(rank).tail = Some(h);
    }

    fn insert_before(&mut self, h: Handle, at: Handle, rank: Rank) {
        let prev = self.nodes[at].links(rank).prev;
        *self.nodes[h].links_mut(rank) = Links { prev, next: Some(at) };
        self.nodes[at].links_mut(rank).prev = Some(h);
        match prev {
            Some(p) => self.nodes[p].links_mut(rank).next = Some(h),
            None => self.list_mut(rank).head = Some(h),
        }
    }

    /// Moves `h` towards the LFU head past every record used less often. With `ties` it also
    /// passes records used exactly as often, which puts a fresh record in front of its peers.
    fn promote_lfu(&mut self, h: Handle, ties: bool) {
        let count = self.nodes[h].lfu_count;
        let mut target = None;
        let mut cursor = self.nodes[h].lfu.prev;
        while let Some(c) = cursor {
            let other = self.nodes[c].lfu_count;
            if other < count || (ties && other == count) {
                target = Some(c);
                cursor = self.nodes[c].lfu.prev;
            } else {
                break;
            }
        }
        if let Some(at) = target {
            self.unlink(h, Rank::Lfu);
            self.insert_before(h, at, Rank::Lfu);
        }
    }

    fn insert(&mut self, key: K, value: V, now: Instant) {
        let h = self.nodes.len();
        self.nodes.push(Node {
            key: key.clone(),
            value,
            lfu_count: 1,
            used_at: now,
            lfu: Links::default(),
            lru: Links::default(),
            ttl: Links::default(),
        });
        self.index.insert(key, h);
        self.push_back(h, Rank::Lfu);
        self.promote_lfu(h, true);
        self.push_front(h, Rank::Lru);
        self.push_front(h, Rank::Ttl);
    }

    /// Records one use of `h` in the LFU and LRU orderings.
    fn touch(&mut self, h: Handle) {
        self.nodes[h].lfu_count += 1;
        self.promote_lfu(h, false);
        self.unlink(h, Rank::Lru);
        self.push_front(h, Rank::Lru);
    }

    fn refresh_ttl(&mut self, h: Handle, now: Instant) {
        self.nodes[h].used_at = now;
        self.unlink(h, Rank::Ttl);
        self.push_front(h, Rank::Ttl);
    }

    fn remove(&mut self, h: Handle) -> Node<K, V> {
        for rank in RANKS {
            self.unlink(h, rank);
        }
        let node = self.nodes.swap_remove(h);
        self.index.remove(&node.key);
        if h < self.nodes.len() {
            self.relocated(h);
        }
        node
    }

    /// Re-points neighbours and the index at `h` after `swap_remove` moved the last node there.
    fn relocated(&mut self, h: Handle) {
        for rank in RANKS {
            let Links { prev, next } = self.nodes[h].links(rank);
            match prev {
                Some(p) => self.nodes[p].links_mut(rank).next = Some(h),
                None => self.list_mut(rank).head = Some(h),
            }
            match next {
                Some(n) => self.nodes[n].links_mut(rank).prev = Some(h),
                None => self.list_mut(rank).tail = Some(h),
            }
        }
        if let Some(slot) = self.index.get_mut(&self.nodes[h].key) {
            *slot = h;
        }
    }

    fn is_expired(&self, h: Handle, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.nodes[h].used_at) >= ttl
    }

    fn evict_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let mut evicted = 0;
        while let Some(tail) = self.ttl.tail {
            if !self.is_expired(tail, ttl, now) {
                break;
            }
            self.remove(tail);
            evicted += 1;
        }
        evicted
    }

    fn evict_cold(&mut self, rank: Rank, config: &CacheConfig) -> usize {
        let mut evicted = 0;
        while config.is_full(self.len()) {
            let Some(tail) = self.list(rank).tail else { break };
            self.remove(tail);
            evicted += 1;
        }
        evicted
    }
}

/// Thread-safe cache; share it behind an `Arc`.
pub struct Cache<K, V> {
    config: RwLock<CacheConfig>,
    store: RwLock<Store<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: RwLock::new(config),
            store: RwLock::new(Store::new()),
        }
    }

    /// Inserts or updates `key`. Returns `false` only when the cache is full and the current
    /// policy could not free a slot.
    pub fn set(&self, key: K, value: V) -> bool {
        let config = self.config.read();
        let mut store = self.store.write();
        let now = Instant::now();

        if let Some(&h) = store.index.get(&key) {
            store.nodes[h].value = value;
            store.touch(h);
            store.refresh_ttl(h, now);
            return true;
        }

        if let Some(ttl) = config.ttl() {
            store.evict_expired(ttl, now);
        }
        if config.is_full(store.len()) {
            match config.eviction_policy {
                EvictionPolicy::Lru => {
                    store.evict_cold(Rank::Lru, &config);
                }
                EvictionPolicy::Lfu => {
                    store.evict_cold(Rank::Lfu, &config);
                }
                EvictionPolicy::None => {}
            }
        }
        if config.is_full(store.len()) {
            return false;
        }
        store.insert(key, value, now);
        true
    }

    /// Returns a copy of the value for `key`. An expired record is evicted, together with any
    /// other expired records at the cold end of the TTL ordering, and reported as a miss.
    pub fn get(&self, key: &K) -> Option<V> {
        let config = self.config.read();
        if !self.store.read().index.contains_key(key) {
            return None;
        }
        let mut store = self.store.write();
        // the record may have been removed between the two locks
        let h = *store.index.get(key)?;

        if let Some(ttl) = config.ttl() {
            let now = Instant::now();
            if store.is_expired(h, ttl, now) {
                store.remove(h);
                store.evict_expired(ttl, now);
                return None;
            }
        }
        store.touch(h);
        Some(store.nodes[h].value.clone())
    }

    /// Removes `key`. Returns `false` if it was not cached.
    pub fn invalidate(&self, key: &K) -> bool {
        let _config = self.config.read();
        let store = self.store.upgradable_read();
        let Some(&h) = store.index.get(key) else {
            return false;
        };
        let mut store = RwLockUpgradableReadGuard::upgrade(store);
        store.remove(h);
        true
    }

    pub fn clear(&self) {
        let _config = self.config.write();
        *self.store.write() = Store::new();
    }

    /// Swaps the configuration. Existing records are kept; a smaller `max_size` is enforced
    /// on the next insertion of a new key.
    pub fn set_config(&self, config: CacheConfig) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> CacheConfig {
        *self.config.read()
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max_size: u64, eviction_policy: EvictionPolicy, ttl_secs: u64) -> Cache<&'static str, u32> {
        Cache::new(CacheConfig {
            max_size,
            eviction_policy,
            ttl_secs,
        })
    }

    #[test]
    fn set_then_get_returns_value() {
        let c = cache(0, EvictionPolicy::None, 0);
        assert!(c.set("a", 1));
        assert_eq!(c.get(&"a"), Some(1));
        assert_eq!(c.get(&"b"), None);
    }

    #[test]
    fn miss_does_not_wait_for_other_lookups() {
        let c = cache(0, EvictionPolicy::Lru, 0);
        c.set("a", 1);
        let _pending = c.store.upgradable_read();
        assert_eq!(c.get(&"b"), None);
    }

    #[test]
    fn set_existing_key_updates_value() {
        let c = cache(1, EvictionPolicy::None, 0);
        assert!(c.set("a", 1));
        assert!(c.set("a", 2));
        assert_eq!(c.get(&"a"), Some(2));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn full_cache_without_policy_rejects_new_keys() {
        let c = cache(2, EvictionPolicy::None, 0);
        assert!(c.set("a", 1));
        assert!(c.set("b", 2));
        assert!(!c.set("c", 3));
        assert_eq!(c.get(&"c"), None);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let c = cache(2, EvictionPolicy::Lru, 0);
        c.set("a", 1);
        c.set("b", 2);
        assert_eq!(c.get(&"a"), Some(1));
        assert!(c.set("c", 3));
        assert_eq!(c.get(&"b"), None);
        assert_eq!(c.get(&"a"), Some(1));
        assert_eq!(c.get(&"c"), Some(3));
    }

    #[test]
    fn lfu_evicts_least_frequently_used() {
        let c = cache(2, EvictionPolicy::Lfu, 0);
        c.set("a", 1);
        c.set("b", 2);
        c.get(&"a");
        c.get(&"a");
        assert!(c.set("c", 3));
        assert_eq!(c.get(&"b"), None);
        assert_eq!(c.get(&"a"), Some(1));
        assert_eq!(c.get(&"c"), Some(3));
    }

    #[test]
    fn lfu_ties_evict_the_older_record() {
        let c = cache(2, EvictionPolicy::Lfu, 0);
        c.set("a", 1);
        c.set("b", 2);
        assert!(c.set("c", 3));
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.get(&"b"), Some(2));
    }

    #[test]
    fn invalidate_and_clear() {
        let c = cache(0, EvictionPolicy::Lru, 0);
        c.set("a", 1);
        c.set("b", 2);
        c.set("c", 3);
        assert!(c.invalidate(&"b"));
        assert!(!c.invalidate(&"b"));
        assert_eq!(c.get(&"a"), Some(1));
        assert_eq!(c.get(&"c"), Some(3));
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.get(&"a"), None);
    }

    #[test]
    fn lists_stay_consistent_after_arena_compaction() {
        let c = cache(3, EvictionPolicy::Lru, 0);
        c.set("a", 1);
        c.set("b", 2);
        c.set("c", 3);
        // removing the first slot moves "c" into it
        assert!(c.invalidate(&"a"));
        c.get(&"b");
        c.set("d", 4);
        c.set("e", 5);
        assert_eq!(c.get(&"c"), None);
        assert_eq!(c.get(&"b"), Some(2));
        assert_eq!(c.get(&"d"), Some(4));
        assert_eq!(c.get(&"e"), Some(5));
    }

    #[test]
    fn set_config_switches_policy_live() {
        let c = cache(2, EvictionPolicy::None, 0);
        c.set("a", 1);
        c.set("b", 2);
        c.get(&"a");
        assert!(!c.set("c", 3));

        c.set_config(CacheConfig {
            max_size: 2,
            eviction_policy: EvictionPolicy::Lru,
            ttl_secs: 0,
        });
        assert!(c.set("c", 3));
        assert_eq!(c.get(&"b"), None);

        c.set_config(CacheConfig {
            max_size: 1,
            eviction_policy: EvictionPolicy::Lfu,
            ttl_secs: 0,
        });
        c.get(&"a");
        assert!(c.set("d", 4));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"d"), Some(4));
        assert_eq!(c.config().eviction_policy, EvictionPolicy::Lfu);
        assert_eq!(c.config().max_size, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_record_is_a_miss() {
        let c = cache(0, EvictionPolicy::None, 10);
        c.set("a", 1);
        c.set("b", 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        c.set("c", 3);
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(c.get(&"a"), None);
        // "b" was swept with "a", "c" is still fresh
        assert_eq!(c.len(), 1);
        assert_eq!(c.get(&"c"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_eviction_runs_before_policy_eviction() {
        let c = cache(2, EvictionPolicy::Lfu, 10);
        c.set("a", 1);
        for _ in 0..4 {
            c.get(&"a");
        }
        tokio::time::advance(Duration::from_secs(8)).await;
        c.set("b", 2);
        c.get(&"b");
        tokio::time::advance(Duration::from_secs(3)).await;

        // "a" is the most used record but it has expired
        assert!(c.set("c", 3));
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.get(&"b"), Some(2));
        assert_eq!(c.get(&"c"), Some(3));
        assert_eq!(c.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rewrite_refreshes_ttl() {
        let c = cache(0, EvictionPolicy::None, 10);
        c.set("a", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        c.set("a", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(c.get(&"a"), Some(2));
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("LRU".parse::<EvictionPolicy>().ok(), Some(EvictionPolicy::Lru));
        assert_eq!("lfu".parse::<EvictionPolicy>().ok(), Some(EvictionPolicy::Lfu));
        assert_eq!("none".parse::<EvictionPolicy>().ok(), Some(EvictionPolicy::None));
        assert!("fifo".parse::<EvictionPolicy>().is_err());
    }
}
