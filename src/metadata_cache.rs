//! In-memory cache of array layouts
//!
//! Building a [Layout] requires fetching and validating a manifest. The cache keeps recently used
//! layouts keyed by dataset identity. When the number of entries exceeds the limit, the least
//! recently used fraction of the entries is purged.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::layout::Layout;
use crate::metrics::LAYOUT_CACHE_EVENTS;

use hashbrown::HashMap;

/// Default fraction of the entries purged on overflow.
pub const DEFAULT_PURGE_FRACTION: f64 = 0.2;

#[derive(Debug)]
struct Entry {
    layout: Arc<Layout>,
    last_access: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    /// Logical clock, incremented on every access
    tick: u64,
}

impl State {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }
}

/// Least recently used cache of [Layout]s.
#[derive(Debug)]
pub struct LayoutCache {
    state: Mutex<State>,
    max_entries: usize,
    purge_fraction: f64,
}

impl LayoutCache {
    /// Returns a new cache.
    ///
    /// # Arguments
    ///
    /// * `max_entries`: Number of entries above which the cache is purged
    /// * `purge_fraction`: Fraction of the entries to purge, clamped to `[0, 1]`. At least one
    ///   entry is always purged.
    pub fn new(max_entries: usize, purge_fraction: f64) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_entries,
            purge_fraction: purge_fraction.clamp(0.0, 1.0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cached layouts.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a layout, marking it as most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<Layout>> {
        let mut state = self.lock();
        let tick = state.next_tick();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = tick;
                LAYOUT_CACHE_EVENTS.with_label_values(&["hit"]).inc();
                Some(entry.layout.clone())
            }
            None => {
                LAYOUT_CACHE_EVENTS.with_label_values(&["miss"]).inc();
                None
            }
        }
    }

    /// Insert or replace a layout, purging old entries if the cache overflows.
    pub fn insert(&self, key: impl Into<String>, layout: Arc<Layout>) {
        let mut state = self.lock();
        let last_access = state.next_tick();
        state.entries.insert(
            key.into(),
            Entry {
                layout,
                last_access,
            },
        );
        if state.entries.len() > self.max_entries {
            self.purge(&mut state);
        }
    }

    /// Remove a layout.
    pub fn remove(&self, key: &str) -> Option<Arc<Layout>> {
        self.lock().entries.remove(key).map(|entry| entry.layout)
    }

    /// Look up a layout, building and inserting it with `build` on a miss.
    ///
    /// The lock is not held while `build` runs, so concurrent misses for the same key may each
    /// build the layout. The last one inserted wins.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &str,
        build: F,
    ) -> Result<Arc<Layout>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Layout, E>>,
    {
        if let Some(layout) = self.get(key) {
            return Ok(layout);
        }
        let layout = Arc::new(build().await?);
        self.insert(key, layout.clone());
        Ok(layout)
    }

    /// Evict the least recently used entries.
    fn purge(&self, state: &mut State) {
        let len = state.entries.len();
        let count = ((len as f64 * self.purge_fraction) as usize).clamp(1, len);
        let mut by_age: Vec<(u64, String)> = state
            .entries
            .iter()
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, key) in by_age.into_iter().take(count) {
            state.entries.remove(&key);
        }
        LAYOUT_CACHE_EVENTS
            .with_label_values(&["eviction"])
            .inc_by(count as u64);
    }
}

impl Default for LayoutCache {
    fn default() -> Self {
        Self::new(100, DEFAULT_PURGE_FRACTION)
    }
}
