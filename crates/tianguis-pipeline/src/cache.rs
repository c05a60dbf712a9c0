//! Read-through cache for reference data, scoped to one pipeline cycle.
//!
//! Replaces the original ad hoc per-call lookup dictionaries: a component
//! creates one cache per cycle, ensures the IDs present on each page are
//! loaded, and drops the cache at the cycle boundary — which is the entire
//! invalidation story.

use std::{collections::HashMap, future::Future, hash::Hash};

/// A keyed read-through cache. Missing keys are remembered as missing so a
/// key absent from the backing table is fetched at most once.
pub struct RefCache<K, V> {
  entries: HashMap<K, Option<V>>,
}

impl<K: Eq + Hash + Copy, V> RefCache<K, V> {
  pub fn new() -> Self { Self { entries: HashMap::new() } }

  /// Load any of `keys` not yet cached, using `fetch` to resolve the batch.
  /// Keys `fetch` does not return are cached as missing.
  pub async fn ensure<E, F, Fut>(&mut self, keys: &[K], fetch: F) -> Result<(), E>
  where
    F: FnOnce(Vec<K>) -> Fut,
    Fut: Future<Output = Result<Vec<(K, V)>, E>>,
  {
    let wanted: Vec<K> = keys
      .iter()
      .copied()
      .filter(|k| !self.entries.contains_key(k))
      .collect();
    if wanted.is_empty() {
      return Ok(());
    }

    for k in &wanted {
      self.entries.insert(*k, None);
    }
    for (k, v) in fetch(wanted).await? {
      self.entries.insert(k, Some(v));
    }
    Ok(())
  }

  /// A cached value, or `None` if the key is unknown or known-missing.
  pub fn get(&self, key: &K) -> Option<&V> {
    self.entries.get(key).and_then(Option::as_ref)
  }
}

impl<K: Eq + Hash + Copy, V> Default for RefCache<K, V> {
  fn default() -> Self { Self::new() }
}
