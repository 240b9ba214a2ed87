// Copyright 2025 the gantry developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// An error from a registry lookup.
#[derive(Debug)]
pub enum RegistryError {
    /// Every clone of the registry was dropped before the key was published.
    Closed {
        /// The key the caller was waiting on.
        key: String,
    },
    /// The bounded wait elapsed before the key was published.
    TimedOut {
        /// The key the caller was waiting on.
        key: String,
        /// The bound that elapsed.
        limit: Duration,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Closed { key } => {
                write!(f, "Registry closed while waiting for key '{key}'")
            }
            RegistryError::TimedOut { key, limit } => {
                write!(f, "Timed out after {limit:?} waiting for key '{key}'")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

struct Entry<V> {
    value: Option<V>,
    waiters: Vec<oneshot::Sender<V>>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            value: None,
            waiters: Vec::new(),
        }
    }
}

/// A keyed store that supports reading before writing.
///
/// Values are published at most once per key in the common case; waiters that
/// arrived before the publish resolve in the order they registered, each
/// exactly once. A later publish for the same key overwrites the stored value
/// for future lookups but never re-notifies waiters that were already
/// satisfied.
///
/// Cloning the registry is cheap; clones share all state.
pub struct DeferredRegistry<V> {
    entries: Arc<Mutex<HashMap<String, Entry<V>>>>,
}

impl<V: Clone + Send + 'static> DeferredRegistry<V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves the value under `key`, waiting for the publish if necessary.
    ///
    /// A value that is already present resolves without additional delay. An
    /// absent one parks this caller as a waiter; the future completes at the
    /// next [`publish`](DeferredRegistry::publish) for the key. There is no
    /// built-in bound on the wait — see
    /// [`get_timeout`](DeferredRegistry::get_timeout).
    pub async fn get(&self, key: &str) -> Result<V, RegistryError> {
        let rx = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(key.to_string()).or_default();
            if let Some(value) = &entry.value {
                return Ok(value.clone());
            }
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            log::trace!("Waiting on registry key '{key}'");
            rx
        };
        rx.await.map_err(|_| RegistryError::Closed {
            key: key.to_string(),
        })
    }

    /// Like [`get`](DeferredRegistry::get), but gives up after `limit`.
    pub async fn get_timeout(&self, key: &str, limit: Duration) -> Result<V, RegistryError> {
        match tokio::time::timeout(limit, self.get(key)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::TimedOut {
                key: key.to_string(),
                limit,
            }),
        }
    }

    /// Returns the value under `key` if one was already published.
    pub fn try_get(&self, key: &str) -> Option<V> {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .and_then(|entry| entry.value.clone())
    }

    /// Stores `value` under `key` and resolves everyone waiting on it.
    ///
    /// Waiters resolve in the order they registered; the list is then
    /// cleared, so each waiter is satisfied exactly once. Publishing over an
    /// existing value replaces it for future lookups only. Returns how many
    /// waiters were resolved.
    pub fn publish(&self, key: &str, value: V) -> usize {
        let waiters = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(key.to_string()).or_default();
            if entry.value.is_some() {
                log::debug!("Overwriting registry key '{key}'");
            }
            entry.value = Some(value.clone());
            std::mem::take(&mut entry.waiters)
        };
        let resolved = waiters.len();
        for waiter in waiters {
            // A waiter whose future was dropped just ignores the value.
            let _ = waiter.send(value.clone());
        }
        if resolved > 0 {
            log::trace!("Registry key '{key}' resolved {resolved} waiters");
        }
        resolved
    }

    /// Returns `true` if a value was published under `key`.
    ///
    /// A key that only has waiters does not count as present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|entry| entry.value.is_some())
    }

    /// The number of keys with a published value.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|entry| entry.value.is_some())
            .count()
    }

    /// Returns `true` if no key has a published value.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Clone for DeferredRegistry<V> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<V: Clone + Send + 'static> Default for DeferredRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_lookup_resolves_immediately() {
        let registry = DeferredRegistry::new();
        registry.publish("ctx", 7u32);
        assert_eq!(registry.get("ctx").await.unwrap(), 7);
        assert_eq!(registry.try_get("ctx"), Some(7));
    }

    #[tokio::test]
    async fn early_waiter_resolves_at_first_publish() {
        let registry = DeferredRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get("ctx").await })
        };
        // Let the waiter park itself before publishing.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(registry.publish("ctx", 7u32), 1);
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn waiters_resolve_in_registration_order() {
        let registry = DeferredRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for tag in ["first", "second", "third"] {
            let registry = registry.clone();
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let value = registry.get("ctx").await.unwrap();
                order.lock().unwrap().push((tag, value));
            }));
            // Park each waiter before registering the next, so the waiter
            // list order is the spawn order.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }

        assert_eq!(registry.publish("ctx", 1u32), 3);
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(
            *order.lock().unwrap(),
            [("first", 1), ("second", 1), ("third", 1)]
        );
    }

    #[tokio::test]
    async fn republish_overwrites_without_renotifying() {
        let registry = DeferredRegistry::new();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get("ctx").await })
        };
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert_eq!(registry.publish("ctx", 1u32), 1);
        assert_eq!(waiter.await.unwrap().unwrap(), 1);

        // The second publish finds no waiters left to notify, but later
        // lookups see the new value.
        assert_eq!(registry.publish("ctx", 2u32), 0);
        assert_eq!(registry.get("ctx").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn bounded_wait_times_out_on_an_unpublished_key() {
        let registry = DeferredRegistry::<u32>::new();
        let err = registry
            .get_timeout("never", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn inspection_counts_published_values_only() {
        let registry = DeferredRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains("ctx"));

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get("ctx").await })
        };
        tokio::task::yield_now().await;

        // A parked waiter creates an entry but not a value.
        assert!(!registry.contains("ctx"));
        assert!(registry.is_empty());

        registry.publish("ctx", 9u32);
        assert!(registry.contains("ctx"));
        assert_eq!(registry.len(), 1);
        waiter.await.unwrap().unwrap();
    }
}
