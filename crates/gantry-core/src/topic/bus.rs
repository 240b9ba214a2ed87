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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The token returned by [`TopicBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionToken(Uuid);

impl SubscriptionToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Subscription<P> {
    token: SubscriptionToken,
    name: String,
    callback: Arc<dyn Fn(&P) + Send + Sync>,
}

/// A synchronous, name-scoped multicast bus.
///
/// Callbacks subscribed under a name are invoked once per publish to that
/// name, in subscription order, on the publishing caller's stack. Dispatch
/// iterates a snapshot taken when the publish starts, so a callback may
/// subscribe or unsubscribe — itself included — without corrupting the
/// in-flight pass. A panicking callback aborts the rest of its pass; the bus
/// does not isolate subscribers from each other.
///
/// Cloning the bus is cheap; clones share the subscriber set.
pub struct TopicBus<P> {
    subscriptions: Arc<Mutex<Vec<Subscription<P>>>>,
}

impl<P> TopicBus<P> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Registers `callback` under `name`.
    pub fn subscribe<F>(&self, name: &str, callback: F) -> SubscriptionToken
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let token = SubscriptionToken::new();
        self.subscriptions.lock().unwrap().push(Subscription {
            token,
            name: name.to_string(),
            callback: Arc::new(callback),
        });
        log::trace!("Subscribed {token} to topic '{name}'");
        token
    }

    /// Removes the subscription behind `token`.
    ///
    /// Returns whether anything was removed; an unknown token is `false`.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.token != token);
        let removed = subscriptions.len() != before;
        if removed {
            log::trace!("Unsubscribed {token}");
        }
        removed
    }

    /// Delivers `payload` to every callback subscribed under `name`.
    ///
    /// Returns how many callbacks were invoked; a name with no subscribers
    /// is a no-op returning zero.
    pub fn publish(&self, name: &str, payload: &P) -> usize {
        // Snapshot under the lock, dispatch outside it, so callbacks may
        // call back into the bus.
        let snapshot: Vec<Arc<dyn Fn(&P) + Send + Sync>> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|subscription| subscription.name == name)
            .map(|subscription| Arc::clone(&subscription.callback))
            .collect();
        for callback in &snapshot {
            callback(payload);
        }
        log::trace!("Published to topic '{name}' ({} subscribers)", snapshot.len());
        snapshot.len()
    }

    /// How many subscriptions are currently registered under `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|subscription| subscription.name == name)
            .count()
    }
}

impl<P: Clone + Send + 'static> TopicBus<P> {
    /// Subscribes a channel instead of a callback.
    ///
    /// Every publish under `name` is cloned into the returned receiver. A
    /// receiver that was dropped simply stops accepting; the subscription
    /// still has to be removed with [`unsubscribe`](TopicBus::unsubscribe).
    pub fn subscribe_channel(&self, name: &str) -> (SubscriptionToken, flume::Receiver<P>) {
        let (tx, rx) = flume::unbounded();
        let token = self.subscribe(name, move |payload: &P| {
            if tx.send(payload.clone()).is_err() {
                log::debug!("Topic channel receiver disconnected, dropping payload");
            }
        });
        (token, rx)
    }
}

impl<P> Clone for TopicBus<P> {
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }
}

impl<P> Default for TopicBus<P> {
    fn default() -> Self {
        Self::new()
    }
}
