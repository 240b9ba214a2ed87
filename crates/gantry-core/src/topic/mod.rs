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

//! Synchronous name-scoped publish/subscribe.
//!
//! The [`TopicBus`] is a best-effort multicast: a publish invokes every
//! callback currently subscribed under the topic name, in subscription
//! order, and is a silent no-op when nobody is listening. Nothing is
//! buffered or replayed for later subscribers.

mod bus;

pub use self::bus::{SubscriptionToken, TopicBus};
