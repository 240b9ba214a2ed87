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

//! # Gantry Core
//!
//! Coordination primitives for components that initialize asynchronously but
//! must be wired into a shared destination deterministically.
//!
//! The crate provides three independent building blocks:
//!
//! - [`barrier`] — an ordered attachment barrier: registrations made against
//!   a scope are committed to the scope's target strictly in registration
//!   order, never in completion order, with cooperative cancellation.
//! - [`registry`] — a deferred keyed registry: a value published once under a
//!   string key resolves every consumer that started waiting for that key
//!   before the publish, and is handed out immediately afterwards.
//! - [`topic`] — a synchronous, name-scoped publish/subscribe bus.
//!
//! None of the primitives know what an attachable item, a registry value, or
//! a topic payload actually is; those shapes belong to the caller.

#![warn(missing_docs)]

pub mod barrier;
pub mod registry;
pub mod topic;

pub use barrier::{
    AttachError, AttachTarget, BarrierScheduler, CommitError, CommitOutcome, RegistrationHandle,
    RegistrationId, Scope, ScopeId,
};
pub use registry::{DeferredRegistry, RegistryError};
pub use topic::{SubscriptionToken, TopicBus};
