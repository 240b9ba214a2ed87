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

//! Ordered attachment barrier.
//!
//! Asynchronously-constructed items that share a destination are enqueued
//! against a [`Scope`] in declaration order. The [`BarrierScheduler`] holds
//! them back until every still-registered item in the scope has reported
//! ready, then attaches all of them to the scope's [`AttachTarget`] in the
//! original enqueue order. Completion order never influences attachment
//! order.
//!
//! The target's attach/remove behavior is abstracted behind the
//! [`AttachTarget`] capability so the same barrier serves any destination
//! shape — one generic primitive instead of one queue per target kind.

mod error;
mod handle;
mod id;
mod scheduler;
mod target;

pub use self::error::CommitError;
pub use self::handle::RegistrationHandle;
pub use self::id::{RegistrationId, ScopeId};
pub use self::scheduler::{BarrierScheduler, CommitOutcome, Scope};
pub use self::target::{AttachError, AttachTarget};
