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

//! Deferred keyed registry.
//!
//! Decouples the producer of a shared context value from consumers that may
//! mount before the production completes: a `get` issued before the matching
//! `publish` parks as a waiter and resolves at the first publish for its key,
//! while a `get` issued afterwards resolves immediately. Keys are plain
//! strings; collisions across unrelated callers are the callers' problem.

mod deferred;

pub use self::deferred::{DeferredRegistry, RegistryError};
