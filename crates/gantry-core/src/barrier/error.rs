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

//! Errors surfaced by a barrier commit pass.

use super::id::{RegistrationId, ScopeId};
use super::target::AttachError;
use std::fmt;

/// A failure during a scope commit.
///
/// The error is returned to whichever call triggered the commit pass
/// (`mark_ready`, `cancel`, or `dequeue`). Items attached before the failing
/// one stay attached; the failing item and everything after it in the
/// generation are discarded. The scheduler does not retry.
#[derive(Debug)]
pub enum CommitError {
    /// A registration's `produce` closure failed while finalizing its item.
    Produce {
        /// The scope whose commit pass failed.
        scope: ScopeId,
        /// The registration whose producer failed.
        registration: RegistrationId,
        /// The producer's error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// The target refused an item during the attach loop.
    Attach {
        /// The scope whose commit pass failed.
        scope: ScopeId,
        /// The registration whose item was refused.
        registration: RegistrationId,
        /// The target's error.
        source: AttachError,
    },
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Produce {
                scope,
                registration,
                source,
            } => write!(
                f,
                "Producing registration {registration} in scope {scope} failed: {source}"
            ),
            CommitError::Attach {
                scope,
                registration,
                source,
            } => write!(
                f,
                "Attaching registration {registration} in scope {scope} failed: {source}"
            ),
        }
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommitError::Produce { source, .. } => Some(source.as_ref()),
            CommitError::Attach { source, .. } => Some(source),
        }
    }
}
