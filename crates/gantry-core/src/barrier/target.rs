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

use std::fmt;

/// The destination capability consumed by the barrier on commit.
///
/// Whatever owns the destination (a rendering surface, a UI chrome, a plain
/// collection in tests) implements this trait; the barrier only ever calls
/// [`attach`](AttachTarget::attach), strictly in enqueue order, once a
/// scope's generation is fully ready. [`remove`](AttachTarget::remove) is the
/// matching teardown path for items that were already attached — the barrier
/// itself never calls it, but owners that unmount after commit do.
///
/// `Position` is opaque placement data forwarded verbatim to `attach`; the
/// barrier imposes no meaning on it.
pub trait AttachTarget: Send + Sync + 'static {
    /// The finalized item accepted by this destination.
    type Attachable: Send + 'static;
    /// Placement hint forwarded to [`attach`](AttachTarget::attach).
    type Position: Send + 'static;

    /// Applies one item to the destination at the given position.
    fn attach(&self, item: Self::Attachable, position: &Self::Position)
        -> Result<(), AttachError>;

    /// Detaches a previously attached item from the destination.
    fn remove(&self, item: &Self::Attachable) -> Result<(), AttachError>;
}

/// An error raised by an [`AttachTarget`] implementation.
#[derive(Debug)]
pub enum AttachError {
    /// The destination no longer exists or can no longer accept items.
    TargetUnavailable {
        /// Description of the missing destination.
        details: String,
    },
    /// The destination refused the item or its position.
    Rejected {
        /// Why the item was refused.
        details: String,
    },
    /// An implementation-specific failure.
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::TargetUnavailable { details } => {
                write!(f, "Attach target unavailable: {details}")
            }
            AttachError::Rejected { details } => {
                write!(f, "Attach target rejected the item: {details}")
            }
            AttachError::Failed(e) => write!(f, "Attach failed: {e}"),
        }
    }
}

impl std::error::Error for AttachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttachError::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}
