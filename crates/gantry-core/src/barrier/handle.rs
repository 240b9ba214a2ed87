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

use super::error::CommitError;
use super::id::{RegistrationId, ScopeId};
use super::scheduler::{CommitOutcome, SchedulerShared};
use super::target::AttachTarget;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Tracks what the owner already told the scheduler, shared with the
/// optional deadline task.
#[derive(Default)]
struct HandleState {
    ready: AtomicBool,
    cancelled: AtomicBool,
}

/// The owner's side of one enqueued registration.
///
/// The handle is the registration's cancellation token: exactly one of
/// [`mark_ready`](RegistrationHandle::mark_ready) or
/// [`cancel`](RegistrationHandle::cancel) is expected on every code path.
/// Dropping a handle that was neither readied nor cancelled cancels the
/// registration, so an owner that fails mid-construction cannot leave the
/// scope's barrier waiting forever.
pub struct RegistrationHandle<T: AttachTarget> {
    id: RegistrationId,
    scope: ScopeId,
    shared: Arc<SchedulerShared<T>>,
    state: Arc<HandleState>,
}

impl<T: AttachTarget> RegistrationHandle<T> {
    pub(crate) fn new(
        id: RegistrationId,
        scope: ScopeId,
        shared: Arc<SchedulerShared<T>>,
    ) -> Self {
        Self {
            id,
            scope,
            shared,
            state: Arc::new(HandleState::default()),
        }
    }

    /// The registration's id, usable with
    /// [`BarrierScheduler::dequeue`](super::BarrierScheduler::dequeue) from
    /// teardown paths that no longer hold the handle.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// The scope this registration was enqueued into.
    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    /// Reports the registration ready and re-evaluates the scope's barrier.
    ///
    /// Idempotent: repeated calls after the first change nothing. A no-op on
    /// a cancelled handle. When this call completes the scope, the whole
    /// generation commits before the call returns, and any commit failure is
    /// returned here.
    pub fn mark_ready(&self) -> Result<CommitOutcome, CommitError> {
        if self.state.cancelled.load(Ordering::Acquire) {
            return Ok(CommitOutcome::Waiting);
        }
        if self.state.ready.swap(true, Ordering::AcqRel) {
            return Ok(CommitOutcome::Waiting);
        }
        self.shared.mark_ready(self.scope, self.id)
    }

    /// Withdraws the registration from its scope.
    ///
    /// A late [`mark_ready`](RegistrationHandle::mark_ready) afterwards is
    /// ignored. Withdrawal re-evaluates the barrier: when the cancelled item
    /// was the last unready one, the remaining items commit here.
    pub fn cancel(&self) -> Result<CommitOutcome, CommitError> {
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return Ok(CommitOutcome::Waiting);
        }
        self.shared.remove(self.scope, self.id)
    }

    /// Cancels the registration if it is still unready after `deadline`.
    ///
    /// Spawns a tokio task, so this requires a running runtime. The barrier
    /// itself never times out; this is the opt-in bound for owners that
    /// cannot guarantee their construction path ever finishes.
    pub fn cancel_after(&self, deadline: Duration) {
        let id = self.id;
        let scope = self.scope;
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if state.ready.load(Ordering::Acquire) {
                return;
            }
            if state.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            log::warn!("Registration {id} in scope {scope} missed its deadline, cancelling");
            if let Err(e) = shared.remove(scope, id) {
                log::error!("Commit failed while cancelling overdue registration {id}: {e}");
            }
        });
    }
}

impl<T: AttachTarget> Drop for RegistrationHandle<T> {
    fn drop(&mut self) {
        if self.state.ready.load(Ordering::Acquire) {
            return;
        }
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!(
            "Registration {} in scope {} dropped before ready, cancelling",
            self.id,
            self.scope
        );
        if let Err(e) = self.shared.remove(self.scope, self.id) {
            log::error!(
                "Commit failed while cancelling dropped registration {}: {e}",
                self.id
            );
        }
    }
}
