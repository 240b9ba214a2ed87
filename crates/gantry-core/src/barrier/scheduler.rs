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
use super::handle::RegistrationHandle;
use super::id::{RegistrationId, ScopeId};
use super::target::AttachTarget;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The producer stored with each registration.
///
/// By contract it is invoked at most once, during the commit pass, after the
/// owning handle reported ready — so the item it returns may have been built
/// long before and merely captured.
pub(crate) type ProduceFn<T> = Box<
    dyn FnOnce() -> Result<
            <T as AttachTarget>::Attachable,
            Box<dyn std::error::Error + Send + Sync>,
        > + Send,
>;

/// One destination's partition of the barrier.
///
/// A scope pairs a stable [`ScopeId`] with the target items get attached to.
/// Scopes in the same scheduler never block each other. Cloning a scope is
/// cheap and refers to the same partition.
#[derive(Debug)]
pub struct Scope<T: AttachTarget> {
    id: ScopeId,
    target: Arc<T>,
}

impl<T: AttachTarget> Scope<T> {
    /// Creates a scope over the given target.
    pub fn new(target: Arc<T>) -> Self {
        Self {
            id: ScopeId::new(),
            target,
        }
    }

    /// The scope's identity.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The destination items in this scope get attached to.
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }
}

impl<T: AttachTarget> Clone for Scope<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            target: Arc::clone(&self.target),
        }
    }
}

/// What a readiness re-evaluation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The scope is still waiting on at least one registration (or the call
    /// was a no-op on an already retired registration).
    Waiting,
    /// The scope's current generation committed.
    Committed {
        /// How many items were attached to the target.
        attached: usize,
    },
}

struct RegistrationItem<T: AttachTarget> {
    id: RegistrationId,
    produce: ProduceFn<T>,
    position: T::Position,
    ready: bool,
}

struct ScopeState<T: AttachTarget> {
    target: Arc<T>,
    items: Vec<RegistrationItem<T>>,
}

pub(crate) struct SchedulerShared<T: AttachTarget> {
    scopes: Mutex<HashMap<ScopeId, ScopeState<T>>>,
}

/// Commits asynchronously-readied registrations in enqueue order.
///
/// Each [`Scope`] accumulates registrations in the order [`enqueue`] was
/// called. Once every still-registered item in the scope has been marked
/// ready, the whole generation is attached to the scope's target, front to
/// back, and the scope starts fresh for any later enqueues. Cancelling or
/// dequeuing an item removes it from the generation and re-evaluates the
/// barrier, so a dead item never wedges its siblings.
///
/// Readiness evaluation and extraction of a committable generation happen
/// under one lock acquisition: an enqueue racing with a commit lands in the
/// next generation, never dropped and never attached twice. The attach loop
/// itself runs outside the lock, so producers may call back into the
/// scheduler.
///
/// Cloning the scheduler is cheap; clones share all state.
pub struct BarrierScheduler<T: AttachTarget> {
    shared: Arc<SchedulerShared<T>>,
}

impl<T: AttachTarget> BarrierScheduler<T> {
    /// Creates a scheduler with no scopes.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                scopes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Appends a registration to the scope's current generation.
    ///
    /// `produce` finalizes the attachable; it runs only during the commit
    /// pass, after the returned handle's
    /// [`mark_ready`](RegistrationHandle::mark_ready). `position` is opaque
    /// placement data forwarded to the target's attach call.
    ///
    /// Dropping the handle without marking it ready cancels the
    /// registration, so construction paths that fail or unwind cannot leave
    /// the scope permanently blocked.
    pub fn enqueue<F>(
        &self,
        scope: &Scope<T>,
        produce: F,
        position: T::Position,
    ) -> RegistrationHandle<T>
    where
        F: FnOnce() -> Result<T::Attachable, Box<dyn std::error::Error + Send + Sync>>
            + Send
            + 'static,
    {
        let id = RegistrationId::new();
        let mut scopes = self.shared.scopes.lock().unwrap();
        let state = scopes.entry(scope.id()).or_insert_with(|| {
            log::debug!("Opening barrier scope {}", scope.id());
            ScopeState {
                target: Arc::clone(scope.target()),
                items: Vec::new(),
            }
        });
        state.items.push(RegistrationItem {
            id,
            produce: Box::new(produce),
            position,
            ready: false,
        });
        log::trace!(
            "Enqueued registration {id} in scope {} ({} pending)",
            scope.id(),
            state.items.len()
        );
        RegistrationHandle::new(id, scope.id(), Arc::clone(&self.shared))
    }

    /// Removes a registration by id from whatever scope holds it.
    ///
    /// This is the external teardown path for owners that only kept the id.
    /// Returns `false` when the id is unknown — including when the item was
    /// already committed or cancelled. Like
    /// [`cancel`](RegistrationHandle::cancel), a successful removal
    /// re-evaluates the barrier and may commit the remaining items.
    pub fn dequeue(&self, id: RegistrationId) -> Result<bool, CommitError> {
        let (scope, batch) = {
            let mut scopes = self.shared.scopes.lock().unwrap();
            let mut owner = None;
            for (scope_id, state) in scopes.iter_mut() {
                let before = state.items.len();
                state.items.retain(|item| item.id != id);
                if state.items.len() != before {
                    owner = Some(*scope_id);
                    break;
                }
            }
            let Some(scope) = owner else {
                return Ok(false);
            };
            log::trace!("Dequeued registration {id} from scope {scope}");
            (scope, SchedulerShared::<T>::take_if_ready(&mut scopes, scope))
        };
        self.shared.commit(scope, batch)?;
        Ok(true)
    }

    /// How many registrations are pending in the scope's current generation.
    pub fn pending(&self, scope: ScopeId) -> usize {
        self.shared
            .scopes
            .lock()
            .unwrap()
            .get(&scope)
            .map(|state| state.items.len())
            .unwrap_or(0)
    }
}

impl<T: AttachTarget> Clone for BarrierScheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: AttachTarget> Default for BarrierScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AttachTarget> SchedulerShared<T> {
    /// Marks a registration ready and commits the scope if that completed it.
    ///
    /// Unknown ids are no-ops: the registration was already committed,
    /// cancelled, or dequeued.
    pub(crate) fn mark_ready(
        &self,
        scope: ScopeId,
        id: RegistrationId,
    ) -> Result<CommitOutcome, CommitError> {
        let batch = {
            let mut scopes = self.scopes.lock().unwrap();
            let Some(state) = scopes.get_mut(&scope) else {
                return Ok(CommitOutcome::Waiting);
            };
            let Some(item) = state.items.iter_mut().find(|item| item.id == id) else {
                return Ok(CommitOutcome::Waiting);
            };
            item.ready = true;
            log::trace!("Registration {id} in scope {scope} is ready");
            Self::take_if_ready(&mut scopes, scope)
        };
        self.commit(scope, batch)
    }

    /// Removes a registration and commits the scope if that unblocked it.
    pub(crate) fn remove(
        &self,
        scope: ScopeId,
        id: RegistrationId,
    ) -> Result<CommitOutcome, CommitError> {
        let batch = {
            let mut scopes = self.scopes.lock().unwrap();
            let Some(state) = scopes.get_mut(&scope) else {
                return Ok(CommitOutcome::Waiting);
            };
            let before = state.items.len();
            state.items.retain(|item| item.id != id);
            if state.items.len() == before {
                return Ok(CommitOutcome::Waiting);
            }
            log::trace!("Cancelled registration {id} in scope {scope}");
            Self::take_if_ready(&mut scopes, scope)
        };
        self.commit(scope, batch)
    }

    /// Extracts the scope's generation if every remaining item is ready.
    ///
    /// A generation emptied by cancellations counts as ready and is retired
    /// without attaching anything. Removal from the map is what makes the
    /// commit single-shot: a later enqueue against the same scope starts a
    /// fresh generation.
    fn take_if_ready(
        scopes: &mut HashMap<ScopeId, ScopeState<T>>,
        scope: ScopeId,
    ) -> Option<ScopeState<T>> {
        let ready = scopes
            .get(&scope)
            .map(|state| state.items.iter().all(|item| item.ready))
            .unwrap_or(false);
        if ready {
            scopes.remove(&scope)
        } else {
            None
        }
    }

    /// Attaches an extracted generation to its target, front to back.
    ///
    /// On the first failure the already-attached prefix stays in place and
    /// the rest of the generation is discarded; the error propagates to the
    /// caller that triggered the pass.
    fn commit(
        &self,
        scope: ScopeId,
        batch: Option<ScopeState<T>>,
    ) -> Result<CommitOutcome, CommitError> {
        let Some(ScopeState { target, items }) = batch else {
            return Ok(CommitOutcome::Waiting);
        };
        let mut attached = 0;
        for item in items {
            let attachable = (item.produce)().map_err(|source| {
                log::error!(
                    "Producing registration {} in scope {scope} failed: {source}",
                    item.id
                );
                CommitError::Produce {
                    scope,
                    registration: item.id,
                    source,
                }
            })?;
            target.attach(attachable, &item.position).map_err(|source| {
                log::error!(
                    "Attaching registration {} in scope {scope} failed: {source}",
                    item.id
                );
                CommitError::Attach {
                    scope,
                    registration: item.id,
                    source,
                }
            })?;
            attached += 1;
        }
        log::debug!("Scope {scope} committed {attached} registrations");
        Ok(CommitOutcome::Committed { attached })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::target::AttachError;

    /// Records attachments so tests can assert on the committed order.
    #[derive(Default)]
    struct RecordingTarget {
        attached: Mutex<Vec<(String, &'static str)>>,
    }

    impl RecordingTarget {
        fn attached(&self) -> Vec<String> {
            self.attached
                .lock()
                .unwrap()
                .iter()
                .map(|(item, _)| item.clone())
                .collect()
        }
    }

    impl AttachTarget for RecordingTarget {
        type Attachable = String;
        type Position = &'static str;

        fn attach(&self, item: String, position: &&'static str) -> Result<(), AttachError> {
            if item == "poison" {
                return Err(AttachError::Rejected {
                    details: "poisoned item".to_string(),
                });
            }
            self.attached.lock().unwrap().push((item, position));
            Ok(())
        }

        fn remove(&self, item: &String) -> Result<(), AttachError> {
            self.attached.lock().unwrap().retain(|(i, _)| i != item);
            Ok(())
        }
    }

    fn produce(
        name: &str,
    ) -> impl FnOnce() -> Result<String, Box<dyn std::error::Error + Send + Sync>> + Send + 'static
    {
        let name = name.to_string();
        move || Ok(name)
    }

    #[test]
    fn commits_in_enqueue_order_not_ready_order() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");
        let c = scheduler.enqueue(&scope, produce("c"), "bottom");

        assert_eq!(b.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert_eq!(a.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert!(scope.target().attached().is_empty());

        assert_eq!(
            c.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 3 }
        );
        assert_eq!(scope.target().attached(), ["a", "b", "c"]);
    }

    #[test]
    fn position_is_forwarded_to_the_target() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top-left");
        a.mark_ready().unwrap();

        let recorded = scope.target().attached.lock().unwrap().clone();
        assert_eq!(recorded, [("a".to_string(), "top-left")]);
    }

    #[test]
    fn cancellation_unblocks_the_scope() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");

        assert_eq!(b.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert_eq!(
            a.cancel().unwrap(),
            CommitOutcome::Committed { attached: 1 }
        );
        assert_eq!(scope.target().attached(), ["b"]);
    }

    #[test]
    fn cancelling_everything_retires_the_generation_without_attaching() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        assert_eq!(
            a.cancel().unwrap(),
            CommitOutcome::Committed { attached: 0 }
        );
        assert!(scope.target().attached().is_empty());
        assert_eq!(scheduler.pending(scope.id()), 0);
    }

    #[test]
    fn scopes_commit_independently() {
        let scheduler = BarrierScheduler::new();
        let stuck = Scope::new(Arc::new(RecordingTarget::default()));
        let free = Scope::new(Arc::new(RecordingTarget::default()));

        let _stuck_item = scheduler.enqueue(&stuck, produce("never"), "top");
        let ready_item = scheduler.enqueue(&free, produce("x"), "top");

        assert_eq!(
            ready_item.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 1 }
        );
        assert_eq!(free.target().attached(), ["x"]);
        assert!(stuck.target().attached().is_empty());
        assert_eq!(scheduler.pending(stuck.id()), 1);
    }

    #[test]
    fn mark_ready_is_idempotent() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");

        assert_eq!(a.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert_eq!(a.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert_eq!(
            b.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 2 }
        );
        assert_eq!(a.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert_eq!(scope.target().attached(), ["a", "b"]);
    }

    #[test]
    fn mark_ready_after_cancel_is_ignored() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        a.cancel().unwrap();
        assert_eq!(a.mark_ready().unwrap(), CommitOutcome::Waiting);
        assert!(scope.target().attached().is_empty());
    }

    #[test]
    fn dequeue_removes_by_id() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");

        b.mark_ready().unwrap();
        assert!(scheduler.dequeue(a.id()).unwrap());
        assert_eq!(scope.target().attached(), ["b"]);

        // Unknown afterwards: the item is gone.
        assert!(!scheduler.dequeue(a.id()).unwrap());
    }

    #[test]
    fn dequeue_of_committed_item_returns_false() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        a.mark_ready().unwrap();
        assert!(!scheduler.dequeue(a.id()).unwrap());
    }

    #[test]
    fn later_generations_start_fresh() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        a.mark_ready().unwrap();

        let b = scheduler.enqueue(&scope, produce("b"), "top");
        assert_eq!(scheduler.pending(scope.id()), 1);
        assert_eq!(
            b.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 1 }
        );
        assert_eq!(scope.target().attached(), ["a", "b"]);
    }

    #[test]
    fn produce_failure_aborts_the_rest_of_the_pass() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(
            &scope,
            || Err("construction fell over".into()),
            "top",
        );
        let c = scheduler.enqueue(&scope, produce("c"), "top");

        a.mark_ready().unwrap();
        b.mark_ready().unwrap();
        let err = c.mark_ready().unwrap_err();
        assert!(matches!(err, CommitError::Produce { .. }));

        // The prefix stays attached, the failing item and its successors are
        // discarded, and the generation is retired.
        assert_eq!(scope.target().attached(), ["a"]);
        assert_eq!(scheduler.pending(scope.id()), 0);
    }

    #[test]
    fn attach_failure_surfaces_to_the_committing_caller() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("poison"), "top");

        a.mark_ready().unwrap();
        let err = b.mark_ready().unwrap_err();
        assert!(matches!(err, CommitError::Attach { .. }));
        assert_eq!(scope.target().attached(), ["a"]);
    }

    #[test]
    fn dropping_an_unready_handle_cancels_it() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");

        assert_eq!(b.mark_ready().unwrap(), CommitOutcome::Waiting);
        drop(a);

        assert_eq!(scope.target().attached(), ["b"]);
    }

    #[test]
    fn dropping_a_ready_handle_does_not_cancel() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let a = scheduler.enqueue(&scope, produce("a"), "top");
        let b = scheduler.enqueue(&scope, produce("b"), "top");

        a.mark_ready().unwrap();
        drop(a);
        assert_eq!(scheduler.pending(scope.id()), 2);

        assert_eq!(
            b.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 2 }
        );
        assert_eq!(scope.target().attached(), ["a", "b"]);
    }

    #[test]
    fn enqueue_from_inside_a_producer_lands_in_the_next_generation() {
        let scheduler = BarrierScheduler::new();
        let scope = Scope::new(Arc::new(RecordingTarget::default()));

        let reentrant_scheduler = scheduler.clone();
        let reentrant_scope = scope.clone();
        let a = scheduler.enqueue(
            &scope,
            move || {
                let late = reentrant_scheduler.enqueue(&reentrant_scope, produce("late"), "top");
                late.mark_ready().unwrap();
                Ok("a".to_string())
            },
            "top",
        );

        assert_eq!(
            a.mark_ready().unwrap(),
            CommitOutcome::Committed { attached: 1 }
        );
        // The re-entrant registration formed and committed its own
        // generation; both items end up attached exactly once.
        assert_eq!(scope.target().attached(), ["late", "a"]);
    }
}
