//! [`Zone`] — a node in the ambient execution-context tree (spec.md §4.C4).
//!
//! Public operations mirror spec.md's external interface (§6) one for one:
//! [`Zone::fork`], [`Zone::run`], [`Zone::run_guarded`], [`Zone::wrap`], the
//! three `schedule_*_task` constructors, [`Zone::run_task`],
//! [`Zone::cancel_task`], [`Zone::get`] / [`Zone::get_zone_with`].

use crate::delegate::Delegate;
use crate::engine;
use crate::errors::{ZoneCallbackError, ZoneError};
use crate::fatal;
use crate::hooks::{AnyResult, ErasedFn, ZoneSpec};
use crate::task::{Task, TaskData, TaskKind, TaskState};
use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

struct ZoneInner {
    parent: Option<Zone>,
    name: String,
    properties: HashMap<String, Rc<dyn Any>>,
    delegate: Rc<Delegate>,
}

/// A node in the zone tree (spec.md §3 "Zone"). Immutable after
/// construction and cheaply cloned — every clone is a new reference to the
/// same node (`Rc`-backed), matching spec.md's "reachable only via the
/// process-wide `current` stack and explicit user references".
#[derive(Clone)]
pub struct Zone {
    inner: Rc<ZoneInner>,
}

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Zone {}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone").field("name", &self.inner.name).finish()
    }
}

impl Zone {
    /// Constructs the singleton root zone. `parent = none`, name `"<root>"`,
    /// no spec — called exactly once by [`engine`] (spec.md §4.C5 "Root
    /// zone").
    pub(crate) fn new_root() -> Zone {
        let delegate = Delegate::new(None, None);
        let zone = Zone {
            inner: Rc::new(ZoneInner {
                parent: None,
                name: "<root>".to_string(),
                properties: HashMap::new(),
                delegate,
            }),
        };
        zone.inner.delegate.bind_owner(zone.clone());
        zone
    }

    /// The default fork action (spec.md §4.C3 table: `onFork` absent ⇒
    /// `new Zone(target, spec)`), also used directly by [`Delegate::fork`].
    pub(crate) fn new_child(target: &Zone, spec: Rc<ZoneSpec>) -> Zone {
        let delegate = Delegate::new(Some(&spec), Some(&target.inner.delegate));
        let zone = Zone {
            inner: Rc::new(ZoneInner {
                parent: Some(target.clone()),
                name: spec.name.clone(),
                properties: spec.properties.clone(),
                delegate,
            }),
        };
        zone.inner.delegate.bind_owner(zone.clone());
        zone
    }

    /// The currently active zone — the top of the process-wide (here:
    /// thread-local, see DESIGN.md) zone-frame stack, or [`Zone::root`] if
    /// the stack is empty.
    pub fn current() -> Zone {
        engine::current_zone()
    }

    /// The task presently being run via [`Zone::run_task`], if any.
    pub fn current_task() -> Option<Rc<Task>> {
        engine::current_task()
    }

    /// The singleton root zone.
    pub fn root() -> Zone {
        engine::root_zone()
    }

    pub fn parent(&self) -> Option<Zone> {
        self.inner.parent.clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub(crate) fn delegate(&self) -> &Rc<Delegate> {
        &self.inner.delegate
    }

    /// Is `self` a proper descendant of `ancestor` (walking `parent`)?
    fn is_descendant_of(&self, ancestor: &Zone) -> bool {
        let mut cur = self.inner.parent.clone();
        while let Some(z) = cur {
            if z == *ancestor {
                return true;
            }
            cur = z.inner.parent.clone();
        }
        false
    }

    /// Returns the chain of every delegate that must have its counters
    /// amplified for a task owned by `self`: itself alone, unless some
    /// ancestor-or-self delegate registers `onHasTask`, in which case every
    /// delegate between `self` and (inclusive) the nearest such registering
    /// delegate (see DESIGN.md, "zoneDelegates population").
    pub(crate) fn task_delegate_chain(&self) -> Vec<Rc<Delegate>> {
        match self.inner.delegate.has_task_owner() {
            None => vec![self.inner.delegate.clone()],
            Some(owner) => {
                let mut chain = Vec::new();
                let mut cur = Some(self.clone());
                while let Some(z) = cur {
                    chain.push(z.inner.delegate.clone());
                    if Rc::ptr_eq(&z.inner.delegate, &owner) {
                        break;
                    }
                    cur = z.inner.parent.clone();
                }
                chain
            }
        }
    }

    /// `Z.get(K) === Z.getZoneWith(K)?.properties[K]` (spec.md §8 invariant
    /// 1) — walks from `self` to the root, returning the first defined
    /// value.
    pub fn get(&self, key: &str) -> Option<Rc<dyn Any>> {
        let mut cur = Some(self.clone());
        while let Some(z) = cur {
            if let Some(v) = z.inner.properties.get(key) {
                return Some(v.clone());
            }
            cur = z.inner.parent.clone();
        }
        None
    }

    /// The zone owning `key`, or none if no ancestor-or-self defines it.
    pub fn get_zone_with(&self, key: &str) -> Option<Zone> {
        let mut cur = Some(self.clone());
        while let Some(z) = cur {
            if z.inner.properties.contains_key(key) {
                return Some(z);
            }
            cur = z.inner.parent.clone();
        }
        None
    }

    /// Forks a child zone via the `onFork` delegate chain (spec.md §4.C4).
    pub fn fork(&self, spec: Rc<ZoneSpec>) -> Zone {
        self.inner.delegate.fork(self, &spec)
    }

    /// Pushes a frame whose zone is `self`, guaranteed popped on every exit
    /// path including a panic unwind (spec.md §3 "Zone-frame stack";
    /// §5 "Current-zone stack invariant"). Also brackets the call in a
    /// nested-task frame so a trailing microtask drain happens once the zone
    /// frame has popped, the same as [`task::invoke_task`](crate::task)'s
    /// entry point — `run`/`run_guarded`/`wrap` are every bit as much a host
    /// turn boundary as a task invocation (spec.md §8 scenario S1).
    fn run_erased(&self, cb: ErasedFn, src: &str) -> AnyResult {
        let _task_frame = engine::NestedTaskFrame::enter();
        let _frame = engine::FrameGuard::push(self.clone());
        self.inner.delegate.invoke(self, cb, src)
    }

    /// `run(cb, this?, args?, src?)` (spec.md §4.C4): push a frame, invoke
    /// via the `onInvoke` chain, pop on any exit, return the callback's
    /// value. Errors propagate unchanged — the caller's own error, not
    /// wrapped in [`ZoneError`], since `run` performs no arbitration of its
    /// own (that is `run_guarded`'s job).
    pub fn run<T: 'static>(
        &self,
        src: &str,
        cb: impl FnOnce() -> Result<T, ZoneCallbackError> + 'static,
    ) -> Result<T, ZoneCallbackError> {
        let erased: ErasedFn = Box::new(move || cb().map(|v| Box::new(v) as Box<dyn Any>));
        let boxed = self.run_erased(erased, src)?;
        Ok(*boxed
            .downcast::<T>()
            .unwrap_or_else(|_| fatal!("zone `{}` run: callback result type mismatch", self.inner.name)))
    }

    /// As [`Zone::run`], but catches a propagated error and routes it
    /// through the `handle_error` chain: `true` rethrows as
    /// [`ZoneError::Callback`], `false` suppresses (the call then yields
    /// `Ok(None)`, spec.md §8 scenario S5).
    pub fn run_guarded<T: 'static>(
        &self,
        src: &str,
        cb: impl FnOnce() -> Result<T, ZoneCallbackError> + 'static,
    ) -> Result<Option<T>, ZoneError> {
        match self.run(src, cb) {
            Ok(v) => Ok(Some(v)),
            Err(err) => {
                if self.inner.delegate.handle_error(self, &err) {
                    Err(ZoneError::Callback(err))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Wraps `cb` so that invoking the returned closure enters this zone via
    /// [`Zone::run_guarded`] and calls the intercepted callback (spec.md
    /// §4.C4 "wrap"). The intercept chain is recomputed on every invocation
    /// rather than cached once at wrap-time — see DESIGN.md for why; it is
    /// behaviorally identical for the stateless intercept hooks this crate
    /// supports.
    pub fn wrap<T: 'static>(
        &self,
        src: &str,
        cb: impl Fn() -> Result<T, ZoneCallbackError> + 'static,
    ) -> impl Fn() -> Result<Option<T>, ZoneError> {
        let zone = self.clone();
        let cb = Rc::new(cb);
        let src = src.to_string();
        move || {
            let cb = cb.clone();
            let run_src = src.clone();
            let invoke_src = src.clone();
            let erased: ErasedFn = Box::new(move || cb().map(|v| Box::new(v) as Box<dyn Any>));
            let intercepted = zone.inner.delegate.intercept(&zone, erased, &src);
            let zone2 = zone.clone();
            zone.run_guarded(&run_src, move || -> Result<T, ZoneCallbackError> {
                let boxed = zone2.inner.delegate.invoke(&zone2, intercepted, &invoke_src)?;
                Ok(*boxed
                    .downcast::<T>()
                    .unwrap_or_else(|_| fatal!("zone `{}` wrap: callback result type mismatch", zone2.inner.name)))
            })
        }
    }

    /// `scheduleTask` (spec.md §4.C4). Preconditions and the five-step
    /// protocol are implemented exactly as described there. Rejects iff
    /// `self` is a proper descendant of the task's current owning zone
    /// (spec.md §8 invariant 5 / scenario S3) — rescheduling a task further
    /// down its own subtree is the illegal direction, rescheduling it up
    /// toward an ancestor or into an unrelated zone is fine.
    pub fn schedule_task(&self, task: Rc<Task>) -> Result<Rc<Task>, ZoneError> {
        if let Some(owner) = task.zone()
            && self.is_descendant_of(&owner)
        {
            fatal!(
                "can not reschedule task `{}` into zone `{}`: its owning zone `{}` is an ancestor",
                task.source(),
                self.inner.name,
                owner.inner.name
            );
        }

        task.transition_to(TaskState::Scheduling, TaskState::NotScheduled, None);
        task.set_zone(Some(self.clone()));
        *task.zone_delegates.borrow_mut() = Vec::new();

        let result = self.inner.delegate.schedule_task(self, task.clone());
        let returned = match result {
            Ok(t) => t,
            Err(err) => {
                // Scheduling failed: per spec.md §7 the task becomes
                // `unknown`, the error is routed through `handle_error`,
                // then rethrown to the caller.
                force_transition_unknown(&task);
                self.inner.delegate.handle_error(self, &err);
                return Err(ZoneError::ScheduleFailed { task: task.source().to_string(), source: err });
            }
        };

        if Rc::ptr_eq(&returned, &task) && returned.zone_delegates.borrow().is_empty() {
            let chain = self.task_delegate_chain();
            for delegate in &chain {
                delegate.update_task_count(returned.kind(), 1);
            }
            *returned.zone_delegates.borrow_mut() = chain;
        }

        if returned.state() == TaskState::Scheduling {
            returned.transition_to(TaskState::Scheduled, TaskState::Scheduling, None);
        }
        Ok(returned)
    }

    fn schedule_new_task<F, S, C>(
        &self,
        kind: TaskKind,
        source: impl Into<String>,
        callback: F,
        data: TaskData,
        schedule_fn: Option<S>,
        cancel_fn: Option<C>,
        use_shared_dispatch: bool,
    ) -> Result<Rc<Task>, ZoneError>
    where
        F: Fn() -> Result<(), ZoneCallbackError> + 'static,
        S: Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
        C: Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
    {
        let task = Task::new(kind, source, callback, data, schedule_fn, cancel_fn, use_shared_dispatch);
        self.schedule_task(task)
    }

    /// `scheduleMicroTask` (spec.md §4.C4): constructs a fresh non-cancelable
    /// task and schedules it.
    pub fn schedule_micro_task(
        &self,
        source: impl Into<String>,
        callback: impl Fn() -> Result<(), ZoneCallbackError> + 'static,
    ) -> Result<Rc<Task>, ZoneError> {
        self.schedule_new_task(
            TaskKind::MicroTask,
            source,
            callback,
            TaskData::default(),
            None::<fn(&Rc<Task>) -> Result<(), ZoneCallbackError>>,
            None::<fn(&Rc<Task>) -> Result<(), ZoneCallbackError>>,
            false,
        )
    }

    /// `scheduleMacroTask` (spec.md §4.C4).
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_macro_task(
        &self,
        source: impl Into<String>,
        callback: impl Fn() -> Result<(), ZoneCallbackError> + 'static,
        data: TaskData,
        schedule_fn: impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
        cancel_fn: impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
    ) -> Result<Rc<Task>, ZoneError> {
        self.schedule_new_task(
            TaskKind::MacroTask,
            source,
            callback,
            data,
            Some(schedule_fn),
            Some(cancel_fn),
            false,
        )
    }

    /// `scheduleEventTask` (spec.md §4.C4).
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_event_task(
        &self,
        source: impl Into<String>,
        callback: impl Fn() -> Result<(), ZoneCallbackError> + 'static,
        data: TaskData,
        schedule_fn: impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
        cancel_fn: impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static,
        use_shared_dispatch: bool,
    ) -> Result<Rc<Task>, ZoneError> {
        self.schedule_new_task(
            TaskKind::EventTask,
            source,
            callback,
            data,
            Some(schedule_fn),
            Some(cancel_fn),
            use_shared_dispatch,
        )
    }

    /// `runTask` (spec.md §4.C4). Also a host turn boundary in its own
    /// right (a direct `run_task` call, not routed through
    /// [`task::invoke_task`](crate::task)): brackets the invocation in a
    /// nested-task frame so microtasks enqueued by the task's callback still
    /// drain before this call returns (spec.md §8 scenario S1's guarantee
    /// applies here too).
    pub fn run_task(&self, task: &Rc<Task>) -> Result<(), ZoneError> {
        match task.zone() {
            Some(z) if z == *self => {}
            _ => fatal!(
                "task `{}` can only be run in the zone of creation `{}`",
                task.source(),
                self.inner.name
            ),
        }

        if task.state() == TaskState::NotScheduled && task.kind() == TaskKind::EventTask {
            // Race: the listener fired after it was cancelled. No-op.
            return Ok(());
        }

        let reentry = task.state() != TaskState::Running;
        if reentry {
            task.transition_to(TaskState::Running, TaskState::Scheduled, None);
        }

        let _task_frame = engine::NestedTaskFrame::enter();
        task.increment_run_count();
        let _task_guard = engine::CurrentTaskGuard::push(task.clone());
        let _frame = engine::FrameGuard::push(self.clone());

        task.clear_cancel_fn_if_one_shot_macro();

        let result = self.inner.delegate.invoke_task(self, task.clone());
        let result = match result {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.inner.delegate.handle_error(self, &err) {
                    Err(ZoneError::Callback(err))
                } else {
                    Ok(())
                }
            }
        };

        let state = task.state();
        if state != TaskState::NotScheduled && state != TaskState::Unknown {
            let periodic_or_event =
                task.kind() == TaskKind::EventTask || (task.kind() == TaskKind::MacroTask && task.data.borrow().is_periodic);
            if periodic_or_event {
                if reentry {
                    task.transition_to(TaskState::Scheduled, TaskState::Running, None);
                }
            } else {
                task.reset_run_count();
                let chain = std::mem::take(&mut *task.zone_delegates.borrow_mut());
                for delegate in &chain {
                    delegate.update_task_count(task.kind(), -1);
                }
                task.transition_to(TaskState::NotScheduled, TaskState::Running, Some(TaskState::NotScheduled));
            }
        }

        result
    }

    /// `cancelTask` (spec.md §4.C4).
    pub fn cancel_task(&self, task: &Rc<Task>) -> Result<(), ZoneError> {
        match task.zone() {
            Some(z) if z == *self => {}
            _ => fatal!(
                "task `{}` can only be cancelled in the zone of creation `{}`",
                task.source(),
                self.inner.name
            ),
        }

        task.transition_to(TaskState::Canceling, TaskState::Scheduled, Some(TaskState::Running));

        match self.inner.delegate.cancel_task(self, task.clone()) {
            Ok(()) => {
                let chain = std::mem::take(&mut *task.zone_delegates.borrow_mut());
                for delegate in &chain {
                    delegate.update_task_count(task.kind(), -1);
                }
                task.reset_run_count();
                task.transition_to(TaskState::NotScheduled, TaskState::Canceling, None);
                Ok(())
            }
            Err(err) => {
                force_transition_unknown(task);
                self.inner.delegate.handle_error(self, &err);
                Err(ZoneError::CancelFailed { task: task.source().to_string(), source: err })
            }
        }
    }
}

/// `_transitionTo` has no "from any state" arm, so a forced move to
/// `Unknown` on a hook error goes through a dedicated helper rather than
/// `transition_to`, which would otherwise need to accept every possible
/// current state as legal (spec.md §7 "Scheduling / cancellation error
/// inside a hook").
fn force_transition_unknown(task: &Rc<Task>) {
    task.force_state_unknown();
}
