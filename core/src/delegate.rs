//! The delegate chain (spec.md §4.C3) — the data structure that makes hook
//! dispatch O(1) regardless of tree depth by caching, at construction time,
//! the nearest ancestor zone-spec that defines each of the eight hooks.

use crate::errors::ZoneCallbackError;
use crate::fatal;
use crate::hooks::{
    AnyResult, ErasedFn, HasTaskState, HookCtx, OnCancelTaskHook, OnForkHook, OnHandleErrorHook,
    OnHasTaskHook, OnInterceptHook, OnInvokeHook, OnInvokeTaskHook, OnScheduleTaskHook, ZoneSpec,
};
use crate::task::{Task, TaskKind};
use crate::zone::Zone;
use std::cell::{Cell, OnceCell, RefCell};
use std::rc::Rc;

/// `(specH, delegateH, currZoneH)` from spec.md §3 — the resolved hook plus
/// enough context to continue the chain. `curr_zone` is a shared,
/// lazily-filled cell rather than a plain `Zone` because a triple defined
/// by the zone currently under construction needs to reference that zone
/// before its own `Rc` exists; see [`Delegate::bind_owner`].
#[derive(Clone)]
struct HookTriple<H> {
    spec_hook: H,
    parent: Option<Rc<Delegate>>,
    curr_zone: Rc<OnceCell<Zone>>,
}

impl<H> HookTriple<H> {
    fn ctx(&self, target: &Zone) -> HookCtx {
        HookCtx {
            parent: self.parent.clone(),
            curr_zone: self
                .curr_zone
                .get()
                .cloned()
                .expect("delegate hook dispatched before its owner zone finished construction"),
            target: target.clone(),
        }
    }
}

#[derive(Default)]
struct TaskCounts {
    micro: Cell<i64>,
    macro_: Cell<i64>,
    event: Cell<i64>,
}

impl TaskCounts {
    fn cell(&self, kind: TaskKind) -> &Cell<i64> {
        match kind {
            TaskKind::MicroTask => &self.micro,
            TaskKind::MacroTask => &self.macro_,
            TaskKind::EventTask => &self.event,
        }
    }

    /// Applies `delta` to `kind`'s counter. Fatal if the result would be
    /// negative (spec.md §3 "Task-count invariant"). Returns whether the
    /// counter just crossed the 0↔1 boundary.
    fn update(&self, kind: TaskKind, delta: i64) -> bool {
        let cell = self.cell(kind);
        let prev = cell.get();
        let next = prev + delta;
        if next < 0 {
            fatal!("task count for `{kind}` went negative (from {prev} by {delta})");
        }
        cell.set(next);
        prev == 0 || next == 0
    }

    fn snapshot(&self) -> (bool, bool, bool) {
        (self.micro.get() > 0, self.macro_.get() > 0, self.event.get() > 0)
    }
}

/// The per-zone dispatch object (spec.md §4.C3). See module docs.
pub struct Delegate {
    owner_cell: Rc<OnceCell<Zone>>,
    on_fork: Option<HookTriple<OnForkHook>>,
    on_intercept: Option<HookTriple<OnInterceptHook>>,
    on_invoke: Option<HookTriple<OnInvokeHook>>,
    on_handle_error: Option<HookTriple<OnHandleErrorHook>>,
    on_schedule_task: Option<HookTriple<OnScheduleTaskHook>>,
    on_invoke_task: Option<HookTriple<OnInvokeTaskHook>>,
    on_cancel_task: Option<HookTriple<OnCancelTaskHook>>,
    on_has_task: Option<HookTriple<OnHasTaskHook>>,
    /// Set to a strong self-reference iff this delegate (or an ancestor it
    /// copied the triple from) registers `onHasTask` — spec.md §4.C3
    /// "hasTaskDelegateOwner".
    has_task_owner: RefCell<Option<Rc<Delegate>>>,
    counts: TaskCounts,
}

fn resolve_triple<H: Clone>(
    own: Option<H>,
    parent_triple: Option<&HookTriple<H>>,
    owner_cell: &Rc<OnceCell<Zone>>,
    parent_delegate: Option<&Rc<Delegate>>,
) -> Option<HookTriple<H>> {
    match own {
        Some(hook) => Some(HookTriple {
            spec_hook: hook,
            parent: parent_delegate.cloned(),
            curr_zone: owner_cell.clone(),
        }),
        None => parent_triple.cloned(),
    }
}

impl Delegate {
    /// Constructs the delegate for a zone about to be born. The zone's
    /// `Rc` doesn't exist yet (it's what's currently being built around
    /// this very delegate) — [`Delegate::bind_owner`] must be called once
    /// that `Rc` exists, before any dispatch happens.
    pub(crate) fn new(spec: Option<&Rc<ZoneSpec>>, parent: Option<&Rc<Delegate>>) -> Rc<Delegate> {
        let owner_cell: Rc<OnceCell<Zone>> = Rc::new(OnceCell::new());

        let on_fork = resolve_triple(
            spec.and_then(|s| s.on_fork.clone()),
            parent.and_then(|p| p.on_fork.as_ref()),
            &owner_cell,
            parent,
        );
        let on_intercept = resolve_triple(
            spec.and_then(|s| s.on_intercept.clone()),
            parent.and_then(|p| p.on_intercept.as_ref()),
            &owner_cell,
            parent,
        );
        let on_invoke = resolve_triple(
            spec.and_then(|s| s.on_invoke.clone()),
            parent.and_then(|p| p.on_invoke.as_ref()),
            &owner_cell,
            parent,
        );
        let on_handle_error = resolve_triple(
            spec.and_then(|s| s.on_handle_error.clone()),
            parent.and_then(|p| p.on_handle_error.as_ref()),
            &owner_cell,
            parent,
        );
        let on_schedule_task = resolve_triple(
            spec.and_then(|s| s.on_schedule_task.clone()),
            parent.and_then(|p| p.on_schedule_task.as_ref()),
            &owner_cell,
            parent,
        );
        let on_invoke_task = resolve_triple(
            spec.and_then(|s| s.on_invoke_task.clone()),
            parent.and_then(|p| p.on_invoke_task.as_ref()),
            &owner_cell,
            parent,
        );
        let on_cancel_task = resolve_triple(
            spec.and_then(|s| s.on_cancel_task.clone()),
            parent.and_then(|p| p.on_cancel_task.as_ref()),
            &owner_cell,
            parent,
        );
        let on_has_task = resolve_triple(
            spec.and_then(|s| s.on_has_task.clone()),
            parent.and_then(|p| p.on_has_task.as_ref()),
            &owner_cell,
            parent,
        );
        let has_task_active = on_has_task.is_some();

        let delegate = Rc::new(Delegate {
            owner_cell,
            on_fork,
            on_intercept,
            on_invoke,
            on_handle_error,
            on_schedule_task,
            on_invoke_task,
            on_cancel_task,
            on_has_task,
            has_task_owner: RefCell::new(None),
            counts: TaskCounts::default(),
        });
        if has_task_active {
            *delegate.has_task_owner.borrow_mut() = Some(delegate.clone());
        }
        delegate
    }

    /// Must be called exactly once, immediately after the `Zone` this
    /// delegate belongs to finishes construction.
    pub(crate) fn bind_owner(&self, owner: Zone) {
        self.owner_cell
            .set(owner)
            .unwrap_or_else(|_| fatal!("delegate owner bound twice"));
    }

    /// The nearest ancestor-or-self delegate that wants `hasTask`
    /// notifications for this subtree, if any (spec.md §4.C3).
    pub(crate) fn has_task_owner(&self) -> Option<Rc<Delegate>> {
        self.has_task_owner.borrow().clone()
    }

    pub fn fork(&self, target: &Zone, spec: &Rc<ZoneSpec>) -> Zone {
        match &self.on_fork {
            Some(t) => (t.spec_hook)(&t.ctx(target), spec),
            None => Zone::new_child(target, spec.clone()),
        }
    }

    pub fn intercept(&self, target: &Zone, cb: ErasedFn, src: &str) -> ErasedFn {
        match &self.on_intercept {
            Some(t) => (t.spec_hook)(&t.ctx(target), cb, src),
            None => cb,
        }
    }

    pub fn invoke(&self, target: &Zone, cb: ErasedFn, src: &str) -> AnyResult {
        match &self.on_invoke {
            Some(t) => (t.spec_hook)(&t.ctx(target), cb, src),
            None => cb(),
        }
    }

    pub fn handle_error(&self, target: &Zone, err: &ZoneCallbackError) -> bool {
        match &self.on_handle_error {
            Some(t) => (t.spec_hook)(&t.ctx(target), err),
            None => true,
        }
    }

    pub fn schedule_task(&self, target: &Zone, task: Rc<Task>) -> Result<Rc<Task>, ZoneCallbackError> {
        match &self.on_schedule_task {
            Some(t) => (t.spec_hook)(&t.ctx(target), task),
            None => {
                if task.has_schedule_fn() {
                    task.call_schedule_fn()?;
                    Ok(task)
                } else if task.kind() == TaskKind::MicroTask {
                    crate::engine::enqueue_microtask(task.clone());
                    Ok(task)
                } else {
                    fatal!("task `{}` is missing a scheduleFn", task.source());
                }
            }
        }
    }

    pub fn invoke_task(&self, target: &Zone, task: Rc<Task>) -> Result<(), ZoneCallbackError> {
        match &self.on_invoke_task {
            Some(t) => (t.spec_hook)(&t.ctx(target), task),
            None => task.invoke_callback(),
        }
    }

    pub fn cancel_task(&self, target: &Zone, task: Rc<Task>) -> Result<(), ZoneCallbackError> {
        match &self.on_cancel_task {
            Some(t) => (t.spec_hook)(&t.ctx(target), task),
            None => task.call_cancel_fn(),
        }
    }

    /// Errors from inside an `onHasTask` hook are caught here and routed
    /// through `handle_error`; they never propagate to the counter updater
    /// (spec.md §4.C3 / §7).
    fn has_task(&self, target: &Zone, state: HasTaskState) {
        if let Some(t) = &self.on_has_task
            && let Err(err) = (t.spec_hook)(&t.ctx(target), state)
        {
            self.handle_error(target, &err);
        }
    }

    /// Applies `delta` to this delegate's counter for `kind` and, if the
    /// counter just crossed the 0↔1 boundary, fires `hasTask` on this
    /// delegate's own owning zone with the full snapshot (spec.md §4.C3
    /// "Per-delegate task counter").
    pub(crate) fn update_task_count(self: &Rc<Self>, kind: TaskKind, delta: i64) {
        if !self.counts.update(kind, delta) {
            return;
        }
        let (micro_task, macro_task, event_task) = self.counts.snapshot();
        let owner = self
            .owner_cell
            .get()
            .cloned()
            .expect("update_task_count before delegate's owner zone was bound");
        self.has_task(
            &owner,
            HasTaskState {
                micro_task,
                macro_task,
                event_task,
                change: kind,
            },
        );
    }
}
