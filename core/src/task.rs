//! The [`Task`] state machine (spec.md §4.C2 / §3 "Task").

use crate::delegate::Delegate;
use crate::errors::{ZoneCallbackError, ZoneError};
use crate::fatal;
use crate::zone::Zone;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use uuid::Uuid;

/// The three task kinds spec.md §3 distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    MicroTask,
    MacroTask,
    EventTask,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::MicroTask => "microTask",
            TaskKind::MacroTask => "macroTask",
            TaskKind::EventTask => "eventTask",
        };
        f.write_str(s)
    }
}

/// The six states of the task lifecycle (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    NotScheduled,
    Scheduling,
    Scheduled,
    Running,
    Canceling,
    Unknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::NotScheduled => "notScheduled",
            TaskState::Scheduling => "scheduling",
            TaskState::Scheduled => "scheduled",
            TaskState::Running => "running",
            TaskState::Canceling => "canceling",
            TaskState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The opaque data bag a task carries, typed rather than dynamic (spec.md §3
/// describes it as "an optional opaque bag that may carry `isPeriodic`,
/// `delay`, `handleId`" — there are no other fields any part of this crate
/// ever reads or writes, so a typed struct is the faithful, idiomatic
/// rendering rather than a `HashMap<String, Box<dyn Any>>`).
#[derive(Clone, Debug, Default)]
pub struct TaskData {
    pub is_periodic: bool,
    pub delay: Option<Duration>,
    pub handle_id: Option<String>,
}

/// The host-facing handle for invoking a task (spec.md §4.C2, "`invoke`
/// thunk"). Two shapes, chosen at construction, mirroring the spec's
/// `useG` open question: [`InvokeHandle::Shared`] asks the host to dispatch
/// through [`dispatch_shared`] passing the task explicitly (the
/// allocation-avoiding shape the spec reserves for event listeners),
/// [`InvokeHandle::Bound`] is a closure that already captured the task.
#[derive(Clone)]
pub enum InvokeHandle {
    Shared,
    Bound(Rc<dyn Fn() -> Result<(), ZoneError>>),
}

/// Whether a task was constructed to use the shared dispatch shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventDispatchShape {
    PerTask,
    Shared,
}

type TaskCallback = Rc<dyn Fn() -> Result<(), ZoneCallbackError>>;
type TaskHookFn = Rc<dyn Fn(&Rc<Task>) -> Result<(), ZoneCallbackError>>;

/// A first-class handle for a deferred unit of work (spec.md §3 / §4.C2).
///
/// Cheaply cloned (`Rc`-backed); the state, owning zone, run count and
/// delegate list all live behind interior mutability since every legal
/// mutation happens synchronously from the single event-loop thread that
/// owns the whole zone tree (see spec.md §5 "Shared-resource policy").
pub struct Task {
    id: Uuid,
    pub(crate) kind: TaskKind,
    pub(crate) source: String,
    callback: TaskCallback,
    pub data: RefCell<TaskData>,
    schedule_fn: Option<TaskHookFn>,
    cancel_fn: RefCell<Option<TaskHookFn>>,
    state: Cell<TaskState>,
    zone: RefCell<Option<Zone>>,
    run_count: Cell<u64>,
    pub(crate) zone_delegates: RefCell<Vec<Rc<Delegate>>>,
    dispatch_shape: EventDispatchShape,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("state", &self.state.get())
            .field("run_count", &self.run_count.get())
            .finish()
    }
}

impl Task {
    /// A process-wide unique identity, independent of `source` (which is a
    /// human-readable debug label, not guaranteed unique). Used in tracing
    /// fields so two same-named tasks remain distinguishable in a log.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Constructs a task (spec.md §4.C2 "Construction").
    ///
    /// `use_shared_dispatch` mirrors `data.useG`: only meaningful for
    /// [`TaskKind::EventTask`], it picks [`InvokeHandle::Shared`] over a
    /// per-task bound closure.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TaskKind,
        source: impl Into<String>,
        callback: impl Fn() -> Result<(), ZoneCallbackError> + 'static,
        data: TaskData,
        schedule_fn: Option<impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static>,
        cancel_fn: Option<impl Fn(&Rc<Task>) -> Result<(), ZoneCallbackError> + 'static>,
        use_shared_dispatch: bool,
    ) -> Rc<Self> {
        let dispatch_shape = if kind == TaskKind::EventTask && use_shared_dispatch {
            EventDispatchShape::Shared
        } else {
            EventDispatchShape::PerTask
        };
        Rc::new(Task {
            id: Uuid::new_v4(),
            kind,
            source: source.into(),
            callback: Rc::new(callback),
            data: RefCell::new(data),
            schedule_fn: schedule_fn.map(|f| Rc::new(f) as TaskHookFn),
            cancel_fn: RefCell::new(cancel_fn.map(|f| Rc::new(f) as TaskHookFn)),
            state: Cell::new(TaskState::NotScheduled),
            zone: RefCell::new(None),
            run_count: Cell::new(0),
            zone_delegates: RefCell::new(Vec::new()),
            dispatch_shape,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> TaskState {
        self.state.get()
    }

    pub fn run_count(&self) -> u64 {
        self.run_count.get()
    }

    pub fn zone(&self) -> Option<Zone> {
        self.zone.borrow().clone()
    }

    pub(crate) fn invoke_callback(&self) -> Result<(), ZoneCallbackError> {
        (self.callback)()
    }

    pub(crate) fn has_schedule_fn(&self) -> bool {
        self.schedule_fn.is_some()
    }

    pub(crate) fn call_schedule_fn(self: &Rc<Self>) -> Result<(), ZoneCallbackError> {
        match &self.schedule_fn {
            Some(f) => f(self),
            None => fatal!("task `{}` has no scheduleFn to perform its default scheduling", self.source),
        }
    }

    pub(crate) fn call_cancel_fn(self: &Rc<Self>) -> Result<(), ZoneCallbackError> {
        match self.cancel_fn.borrow().clone() {
            Some(f) => f(self),
            None => fatal!("task `{}` is not cancelable (no cancelFn)", self.source),
        }
    }

    /// A non-periodic macro task clears its `cancelFn` the moment it starts
    /// running: a one-shot timer can no longer be cancelled mid-run
    /// (spec.md §4.C4 "runTask").
    pub(crate) fn clear_cancel_fn_if_one_shot_macro(&self) {
        if self.kind == TaskKind::MacroTask && !self.data.borrow().is_periodic {
            *self.cancel_fn.borrow_mut() = None;
        }
    }

    pub(crate) fn set_zone(&self, zone: Option<Zone>) {
        *self.zone.borrow_mut() = zone;
    }

    pub(crate) fn increment_run_count(&self) {
        self.run_count.set(self.run_count.get() + 1);
    }

    pub(crate) fn reset_run_count(&self) {
        self.run_count.set(0);
    }

    /// Enforces the legal-transition table (spec.md §3): fatal if the
    /// current state matches neither `from1` nor the optional `from2`.
    pub(crate) fn transition_to(&self, to: TaskState, from1: TaskState, from2: Option<TaskState>) {
        let current = self.state.get();
        if current != from1 && Some(current) != from2 {
            let expected = match from2 {
                Some(f2) => format!("'{from1}' or '{f2}'"),
                None => format!("'{from1}'"),
            };
            fatal!(
                "can not transition task `{}` ({}) to '{to}', expecting state {expected} but was '{current}'",
                self.source,
                self.id
            );
        }
        tracing::trace!(task = %self.id, source = %self.source, %to, "task state transition");
        self.state.set(to);
    }

    /// Legal only in state `Scheduling`; lets an `onScheduleTask` hook
    /// reject a scheduling attempt without leaving the task in `Unknown`.
    pub fn cancel_schedule_request(&self) {
        self.transition_to(TaskState::NotScheduled, TaskState::Scheduling, None);
    }

    /// Forces the task into `Unknown` regardless of its current state
    /// (spec.md §7: "any scheduling-or-canceling error → unknown"). Bypasses
    /// [`Task::transition_to`]'s legality check since this transition is
    /// legal from any state the task could be in when a hook throws.
    pub(crate) fn force_state_unknown(&self) {
        self.state.set(TaskState::Unknown);
    }

    /// The host-facing dispatch handle (spec.md §4.C2's `invoke` thunk).
    pub fn invoke_handle(self: &Rc<Self>) -> InvokeHandle {
        match self.dispatch_shape {
            EventDispatchShape::Shared => InvokeHandle::Shared,
            EventDispatchShape::PerTask => {
                let task = self.clone();
                InvokeHandle::Bound(Rc::new(move || invoke_task(&task)))
            }
        }
    }
}

/// The static entry-point every invocation of a task funnels through
/// (spec.md §4.C2 "Static entry-point `invokeTask`"), regardless of which
/// [`InvokeHandle`] shape the host used to reach it.
pub fn dispatch_shared(task: &Rc<Task>) -> Result<(), ZoneError> {
    invoke_task(task)
}

pub(crate) fn invoke_task(task: &Rc<Task>) -> Result<(), ZoneError> {
    // The nested-task-frame counter brackets the whole call so the trailing
    // microtask drain (spec.md §4.C5) sees everything this task enqueues,
    // including transitively through `zone.run_task`, before the host
    // regains control. `runCount` itself is bumped once, inside
    // `zone.run_task` (spec.md §4.C4), not here — `invokeTask` only hands
    // off to it.
    let _frame = crate::engine::NestedTaskFrame::enter();
    let zone = task
        .zone()
        .unwrap_or_else(|| fatal!("task `{}` invoked before being scheduled into a zone", task.source));
    zone.run_task(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_task(kind: TaskKind) -> Rc<Task> {
        Task::new(
            kind,
            "t",
            || Ok(()),
            TaskData::default(),
            None::<fn(&Rc<Task>) -> Result<(), ZoneCallbackError>>,
            None::<fn(&Rc<Task>) -> Result<(), ZoneCallbackError>>,
            false,
        )
    }

    #[test]
    fn fresh_task_starts_not_scheduled_with_zero_run_count() {
        let task = noop_task(TaskKind::MicroTask);
        assert_eq!(task.state(), TaskState::NotScheduled);
        assert_eq!(task.run_count(), 0);
        assert!(task.zone().is_none());
    }

    #[test]
    fn distinct_tasks_get_distinct_ids() {
        let a = noop_task(TaskKind::MicroTask);
        let b = noop_task(TaskKind::MicroTask);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn cancel_schedule_request_only_legal_while_scheduling() {
        let task = noop_task(TaskKind::MacroTask);
        task.transition_to(TaskState::Scheduling, TaskState::NotScheduled, None);
        task.cancel_schedule_request();
        assert_eq!(task.state(), TaskState::NotScheduled);
    }

    #[test]
    #[should_panic(expected = "can not transition")]
    fn illegal_transition_reports_task_and_states() {
        let task = noop_task(TaskKind::MacroTask);
        // Task is freshly constructed, hence `NotScheduled` — asserting it
        // is already `Running` is illegal from every legal predecessor.
        task.transition_to(TaskState::Scheduled, TaskState::Running, None);
    }
}
