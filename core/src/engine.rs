//! The microtask engine and bootstrap (spec.md §4.C5).
//!
//! All of the "process-wide mutable state" spec.md describes — the
//! zone-frame stack, the current task, the nested-task-frame counter, the
//! microtask queue, the draining flag and the patch registry — lives here as
//! `thread_local!` state (see DESIGN.md, Open Question "process-wide state
//! → thread-local state"): this crate's event loop is a single OS thread, so
//! `thread_local!` is the precise, safe translation of spec.md §5's
//! "single-threaded cooperative... no locking" model.

use crate::errors::ZoneCallbackError;
use crate::fatal;
use crate::task::Task;
use crate::zone::Zone;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

type UnhandledErrorHook = Rc<dyn Fn(&ZoneCallbackError)>;
type DrainDoneHook = Rc<dyn Fn()>;
/// The "host-provided deferred-resolution primitive" (spec.md §4.C5): a
/// closure that arranges for `resume` to be called at the trailing edge of
/// the current host turn — modeled on borrowing a resolved promise's
/// original `then` or, failing that, a zero-delay timer. Registered by a
/// patch via [`crate::patch::PrivateApi::set_native_promise`].
pub type NativeMicrotaskTrigger = Rc<dyn Fn(Rc<dyn Fn()>)>;

struct EngineState {
    frame_stack: RefCell<Vec<Zone>>,
    current_task: RefCell<Option<Rc<Task>>>,
    nested_depth: Cell<u32>,
    queue: RefCell<VecDeque<Rc<Task>>>,
    draining: Cell<bool>,
    native_trigger: RefCell<Option<NativeMicrotaskTrigger>>,
    on_unhandled_error: RefCell<Option<UnhandledErrorHook>>,
    microtask_drain_done: RefCell<Option<DrainDoneHook>>,
    bootstrapped: Cell<bool>,
}

impl EngineState {
    fn new() -> Self {
        EngineState {
            frame_stack: RefCell::new(Vec::new()),
            current_task: RefCell::new(None),
            nested_depth: Cell::new(0),
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
            native_trigger: RefCell::new(None),
            on_unhandled_error: RefCell::new(None),
            microtask_drain_done: RefCell::new(None),
            bootstrapped: Cell::new(false),
        }
    }
}

thread_local! {
    static STATE: EngineState = EngineState::new();
    static ROOT: Zone = Zone::new_root();
}

/// The singleton root zone, constructed eagerly on first access (spec.md
/// §4.C5 "Root zone").
pub fn root_zone() -> Zone {
    ROOT.with(|z| z.clone())
}

/// The top of the zone-frame stack, or [`root_zone`] if empty (spec.md §3
/// "Zone-frame stack": "the bottom frame always references the root zone").
pub fn current_zone() -> Zone {
    STATE.with(|s| s.frame_stack.borrow().last().cloned()).unwrap_or_else(root_zone)
}

pub fn current_task() -> Option<Rc<Task>> {
    STATE.with(|s| s.current_task.borrow().clone())
}

/// RAII guard for the zone-frame stack: pushes on construction, pops on
/// drop — unconditionally, including during a panic unwind, which is how
/// this crate satisfies spec.md §5's "Current-zone stack invariant"
/// without a manual try/finally.
pub(crate) struct FrameGuard;

impl FrameGuard {
    pub(crate) fn push(zone: Zone) -> Self {
        STATE.with(|s| s.frame_stack.borrow_mut().push(zone));
        FrameGuard
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STATE.with(|s| {
            s.frame_stack
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| fatal!("zone-frame stack underflow on pop"));
        });
    }
}

/// RAII guard for the current-task pointer (spec.md §3 "Current task":
/// "saved and restored stack-discipline around each `runTask`").
pub(crate) struct CurrentTaskGuard {
    previous: Option<Rc<Task>>,
}

impl CurrentTaskGuard {
    pub(crate) fn push(task: Rc<Task>) -> Self {
        let previous = STATE.with(|s| s.current_task.replace(Some(task)));
        CurrentTaskGuard { previous }
    }
}

impl Drop for CurrentTaskGuard {
    fn drop(&mut self) {
        STATE.with(|s| *s.current_task.borrow_mut() = self.previous.take());
    }
}

/// RAII guard for the nested-task-frame counter (spec.md §4.C2 "Static
/// entry-point `invokeTask`"): increments on entry; on exit, if the counter
/// is about to return to zero, drains the microtask queue *before*
/// decrementing — so the drain happens while still "inside" the outermost
/// task, guaranteeing it completes before the host regains control. Every
/// host turn boundary brackets itself with one of these, not only
/// `invokeTask`'s entry point: `Zone::run`/`run_guarded`/`wrap` (via
/// `run_erased`) and `Zone::run_task` each enter one too, so a trailing
/// drain fires on the outermost of any of them, nested arbitrarily.
pub struct NestedTaskFrame(());

impl NestedTaskFrame {
    pub fn enter() -> Self {
        STATE.with(|s| s.nested_depth.set(s.nested_depth.get() + 1));
        NestedTaskFrame(())
    }
}

impl Drop for NestedTaskFrame {
    fn drop(&mut self) {
        let was_outermost = STATE.with(|s| s.nested_depth.get() == 1);
        if was_outermost {
            drain_microtask_queue();
        }
        STATE.with(|s| s.nested_depth.set(s.nested_depth.get() - 1));
    }
}

fn nested_depth() -> u32 {
    STATE.with(|s| s.nested_depth.get())
}

/// `scheduleMicroTask(task?)` (spec.md §4.C5). Enqueues first, then arms the
/// native trigger only when nothing will otherwise drain the queue (nested
/// depth zero *and* the queue was empty before this call) — arming must
/// happen after the push, since the no-native-trigger fallback drains
/// inline and would otherwise find nothing to run. At most one drain is
/// ever armed at a time, by construction.
pub(crate) fn enqueue_microtask(task: Rc<Task>) {
    let should_arm = nested_depth() == 0 && STATE.with(|s| s.queue.borrow().is_empty());
    STATE.with(|s| s.queue.borrow_mut().push_back(task));
    if should_arm {
        arm_microtask_trigger();
    }
}

fn arm_microtask_trigger() {
    let trigger = STATE.with(|s| s.native_trigger.borrow().clone());
    match trigger {
        Some(trigger) => trigger(Rc::new(drain_microtask_queue)),
        None => {
            // No host trigger registered (no patch loaded a resolved-promise
            // `then` or zero-delay timer). There is no host event loop of
            // its own for this core to wait on, so the only faithful
            // fallback is to drain immediately — equivalent to a zero-delay
            // timer firing on a host with nothing else queued ahead of it.
            tracing::trace!("no native microtask trigger registered; draining inline");
            drain_microtask_queue();
        }
    }
}

/// `drainMicroTaskQueue()` (spec.md §4.C5). Guarded against nested
/// recursion; swaps the queue with a fresh empty one each pass so
/// microtasks enqueued *during* drain are honored, in FIFO order, on a
/// later pass of the outer loop.
pub(crate) fn drain_microtask_queue() {
    let already_draining = STATE.with(|s| {
        if s.draining.get() {
            true
        } else {
            s.draining.set(true);
            false
        }
    });
    if already_draining {
        return;
    }

    loop {
        let batch: Vec<Rc<Task>> = STATE.with(|s| std::mem::take(&mut *s.queue.borrow_mut()).into_iter().collect());
        if batch.is_empty() {
            break;
        }
        for task in batch {
            if let Some(zone) = task.zone()
                && let Err(err) = zone.run_task(&task)
            {
                dispatch_unhandled_error(&(Rc::new(err) as ZoneCallbackError));
            }
        }
    }

    let drain_done = STATE.with(|s| s.microtask_drain_done.borrow().clone());
    if let Some(hook) = drain_done {
        hook();
    }
    STATE.with(|s| s.draining.set(false));
}

fn dispatch_unhandled_error(err: &ZoneCallbackError) {
    let hook = STATE.with(|s| s.on_unhandled_error.borrow().clone());
    match hook {
        Some(hook) => hook(err),
        None => tracing::error!(error = %err, "unhandled error during microtask drain"),
    }
}

pub fn set_on_unhandled_error(hook: impl Fn(&ZoneCallbackError) + 'static) {
    STATE.with(|s| *s.on_unhandled_error.borrow_mut() = Some(Rc::new(hook)));
}

pub fn set_microtask_drain_done(hook: impl Fn() + 'static) {
    STATE.with(|s| *s.microtask_drain_done.borrow_mut() = Some(Rc::new(hook)));
}

pub(crate) fn set_native_microtask_trigger(trigger: NativeMicrotaskTrigger) {
    STATE.with(|s| *s.native_trigger.borrow_mut() = Some(trigger));
}

pub(crate) fn clear_native_microtask_trigger() {
    STATE.with(|s| *s.native_trigger.borrow_mut() = None);
}

/// Explicit bootstrap entry point (spec.md §4.C5 "Singleton enforcement":
/// "Module load fails fatally if a zone singleton is already registered").
/// Rust has no module-load hook to key this off of, so `EngineHandle` is the
/// explicit stand-in spec.md §9 anticipates: call [`EngineHandle::bootstrap`]
/// exactly once at process start, before loading any patches.
pub struct EngineHandle(());

impl EngineHandle {
    pub fn bootstrap() -> Self {
        let already = STATE.with(|s| s.bootstrapped.replace(true));
        if already {
            fatal!("zonecore engine already bootstrapped: duplicate EngineHandle::bootstrap() call");
        }
        // Touch the root zone so it is constructed before any patch runs.
        let _ = root_zone();
        EngineHandle(())
    }

    pub fn root(&self) -> Zone {
        root_zone()
    }

    pub fn current(&self) -> Zone {
        current_zone()
    }
}

/// Forces a fresh thread-local engine so each `#[test]` in this crate gets
/// an isolated zone tree and microtask queue. Real code never calls this —
/// tests are the only place where rebuilding the ambient state mid-process
/// is correct, since thread_local state otherwise lives for the whole
/// thread.
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn test_reset() {
    STATE.with(|s| {
        s.frame_stack.borrow_mut().clear();
        *s.current_task.borrow_mut() = None;
        s.nested_depth.set(0);
        s.queue.borrow_mut().clear();
        s.draining.set(false);
        *s.native_trigger.borrow_mut() = None;
        *s.on_unhandled_error.borrow_mut() = None;
        *s.microtask_drain_done.borrow_mut() = None;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ZoneCallbackError;
    use crate::hooks::ZoneSpec;

    #[test]
    fn microtasks_drain_before_host_turn_ends() {
        test_reset();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let z = root_zone().fork(ZoneSpec::builder().name("z".to_string()).build());

        let log_a = log.clone();
        let log_b = log.clone();
        let log_sync = log.clone();
        let za = z.clone();
        let zb = z.clone();
        z.run("test", move || {
            za.schedule_micro_task("m1", move || {
                log_a.borrow_mut().push("a");
                Ok(())
            })
            .ok();
            zb.schedule_micro_task("m2", move || {
                log_b.borrow_mut().push("b");
                Ok(())
            })
            .ok();
            log_sync.borrow_mut().push("sync");
            Ok::<(), ZoneCallbackError>(())
        })
        .unwrap();

        assert_eq!(&*log.borrow(), &["sync", "a", "b"]);
    }
}
