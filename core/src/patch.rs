//! The patch extension point (spec.md §6 "Patch extension point" /
//! "Private API") and a minimal reference patch.
//!
//! Monkey-patching real host APIs (timers, `Promise`, event targets, XHR...)
//! is explicitly out of scope for this crate (spec.md §1) — patches are
//! external collaborators the core only ever calls back into through the
//! functions on [`PrivateApi`]. What lives here is the registry
//! ([`load_patch`] / [`__load_patch`]) plus one demonstration patch
//! ([`timer`]) that exercises the extension point end to end without
//! implementing any actual host API.

use crate::engine;
use crate::errors::{ZoneCallbackError, ZoneError};
use crate::fatal;
use crate::symbol::{Symbol, symbol};
use crate::task::{Task, TaskData};
use crate::zone::Zone;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

thread_local! {
    static PATCHES: RefCell<HashMap<String, Rc<dyn Any>>> = RefCell::new(HashMap::new());
    static DISABLED: RefCell<HashSet<String>> = RefCell::new(HashSet::new());
    static IGNORE_CONSOLE_ERROR: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Setter for the host-global flag spec.md §6 names
/// `__zone_symbol__ignoreConsoleErrorUncaughtError`.
pub fn set_ignore_console_error_uncaught_error(flag: bool) {
    IGNORE_CONSOLE_ERROR.with(|c| c.set(flag));
}

fn ignore_console_error_uncaught_error() -> bool {
    IGNORE_CONSOLE_ERROR.with(|c| c.get())
}

/// The private API surface passed to every patch (spec.md §6). Every field
/// not explicitly listed as "settable" there is a read-only accessor into
/// this crate's internals; `patch_event_target`, `patch_on_properties`,
/// `patch_method` and `bind_arguments` are genuine no-op stand-ins for real
/// host-API monkey-patching (spec.md §1's explicit out-of-scope boundary) —
/// a real integration crate replaces them, this crate only defines the
/// shape.
#[derive(Clone)]
pub struct PrivateApi {
    symbol: Rc<dyn Fn(&str) -> Symbol>,
    schedule_micro_task: Rc<dyn Fn(Rc<Task>)>,
    current_zone_frame: Rc<dyn Fn() -> Zone>,
    show_uncaught_error: Rc<dyn Fn() -> bool>,
}

impl PrivateApi {
    fn new() -> Self {
        PrivateApi {
            symbol: Rc::new(|name: &str| symbol(name)),
            schedule_micro_task: Rc::new(engine::enqueue_microtask),
            current_zone_frame: Rc::new(Zone::current),
            show_uncaught_error: Rc::new(|| !ignore_console_error_uncaught_error()),
        }
    }

    pub fn symbol(&self, name: &str) -> Symbol {
        (self.symbol)(name)
    }

    pub fn schedule_micro_task(&self, task: Rc<Task>) {
        (self.schedule_micro_task)(task)
    }

    pub fn current_zone_frame(&self) -> Zone {
        (self.current_zone_frame)()
    }

    /// Settable (spec.md §6): the hook a patch overrides to route a task's
    /// uncaught error during microtask drain.
    pub fn on_unhandled_error(&self, hook: impl Fn(&ZoneCallbackError) + 'static) {
        engine::set_on_unhandled_error(hook);
    }

    /// Settable (spec.md §6): called once every microtask-drain pass
    /// completes.
    pub fn microtask_drain_done(&self, hook: impl Fn() + 'static) {
        engine::set_microtask_drain_done(hook);
    }

    /// Settable (spec.md §9 "Host async primitives"): registers the
    /// deferred-resolution primitive the microtask engine arms when it
    /// needs to guarantee a later drain.
    pub fn set_native_promise(&self, trigger: impl Fn(Rc<dyn Fn()>) + 'static) {
        engine::set_native_microtask_trigger(Rc::new(trigger));
    }

    pub fn clear_native_promise(&self) {
        engine::clear_native_microtask_trigger();
    }

    /// Consulted by `showUncaughtError` (spec.md §6's host-global flag
    /// `__zone_symbol__ignoreConsoleErrorUncaughtError`). A no-op stand-in:
    /// no console exists in this core, so it always reports "show".
    pub fn show_uncaught_error(&self) -> bool {
        (self.show_uncaught_error)()
    }

    /// No-op stand-in for host `EventTarget` monkey-patching (out of scope,
    /// spec.md §1).
    pub fn patch_event_target(&self) {}

    /// No-op stand-in for host `on<event>` property monkey-patching (out of
    /// scope, spec.md §1).
    pub fn patch_on_properties(&self) {}

    /// No-op stand-in for generic host-method monkey-patching (out of
    /// scope, spec.md §1).
    pub fn patch_method(&self) {}

    /// No-op stand-in for the argument-binding helper real event-target
    /// patches use to re-enter a zone (out of scope, spec.md §1).
    pub fn bind_arguments(&self) {}
}

fn private_api() -> PrivateApi {
    PrivateApi::new()
}

/// Host-global flag equivalent (spec.md §6: `__Zone_disable_<name>`).
/// Gates [`load_patch`] silently skipping a named patch.
pub fn disable_patch(name: impl Into<String>) {
    DISABLED.with(|d| {
        d.borrow_mut().insert(name.into());
    });
}

/// `__load_patch(name, fn)` (spec.md §6). Duplicate `name` is fatal. Gated
/// by [`disable_patch`]; `fn`'s return value is stashed under `patches[name]`.
pub fn load_patch<T: 'static>(name: impl Into<String>, f: impl FnOnce(&PrivateApi) -> T) {
    let name = name.into();
    if DISABLED.with(|d| d.borrow().contains(&name)) {
        tracing::trace!(patch = %name, "patch disabled, skipping");
        return;
    }
    let already_loaded = PATCHES.with(|p| p.borrow().contains_key(&name));
    if already_loaded {
        fatal!("patch `{name}` already loaded");
    }
    let result = f(&private_api());
    PATCHES.with(|p| {
        p.borrow_mut().insert(name.clone(), Rc::new(result));
    });
    tracing::trace!(patch = %name, "patch loaded");
}

/// Alias matching spec.md §6's exact external name.
pub fn __load_patch<T: 'static>(name: impl Into<String>, f: impl FnOnce(&PrivateApi) -> T) {
    load_patch(name, f)
}

/// Fetches a previously-loaded patch's stashed return value, downcast to
/// `T`. Used by [`assert_zone_patched`] to check `patches["ZoneAwarePromise"]`
/// in a real integration; exposed generically here since this core defines
/// no concrete patches of its own beyond the [`timer`] demonstration.
pub fn patch_result<T: 'static + Clone>(name: &str) -> Option<T> {
    PATCHES.with(|p| p.borrow().get(name).and_then(|v| v.downcast_ref::<T>().cloned()))
}

/// `Zone.assertZonePatched()` (spec.md §6): in a real integration this
/// requires `patches["ZoneAwarePromise"]` to be the active `Promise`; this
/// core has no `Promise` of its own (out of scope, spec.md §1), so it
/// simply reports whether *any* patch has been loaded under that name.
pub fn assert_zone_patched() {
    let patched = PATCHES.with(|p| p.borrow().contains_key("ZoneAwarePromise"));
    if !patched {
        fatal!("Zone has not been patched: no `ZoneAwarePromise` patch is loaded");
    }
}

/// A minimal reference patch demonstrating the extension-point contract:
/// registers a fake `setTimeout`/`clearTimeout` pair that schedules and
/// cancels macrotasks through [`Zone::schedule_macro_task`] /
/// [`Zone::cancel_task`]. Not a monkey-patch of any real host timer — real
/// host-API monkey-patching is explicitly out of scope (spec.md §1) — this
/// only exercises `__load_patch` end to end.
pub mod timer {
    use super::*;
    use std::time::Duration;

    /// A fake "set timeout" callable, returned by [`install`], that the
    /// patch's consumer calls exactly as it would the real host API.
    #[derive(Clone)]
    pub struct FakeTimerApi {
        zone: Zone,
    }

    impl FakeTimerApi {
        /// Schedules `callback` as a one-shot macro task on the zone that
        /// was active when the patch was installed, returning the task
        /// handle (the fake "timer id").
        pub fn set_timeout(
            &self,
            callback: impl Fn() -> Result<(), ZoneCallbackError> + 'static,
            delay: Duration,
        ) -> Result<Rc<Task>, ZoneError> {
            self.zone.schedule_macro_task(
                "setTimeout",
                callback,
                TaskData { is_periodic: false, delay: Some(delay), handle_id: None },
                |_task| Ok(()),
                |_task| Ok(()),
            )
        }

        pub fn clear_timeout(&self, task: &Rc<Task>) -> Result<(), ZoneError> {
            self.zone.cancel_task(task)
        }
    }

    /// Loads the `"fakeTimer"` patch and returns its installed
    /// [`FakeTimerApi`] for immediate use (bypassing the `patch_result`
    /// lookup, which is the path a real host integration would use
    /// instead).
    pub fn install(zone: Zone) -> FakeTimerApi {
        let api = FakeTimerApi { zone };
        let installed = api.clone();
        super::load_patch("fakeTimer", move |_private| installed);
        api
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ZoneSpec;

    #[test]
    #[should_panic(expected = "already loaded")]
    fn duplicate_patch_name_is_fatal() {
        crate::engine::test_reset();
        load_patch("dup", |_| 1i32);
        load_patch("dup", |_| 2i32);
    }

    #[test]
    fn disabled_patch_is_skipped_silently() {
        crate::engine::test_reset();
        disable_patch("disabled-one");
        load_patch("disabled-one", |_| panic!("must not run"));
    }

    #[test]
    fn fake_timer_patch_round_trips_through_macro_task() {
        crate::engine::test_reset();
        let z = engine::root_zone().fork(ZoneSpec::builder().name("z".to_string()).build());
        let timer_api = timer::install(z.clone());
        let task = timer_api
            .set_timeout(|| Ok(()), Duration::from_millis(0))
            .unwrap();
        timer_api.clear_timeout(&task).unwrap();
        assert_eq!(task.state(), crate::task::TaskState::NotScheduled);
    }
}
