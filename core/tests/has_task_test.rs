//! `onHasTask` ref-counting scenario (spec.md §8 S2): a zone several levels
//! above the task's owning zone registers `onHasTask` and must see exactly
//! one 0→1 and one 1→0 transition as a single macro task is scheduled and
//! then runs to completion.

use std::cell::RefCell;
use std::rc::Rc;
use zonecore::errors::ZoneCallbackError;
use zonecore::hooks::{HasTaskState, ZoneSpec};
use zonecore::zone::Zone;

#[test]
fn has_task_fires_once_per_boundary_crossing() {
    zonecore::test_util::reset_engine_state();

    let log: Rc<RefCell<Vec<HasTaskState>>> = Rc::new(RefCell::new(Vec::new()));
    let log_hook = log.clone();

    let root = Zone::root();
    let watcher = root.fork(
        ZoneSpec::builder()
            .name("watcher".to_string())
            .on_has_task(Rc::new(move |_ctx, state: HasTaskState| {
                log_hook.borrow_mut().push(state);
                Ok::<(), ZoneCallbackError>(())
            }))
            .build(),
    );
    let middle = watcher.fork(ZoneSpec::builder().name("middle".to_string()).build());
    let leaf = middle.fork(ZoneSpec::builder().name("leaf".to_string()).build());

    let task = leaf
        .schedule_macro_task(
            "t",
            || Ok(()),
            Default::default(),
            |_task| Ok(()),
            |_task| Ok(()),
        )
        .unwrap();

    {
        let entries = log.borrow();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].macro_task);
        assert!(!entries[0].micro_task);
        assert!(!entries[0].event_task);
    }

    leaf.run_task(&task).unwrap();

    let entries = log.borrow();
    assert_eq!(entries.len(), 2, "expected exactly one 0->1 and one 1->0 crossing, got {entries:?}");
    assert!(!entries[1].macro_task);
}

/// A second task scheduled while the first is still outstanding must not
/// fire `onHasTask` again — the counter only notifies at 0↔1 boundaries.
#[test]
fn second_concurrent_task_does_not_refire() {
    zonecore::test_util::reset_engine_state();

    let log: Rc<RefCell<Vec<HasTaskState>>> = Rc::new(RefCell::new(Vec::new()));
    let log_hook = log.clone();

    let root = Zone::root();
    let watcher = root.fork(
        ZoneSpec::builder()
            .name("watcher".to_string())
            .on_has_task(Rc::new(move |_ctx, state: HasTaskState| {
                log_hook.borrow_mut().push(state);
                Ok::<(), ZoneCallbackError>(())
            }))
            .build(),
    );
    let leaf = watcher.fork(ZoneSpec::builder().name("leaf".to_string()).build());

    let t1 = leaf
        .schedule_macro_task("t1", || Ok(()), Default::default(), |_t| Ok(()), |_t| Ok(()))
        .unwrap();
    let _t2 = leaf
        .schedule_macro_task("t2", || Ok(()), Default::default(), |_t| Ok(()), |_t| Ok(()))
        .unwrap();

    assert_eq!(log.borrow().len(), 1, "second schedule while first is outstanding must not refire onHasTask");

    leaf.run_task(&t1).unwrap();
    assert_eq!(log.borrow().len(), 1, "counter is still > 0 after only one of two tasks completes");
}

/// `onHandleError` suppressing a propagated error still lets the counter
/// that fired it settle back to zero (spec.md §4.C3's error routing is
/// orthogonal to the counter itself).
#[test]
fn has_task_hook_error_is_routed_through_handle_error() {
    zonecore::test_util::reset_engine_state();

    let handled: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let handled_hook = handled.clone();

    let root = Zone::root();
    let z = root.fork(
        ZoneSpec::builder()
            .name("z".to_string())
            .on_has_task(Rc::new(|_ctx, _state: HasTaskState| -> Result<(), ZoneCallbackError> {
                Err(Rc::new(std::io::Error::other("onHasTask blew up")))
            }))
            .on_handle_error(Rc::new(move |_ctx, err| {
                handled_hook.borrow_mut().push(err.to_string());
                false
            }))
            .build(),
    );

    // Scheduling must still succeed: the onHasTask error is caught and
    // routed through handle_error, never propagated to the caller.
    let task = z
        .schedule_macro_task("t", || Ok(()), Default::default(), |_t| Ok(()), |_t| Ok(()))
        .unwrap();
    assert_eq!(handled.borrow().len(), 1);

    z.cancel_task(&task).unwrap();
    assert_eq!(handled.borrow().len(), 2);
}
