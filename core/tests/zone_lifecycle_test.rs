//! End-to-end zone/task scenarios mirroring spec.md §8's worked examples.

use std::cell::RefCell;
use std::rc::Rc;
use zonecore::errors::ZoneCallbackError;
use zonecore::hooks::ZoneSpec;
use zonecore::task::TaskState;
use zonecore::zone::Zone;

/// S1: two microtasks enqueued inside a zone `run` call run strictly before
/// control returns to the host, in FIFO order.
#[test]
fn two_microtasks_run_before_host_turn_ends() {
    zonecore::test_util::reset_engine_state();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());

    let za = z.clone();
    let zb = z.clone();
    let log_a = log.clone();
    let log_b = log.clone();
    let log_sync = log.clone();

    z.run("test", move || {
        za.schedule_micro_task("m1", move || {
            log_a.borrow_mut().push("a");
            Ok(())
        })
        .unwrap();
        zb.schedule_micro_task("m2", move || {
            log_b.borrow_mut().push("b");
            Ok(())
        })
        .unwrap();
        log_sync.borrow_mut().push("sync");
        Ok::<(), ZoneCallbackError>(())
    })
    .unwrap();

    assert_eq!(&*log.borrow(), &["sync", "a", "b"]);
}

/// S3: cross-zone reschedule into a descendant zone is fatal.
#[test]
#[should_panic(expected = "can not reschedule")]
fn reschedule_into_descendant_rejected() {
    zonecore::test_util::reset_engine_state();
    let root = Zone::root();
    let a = root.fork(ZoneSpec::builder().name("A".to_string()).build());
    let b = a.fork(ZoneSpec::builder().name("B".to_string()).build());

    let task = a.schedule_micro_task("t", || Ok(())).unwrap();
    let _ = b.schedule_task(task);
}

/// S4: a task can only be run in its zone of creation.
#[test]
#[should_panic(expected = "can only be run in the zone of creation")]
fn run_task_rejects_foreign_zone() {
    zonecore::test_util::reset_engine_state();
    let root = Zone::root();
    let a = root.fork(ZoneSpec::builder().name("A".to_string()).build());
    let b = root.fork(ZoneSpec::builder().name("B".to_string()).build());

    let task = a.schedule_micro_task("t", || Ok(())).unwrap();
    let _ = b.run_task(&task);
}

/// S5: `onHandleError` returning `false` suppresses a thrown error —
/// `run_guarded` yields `Ok(None)` instead of propagating.
#[test]
fn handle_error_false_suppresses_error() {
    zonecore::test_util::reset_engine_state();
    let spec = ZoneSpec::builder()
        .name("z".to_string())
        .on_handle_error(Rc::new(|_ctx: &zonecore::hooks::HookCtx, _err: &ZoneCallbackError| false))
        .build();
    let z = Zone::root().fork(spec);

    let result = z.run_guarded("test", || -> Result<i32, ZoneCallbackError> {
        Err(Rc::new(std::io::Error::other("boom")))
    });

    assert!(matches!(result, Ok(None)));
}

/// S5 (propagating half): `onHandleError` returning `true` rethrows.
#[test]
fn handle_error_true_propagates() {
    zonecore::test_util::reset_engine_state();
    let spec = ZoneSpec::builder()
        .name("z".to_string())
        .on_handle_error(Rc::new(|_ctx: &zonecore::hooks::HookCtx, _err: &ZoneCallbackError| true))
        .build();
    let z = Zone::root().fork(spec);

    let result = z.run_guarded("test", || -> Result<i32, ZoneCallbackError> {
        Err(Rc::new(std::io::Error::other("boom")))
    });

    assert!(result.is_err());
}

/// Round-trip: schedule → cancel on a one-shot task leaves
/// `state = notScheduled, runCount = 0`.
#[test]
fn schedule_then_cancel_is_net_zero() {
    zonecore::test_util::reset_engine_state();
    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let task = z
        .schedule_macro_task(
            "t",
            || Ok(()),
            Default::default(),
            |_task| Ok(()),
            |_task| Ok(()),
        )
        .unwrap();

    assert_eq!(task.state(), TaskState::Scheduled);
    z.cancel_task(&task).unwrap();
    assert_eq!(task.state(), TaskState::NotScheduled);
    assert_eq!(task.run_count(), 0);
}

/// Round-trip: schedule → run on a non-periodic macro task returns to
/// `notScheduled` with `runCount` reset.
#[test]
fn schedule_then_run_one_shot_resets() {
    zonecore::test_util::reset_engine_state();
    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let task = z
        .schedule_macro_task(
            "t",
            || Ok(()),
            Default::default(),
            |_task| Ok(()),
            |_task| Ok(()),
        )
        .unwrap();

    z.run_task(&task).unwrap();

    assert_eq!(task.state(), TaskState::NotScheduled);
    assert_eq!(task.run_count(), 0);
}

/// Round-trip: schedule → run on a periodic macro task stays `scheduled`
/// with `runCount >= 1`.
#[test]
fn schedule_then_run_periodic_stays_scheduled() {
    zonecore::test_util::reset_engine_state();
    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let data = zonecore::task::TaskData { is_periodic: true, delay: None, handle_id: None };
    let task = z
        .schedule_macro_task("t", || Ok(()), data, |_task| Ok(()), |_task| Ok(()))
        .unwrap();

    z.run_task(&task).unwrap();

    assert_eq!(task.state(), TaskState::Scheduled);
    assert!(task.run_count() >= 1);
}

/// Fork chain: walking `parent` N times reaches exactly the root.
#[test]
fn fork_chain_walks_to_root() {
    zonecore::test_util::reset_engine_state();
    let root = Zone::root();
    let a = root.fork(ZoneSpec::builder().name("A".to_string()).build());
    let b = a.fork(ZoneSpec::builder().name("B".to_string()).build());
    let c = b.fork(ZoneSpec::builder().name("C".to_string()).build());

    assert_eq!(c.parent().unwrap().name(), "B");
    assert_eq!(c.parent().unwrap().parent().unwrap().name(), "A");
    assert!(c.parent().unwrap().parent().unwrap().parent().unwrap().parent().is_none());
}

/// S6: an illegal state transition is fatal with a descriptive message.
#[test]
#[should_panic(expected = "can not transition")]
fn illegal_transition_is_fatal() {
    zonecore::test_util::reset_engine_state();
    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let task = z.schedule_micro_task("t", || Ok(())).unwrap();
    // `task` is `scheduled` (microtasks never reach `running` synchronously
    // here); forcing a second `scheduling` transition is illegal.
    let _ = z.schedule_task(task);
}
