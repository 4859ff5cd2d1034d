//! Exercises the microtask engine against a real async host loop instead of
//! calling `run_task` by hand — a `tokio` current-thread runtime standing in
//! for the "host event loop" spec.md treats as an external collaborator
//! (spec.md §5 "single-threaded cooperative... no locking").

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use zonecore::errors::ZoneCallbackError;
use zonecore::hooks::ZoneSpec;
use zonecore::zone::Zone;

/// A macro task's `scheduleFn` hands a `tokio::time::sleep` to the runtime;
/// once it elapses the task is driven through `run_task` exactly as a real
/// host timer callback would. `#[tokio::test]`'s default current-thread
/// flavor keeps every `Rc` on one OS thread, so no `Send` bound is needed
/// anywhere in this crate's API.
#[tokio::test]
async fn macro_task_round_trips_through_a_tokio_timer() {
    let _ = tracing_subscriber::fmt::try_init();
    zonecore::test_util::reset_engine_state();

    let ran: Rc<RefCell<bool>> = Rc::new(RefCell::new(false));
    let ran_cb = ran.clone();

    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let task = z
        .schedule_macro_task(
            "setTimeout",
            move || {
                *ran_cb.borrow_mut() = true;
                Ok(())
            },
            Default::default(),
            |_task| Ok(()),
            |_task| Ok(()),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    z.run_task(&task).unwrap();

    assert!(*ran.borrow());
    assert_eq!(task.state(), zonecore::task::TaskState::NotScheduled);
}

/// Microtasks enqueued from inside a task running on a tokio-driven turn
/// still drain before that turn's `run_task` call returns, matching the
/// same-turn guarantee a synchronous host enjoys.
#[tokio::test]
async fn microtasks_drain_within_a_tokio_driven_turn() {
    zonecore::test_util::reset_engine_state();

    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let log_macro = log.clone();
    let log_micro = log.clone();

    let z = Zone::root().fork(ZoneSpec::builder().name("z".to_string()).build());
    let z_micro = z.clone();
    let task = z
        .schedule_macro_task(
            "t",
            move || {
                let log_micro = log_micro.clone();
                z_micro
                    .schedule_micro_task("follow-up", move || {
                        log_micro.borrow_mut().push("micro");
                        Ok::<(), ZoneCallbackError>(())
                    })
                    .unwrap();
                log_macro.borrow_mut().push("macro");
                Ok(())
            },
            Default::default(),
            |_task| Ok(()),
            |_task| Ok(()),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    z.run_task(&task).unwrap();

    assert_eq!(&*log.borrow(), &["macro", "micro"]);
}
