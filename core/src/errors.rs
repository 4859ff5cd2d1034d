use std::rc::Rc;
use thiserror::Error;

/// The error type a user callback, task callback or hook body can fail with.
///
/// This is the single-threaded analogue of the teacher's
/// `DynArcError = Arc<dyn std::error::Error + Send + Sync>`: since the zone
/// tree, the frame stack and every task counter are thread-local by design
/// (spec.md §5 rules out cross-thread sharing), there is no need to pay for
/// `Send + Sync` on every boxed error.
pub type ZoneCallbackError = Rc<dyn std::error::Error>;

/// [`ZoneError`] enumerates every *recoverable* failure this crate can
/// return from a public API. It deliberately does **not** cover invariant
/// violations (illegal state transitions, negative task counts, running a
/// task outside its owning zone, rescheduling into a descendant zone, a
/// missing `schedule_fn`, cancelling a non-cancelable task, a duplicate
/// patch name, a double engine bootstrap...) — those are fatal per spec.md
/// §7 and surface as panics via the [`crate::fatal`] macro, not as a
/// `Result`. [`ZoneError`] only wraps failures a `handle_error` hook is
/// meant to see and arbitrate.
#[derive(Error, Debug)]
pub enum ZoneError {
    /// A user callback passed to [`crate::Zone::run`] / [`crate::Zone::wrap`]
    /// returned an error. `run` forwards it unchanged; `runGuarded` catches
    /// it and routes it through the zone's `handle_error` delegate chain.
    #[error("zone callback failed: {0}")]
    Callback(#[source] ZoneCallbackError),

    /// An `on_schedule_task` hook returned an error while scheduling a task.
    /// Per spec.md §7 the task is transitioned to `Unknown`, the error is
    /// routed through `handle_error`, and then rethrown to the caller of
    /// `schedule_task` — this variant is that rethrow.
    #[error("scheduling task `{task}` failed: {source}")]
    ScheduleFailed {
        task: String,
        #[source]
        source: ZoneCallbackError,
    },

    /// An `on_cancel_task` hook returned an error while cancelling a task.
    /// Same protocol as [`ZoneError::ScheduleFailed`] but for cancellation.
    #[error("cancelling task `{task}` failed: {source}")]
    CancelFailed {
        task: String,
        #[source]
        source: ZoneCallbackError,
    },
}
