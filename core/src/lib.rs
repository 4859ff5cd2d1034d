//! zonecore — the zone tree, delegate chain, task state machine and
//! microtask engine for a single-threaded, event-loop-driven host runtime.
//!
//! This crate implements only the core described in spec.md: the tree of
//! ambient execution contexts, the hook-dispatch delegate chain, the task
//! state machine and the microtask engine that drains on the trailing edge
//! of every outermost task invocation. Monkey-patching real host APIs
//! (timers, `Promise`, event targets...) is deliberately out of scope; see
//! [`patch`] for the extension point a real integration would use.

#[allow(missing_docs)]
pub mod symbol;

#[allow(missing_docs)]
pub mod errors;

#[allow(missing_docs)]
pub mod hooks;

#[allow(missing_docs)]
pub mod task;

#[allow(missing_docs)]
pub mod delegate;

#[allow(missing_docs)]
pub mod zone;

#[allow(missing_docs)]
pub mod engine;

#[allow(missing_docs)]
pub mod patch;

#[cfg(any(test, feature = "test-util"))]
#[allow(missing_docs)]
pub mod test_util;

pub use errors::{ZoneCallbackError, ZoneError};
pub use hooks::{HasTaskState, ZoneSpec};
pub use symbol::{Symbol, symbol};
pub use task::{Task, TaskData, TaskKind, TaskState};
pub use zone::Zone;

/// Panics with a descriptive message after logging it at `error` level.
/// Every invariant violation this crate treats as fatal — a scheduling
/// error with no `handle_error` left to arbitrate it, an illegal task-state
/// transition, a reused patch name — goes through here rather than a bare
/// `panic!`, so the log line and the panic message never drift apart.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        tracing::error!(message = %msg, "zonecore invariant violation");
        panic!("{msg}")
    }};
}
