//! Test-only helpers exposed across a crate boundary.
//!
//! `engine::test_reset` is `pub(crate)` because real callers never need it —
//! the thread-local engine state lives for the process's whole life. An
//! integration test under `tests/`, compiled as a separate crate, can't
//! reach a `pub(crate)` item, so this module re-exports a reset function
//! behind the `test-util` feature (mirroring tokio's own `test-util`
//! feature, already a dev-dependency of this crate) instead of loosening
//! `engine::test_reset`'s visibility for everyone.

/// Rebuilds this thread's engine state: empties the zone-frame stack and
/// microtask queue, clears the current task and all registered hooks. Cargo
/// test binaries run tests concurrently on a pool of OS threads and may
/// reuse a thread across tests, so call this first in any test that forks
/// zones or schedules tasks, to avoid leaking state from an earlier test
/// that happened to share the same thread.
pub fn reset_engine_state() {
    crate::engine::test_reset();
}
