//! Queue handle, drain processor and event stream APIs.

/// Event stream types emitted by the queue handle.
pub mod events;
/// Executor trait and error type.
pub mod executor;
/// Queue handle and drain cycle implementation.
pub mod handle;
