//! In-memory authoritative queue engine.

/// Queue engine, listener registry and error type.
pub mod queue;
