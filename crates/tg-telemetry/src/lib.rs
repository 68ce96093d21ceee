//! Logging setup shared by the taskgate binaries and tests.
//!
//! Everything logs through the `tracing` facade; this crate only decides how
//! those events are rendered (human-readable or JSON lines).

pub mod logging;
