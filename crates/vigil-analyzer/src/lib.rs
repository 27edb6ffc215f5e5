//! Content-based security analyzer (§4.5).
//!
//! Stateless and synchronous by design: the worker pool in `vigil-daemon`
//! wraps [`analyze`] in a `tokio::time::timeout` and falls back to
//! [`timeout_verdict`] if the 2 s per-job budget trips, and checks file
//! size against the configured limit before ever reading content, falling
//! back to [`too_large_verdict`] instead.

mod analyzer;
mod extensions;
mod patterns;

pub use analyzer::{analyze, timeout_verdict, too_large_verdict};
