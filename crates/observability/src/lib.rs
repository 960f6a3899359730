//! Tracing/logging setup shared by sitegate binaries and tests.

/// Subscriber initialization (filters, output format).
pub mod logging;

pub use logging::{LogFormat, ObservabilityConfig, init, init_for_tests, init_with};
