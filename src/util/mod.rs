//! Small helpers shared across the crate.
//!
//! - [`b64`] - Base64 text wrapper
//! - [`lit_str`] - Compile-time string literal types
//! - [`telemetry`] - Tracing subscriber and optional OTLP export

pub mod b64;
pub mod lit_str;
pub mod telemetry;

pub use b64::*;
pub use telemetry::*;
