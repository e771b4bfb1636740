//! Observability: structured logging and diagnostic records

pub mod diagnostics;
pub mod logging;

pub use diagnostics::{report, Diagnostic, DIAGNOSTIC_TARGET};
pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{lifecycle_span, mqtt_span};
