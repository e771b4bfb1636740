//! Diagnostic records for broker failures
//!
//! Every failed operation produces one of these, independent of whether the
//! caller handles the returned error.

use crate::error::ReasonCode;
use serde::Serialize;
use std::error::Error;
use std::fmt;

pub const DIAGNOSTIC_TARGET: &str = "broker_link::diagnostic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub reason_code: String,
    pub message: String,
    /// Rendered source chain, outermost first
    pub cause: Option<String>,
}

impl Diagnostic {
    pub fn new(reason_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason_code: reason_code.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + ReasonCode,
    {
        Self {
            reason_code: error.reason_code().to_string(),
            message: error.to_string(),
            cause: render_sources(error),
        }
    }

    /// Log this record on the diagnostic target
    pub fn emit(&self) {
        tracing::error!(
            target: DIAGNOSTIC_TARGET,
            reason_code = %self.reason_code,
            cause = self.cause.as_deref().unwrap_or("none"),
            "{}",
            self.message
        );
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.reason_code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

fn render_sources(error: &dyn Error) -> Option<String> {
    let mut chain = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    if chain.is_empty() {
        None
    } else {
        Some(chain.join(": "))
    }
}

/// Build, emit and return the diagnostic for an error
pub fn report<E>(error: &E) -> Diagnostic
where
    E: Error + ReasonCode,
{
    let diagnostic = Diagnostic::from_error(error);
    diagnostic.emit();
    diagnostic
}
