//! Error types for form matching.
//!
//! Most of what the form manager runs into is not an error at all (no page
//! tracked yet, no form at the request URL, two forms that look the same).
//! Those cases are reported through [`crate::form_manager::EvaluationOutcome`].
//! The variants here cover the few conditions that stop an evaluation or
//! reject a configuration.

use thiserror::Error;

/// Errors raised while configuring or running the form manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormManagerError {
    #[error("Cannot resolve request URL '{url}': {source}")]
    InvalidRequestUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

impl FormManagerError {
    /// Short label used for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            FormManagerError::InvalidRequestUrl { .. } => "invalid_request_url",
            FormManagerError::InvalidSelector { .. } => "invalid_selector",
        }
    }
}
