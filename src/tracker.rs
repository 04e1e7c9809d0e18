//! Tracking of the response forms are taken from.
//!
//! Pages with forms are rarely the response immediately before the form
//! submission: images, stylesheets and AJAX calls usually come in between.
//! The tracker keeps the last response with a matching content type across
//! those requests and forgets it when a new iteration starts.

use tracing::debug;

use crate::metrics::FORM_RESPONSES_TRACKED_TOTAL;
use crate::sample::SampleResponse;

/// Per-session memory of the last page that can contain forms.
#[derive(Debug, Clone)]
pub struct ResponseTracker {
    content_type_prefix: String,
    clear_each_iteration: bool,
    last_matching_response: Option<SampleResponse>,
    pending_iteration_reset: bool,
}

impl ResponseTracker {
    pub fn new(content_type_prefix: impl Into<String>, clear_each_iteration: bool) -> Self {
        Self {
            content_type_prefix: content_type_prefix.into(),
            clear_each_iteration,
            last_matching_response: None,
            pending_iteration_reset: false,
        }
    }

    /// Record the response of the previous request.
    ///
    /// Responses whose content type does not start with the configured
    /// prefix leave the tracked response untouched.
    pub fn observe(&mut self, previous: Option<&SampleResponse>) {
        let Some(response) = previous else {
            return;
        };
        if response.content_type_starts_with(&self.content_type_prefix) {
            debug!(response = %response.label, "Storing HTML result");
            FORM_RESPONSES_TRACKED_TOTAL.inc();
            self.last_matching_response = Some(response.clone());
        }
    }

    /// Mark the start of a new iteration. The next evaluation decides what to do with it.
    pub fn on_iteration_start(&mut self) {
        debug!("New thread iteration detected");
        self.pending_iteration_reset = true;
    }

    /// Consume a pending iteration reset.
    ///
    /// Returns true, after discarding the tracked response, when clearing is
    /// enabled and an iteration has started since the last evaluation. The
    /// caller must then leave the current request alone.
    pub fn should_skip_and_reset(&mut self) -> bool {
        if !(self.clear_each_iteration && self.pending_iteration_reset) {
            return false;
        }

        debug!("Clearing form data on iteration start");
        self.pending_iteration_reset = false;
        if let Some(discarded) = self.last_matching_response.take() {
            debug!(response = %discarded.label, "Discarding form data");
        }
        true
    }

    pub fn last_response(&self) -> Option<&SampleResponse> {
        self.last_matching_response.as_ref()
    }

    pub fn pending_iteration_reset(&self) -> bool {
        self.pending_iteration_reset
    }
}
