//! Form matching and parameter merging.
//!
//! A [`FormManager`] belongs to exactly one virtual user. For every request
//! the user is about to send, the host calls [`FormManager::observe`] with the
//! previous response and then [`FormManager::evaluate`] with the request (or
//! [`FormManager::process`] to do both). When exactly one form of the tracked
//! page fits the request, the form's fields that the request does not set
//! yet are appended to it.

use scraper::Selector;
use tracing::{debug, warn};
use url::Url;

use crate::config::FormManagerConfig;
use crate::errors::FormManagerError;
use crate::html::{FormCandidate, HtmlDocument, SubmitButton};
use crate::metrics::{FORM_EVALUATIONS_TOTAL, FORM_FIELDS_MERGED_TOTAL};
use crate::sample::{Argument, OutgoingRequest, SampleResponse};
use crate::tracker::ResponseTracker;

/// Why a request was left alone before any form was looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The request has a raw body
    RawBody,

    /// First request of a new iteration
    IterationStart,

    /// No response with a matching content type seen yet
    NoTrackedResponse,
}

/// What changed on a request after a unique match.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeSummary {
    /// Index of the matched form in the tracked page
    pub form_index: usize,

    /// Arguments appended to the request, in order
    pub added: Vec<Argument>,

    /// New request path when the URL was copied
    pub new_path: Option<String>,
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvaluationOutcome {
    Skipped(SkipReason),

    /// No form passed every enabled filter
    NoMatch,

    /// More than one form passed every enabled filter
    Ambiguous { matches: usize },

    Merged(MergeSummary),

    /// The request could not be resolved; it was not modified
    Aborted(FormManagerError),
}

impl EvaluationOutcome {
    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            EvaluationOutcome::Skipped(_) => "skipped",
            EvaluationOutcome::NoMatch => "no_match",
            EvaluationOutcome::Ambiguous { .. } => "ambiguous",
            EvaluationOutcome::Merged(_) => "merged",
            EvaluationOutcome::Aborted(_) => "aborted",
        }
    }

    pub fn is_merged(&self) -> bool {
        matches!(self, EvaluationOutcome::Merged(_))
    }
}

/// Per-session form matcher.
///
/// # Example
/// ```
/// use rust_form_manager::config::FormManagerConfig;
/// use rust_form_manager::form_manager::FormManager;
/// use rust_form_manager::sample::{OutgoingRequest, SampleResponse};
/// use url::Url;
///
/// let mut manager = FormManager::new(FormManagerConfig::default()).unwrap();
///
/// let page = SampleResponse::new(
///     "Login page",
///     Url::parse("http://dummy.net/login").unwrap(),
///     Some("text/html"),
///     r#"<form method="post"><input type="hidden" name="csrf" value="t0k3n"></form>"#,
/// );
/// let mut request = OutgoingRequest::new("Login", "POST", "http://dummy.net", "/login")
///     .with_argument("user", "alice");
///
/// let outcome = manager.process(Some(&page), &mut request);
///
/// assert!(outcome.is_merged());
/// assert_eq!(request.argument("csrf"), Some("t0k3n"));
/// ```
pub struct FormManager {
    config: FormManagerConfig,
    selector: Option<Selector>,
    tracker: ResponseTracker,
}

impl FormManager {
    /// Create a form manager for one session.
    ///
    /// Fails when the configured CSS selector does not parse.
    pub fn new(config: FormManagerConfig) -> Result<Self, FormManagerError> {
        let selector = config.css_selector()?;
        let tracker = ResponseTracker::new(
            config.content_type_predicate.clone(),
            config.clear_each_iteration,
        );

        Ok(Self {
            config,
            selector,
            tracker,
        })
    }

    pub fn tracker(&self) -> &ResponseTracker {
        &self.tracker
    }

    /// Record the response of the previous request.
    pub fn observe(&mut self, previous: Option<&SampleResponse>) {
        self.tracker.observe(previous);
    }

    /// Signal that the session starts a new iteration.
    pub fn on_iteration_start(&mut self) {
        self.tracker.on_iteration_start();
    }

    /// Observe `previous`, then evaluate `request`.
    pub fn process(
        &mut self,
        previous: Option<&SampleResponse>,
        request: &mut OutgoingRequest,
    ) -> EvaluationOutcome {
        debug!(request = %request.label, "Processing request");
        self.observe(previous);
        self.evaluate(request)
    }

    /// Match `request` against the forms of the tracked response and merge
    /// the winner into it.
    pub fn evaluate(&mut self, request: &mut OutgoingRequest) -> EvaluationOutcome {
        let outcome = self.evaluate_inner(request);
        FORM_EVALUATIONS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    fn evaluate_inner(&mut self, request: &mut OutgoingRequest) -> EvaluationOutcome {
        if !request.is_form_encoded() {
            debug!("No HTTP form but raw body, skipping");
            return EvaluationOutcome::Skipped(SkipReason::RawBody);
        }
        if self.tracker.should_skip_and_reset() {
            return EvaluationOutcome::Skipped(SkipReason::IterationStart);
        }
        let Some(response) = self.tracker.last_response() else {
            debug!("No stored form data available, skipping");
            return EvaluationOutcome::Skipped(SkipReason::NoTrackedResponse);
        };

        let request_url = if self.config.match_sampler_url {
            match request.url() {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(
                        request = %request.label,
                        error_kind = e.label(),
                        error = %e,
                        "Cannot process request"
                    );
                    return EvaluationOutcome::Aborted(e);
                }
            }
        } else {
            None
        };

        let document = HtmlDocument::parse(&response.body, &response.url);
        let forms = document.forms();
        let pending: &OutgoingRequest = request;
        let matches: Vec<&FormCandidate> = forms
            .iter()
            .filter(|form| self.is_match(&document, form, pending, request_url.as_ref()))
            .collect();

        match matches.as_slice() {
            [form] => {
                debug!(form_index = form.index, form = ?form.name, "Unique match found");
                EvaluationOutcome::Merged(self.modify_request(form, request))
            }
            [] => {
                debug!(forms = forms.len(), "No form match found. No request modification.");
                EvaluationOutcome::NoMatch
            }
            several => {
                debug!(
                    matches = several.len(),
                    "More than one form match found. No request modification."
                );
                EvaluationOutcome::Ambiguous {
                    matches: several.len(),
                }
            }
        }
    }

    /// Apply the enabled filters in order; a form must pass all of them.
    fn is_match(
        &self,
        document: &HtmlDocument,
        form: &FormCandidate,
        request: &OutgoingRequest,
        request_url: Option<&Url>,
    ) -> bool {
        debug!(form_index = form.index, form = ?form.name, "Trying to match form");

        if let Some(request_url) = request_url {
            let (form_method, form_url) = form.submission_target(submit_used(form, request));
            if !request.method.eq_ignore_ascii_case(form_method) || request_url != form_url {
                debug!(
                    form_method = %form_method,
                    form_url = %form_url,
                    "Form does not match request URL or method"
                );
                return false;
            }
        }

        if self.config.match_sampler_parameters {
            let form_names = form.field_names();
            if !request
                .argument_names()
                .iter()
                .all(|name| form_names.contains(name))
            {
                debug!("Request parameters do not match");
                return false;
            }
        }

        if self.config.match_submit {
            match form.find_submit(|name, value| request.has_argument_pair(name, value)) {
                Some(button) => {
                    debug!(name = %button.name, value = %button.value, "Submit matches a request argument");
                }
                None => {
                    debug!("Request parameters do not match form submit element");
                    return false;
                }
            }
        }

        if let Some(selector) = &self.selector {
            if !document.form_matches_selector(form.index, selector) {
                debug!(selector = %self.config.match_css_selector, "Form does not match CSS selector");
                return false;
            }
        }

        true
    }

    fn modify_request(&self, form: &FormCandidate, request: &mut OutgoingRequest) -> MergeSummary {
        let mut summary = MergeSummary {
            form_index: form.index,
            ..Default::default()
        };

        if self.config.copy_url {
            let (_, url) = form.submission_target(submit_used(form, request));
            let mut path = url.path().to_string();
            if let Some(query) = url.query().filter(|q| !q.is_empty()) {
                path.push('?');
                path.push_str(query);
            }
            debug!(path = %path, "Copying form URL path");
            request.set_path(path.clone());
            summary.new_path = Some(path);
        }

        if self.config.copy_parameters {
            if form.submit_buttons.len() > 1 {
                debug!("Form has more than one submit element. Excluding all, assuming request has submit element.");
            }
            for field in form.merge_fields() {
                if request.has_argument(&field.name) {
                    continue;
                }
                debug!(name = %field.name, value = %field.value, "Adding form field");
                request.add_argument(field.name.clone(), field.value.clone());
                summary.added.push(Argument::new(field.name.clone(), field.value.clone()));
            }
            FORM_FIELDS_MERGED_TOTAL.inc_by(summary.added.len() as u64);
        }

        summary
    }
}

/// The submit button a browser would use for `request`: the one the request
/// names explicitly, else the form's first one.
fn submit_used<'a>(form: &'a FormCandidate, request: &OutgoingRequest) -> Option<&'a SubmitButton> {
    form.find_submit(|name, value| request.has_argument_pair(name, value))
        .or_else(|| form.submit_buttons.first())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <form action="/login" method="post" id="login">
            <input type="hidden" name="csrf" value="abc">
            <input type="text" name="user" value="">
            <input type="submit" name="go" value="Sign in">
        </form>
        <form action="/search">
            <input type="text" name="q" value="">
        </form>"#;

    fn page() -> SampleResponse {
        SampleResponse::new(
            "Home",
            Url::parse("http://dummy.net/").unwrap(),
            Some("text/html"),
            PAGE,
        )
    }

    fn manager(config: FormManagerConfig) -> FormManager {
        FormManager::new(config).unwrap()
    }

    #[test]
    fn test_merges_unique_match() {
        let mut fm = manager(FormManagerConfig::default());
        let mut request =
            OutgoingRequest::new("Login", "POST", "http://dummy.net", "/login").with_argument("user", "bob");

        let outcome = fm.process(Some(&page()), &mut request);

        let EvaluationOutcome::Merged(summary) = outcome else {
            panic!("expected merge, got {:?}", outcome);
        };
        assert_eq!(summary.form_index, 0);
        assert_eq!(
            summary.added,
            vec![Argument::new("csrf", "abc"), Argument::new("go", "Sign in")]
        );
        assert_eq!(request.argument("user"), Some("bob"));
        assert_eq!(request.arguments.len(), 3);
    }

    #[test]
    fn test_raw_body_is_skipped() {
        let mut fm = manager(FormManagerConfig::default());
        let mut request = OutgoingRequest::new("Api", "POST", "http://dummy.net", "/login")
            .with_raw_body("{}");

        assert_eq!(
            fm.process(Some(&page()), &mut request),
            EvaluationOutcome::Skipped(SkipReason::RawBody)
        );
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_nothing_tracked() {
        let mut fm = manager(FormManagerConfig::default());
        let mut request = OutgoingRequest::new("Login", "POST", "http://dummy.net", "/login");

        assert_eq!(
            fm.process(None, &mut request),
            EvaluationOutcome::Skipped(SkipReason::NoTrackedResponse)
        );
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_copy_url_rewrites_path() {
        let config = FormManagerConfig {
            match_sampler_url: false,
            match_css_selector: "#login".to_string(),
            copy_url: true,
            ..Default::default()
        };
        let mut fm = manager(config);
        let mut request = OutgoingRequest::new("Login", "POST", "http://dummy.net", "/logical/login");

        let outcome = fm.process(Some(&page()), &mut request);

        assert!(outcome.is_merged());
        assert_eq!(request.path, "/login");
        assert_eq!(request.argument("csrf"), Some("abc"));
    }

    #[test]
    fn test_copy_parameters_disabled() {
        let config = FormManagerConfig {
            copy_parameters: false,
            ..Default::default()
        };
        let mut fm = manager(config);
        let mut request = OutgoingRequest::new("Login", "POST", "http://dummy.net", "/login");

        let outcome = fm.process(Some(&page()), &mut request);

        assert_eq!(outcome, EvaluationOutcome::Merged(MergeSummary::default()));
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let config = FormManagerConfig {
            match_css_selector: ":::".to_string(),
            ..Default::default()
        };
        assert!(FormManager::new(config).is_err());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(EvaluationOutcome::NoMatch.label(), "no_match");
        assert_eq!(EvaluationOutcome::Ambiguous { matches: 2 }.label(), "ambiguous");
        assert_eq!(
            EvaluationOutcome::Skipped(SkipReason::RawBody).label(),
            "skipped"
        );
    }
}
