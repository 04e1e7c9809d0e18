//! Session execution engine.
//!
//! Runs the steps of a plan for one virtual user. Before every request the
//! user's [`FormManager`] sees the previous response and gets a chance to
//! complete the request with form fields; the response then becomes the
//! previous response of the next step.

use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::FormManagerConfig;
use crate::errors::FormManagerError;
use crate::form_manager::{EvaluationOutcome, FormManager};
use crate::metrics::{REQUEST_DURATION_SECONDS, REQUEST_STATUS_CODES, REQUEST_TOTAL};
use crate::sample::{Argument, OutgoingRequest, RequestBody, SampleResponse};

/// Request configuration for a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRequest {
    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Path relative to the base URL, or a full URL
    pub path: String,

    /// Parameters set by the plan author; the form manager never overrides them
    pub arguments: Vec<Argument>,

    pub headers: HashMap<String, String>,

    /// Send this body as is instead of the arguments
    pub raw_body: Option<String>,
}

/// A single step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormStep {
    pub name: String,
    pub request: StepRequest,
}

/// One simulated user: its form manager and the last response it received.
pub struct VirtualUser {
    pub id: usize,
    form_manager: FormManager,
    previous: Option<SampleResponse>,
    iteration: usize,
}

impl VirtualUser {
    pub fn new(id: usize, config: FormManagerConfig) -> Result<Self, FormManagerError> {
        Ok(Self {
            id,
            form_manager: FormManager::new(config)?,
            previous: None,
            iteration: 0,
        })
    }

    pub fn iterations_started(&self) -> usize {
        self.iteration
    }
}

/// Result of executing a single step.
#[derive(Debug)]
pub struct StepResult {
    pub step_name: String,

    /// Whether the step got a response with a status below 400
    pub success: bool,

    pub status_code: Option<u16>,

    pub response_time_ms: u64,

    /// Form manager outcome label (merged, no_match, ...)
    pub form_outcome: &'static str,

    /// Arguments actually sent, explicit ones first
    pub arguments: Vec<Argument>,

    /// Path actually requested
    pub path: String,

    pub error: Option<String>,
}

/// Result of one pass over all steps.
#[derive(Debug)]
pub struct IterationResult {
    pub user_id: usize,
    pub iteration: usize,
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub total_time_ms: u64,
}

/// Executor for running a plan's steps.
///
/// The client should have `cookie_store(true)` so session cookies travel
/// along with the form tokens. Use one client per virtual user to keep
/// cookie jars apart.
pub struct SessionExecutor {
    /// Base URL for requests (e.g., "https://app.example.com")
    base_url: String,

    client: reqwest::Client,
}

impl SessionExecutor {
    pub fn new(base_url: String, client: reqwest::Client) -> Self {
        Self { base_url, client }
    }

    /// Run every step once for `user`. Stops at the first failing step.
    pub async fn run_iteration(&self, steps: &[FormStep], user: &mut VirtualUser) -> IterationResult {
        let start = Instant::now();
        user.iteration += 1;
        user.form_manager.on_iteration_start();

        info!(user = user.id, iteration = user.iteration, steps = steps.len(), "Starting iteration");

        let mut results = Vec::with_capacity(steps.len());
        let mut success = true;
        for (idx, step) in steps.iter().enumerate() {
            let result = self.execute_step(step, user).await;
            let step_success = result.success;
            results.push(result);

            if !step_success {
                success = false;
                error!(
                    user = user.id,
                    step = %step.name,
                    step_idx = idx,
                    "Step failed, stopping iteration"
                );
                break;
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        if success {
            info!(user = user.id, iteration = user.iteration, total_time_ms, "Iteration completed");
        } else {
            warn!(user = user.id, iteration = user.iteration, total_time_ms, "Iteration failed");
        }

        IterationResult {
            user_id: user.id,
            iteration: user.iteration,
            success,
            steps: results,
            total_time_ms,
        }
    }

    async fn execute_step(&self, step: &FormStep, user: &mut VirtualUser) -> StepResult {
        let mut request = self.build_request(step);

        let outcome = user
            .form_manager
            .process(user.previous.as_ref(), &mut request);
        if let EvaluationOutcome::Merged(summary) = &outcome {
            debug!(
                step = %step.name,
                form_index = summary.form_index,
                added = summary.added.len(),
                "Request completed from form"
            );
        }

        let mut result = StepResult {
            step_name: step.name.clone(),
            success: false,
            status_code: None,
            response_time_ms: 0,
            form_outcome: outcome.label(),
            arguments: request.arguments.clone(),
            path: request.path.clone(),
            error: None,
        };

        let builder = match self.request_builder(&request, &step.request.headers) {
            Ok(builder) => builder,
            Err(e) => {
                error!(step = %step.name, error = %e, "Cannot build request");
                result.error = Some(e);
                user.previous = None;
                return result;
            }
        };

        let step_start = Instant::now();
        REQUEST_TOTAL.inc();
        let response = builder.send().await;
        let elapsed = step_start.elapsed();
        REQUEST_DURATION_SECONDS.observe(elapsed.as_secs_f64());
        result.response_time_ms = elapsed.as_millis() as u64;

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                REQUEST_STATUS_CODES
                    .with_label_values(&[status.to_string().as_str()])
                    .inc();
                result.status_code = Some(status);
                result.success = status < 400;

                match SampleResponse::from_reqwest(step.name.clone(), response).await {
                    Ok(sample) => user.previous = Some(sample),
                    Err(e) => {
                        warn!(step = %step.name, error = %e, "Failed to read response body");
                        user.previous = None;
                    }
                }
                debug!(step = %step.name, status, response_time_ms = result.response_time_ms, "Request completed");
            }
            Err(e) => {
                REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
                error!(step = %step.name, error = %e, "Request failed");
                result.error = Some(e.to_string());
                user.previous = None;
            }
        }

        result
    }

    fn build_request(&self, step: &FormStep) -> OutgoingRequest {
        let mut request = OutgoingRequest::new(
            step.name.clone(),
            step.request.method.clone(),
            self.base_url.clone(),
            step.request.path.clone(),
        );
        request.arguments = step.request.arguments.clone();
        if let Some(body) = &step.request.raw_body {
            request.body = RequestBody::Raw(body.clone());
        }
        request
    }

    /// Translate `request` into a `reqwest` request.
    ///
    /// Arguments go into the query string for methods without a body and
    /// into a url-encoded form otherwise.
    fn request_builder(
        &self,
        request: &OutgoingRequest,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::RequestBuilder, String> {
        let method = reqwest::Method::from_bytes(request.method.to_uppercase().as_bytes())
            .map_err(|_| format!("Unsupported HTTP method: {}", request.method))?;
        let mut url: Url = request.url().map_err(|e| e.to_string())?;

        let mut builder = match &request.body {
            RequestBody::Raw(body) => self.client.request(method, url).body(body.clone()),
            RequestBody::Form if sends_query(&method) => {
                if !request.arguments.is_empty() {
                    let mut pairs = url.query_pairs_mut();
                    for arg in &request.arguments {
                        pairs.append_pair(&arg.name, &arg.value);
                    }
                }
                self.client.request(method, url)
            }
            RequestBody::Form => {
                let body = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(request.arguments.iter().map(|a| (&a.name, &a.value)))
                    .finish();
                self.client
                    .request(method, url)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(body)
            }
        };

        for (key, value) in headers {
            builder = builder.header(key, value);
        }
        Ok(builder)
    }
}

fn sends_query(method: &reqwest::Method) -> bool {
    [
        reqwest::Method::GET,
        reqwest::Method::HEAD,
        reqwest::Method::DELETE,
        reqwest::Method::OPTIONS,
    ]
    .contains(method)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(method: &str, path: &str) -> FormStep {
        FormStep {
            name: "step".to_string(),
            request: StepRequest {
                method: method.to_string(),
                path: path.to_string(),
                arguments: vec![Argument::new("q", "a b"), Argument::new("page", "2")],
                headers: HashMap::new(),
                raw_body: None,
            },
        }
    }

    fn executor() -> SessionExecutor {
        SessionExecutor::new("http://dummy.net".to_string(), reqwest::Client::new())
    }

    #[test]
    fn test_get_arguments_go_to_query() {
        let exec = executor();
        let request = exec.build_request(&step("GET", "/search"));

        let built = exec
            .request_builder(&request, &HashMap::new())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(built.method(), reqwest::Method::GET);
        assert_eq!(built.url().as_str(), "http://dummy.net/search?q=a+b&page=2");
        assert!(built.body().is_none());
    }

    #[test]
    fn test_post_arguments_go_to_form_body() {
        let exec = executor();
        let request = exec.build_request(&step("POST", "/search"));

        let built = exec
            .request_builder(&request, &HashMap::new())
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(built.url().as_str(), "http://dummy.net/search");
        assert_eq!(
            built.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"q=a+b&page=2");
    }

    #[test]
    fn test_raw_body_is_sent_as_is() {
        let exec = executor();
        let mut s = step("POST", "/api");
        s.request.raw_body = Some("{\"a\":1}".to_string());
        s.request.headers.insert("Content-Type".to_string(), "application/json".to_string());
        let request = exec.build_request(&s);
        assert!(!request.is_form_encoded());

        let built = exec.request_builder(&request, &s.request.headers).unwrap().build().unwrap();

        let body = built.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"{\"a\":1}");
        assert_eq!(
            built.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_invalid_method_is_rejected() {
        let exec = executor();
        let request = exec.build_request(&step("NOT A METHOD", "/"));

        let err = exec.request_builder(&request, &HashMap::new()).unwrap_err();
        assert!(err.contains("Unsupported HTTP method"));
    }
}
