//! Request and response representations seen by the form manager.
//!
//! A [`SampleResponse`] is what a session got back from its previous request;
//! an [`OutgoingRequest`] is what it is about to send. Both are plain data so
//! the form manager can be driven without an HTTP client.

use std::collections::HashSet;
use url::Url;

use crate::errors::FormManagerError;

/// A response observed by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleResponse {
    /// Name of the step that produced this response
    pub label: String,

    /// Final URL of the response, used as the base for relative form actions
    pub url: Url,

    /// Value of the Content-Type header, if any
    pub content_type: Option<String>,

    /// Decoded response body
    pub body: String,
}

impl SampleResponse {
    pub fn new(
        label: impl Into<String>,
        url: Url,
        content_type: Option<&str>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            url,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }

    /// Convert a `reqwest` response, consuming its body.
    pub async fn from_reqwest(
        label: impl Into<String>,
        response: reqwest::Response,
    ) -> Result<Self, reqwest::Error> {
        let url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok(Self {
            label: label.into(),
            url,
            content_type,
            body,
        })
    }

    /// Whether the content type starts with `prefix`. A missing content type never matches.
    pub fn content_type_starts_with(&self, prefix: &str) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.starts_with(prefix))
            .unwrap_or(false)
    }
}

/// A single request parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub value: String,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How the request body is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Arguments are sent as a query string or a url-encoded form
    Form,

    /// A pre-built body; arguments are ignored and forms never apply
    Raw(String),
}

/// The request a session is about to send.
///
/// # Example
/// ```
/// use rust_form_manager::sample::OutgoingRequest;
///
/// let request = OutgoingRequest::new("Login", "POST", "http://dummy.net", "/base/form")
///     .with_argument("username", "alice");
///
/// assert_eq!(request.url().unwrap().as_str(), "http://dummy.net/base/form");
/// assert!(request.has_argument("username"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Descriptive name, used in logs
    pub label: String,

    /// HTTP method (GET, POST, ...)
    pub method: String,

    /// Scheme, host and optional port (e.g. "http://dummy.net:8080")
    pub base_url: String,

    /// Path plus optional query; a full http(s) URL here replaces `base_url`
    pub path: String,

    /// Explicitly set parameters, in the order they will be sent
    pub arguments: Vec<Argument>,

    pub body: RequestBody,
}

impl OutgoingRequest {
    pub fn new(
        label: impl Into<String>,
        method: impl Into<String>,
        base_url: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            method: method.into(),
            base_url: base_url.into(),
            path: path.into(),
            arguments: Vec::new(),
            body: RequestBody::Form,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_argument(name, value);
        self
    }

    pub fn with_raw_body(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Raw(body.into());
        self
    }

    pub fn is_form_encoded(&self) -> bool {
        matches!(self.body, RequestBody::Form)
    }

    /// Fully resolved request URL (without the arguments).
    pub fn url(&self) -> Result<Url, FormManagerError> {
        let raw = if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path.clone()
        } else if self.path.starts_with('/') {
            format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), self.path)
        };

        let mut url = Url::parse(&raw).map_err(|source| FormManagerError::InvalidRequestUrl {
            url: raw.clone(),
            source,
        })?;
        url.set_fragment(None);
        Ok(url)
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn add_argument(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.arguments.push(Argument::new(name, value));
    }

    pub fn has_argument(&self, name: &str) -> bool {
        self.arguments.iter().any(|a| a.name == name)
    }

    /// Whether some explicit argument has exactly this name and value.
    pub fn has_argument_pair(&self, name: &str, value: &str) -> bool {
        self.arguments
            .iter()
            .any(|a| a.name == name && a.value == value)
    }

    /// First value set for `name`.
    pub fn argument(&self, name: &str) -> Option<&str> {
        self.arguments
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn argument_names(&self) -> HashSet<&str> {
        self.arguments.iter().map(|a| a.name.as_str()).collect()
    }
}
