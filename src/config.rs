//! Form manager configuration.
//!
//! Values come from the `formManager` section of a plan file and can be
//! overridden per run with environment variables. Precedence:
//! Environment Variables > YAML File > Default Values

use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::env;

use crate::errors::FormManagerError;

/// Options controlling which form is matched and what gets copied.
///
/// # Example
/// ```
/// use rust_form_manager::config::FormManagerConfig;
///
/// let config = FormManagerConfig::default();
/// assert_eq!(config.content_type_predicate, "text/html");
/// assert!(config.match_sampler_url);
/// assert!(!config.copy_url);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormManagerConfig {
    /// Content-type prefix a response needs to be used as form source
    #[serde(alias = "contentType")]
    pub content_type_predicate: String,

    /// Forget the tracked page when a new iteration starts
    pub clear_each_iteration: bool,

    /// Form method and action must equal the request's method and URL
    pub match_sampler_url: bool,

    /// Form fields must include every explicit request parameter
    pub match_sampler_parameters: bool,

    /// A submit button's name and value must be an explicit request parameter
    pub match_submit: bool,

    /// Extra CSS selector the form must match (empty disables)
    pub match_css_selector: String,

    /// Append form fields the request does not set
    pub copy_parameters: bool,

    /// Replace the request path with the form's action path and query
    pub copy_url: bool,
}

impl Default for FormManagerConfig {
    fn default() -> Self {
        Self {
            content_type_predicate: "text/html".to_string(),
            clear_each_iteration: true,
            match_sampler_url: true,
            match_sampler_parameters: false,
            match_submit: false,
            match_css_selector: String::new(),
            copy_parameters: true,
            copy_url: false,
        }
    }
}

impl FormManagerConfig {
    pub const ENV_CONTENT_TYPE: &'static str = "FORMMAN_CONTENT_TYPE";
    pub const ENV_CLEAR_EACH_ITERATION: &'static str = "FORMMAN_CLEAR_EACH_ITERATION";
    pub const ENV_MATCH_SAMPLER_URL: &'static str = "FORMMAN_MATCH_SAMPLER_URL";
    pub const ENV_MATCH_SAMPLER_PARAMETERS: &'static str = "FORMMAN_MATCH_SAMPLER_PARAMETERS";
    pub const ENV_MATCH_SUBMIT: &'static str = "FORMMAN_MATCH_SUBMIT";
    pub const ENV_MATCH_CSS_SELECTOR: &'static str = "FORMMAN_MATCH_CSS_SELECTOR";
    pub const ENV_COPY_PARAMETERS: &'static str = "FORMMAN_COPY_PARAMETERS";
    pub const ENV_COPY_URL: &'static str = "FORMMAN_COPY_URL";

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `FORMMAN_*` environment variables on top of these values.
    ///
    /// Boolean variables accept "true"/"false" in any case; anything else
    /// leaves the current value in place.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = env::var(Self::ENV_CONTENT_TYPE) {
            if !value.trim().is_empty() {
                self.content_type_predicate = value.trim().to_string();
            }
        }
        if let Ok(value) = env::var(Self::ENV_MATCH_CSS_SELECTOR) {
            self.match_css_selector = value.trim().to_string();
        }

        merge_bool(&mut self.clear_each_iteration, Self::ENV_CLEAR_EACH_ITERATION);
        merge_bool(&mut self.match_sampler_url, Self::ENV_MATCH_SAMPLER_URL);
        merge_bool(
            &mut self.match_sampler_parameters,
            Self::ENV_MATCH_SAMPLER_PARAMETERS,
        );
        merge_bool(&mut self.match_submit, Self::ENV_MATCH_SUBMIT);
        merge_bool(&mut self.copy_parameters, Self::ENV_COPY_PARAMETERS);
        merge_bool(&mut self.copy_url, Self::ENV_COPY_URL);

        self
    }

    /// Compiled CSS selector filter, `None` when disabled.
    pub fn css_selector(&self) -> Result<Option<Selector>, FormManagerError> {
        let selector = self.match_css_selector.trim();
        if selector.is_empty() {
            return Ok(None);
        }

        Selector::parse(selector)
            .map(Some)
            .map_err(|e| FormManagerError::InvalidSelector {
                selector: selector.to_string(),
                reason: format!("{:?}", e),
            })
    }

    /// Check the configuration without building a form manager.
    pub fn validate(&self) -> Result<(), FormManagerError> {
        self.css_selector().map(|_| ())
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Form manager:");
        println!("  Content type prefix: {}", self.content_type_predicate);
        println!("  Clear each iteration: {}", self.clear_each_iteration);
        println!("  Match sampler URL: {}", self.match_sampler_url);
        println!("  Match sampler parameters: {}", self.match_sampler_parameters);
        println!("  Match submit: {}", self.match_submit);
        if self.match_css_selector.is_empty() {
            println!("  Match CSS selector: (disabled)");
        } else {
            println!("  Match CSS selector: {}", self.match_css_selector);
        }
        println!("  Copy parameters: {}", self.copy_parameters);
        println!("  Copy URL: {}", self.copy_url);
    }
}

fn merge_bool(target: &mut bool, env_var: &str) {
    if let Ok(value) = env::var(env_var) {
        match value.trim().to_lowercase().as_str() {
            "true" => *target = true,
            "false" => *target = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FormManagerConfig::default();

        assert_eq!(config.content_type_predicate, "text/html");
        assert!(config.clear_each_iteration);
        assert!(config.match_sampler_url);
        assert!(!config.match_sampler_parameters);
        assert!(!config.match_submit);
        assert!(config.match_css_selector.is_empty());
        assert!(config.copy_parameters);
        assert!(!config.copy_url);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
matchSubmit: true
matchCssSelector: "form.login"
"#;
        let config: FormManagerConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.match_submit);
        assert_eq!(config.match_css_selector, "form.login");
        assert!(config.match_sampler_url);
        assert!(config.copy_parameters);
    }

    #[test]
    fn test_content_type_alias() {
        let config: FormManagerConfig =
            serde_yaml::from_str("contentType: application/xhtml+xml").unwrap();
        assert_eq!(config.content_type_predicate, "application/xhtml+xml");
    }

    #[test]
    fn test_css_selector_disabled_when_blank() {
        let config = FormManagerConfig {
            match_css_selector: "   ".to_string(),
            ..Default::default()
        };
        assert!(config.css_selector().unwrap().is_none());
    }

    #[test]
    fn test_css_selector_invalid() {
        let config = FormManagerConfig {
            match_css_selector: "form[".to_string(),
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(err, FormManagerError::InvalidSelector { ref selector, .. } if selector == "form["));
    }

    #[test]
    fn test_css_selector_valid() {
        let config = FormManagerConfig {
            match_css_selector: "form#login input[name=csrf]".to_string(),
            ..Default::default()
        };
        assert!(config.css_selector().unwrap().is_some());
    }
}
