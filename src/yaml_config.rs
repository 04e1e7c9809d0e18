//! YAML plan files.
//!
//! A plan describes the target, how many virtual users run it, the form
//! manager options and the steps each user sends, in order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::config::FormManagerConfig;
use crate::executor::{FormStep, StepRequest};
use crate::sample::Argument;

/// Errors that can occur when loading or parsing a plan file.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML (e.g., 30, "500ms", "30s", "5m").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<Duration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(Duration::from_secs(*s)),
            YamlDuration::String(s) => parse_duration(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

/// Parses "250ms", "30s", "10m" or "2h".
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| "missing unit, use 'ms', 's', 'm' or 'h'".to_string())?;
    let (digits, unit) = s.split_at(split);
    let value = u64::from_str(digits).map_err(|_| format!("invalid number '{}'", digits))?;

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        other => return Err(format!("unknown unit '{}'", other)),
    };
    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("'{}' is too large", s))
}

/// Global run settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlGlobalConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,

    #[serde(default = "default_users")]
    pub users: usize,

    #[serde(default = "default_iterations")]
    pub iterations: usize,

    #[serde(default = "default_timeout")]
    pub timeout: YamlDuration,
}

fn default_users() -> usize {
    1
}

fn default_iterations() -> usize {
    1
}

fn default_timeout() -> YamlDuration {
    YamlDuration::Seconds(30)
}

/// A request parameter in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlArgument {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Request definition of a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlRequest {
    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    #[serde(default)]
    pub arguments: Vec<YamlArgument>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(rename = "rawBody")]
    pub raw_body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStep {
    pub name: Option<String>,
    pub request: YamlRequest,
}

/// Root of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    #[serde(default = "default_version")]
    pub version: String,

    pub config: YamlGlobalConfig,

    #[serde(rename = "formManager", default)]
    pub form_manager: FormManagerConfig,

    pub steps: Vec<YamlStep>,
}

fn default_version() -> String {
    "1.0".to_string()
}

const SUPPORTED_VERSION: &str = "1.0";

impl YamlConfig {
    /// Load and validate a plan from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse and validate a plan from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        if self.version != SUPPORTED_VERSION {
            return Err(YamlConfigError::Validation(format!(
                "Unsupported version '{}', expected '{}'",
                self.version, SUPPORTED_VERSION
            )));
        }

        let base = &self.config.base_url;
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(YamlConfigError::Validation(format!(
                "baseUrl must start with http:// or https://, got '{}'",
                base
            )));
        }
        if self.config.users == 0 {
            return Err(YamlConfigError::Validation("users must be > 0".to_string()));
        }
        if self.config.iterations == 0 {
            return Err(YamlConfigError::Validation(
                "iterations must be > 0".to_string(),
            ));
        }
        self.config.timeout.to_std_duration()?;

        if self.steps.is_empty() {
            return Err(YamlConfigError::Validation(
                "plan must contain at least one step".to_string(),
            ));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            if step.request.path.trim().is_empty() {
                return Err(YamlConfigError::Validation(format!(
                    "steps[{}].request.path must not be empty",
                    idx
                )));
            }
        }

        self.form_manager
            .validate()
            .map_err(|e| YamlConfigError::Validation(e.to_string()))
    }

    /// Form manager options with `FORMMAN_*` environment overrides applied.
    pub fn form_manager_config(&self) -> FormManagerConfig {
        self.form_manager.clone().with_env_overrides()
    }

    pub fn timeout(&self) -> Result<Duration, YamlConfigError> {
        self.config.timeout.to_std_duration()
    }

    /// Steps in execution order; unnamed steps are called "Step <n>".
    pub fn to_steps(&self) -> Vec<FormStep> {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| FormStep {
                name: step
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Step {}", idx + 1)),
                request: StepRequest {
                    method: step.request.method.to_uppercase(),
                    path: step.request.path.clone(),
                    arguments: step
                        .request
                        .arguments
                        .iter()
                        .map(|a| Argument::new(a.name.clone(), a.value.clone()))
                        .collect(),
                    headers: step.request.headers.clone(),
                    raw_body: step.request.raw_body.clone(),
                },
            })
            .collect()
    }
}
