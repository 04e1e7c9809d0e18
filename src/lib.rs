pub mod config;
pub mod errors;
pub mod executor;
pub mod form_manager;
pub mod html;
pub mod metrics;
pub mod sample;
pub mod tracker;
pub mod yaml_config;
