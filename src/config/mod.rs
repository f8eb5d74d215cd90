//! Configuration module for Tidewater
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use tidewater::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("tidewater.toml")).unwrap();
//! println!("Launch window: {}s", config.liveness.launch_window_secs);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{Config, ControlConfig, CrawlerConfig, LivenessConfig, UserAgentConfig};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, resolve_config_path, HOME_ENV,
};
