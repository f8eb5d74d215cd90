use crate::config::types::Config;
use crate::config::validation::validate;
use crate::{ConfigError, ConfigResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Environment variable naming the Tidewater home directory
pub const HOME_ENV: &str = "TIDEWATER_HOME";

/// Loads and parses a configuration file from the given path
///
/// A relative `database-path` is taken relative to the directory holding
/// the configuration file.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use tidewater::config::load_config;
///
/// let config = load_config(Path::new("tidewater.toml")).unwrap();
/// println!("Control database: {}", config.control.database_path.display());
/// ```
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;

    validate(&config)?;

    if config.control.database_path.is_relative() {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.control.database_path = base.join(&config.control.database_path);
    }

    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(String)` - Hex-encoded SHA-256 hash of the file content
/// * `Err(ConfigError)` - Failed to read the file
pub fn compute_config_hash(path: &Path) -> ConfigResult<String> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> ConfigResult<(Config, String)> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

/// Resolves a configuration path against `$TIDEWATER_HOME`
///
/// Absolute paths are returned unchanged. Relative paths are resolved
/// against the home directory when the variable is set, and against the
/// working directory otherwise.
pub fn resolve_config_path(path: &Path) -> ConfigResult<PathBuf> {
    let home = std::env::var_os(HOME_ENV).map(PathBuf::from);
    resolve_against_home(path, home.as_deref())
}

fn resolve_against_home(path: &Path, home: Option<&Path>) -> ConfigResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }

    match home {
        Some(home) if home.is_dir() => Ok(home.join(path)),
        Some(home) => Err(ConfigError::MissingHome(home.display().to_string())),
        None => Ok(path.to_path_buf()),
    }
}
