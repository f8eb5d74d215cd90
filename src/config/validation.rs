use crate::config::types::{Config, ControlConfig, CrawlerConfig, LivenessConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_control_config(&config.control)?;
    validate_liveness_config(&config.liveness)?;
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    Ok(())
}

fn validate_control_config(config: &ControlConfig) -> Result<(), ConfigError> {
    if config.database_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates liveness timing
fn validate_liveness_config(config: &LivenessConfig) -> Result<(), ConfigError> {
    if config.launch_window_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "launch_window_secs must be >= 1, got {}",
            config.launch_window_secs
        )));
    }

    for (name, value) in [
        ("poll_interval_ms", config.poll_interval_ms),
        ("response_timeout_ms", config.response_timeout_ms),
        ("heartbeat_interval_ms", config.heartbeat_interval_ms),
    ] {
        if value < 10 {
            return Err(ConfigError::Validation(format!(
                "{} must be >= 10ms, got {}ms",
                name, value
            )));
        }
    }

    // Heartbeats must arrive more often than they go stale
    if config.heartbeat_interval_ms >= config.heartbeat_staleness_ms {
        return Err(ConfigError::Validation(format!(
            "heartbeat_interval_ms ({}ms) must be below heartbeat_staleness_ms ({}ms)",
            config.heartbeat_interval_ms, config.heartbeat_staleness_ms
        )));
    }

    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_pages_per_domain < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages_per_domain must be >= 1, got {}",
            config.max_pages_per_domain
        )));
    }

    if config.max_known_urls < config.max_pages_per_domain as usize {
        return Err(ConfigError::Validation(format!(
            "max_known_urls ({}) must be >= max_pages_per_domain ({})",
            config.max_known_urls, config.max_pages_per_domain
        )));
    }

    if config.request_timeout_secs < 1 || config.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_secs must be between 1 and 300, got {}",
            config.request_timeout_secs
        )));
    }

    if config.inbox_poll_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "inbox_poll_ms must be >= 10ms, got {}ms",
            config.inbox_poll_ms
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let (local, domain) = email.split_once('@').ok_or_else(|| {
        ConfigError::Validation(format!("Invalid email format: '{}'", email))
    })?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
