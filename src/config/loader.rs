//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::EdgeConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Environment variable names consulted by [`apply_env_overrides`].
pub mod env {
    pub const AUTH_DISABLED: &str = "AUTH_DISABLED";
    pub const APP_URL: &str = "APP_URL";
    pub const ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
    pub const BIND_ADDRESS: &str = "EDGE_BIND_ADDRESS";
}

/// Load and validate configuration.
///
/// With no path the built-in defaults are used. Environment overrides are
/// applied before validation so a bad variable fails startup the same way a
/// bad file does.
pub fn load_config(path: Option<&Path>) -> Result<EdgeConfig, ConfigError> {
    let config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            parse_config(&content)?
        }
        None => EdgeConfig::default(),
    };

    let config = apply_env_overrides(config, |name| std::env::var(name).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML document into a configuration without validating it.
pub fn parse_config(content: &str) -> Result<EdgeConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Overlay environment values onto a configuration.
///
/// `lookup` abstracts the environment so tests can inject values.
pub fn apply_env_overrides<F>(mut config: EdgeConfig, lookup: F) -> EdgeConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env::AUTH_DISABLED) {
        config.auth.disabled = parse_flag(&value);
    }

    if let Some(value) = lookup(env::APP_URL) {
        let value = value.trim();
        config.cors.app_url = (!value.is_empty()).then(|| value.to_string());
    }

    if let Some(value) = lookup(env::ALLOWED_ORIGINS) {
        config.cors.allowed_origins = value
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(|origin| origin.trim_end_matches('/').to_string())
            .collect();
    }

    if let Some(value) = lookup(env::BIND_ADDRESS) {
        config.listener.bind_address = value;
    }

    config
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = parse_config(
            r#"
            [auth]
            disabled = true

            [rate_limits.kb]
            max = 5
            window_ms = 60000
            "#,
        )
        .unwrap();

        assert!(config.auth.disabled);
        assert_eq!(config.rate_limits.kb.max, 5);
        // untouched sections keep defaults
        assert_eq!(config.rate_limits.deploy.max, 5);
        assert_eq!(config.cors.max_age_secs, 86_400);
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = EdgeConfig::default();
        config.cors.app_url = Some("https://old.example.com".into());

        let config = apply_env_overrides(
            config,
            lookup_from(&[
                ("AUTH_DISABLED", "TRUE"),
                ("APP_URL", "https://demos.example.com"),
                ("ALLOWED_ORIGINS", "https://a.example.com, https://b.example.com/ ,"),
            ]),
        );

        assert!(config.auth.disabled);
        assert_eq!(
            config.cors.app_url.as_deref(),
            Some("https://demos.example.com")
        );
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example.com", "https://b.example.com"]
        );
    }

    #[test]
    fn test_auth_flag_values() {
        let config = apply_env_overrides(EdgeConfig::default(), lookup_from(&[("AUTH_DISABLED", "0")]));
        assert!(!config.auth.disabled);

        let config = apply_env_overrides(EdgeConfig::default(), lookup_from(&[("AUTH_DISABLED", "1")]));
        assert!(config.auth.disabled);
    }

    #[test]
    fn test_validation_error_display() {
        let err = ConfigError::Validation(vec![
            ValidationError::ZeroLimit { field: "rate_limits.kb" },
            ValidationError::InvalidApiPrefix,
        ]);
        let message = err.to_string();
        assert!(message.starts_with("Validation failed: "));
        assert!(message.contains("rate_limits.kb"));
        assert!(message.contains(", "));
    }
}
