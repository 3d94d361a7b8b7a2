//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BraidConfig, DedupConfig, DispatchConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &BraidConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_dedup_config(&config.dedup)?;
    validate_component_sections(config)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File
        && logging
            .file_path
            .as_ref()
            .is_none_or(|p| p.as_os_str().is_empty())
    {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is 'file'",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter target: {module:?}"
        )));
    }

    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    // Surfaces UnknownStrategy.
    dispatch.router_options()?;

    if dispatch.call_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "dispatch.call_timeout_ms must be greater than 0",
        ));
    }

    if let Some(name) = &dispatch.default_backend
        && name.trim().is_empty()
    {
        return Err(ConfigError::validation(
            "dispatch.default_backend must not be empty",
        ));
    }

    Ok(())
}

fn validate_dedup_config(dedup: &DedupConfig) -> ConfigResult<()> {
    if dedup.window_ms == 0 {
        return Err(ConfigError::validation(
            "dedup.window_ms must be greater than 0",
        ));
    }

    if dedup.content_prefix_len == 0 {
        return Err(ConfigError::validation(
            "dedup.content_prefix_len must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_component_sections(config: &BraidConfig) -> ConfigResult<()> {
    if let Some(name) = config.components.keys().find(|n| n.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid component section name: {name:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::ConfigurationError;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&BraidConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_unknown_strategy() {
        let mut config = BraidConfig::default();
        config.dispatch.strategy = "least-loaded".to_string();

        let result = validate_config(&config);
        assert!(matches!(
            result,
            Err(ConfigError::Core(ConfigurationError::UnknownStrategy(ref s))) if s == "least-loaded"
        ));
    }

    #[test]
    fn test_validate_zero_values() {
        let mut config = BraidConfig::default();
        config.dispatch.call_timeout_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));

        let mut config = BraidConfig::default();
        config.dedup.window_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = BraidConfig::default();
        config.dedup.content_prefix_len = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_default_backend() {
        let mut config = BraidConfig::default();
        config.dispatch.default_backend = Some("  ".to_string());
        assert!(validate_config(&config).is_err());

        config.dispatch.default_backend = Some("primary".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = BraidConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("logs/braid.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
