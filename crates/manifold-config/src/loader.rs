use std::collections::HashSet;
use std::path::Path;

use crate::{ConfigError, Settings, TransportSpec};

impl Settings {
    /// Load settings from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, variable expansion
    /// fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let expanded = crate::env::expand_env(&raw).map_err(ConfigError::Expansion)?;

        let settings: Self =
            toml::from_str(&expanded).map_err(|e| ConfigError::Parse(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate that the settings are internally consistent
    ///
    /// Runs on load and on every [`crate::SettingsStore::mutate`] before the
    /// snapshot swap.
    ///
    /// # Errors
    ///
    /// Returns an error on empty stdio commands, duplicate group names or
    /// ids, duplicate group members, or a dangling `routing.default_group`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_alive_interval == 0 {
            return Err(ConfigError::Invalid(
                "keep_alive_interval must be greater than 0".into(),
            ));
        }

        for (name, spec) in &self.upstreams {
            if name.is_empty() {
                return Err(ConfigError::Invalid("upstream name must not be empty".into()));
            }
            if spec.keep_alive_interval_ms == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "upstream '{name}' keep_alive_interval_ms must be greater than 0"
                )));
            }
            if name.contains("__") {
                return Err(ConfigError::Invalid(format!(
                    "upstream name '{name}' must not contain '__' (reserved for tool namespacing)"
                )));
            }
            if let TransportSpec::Stdio(stdio) = &spec.transport {
                if stdio.command.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "stdio upstream '{name}' is missing a command"
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for group in &self.groups {
            if group.name == "$smart" {
                return Err(ConfigError::Invalid(
                    "'$smart' is reserved for the smart scope".into(),
                ));
            }
            if !names.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
            if !ids.insert(group.id) {
                return Err(ConfigError::Invalid(format!("duplicate group id '{}'", group.id)));
            }

            let mut members = HashSet::new();
            for server in &group.servers {
                if !members.insert(server.upstream.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "group '{}' references upstream '{}' more than once",
                        group.name, server.upstream
                    )));
                }
                // Dangling references are legal (the resolver skips them) but
                // usually a typo, so they are called out.
                if !self.upstreams.contains_key(&server.upstream) {
                    tracing::warn!(
                        group = %group.name,
                        upstream = %server.upstream,
                        "group references an unknown upstream"
                    );
                }
            }
        }

        if let Some(default_group) = &self.routing.default_group {
            if self.find_group(default_group).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "routing.default_group '{default_group}' does not exist"
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.telemetry.as_ref().map_or(1.0, |t| t.sampling_rate)) {
            return Err(ConfigError::Invalid(
                "telemetry.sampling_rate must be within [0, 1]".into(),
            ));
        }

        Ok(())
    }
}
