use std::path::Path;

use crate::error::ConfigError;

use super::{Format, Settings};

#[derive(Default)]
pub struct Toml<'a> {
    input: &'a str,
}

impl<'a> Toml<'a> {
    pub fn new(input: &'a str) -> Self {
        Toml { input }
    }
}

impl<'a> From<&'a str> for Toml<'a> {
    fn from(input: &'a str) -> Self {
        Toml::new(input)
    }
}

impl<'a> Format<'a> for Toml<'a> {
    fn set_input(&mut self, input: &'a str) {
        self.input = input
    }

    fn parse(&self) -> Result<Settings, ConfigError> {
        toml::from_str(self.input).map_err(|e| ConfigError::ParseError {
            field: "root".to_string(),
            message: format!("Failed to parse TOML configuration: {e}"),
        })
    }

    fn to_format_string(&self, settings: &Settings) -> Result<String, ConfigError> {
        toml::to_string(settings).map_err(|e| ConfigError::ParseError {
            field: "root".to_string(),
            message: format!("Failed to convert settings to a TOML string: {e}"),
        })
    }

    fn extension(&self) -> &'static str {
        "toml"
    }
}

/// Reads and parses a TOML settings file
pub fn read_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    Toml::from(input.as_str()).parse()
}
