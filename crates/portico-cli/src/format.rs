use std::path::Path;

use clap::ValueEnum;
use portico::{
    Settings,
    config::{Format, toml},
    error::ConfigError,
};

#[derive(ValueEnum, Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum FormatType {
    /// TOML format
    #[default]
    Toml,
}

impl FormatType {
    /// Picks the format from the file extension, TOML when there is none
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            None => Some(FormatType::Toml),
            Some(ext) => FormatType::value_variants()
                .iter()
                .copied()
                .find(|format| format.format("").extension().eq_ignore_ascii_case(ext)),
        }
    }

    /// Get the associated format for the type
    pub fn format<'a>(&self, input: &'a str) -> Box<dyn Format<'a> + 'a> {
        match self {
            FormatType::Toml => Box::new(toml::Toml::from(input)),
        }
    }

    /// Reads the settings file at `path` in this format
    pub fn read(&self, path: &Path) -> Result<Settings, ConfigError> {
        match self {
            FormatType::Toml => toml::read_settings(path),
        }
    }
}
