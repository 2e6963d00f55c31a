use crate::error::ConfigError;

use super::Settings;

pub trait Format<'a> {
    /// Set the input document
    fn set_input(&mut self, input: &'a str);

    /// Parse the provided document into raw settings
    fn parse(&self) -> Result<Settings, ConfigError>;

    /// Convert the settings to a string representation
    fn to_format_string(&self, settings: &Settings) -> Result<String, ConfigError>;

    /// Get the file extension for the format
    fn extension(&self) -> &'static str;
}
