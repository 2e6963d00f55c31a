use thiserror::Error;

#[derive(Error, Debug)]
pub(crate) enum CliError {
    #[error("Unsupported configuration file `{0}`, expected a .toml file")]
    UnsupportedFormat(String),

    #[error("The server URL is required, pass --url or set SERVER_URL")]
    MissingUrl,

    #[error("{0}")]
    Config(#[from] portico::error::ConfigError),

    #[error("{0}")]
    Server(#[from] portico::error::ServerError),
}
