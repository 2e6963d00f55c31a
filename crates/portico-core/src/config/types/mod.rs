mod config;
mod log;
mod ssl;

pub use self::config::*;
pub use self::log::*;
pub use self::ssl::*;
