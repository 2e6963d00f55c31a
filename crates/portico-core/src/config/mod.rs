#[cfg(feature = "toml")]
pub mod toml;

mod format;
mod types;

pub use format::*;
pub use types::*;
