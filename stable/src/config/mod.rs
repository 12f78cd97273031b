mod error;
mod stable_toml;

pub use error::*;
pub use stable_toml::*;
