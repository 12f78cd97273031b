use crate::config::{self, StableConfig};
use crate::paths::StablePaths;

/// Resolved home directory and configuration, built once per invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: StablePaths,
    pub config: StableConfig,
}

impl Context {
    pub fn new(paths: StablePaths, config: StableConfig) -> Self {
        Self { paths, config }
    }

    /// Discover the home directory and read `config.toml` from it.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let paths = StablePaths::discover()?;
        let config = StableConfig::load_or_default(paths.config_file())?;
        tracing::debug!(home = %paths.root().display(), "loaded context");
        Ok(Self::new(paths, config))
    }

    pub fn save_config(&self) -> config::Result<()> {
        self.config.save_to_file(self.paths.config_file())
    }
}
