use std::fs::OpenOptions;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::tools::{self, ToolError};

/// Control surface of the reverse proxy daemon.
pub trait ProxyTool {
    /// Whether the proxy binary can be found.
    fn available(&self) -> bool;

    /// Rewrite the config file in the tool's canonical formatting.
    fn format(&self, config: &Path) -> tools::Result<()>;

    /// Ask the running daemon to load `config`.
    fn reload(&self, config: &Path) -> tools::Result<()>;

    /// Launch the daemon detached with `config`, sending its output to `log`.
    fn run_detached(&self, config: &Path, log: &Path) -> tools::Result<u32>;
}

/// The `caddy` command line.
#[derive(Debug, Clone)]
pub struct CaddyCli {
    binary: String,
}

impl CaddyCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn require(&self) -> tools::Result<()> {
        tools::require(&self.binary).map(|_| ())
    }
}

impl ProxyTool for CaddyCli {
    fn available(&self) -> bool {
        tools::which(&self.binary).is_some()
    }

    fn format(&self, config: &Path) -> tools::Result<()> {
        self.require()?;
        let config = config.to_string_lossy();
        tools::run_checked(&self.binary, &["fmt", "--overwrite", config.as_ref()])?;
        Ok(())
    }

    fn reload(&self, config: &Path) -> tools::Result<()> {
        self.require()?;
        let config = config.to_string_lossy();
        tools::run_checked(
            &self.binary,
            &["reload", "--config", config.as_ref(), "--adapter", "caddyfile"],
        )?;
        Ok(())
    }

    fn run_detached(&self, config: &Path, log: &Path) -> tools::Result<u32> {
        self.require()?;
        let command = format!(
            "{} run --config {} --adapter caddyfile",
            self.binary,
            config.display()
        );
        let io_error = |source| ToolError::Io {
            command: command.clone(),
            source,
        };

        if let Some(parent) = log.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log)
            .map_err(io_error)?;
        let stderr = stdout.try_clone().map_err(io_error)?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("run")
            .arg("--config")
            .arg(config)
            .args(["--adapter", "caddyfile"])
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(io_error)?;
        tracing::info!(pid = child.id(), log = %log.display(), "launched caddy");
        Ok(child.id())
    }
}
