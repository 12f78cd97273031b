//! Creating a new project from the framework's generator.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::config::AppsConfig;
use crate::runtime::{VersionManager, shell_quote};
use crate::tools::{self, ToolError};

#[derive(Debug, Error)]
pub enum ScaffoldError {
    #[error("{0} already exists")]
    Exists(PathBuf),

    #[error("apps.scaffold_command is empty")]
    NoCommand,

    #[error(transparent)]
    Tool(#[from] ToolError),
}

pub type Result<T> = std::result::Result<T, ScaffoldError>;

pub trait Scaffolder {
    /// Generate a project named `name` at `path`, which must not exist yet.
    fn scaffold(&self, name: &str, path: &Path, runtime_version: Option<&str>) -> Result<()>;
}

/// Runs the configured `scaffold_command` through the login shell.
pub struct ShellScaffolder<'a> {
    config: &'a AppsConfig,
    runtime: VersionManager,
}

impl<'a> ShellScaffolder<'a> {
    pub fn new(config: &'a AppsConfig, runtime: VersionManager) -> Self {
        Self { config, runtime }
    }

    pub fn command(&self, name: &str, path: &Path, runtime_version: Option<&str>) -> String {
        let command = self
            .config
            .scaffold_command
            .replace("{path}", &shell_quote(&path.to_string_lossy()))
            .replace("{name}", name);
        match self.runtime.command_prefix(runtime_version, None) {
            Some(prefix) => format!("{prefix} {command}"),
            None => command,
        }
    }
}

impl Scaffolder for ShellScaffolder<'_> {
    fn scaffold(&self, name: &str, path: &Path, runtime_version: Option<&str>) -> Result<()> {
        if path.exists() {
            return Err(ScaffoldError::Exists(path.to_path_buf()));
        }
        if self.config.scaffold_command.trim().is_empty() {
            return Err(ScaffoldError::NoCommand);
        }
        let Some((program, shell_args)) = self.config.shell.split_first() else {
            return Err(ScaffoldError::NoCommand);
        };

        let command = self.command(name, path, runtime_version);
        let workdir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tracing::info!(app = name, %command, "scaffolding project");

        let status = Command::new(program)
            .args(shell_args)
            .arg(&command)
            .current_dir(workdir)
            .status()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ToolError::Missing {
                        tool: program.clone(),
                        hint: tools::install_hint(program),
                    }
                } else {
                    ToolError::Io {
                        command: command.clone(),
                        source,
                    }
                }
            })?;
        if !status.success() {
            return Err(ToolError::Failed {
                command,
                status: status.to_string(),
                stderr: String::new(),
            }
            .into());
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh_config(scaffold_command: &str) -> AppsConfig {
        AppsConfig {
            shell: vec!["sh".to_string(), "-c".to_string()],
            scaffold_command: scaffold_command.to_string(),
            ..AppsConfig::default()
        }
    }

    #[test]
    fn command_substitutes_path_and_name() {
        let config = AppsConfig::default();
        let scaffolder = ShellScaffolder::new(&config, VersionManager::None);
        assert_eq!(
            scaffolder.command("blog", Path::new("/work/blog"), None),
            "rails new /work/blog"
        );
        assert_eq!(
            scaffolder.command("blog", Path::new("/work/my apps/blog"), None),
            "rails new '/work/my apps/blog'"
        );
    }

    #[test]
    fn runs_configured_command() {
        let temp = TempDir::new().unwrap();
        let config = sh_config("mkdir {path} && touch {path}/{name}.rb");
        let scaffolder = ShellScaffolder::new(&config, VersionManager::None);
        let path = temp.path().join("blog");

        scaffolder.scaffold("blog", &path, None).unwrap();
        assert!(path.join("blog.rb").is_file());
    }

    #[test]
    fn refuses_existing_directory() {
        let temp = TempDir::new().unwrap();
        let config = sh_config("true");
        let scaffolder = ShellScaffolder::new(&config, VersionManager::None);
        let err = scaffolder.scaffold("x", temp.path(), None).unwrap_err();
        assert!(matches!(err, ScaffoldError::Exists(_)));
    }

    #[test]
    fn failing_command_is_reported() {
        let temp = TempDir::new().unwrap();
        let config = sh_config("exit 3");
        let scaffolder = ShellScaffolder::new(&config, VersionManager::None);
        let err = scaffolder
            .scaffold("blog", &temp.path().join("blog"), None)
            .unwrap_err();
        assert!(matches!(err, ScaffoldError::Tool(ToolError::Failed { .. })));
    }
}
