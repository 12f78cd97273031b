//! Ruby version selection for backing processes.
//!
//! Installing version managers or Ruby itself is left to the user; this module only
//! detects which manager is present, what version a project wants, and how to run a
//! command under that version.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::tools::which;

const RUBY_VERSION_FILE: &str = ".ruby-version";
const RUBY_GEMSET_FILE: &str = ".ruby-gemset";

/// Ruby version manager available to the login shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionManager {
    /// RVM, sourced from its script when it is not on PATH
    Rvm { script: Option<PathBuf> },
    Rbenv,
    None,
}

impl VersionManager {
    /// Find the version manager the way the start shell will see it.
    pub fn detect() -> Self {
        let script = dirs::home_dir()
            .map(|home| home.join(".rvm").join("scripts").join("rvm"))
            .filter(|p| p.is_file());
        if which("rvm").is_some() || script.is_some() {
            return Self::Rvm { script };
        }
        if which("rbenv").is_some() {
            return Self::Rbenv;
        }
        Self::None
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rvm { .. } => "rvm",
            Self::Rbenv => "rbenv",
            Self::None => "none",
        }
    }

    /// Shell prefix that runs the following command under `version`.
    ///
    /// `None` when no version is requested or no manager is available.
    pub fn command_prefix(&self, version: Option<&str>, gemset: Option<&str>) -> Option<String> {
        let version = version.map(str::trim).filter(|v| !v.is_empty())?;
        match self {
            Self::Rvm { script } => {
                let selector = match gemset {
                    Some(gemset) => format!("{version}@{gemset}"),
                    None => version.to_string(),
                };
                Some(match script {
                    Some(script) => format!(
                        "source {} && rvm {selector} do",
                        shell_quote(&script.to_string_lossy())
                    ),
                    None => format!("rvm {selector} do"),
                })
            }
            Self::Rbenv => Some(format!("RBENV_VERSION={version}")),
            Self::None => {
                tracing::warn!(version, "no Ruby version manager found, using the default ruby");
                None
            }
        }
    }

    /// Whether `version` is installed under this manager.
    pub fn has_version(&self, version: &str) -> bool {
        let listing = match self {
            Self::Rvm { .. } => login_shell_output("rvm list strings"),
            Self::Rbenv => Command::new("rbenv")
                .args(["versions", "--bare"])
                .stderr(Stdio::null())
                .output()
                .ok()
                .filter(|o| o.status.success())
                .map(|o| String::from_utf8_lossy(&o.stdout).to_string()),
            Self::None => None,
        };
        listing.is_some_and(|out| version_listed(&out, version))
    }
}

fn login_shell_output(script: &str) -> Option<String> {
    Command::new("bash")
        .args(["-lc", script])
        .stderr(Stdio::null())
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).to_string())
}

fn version_listed(listing: &str, version: &str) -> bool {
    let wanted = version.trim().trim_start_matches("ruby-");
    listing
        .lines()
        .map(|line| line.trim().trim_start_matches("ruby-"))
        .any(|v| v == wanted)
}

/// Single-quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Ruby version a project asks for, from `.ruby-version` or the Gemfile `ruby` line.
pub fn detect_runtime_version(project: &Path) -> Option<String> {
    if let Ok(content) = fs::read_to_string(project.join(RUBY_VERSION_FILE)) {
        let version = content.trim();
        if !version.is_empty() {
            return Some(version.to_string());
        }
    }

    let gemfile = fs::read_to_string(project.join("Gemfile")).ok()?;
    gemfile.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix("ruby")?;
        let rest = rest.trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        let version = inner[..end].trim();
        (!version.is_empty()).then(|| version.to_string())
    })
}

/// RVM gemset named in the project's `.ruby-gemset`.
pub fn gemset_for(project: &Path) -> Option<String> {
    let content = fs::read_to_string(project.join(RUBY_GEMSET_FILE)).ok()?;
    let gemset = content.trim();
    (!gemset.is_empty()).then(|| gemset.to_string())
}

/// Pin the project to `version` by writing `.ruby-version`.
pub fn write_runtime_version(project: &Path, version: &str) -> io::Result<()> {
    crate::fs_util::atomic_write(
        &project.join(RUBY_VERSION_FILE),
        format!("{}\n", version.trim()).as_bytes(),
    )
}
