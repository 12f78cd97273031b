use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

/// Errors from invoking an external program
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{tool}` was not found on PATH. {hint}")]
    Missing { tool: String, hint: String },

    #[error("`{command}` failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("failed to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Install hint shown when `tool` is missing.
pub fn install_hint(tool: &str) -> String {
    let base = Path::new(tool)
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or(tool);
    match base {
        "caddy" => "Install it with `brew install caddy` or from https://caddyserver.com/docs/install".to_string(),
        "mkcert" => "Install it with `brew install mkcert nss` and run `mkcert -install`".to_string(),
        "sudo" => "Run the command as root, or install sudo".to_string(),
        "lsof" => "Install lsof with your system package manager".to_string(),
        "rails" => "Install Rails with `gem install rails`".to_string(),
        other => format!("Install `{other}` and make sure it is on PATH"),
    }
}

/// Resolve `program` to an executable path by walking PATH entries.
pub fn which(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let candidate = PathBuf::from(program);
        return is_executable(&candidate).then_some(candidate);
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Resolve `tool` or fail with an install hint.
pub fn require(tool: &str) -> Result<PathBuf> {
    which(tool).ok_or_else(|| ToolError::Missing {
        tool: tool.to_string(),
        hint: install_hint(tool),
    })
}

/// Render a command line for messages.
pub fn display_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(AsRef::as_ref))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `program args...` to completion, failing on a non-zero exit.
pub fn run_checked<S: AsRef<OsStr> + AsRef<str>>(program: &str, args: &[S]) -> Result<Output> {
    let command = display_command(program, args);
    tracing::debug!(%command, "running");
    let output = Command::new(program)
        .args(args.iter().map(|a| AsRef::<OsStr>::as_ref(a)))
        .output()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::Missing {
                    tool: program.to_string(),
                    hint: install_hint(program),
                }
            } else {
                ToolError::Io {
                    command: command.clone(),
                    source,
                }
            }
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(ToolError::Failed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn which_finds_sh() {
        #[cfg(unix)]
        assert!(which("sh").is_some());
    }

    #[test]
    fn which_rejects_unknown_program() {
        assert!(which("stable-definitely-not-a-real-tool").is_none());
    }

    #[test]
    fn require_reports_hint() {
        let err = require("stable-definitely-not-a-real-tool").unwrap_err();
        assert!(matches!(err, ToolError::Missing { .. }));
        assert!(err.to_string().contains("make sure it is on PATH"));
    }

    #[test]
    fn install_hint_uses_binary_name() {
        assert!(install_hint("/opt/homebrew/bin/caddy").contains("caddyserver.com"));
        assert!(install_hint("mkcert").contains("mkcert -install"));
    }

    #[test]
    fn display_command_joins_args() {
        assert_eq!(
            display_command("caddy", &["fmt", "--overwrite", "Caddyfile"]),
            "caddy fmt --overwrite Caddyfile"
        );
    }

    #[cfg(unix)]
    #[test]
    fn run_checked_maps_failures() {
        assert!(run_checked("true", &[] as &[&str]).is_ok());

        let err = run_checked("sh", &["-c", "echo boom >&2; exit 3"]).unwrap_err();
        let ToolError::Failed { stderr, .. } = err else {
            panic!("expected Failed");
        };
        assert_eq!(stderr, "boom");

        let err = run_checked("stable-definitely-not-a-real-tool", &["x"]).unwrap_err();
        assert!(matches!(err, ToolError::Missing { .. }));
    }
}
