//! Static host aliases in the system hosts file.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::HostsConfig;
use crate::fs_util::atomic_write;
use crate::tools::{self, ToolError};

pub const LOOPBACK: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied updating {path}. Run this manually:\n  {remedy}")]
    PermissionDenied {
        path: PathBuf,
        remedy: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

pub type Result<T> = std::result::Result<T, HostsError>;

/// Installs a staged file over a path the current user cannot write.
pub trait Elevator {
    fn install(&self, staged: &Path, target: &Path) -> tools::Result<()>;
}

/// `sudo install -m 644 {staged} {target}`, prompting on the terminal if needed.
#[derive(Debug, Clone)]
pub struct SudoElevator {
    program: String,
}

impl SudoElevator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Elevator for SudoElevator {
    fn install(&self, staged: &Path, target: &Path) -> tools::Result<()> {
        tools::require(&self.program)?;
        let staged = staged.to_string_lossy();
        let target = target.to_string_lossy();
        let args = ["install", "-m", "644", staged.as_ref(), target.as_ref()];
        let command = tools::display_command(&self.program, &args);

        let status = Command::new(&self.program)
            .args(args)
            .status()
            .map_err(|source| ToolError::Io {
                command: command.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                command,
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}

pub struct HostsManager<'a> {
    file: PathBuf,
    elevate_with: &'a str,
    elevator: &'a dyn Elevator,
    force_elevation: bool,
}

impl<'a> HostsManager<'a> {
    pub fn new(config: &'a HostsConfig, elevator: &'a dyn Elevator) -> Self {
        Self {
            file: config.file.clone(),
            elevate_with: &config.elevate_with,
            elevator,
            force_elevation: false,
        }
    }

    #[cfg(test)]
    fn always_elevate(mut self) -> Self {
        self.force_elevation = true;
        self
    }

    pub fn contains(&self, domain: &str) -> Result<bool> {
        Ok(has_entry(&self.read()?, domain))
    }

    /// Map `domain` to the loopback address. Returns `false` when an entry
    /// already exists.
    pub fn add(&self, domain: &str) -> Result<bool> {
        let mut content = self.read()?;
        if has_entry(&content, domain) {
            tracing::debug!(domain, "hosts entry already present");
            return Ok(false);
        }

        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("{LOOPBACK}\t{domain}\n"));

        let remedy = format!(
            "echo \"{LOOPBACK} {domain}\" | {} tee -a {}",
            self.elevate_with,
            self.file.display()
        );
        self.write(&content, remedy)?;
        tracing::info!(domain, file = %self.file.display(), "hosts entry added");
        flush_dns_cache();
        Ok(true)
    }

    /// Drop every line naming `domain`. Returns `false` when there was none.
    pub fn remove(&self, domain: &str) -> Result<bool> {
        let content = self.read()?;
        if !has_entry(&content, domain) {
            tracing::debug!(domain, "no hosts entry to remove");
            return Ok(false);
        }

        let kept: String = content
            .split_inclusive('\n')
            .filter(|line| !line_names(line, domain))
            .collect();

        let remedy = format!(
            "{} sed -i.bak '/[[:space:]]{}$/d' {}",
            self.elevate_with,
            domain.replace('.', "\\."),
            self.file.display()
        );
        self.write(&kept, remedy)?;
        tracing::info!(domain, file = %self.file.display(), "hosts entry removed");
        flush_dns_cache();
        Ok(true)
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.file) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(source) => Err(HostsError::Read {
                path: self.file.clone(),
                source,
            }),
        }
    }

    fn write(&self, content: &str, remedy: String) -> Result<()> {
        if !self.force_elevation && (is_root() || is_writable(&self.file)) {
            match atomic_write(&self.file, content.as_bytes()) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    tracing::debug!(file = %self.file.display(), "direct write denied, elevating");
                }
                Err(source) => {
                    return Err(HostsError::Write {
                        path: self.file.clone(),
                        source,
                    });
                }
            }
        }

        let staged = self.stage(content)?;
        match self.elevator.install(staged.path(), &self.file) {
            Ok(()) => Ok(()),
            Err(missing @ ToolError::Missing { .. }) => Err(missing.into()),
            Err(source) => Err(HostsError::PermissionDenied {
                path: self.file.clone(),
                remedy,
                source,
            }),
        }
    }

    fn stage(&self, content: &str) -> Result<NamedTempFile> {
        let write_error = |source| HostsError::Write {
            path: self.file.clone(),
            source,
        };
        let mut staged = NamedTempFile::new().map_err(write_error)?;
        staged.write_all(content.as_bytes()).map_err(write_error)?;
        staged.flush().map_err(write_error)?;
        Ok(staged)
    }
}

fn has_entry(content: &str, domain: &str) -> bool {
    content.lines().any(|line| line_names(line, domain))
}

/// Whether a hosts line maps `domain`, ignoring comments.
fn line_names(line: &str, domain: &str) -> bool {
    let active = line.split('#').next().unwrap_or_default();
    active
        .split_whitespace()
        .skip(1)
        .any(|host| host.eq_ignore_ascii_case(domain))
}

fn is_writable(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    OpenOptions::new().append(true).open(path).is_ok()
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

#[cfg(target_os = "macos")]
fn flush_dns_cache() {
    for (program, args) in [
        ("dscacheutil", &["-flushcache"][..]),
        ("killall", &["-HUP", "mDNSResponder"][..]),
    ] {
        if let Err(e) = tools::run_checked(program, args) {
            tracing::warn!("DNS cache flush failed: {e}");
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn flush_dns_cache() {}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::{Cell, RefCell};
    use std::path::{Path, PathBuf};

    use super::Elevator;
    use crate::tools::{self, ToolError};

    /// Copies the staged file into place, or fails like a refused sudo.
    #[derive(Debug, Default)]
    pub struct FakeElevator {
        pub refuse: Cell<bool>,
        pub installs: RefCell<Vec<PathBuf>>,
    }

    impl Elevator for FakeElevator {
        fn install(&self, staged: &Path, target: &Path) -> tools::Result<()> {
            if self.refuse.get() {
                return Err(ToolError::Failed {
                    command: "sudo install".to_string(),
                    status: "exit status: 1".to_string(),
                    stderr: "sorry, try again".to_string(),
                });
            }
            std::fs::copy(staged, target).map_err(|source| ToolError::Io {
                command: "sudo install".to_string(),
                source,
            })?;
            self.installs.borrow_mut().push(target.to_path_buf());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeElevator;
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = "127.0.0.1\tlocalhost\n::1\tlocalhost\n# 127.0.0.1 blog.test\n";

    fn config(temp: &TempDir, content: Option<&str>) -> HostsConfig {
        let file = temp.path().join("hosts");
        if let Some(content) = content {
            fs::write(&file, content).unwrap();
        }
        HostsConfig {
            file,
            elevate_with: "sudo".to_string(),
        }
    }

    #[test]
    fn add_appends_loopback_entry() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        let hosts = HostsManager::new(&config, &elevator);

        assert!(hosts.add("blog.test").unwrap());
        assert_eq!(
            fs::read_to_string(&config.file).unwrap(),
            format!("{BASE}127.0.0.1\tblog.test\n")
        );
        assert!(elevator.installs.borrow().is_empty());
    }

    #[test]
    fn add_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        let hosts = HostsManager::new(&config, &elevator);

        hosts.add("blog.test").unwrap();
        assert!(!hosts.add("blog.test").unwrap());
        assert!(!hosts.add("BLOG.test").unwrap());
        let content = fs::read_to_string(&config.file).unwrap();
        assert_eq!(content.matches("\tblog.test").count(), 1);
    }

    #[test]
    fn commented_entries_do_not_count() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        let hosts = HostsManager::new(&config, &elevator);
        assert!(!hosts.contains("blog.test").unwrap());
    }

    #[test]
    fn substring_domains_are_distinct() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some("127.0.0.1\tmyblog.test\n"));
        let elevator = FakeElevator::default();
        let hosts = HostsManager::new(&config, &elevator);

        assert!(hosts.add("blog.test").unwrap());
        assert!(hosts.remove("blog.test").unwrap());
        assert_eq!(
            fs::read_to_string(&config.file).unwrap(),
            "127.0.0.1\tmyblog.test\n"
        );
    }

    #[test]
    fn add_fixes_missing_trailing_newline() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some("127.0.0.1 localhost"));
        let elevator = FakeElevator::default();
        HostsManager::new(&config, &elevator).add("a.test").unwrap();
        assert_eq!(
            fs::read_to_string(&config.file).unwrap(),
            "127.0.0.1 localhost\n127.0.0.1\ta.test\n"
        );
    }

    #[test]
    fn add_creates_missing_file() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, None);
        let elevator = FakeElevator::default();
        HostsManager::new(&config, &elevator).add("a.test").unwrap();
        assert_eq!(fs::read_to_string(&config.file).unwrap(), "127.0.0.1\ta.test\n");
    }

    #[test]
    fn remove_absent_domain_does_not_write() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        elevator.refuse.set(true);
        let hosts = HostsManager::new(&config, &elevator).always_elevate();

        assert!(!hosts.remove("blog.test").unwrap());
        assert_eq!(fs::read_to_string(&config.file).unwrap(), BASE);
    }

    #[test]
    fn remove_on_missing_file_is_noop() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, None);
        let elevator = FakeElevator::default();
        assert!(!HostsManager::new(&config, &elevator).remove("a.test").unwrap());
        assert!(!config.file.exists());
    }

    #[test]
    fn elevated_write_goes_through_elevator() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        let hosts = HostsManager::new(&config, &elevator).always_elevate();

        hosts.add("blog.test").unwrap();
        hosts.remove("blog.test").unwrap();
        assert_eq!(elevator.installs.borrow().len(), 2);
        assert_eq!(fs::read_to_string(&config.file).unwrap(), BASE);
    }

    #[test]
    fn refused_elevation_reports_manual_remedy() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = FakeElevator::default();
        elevator.refuse.set(true);
        let hosts = HostsManager::new(&config, &elevator).always_elevate();

        let err = hosts.add("blog.test").unwrap_err();
        let HostsError::PermissionDenied { remedy, .. } = &err else {
            panic!("expected PermissionDenied, got {err}");
        };
        assert!(remedy.contains("127.0.0.1 blog.test"));
        assert!(remedy.contains("sudo tee -a"));
        assert_eq!(fs::read_to_string(&config.file).unwrap(), BASE);
    }

    #[test]
    fn missing_elevation_helper_is_tool_missing() {
        let temp = TempDir::new().unwrap();
        let config = config(&temp, Some(BASE));
        let elevator = SudoElevator::new("stable-test-no-such-sudo");
        let hosts = HostsManager::new(&config, &elevator).always_elevate();

        let err = hosts.add("blog.test").unwrap_err();
        assert!(matches!(err, HostsError::Tool(ToolError::Missing { .. })));
    }
}
