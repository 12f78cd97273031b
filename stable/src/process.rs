//! Backing process lifecycle.
//!
//! Processes are launched detached and never waited on after the start window. The
//! registry records the PID of whatever process ends up listening on the app's port,
//! which is usually not the shell that was spawned.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use stable_core::{App, AppUpdate};
use thiserror::Error;

use crate::config::AppsConfig;
use crate::probe::{ProbeError, SystemProbe};
use crate::registry::{AppRegistry, RegistryError};
use crate::runtime::{VersionManager, gemset_for, shell_quote};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const LOG_TAIL_LINES: usize = 20;
/// Address the backing process binds to
pub const BIND_HOST: &str = "127.0.0.1";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Project directory {0} does not exist")]
    MissingPath(PathBuf),

    #[error("Failed to open log file {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} exited ({status}) before binding its port. Check {}{}", .log.display(), format_tail(.tail))]
    LaunchFailed {
        name: String,
        status: String,
        log: PathBuf,
        tail: String,
    },

    #[error("{name} did not bind port {port} within {secs}s. Check {}", .log.display())]
    StartTimeout {
        name: String,
        port: u16,
        secs: u64,
        log: PathBuf,
    },

    #[error("Port {port} is already in use by another process; {name} cannot start on it")]
    PortBusy { name: String, port: u16 },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

fn format_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{tail}")
    }
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// PIDs signalled by [`ProcessManager::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    pub signalled: Vec<u32>,
}

impl StopOutcome {
    pub fn was_running(&self) -> bool {
        !self.signalled.is_empty()
    }
}

/// What is currently serving an app's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningState {
    /// The registry's PID is alive
    Tracked(u32),
    /// An untracked process owns the port and is now recorded
    Adopted(u32),
}

impl RunningState {
    pub fn pid(self) -> u32 {
        match self {
            Self::Tracked(pid) | Self::Adopted(pid) => pid,
        }
    }
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Starts, stops and reconciles backing processes.
pub struct ProcessManager<'a> {
    registry: &'a AppRegistry,
    probe: &'a dyn SystemProbe,
    config: &'a AppsConfig,
    runtime: VersionManager,
}

impl<'a> ProcessManager<'a> {
    pub fn new(
        registry: &'a AppRegistry,
        probe: &'a dyn SystemProbe,
        config: &'a AppsConfig,
        runtime: VersionManager,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
            runtime,
        }
    }

    pub fn log_file(&self, app: &App) -> PathBuf {
        app.path.join(&self.config.log_file)
    }

    /// Full shell command that runs the app's server.
    pub fn start_command(&self, app: &App) -> String {
        let command = self
            .config
            .start_command
            .replace("{port}", &app.port.to_string())
            .replace("{host}", BIND_HOST);
        let gemset = gemset_for(&app.path);
        match self
            .runtime
            .command_prefix(app.runtime_version.as_deref(), gemset.as_deref())
        {
            Some(prefix) => format!("{prefix} {command}"),
            None => command,
        }
    }

    /// Launch the app and wait for it to bind its port.
    ///
    /// On success the registry records the listening PID. On failure the registry is
    /// left as it was.
    pub fn start(&self, app: &App) -> Result<u32> {
        if !app.path.is_dir() {
            return Err(ProcessError::MissingPath(app.path.clone()));
        }

        let log_path = self.log_file(app);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).map_err(|source| ProcessError::Log {
                path: log_path.clone(),
                source,
            })?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|source| ProcessError::Log {
                path: log_path.clone(),
                source,
            })?;
        let log_offset = log.metadata().map(|m| m.len()).unwrap_or(0);
        let log_err = log.try_clone().map_err(|source| ProcessError::Log {
            path: log_path.clone(),
            source,
        })?;

        let script = self.start_command(app);
        let Some((program, shell_args)) = self.config.shell.split_first() else {
            return Err(ProcessError::Spawn {
                command: script,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "apps.shell is empty",
                ),
            });
        };
        let command_line = format!(
            "{} {}",
            self.config.shell.join(" "),
            shell_quote(&script)
        );

        let mut command = Command::new(program);
        command
            .args(shell_args)
            .arg(&script)
            .current_dir(&app.path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::info!(app = %app.name, port = app.port, command = %command_line, "launching app");
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let spawned_pid = child.id();

        let timeout = self.config.start_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            if self.probe.is_port_open(app.port) {
                break;
            }
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ProcessError::LaunchFailed {
                    name: app.name.clone(),
                    status: status.to_string(),
                    tail: read_log_tail(&log_path, log_offset),
                    log: log_path,
                });
            }
            if Instant::now() >= deadline {
                tracing::warn!(app = %app.name, pid = spawned_pid, "app did not bind its port in time");
                return Err(ProcessError::StartTimeout {
                    name: app.name.clone(),
                    port: app.port,
                    secs: timeout.as_secs(),
                    log: log_path,
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let pid = self.listener_pid(app.port).unwrap_or(spawned_pid);
        self.registry
            .update(&app.name, AppUpdate::running(pid, now_unix()))?;
        tracing::info!(app = %app.name, pid, port = app.port, "app is listening");
        Ok(pid)
    }

    /// Signal every process listening on the app's port and mark the app stopped.
    pub fn stop(&self, app: &App) -> Result<StopOutcome> {
        let pids = match self.probe.pids_listening_on(app.port) {
            Ok(pids) => pids,
            Err(e) => {
                tracing::warn!(app = %app.name, error = %e, "could not list listeners, falling back to the recorded pid");
                app.pid()
                    .filter(|pid| self.probe.pid_alive(*pid))
                    .into_iter()
                    .collect()
            }
        };

        let mut outcome = StopOutcome::default();
        for pid in pids {
            match self.probe.terminate(pid) {
                Ok(true) => outcome.signalled.push(pid),
                Ok(false) => tracing::debug!(pid, "process already gone"),
                Err(e) => tracing::warn!(pid, error = %e, "failed to signal process"),
            }
        }

        self.registry.update(&app.name, AppUpdate::stopped())?;
        if outcome.was_running() {
            tracing::info!(app = %app.name, pids = ?outcome.signalled, "stopped app");
        } else {
            tracing::debug!(app = %app.name, port = app.port, "nothing listening");
        }
        Ok(outcome)
    }

    pub fn pid_alive(&self, pid: u32) -> bool {
        self.probe.pid_alive(pid)
    }

    /// Clear the process state of every app whose recorded PID is dead.
    ///
    /// Returns the names of the apps that were healed.
    pub fn validate_statuses(&self) -> Result<Vec<String>> {
        let mut healed = Vec::new();
        for app in self.registry.all()? {
            let Some(pid) = app.pid() else {
                continue;
            };
            if self.probe.pid_alive(pid) {
                continue;
            }
            tracing::info!(app = %app.name, pid, "clearing stale process state");
            self.registry.update(&app.name, AppUpdate::stopped())?;
            healed.push(app.name);
        }
        Ok(healed)
    }

    /// Whether the app is already being served, adopting an untracked listener.
    ///
    /// A port held by a process that cannot be identified is reported as
    /// [`ProcessError::PortBusy`].
    pub fn running_state(&self, app: &App) -> Result<Option<RunningState>> {
        if let Some(pid) = app.pid()
            && self.probe.pid_alive(pid)
        {
            return Ok(Some(RunningState::Tracked(pid)));
        }
        if !self.probe.is_port_open(app.port) {
            return Ok(None);
        }
        let Some(pid) = self.listener_pid(app.port) else {
            return Err(ProcessError::PortBusy {
                name: app.name.clone(),
                port: app.port,
            });
        };
        self.registry
            .update(&app.name, AppUpdate::running(pid, now_unix()))?;
        tracing::info!(app = %app.name, pid, "adopted running process");
        Ok(Some(RunningState::Adopted(pid)))
    }

    /// Wait until nothing accepts connections on `port`, up to `timeout`.
    pub fn wait_for_port_release(&self, port: u16, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.probe.is_port_open(port) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        true
    }

    fn listener_pid(&self, port: u16) -> Option<u32> {
        match self.probe.pids_listening_on(port) {
            Ok(pids) => pids.first().copied(),
            Err(e) => {
                tracing::warn!(port, error = %e, "could not discover listening pid");
                None
            }
        }
    }
}

/// Last lines written to `path` after byte `offset`.
fn read_log_tail(path: &Path, offset: u64) -> String {
    let Ok(mut file) = fs::File::open(path) else {
        return String::new();
    };
    if file.seek(SeekFrom::Start(offset)).is_err() {
        return String::new();
    }
    let mut bytes = Vec::new();
    if file.read_to_end(&mut bytes).is_err() {
        return String::new();
    }
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}
