//! Kernel-level view of ports and processes.
//!
//! Everything the process and port logic needs to know about the live system goes
//! through [`SystemProbe`], so that logic can run against a fake in tests.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream};
use std::time::Duration;

use thiserror::Error;

use crate::tools::{ToolError, install_hint};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to read {path}: {source}")]
    Procfs {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Ports, listeners and process liveness.
pub trait SystemProbe {
    /// Whether something accepts TCP connections on `127.0.0.1:port`.
    fn is_port_open(&self, port: u16) -> bool;

    /// PIDs holding a listening socket on `port`, sorted and deduplicated.
    fn pids_listening_on(&self, port: u16) -> Result<Vec<u32>>;

    /// Whether `pid` exists. A process we may not signal still counts as alive.
    fn pid_alive(&self, pid: u32) -> bool;

    /// Send a graceful termination signal. `Ok(false)` when the process is gone.
    fn terminate(&self, pid: u32) -> Result<bool>;
}

/// Probe backed by the running operating system.
#[derive(Debug, Clone)]
pub struct OsProbe {
    lsof: String,
}

impl OsProbe {
    pub fn new(lsof: impl Into<String>) -> Self {
        Self { lsof: lsof.into() }
    }
}

impl Default for OsProbe {
    fn default() -> Self {
        Self::new("lsof")
    }
}

impl SystemProbe for OsProbe {
    fn is_port_open(&self, port: u16) -> bool {
        // Servers bound to `localhost` may listen on only one of the two loopbacks.
        [IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]
            .into_iter()
            .any(|ip| {
                TcpStream::connect_timeout(&SocketAddr::new(ip, port), CONNECT_TIMEOUT).is_ok()
            })
    }

    fn pids_listening_on(&self, port: u16) -> Result<Vec<u32>> {
        #[cfg(target_os = "linux")]
        if std::path::Path::new("/proc/net/tcp").exists() {
            let pids = procfs::pids_listening_on(port)?;
            tracing::debug!(port, ?pids, "listening pids from procfs");
            return Ok(pids);
        }

        let pids = lsof_pids_listening_on(&self.lsof, port)?;
        tracing::debug!(port, ?pids, "listening pids from lsof");
        Ok(pids)
    }

    fn pid_alive(&self, pid: u32) -> bool {
        pid_alive(pid)
    }

    fn terminate(&self, pid: u32) -> Result<bool> {
        terminate(pid)
    }
}

fn lsof_pids_listening_on(lsof: &str, port: u16) -> Result<Vec<u32>> {
    let port_arg = format!("-iTCP:{port}");
    let output = std::process::Command::new(lsof)
        .args(["-nP", port_arg.as_str(), "-sTCP:LISTEN", "-t"])
        .output()
        .map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::Missing {
                    tool: lsof.to_string(),
                    hint: install_hint(lsof),
                }
            } else {
                ToolError::Io {
                    command: format!("{lsof} -nP {port_arg} -sTCP:LISTEN -t"),
                    source,
                }
            }
        })?;

    // lsof exits 1 when nothing matches.
    Ok(parse_pid_lines(&String::from_utf8_lossy(&output.stdout)))
}

fn parse_pid_lines(stdout: &str) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // 0 would address our own process group.
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission checks.
    let r = unsafe { libc::kill(raw, 0) };
    if r == 0 {
        return true;
    }
    matches!(
        std::io::Error::last_os_error().raw_os_error(),
        Some(code) if code == libc::EPERM
    )
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<bool> {
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return Ok(false),
    };
    // SAFETY: plain signal delivery to a single pid.
    let r = unsafe { libc::kill(raw, libc::SIGTERM) };
    if r == 0 {
        tracing::info!(pid, "sent SIGTERM");
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(ProbeError::Signal { pid, source: err })
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<bool> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .status()
        .map_err(|source| ProbeError::Signal { pid, source })?;
    Ok(status.success())
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::collections::{BTreeSet, HashSet};
    use std::fs;
    use std::path::Path;

    use super::{ProbeError, Result};

    const TCP_LISTEN: u8 = 0x0A;

    /// Socket inodes in LISTEN state bound to `port` from a `/proc/net/tcp*` table.
    pub(super) fn listening_inodes(table: &str, port: u16) -> HashSet<u64> {
        let mut inodes = HashSet::new();
        for line in table.lines().skip(1) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                continue;
            }
            let Ok(state) = u8::from_str_radix(parts[3], 16) else {
                continue;
            };
            if state != TCP_LISTEN {
                continue;
            }
            let Some((_ip, port_hex)) = parts[1].rsplit_once(':') else {
                continue;
            };
            if u16::from_str_radix(port_hex, 16).ok() != Some(port) {
                continue;
            }
            if let Ok(inode) = parts[9].parse::<u64>()
                && inode != 0
            {
                inodes.insert(inode);
            }
        }
        inodes
    }

    pub(super) fn socket_inode(link_target: &str) -> Option<u64> {
        link_target
            .strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()
    }

    pub(super) fn pids_listening_on(port: u16) -> Result<Vec<u32>> {
        let mut inodes = HashSet::new();
        for file in ["/proc/net/tcp", "/proc/net/tcp6"] {
            let path = Path::new(file);
            if !path.exists() {
                continue;
            }
            let table = fs::read_to_string(path).map_err(|source| ProbeError::Procfs {
                path: file.to_string(),
                source,
            })?;
            inodes.extend(listening_inodes(&table, port));
        }
        if inodes.is_empty() {
            return Ok(Vec::new());
        }

        let proc_dir = fs::read_dir("/proc").map_err(|source| ProbeError::Procfs {
            path: "/proc".to_string(),
            source,
        })?;

        let mut pids = BTreeSet::new();
        for entry in proc_dir.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            // Other users' fd tables are unreadable without privilege.
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(target) = fs::read_link(fd.path())
                    && let Some(inode) = target.to_str().and_then(socket_inode)
                    && inodes.contains(&inode)
                {
                    pids.insert(pid);
                    break;
                }
            }
        }
        Ok(pids.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::cell::RefCell;
    use std::collections::{BTreeMap, BTreeSet};

    use super::{Result, SystemProbe};

    /// In-memory system state for tests.
    #[derive(Debug, Default)]
    pub struct FakeProbe {
        listeners: RefCell<BTreeMap<u16, Vec<u32>>>,
        open_ports: RefCell<BTreeSet<u16>>,
        alive: RefCell<BTreeSet<u32>>,
        pending: RefCell<Vec<(u16, u32, usize)>>,
        pub terminated: RefCell<Vec<u32>>,
    }

    impl FakeProbe {
        pub fn new() -> Self {
            Self::default()
        }

        /// A live process `pid` listening on `port`.
        pub fn listen(&self, port: u16, pid: u32) {
            self.listeners.borrow_mut().entry(port).or_default().push(pid);
            self.open_ports.borrow_mut().insert(port);
            self.alive.borrow_mut().insert(pid);
        }

        /// An open port whose owner cannot be discovered.
        pub fn open_port(&self, port: u16) {
            self.open_ports.borrow_mut().insert(port);
        }

        /// `pid` binds `port` once the port has been probed `closed_checks` times.
        pub fn listen_after(&self, port: u16, pid: u32, closed_checks: usize) {
            self.pending.borrow_mut().push((port, pid, closed_checks));
        }

        pub fn spawn(&self, pid: u32) {
            self.alive.borrow_mut().insert(pid);
        }

        pub fn kill(&self, pid: u32) {
            self.alive.borrow_mut().remove(&pid);
            let mut listeners = self.listeners.borrow_mut();
            let mut open = self.open_ports.borrow_mut();
            for (port, pids) in listeners.iter_mut() {
                pids.retain(|p| *p != pid);
                if pids.is_empty() {
                    open.remove(port);
                }
            }
            listeners.retain(|_, pids| !pids.is_empty());
        }
    }

    impl SystemProbe for FakeProbe {
        fn is_port_open(&self, port: u16) -> bool {
            let mut bound = Vec::new();
            self.pending.borrow_mut().retain_mut(|(p, pid, remaining)| {
                if *p != port {
                    return true;
                }
                if *remaining == 0 {
                    bound.push(*pid);
                    return false;
                }
                *remaining -= 1;
                true
            });
            for pid in bound {
                self.listen(port, pid);
            }
            self.open_ports.borrow().contains(&port)
        }

        fn pids_listening_on(&self, port: u16) -> Result<Vec<u32>> {
            Ok(self
                .listeners
                .borrow()
                .get(&port)
                .cloned()
                .unwrap_or_default())
        }

        fn pid_alive(&self, pid: u32) -> bool {
            self.alive.borrow().contains(&pid)
        }

        fn terminate(&self, pid: u32) -> Result<bool> {
            let was_alive = self.pid_alive(pid);
            self.terminated.borrow_mut().push(pid);
            self.kill(pid);
            Ok(was_alive)
        }
    }
}
