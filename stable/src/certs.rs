//! Per-domain TLS material issued by `mkcert`.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::paths::StablePaths;
use crate::tools::{self, ToolError};

/// How long freshly issued files get to become readable.
const PEM_WAIT: Duration = Duration::from_secs(3);
const PEM_POLL: Duration = Duration::from_millis(100);
const PEM_MARKER: &str = "BEGIN";

#[derive(Debug, Error)]
pub enum CertError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Failed to prepare certificate directory {path}: {source}")]
    Dir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid PEM file: {0}")]
    InvalidPem(PathBuf),
}

pub type Result<T> = std::result::Result<T, CertError>;

/// Issues a certificate for a domain into the given files.
pub trait CertIssuer {
    fn available(&self) -> bool;

    fn issue(&self, domain: &str, cert: &Path, key: &Path) -> tools::Result<()>;
}

/// The `mkcert` command line, using its locally trusted CA.
#[derive(Debug, Clone)]
pub struct Mkcert {
    binary: String,
}

impl Mkcert {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CertIssuer for Mkcert {
    fn available(&self) -> bool {
        tools::which(&self.binary).is_some()
    }

    fn issue(&self, domain: &str, cert: &Path, key: &Path) -> tools::Result<()> {
        tools::require(&self.binary)?;
        let cert = cert.to_string_lossy();
        let key = key.to_string_lossy();
        tools::run_checked(
            &self.binary,
            &["-cert-file", cert.as_ref(), "-key-file", key.as_ref(), domain],
        )?;
        Ok(())
    }
}

/// Minimal sanity check: non-empty and a PEM header near the start.
pub fn valid_pem(path: &Path) -> bool {
    let Ok(mut file) = fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; 64];
    let Ok(n) = file.read(&mut head) else {
        return false;
    };
    n > 0 && String::from_utf8_lossy(&head[..n]).contains(PEM_MARKER)
}

fn wait_for_pem(path: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !valid_pem(path) {
        if Instant::now() >= deadline {
            return Err(CertError::InvalidPem(path.to_path_buf()));
        }
        std::thread::sleep(PEM_POLL);
    }
    Ok(())
}

/// Certificate and key paths for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPair {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// The `certs/` directory under the Stable home.
pub struct CertificateStore<'a> {
    paths: &'a StablePaths,
    issuer: &'a dyn CertIssuer,
    wait: Duration,
}

impl<'a> CertificateStore<'a> {
    pub fn new(paths: &'a StablePaths, issuer: &'a dyn CertIssuer) -> Self {
        Self {
            paths,
            issuer,
            wait: PEM_WAIT,
        }
    }

    #[cfg(test)]
    fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn pair(&self, domain: &str) -> CertPair {
        CertPair {
            cert: self.paths.cert_file(domain),
            key: self.paths.key_file(domain),
        }
    }

    /// Reuse a valid pair for `domain` or issue a new one.
    pub fn ensure(&self, domain: &str) -> Result<CertPair> {
        let pair = self.pair(domain);
        self.prepare_dir()?;
        if valid_pem(&pair.cert) && valid_pem(&pair.key) {
            tracing::debug!(domain, "reusing certificate");
            return Ok(pair);
        }
        self.issue(domain, pair)
    }

    /// Issue a new pair for `domain` even if a valid one exists.
    pub fn reissue(&self, domain: &str) -> Result<CertPair> {
        let pair = self.pair(domain);
        self.prepare_dir()?;
        self.issue(domain, pair)
    }

    fn issue(&self, domain: &str, pair: CertPair) -> Result<CertPair> {
        tracing::info!(domain, "issuing certificate");
        self.issuer.issue(domain, &pair.cert, &pair.key)?;
        wait_for_pem(&pair.cert, self.wait)?;
        wait_for_pem(&pair.key, self.wait)?;
        self.tighten_permissions();
        Ok(pair)
    }

    pub fn prepare_dir(&self) -> Result<()> {
        let dir = self.paths.certs_dir();
        fs::create_dir_all(&dir).map_err(|source| CertError::Dir { path: dir, source })
    }

    /// Keys readable by the owner only, certificates world readable, and everything
    /// owned by the invoking user when running under sudo. Failures are logged.
    pub fn tighten_permissions(&self) {
        let dir = self.paths.certs_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        let owner = invoking_user();
        if let Some((uid, gid)) = owner {
            chown_best_effort(&dir, uid, gid);
        }
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with(".pem") {
                continue;
            }
            let mode = if name.ends_with("-key.pem") { 0o600 } else { 0o644 };
            set_mode_best_effort(&path, mode);
            if let Some((uid, gid)) = owner {
                chown_best_effort(&path, uid, gid);
            }
        }
    }
}

/// The user behind `sudo`, when we are root because of it.
fn invoking_user() -> Option<(u32, u32)> {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions.
        if unsafe { libc::geteuid() } != 0 {
            return None;
        }
        let uid = std::env::var("SUDO_UID").ok()?.parse().ok()?;
        let gid = std::env::var("SUDO_GID").ok()?.parse().ok()?;
        Some((uid, gid))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

#[cfg(unix)]
fn set_mode_best_effort(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to set certificate permissions");
    }
}

#[cfg(not(unix))]
fn set_mode_best_effort(_path: &Path, _mode: u32) {}

#[cfg(unix)]
fn chown_best_effort(path: &Path, uid: u32, gid: u32) {
    if let Err(e) = std::os::unix::fs::chown(path, Some(uid), Some(gid)) {
        tracing::warn!(path = %path.display(), error = %e, "failed to change certificate ownership");
    }
}

#[cfg(not(unix))]
fn chown_best_effort(_path: &Path, _uid: u32, _gid: u32) {}
