use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Directory name used under the user's home when `STABLE_HOME` is unset.
const DEFAULT_HOME_DIR_NAME: &str = "StableCaddy";

/// Get Stable's home directory.
///
/// - `STABLE_HOME` wins when set to a non-empty value.
/// - Otherwise default to `~/StableCaddy`.
pub fn stable_home_dir() -> Result<PathBuf, std::io::Error> {
    home_from(std::env::var("STABLE_HOME").ok(), dirs::home_dir())
}

fn home_from(
    override_dir: Option<String>,
    user_home: Option<PathBuf>,
) -> Result<PathBuf, std::io::Error> {
    if let Some(v) = override_dir
        && !v.trim().is_empty()
    {
        return Ok(PathBuf::from(v));
    }

    let home = user_home.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not determine home directory",
        )
    })?;

    Ok(home.join(DEFAULT_HOME_DIR_NAME))
}

/// Every on-disk location Stable reads or writes, rooted at one home directory.
#[derive(Debug, Clone)]
pub struct StablePaths {
    root: PathBuf,
}

impl StablePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve paths from `STABLE_HOME` / the default home.
    pub fn discover() -> Result<Self, std::io::Error> {
        Ok(Self::new(stable_home_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn caddyfile(&self) -> PathBuf {
        self.root.join("Caddyfile")
    }

    pub fn caddy_log(&self) -> PathBuf {
        self.root.join("caddy.log")
    }

    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Aggregate registry written by older releases.
    pub fn legacy_apps_file(&self) -> PathBuf {
        self.root.join("apps.yml")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn app_config_file(&self, app_name: &str) -> PathBuf {
        self.projects_dir()
            .join(app_name)
            .join(format!("{app_name}.toml"))
    }

    /// Per-app YAML record written by older releases.
    pub fn legacy_app_config_file(&self, app_name: &str) -> PathBuf {
        self.projects_dir()
            .join(app_name)
            .join(format!("{app_name}.yml"))
    }

    pub fn cert_file(&self, domain: &str) -> PathBuf {
        self.certs_dir().join(format!("{domain}.pem"))
    }

    pub fn key_file(&self, domain: &str) -> PathBuf {
        self.certs_dir().join(format!("{domain}-key.pem"))
    }
}

#[cfg(test)]
pub(crate) fn test_stable_home_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
