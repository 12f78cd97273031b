use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{ConfigError, Result};

/// Tool configuration from `{STABLE_HOME}/config.toml`.
///
/// Every key is optional; missing sections fall back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StableConfig {
    #[serde(default)]
    pub apps: AppsConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub certs: CertsConfig,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

/// How backing processes are launched and found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppsConfig {
    /// First port tried by the port allocator
    pub base_port: u16,
    /// How long `start` waits for the app to bind its port
    pub start_timeout_secs: u64,
    /// Login shell argv that runs the start command
    pub shell: Vec<String>,
    /// Start command; `{port}` and `{host}` are substituted
    pub start_command: String,
    /// Scaffolding command for `stable new`; `{path}` and `{name}` are substituted
    pub scaffold_command: String,
    /// Log file of the backing process, relative to the app path
    pub log_file: PathBuf,
}

impl Default for AppsConfig {
    fn default() -> Self {
        Self {
            base_port: 3000,
            start_timeout_secs: 30,
            shell: vec!["bash".to_string(), "-lc".to_string()],
            start_command: "bundle exec rails s -p {port} -b {host}".to_string(),
            scaffold_command: "rails new {path}".to_string(),
            log_file: PathBuf::from("log").join("stable.log"),
        }
    }
}

impl AppsConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// Reverse proxy daemon settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub binary: String,
    /// Control port probed to decide between `run` and `reload`
    pub admin_port: u16,
    /// Pause after launching the daemon before continuing
    pub settle_delay_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            binary: "caddy".to_string(),
            admin_port: 2019,
            settle_delay_ms: 2000,
        }
    }
}

impl ProxyConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CertsConfig {
    pub binary: String,
}

impl Default for CertsConfig {
    fn default() -> Self {
        Self {
            binary: "mkcert".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HostsConfig {
    pub file: PathBuf,
    /// Privilege escalation helper used when the hosts file is not writable
    pub elevate_with: String,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            file: default_hosts_file(),
            elevate_with: "sudo".to_string(),
        }
    }
}

fn default_hosts_file() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    /// Used to find listening PIDs on platforms without procfs
    pub lsof: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            lsof: "lsof".to_string(),
        }
    }
}

impl StableConfig {
    /// Load config from `path`, or defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            return Self::load_from_file(path);
        }
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(path.as_ref().to_path_buf(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: Self = toml::from_str(content)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        crate::fs_util::atomic_write(path, content.as_bytes())
            .map_err(|e| ConfigError::FileWrite(path.to_path_buf(), e))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.apps.base_port == 0 {
            return Err(ConfigError::Validation(
                "apps.base_port must be greater than 0".to_string(),
            ));
        }
        if self.apps.start_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "apps.start_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.apps.shell.is_empty() || self.apps.shell[0].trim().is_empty() {
            return Err(ConfigError::Validation(
                "apps.shell must name a program".to_string(),
            ));
        }
        if self.apps.start_command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "apps.start_command cannot be empty".to_string(),
            ));
        }
        if self.proxy.admin_port == 0 {
            return Err(ConfigError::Validation(
                "proxy.admin_port must be greater than 0".to_string(),
            ));
        }
        for (key, value) in [
            ("proxy.binary", &self.proxy.binary),
            ("certs.binary", &self.certs.binary),
            ("hosts.elevate_with", &self.hosts.elevate_with),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{key} cannot be empty")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_empty_defaults() {
        let cfg = StableConfig::parse("").unwrap();
        assert_eq!(cfg, StableConfig::default());
        assert_eq!(cfg.apps.base_port, 3000);
        assert_eq!(cfg.apps.start_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.proxy.admin_port, 2019);
        assert_eq!(cfg.proxy.binary, "caddy");
        assert_eq!(cfg.certs.binary, "mkcert");
    }

    #[test]
    fn parse_partial_sections_keep_other_defaults() {
        let cfg = StableConfig::parse(
            r#"
[apps]
base_port = 4000

[hosts]
file = "/tmp/hosts"
"#,
        )
        .unwrap();
        assert_eq!(cfg.apps.base_port, 4000);
        assert_eq!(cfg.apps.start_timeout_secs, 30);
        assert_eq!(cfg.hosts.file, PathBuf::from("/tmp/hosts"));
        assert_eq!(cfg.hosts.elevate_with, "sudo");
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        let err = StableConfig::parse("[proxy]\nbinnary = \"caddy\"\n").unwrap_err();
        assert!(err.to_string().contains("binnary"), "unexpected error: {err}");
    }

    #[test]
    fn parse_rejects_zero_timeout() {
        let err = StableConfig::parse("[apps]\nstart_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn parse_rejects_empty_shell() {
        let err = StableConfig::parse("[apps]\nshell = []\n").unwrap_err();
        assert!(err.to_string().contains("apps.shell"));
    }

    #[test]
    fn load_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let cfg = StableConfig::load_or_default(temp.path().join("config.toml")).unwrap();
        assert_eq!(cfg, StableConfig::default());
    }

    #[test]
    fn save_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let mut cfg = StableConfig::default();
        cfg.apps.base_port = 5000;
        cfg.proxy.settle_delay_ms = 10;
        cfg.save_to_file(&path).unwrap();

        let loaded = StableConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, cfg);
    }
}
