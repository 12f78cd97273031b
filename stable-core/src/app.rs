use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::app_domain;

/// Last known backing process of an app.
///
/// `pid` and `started_at` only exist together: an app either has both or is
/// considered stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessState {
    pub pid: u32,
    /// Unix timestamp (seconds)
    pub started_at: i64,
}

/// A managed local web application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    /// Unique registry key, also used to derive the domain
    pub name: String,
    /// Project directory of the backing process
    pub path: PathBuf,
    /// Proxy routing key and hosts-file alias
    pub domain: String,
    /// Port the backing process is expected to listen on
    pub port: u16,
    /// Language runtime version the backing process needs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_version: Option<String>,
    #[serde(flatten)]
    pub process: Option<ProcessState>,
}

impl App {
    /// Create a stopped app with the default `{name}.test` domain.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, port: u16) -> Self {
        let name = name.into();
        let domain = app_domain(&name);
        Self {
            name,
            path: path.into(),
            domain,
            port,
            runtime_version: None,
            process: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_runtime_version(mut self, version: Option<String>) -> Self {
        self.runtime_version = version;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.map(|p| p.pid)
    }

    pub fn started_at(&self) -> Option<i64> {
        self.process.map(|p| p.started_at)
    }

    /// Whether the registry believes the app is running.
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Merge the fields present in `update` into this record.
    pub fn apply(&mut self, update: AppUpdate) {
        if let Some(path) = update.path {
            self.path = path;
        }
        if let Some(domain) = update.domain {
            self.domain = domain;
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(runtime_version) = update.runtime_version {
            self.runtime_version = runtime_version;
        }
        if let Some(process) = update.process {
            self.process = process;
        }
    }
}

/// Partial set of fields merged into an existing `App` by the registry.
///
/// Each `Some` is written; `None` leaves the stored value alone. The doubly
/// optional fields can clear a value with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppUpdate {
    pub path: Option<PathBuf>,
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub runtime_version: Option<Option<String>>,
    pub process: Option<Option<ProcessState>>,
}

impl AppUpdate {
    /// Mark the app as running under `pid` since `started_at`.
    pub fn running(pid: u32, started_at: i64) -> Self {
        Self {
            process: Some(Some(ProcessState { pid, started_at })),
            ..Self::default()
        }
    }

    /// Clear `pid` and `started_at` together.
    pub fn stopped() -> Self {
        Self {
            process: Some(None),
            ..Self::default()
        }
    }

    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::default()
        }
    }

    pub fn runtime_version(version: Option<String>) -> Self {
        Self {
            runtime_version: Some(version),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
