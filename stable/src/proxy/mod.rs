//! Reverse proxy configuration and daemon state.
//!
//! The shared Caddyfile holds exactly one block per active domain. Every edit is
//! delete-then-insert on the parsed document, written atomically, then handed to
//! the daemon.

mod caddyfile;
mod tool;

pub use caddyfile::{Caddyfile, Scheme, SiteBlock};
pub use tool::{CaddyCli, ProxyTool};

#[cfg(test)]
pub(crate) use tool::fake;

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::certs::{CertError, CertPair, CertificateStore};
use crate::config::ProxyConfig;
use crate::fs_util::atomic_write;
use crate::paths::StablePaths;
use crate::probe::SystemProbe;
use crate::registry::{AppRegistry, RegistryError};
use crate::tools::{ToolError, install_hint};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No app is served on {0}")]
    UnknownDomain(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Cert(#[from] CertError),

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
}

pub type Result<T> = std::result::Result<T, ProxyError>;

/// Keeps the Caddyfile, certificates and the caddy daemon in line with the registry.
pub struct ProxyManager<'a> {
    paths: &'a StablePaths,
    config: &'a ProxyConfig,
    registry: &'a AppRegistry,
    tool: &'a dyn ProxyTool,
    certs: CertificateStore<'a>,
    probe: &'a dyn SystemProbe,
}

impl<'a> ProxyManager<'a> {
    pub fn new(
        paths: &'a StablePaths,
        config: &'a ProxyConfig,
        registry: &'a AppRegistry,
        tool: &'a dyn ProxyTool,
        certs: CertificateStore<'a>,
        probe: &'a dyn SystemProbe,
    ) -> Self {
        Self {
            paths,
            config,
            registry,
            tool,
            certs,
            probe,
        }
    }

    /// Route the app's domain to its port, over HTTPS unless `skip_tls`.
    pub fn add(&self, name: &str, skip_tls: bool) -> Result<SiteBlock> {
        let app = self.registry.get(name)?;
        self.require_tool()?;

        let tls: Option<CertPair> = if skip_tls {
            None
        } else {
            Some(self.certs.ensure(&app.domain)?)
        };
        let block = SiteBlock::render(
            &app.domain,
            app.port,
            tls.as_ref().map(|pair| (pair.cert.as_path(), pair.key.as_path())),
        );

        let mut doc = self.load()?;
        doc.remove_site(&app.domain);
        doc.append_site(block.clone());
        self.save(&doc)?;
        self.tool.format(&self.paths.caddyfile())?;
        tracing::info!(domain = %app.domain, port = app.port, scheme = block.scheme.as_str(), "proxy block written");

        self.ensure_running()?;
        Ok(block)
    }

    /// Drop the block for `domain`. Returns `false` when there was none, in which
    /// case the file is not touched.
    pub fn remove(&self, domain: &str) -> Result<bool> {
        let caddyfile = self.paths.caddyfile();
        if !caddyfile.exists() {
            return Ok(false);
        }

        let mut doc = self.load()?;
        if !doc.remove_site(domain) {
            tracing::debug!(domain, "no proxy block to remove");
            return Ok(false);
        }
        self.save(&doc)?;
        tracing::info!(domain, "proxy block removed");

        if !self.tool.available() {
            tracing::warn!(domain, "caddy not found; skipped formatting and reload");
            return Ok(true);
        }
        self.tool.format(&caddyfile)?;
        if self.is_running() {
            self.tool.reload(&caddyfile)?;
        }
        Ok(true)
    }

    /// Start the daemon if its admin port is closed, otherwise reload it.
    pub fn ensure_running(&self) -> Result<()> {
        self.require_tool()?;
        self.ensure_caddyfile()?;
        let caddyfile = self.paths.caddyfile();

        if self.is_running() {
            tracing::debug!("caddy is running, reloading");
            self.tool.reload(&caddyfile)?;
            return Ok(());
        }

        let pid = self.tool.run_detached(&caddyfile, &self.paths.caddy_log())?;
        tracing::info!(pid, "started caddy");
        std::thread::sleep(self.config.settle_delay());
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        self.require_tool()?;
        self.tool.reload(&self.paths.caddyfile())?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.probe.is_port_open(self.config.admin_port)
    }

    /// Issue a fresh certificate for `domain` and serve it over HTTPS.
    pub fn secure(&self, domain: &str) -> Result<SiteBlock> {
        let app = self
            .registry
            .find_by_domain(domain)?
            .ok_or_else(|| ProxyError::UnknownDomain(domain.to_string()))?;
        self.require_tool()?;
        self.certs.reissue(domain)?;
        self.add(&app.name, false)
    }

    /// Create an empty Caddyfile if none exists yet.
    pub fn ensure_caddyfile(&self) -> Result<()> {
        let caddyfile = self.paths.caddyfile();
        if caddyfile.exists() {
            return Ok(());
        }
        atomic_write(&caddyfile, b"").map_err(|source| ProxyError::Write {
            path: caddyfile,
            source,
        })
    }

    /// Parsed view of the current Caddyfile.
    pub fn load(&self) -> Result<Caddyfile> {
        let caddyfile = self.paths.caddyfile();
        match fs::read_to_string(&caddyfile) {
            Ok(content) => Ok(Caddyfile::parse(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Caddyfile::default()),
            Err(source) => Err(ProxyError::Read {
                path: caddyfile,
                source,
            }),
        }
    }

    fn save(&self, doc: &Caddyfile) -> Result<()> {
        let caddyfile = self.paths.caddyfile();
        atomic_write(&caddyfile, doc.to_string().as_bytes()).map_err(|source| {
            ProxyError::Write {
                path: caddyfile,
                source,
            }
        })
    }

    fn require_tool(&self) -> Result<()> {
        if self.tool.available() {
            return Ok(());
        }
        Err(ToolError::Missing {
            tool: self.config.binary.clone(),
            hint: install_hint(&self.config.binary),
        }
        .into())
    }
}
