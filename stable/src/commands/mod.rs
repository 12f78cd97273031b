pub mod add;
pub mod doctor;
pub mod lifecycle;
pub mod list;
pub mod new;
pub mod proxy;
pub mod remove;
pub mod runtime;
pub mod secure;
pub mod setup;

use std::error::Error;

use crate::certs::{CertIssuer, CertificateStore, Mkcert};
use crate::config::StableConfig;
use crate::context::Context;
use crate::hosts::{Elevator, HostsManager, SudoElevator};
use crate::probe::{OsProbe, SystemProbe};
use crate::process::ProcessManager;
use crate::proxy::{CaddyCli, ProxyManager, ProxyTool};
use crate::registry::AppRegistry;
use crate::runtime::VersionManager;
use crate::scaffold::{Scaffolder, ShellScaffolder};

pub type CommandResult<T = ()> = Result<T, Box<dyn Error>>;

/// Browser URL of `domain`.
pub fn app_url(domain: &str, tls: bool) -> String {
    if tls {
        format!("https://{domain}")
    } else {
        format!("http://{domain}")
    }
}

/// Collaborators backed by the real machine.
pub struct System {
    pub probe: OsProbe,
    pub caddy: CaddyCli,
    pub mkcert: Mkcert,
    pub elevator: SudoElevator,
    pub runtime: VersionManager,
}

impl System {
    pub fn new(config: &StableConfig) -> Self {
        Self {
            probe: OsProbe::new(config.system.lsof.clone()),
            caddy: CaddyCli::new(config.proxy.binary.clone()),
            mkcert: Mkcert::new(config.certs.binary.clone()),
            elevator: SudoElevator::new(config.hosts.elevate_with.clone()),
            runtime: VersionManager::detect(),
        }
    }
}

/// Everything one command needs: context, registry and the external collaborators.
pub struct Session<'a> {
    pub ctx: &'a Context,
    pub registry: AppRegistry,
    pub probe: &'a dyn SystemProbe,
    pub proxy_tool: &'a dyn ProxyTool,
    pub issuer: &'a dyn CertIssuer,
    pub elevator: &'a dyn Elevator,
    pub scaffolder: &'a dyn Scaffolder,
    pub runtime: VersionManager,
}

impl<'a> Session<'a> {
    pub fn processes(&self) -> ProcessManager<'_> {
        ProcessManager::new(
            &self.registry,
            self.probe,
            &self.ctx.config.apps,
            self.runtime.clone(),
        )
    }

    pub fn certs(&self) -> CertificateStore<'_> {
        CertificateStore::new(&self.ctx.paths, self.issuer)
    }

    pub fn proxy(&self) -> ProxyManager<'_> {
        ProxyManager::new(
            &self.ctx.paths,
            &self.ctx.config.proxy,
            &self.registry,
            self.proxy_tool,
            self.certs(),
            self.probe,
        )
    }

    pub fn hosts(&self) -> HostsManager<'_> {
        HostsManager::new(&self.ctx.config.hosts, self.elevator)
    }
}

/// Load the context, wire up the real system and run `f` against it.
pub fn with_session<T>(f: impl FnOnce(&Session<'_>) -> CommandResult<T>) -> CommandResult<T> {
    let ctx = Context::load()?;
    let system = System::new(&ctx.config);
    let scaffolder = ShellScaffolder::new(&ctx.config.apps, system.runtime.clone());
    let session = Session {
        ctx: &ctx,
        registry: AppRegistry::new(ctx.paths.clone()),
        probe: &system.probe,
        proxy_tool: &system.caddy,
        issuer: &system.mkcert,
        elevator: &system.elevator,
        scaffolder: &scaffolder,
        runtime: system.runtime.clone(),
    };
    f(&session)
}
