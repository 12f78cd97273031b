use std::path::Path;

use stable_core::{App, AppUpdate, normalize_app_name};

use super::{CommandResult, Session, app_url, with_session};
use crate::output;
use crate::runtime::detect_runtime_version;

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Registry name; derived from the folder name when absent
    pub name: Option<String>,
    /// Fixed port instead of the next free one
    pub port: Option<u16>,
    pub skip_tls: bool,
}

pub fn run(folder: &Path, name: Option<String>, skip_tls: bool) -> CommandResult {
    with_session(|session| {
        let options = AddOptions {
            name,
            port: None,
            skip_tls,
        };
        let app = add_app(session, folder, &options)?;
        output::success(&format!(
            "{} is routed to {} on port {}",
            app.name,
            app_url(&app.domain, !skip_tls),
            app.port
        ));
        output::muted(&format!("Start it with `stable start {}`", app.name));
        Ok(())
    })
}

/// Adopt an existing project folder: register it (or reuse its record), pick up
/// its Ruby version, alias its domain and route it through the proxy.
pub fn add_app(session: &Session<'_>, folder: &Path, options: &AddOptions) -> CommandResult<App> {
    let path = folder
        .canonicalize()
        .map_err(|e| format!("Cannot add {}: {e}", folder.display()))?;
    if !path.is_dir() {
        return Err(format!("{} is not a directory", path.display()).into());
    }

    let registry = &session.registry;
    let mut app = match registry.find_by_path(&path)? {
        Some(existing) => {
            tracing::info!(app = %existing.name, path = %path.display(), "folder already registered");
            existing
        }
        None => {
            let name = match &options.name {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .map(|n| normalize_app_name(&n.to_string_lossy()))
                    .unwrap_or_default(),
            };
            registry.register(
                &name,
                path.clone(),
                session.probe,
                session.ctx.config.apps.base_port,
            )?
        }
    };

    if let Some(port) = options.port
        && port != app.port
    {
        if let Some(other) = registry
            .all()?
            .into_iter()
            .find(|other| other.port == port && other.name != app.name)
        {
            return Err(format!("Port {port} is already assigned to {}", other.name).into());
        }
        registry.update(&app.name, AppUpdate::port(port))?;
        app.port = port;
    }

    if let Some(version) = detect_runtime_version(&path)
        && app.runtime_version.as_deref() != Some(version.as_str())
    {
        tracing::info!(app = %app.name, version = %version, "detected ruby version");
        registry.update(&app.name, AppUpdate::runtime_version(Some(version)))?;
    }

    session.hosts().add(&app.domain)?;
    session.proxy().add(&app.name, options.skip_tls)?;
    Ok(registry.get(&app.name)?)
}
