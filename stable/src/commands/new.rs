use std::path::Path;

use stable_core::{App, validate_app_name};

use super::add::{AddOptions, add_app};
use super::lifecycle::{Started, start_app};
use super::{CommandResult, Session, with_session};
use crate::output;
use crate::registry::RegistryError;
use crate::runtime::write_runtime_version;

#[derive(Debug, Clone, Default)]
pub struct NewOptions {
    pub runtime: Option<String>,
    pub port: Option<u16>,
    pub skip_tls: bool,
}

pub fn run(name: &str, options: NewOptions) -> CommandResult {
    let parent = std::env::current_dir()?;
    with_session(|session| {
        output::step(&format!("Creating {name}..."));
        let (app, started) = new_app(session, &parent, name, &options)?;
        output::success(&format!(
            "{} is running at {} (pid {})",
            app.name, started.url, started.pid
        ));
        output::muted(&format!("Project created in {}", app.path.display()));
        Ok(())
    })
}

/// Scaffold a project under `parent`, then add and start it.
pub fn new_app(
    session: &Session<'_>,
    parent: &Path,
    name: &str,
    options: &NewOptions,
) -> CommandResult<(App, Started)> {
    let name = validate_app_name(name)?;
    if session.registry.find(&name)?.is_some() {
        return Err(RegistryError::AlreadyExists(name).into());
    }

    let path = parent.join(&name);
    let runtime = options.runtime.as_deref().map(str::trim).filter(|v| !v.is_empty());
    session.scaffolder.scaffold(&name, &path, runtime)?;
    if let Some(version) = runtime {
        write_runtime_version(&path, version)
            .map_err(|e| format!("Failed to write .ruby-version in {}: {e}", path.display()))?;
    }

    let add_options = AddOptions {
        name: Some(name.clone()),
        port: options.port,
        skip_tls: options.skip_tls,
    };
    let app = add_app(session, &path, &add_options)?;
    let started = start_app(session, &app.name)?;
    Ok((session.registry.get(&app.name)?, started))
}
