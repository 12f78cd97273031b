use std::fs;

use stable_core::App;

use super::{CommandResult, Session, with_session};
use crate::output;

pub fn run(name: &str) -> CommandResult {
    with_session(|session| {
        let app = remove_app(session, name)?;
        output::success(&format!("Removed {} ({})", app.name, app.domain));
        output::muted(&format!("Project files are still in {}", app.path.display()));
        Ok(())
    })
}

pub fn run_destroy(name: &str, yes: bool) -> CommandResult {
    with_session(|session| {
        let app = destroy_app(session, name, yes)?;
        output::success(&format!(
            "Destroyed {} and deleted {}",
            app.name,
            app.path.display()
        ));
        Ok(())
    })
}

/// Stop the app and withdraw it from the hosts file, the proxy and the registry,
/// in that order. Project files are left alone.
pub fn remove_app(session: &Session<'_>, name: &str) -> CommandResult<App> {
    let app = session.registry.get(name)?;

    let outcome = session.processes().stop(&app)?;
    if outcome.was_running() {
        output::step(&format!("Stopped {}", app.name));
    }
    session.hosts().remove(&app.domain)?;
    session.proxy().remove(&app.domain)?;
    session.registry.remove(&app.name)?;
    tracing::info!(app = %app.name, "removed app");
    Ok(app)
}

/// [`remove_app`], then delete the project directory.
pub fn destroy_app(session: &Session<'_>, name: &str, yes: bool) -> CommandResult<App> {
    let app = session.registry.get(name)?;
    if !yes {
        return Err(format!(
            "Refusing to destroy {} without --yes: this deletes {}",
            app.name,
            app.path.display()
        )
        .into());
    }

    let app = remove_app(session, &app.name)?;
    if app.path.exists() {
        fs::remove_dir_all(&app.path)
            .map_err(|e| format!("Failed to delete {}: {e}", app.path.display()))?;
        tracing::info!(path = %app.path.display(), "deleted project directory");
    }
    Ok(app)
}
