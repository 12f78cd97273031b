use std::fs;

use super::{CommandResult, Session, with_session};
use crate::output;
use crate::tools::install_hint;

pub fn run() -> CommandResult {
    with_session(|session| {
        output::section("Setting up Stable");
        setup(session)?;
        output::success(&format!(
            "Ready. Apps are routed through {}",
            session.ctx.paths.caddyfile().display()
        ));
        Ok(())
    })
}

/// Create the home layout and get the proxy daemon running.
pub fn setup(session: &Session<'_>) -> CommandResult {
    let paths = &session.ctx.paths;
    fs::create_dir_all(paths.root())
        .map_err(|e| format!("Failed to create {}: {e}", paths.root().display()))?;
    fs::create_dir_all(paths.projects_dir())
        .map_err(|e| format!("Failed to create {}: {e}", paths.projects_dir().display()))?;
    session.certs().prepare_dir()?;
    output::step(&format!("Home directory {}", paths.root().display()));

    if !paths.config_file().exists() {
        session.ctx.save_config()?;
        output::step(&format!("Wrote {}", paths.config_file().display()));
    }

    if !session.issuer.available() {
        let binary = &session.ctx.config.certs.binary;
        output::warning(&format!(
            "{binary} was not found; HTTPS routes cannot be issued. {}",
            install_hint(binary)
        ));
    }

    let proxy = session.proxy();
    proxy.ensure_caddyfile()?;
    proxy.ensure_running()?;
    output::step(&format!(
        "caddy is running (admin port {})",
        session.ctx.config.proxy.admin_port
    ));
    Ok(())
}
