use clap::Subcommand;

use super::{CommandResult, with_session};
use crate::output;

#[derive(Subcommand)]
pub enum ProxyCommands {
    /// Reload the running caddy with the current Caddyfile
    Reload,

    /// Start caddy if it is not running, otherwise reload it
    Start,
}

pub fn run(cmd: ProxyCommands) -> CommandResult {
    with_session(|session| {
        let proxy = session.proxy();
        match cmd {
            ProxyCommands::Reload => {
                if !proxy.is_running() {
                    return Err(
                        "caddy is not running. Start it with `stable proxy start`".into(),
                    );
                }
                proxy.reload()?;
                output::success("Reloaded caddy");
            }
            ProxyCommands::Start => {
                proxy.ensure_running()?;
                output::success(&format!(
                    "caddy is serving {}",
                    session.ctx.paths.caddyfile().display()
                ));
            }
        }
        Ok(())
    })
}
