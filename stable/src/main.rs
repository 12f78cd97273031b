mod certs;
mod cli;
mod commands;
mod config;
mod context;
mod fs_util;
mod hosts;
mod output;
mod paths;
mod ports;
mod probe;
mod process;
mod proxy;
mod registry;
mod runtime;
mod scaffold;
mod tools;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

fn main() {
    // Parse CLI arguments early so we can configure logging/output.
    let cli = Cli::parse();

    crate::output::set_verbose(cli.verbose);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("info")
            } else {
                EnvFilter::new("warn")
            }
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli.run() {
        crate::output::error_stderr(&e.to_string());
        if crate::output::is_verbose() {
            let mut source = e.source();
            while let Some(cause) = source {
                crate::output::muted(&format!("  caused by: {cause}"));
                source = cause.source();
            }
        }
        std::process::exit(1);
    }
}
