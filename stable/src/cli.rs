use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};

use crate::commands::{self, new::NewOptions, proxy::ProxyCommands};

/// Stable - Run local apps behind trusted HTTPS domains
#[derive(Parser)]
#[command(name = "stable")]
#[command(version)]
#[command(about = "Stable - Run local apps behind trusted HTTPS domains")]
pub struct Cli {
    /// Show verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the Stable home directory and start caddy
    Setup,

    /// Scaffold a new app in the current directory, then add and start it
    New {
        /// App name, also used for the folder and the domain
        name: String,

        /// Ruby version to pin the project to
        #[arg(long)]
        runtime: Option<String>,

        /// Port to serve on instead of the next free one
        #[arg(long)]
        port: Option<u16>,

        /// Route over plain HTTP without issuing a certificate
        #[arg(long)]
        skip_tls: bool,
    },

    /// Register an existing project folder
    Add {
        /// Project folder
        #[arg(value_name = "FOLDER")]
        folder: PathBuf,

        /// App name (defaults to the folder name)
        #[arg(long)]
        name: Option<String>,

        /// Route over plain HTTP without issuing a certificate
        #[arg(long)]
        skip_tls: bool,
    },

    /// List registered apps and whether they are running
    #[command(visible_alias = "ls")]
    List,

    /// Start an app and route its domain
    Start { name: String },

    /// Stop an app
    Stop { name: String },

    /// Stop an app, then start it again
    Restart { name: String },

    /// Stop an app and remove its route, host alias and record
    #[command(visible_alias = "rm")]
    Remove { name: String },

    /// Remove an app and delete its project directory
    Destroy {
        name: String,

        /// Confirm deleting the project directory
        #[arg(short = 'y', long = "yes")]
        yes: bool,
    },

    /// Set the Ruby version an app runs on
    Runtime { name: String, version: String },

    /// Issue a fresh certificate for a domain and serve it over HTTPS
    Secure { domain: String },

    /// Reverse proxy commands
    #[command(subcommand)]
    Proxy(ProxyCommands),

    /// Check tools, the proxy daemon and the registry
    Doctor,
}

impl Cli {
    pub fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let Some(command) = self.command else {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        };

        match command {
            Commands::Setup => commands::setup::run(),
            Commands::New {
                name,
                runtime,
                port,
                skip_tls,
            } => commands::new::run(
                &name,
                NewOptions {
                    runtime,
                    port,
                    skip_tls,
                },
            ),
            Commands::Add {
                folder,
                name,
                skip_tls,
            } => commands::add::run(&folder, name, skip_tls),
            Commands::List => commands::list::run(),
            Commands::Start { name } => commands::lifecycle::start(&name),
            Commands::Stop { name } => commands::lifecycle::stop(&name),
            Commands::Restart { name } => commands::lifecycle::restart(&name),
            Commands::Remove { name } => commands::remove::run(&name),
            Commands::Destroy { name, yes } => commands::remove::run_destroy(&name, yes),
            Commands::Runtime { name, version } => commands::runtime::run(&name, &version),
            Commands::Secure { domain } => commands::secure::run(&domain),
            Commands::Proxy(cmd) => commands::proxy::run(cmd),
            Commands::Doctor => commands::doctor::run(),
        }
    }
}
