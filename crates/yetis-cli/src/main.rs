//! `yetis` CLI entrypoint (§10.6), grounded on `main.go`'s command dispatch
//! and `client/commands.go`'s individual command bodies. Subcommand parsing
//! follows `clap`'s derive API the way `at-cli` in the wider example pack
//! does, since the teacher itself ships no CLI.

mod client;
mod commands;
mod dto;

use clap::{Parser, Subcommand};

use client::Client;

#[derive(Parser)]
#[command(name = "yetis", version, about = "Single-host process supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the yetis daemon in the foreground.
    Run {
        #[arg(short = 'f', long = "file")]
        file: Option<String>,
    },
    /// Start the yetis daemon in the background.
    Start {
        #[arg(short = 'f', long = "file")]
        file: Option<String>,
    },
    /// Terminate the yetis daemon.
    Shutdown {
        /// Seconds to wait for a graceful exit before escalating.
        seconds: Option<u64>,
    },
    /// Print the daemon's version and resource counts.
    Info,
    /// Apply deployment/service specs from a YAML file.
    Apply {
        #[arg(short = 'f', long = "file")]
        file: String,
    },
    /// List deployments and/or services.
    Get {
        /// Keep refreshing the table in place once a second.
        #[arg(short = 'w', long)]
        watch: bool,
        /// "deployments" (default) or "services".
        kind: Option<String>,
    },
    /// Print (optionally follow) a deployment's log file.
    Logs {
        #[arg(short = 'f', long)]
        follow: bool,
        name: String,
    },
    /// Print full detail of a single resource.
    Describe { kind: String, name: String },
    /// Delete a resource, terminating its process if it's a deployment.
    Delete { kind: String, name: String },
    /// Restart a deployment in place.
    Restart { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Run { .. } | Commands::Start { .. }) {
        let client = Client::new();
        if !client.is_server_running().await {
            println!("yetis server isn't running");
            return Ok(());
        }
        dispatch(&client, cli.command).await
    } else {
        match cli.command {
            Commands::Run { file } => commands::run(file),
            Commands::Start { file } => commands::start(file).await,
            _ => unreachable!(),
        }
    }
}

async fn dispatch(client: &Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { .. } | Commands::Start { .. } => unreachable!(),
        Commands::Shutdown { seconds } => commands::shutdown(seconds).await,
        Commands::Info => commands::info(client).await,
        Commands::Apply { file } => commands::apply(client, &file).await,
        Commands::Get { watch, kind } => commands::get(client, watch, kind).await,
        Commands::Logs { follow, name } => commands::logs(client, &name, follow).await,
        Commands::Describe { kind, name } => commands::describe(client, &kind, &name).await,
        Commands::Delete { kind, name } => commands::delete(client, &kind, &name).await,
        Commands::Restart { name } => commands::restart(client, &name).await,
    }
}
