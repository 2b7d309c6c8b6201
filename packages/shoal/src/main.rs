use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

mod api;
mod chat;
mod cli;
mod config;
mod models;
mod session;

use crate::config::ShoalConfig;

#[derive(Parser)]
#[command(name = "shoal")]
#[command(about = "Terminal client for the Shoal room-chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.shoal)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session tokens
    Login(cli::login::LoginArgs),

    /// End the session and clear the stored tokens
    Logout,

    /// Create an account and log straight in
    Register(cli::login::RegisterArgs),

    /// Show the currently logged-in user
    Whoami,

    /// List rooms, create one, or show one
    Rooms(cli::rooms::RoomsArgs),

    /// Print a room's message history
    History(cli::send::HistoryArgs),

    /// Send a message and/or a file to a room
    Send(cli::send::SendArgs),

    /// Follow a room live over the notification socket
    Watch(cli::watch::WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = ShoalConfig::new(cli.data_dir)?;
    let file = config.load()?;

    match cli.command {
        Commands::Login(args) => cli::login::login(&config, &file, args).await,
        Commands::Logout => cli::login::logout(&config, &file).await,
        Commands::Register(args) => cli::login::register(&config, &file, args).await,
        Commands::Whoami => cli::login::whoami(&config, &file).await,
        Commands::Rooms(args) => cli::rooms::run(&config, &file, args).await,
        Commands::History(args) => cli::send::history(&config, &file, args).await,
        Commands::Send(args) => cli::send::send(&config, &file, args).await,
        Commands::Watch(args) => cli::watch::run(&config, &file, args).await,
    }
}

/// Log to stderr so command output on stdout stays clean.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shoal=warn,shoal_realtime=warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
