use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod client;
mod core;
mod daemon;
mod providers;
mod server;

#[derive(Parser)]
#[command(name = "wayfarer")]
#[command(author, version, about = "Live flight status and inbox sync engine for travel itineraries")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the client-side polling daemon
    Daemon,

    /// Start the server-side fan-out scheduler
    Fanout,

    /// Show live flight status for your trips
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Filter by trip id or name
        #[arg(long)]
        trip: Option<String>,
    },

    /// Refresh one trip's flight statuses now
    Refresh {
        /// Trip id to refresh
        trip: String,
    },

    /// Scan the connected inbox for new trips
    Sync {
        /// Account to sync
        account: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon => {
            init_logging();
            daemon::run().await
        }
        Commands::Fanout => {
            init_logging();
            server::run().await
        }
        Commands::Status { json, trip } => {
            init_logging();
            cli::status::run(json, trip).await
        }
        Commands::Refresh { trip } => {
            init_logging();
            cli::refresh::run(trip).await
        }
        Commands::Sync { account } => {
            init_logging();
            cli::sync::run(account).await
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
