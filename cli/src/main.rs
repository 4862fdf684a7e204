use clap::{Parser, Subcommand};

mod commands;
mod util;

use commands::agent::AgentCommands;
use commands::market::MarketCommands;
use commands::production::ProductionCommands;
use commands::shopping::ShoppingCommands;
use commands::war::WarCommands;

#[derive(Parser)]
#[command(
    name = "copilot",
    version,
    about = "EVE Co-Pilot CLI: markets, production, shopping lists, war intel and agent sessions"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "COPILOT_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Bearer token, when the API is started with COPILOT_API_TOKEN
    #[arg(long, env = "COPILOT_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Market prices and trade hub comparison
    Market {
        #[command(subcommand)]
        command: MarketCommands,
    },
    /// Manufacturing material bills
    Production {
        #[command(subcommand)]
        command: ProductionCommands,
    },
    /// Shopping lists
    Shopping {
        #[command(subcommand)]
        command: ShoppingCommands,
    },
    /// Kill activity
    War {
        #[command(subcommand)]
        command: WarCommands,
    },
    /// Agent sessions, plans and the audit log
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Diagnostics go to stderr so stdout stays machine-readable JSON
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("COPILOT_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/').to_string();
    let token = cli.token.as_deref();

    let code = match cli.command {
        Commands::Health => commands::health::run(&api_url).await,
        Commands::Market { command } => commands::market::run(&api_url, token, command).await,
        Commands::Production { command } => {
            commands::production::run(&api_url, token, command).await
        }
        Commands::Shopping { command } => commands::shopping::run(&api_url, token, command).await,
        Commands::War { command } => commands::war::run(&api_url, token, command).await,
        Commands::Agent { command } => commands::agent::run(&api_url, token, command).await,
    };

    std::process::exit(code);
}
