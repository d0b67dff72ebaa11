//! docgather worker binary.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docgather::config::Settings;
use docgather::engine;

#[derive(Parser)]
#[command(name = "docgather", version, about = "Document processing engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the worker process with its HTTP control surface (default).
    Serve,
    /// Print the effective configuration with secrets redacted.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before reading any configuration.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "docgather=debug"
    } else {
        "docgather=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => engine::run(settings).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&settings.redacted())?);
            Ok(())
        }
    }
}
