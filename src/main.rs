//! Nimbus CLI — declarative cloud infrastructure.

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "nimbus",
    version,
    about = "Declarative cloud infrastructure — DAG-checked resource graphs, deferred outputs, derived secrets"
)]
struct Cli {
    #[command(subcommand)]
    command: nimbus::cli::Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = nimbus::cli::dispatch(cli.command).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
