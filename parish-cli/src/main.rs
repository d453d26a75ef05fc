//! Parish CLI - operator tool for the tenant connection manager.

use clap::Parser;

use parish_cli::cli::{Cli, Command};
use parish_cli::commands;
use parish_cli::error::CliResult;
use parish_cli::output;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::newline();
        output::error(&e.to_string());
        for suggestion in e.suggestions() {
            output::hint(suggestion);
        }
        std::process::exit(1);
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Command::Serve(args) => commands::serve::run(config, args).await,
        Command::Tenants(args) => commands::tenants::run(config, args).await,
        Command::Config(args) => commands::config::run(config, args).await,
        Command::Version => commands::version::run().await,
    }
}
