//! progressctl - CLI client for the progression ledger daemon

use anyhow::Result;
use clap::Parser;
use progressctl::cli::{resolve_url, Cli};
use progressctl::client::ProgressClient;
use progressctl::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ProgressClient::new(&resolve_url(cli.url))?;
    commands::run(&client, cli.command).await
}
