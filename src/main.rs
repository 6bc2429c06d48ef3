//! Mull - deep-thinking workflow orchestrator for MCP hosts
//!
//! Usage:
//!   mull mcp                      Start MCP server on stdio
//!   mull validate                 Validate configuration and exit
//!   mull flows                    List loaded thinking flows
//!   mull sessions list            List persisted sessions
//!   mull --help                   Show all commands

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use mull::cli::{handlers, Cli, Commands};
use mull::init::AppContext;
use mull::mcp::server::run_mcp_server;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing to stderr (stdout carries the MCP stdio transport).
    let mut filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("mull=info".parse()?);
    if let Some(directive) = &cli.log_level {
        filter = filter.add_directive(directive.parse()?);
    }
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    match &cli.command {
        Commands::Validate => {
            // Validate-only mode: never touches the database.
            match mull::config::load(cli.config.as_deref()) {
                Ok(snapshot) => {
                    println!(
                        "configuration OK: {} flow(s), {} template(s), default flow '{}'",
                        snapshot.flows.len(),
                        snapshot.templates.len(),
                        snapshot.server.default_flow
                    );
                    Ok(())
                }
                Err(e) => {
                    eprintln!("configuration invalid: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Mcp => {
            let ctx = Arc::new(AppContext::new(cli.config.clone()).await?);
            run_mcp_server(ctx).await
        }
        Commands::Flows => {
            let ctx = AppContext::new(cli.config.clone()).await?;
            handlers::flows(&ctx, cli.json).await
        }
        Commands::Templates => {
            let ctx = AppContext::new(cli.config.clone()).await?;
            handlers::templates(&ctx, cli.json).await
        }
        Commands::Sessions(cmd) => {
            let ctx = AppContext::new(cli.config.clone()).await?;
            handlers::sessions(&ctx, cmd, cli.json).await
        }
    }
}
