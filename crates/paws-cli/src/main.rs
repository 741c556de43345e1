//! paws CLI entry point.
//!
//! Binary name: `paws`
//!
//! Parses CLI arguments, sets up tracing, loads the engine config from the
//! data directory, then dispatches to the command handler.

mod cli;

use std::sync::Arc;

use clap::Parser;
use clap_complete::generate;
use paws_core::plugin::PluginRegistry;
use paws_infra::plugin::JsonPluginRegistry;
use paws_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,paws=debug",
        _ => "trace",
    };
    init_tracing(&TracingOptions {
        json: cli.log_json,
        otel: cli.otel,
        default_filter: Some(filter.to_string()),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "paws", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(paws_infra::config::resolve_data_dir);
    let config = paws_infra::config::load_engine_config(&data_dir).await;
    tracing::debug!(data_dir = %data_dir.display(), ?config, "engine config loaded");

    let plugins: Option<Arc<dyn PluginRegistry>> = match &cli.plugins {
        Some(path) => Some(Arc::new(JsonPluginRegistry::load(path).await?)),
        None => None,
    };

    let result = match cli.command {
        Commands::Demo(args) => {
            cli::demo::run_demo(config, args, plugins, cli.json, cli.quiet).await
        }
        Commands::Stack(args) => cli::demo::show_stack(config, args, plugins, cli.json),
        Commands::Config => cli::config::show_config(&config, &data_dir, cli.json),
        Commands::Completions { .. } => unreachable!("handled above"),
    };

    shutdown_tracing();
    result
}
