//! CLI command definitions for the `paws` binary.

pub mod config;
pub mod demo;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Run and inspect paws workflows.
#[derive(Parser)]
#[command(name = "paws", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log records as JSON on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry to stdout.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Directory holding config.toml (default: $PAWS_DATA_DIR or ~/.paws).
    #[arg(long, global = true, env = "PAWS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON document that plugin-reference inputs resolve against.
    #[arg(long, global = true, value_name = "PATH")]
    pub plugins: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the sample batch workflow and print the collected results.
    Demo(DemoArgs),

    /// Print the execution stack of the sample workflow.
    Stack(DemoArgs),

    /// Print the effective engine configuration.
    Config,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Shape of the sample workflow: every value is offset, then scaled.
#[derive(Args, Clone, Debug)]
pub struct DemoArgs {
    /// Values to iterate over.
    #[arg(long, value_delimiter = ',', default_value = "1,2,3")]
    pub values: Vec<i64>,

    /// Added to every value.
    #[arg(long, default_value_t = 10)]
    pub offset: i64,

    /// Multiplies every offset value.
    #[arg(long, default_value_t = 2)]
    pub factor: i64,

    /// Read the offset from this dotted plugin path instead (needs --plugins).
    #[arg(long, value_name = "KEY")]
    pub offset_plugin: Option<String>,

    /// Feed values through a realtime controller instead of a batch.
    #[arg(long)]
    pub realtime: bool,

    /// Override the configured execution pool size.
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Append progress lines to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}
