//! `paws config`: show the effective engine configuration.

use std::path::Path;

use anyhow::Result;
use console::style;

use paws_types::config::EngineConfig;

pub fn show_config(config: &EngineConfig, data_dir: &Path, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "data_dir": data_dir.display().to_string(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} paws v{}",
        style("⚙").bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!(
        "  {}",
        style(data_dir.join("config.toml").display()).dim()
    );
    println!();
    for line in toml::to_string_pretty(config)?.lines() {
        println!("  {line}");
    }
    if config.operation_timeout_secs.is_none() {
        println!("  {}", style("# operation_timeout_secs unset: no timeout").dim());
    }
    println!();
    Ok(())
}
