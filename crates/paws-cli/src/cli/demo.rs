//! The sample workflow behind `paws demo` and `paws stack`.
//!
//! ```text
//! driver (batch or realtime) ── offset = value + OFFSET
//!                             └─ scale  = offset * FACTOR
//! collect = scale.result of every iteration
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};

use paws_core::event::MessageSink;
use paws_core::operation::{Arithmetic, OperationKind, SelectBatchItems};
use paws_core::plugin::PluginRegistry;
use paws_core::workflow::{ChannelRealtime, RealtimeFeed, RunOutcome, ValueBatch, Workflow};
use paws_infra::sink::FileSink;
use paws_types::config::EngineConfig;
use paws_types::error::SinkError;
use paws_types::locator::{InputLocator, LiteralType};

use super::DemoArgs;

const BATCH_RESULTS: &str = "driver.outputs.batch_outputs";
const REALTIME_RESULTS: &str = "driver.outputs.realtime_outputs";
const COLLECTED: &str = "collect.outputs.var_list";

/// Gap between values pushed into the realtime feed.
const FEED_INTERVAL: Duration = Duration::from_millis(50);

/// Prints progress lines to stderr.
struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn write(&self, message: &str) -> Result<(), SinkError> {
        eprintln!("  {} {}", style("›").dim(), style(message).dim());
        Ok(())
    }
}

fn results_slot(args: &DemoArgs) -> &'static str {
    if args.realtime {
        REALTIME_RESULTS
    } else {
        BATCH_RESULTS
    }
}

/// Builds the sample workflow. The feed is `Some` in realtime mode.
pub fn build_demo(
    mut config: EngineConfig,
    args: &DemoArgs,
    plugins: Option<Arc<dyn PluginRegistry>>,
) -> Result<(Workflow, Option<RealtimeFeed>)> {
    if let Some(pool_size) = args.pool_size {
        config.pool_size = pool_size;
    }
    let offset = match (&args.offset_plugin, &plugins) {
        (Some(key), Some(_)) => InputLocator::plugin(key.as_str()),
        (Some(key), None) => bail!("--offset-plugin {key} needs a --plugins document"),
        (None, _) => InputLocator::literal(LiteralType::Int, args.offset.to_string()),
    };
    let poll_delay = config.poll_delay();
    let mut workflow = Workflow::new(config);
    if let Some(plugins) = plugins {
        workflow = workflow.with_plugins(plugins);
    }

    let sub_operations = ["offset", "scale"];
    let routes = ["offset.inputs.a"];
    let recorded = ["offset.outputs.result", "scale.outputs.result"];

    let (driver, feed) = if args.realtime {
        let (controller, feed) = ChannelRealtime::new(poll_delay);
        let controller = controller
            .with_sub_operations(sub_operations)
            .with_routes(routes)
            .recording(recorded);
        (OperationKind::realtime(controller), Some(feed))
    } else {
        let controller = ValueBatch::new()
            .with_sub_operations(sub_operations)
            .with_routes(routes)
            .recording(recorded);
        (OperationKind::batch(controller), None)
    };

    workflow.add_operation("driver", driver)?;
    workflow.add_operation("offset", OperationKind::plain(Arithmetic::add()))?;
    workflow.add_operation("scale", OperationKind::plain(Arithmetic::mul()))?;
    workflow.add_operation("collect", OperationKind::plain(SelectBatchItems))?;

    if !args.realtime {
        workflow.set_locator(
            "driver.inputs.values",
            InputLocator::literal(LiteralType::Array, serde_json::to_string(&args.values)?),
        )?;
    }
    workflow.set_locator("offset.inputs.a", InputLocator::BatchInjected)?;
    workflow.set_locator("offset.inputs.b", offset)?;
    workflow.set_locator("scale.inputs.a", InputLocator::workflow("offset.outputs.result"))?;
    workflow.set_locator(
        "scale.inputs.b",
        InputLocator::literal(LiteralType::Int, args.factor.to_string()),
    )?;
    workflow.set_locator("collect.inputs.batch_outputs", InputLocator::workflow(results_slot(args)))?;
    workflow.set_locator("collect.inputs.operation", InputLocator::literal(LiteralType::String, "scale"))?;
    workflow.set_locator("collect.inputs.var_name", InputLocator::literal(LiteralType::String, "result"))?;

    Ok((workflow, feed))
}

/// Run the sample workflow. Ctrl+C requests a cooperative stop.
pub async fn run_demo(
    config: EngineConfig,
    args: DemoArgs,
    plugins: Option<Arc<dyn PluginRegistry>>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let (mut workflow, feed) = build_demo(config, &args, plugins)?;
    if !json && !quiet {
        workflow = workflow.with_sink(Arc::new(ConsoleSink));
    }
    if let Some(path) = &args.log_file {
        workflow = workflow.with_sink(Arc::new(FileSink::open(path)?));
    }

    let stop = workflow.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping workflow");
            stop.stop();
        }
    });

    if let Some(feed) = feed {
        let values = args.values.clone();
        tokio::spawn(async move {
            for value in values {
                if !feed.push(json!(value)) {
                    break;
                }
                tokio::time::sleep(FEED_INTERVAL).await;
            }
            // Dropping the feed closes the realtime controller.
        });
    }

    let started = Instant::now();
    let outcome = workflow.run().await?;
    let elapsed = started.elapsed();

    let iterations = workflow.tree().value_at(results_slot(&args))?;
    let collected = workflow.tree().value_at(COLLECTED)?;
    let iteration_count = iterations.as_array().map_or(0, Vec::len);

    if json {
        let report = json!({
            "outcome": match outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Stopped => "stopped",
            },
            "duration_ms": elapsed.as_millis() as u64,
            "collected": collected,
            "iterations": iterations,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if quiet {
        return Ok(());
    }

    println!();
    match outcome {
        RunOutcome::Completed => println!(
            "  {} Workflow completed in {}ms ({} iterations)",
            style("✓").green().bold(),
            elapsed.as_millis(),
            iteration_count
        ),
        RunOutcome::Stopped => println!(
            "  {} Workflow stopped after {} iterations",
            style("!").yellow().bold(),
            iteration_count
        ),
    }
    if collected != Value::Null {
        println!("  Collected: {}", style(&collected).cyan());
    }
    println!();
    Ok(())
}

/// Print the execution stack of the sample workflow.
pub fn show_stack(
    config: EngineConfig,
    args: DemoArgs,
    plugins: Option<Arc<dyn PluginRegistry>>,
    json: bool,
) -> Result<()> {
    let (workflow, _feed) = build_demo(config, &args, plugins)?;
    let stack = workflow.build_stack()?;

    if json {
        let rows: Vec<Value> = stack
            .outline()
            .into_iter()
            .map(|(depth, index, label)| json!({ "depth": depth, "layer": index, "operations": label }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Depth").fg(Color::White),
        Cell::new("Layer").fg(Color::White),
        Cell::new("Operations").fg(Color::White),
    ]);
    for (depth, index, label) in stack.outline() {
        let label_cell = if label.ends_with(']') {
            Cell::new(format!("{:indent$}{label}", "", indent = depth * 2)).fg(Color::Cyan)
        } else {
            Cell::new(format!("{:indent$}{label}", "", indent = depth * 2))
        };
        table.add_row(vec![Cell::new(depth), Cell::new(index), label_cell]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
