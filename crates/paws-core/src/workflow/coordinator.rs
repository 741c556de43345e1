//! Execution coordinator: runs an [`ExecutionStack`] against the item tree.
//!
//! # Execution flow
//!
//! 1. Layers run strictly in order; the cancellation token is checked before
//!    each top-level layer.
//! 2. A plain layer resolves every member's inputs against the tree as it is
//!    at layer start, writes the loaded values into the input slots, then
//!    spawns one task per member. Spawning waits for a permit from the
//!    execution pool, so at most `pool_size` bodies run at once.
//! 3. Each task writes its outputs back as soon as it finishes. A failing,
//!    timed-out or panicking member never cancels its siblings; once the
//!    layer drains the run halts with [`ExecutionError::LayerFailed`].
//! 4. A control layer runs the controller body, rebuilds its nested stack
//!    from the current tree, then loops over bindings (batch) or polls for
//!    them (realtime), running the nested stack once per binding.
//!
//! Stop is cooperative: the token is observed between layers and before each
//! controller iteration. Work already dispatched, including an in-flight
//! iteration's nested layers, runs to completion.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use paws_types::binding::{BatchBinding, IterationSnapshot, NextBinding};
use paws_types::config::EngineConfig;
use paws_types::error::{ResolveError, StructuralError};
use paws_types::event::EngineEvent;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::Notifier;
use crate::operation::{OperationInputs, OperationKind};
use crate::plugin::PluginRegistry;
use crate::tree::ItemTree;

use super::catalog::Catalog;
use super::control::{BatchController, Controller, RealtimeController, results_value};
use super::resolver::resolve;
use super::stack::{ControlLayer, ExecutionLayer, ExecutionStack, ScheduleError, build_nested};

// ---------------------------------------------------------------------------
// Outcome and errors
// ---------------------------------------------------------------------------

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stop was requested before every layer had run.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub uri: String,
    pub error: String,
}

impl std::fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.uri, self.error)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("layer failed: {}", join_failures(.failures))]
    LayerFailed { failures: Vec<OperationFailure> },

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("'{0}' is scheduled as a controller but is not one")]
    NotAController(String),

    #[error("workflow is already running")]
    AlreadyRunning,
}

fn join_failures(failures: &[OperationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Where in the stack a call runs.
#[derive(Clone, Copy)]
struct Scope<'a> {
    depth: usize,
    bindings: Option<&'a BatchBinding>,
    /// False inside a controller iteration: its layers always run to the end.
    interruptible: bool,
}

impl Scope<'_> {
    fn top() -> Self {
        Scope {
            depth: 0,
            bindings: None,
            interruptible: true,
        }
    }
}

/// A member of a layer with its inputs already materialized.
struct Unit {
    uri: String,
    op: OperationKind,
    inputs: OperationInputs,
}

/// Executes one run of an execution stack.
pub struct Coordinator {
    tree: ItemTree,
    plugins: Arc<dyn PluginRegistry>,
    notifier: Notifier,
    pool: Arc<Semaphore>,
    timeout: Option<Duration>,
    run_id: Uuid,
}

impl Coordinator {
    pub fn new(
        tree: ItemTree,
        plugins: Arc<dyn PluginRegistry>,
        notifier: Notifier,
        config: &EngineConfig,
    ) -> Self {
        Self {
            tree,
            plugins,
            notifier,
            pool: Arc::new(Semaphore::new(config.effective_pool_size())),
            timeout: config.operation_timeout(),
            run_id: Uuid::now_v7(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Runs `stack` to completion, failure, or cooperative stop.
    pub async fn run(
        &self,
        stack: &ExecutionStack,
        token: &CancellationToken,
    ) -> Result<RunOutcome, ExecutionError> {
        let run_id = self.run_id;
        let started = Instant::now();
        self.notifier.emit(EngineEvent::RunStarted { run_id });
        tracing::info!(run_id = %run_id, layers = stack.len(), "starting workflow run");

        let result = self.run_stack(stack, Scope::top(), token).await;

        match &result {
            Ok(RunOutcome::Completed) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(run_id = %run_id, duration_ms, "workflow run completed");
                self.notifier
                    .emit(EngineEvent::RunCompleted { run_id, duration_ms });
            }
            Ok(RunOutcome::Stopped) => {
                tracing::info!(run_id = %run_id, "workflow run stopped");
                self.notifier.emit(EngineEvent::RunStopped { run_id });
            }
            Err(err) => {
                tracing::error!(run_id = %run_id, error = %err, "workflow run failed");
                self.notifier.emit(EngineEvent::RunFailed {
                    run_id,
                    error: err.to_string(),
                });
            }
        }
        result
    }

    fn run_stack<'a>(
        &'a self,
        stack: &'a ExecutionStack,
        scope: Scope<'a>,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<RunOutcome, ExecutionError>> {
        Box::pin(async move {
            let mut outcome = RunOutcome::Completed;
            for (index, layer) in stack.layers().iter().enumerate() {
                if scope.interruptible && token.is_cancelled() {
                    tracing::info!(
                        run_id = %self.run_id,
                        depth = scope.depth,
                        layer = index,
                        "stop requested, halting before layer"
                    );
                    return Ok(RunOutcome::Stopped);
                }
                let layer_outcome = match layer {
                    ExecutionLayer::Operations(uris) => {
                        self.run_layer(uris, index, scope).await?;
                        RunOutcome::Completed
                    }
                    ExecutionLayer::Control(control) => {
                        self.run_control(control, scope, token).await?
                    }
                };
                if layer_outcome == RunOutcome::Stopped {
                    if scope.interruptible {
                        return Ok(RunOutcome::Stopped);
                    }
                    outcome = RunOutcome::Stopped;
                }
            }
            Ok(outcome)
        })
    }

    // -- plain layers --------------------------------------------------------

    async fn run_layer(
        &self,
        uris: &[String],
        index: usize,
        scope: Scope<'_>,
    ) -> Result<(), ExecutionError> {
        self.notifier.emit(EngineEvent::LayerStarted {
            run_id: self.run_id,
            depth: scope.depth,
            index,
            operations: uris.to_vec(),
        });
        tracing::debug!(
            run_id = %self.run_id,
            depth = scope.depth,
            layer = index,
            operations = uris.len(),
            "processing layer"
        );

        let mut failures = Vec::new();
        let mut units = Vec::with_capacity(uris.len());
        for uri in uris {
            match self.prepare(uri, scope.bindings) {
                Ok(unit) => units.push(unit),
                Err(err) => failures.push(self.report_failure(uri, err.to_string())),
            }
        }
        failures.extend(self.run_units(units).await);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExecutionError::LayerFailed { failures })
        }
    }

    /// Resolves and loads every input of the operation at `uri`.
    fn prepare(&self, uri: &str, bindings: Option<&BatchBinding>) -> Result<Unit, ResolveError> {
        let op = self.tree.operation(uri)?;
        let mut inputs = OperationInputs::new();
        for (slot, locator) in self.tree.input_slots(uri)? {
            let value = resolve(&locator, &slot, &self.tree, self.plugins.as_ref(), bindings)?
                .materialize()?;
            self.tree.set_value(&slot, value.clone())?;
            let name = slot.rsplit('.').next().unwrap_or_default().to_string();
            inputs.insert(name, value);
        }
        Ok(Unit {
            uri: uri.to_string(),
            op,
            inputs,
        })
    }

    /// Spawns every unit under the pool bound and waits for all of them.
    async fn run_units(&self, units: Vec<Unit>) -> Vec<OperationFailure> {
        let mut failures = Vec::new();
        let mut join_set = JoinSet::new();

        for unit in units {
            let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
                failures.push(self.report_failure(&unit.uri, "execution pool closed".to_string()));
                continue;
            };
            let tree = self.tree.clone();
            let notifier = self.notifier.clone();
            let run_id = self.run_id;
            let timeout = self.timeout;
            join_set.spawn(async move {
                let _permit = permit;
                execute_unit(unit, tree, notifier, run_id, timeout).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(join_err) => {
                    failures.push(self.report_failure("<unknown>", format!("task join error: {join_err}")));
                }
            }
        }
        failures
    }

    fn report_failure(&self, uri: &str, error: String) -> OperationFailure {
        report_failure(&self.notifier, self.run_id, uri, error)
    }

    // -- control layers ------------------------------------------------------

    async fn run_control(
        &self,
        layer: &ControlLayer,
        scope: Scope<'_>,
        token: &CancellationToken,
    ) -> Result<RunOutcome, ExecutionError> {
        let uri = layer.uri.as_str();
        let op = self.tree.operation(uri)?;
        let Some(mode) = op.control_mode() else {
            return Err(ExecutionError::NotAController(uri.to_string()));
        };

        let unit = self.prepare(uri, scope.bindings).map_err(|err| ExecutionError::LayerFailed {
            failures: vec![self.report_failure(uri, err.to_string())],
        })?;
        let failures = self.run_units(vec![unit]).await;
        if !failures.is_empty() {
            return Err(ExecutionError::LayerFailed { failures });
        }

        let catalog = Catalog::from_tree(&self.tree)?;
        let nested = build_nested(&catalog, uri, &layer.frontier, &layer.routes)?;

        self.notifier.emit(EngineEvent::ControllerStarted {
            run_id: self.run_id,
            uri: uri.to_string(),
            mode,
        });
        tracing::debug!(
            run_id = %self.run_id,
            uri,
            %mode,
            nested_layers = nested.len(),
            "controller started"
        );

        let (outcome, iterations) = match &op {
            OperationKind::Batch(ctrl) => {
                self.run_batch(uri, ctrl.as_ref(), &nested, scope, token)
                    .await?
            }
            OperationKind::Realtime(ctrl) => {
                self.run_realtime(uri, ctrl.as_ref(), &nested, scope, token)
                    .await?
            }
            OperationKind::Plain(_) => return Err(ExecutionError::NotAController(uri.to_string())),
        };

        self.notifier.emit(EngineEvent::ControllerFinished {
            run_id: self.run_id,
            controller: uri.to_string(),
            iterations,
        });
        Ok(outcome)
    }

    async fn run_batch(
        &self,
        uri: &str,
        ctrl: &dyn BatchController,
        nested: &ExecutionStack,
        scope: Scope<'_>,
        token: &CancellationToken,
    ) -> Result<(RunOutcome, usize), ExecutionError> {
        let bindings = ctrl.next_binding_batch();
        let total = bindings.len();
        ctrl.clear_results();
        self.publish_results(uri, ctrl);

        for (iteration, binding) in bindings.into_iter().enumerate() {
            if token.is_cancelled() {
                tracing::info!(run_id = %self.run_id, uri, iteration, "batch stopped");
                return Ok((RunOutcome::Stopped, iteration));
            }
            let outcome = self
                .run_iteration(uri, ctrl, nested, scope, iteration, Some(total), binding, token)
                .await?;
            if outcome == RunOutcome::Stopped {
                return Ok((RunOutcome::Stopped, iteration + 1));
            }
        }
        Ok((RunOutcome::Completed, total))
    }

    async fn run_realtime(
        &self,
        uri: &str,
        ctrl: &dyn RealtimeController,
        nested: &ExecutionStack,
        scope: Scope<'_>,
        token: &CancellationToken,
    ) -> Result<(RunOutcome, usize), ExecutionError> {
        ctrl.clear_results();
        self.publish_results(uri, ctrl);

        let mut iteration = 0;
        let mut waiting = false;
        loop {
            if token.is_cancelled() {
                tracing::info!(run_id = %self.run_id, uri, iteration, "realtime stopped");
                return Ok((RunOutcome::Stopped, iteration));
            }

            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok((RunOutcome::Stopped, iteration)),
                next = ctrl.next_binding() => next,
            };

            match next {
                NextBinding::Ready(binding) => {
                    waiting = false;
                    let outcome = self
                        .run_iteration(uri, ctrl, nested, scope, iteration, None, binding, token)
                        .await?;
                    iteration += 1;
                    if outcome == RunOutcome::Stopped {
                        return Ok((RunOutcome::Stopped, iteration));
                    }
                }
                NextBinding::Pending => {
                    if !waiting {
                        waiting = true;
                        self.notifier.emit(EngineEvent::WaitingForBinding {
                            run_id: self.run_id,
                            controller: uri.to_string(),
                        });
                    }
                    let delay = ctrl.poll_delay();
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return Ok((RunOutcome::Stopped, iteration)),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
                NextBinding::Closed => {
                    tracing::debug!(run_id = %self.run_id, uri, iteration, "realtime feed closed");
                    return Ok((RunOutcome::Completed, iteration));
                }
            }
        }
    }

    /// Applies one binding, runs the nested stack, and records a snapshot.
    #[allow(clippy::too_many_arguments)]
    async fn run_iteration<C: Controller + ?Sized>(
        &self,
        uri: &str,
        ctrl: &C,
        nested: &ExecutionStack,
        scope: Scope<'_>,
        iteration: usize,
        total: Option<usize>,
        binding: BatchBinding,
        token: &CancellationToken,
    ) -> Result<RunOutcome, ExecutionError> {
        self.notifier.emit(EngineEvent::IterationStarted {
            run_id: self.run_id,
            controller: uri.to_string(),
            iteration,
            total,
        });

        for (slot, value) in binding.iter() {
            self.tree.set_input_at_uri(slot, value.clone())?;
        }
        let merged = match scope.bindings {
            Some(outer) => outer.merged_with(&binding),
            None => binding.clone(),
        };
        let inner = Scope {
            depth: scope.depth + 1,
            bindings: Some(&merged),
            interruptible: false,
        };
        let outcome = self.run_stack(nested, inner, token).await?;

        let values = self.record(&ctrl.recorded_uris());
        ctrl.append_result(IterationSnapshot::new(iteration, binding, values));
        self.publish_results(uri, ctrl);

        self.notifier.emit(EngineEvent::IterationCompleted {
            run_id: self.run_id,
            controller: uri.to_string(),
            iteration,
        });
        Ok(outcome)
    }

    /// Renders `uris` from the tree into one object keyed by uri segments.
    fn record(&self, uris: &[String]) -> Value {
        let mut snapshot = Value::Object(Map::new());
        for uri in uris {
            match self.tree.value_at(uri) {
                Ok(value) => merge_value(&mut snapshot, nest_under(uri, value)),
                Err(err) => {
                    tracing::warn!(run_id = %self.run_id, uri = uri.as_str(), error = %err, "recorded uri not found");
                }
            }
        }
        snapshot
    }

    fn publish_results<C: Controller + ?Sized>(&self, uri: &str, ctrl: &C) {
        let Some(output) = ctrl.results_output() else {
            return;
        };
        let slot = format!("{uri}.outputs.{output}");
        if let Err(err) = self.tree.set_value(&slot, results_value(&ctrl.results())) {
            tracing::warn!(run_id = %self.run_id, uri = slot.as_str(), error = %err, "cannot publish controller results");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit execution
// ---------------------------------------------------------------------------

async fn execute_unit(
    unit: Unit,
    tree: ItemTree,
    notifier: Notifier,
    run_id: Uuid,
    timeout: Option<Duration>,
) -> Result<(), OperationFailure> {
    let Unit { uri, op, inputs } = unit;
    let started = Instant::now();

    // `run` itself may panic before handing back a future.
    let body = AssertUnwindSafe(async { op.run(&inputs).await }).catch_unwind();
    let caught = match timeout {
        Some(limit) => match tokio::time::timeout(limit, body).await {
            Ok(caught) => caught,
            Err(_elapsed) => {
                return Err(report_failure(
                    &notifier,
                    run_id,
                    &uri,
                    format!("timed out after {}s", limit.as_secs_f64()),
                ));
            }
        },
        None => body.await,
    };

    let outputs = match caught {
        Ok(Ok(outputs)) => outputs,
        Ok(Err(err)) => return Err(report_failure(&notifier, run_id, &uri, err.to_string())),
        Err(panic) => {
            return Err(report_failure(
                &notifier,
                run_id,
                &uri,
                format!("panicked: {}", panic_message(panic.as_ref())),
            ));
        }
    };

    let declared = op.output_names();
    for (name, value) in outputs {
        if !declared.contains(&name) {
            tracing::warn!(run_id = %run_id, uri = uri.as_str(), output = name.as_str(), "dropping undeclared output");
            continue;
        }
        let slot = format!("{uri}.outputs.{name}");
        if let Err(err) = tree.set_value(&slot, value) {
            tracing::warn!(run_id = %run_id, uri = slot.as_str(), error = %err, "cannot write output");
        }
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(run_id = %run_id, uri = uri.as_str(), duration_ms, "operation finished");
    notifier.emit(EngineEvent::OperationCompleted {
        run_id,
        uri,
        duration_ms,
    });
    Ok(())
}

fn report_failure(notifier: &Notifier, run_id: Uuid, uri: &str, error: String) -> OperationFailure {
    tracing::error!(run_id = %run_id, uri, error = error.as_str(), "operation failed");
    notifier.emit(EngineEvent::OperationFailed {
        run_id,
        uri: uri.to_string(),
        error: error.clone(),
    });
    OperationFailure {
        uri: uri.to_string(),
        error,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wraps `value` in one object per segment of `uri`.
fn nest_under(uri: &str, value: Value) -> Value {
    uri.rsplit('.').fold(value, |inner, segment| {
        let mut map = Map::new();
        map.insert(segment.to_string(), inner);
        Value::Object(map)
    })
}

/// Deep-merges `from` into `into`; objects merge key by key, anything else
/// is replaced.
fn merge_value(into: &mut Value, from: Value) {
    match (into, from) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
