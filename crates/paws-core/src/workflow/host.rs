//! The workflow host: one item tree plus the run/stop surface around it.
//!
//! [`Workflow`] owns the tree, caches the execution stack until the tree's
//! structure changes, and allows at most one run at a time. [`StopHandle`]
//! is a cloneable handle for requesting a cooperative stop from anywhere,
//! including from inside a running operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use paws_types::config::EngineConfig;
use paws_types::event::{EngineEvent, TreeEvent};
use paws_types::error::StructuralError;
use paws_types::locator::InputLocator;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::event::{EventBus, MessageSink, Notifier};
use crate::operation::OperationKind;
use crate::plugin::{EmptyPluginRegistry, PluginRegistry};
use crate::tree::{BrokenReference, ItemTree};

use super::catalog::Catalog;
use super::coordinator::{Coordinator, ExecutionError, RunOutcome};
use super::stack::{ExecutionStack, ScheduleError, build_stack};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// StopHandle
// ---------------------------------------------------------------------------

/// Shared run state: the visible running flag, the in-progress guard, and
/// the token of the current run.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    token: Arc<Mutex<CancellationToken>>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests a cooperative stop of the current run, if any.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        lock(&self.token).cancel();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims the run slot and installs a fresh token.
    fn arm(&self) -> Result<RunGuard<'_>, ExecutionError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecutionError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *lock(&self.token) = token.clone();
        self.running.store(true, Ordering::SeqCst);
        Ok(RunGuard {
            handle: self,
            token,
        })
    }
}

/// Releases the run slot when the run ends or its future is dropped.
struct RunGuard<'a> {
    handle: &'a StopHandle,
    token: CancellationToken,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.handle.running.store(false, Ordering::SeqCst);
        self.handle.active.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct Workflow {
    tree: ItemTree,
    plugins: Arc<dyn PluginRegistry>,
    config: EngineConfig,
    notifier: Notifier,
    stop: StopHandle,
    tree_events: Mutex<broadcast::Receiver<TreeEvent>>,
    cached: Mutex<Option<ExecutionStack>>,
}

impl Workflow {
    pub fn new(config: EngineConfig) -> Self {
        let tree = ItemTree::with_event_capacity(config.effective_event_capacity());
        let tree_events = Mutex::new(tree.subscribe());
        let notifier = Notifier::new(EventBus::new(config.effective_event_capacity()));
        Self {
            tree,
            plugins: Arc::new(EmptyPluginRegistry),
            config,
            notifier,
            stop: StopHandle::default(),
            tree_events,
            cached: Mutex::new(None),
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<dyn PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Adds a destination for rendered progress lines.
    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.notifier.add_sink(sink);
        self
    }

    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.notifier.subscribe()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // -- tree editing --------------------------------------------------------

    pub fn add_operation(&self, tag: &str, op: OperationKind) -> Result<String, StructuralError> {
        self.tree.add_operation(tag, op)
    }

    pub fn set_locator(&self, slot_uri: &str, locator: InputLocator) -> Result<(), StructuralError> {
        self.tree.set_locator(slot_uri, locator)
    }

    /// Writes a value into an operation's input slot.
    pub fn set_input_at_uri(&self, uri: &str, value: Value) -> Result<(), StructuralError> {
        self.tree.set_input_at_uri(uri, value)
    }

    pub fn remove(&self, uri: &str) -> Result<(), StructuralError> {
        self.tree.remove(uri)
    }

    pub fn broken_references(&self) -> Vec<BrokenReference> {
        self.tree.broken_references()
    }

    // -- scheduling and execution --------------------------------------------

    /// The execution stack for the current tree.
    ///
    /// The last stack is reused until a structural tree event (node added or
    /// removed, locator changed) arrives.
    pub fn build_stack(&self) -> Result<ExecutionStack, ScheduleError> {
        let mut cached = lock(&self.cached);
        let dirty = self.drain_tree_events();
        if let (false, Some(stack)) = (dirty, cached.as_ref()) {
            return Ok(stack.clone());
        }

        *cached = None;
        let stack = build_stack(&Catalog::from_tree(&self.tree)?)?;
        tracing::debug!(
            layers = stack.len(),
            operations = stack.operations().len(),
            "execution stack built"
        );
        self.notifier.emit(EngineEvent::StackBuilt {
            layers: stack.len(),
            operations: stack.operations().len(),
        });
        *cached = Some(stack.clone());
        Ok(stack)
    }

    fn drain_tree_events(&self) -> bool {
        let mut events = lock(&self.tree_events);
        let mut dirty = false;
        loop {
            match events.try_recv() {
                Ok(event) => dirty |= event.is_structural(),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "tree events lagged, rebuilding stack");
                    dirty = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        dirty
    }

    /// Runs the workflow once. Fails with [`ExecutionError::AlreadyRunning`]
    /// while another run is in progress.
    pub async fn run(&self) -> Result<RunOutcome, ExecutionError> {
        let guard = self.stop.arm()?;
        let stack = self.build_stack().inspect_err(|err| {
            tracing::error!(error = %err, "cannot build execution stack");
        })?;
        let coordinator = Coordinator::new(
            self.tree.clone(),
            Arc::clone(&self.plugins),
            self.notifier.clone(),
            &self.config,
        );
        coordinator.run(&stack, &guard.token).await
    }

    pub fn stop(&self) {
        tracing::info!("stop requested");
        self.stop.stop();
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
