//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use paws_types::binding::ControlMode;
use paws_types::error::{OperationError, SinkError};
use paws_types::locator::InputLocator;

use crate::event::MessageSink;
use crate::operation::{Operation, OperationInputs, OperationOutputs};
use crate::workflow::catalog::{Catalog, ControlDecl, InputDecl, OpDecl};

type Body = dyn Fn(&OperationInputs) -> Result<OperationOutputs, OperationError> + Send + Sync;

/// Operation backed by a closure, with an optional delay before it runs.
pub struct FnOp {
    kind: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    delay: Duration,
    body: Box<Body>,
}

impl FnOp {
    pub fn new<F>(kind: &str, inputs: &[&str], outputs: &[&str], body: F) -> Self
    where
        F: Fn(&OperationInputs) -> Result<OperationOutputs, OperationError> + Send + Sync + 'static,
    {
        Self {
            kind: kind.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            delay: Duration::ZERO,
            body: Box::new(body),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Operation for FnOp {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn input_names(&self) -> Vec<String> {
        self.inputs.clone()
    }

    fn output_names(&self) -> Vec<String> {
        self.outputs.clone()
    }

    fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            (self.body)(inputs)
        })
    }
}

pub struct PanicOp;

impl Operation for PanicOp {
    fn kind(&self) -> &str {
        "panic"
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run<'a>(
        &'a self,
        _inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        Box::pin(async move { explode() })
    }
}

/// Panics inside `run` itself, before any future exists.
pub struct EagerPanicOp;

impl Operation for EagerPanicOp {
    fn kind(&self) -> &str {
        "eager-panic"
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run<'a>(
        &'a self,
        _inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        let outputs = explode();
        Box::pin(std::future::ready(outputs))
    }
}

fn explode() -> Result<OperationOutputs, OperationError> {
    panic!("boom")
}

/// Sleeps for a fixed time and tracks how many copies run at once.
#[derive(Clone)]
pub struct GaugeOp {
    hold: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    runs: Arc<AtomicUsize>,
}

impl GaugeOp {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            active: Arc::default(),
            peak: Arc::default(),
            runs: Arc::default(),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Operation for GaugeOp {
    fn kind(&self) -> &str {
        "gauge"
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run<'a>(
        &'a self,
        _inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.hold).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(OperationOutputs::new())
        })
    }
}

#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl MessageSink for CollectingSink {
    fn write(&self, line: &str) -> Result<(), SinkError> {
        self.lines.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

pub struct FailingSink;

impl MessageSink for FailingSink {
    fn write(&self, _line: &str) -> Result<(), SinkError> {
        Err(SinkError::Closed)
    }
}

pub fn decl(uri: &str, inputs: &[(&str, InputLocator)], outputs: &[&str]) -> OpDecl {
    OpDecl {
        uri: uri.to_string(),
        inputs: inputs
            .iter()
            .map(|(name, locator)| InputDecl {
                name: name.to_string(),
                uri: format!("{uri}.inputs.{name}"),
                locator: locator.clone(),
            })
            .collect(),
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        control: None,
    }
}

pub fn controller_decl(
    uri: &str,
    mode: ControlMode,
    inputs: &[(&str, InputLocator)],
    outputs: &[&str],
    sub_operations: &[&str],
    routes: &[&str],
) -> OpDecl {
    OpDecl {
        control: Some(ControlDecl {
            mode,
            sub_operations: sub_operations.iter().map(|s| s.to_string()).collect(),
            routes: routes.iter().map(|s| s.to_string()).collect(),
        }),
        ..decl(uri, inputs, outputs)
    }
}

pub fn catalog_of(decls: Vec<OpDecl>) -> Catalog {
    let mut catalog = Catalog::default();
    for decl in decls {
        catalog.push(decl);
    }
    catalog
}
