use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use paws_types::binding::{IterationSnapshot, NextBinding};
use paws_types::error::OperationError;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TryRecvError};

use super::{Controller, RealtimeController, ResultLog, bind_routes, results_value};
use crate::operation::{Operation, OperationInputs, OperationOutputs};

/// Producer side of a [`ChannelRealtime`]. Cheap to clone; the controller
/// reports `Closed` once every feed is dropped and the queue is drained.
#[derive(Debug, Clone)]
pub struct RealtimeFeed {
    sender: mpsc::UnboundedSender<Value>,
}

impl RealtimeFeed {
    /// Queues one iteration value. Returns false if the controller is gone.
    pub fn push(&self, value: Value) -> bool {
        self.sender.send(value).is_ok()
    }
}

/// Realtime controller fed from a channel.
///
/// Each value pushed through the [`RealtimeFeed`] becomes one iteration,
/// bound onto the routes the same way [`ValueBatch`](super::ValueBatch)
/// binds its elements. Output `realtime_outputs` collects the snapshots.
#[derive(Debug)]
pub struct ChannelRealtime {
    sub_operations: Vec<String>,
    routes: Vec<String>,
    recorded: Vec<String>,
    delay: Duration,
    receiver: Mutex<mpsc::UnboundedReceiver<Value>>,
    results: ResultLog,
}

impl ChannelRealtime {
    pub fn new(poll_delay: Duration) -> (Self, RealtimeFeed) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let controller = Self {
            sub_operations: Vec::new(),
            routes: Vec::new(),
            recorded: Vec::new(),
            delay: poll_delay,
            receiver: Mutex::new(receiver),
            results: ResultLog::new(),
        };
        (controller, RealtimeFeed { sender })
    }

    pub fn with_sub_operations<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_operations = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_routes<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.routes = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn recording<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recorded = uris.into_iter().map(Into::into).collect();
        self
    }

    pub fn results_value(&self) -> Value {
        results_value(&self.results.snapshot())
    }

    fn poll(&self) -> NextBinding {
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match receiver.try_recv() {
                Ok(value) => match bind_routes(&self.routes, &value) {
                    Some(binding) => return NextBinding::Ready(binding),
                    None => {
                        tracing::warn!(
                            routes = self.routes.len(),
                            "dropping realtime value that does not match the routes"
                        );
                    }
                },
                Err(TryRecvError::Empty) => return NextBinding::Pending,
                Err(TryRecvError::Disconnected) => return NextBinding::Closed,
            }
        }
    }
}

impl Operation for ChannelRealtime {
    fn kind(&self) -> &str {
        "channel_realtime"
    }

    fn input_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn output_names(&self) -> Vec<String> {
        vec!["realtime_outputs".to_string()]
    }

    fn description(&self) -> &str {
        "Run the sub-operations once per value received on a feed"
    }

    fn run<'a>(
        &'a self,
        _inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        Box::pin(future::ready(Ok(OperationOutputs::from([(
            "realtime_outputs".to_string(),
            Value::Array(Vec::new()),
        )]))))
    }
}

impl Controller for ChannelRealtime {
    fn sub_operation_uris(&self) -> Vec<String> {
        self.sub_operations.clone()
    }

    fn input_routes(&self) -> Vec<String> {
        self.routes.clone()
    }

    fn recorded_uris(&self) -> Vec<String> {
        self.recorded.clone()
    }

    fn append_result(&self, snapshot: IterationSnapshot) {
        self.results.push(snapshot);
    }

    fn results(&self) -> Vec<IterationSnapshot> {
        self.results.snapshot()
    }

    fn clear_results(&self) {
        self.results.clear();
    }

    fn results_output(&self) -> Option<&str> {
        Some("realtime_outputs")
    }
}

impl RealtimeController for ChannelRealtime {
    fn next_binding(&self) -> BoxFuture<'_, NextBinding> {
        Box::pin(future::ready(self.poll()))
    }

    fn poll_delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paws_types::binding::BatchBinding;
    use serde_json::json;

    #[tokio::test]
    async fn test_pending_ready_closed() {
        let (rt, feed) = ChannelRealtime::new(Duration::ZERO);
        let rt = rt.with_routes(["fit.inputs.x"]);

        assert_eq!(rt.next_binding().await, NextBinding::Pending);

        assert!(feed.push(json!(4)));
        let expected: BatchBinding = [("fit.inputs.x", json!(4))].into_iter().collect();
        assert_eq!(rt.next_binding().await, NextBinding::Ready(expected));

        drop(feed);
        assert_eq!(rt.next_binding().await, NextBinding::Closed);
    }

    #[tokio::test]
    async fn test_queued_values_drain_before_closed() {
        let (rt, feed) = ChannelRealtime::new(Duration::from_millis(5));
        let rt = rt.with_routes(["a.inputs.x", "a.inputs.y"]);

        feed.push(json!([1, 2]));
        feed.push(json!("not a pair"));
        feed.push(json!([3, 4]));
        drop(feed);

        assert!(matches!(rt.next_binding().await, NextBinding::Ready(_)));
        match rt.next_binding().await {
            NextBinding::Ready(b) => assert_eq!(b.get("a.inputs.y"), Some(&json!(4))),
            other => panic!("expected a binding, got {other:?}"),
        }
        assert_eq!(rt.next_binding().await, NextBinding::Closed);
        assert_eq!(rt.poll_delay(), Duration::from_millis(5));
    }
}
