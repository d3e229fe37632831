use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;

use voicelink_types::events::client::ToolResultEvent;
use voicelink_types::{ClientEvent, ToolCallRequest, ToolSchema};

use crate::protocol::OutboundTx;

pub type ToolResult = Result<serde_json::Value, String>;
pub type BoxedToolFuture = Pin<Box<dyn Future<Output = ToolResult> + Send>>;
pub type ToolHandler = Arc<dyn Fn(serde_json::Value) -> BoxedToolFuture + Send + Sync>;

struct RegisteredTool {
    schema: ToolSchema,
    handler: ToolHandler,
}

/// Application-registered tools, shared between the engine API and the
/// dispatcher. Registration is allowed before or during a session; schemas
/// registered before `connect` are advertised in `session.start`.
#[derive(Clone, Default)]
pub(crate) struct ToolRegistry {
    inner: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: ToolSchema, handler: ToolHandler) {
        if let Ok(mut tools) = self.inner.write() {
            let name = schema.name().to_string();
            if tools
                .insert(name.clone(), RegisteredTool { schema, handler })
                .is_some()
            {
                tracing::warn!("replacing handler for tool {:?}", name);
            }
        }
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.inner
            .read()
            .map(|tools| tools.values().map(|t| t.schema.clone()).collect())
            .unwrap_or_default()
    }

    fn get(&self, name: &str) -> Option<ToolHandler> {
        self.inner
            .read()
            .ok()
            .and_then(|tools| tools.get(name).map(|t| t.handler.clone()))
    }
}

/// Runs remote tool calls against registered handlers and settles each call
/// id exactly once, success or error, back through the transport.
#[derive(Clone)]
pub(crate) struct ToolDispatcher {
    registry: ToolRegistry,
    outbound: OutboundTx,
    pending: Arc<Mutex<HashSet<String>>>,
    warn_after: Duration,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, outbound: OutboundTx, warn_after: Duration) -> Self {
        Self {
            registry,
            outbound,
            pending: Arc::new(Mutex::new(HashSet::new())),
            warn_after,
        }
    }

    /// Never blocks the caller: handler execution and result delivery are
    /// spawned, so inbound-event processing keeps its arrival order.
    pub fn dispatch(&self, request: ToolCallRequest) {
        {
            let Ok(mut pending) = self.pending.lock() else {
                return;
            };
            if !pending.insert(request.call_id().to_string()) {
                tracing::warn!("duplicate tool call id {:?}, ignoring", request.call_id());
                return;
            }
        }

        let Some(handler) = self.registry.get(request.name()) else {
            tracing::warn!(
                "tool call {:?} names unknown tool {:?}",
                request.call_id(),
                request.name()
            );
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher
                    .resolve(
                        request.call_id(),
                        Err(format!("unknown tool: {}", request.name())),
                    )
                    .await;
            });
            return;
        };

        let dispatcher = self.clone();
        tokio::spawn(async move {
            let call_id = request.call_id().to_string();
            let name = request.name().to_string();
            let fut = AssertUnwindSafe((handler)(request.arguments().clone())).catch_unwind();
            tokio::pin!(fut);

            let outcome = tokio::select! {
                outcome = &mut fut => outcome,
                _ = tokio::time::sleep(dispatcher.warn_after) => {
                    tracing::warn!(
                        "tool {:?} (call {:?}) still running after {:?}",
                        name,
                        call_id,
                        dispatcher.warn_after
                    );
                    fut.await
                }
            };

            let result = match outcome {
                Ok(settled) => settled,
                Err(_) => Err(format!("tool {name} panicked")),
            };
            dispatcher.resolve(&call_id, result).await;
        });
    }

    /// Settle-once: the second resolution attempt for an id is rejected.
    pub async fn resolve(&self, call_id: &str, result: ToolResult) {
        {
            let Ok(mut pending) = self.pending.lock() else {
                return;
            };
            if !pending.remove(call_id) {
                tracing::warn!("tool call {:?} already resolved, dropping result", call_id);
                return;
            }
        }
        let event = match result {
            Ok(output) => ToolResultEvent::success(call_id.to_string(), output),
            Err(error) => ToolResultEvent::failure(call_id.to_string(), error),
        };
        if self
            .outbound
            .send(ClientEvent::ToolResult(event))
            .await
            .is_err()
        {
            tracing::warn!("tool call {:?} resolved after transport closed", call_id);
        }
    }

    /// Calls still unsettled at teardown; the session logs them so the
    /// remote's wait is at least visible.
    pub fn drain_pending(&self) -> Vec<String> {
        self.pending
            .lock()
            .map(|mut pending| pending.drain().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn dispatcher_with_sink(
        registry: ToolRegistry,
    ) -> (ToolDispatcher, mpsc::Receiver<ClientEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            ToolDispatcher::new(registry, tx, Duration::from_secs(5)),
            rx,
        )
    }

    fn echo_schema(name: &str) -> ToolSchema {
        ToolSchema::new(
            name.to_string(),
            "test tool".to_string(),
            json!({"type": "object"}),
        )
    }

    fn expect_result(event: Option<ClientEvent>) -> ToolResultEvent {
        match event {
            Some(ClientEvent::ToolResult(result)) => result,
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registered_tool_settles_exactly_once() {
        let registry = ToolRegistry::new();
        registry.register(
            echo_schema("echo"),
            Arc::new(|args| Box::pin(async move { Ok(json!({"echo": args})) })),
        );
        let (dispatcher, mut rx) = dispatcher_with_sink(registry);

        dispatcher.dispatch(ToolCallRequest::new(
            "call-1".to_string(),
            "echo".to_string(),
            json!({"x": 1}),
        ));

        let result = expect_result(rx.recv().await);
        assert_eq!(result.call_id(), "call-1");
        assert_eq!(result.output(), Some(&json!({"echo": {"x": 1}})));
        assert!(result.error().is_none());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "no second result may arrive");
        assert!(dispatcher.drain_pending().is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_gets_error_result_without_handler_invocation() {
        let (dispatcher, mut rx) = dispatcher_with_sink(ToolRegistry::new());

        dispatcher.dispatch(ToolCallRequest::new(
            "call-2".to_string(),
            "missing".to_string(),
            json!({}),
        ));

        let result = expect_result(rx.recv().await);
        assert_eq!(result.call_id(), "call-2");
        assert_eq!(result.error(), Some("unknown tool: missing"));
        assert!(result.output().is_none());
    }

    #[tokio::test]
    async fn concurrent_calls_settle_under_their_own_ids() {
        let registry = ToolRegistry::new();
        registry.register(
            echo_schema("sleepy"),
            Arc::new(|args| {
                Box::pin(async move {
                    let delay = args["delay_ms"].as_u64().unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(json!({"slept": delay}))
                })
            }),
        );
        let (dispatcher, mut rx) = dispatcher_with_sink(registry);

        // First call sleeps longer, so completion order inverts arrival order.
        dispatcher.dispatch(ToolCallRequest::new(
            "slow".to_string(),
            "sleepy".to_string(),
            json!({"delay_ms": 120}),
        ));
        dispatcher.dispatch(ToolCallRequest::new(
            "fast".to_string(),
            "sleepy".to_string(),
            json!({"delay_ms": 5}),
        ));

        let first = expect_result(rx.recv().await);
        let second = expect_result(rx.recv().await);
        assert_eq!(first.call_id(), "fast");
        assert_eq!(first.output(), Some(&json!({"slept": 5})));
        assert_eq!(second.call_id(), "slow");
        assert_eq!(second.output(), Some(&json!({"slept": 120})));
    }

    #[tokio::test]
    async fn duplicate_call_id_is_ignored() {
        let registry = ToolRegistry::new();
        registry.register(
            echo_schema("echo"),
            Arc::new(|args| Box::pin(async move { Ok(args) })),
        );
        let (dispatcher, mut rx) = dispatcher_with_sink(registry);

        let request =
            ToolCallRequest::new("dup".to_string(), "echo".to_string(), json!({"n": 1}));
        dispatcher.dispatch(request.clone());
        dispatcher.dispatch(request);

        let _ = expect_result(rx.recv().await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err(), "duplicate id must not settle twice");
    }

    #[tokio::test]
    async fn second_resolution_attempt_is_rejected() {
        let (dispatcher, mut rx) = dispatcher_with_sink(ToolRegistry::new());
        if let Ok(mut pending) = dispatcher.pending.lock() {
            pending.insert("once".to_string());
        }

        dispatcher.resolve("once", Ok(json!(1))).await;
        dispatcher.resolve("once", Ok(json!(2))).await;

        let result = expect_result(rx.recv().await);
        assert_eq!(result.output(), Some(&json!(1)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn panicking_handler_becomes_error_result() {
        let registry = ToolRegistry::new();
        registry.register(
            echo_schema("boom"),
            Arc::new(|_| Box::pin(async move { panic!("kaboom") })),
        );
        registry.register(
            echo_schema("ok"),
            Arc::new(|_| Box::pin(async move { Ok(json!("fine")) })),
        );
        let (dispatcher, mut rx) = dispatcher_with_sink(registry);

        dispatcher.dispatch(ToolCallRequest::new(
            "call-boom".to_string(),
            "boom".to_string(),
            json!({}),
        ));
        let result = expect_result(rx.recv().await);
        assert_eq!(result.call_id(), "call-boom");
        assert!(result.error().unwrap_or_default().contains("panicked"));

        // The dispatcher survives and keeps serving.
        dispatcher.dispatch(ToolCallRequest::new(
            "call-ok".to_string(),
            "ok".to_string(),
            json!({}),
        ));
        let result = expect_result(rx.recv().await);
        assert_eq!(result.call_id(), "call-ok");
        assert_eq!(result.output(), Some(&json!("fine")));
    }
}
