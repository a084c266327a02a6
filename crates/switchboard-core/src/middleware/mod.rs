//! Middleware chain wrapped around backend operations.
//!
//! Execution protocol for [`MiddlewareChain::execute`]:
//!
//! 1. `pre` hooks run in registration order. A failing `pre` hook has its own
//!    `error` hook called, then the error is returned; later `pre` hooks, the
//!    operation and every `post` hook are skipped.
//! 2. The operation runs. If it fails, every registered `error` hook is called
//!    in registration order and the error is returned. No `post` hook runs.
//! 3. `post` hooks run in reverse registration order. A failing `post` hook
//!    has its own `error` hook called, then the error is returned.
//!
//! Hooks are awaited one at a time; they never run concurrently.

mod builtin;

pub use builtin::{AuthTokenMiddleware, MetricsMiddleware, TracingMiddleware};

use crate::channel::Channel;
use crate::error::{Result, SwitchboardError};
use crate::message::Message;
use crate::options::ConnectionOptions;
use crate::provider::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Context key holding connect options.
pub const OPTIONS_KEY: &str = "options";
/// Context key holding the event name of a publish or subscribe.
pub const EVENT_KEY: &str = "event";
/// Context key holding the payload of a publish, or presence data.
pub const PAYLOAD_KEY: &str = "data";

/// Kind of operation being intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Publish,
    /// Message delivery, for backends that intercept inbound traffic.
    Receive,
    PresenceEnter,
    PresenceLeave,
    PresenceUpdate,
}

impl Operation {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
            Operation::Publish => "publish",
            Operation::Receive => "receive",
            Operation::PresenceEnter => "presence_enter",
            Operation::PresenceLeave => "presence_leave",
            Operation::PresenceUpdate => "presence_update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation context handed to every hook.
#[derive(Clone)]
pub struct MiddlewareContext {
    /// Backend the operation runs against.
    pub provider: Arc<dyn Provider>,
    pub operation: Operation,
    pub channel: Option<Arc<dyn Channel>>,
    pub message: Option<Message>,
    /// Free-form data bag.
    pub data: Map<String, Value>,
}

impl MiddlewareContext {
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, operation: Operation) -> Self {
        Self {
            provider,
            operation,
            channel: None,
            message: None,
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn Channel>) -> Self {
        self.channel = Some(channel);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Connect options stored in the data bag, as left by the `pre` hooks.
    ///
    /// # Errors
    ///
    /// Returns `invalid-config` if a hook stored something that is not a
    /// valid set of connection options.
    pub fn connection_options(&self) -> Result<Option<ConnectionOptions>> {
        match self.data.get(OPTIONS_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    /// Store connect options in the data bag.
    ///
    /// # Errors
    ///
    /// Returns `invalid-config` if the options cannot be serialized.
    pub fn set_connection_options(&mut self, options: &ConnectionOptions) -> Result<()> {
        self.data
            .insert(OPTIONS_KEY.to_string(), serde_json::to_value(options)?);
        Ok(())
    }

    /// Name of the channel in context, if any.
    #[must_use]
    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_ref().map(|c| c.name())
    }
}

impl fmt::Debug for MiddlewareContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareContext")
            .field("provider", &self.provider.name())
            .field("operation", &self.operation)
            .field("channel", &self.channel_name())
            .field("message", &self.message.as_ref().map(|m| &m.id))
            .field("data", &self.data)
            .finish()
    }
}

/// An interceptor around backend operations. Every hook is optional.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn pre(&self, _context: &mut MiddlewareContext) -> Result<()> {
        Ok(())
    }

    async fn post(&self, _context: &mut MiddlewareContext) -> Result<()> {
        Ok(())
    }

    async fn error(&self, _error: &SwitchboardError, _context: &MiddlewareContext) {}
}

/// Handle for a middleware registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MiddlewareId(u64);

/// Ordered middleware registrations.
#[derive(Default)]
pub struct MiddlewareChain {
    next_id: u64,
    entries: Vec<(MiddlewareId, Arc<dyn Middleware>)>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Duplicates are allowed and each gets its own id.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> MiddlewareId {
        let id = MiddlewareId(self.next_id);
        self.next_id += 1;
        debug!(middleware = middleware.name(), "Middleware registered");
        self.entries.push((id, middleware));
        id
    }

    /// Remove one registration.
    ///
    /// Returns `true` if the registration existed.
    pub fn remove(&mut self, id: MiddlewareId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `operation` inside the chain.
    ///
    /// The operation receives a copy of the context as left by the `pre`
    /// hooks, so hooks can rewrite its inputs through the data bag.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a hook or by the operation, after
    /// announcing it to the `error` hooks described in the module docs.
    pub async fn execute<T, F, Fut>(&self, mut context: MiddlewareContext, operation: F) -> Result<T>
    where
        F: FnOnce(MiddlewareContext) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let op = context.operation;

        for (_, middleware) in &self.entries {
            if let Err(err) = middleware.pre(&mut context).await {
                debug!(operation = %op, middleware = middleware.name(), error = %err, "Pre hook failed");
                middleware.error(&err, &context).await;
                return Err(err);
            }
        }

        trace!(operation = %op, "Running operation");
        let result = match operation(context.clone()).await {
            Ok(result) => result,
            Err(err) => {
                debug!(operation = %op, error = %err, "Operation failed");
                for (_, middleware) in &self.entries {
                    middleware.error(&err, &context).await;
                }
                return Err(err);
            }
        };

        for (_, middleware) in self.entries.iter().rev() {
            if let Err(err) = middleware.post(&mut context).await {
                debug!(operation = %op, middleware = middleware.name(), error = %err, "Post hook failed");
                middleware.error(&err, &context).await;
                return Err(err);
            }
        }

        Ok(result)
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(id, m)| (id, m.name())))
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capabilities::Capabilities;
    use crate::error::ErrorCode;
    use crate::listeners::ListenerId;
    use crate::options::ChannelOptions;
    use crate::provider::{ConnectionState, EventHandler, ProviderEvent};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// A backend that does nothing; enough to build contexts.
    pub(crate) struct NullProvider;

    #[async_trait]
    impl Provider for NullProvider {
        fn name(&self) -> &str {
            "NullProvider"
        }

        fn version(&self) -> &str {
            "0.0.0"
        }

        async fn connect(&self, _options: Option<ConnectionOptions>) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        fn channel(&self, name: &str, _options: ChannelOptions) -> Result<Arc<dyn Channel>> {
            Err(SwitchboardError::new(ErrorCode::ChannelNotFound, name))
        }

        fn connection_state(&self) -> ConnectionState {
            ConnectionState::Disconnected
        }

        fn on(&self, _event: ProviderEvent, _handler: EventHandler) -> ListenerId {
            crate::listeners::Registry::<(), ()>::new().insert((), ())
        }

        fn off(&self, _event: ProviderEvent, _id: ListenerId) -> bool {
            false
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::default()
        }

        async fn destroy(&self) -> Result<()> {
            Ok(())
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail_pre: bool,
        fail_post: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail_pre: false,
                fail_post: false,
            }
        }

        fn record(&self, hook: &str) {
            self.log.lock().unwrap().push(format!("{}.{hook}", self.name));
        }
    }

    #[async_trait]
    impl Middleware for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre(&self, _context: &mut MiddlewareContext) -> Result<()> {
            self.record("pre");
            if self.fail_pre {
                return Err(SwitchboardError::invalid_state("pre refused"));
            }
            Ok(())
        }

        async fn post(&self, _context: &mut MiddlewareContext) -> Result<()> {
            self.record("post");
            if self.fail_post {
                return Err(SwitchboardError::invalid_state("post refused"));
            }
            Ok(())
        }

        async fn error(&self, _error: &SwitchboardError, _context: &MiddlewareContext) {
            self.record("error");
        }
    }

    fn context() -> MiddlewareContext {
        MiddlewareContext::new(Arc::new(NullProvider), Operation::Connect)
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_pre_fifo_post_lifo() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        for name in ["A", "B", "C"] {
            chain.use_middleware(Arc::new(Recorder::new(name, &log)));
        }

        let value = chain
            .execute(context(), |_| async { Ok(42) })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(
            entries(&log),
            vec!["A.pre", "B.pre", "C.pre", "C.post", "B.post", "A.post"]
        );

        // A second run sees the same registration order.
        log.lock().unwrap().clear();
        chain.execute(context(), |_| async { Ok(()) }).await.unwrap();
        assert_eq!(entries(&log)[0], "A.pre");
        assert_eq!(entries(&log)[5], "A.post");
    }

    #[tokio::test]
    async fn test_failing_pre_skips_rest() {
        let log = Log::default();
        let ran = Arc::new(AtomicBool::new(false));
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Arc::new(Recorder::new("A", &log)));
        let mut b = Recorder::new("B", &log);
        b.fail_pre = true;
        chain.use_middleware(Arc::new(b));
        chain.use_middleware(Arc::new(Recorder::new("C", &log)));

        let flag = Arc::clone(&ran);
        let err = chain
            .execute(context(), |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::InvalidState));
        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(entries(&log), vec!["A.pre", "B.pre", "B.error"]);
    }

    #[tokio::test]
    async fn test_failing_operation_reaches_every_error_hook() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        for name in ["A", "B", "C"] {
            chain.use_middleware(Arc::new(Recorder::new(name, &log)));
        }

        let err = chain
            .execute(context(), |_| async {
                Err::<(), _>(SwitchboardError::connection("boom"))
            })
            .await
            .unwrap_err();

        assert!(err.is(ErrorCode::ConnectionFailed));
        assert_eq!(
            entries(&log),
            vec!["A.pre", "B.pre", "C.pre", "A.error", "B.error", "C.error"]
        );
    }

    #[tokio::test]
    async fn test_failing_post_stops_unwinding() {
        let log = Log::default();
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Arc::new(Recorder::new("A", &log)));
        let mut b = Recorder::new("B", &log);
        b.fail_post = true;
        chain.use_middleware(Arc::new(b));
        chain.use_middleware(Arc::new(Recorder::new("C", &log)));

        let result = chain.execute(context(), |_| async { Ok(1) }).await;

        assert!(result.is_err());
        assert_eq!(
            entries(&log),
            vec!["A.pre", "B.pre", "C.pre", "C.post", "B.post", "B.error"]
        );
    }

    #[tokio::test]
    async fn test_remove_by_handle_with_duplicates() {
        let log = Log::default();
        let shared: Arc<dyn Middleware> = Arc::new(Recorder::new("A", &log));
        let mut chain = MiddlewareChain::new();
        let first = chain.use_middleware(Arc::clone(&shared));
        let second = chain.use_middleware(Arc::clone(&shared));
        assert_ne!(first, second);
        assert_eq!(chain.len(), 2);

        assert!(chain.remove(first));
        assert!(!chain.remove(first));
        assert_eq!(chain.len(), 1);

        chain.execute(context(), |_| async { Ok(()) }).await.unwrap();
        assert_eq!(entries(&log), vec!["A.pre", "A.post"]);
    }

    struct Rewrite;

    #[async_trait]
    impl Middleware for Rewrite {
        async fn pre(&self, context: &mut MiddlewareContext) -> Result<()> {
            context.data.insert(PAYLOAD_KEY.into(), json!({"rewritten": true}));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_operation_sees_pre_hook_changes() {
        let mut chain = MiddlewareChain::new();
        chain.use_middleware(Arc::new(Rewrite));

        let seen = chain
            .execute(context(), |ctx| async move { Ok(ctx.data[PAYLOAD_KEY].clone()) })
            .await
            .unwrap();
        assert_eq!(seen, json!({"rewritten": true}));
    }

    #[test]
    fn test_connection_options_round_trip_through_context() {
        let mut ctx = context();
        assert!(ctx.connection_options().unwrap().is_none());

        let options = ConnectionOptions {
            timeout: Some(250),
            ..Default::default()
        };
        ctx.set_connection_options(&options).unwrap();
        assert_eq!(ctx.connection_options().unwrap(), Some(options));

        ctx.data.insert(OPTIONS_KEY.into(), json!({"timeout": "soon"}));
        assert!(ctx
            .connection_options()
            .unwrap_err()
            .is(ErrorCode::InvalidConfig));
    }
}
