//! Middleware shipped with the crate.

use super::{Middleware, MiddlewareContext, Operation};
use crate::error::{Result, SwitchboardError};
use crate::metrics;
use crate::options::AuthOptions;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Logs every intercepted operation.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMiddleware;

#[async_trait]
impl Middleware for TracingMiddleware {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn pre(&self, context: &mut MiddlewareContext) -> Result<()> {
        debug!(
            operation = %context.operation,
            provider = context.provider.name(),
            channel = context.channel_name().unwrap_or("-"),
            "Operation starting"
        );
        Ok(())
    }

    async fn post(&self, context: &mut MiddlewareContext) -> Result<()> {
        debug!(
            operation = %context.operation,
            channel = context.channel_name().unwrap_or("-"),
            "Operation finished"
        );
        Ok(())
    }

    async fn error(&self, error: &SwitchboardError, context: &MiddlewareContext) {
        warn!(
            operation = %context.operation,
            channel = context.channel_name().unwrap_or("-"),
            code = %error.code,
            error = %error.message,
            "Operation failed"
        );
    }
}

const STARTED_KEY: &str = "metrics.started_us";

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Counts operations and measures their latency.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn pre(&self, context: &mut MiddlewareContext) -> Result<()> {
        let started = u64::try_from(epoch().elapsed().as_micros()).unwrap_or(u64::MAX);
        context.data.insert(STARTED_KEY.into(), Value::from(started));
        Ok(())
    }

    async fn post(&self, context: &mut MiddlewareContext) -> Result<()> {
        metrics::record_operation(context.operation, "ok");
        if let Some(started) = context.data.get(STARTED_KEY).and_then(Value::as_u64) {
            let now = epoch().elapsed();
            let elapsed = now.saturating_sub(Duration::from_micros(started));
            metrics::record_latency(context.operation, elapsed.as_secs_f64());
        }
        Ok(())
    }

    async fn error(&self, error: &SwitchboardError, context: &MiddlewareContext) {
        metrics::record_operation(context.operation, "error");
        metrics::record_error(error.code);
    }
}

/// Injects a token into connect options that carry none.
#[derive(Debug, Clone)]
pub struct AuthTokenMiddleware {
    token: String,
}

impl AuthTokenMiddleware {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl Middleware for AuthTokenMiddleware {
    fn name(&self) -> &str {
        "auth-token"
    }

    async fn pre(&self, context: &mut MiddlewareContext) -> Result<()> {
        if context.operation != Operation::Connect {
            return Ok(());
        }

        let mut options = context.connection_options()?.unwrap_or_default();
        let auth = options.auth.get_or_insert_with(AuthOptions::default);
        if auth.token.is_none() {
            auth.token = Some(self.token.clone());
            context.set_connection_options(&options)?;
            debug!("Injected auth token into connect options");
        }
        Ok(())
    }
}
