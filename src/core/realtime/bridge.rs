//! Hands function calls to a tool executor and returns the outcome.
//!
//! The bridge itself keeps no state: each result is correlated purely by the
//! `call_id` of the request it answers, and each submission is exactly one
//! [`OutboundCommand::FunctionResultSubmit`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::base::{FunctionCallRequest, RealtimeError, RealtimeResult};
use super::openai::commands::{FunctionOutcome, OutboundCommand};

/// Anything that can carry outbound commands to the service.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send_command(&self, command: OutboundCommand) -> RealtimeResult<()>;
}

#[async_trait]
impl<T: CommandSink + ?Sized> CommandSink for &T {
    async fn send_command(&self, command: OutboundCommand) -> RealtimeResult<()> {
        (**self).send_command(command).await
    }
}

#[async_trait]
impl<T: CommandSink + ?Sized> CommandSink for Arc<T> {
    async fn send_command(&self, command: OutboundCommand) -> RealtimeResult<()> {
        (**self).send_command(command).await
    }
}

/// Executes tools on behalf of the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `name` with `arguments`. `Err` carries a message for the model.
    async fn execute(&self, name: &str, arguments: &Map<String, Value>) -> FunctionOutcome;
}

/// Executor for sessions that register no tool runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoToolExecutor;

#[async_trait]
impl ToolExecutor for NoToolExecutor {
    async fn execute(&self, _name: &str, _arguments: &Map<String, Value>) -> FunctionOutcome {
        Err("no tool executor attached".to_string())
    }
}

/// Routes tool outcomes back into the session.
pub struct FunctionCallBridge<S> {
    sink: S,
}

impl<S: CommandSink> FunctionCallBridge<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Submit the outcome of `call_id`. The model resumes generating once
    /// the result lands.
    pub async fn submit(&self, call_id: &str, outcome: FunctionOutcome) -> RealtimeResult<()> {
        if call_id.is_empty() {
            return Err(RealtimeError::InvalidConfiguration(
                "function result requires a call_id".to_string(),
            ));
        }
        if let Err(message) = &outcome {
            tracing::debug!("Tool call {} failed: {}", call_id, message);
        }
        self.sink
            .send_command(OutboundCommand::function_result(call_id, outcome))
            .await
    }

    /// Run `request` through `executor` and submit whatever it returns.
    pub async fn handle<E: ToolExecutor + ?Sized>(
        &self,
        request: &FunctionCallRequest,
        executor: &E,
    ) -> RealtimeResult<()> {
        tracing::info!("Executing tool {} (call {})", request.name, request.call_id);
        let outcome = executor.execute(&request.name, &request.arguments).await;
        self.submit(&request.call_id, outcome).await
    }
}
