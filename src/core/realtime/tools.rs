//! Function call tracking and the tool execution boundary.
//!
//! The realtime service streams a function call as an output item followed by
//! argument fragments. [`ToolCallTracker`] accumulates those fragments per
//! correlation key and hands each call to the executor exactly once, whether
//! the arguments complete through `response.function_call_arguments.done` or
//! through `response.output_item.done`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use super::messages::{ConversationItem, ServerEvent};
use crate::errors::SessionResult;

/// Resolution state of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    /// Arguments still streaming
    Pending,
    /// Final arguments received, result not yet submitted
    ArgumentsComplete,
    /// Result submitted back over the data channel
    ResultSent,
}

/// A function call being assembled from streamed events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCall {
    /// Correlation key: call ID, or item ID when the server sent none
    pub call_id: String,
    pub name: Option<String>,
    /// Raw JSON argument text
    pub arguments: String,
    pub state: ToolCallState,
}

impl PendingToolCall {
    fn new(call_id: String) -> Self {
        Self {
            call_id,
            name: None,
            arguments: String::new(),
            state: ToolCallState::Pending,
        }
    }

    pub fn name_or_default(&self) -> &str {
        self.name.as_deref().unwrap_or("function")
    }
}

/// Tracks function calls across the events of a session.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    pending: HashMap<String, PendingToolCall>,
    /// Item IDs mapped to call IDs
    aliases: HashMap<String, String>,
    resolved: HashSet<String>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn get(&self, call_id: &str) -> Option<&PendingToolCall> {
        self.pending.get(call_id)
    }

    /// Observe a server event; returns a call whose arguments just completed.
    ///
    /// Each correlation key is returned at most once per session.
    pub fn observe(&mut self, event: &ServerEvent) -> Option<PendingToolCall> {
        match event {
            ServerEvent::OutputItemAdded { item, .. } if item.is_function_call() => {
                let key = self.register(item)?;
                let call = self
                    .pending
                    .entry(key)
                    .or_insert_with_key(|k| PendingToolCall::new(k.clone()));
                if call.name.is_none() {
                    call.name = item.name.clone();
                }
                None
            }
            ServerEvent::FunctionCallArgumentsDelta {
                item_id,
                call_id,
                delta,
                ..
            } => {
                let key = self.key(call_id.as_deref(), item_id.as_deref())?;
                if self.resolved.contains(&key) {
                    return None;
                }
                self.pending
                    .entry(key)
                    .or_insert_with_key(|k| PendingToolCall::new(k.clone()))
                    .arguments
                    .push_str(delta);
                None
            }
            ServerEvent::FunctionCallArgumentsDone {
                item_id,
                call_id,
                name,
                arguments,
                ..
            } => {
                let key = self.key(call_id.as_deref(), item_id.as_deref())?;
                self.resolve(key, name.clone(), Some(arguments.clone()))
            }
            ServerEvent::OutputItemDone { item, .. } if item.is_function_call() => {
                let key = self.register(item)?;
                self.resolve(key, item.name.clone(), item.arguments.clone())
            }
            _ => None,
        }
    }

    /// Record that the result for `call_id` was submitted and drop the call.
    pub fn mark_sent(&mut self, call_id: &str) -> Option<PendingToolCall> {
        let mut call = self.pending.remove(call_id)?;
        call.state = ToolCallState::ResultSent;
        Some(call)
    }

    fn register(&mut self, item: &ConversationItem) -> Option<String> {
        if let (Some(item_id), Some(call_id)) = (item.id.as_deref(), item.call_id.as_deref())
            && !call_id.is_empty()
        {
            self.aliases.insert(item_id.to_string(), call_id.to_string());
        }
        self.key(item.call_id.as_deref(), item.id.as_deref())
    }

    fn key(&self, call_id: Option<&str>, item_id: Option<&str>) -> Option<String> {
        if let Some(call_id) = call_id.filter(|id| !id.is_empty()) {
            return Some(call_id.to_string());
        }
        let item_id = item_id.filter(|id| !id.is_empty())?;
        Some(
            self.aliases
                .get(item_id)
                .cloned()
                .unwrap_or_else(|| item_id.to_string()),
        )
    }

    fn resolve(
        &mut self,
        key: String,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Option<PendingToolCall> {
        if !self.resolved.insert(key.clone()) {
            debug!(call_id = %key, "Tool call already resolved");
            return None;
        }
        let call = self
            .pending
            .entry(key)
            .or_insert_with_key(|k| PendingToolCall::new(k.clone()));
        if name.is_some() {
            call.name = name;
        }
        if let Some(arguments) = arguments {
            call.arguments = arguments;
        }
        call.state = ToolCallState::ArgumentsComplete;
        Some(call.clone())
    }
}

// =============================================================================
// Tool Execution
// =============================================================================

/// External collaborator that runs a function call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `name` with its raw JSON arguments, returning the output text
    /// submitted as `function_call_output`.
    async fn execute(&self, name: &str, arguments: &str) -> SessionResult<String>;
}

/// Executor used when no real tool backend is wired in.
///
/// Produces a well-formed acknowledgement echoing the call.
#[derive(Debug, Default, Clone)]
pub struct SyntheticToolExecutor;

#[async_trait]
impl ToolExecutor for SyntheticToolExecutor {
    async fn execute(&self, name: &str, arguments: &str) -> SessionResult<String> {
        let parsed = match serde_json::from_str::<serde_json::Value>(arguments) {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool arguments are not valid JSON");
                serde_json::Value::String(arguments.to_string())
            }
        };
        let output = json!({
            "status": "ok",
            "tool": name,
            "arguments": parsed,
        });
        Ok(output.to_string())
    }
}

/// Output payload reported when execution fails.
pub fn error_output(message: &str) -> String {
    json!({ "status": "error", "error": message }).to_string()
}
