//! Transcript assembly from streamed protocol events.
//!
//! [`Transcript`] folds server events into an ordered list of
//! speaker-attributed items. Each item is grouped by a [`CorrelationKey`]
//! made of the lane the event belongs to and the identifier the server
//! supplied for it. Deltas append to an open item, done events overwrite and
//! close it, and closed items never change again.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::messages::{ConversationItem, ServerEvent};

/// Who produced a transcript item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
    /// Tool invocations
    System,
}

/// Whether an item still accepts deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Open,
    Closed,
}

/// Independent streams of text the server interleaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    UserSpeech,
    AssistantSpeech,
    AssistantText,
    ToolCall,
}

impl Lane {
    pub fn speaker(&self) -> Speaker {
        match self {
            Lane::UserSpeech => Speaker::User,
            Lane::AssistantSpeech | Lane::AssistantText => Speaker::Assistant,
            Lane::ToolCall => Speaker::System,
        }
    }
}

/// Grouping key for streamed fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationKey {
    pub lane: Lane,
    pub id: String,
}

impl CorrelationKey {
    pub fn new(lane: Lane, id: impl Into<String>) -> Self {
        Self {
            lane,
            id: id.into(),
        }
    }
}

/// One entry of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptItem {
    /// Server-supplied identifier (item ID or call ID)
    pub id: String,
    pub key: CorrelationKey,
    pub speaker: Speaker,
    pub text: String,
    /// Call duration when the item first appeared, as `mm:ss`
    pub timestamp: String,
    pub status: ItemStatus,
}

impl TranscriptItem {
    pub fn is_open(&self) -> bool {
        self.status == ItemStatus::Open
    }
}

/// Format a call duration as `mm:ss`.
pub fn format_timestamp(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Display text for a tool call that is still streaming arguments.
pub fn tool_progress_text(name: &str, arguments: &str) -> String {
    format!("Calling {}: {}", name, arguments)
}

/// Display text for a tool call whose arguments are complete.
pub fn tool_final_text(name: &str, arguments: &str) -> String {
    format!("Called {}: {}", name, arguments)
}

const UNKNOWN_TOOL: &str = "function";

#[derive(Debug, Clone, Default)]
struct ToolDisplay {
    name: Option<String>,
    arguments: String,
}

/// Ordered transcript plus the bookkeeping needed to fold further events.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    items: Vec<TranscriptItem>,
    index: HashMap<CorrelationKey, usize>,
    tools: HashMap<String, ToolDisplay>,
    /// Item IDs of function calls mapped to their call IDs
    aliases: HashMap<String, String>,
    /// Keys opened by each response, closed when it completes
    responses: HashMap<String, Vec<CorrelationKey>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[TranscriptItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&TranscriptItem> {
        self.index.get(key).map(|&idx| &self.items[idx])
    }

    pub fn open_items(&self) -> impl Iterator<Item = &TranscriptItem> {
        self.items.iter().filter(|item| item.is_open())
    }

    /// Fold one event and return the resulting transcript.
    pub fn apply(mut self, event: &ServerEvent, elapsed: Duration) -> Self {
        self.fold(event, elapsed);
        self
    }

    /// Fold one event in place, returning the positions of touched items.
    pub fn fold(&mut self, event: &ServerEvent, elapsed: Duration) -> Vec<usize> {
        let mut touched = match event {
            ServerEvent::InputTranscriptionDelta { item_id, delta, .. } => {
                let key = CorrelationKey::new(Lane::UserSpeech, item_id);
                self.append(key, delta, elapsed, None)
            }
            ServerEvent::InputTranscriptionCompleted {
                item_id,
                transcript,
                ..
            } => {
                let key = CorrelationKey::new(Lane::UserSpeech, item_id);
                self.complete(key, transcript.clone(), elapsed)
            }
            ServerEvent::AudioTranscriptDelta {
                response_id,
                item_id,
                delta,
            } => {
                let key = CorrelationKey::new(Lane::AssistantSpeech, item_id);
                self.append(key, delta, elapsed, response_id.as_deref())
            }
            ServerEvent::AudioTranscriptDone {
                item_id,
                transcript,
                ..
            } => {
                let key = CorrelationKey::new(Lane::AssistantSpeech, item_id);
                self.complete(key, transcript.clone(), elapsed)
            }
            ServerEvent::TextDelta {
                response_id,
                item_id,
                delta,
            } => {
                let key = CorrelationKey::new(Lane::AssistantText, item_id);
                self.append(key, delta, elapsed, response_id.as_deref())
            }
            ServerEvent::TextDone { item_id, text, .. } => {
                let key = CorrelationKey::new(Lane::AssistantText, item_id);
                self.complete(key, text.clone(), elapsed)
            }
            ServerEvent::OutputItemAdded {
                response_id, item, ..
            } if item.is_function_call() => self.tool_added(item, response_id.as_deref(), elapsed),
            ServerEvent::OutputItemDone { item, .. } if item.is_function_call() => {
                self.tool_item_done(item, elapsed)
            }
            ServerEvent::FunctionCallArgumentsDelta {
                response_id,
                item_id,
                call_id,
                delta,
            } => self.tool_delta(
                call_id.as_deref(),
                item_id.as_deref(),
                delta,
                response_id.as_deref(),
                elapsed,
            ),
            ServerEvent::FunctionCallArgumentsDone {
                item_id,
                call_id,
                name,
                arguments,
                ..
            } => self.tool_done(
                call_id.as_deref(),
                item_id.as_deref(),
                name.as_deref(),
                arguments,
                elapsed,
            ),
            ServerEvent::ConversationItemCreated { item, .. } => self.user_item(item, elapsed),
            ServerEvent::ResponseDone { response } => {
                let mut touched = Vec::new();
                for item in &response.output {
                    touched.extend(self.output_done(item, elapsed));
                }
                touched.extend(self.close_response(&response.id));
                touched
            }
            _ => Vec::new(),
        };
        touched.sort_unstable();
        touched.dedup();
        touched
    }

    // =========================================================================
    // Generic lane handling
    // =========================================================================

    fn append(
        &mut self,
        key: CorrelationKey,
        delta: &str,
        elapsed: Duration,
        response_id: Option<&str>,
    ) -> Vec<usize> {
        match self.index.get(&key).copied() {
            Some(idx) if self.items[idx].is_open() => {
                self.items[idx].text.push_str(delta);
                vec![idx]
            }
            Some(_) => {
                debug!(lane = ?key.lane, id = %key.id, "Ignoring delta for closed transcript item");
                Vec::new()
            }
            None => {
                let idx = self.push(key, delta.to_string(), ItemStatus::Open, elapsed, response_id);
                vec![idx]
            }
        }
    }

    fn complete(&mut self, key: CorrelationKey, text: String, elapsed: Duration) -> Vec<usize> {
        match self.index.get(&key).copied() {
            Some(idx) if self.items[idx].is_open() => {
                let item = &mut self.items[idx];
                item.text = text;
                item.status = ItemStatus::Closed;
                vec![idx]
            }
            Some(_) => {
                debug!(lane = ?key.lane, id = %key.id, "Ignoring duplicate completion");
                Vec::new()
            }
            None => vec![self.push(key, text, ItemStatus::Closed, elapsed, None)],
        }
    }

    fn push(
        &mut self,
        key: CorrelationKey,
        text: String,
        status: ItemStatus,
        elapsed: Duration,
        response_id: Option<&str>,
    ) -> usize {
        let idx = self.items.len();
        if status == ItemStatus::Open
            && let Some(response_id) = response_id
        {
            self.responses
                .entry(response_id.to_string())
                .or_default()
                .push(key.clone());
        }
        self.items.push(TranscriptItem {
            id: key.id.clone(),
            speaker: key.lane.speaker(),
            key: key.clone(),
            text,
            timestamp: format_timestamp(elapsed),
            status,
        });
        self.index.insert(key, idx);
        idx
    }

    fn close_response(&mut self, response_id: &str) -> Vec<usize> {
        let Some(keys) = self.responses.remove(response_id) else {
            return Vec::new();
        };
        let mut touched = Vec::new();
        for key in keys {
            if let Some(&idx) = self.index.get(&key)
                && self.items[idx].is_open()
            {
                self.items[idx].status = ItemStatus::Closed;
                touched.push(idx);
            }
        }
        touched
    }

    // =========================================================================
    // Tool call lane
    // =========================================================================

    fn tool_key(&self, call_id: Option<&str>, item_id: Option<&str>) -> Option<String> {
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

    fn tool_name(&self, key: &str) -> &str {
        self.tools
            .get(key)
            .and_then(|tool| tool.name.as_deref())
            .unwrap_or(UNKNOWN_TOOL)
    }

    fn tool_added(
        &mut self,
        item: &ConversationItem,
        response_id: Option<&str>,
        elapsed: Duration,
    ) -> Vec<usize> {
        let Some(key) = self.tool_key(item.call_id.as_deref(), item.id.as_deref()) else {
            return Vec::new();
        };
        if let (Some(item_id), Some(call_id)) = (item.id.as_deref(), item.call_id.as_deref())
            && !call_id.is_empty()
        {
            self.aliases.insert(item_id.to_string(), call_id.to_string());
        }
        let tool = self.tools.entry(key.clone()).or_default();
        if tool.name.is_none() {
            tool.name = item.name.clone();
        }
        let text = tool_progress_text(self.tool_name(&key), &self.tools[&key].arguments);
        let corr = CorrelationKey::new(Lane::ToolCall, key);
        match self.index.get(&corr).copied() {
            Some(idx) if self.items[idx].is_open() => {
                self.items[idx].text = text;
                vec![idx]
            }
            Some(_) => Vec::new(),
            None => vec![self.push(corr, text, ItemStatus::Open, elapsed, response_id)],
        }
    }

    fn tool_delta(
        &mut self,
        call_id: Option<&str>,
        item_id: Option<&str>,
        delta: &str,
        response_id: Option<&str>,
        elapsed: Duration,
    ) -> Vec<usize> {
        let Some(key) = self.tool_key(call_id, item_id) else {
            return Vec::new();
        };
        let corr = CorrelationKey::new(Lane::ToolCall, key.clone());
        if let Some(&idx) = self.index.get(&corr)
            && !self.items[idx].is_open()
        {
            debug!(key = %key, "Ignoring arguments delta for resolved tool call");
            return Vec::new();
        }
        self.tools
            .entry(key.clone())
            .or_default()
            .arguments
            .push_str(delta);
        let text = tool_progress_text(self.tool_name(&key), &self.tools[&key].arguments);
        match self.index.get(&corr).copied() {
            Some(idx) => {
                self.items[idx].text = text;
                vec![idx]
            }
            None => vec![self.push(corr, text, ItemStatus::Open, elapsed, response_id)],
        }
    }

    fn tool_done(
        &mut self,
        call_id: Option<&str>,
        item_id: Option<&str>,
        name: Option<&str>,
        arguments: &str,
        elapsed: Duration,
    ) -> Vec<usize> {
        let Some(key) = self.tool_key(call_id, item_id) else {
            return Vec::new();
        };
        let tool = self.tools.entry(key.clone()).or_default();
        if let Some(name) = name {
            tool.name = Some(name.to_string());
        }
        tool.arguments = arguments.to_string();
        let text = tool_final_text(self.tool_name(&key), arguments);
        self.complete(CorrelationKey::new(Lane::ToolCall, key), text, elapsed)
    }

    fn tool_item_done(&mut self, item: &ConversationItem, elapsed: Duration) -> Vec<usize> {
        let Some(key) = self.tool_key(item.call_id.as_deref(), item.id.as_deref()) else {
            return Vec::new();
        };
        let corr = CorrelationKey::new(Lane::ToolCall, key.clone());
        if self.get(&corr).is_some_and(|existing| !existing.is_open()) {
            return Vec::new();
        }
        let arguments = match item.arguments.clone() {
            Some(arguments) => arguments,
            None => self
                .tools
                .get(&key)
                .map(|tool| tool.arguments.clone())
                .unwrap_or_default(),
        };
        self.tool_done(
            item.call_id.as_deref(),
            item.id.as_deref(),
            item.name.as_deref(),
            &arguments,
            elapsed,
        )
    }

    // =========================================================================
    // Whole items
    // =========================================================================

    fn user_item(&mut self, item: &ConversationItem, elapsed: Duration) -> Vec<usize> {
        if item.role.as_deref() != Some("user") || item.item_type != "message" {
            return Vec::new();
        }
        let (Some(id), Some(text)) = (item.id.as_deref(), item.content_text()) else {
            return Vec::new();
        };
        let key = CorrelationKey::new(Lane::UserSpeech, id);
        if self.index.contains_key(&key) {
            return Vec::new();
        }
        vec![self.push(key, text, ItemStatus::Closed, elapsed, None)]
    }

    fn output_done(&mut self, item: &ConversationItem, elapsed: Duration) -> Vec<usize> {
        if item.is_function_call() {
            return self.tool_item_done(item, elapsed);
        }
        if item.role.as_deref() != Some("assistant") {
            return Vec::new();
        }
        let Some(id) = item.id.as_deref() else {
            return Vec::new();
        };
        let speech = CorrelationKey::new(Lane::AssistantSpeech, id);
        let text = CorrelationKey::new(Lane::AssistantText, id);
        let final_text = item.content_text();

        let mut touched = Vec::new();
        for key in [speech.clone(), text.clone()] {
            if let Some(&idx) = self.index.get(&key)
                && self.items[idx].is_open()
            {
                if let Some(final_text) = &final_text {
                    self.items[idx].text = final_text.clone();
                }
                self.items[idx].status = ItemStatus::Closed;
                touched.push(idx);
            }
        }
        let seen = self.index.contains_key(&speech) || self.index.contains_key(&text);
        if !seen && let Some(final_text) = final_text {
            let lane = if item.has_audio_content() {
                speech
            } else {
                text
            };
            touched.push(self.push(lane, final_text, ItemStatus::Closed, elapsed, None));
        }
        touched
    }
}
