//! Token-budgeted conversation history.
//!
//! Each message carries its estimate from the moment it is appended, so the
//! running total moves by one addition or subtraction per change. Truncation
//! works on units: a plain message, or an assistant tool-call message together
//! with every tool result answering it. A unit is kept or dropped whole.

mod tokens;

pub use tokens::{MESSAGE_OVERHEAD, TokenEstimator};

use std::collections::HashSet;
use std::ops::Range;

use serde::Serialize;

use crate::types::{Message, Role, ToolCallRequest, truncate_chars};

/// Longest tool-result content kept in history.
pub const MAX_TOOL_RESULT_CHARS: usize = 4000;

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub message_count: usize,
    pub token_count: usize,
    pub max_tokens: usize,
    pub usage_percentage: f64,
    pub within_limit: bool,
}

#[derive(Debug, Clone)]
pub struct ConversationMemory {
    system: Option<Entry>,
    entries: Vec<Entry>,
    total_tokens: usize,
    max_tokens: usize,
    estimator: TokenEstimator,
}

impl ConversationMemory {
    pub fn new(max_tokens: usize) -> Self {
        Self::with_estimator(max_tokens, TokenEstimator::default())
    }

    pub fn with_estimator(max_tokens: usize, estimator: TokenEstimator) -> Self {
        Self {
            system: None,
            entries: Vec::new(),
            total_tokens: 0,
            max_tokens,
            estimator,
        }
    }

    /// Pins a system prompt ahead of every history snapshot. Never truncated.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) -> usize {
        let message = Message::system(prompt);
        let tokens = self.estimator.estimate_message(&message);
        if let Some(old) = self.system.replace(Entry { message, tokens }) {
            self.total_tokens -= old.tokens;
        }
        self.total_tokens += tokens;
        self.fit_to_budget()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system.as_ref().map(|e| e.message.content.as_str())
    }

    pub fn add_user(&mut self, text: impl Into<String>) -> usize {
        self.push(Message::user(text))
    }

    pub fn add_assistant(&mut self, text: impl Into<String>) -> usize {
        self.push(Message::assistant(text))
    }

    pub fn add_assistant_tool_calls(
        &mut self,
        text: impl Into<String>,
        calls: Vec<ToolCallRequest>,
    ) -> usize {
        self.push(Message::assistant_tool_calls(text, calls))
    }

    /// Content beyond [`MAX_TOOL_RESULT_CHARS`] is cut before it is stored.
    pub fn add_tool_result(&mut self, call_id: impl Into<String>, content: &str) -> usize {
        let content = truncate_chars(content, MAX_TOOL_RESULT_CHARS);
        self.push(Message::tool_result(call_id, content))
    }

    /// Appends and then enforces the budget. Returns how many messages the
    /// budget pass dropped.
    pub fn push(&mut self, message: Message) -> usize {
        let tokens = self.estimator.estimate_message(&message);
        tracing::trace!(role = ?message.role, tokens, "Appending message");
        self.total_tokens += tokens;
        self.entries.push(Entry { message, tokens });
        self.fit_to_budget()
    }

    pub fn token_count(&self) -> usize {
        self.total_tokens
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn is_within_limit(&self) -> bool {
        self.total_tokens <= self.max_tokens
    }

    /// Non-pinned message count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Independent copy of the history, pinned prompt first.
    pub fn history(&self) -> Vec<Message> {
        self.system
            .iter()
            .chain(self.entries.iter())
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn usage_percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 100.0;
        }
        let pct = self.total_tokens as f64 / self.max_tokens as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            message_count: self.entries.len() + usize::from(self.system.is_some()),
            token_count: self.total_tokens,
            max_tokens: self.max_tokens,
            usage_percentage: self.usage_percentage(),
            within_limit: self.is_within_limit(),
        }
    }

    /// Drops all history except the pinned prompt.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.total_tokens = self.system.as_ref().map_or(0, |e| e.tokens);
    }

    /// Drops the oldest units until at most `keep_last_n` non-pinned messages
    /// remain. The latest user message and the newest unit are never dropped,
    /// so fewer may go.
    pub fn truncate_oldest(&mut self, keep_last_n: usize) -> usize {
        let mut removed = 0;
        while self.entries.len() > keep_last_n {
            match self.drop_oldest_unit() {
                Some(n) => removed += n,
                None => break,
            }
        }
        if removed > 0 {
            tracing::info!(
                removed,
                kept = self.entries.len(),
                tokens = self.total_tokens,
                "Truncated conversation history"
            );
        }
        removed
    }

    /// Drops the oldest units until the estimate fits the budget or only
    /// protected units remain.
    pub fn fit_to_budget(&mut self) -> usize {
        let mut removed = 0;
        while self.total_tokens > self.max_tokens {
            match self.drop_oldest_unit() {
                Some(n) => removed += n,
                None => break,
            }
        }
        if removed > 0 {
            tracing::info!(
                removed,
                tokens = self.total_tokens,
                max_tokens = self.max_tokens,
                "Trimmed history to token budget"
            );
        }
        if !self.is_within_limit() {
            tracing::warn!(
                tokens = self.total_tokens,
                max_tokens = self.max_tokens,
                "History exceeds token budget with nothing left to drop"
            );
        }
        removed
    }

    /// Drops the oldest unit that is neither the latest user message nor the
    /// newest unit, whose tool results may still be arriving.
    fn drop_oldest_unit(&mut self) -> Option<usize> {
        let units = self.units();
        let latest_user = self.entries.iter().rposition(|e| e.message.role == Role::User);
        let newest = units.len().checked_sub(1)?;
        let unit = units
            .into_iter()
            .take(newest)
            .find(|unit| !latest_user.is_some_and(|idx| unit.contains(&idx)))?;
        let dropped: usize = self.entries.drain(unit.clone()).map(|e| e.tokens).sum();
        self.total_tokens -= dropped;
        Some(unit.len())
    }

    /// Index ranges of every unit, oldest first.
    fn units(&self) -> Vec<Range<usize>> {
        let mut units = Vec::new();
        let mut start = 0;
        while start < self.entries.len() {
            let ids: HashSet<&str> = self.entries[start].message.tool_call_ids().collect();
            let mut end = start + 1;
            if !ids.is_empty() {
                while end < self.entries.len() && answers(&self.entries[end], &ids) {
                    end += 1;
                }
            }
            units.push(start..end);
            start = end;
        }
        units
    }
}

fn answers(entry: &Entry, ids: &HashSet<&str>) -> bool {
    entry.message.role == Role::Tool
        && entry
            .message
            .tool_call_id
            .as_deref()
            .is_some_and(|id| ids.contains(id))
}
