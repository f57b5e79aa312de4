//! Character-weighted token estimate.

use crate::types::Message;

/// Tokens charged per message for role and framing.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Estimates tokens without a tokenizer: wide (CJK) characters weigh more
/// than narrow ones.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenEstimator {
    pub wide_weight: f64,
    pub narrow_weight: f64,
    pub message_overhead: usize,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self {
            wide_weight: 0.6,
            narrow_weight: 0.25,
            message_overhead: MESSAGE_OVERHEAD,
        }
    }
}

impl TokenEstimator {
    pub fn estimate_text(&self, text: &str) -> usize {
        let (wide, narrow) = text.chars().fold((0usize, 0usize), |(w, n), c| {
            if is_wide(c) { (w + 1, n) } else { (w, n + 1) }
        });
        (wide as f64 * self.wide_weight + narrow as f64 * self.narrow_weight).ceil() as usize
    }

    pub fn estimate_message(&self, message: &Message) -> usize {
        let mut tokens = self.message_overhead + self.estimate_text(&message.content);
        for call in message.tool_calls.iter().flatten() {
            let serialized = serde_json::to_string(call).unwrap_or_default();
            tokens += self.estimate_text(&serialized);
        }
        if let Some(id) = &message.tool_call_id {
            tokens += self.estimate_text(id);
        }
        tokens
    }
}

fn is_wide(c: char) -> bool {
    matches!(c as u32,
        0x1100..=0x11FF
        | 0x2E80..=0xA4CF
        | 0xAC00..=0xD7A3
        | 0xF900..=0xFAFF
        | 0xFE30..=0xFE4F
        | 0xFF00..=0xFF60
        | 0xFFE0..=0xFFE6
        | 0x20000..=0x2FFFD
        | 0x30000..=0x3FFFD
    )
}
