//! Text helpers shared by tool output and memory.

/// Cuts `text` to at most `max_chars` characters, noting how much was dropped.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((byte_idx, _)) => {
            let total = text.chars().count();
            format!(
                "{}\n... [truncated {} of {} chars]",
                &text[..byte_idx],
                total - max_chars,
                total
            )
        }
    }
}
