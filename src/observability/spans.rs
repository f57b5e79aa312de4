//! Span constructors shared by the loop and the registry.

use tracing::{Level, Span, span};

use crate::types::ToolCallRequest;

pub fn tool_dispatch_span(request: &ToolCallRequest, target: Option<&str>) -> Span {
    span!(
        Level::DEBUG,
        "tool.dispatch",
        tool = %request.tool_name,
        call_id = %request.id,
        target_name = target.unwrap_or("-"),
    )
}

pub fn decision_span(provider: &str, attempt: u32) -> Span {
    span!(Level::DEBUG, "agent.decide", provider = provider, attempt = attempt)
}
