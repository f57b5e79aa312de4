//! Core data types shared across the agent loop.

pub mod message;
pub mod text;
pub mod tool;

pub use message::{Message, Role, ToolCallRequest};
pub use text::truncate_chars;
pub use tool::{ToolDefinition, ToolError, ToolExecutionResult, ToolOutput};
