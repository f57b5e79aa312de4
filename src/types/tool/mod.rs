//! Tool-related types.

mod definition;
mod error;
mod output;

pub use definition::ToolDefinition;
pub use error::ToolError;
pub use output::{ToolExecutionResult, ToolOutput};
