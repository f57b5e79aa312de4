//! Common imports.
//!
//! ```rust
//! use fleet_agent::prelude::*;
//! ```

pub use crate::{Error, Result};

pub use crate::agent::{AgentBuilder, AgentLoop, AgentResult, AgentState, ExecutionConfig};
pub use crate::config::{AuthConfig, FleetConfig, MachineTarget, TargetKind};
pub use crate::executor::{ConnectionManager, Executor};
pub use crate::memory::ConversationMemory;
pub use crate::model::{Decision, DecisionProvider, DecisionRequest, OpenAiClient};
pub use crate::tools::{SchemaTool, Tool, ToolContext, ToolRegistry};
pub use crate::types::{Message, Role, ToolCallRequest, ToolError, ToolExecutionResult};
