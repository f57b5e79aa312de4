//! Tools the decision provider can call, and how calls reach executors.
//!
//! [`ToolRegistry::dispatch`] is the single path from a [`ToolCallRequest`]
//! to an executor: lookup, schema validation, command and path policy, target
//! resolution through an injected [`ExecutorResolver`], then execution under a
//! timeout. Every failure comes back as an error result rather than a fault.
//!
//! [`ToolCallRequest`]: crate::types::ToolCallRequest

mod context;
mod dispatch;
mod list;
mod read;
mod registry;
mod resolver;
mod shell;
mod traits;
mod validate;
mod write;

pub use context::{DEFAULT_COMMAND_TIMEOUT, ToolContext};
pub use dispatch::dispatch_batch;
pub use list::{ListFilesInput, ListFilesTool};
pub use read::{ReadFileInput, ReadFileTool};
pub use registry::{RegistryStats, ToolRegistry};
pub use resolver::ExecutorResolver;
pub use shell::{ExecShellInput, ExecShellTool};
pub use traits::{SchemaTool, Tool};
pub use validate::InputValidator;
pub use write::{WriteFileInput, WriteFileTool};
