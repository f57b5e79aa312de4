//! Agent loop: decision calls, tool dispatch and run control.
//!
//! ```rust,no_run
//! use fleet_agent::agent::AgentBuilder;
//! use fleet_agent::config::FleetConfig;
//!
//! # async fn example() -> fleet_agent::Result<()> {
//! let config = FleetConfig::load("fleet.json").await?;
//! let agent = AgentBuilder::from_config(config).build()?;
//! let result = agent.run("How much disk is free on web-01?").await?;
//! println!("{}", result.text);
//! agent.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod controller;
mod retry;
mod state;

pub use builder::AgentBuilder;
pub use config::ExecutionConfig;
pub use controller::{AgentLoop, AgentResult};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use state::{AgentMetrics, AgentState, ToolStats};
