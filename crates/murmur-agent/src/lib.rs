//! Per-tenant stateful responder: agent, registry, bounded session memory,
//! structured-output parsing and action execution.

pub mod agent;
pub mod executor;
pub mod parser;
pub mod prompt;
pub mod registry;
pub mod session;

pub use agent::{RosterMember, TenantAgent, TenantContext};
pub use executor::ActionExecutor;
pub use registry::AgentRegistry;
pub use session::SessionStore;
