//! Tool registry and invocation.
//!
//! Handlers register with a name, a JSON-schema input descriptor, and
//! descriptor flags. The invoker validates streamed-in arguments against
//! the schema, detects multi-model handoff roles, runs handlers under
//! the per-call deadline with cancellation propagation, and surfaces the
//! `todo_update` side channel.

pub mod builtin;
pub mod invoker;
pub mod registry;

pub use invoker::{Invocation, ToolInvoker, ToolOutcome, HANDOFF_ROLES};
pub use registry::{ToolContext, ToolFlags, ToolHandler, ToolRegistry};
