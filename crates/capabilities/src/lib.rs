//! Model capability registry.
//!
//! Maps model ids to [`ModelCapabilities`]: context window, tool-calling
//! accuracy, thinking mode, cost factors. Seeded from a built-in pattern
//! table at startup; mutated only by administrative override at runtime.

mod builtin;
mod registry;

pub use registry::{CapabilityRegistry, CapabilityStore};
