//! Shared domain types for ActivityHub.
//!
//! Everything the other crates agree on lives here: the canonical
//! [`event::ActivityEvent`] vocabulary, provider-agnostic conversation
//! messages, model capabilities, runtime configuration, and the shared
//! error type.

pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod message;

/// A boxed async stream, used for provider byte streams and event streams.
pub type BoxStream<'a, T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;
