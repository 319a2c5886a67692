//! Per-request activity state and event fan-out.
//!
//! [`session::ActivitySession`] is the aggregate owned by one orchestrator
//! task for the lifetime of a request; the provider normalizers drive it
//! by exclusive borrow, one raw event at a time. [`fanout::EventFanout`]
//! broadcasts the resulting canonical events to the SSE writer, the
//! persistence writer, and the metrics aggregator.

pub mod cancel;
pub mod fanout;
pub mod session;

pub use cancel::CancelToken;
pub use fanout::{EventFanout, SubscriberPolicy, Subscription};
pub use session::{ActivitySession, BlockKind};
