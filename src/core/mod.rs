//! Core of displaycore.
//!
//! `buffer` is the producer/consumer exchange, `screen` and `display` the
//! topology side. Everything is wired through an explicit [`CoreContext`].

pub mod agent;
pub mod buffer;
pub mod context;
pub mod display;
pub mod errors;
pub mod render;
pub mod screen;
pub mod worker;

// Re-export key types
pub use agent::{DisplayManagerAgent, RecordingAgent};
pub use buffer::BufferQueue;
pub use context::CoreContext;
pub use display::AbstractDisplayController;
pub use errors::{DmError, DmResult, GsError, GsResult};
pub use screen::AbstractScreenController;
pub use worker::SerialWorker;
