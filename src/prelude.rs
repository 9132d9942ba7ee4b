//! Common imports and types used throughout displaycore.

pub use std::sync::Arc;

pub use crate::config::CoreConfig;
pub use crate::core::buffer::{
    BufferFlushConfig, BufferQueue, BufferRequestConfig, ConsumerListener, SharedBuffer, SyncFence,
};
pub use crate::core::context::CoreContext;
pub use crate::core::display::{AbstractDisplayController, DisplayInfo};
pub use crate::core::errors::{DmError, DmResult, GsError, GsResult};
pub use crate::core::screen::{AbstractScreenController, ScreenId, ScreenMode};
