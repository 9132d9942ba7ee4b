//! Callbacks a [`BufferQueue`](super::BufferQueue) fires at its two sides.

use std::sync::Arc;

use super::surface_buffer::SharedBuffer;
use crate::core::errors::GsResult;

/// Consumer side notifications.
///
/// Called without the queue lock held, so implementations may call back
/// into the queue (typically `acquire_buffer` from `on_buffer_available`).
pub trait ConsumerListener: Send + Sync {
    /// A flushed buffer is ready to be acquired
    fn on_buffer_available(&self);

    fn on_go_background(&self) {}

    fn on_clean_cache(&self) {}

    fn on_tunnel_handle_change(&self) {}
}

/// Producer hook run after a buffer was released back to the queue.
pub type OnReleaseFunc = Arc<dyn Fn(&SharedBuffer) -> GsResult<()> + Send + Sync>;

/// Run when a slot's buffer is discarded. Called with the queue lock held;
/// it must not call back into the queue.
pub type OnDeleteBufferFunc = Arc<dyn Fn(u32) + Send + Sync>;
