pub mod fence;
pub mod listener;
pub mod queue;
pub mod slot;
pub mod surface_buffer;
pub mod tunnel_handle;
pub mod types;
pub mod wire;

pub use fence::SyncFence;
pub use listener::{ConsumerListener, OnDeleteBufferFunc, OnReleaseFunc};
pub use queue::{AcquiredBuffer, BufferQueue, RequestBufferReturn};
pub use slot::BufferState;
pub use surface_buffer::{BufferAllocator, SharedBuffer, ShmAllocator, ShmBuffer, SurfaceBuffer};
pub use tunnel_handle::TunnelHandle;
pub use types::{BufferFlushConfig, BufferRequestConfig, ExtraData};
pub use wire::Parcel;

#[cfg(test)]
pub mod tests;
