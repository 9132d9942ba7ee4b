//! Producer/consumer buffer exchange.
//!
//! Per slot the lifecycle is `Free -> Requested -> Queued -> Acquired -> Free`,
//! with `Requested -> Free` on cancel and `Acquired -> Free` on release. All
//! slot bookkeeping happens under one mutex per queue. No operation waits:
//! a full queue or an empty dirty list is reported straight back to the caller.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::fence::SyncFence;
use super::listener::{ConsumerListener, OnDeleteBufferFunc, OnReleaseFunc};
use super::slot::{BufferSlot, BufferState, SlotTable};
use super::surface_buffer::SharedBuffer;
use super::tunnel_handle::TunnelHandle;
use super::types::{
    usage, BufferFlushConfig, BufferRequestConfig, BufferVerifyAllocInfo, ExtraData, HdrMetaData,
    HdrMetaDataType, HdrMetadataKey, PresentTimestamp, PresentTimestampType, ScalingMode,
    TransformType, SURFACE_MAX_QUEUE_SIZE,
};
use crate::core::context::CoreContext;
use crate::core::errors::{GsError, GsResult};
use crate::util::geometry::Rect;
use crate::util::logging::BUFFER;

const BUFFER_MEMSIZE_RATE: f64 = 1024.0;

/// Reply to a successful [`BufferQueue::request_buffer`].
#[derive(Debug, Clone)]
pub struct RequestBufferReturn {
    pub sequence: u32,
    pub buffer: SharedBuffer,
    /// The producer already holds this buffer from an earlier request
    pub cache_hit: bool,
    /// Invalid for fresh buffers, the last release fence otherwise
    pub fence: Arc<SyncFence>,
    /// Sequences discarded since the last request; drop any handles to them
    pub deleting_buffers: Vec<u32>,
    pub extra_data: ExtraData,
}

/// Reply to a successful [`BufferQueue::acquire_buffer`].
#[derive(Debug, Clone)]
pub struct AcquiredBuffer {
    pub sequence: u32,
    pub buffer: SharedBuffer,
    pub fence: Arc<SyncFence>,
    pub timestamp: i64,
    pub damage: Rect,
}

struct QueueState {
    slots: SlotTable,
    queue_size: u32,
    default_width: i32,
    default_height: i32,
    default_usage: u64,
    transform: TransformType,
    tunnel_handle: Option<Arc<TunnelHandle>>,
    producer_cache_clean: bool,
    producer_cache_list: Vec<u32>,
    /// Set by `go_background`; flushes still queue but stay silent.
    background: bool,
    on_delete: Option<OnDeleteBufferFunc>,
}

impl QueueState {
    /// Discard a slot, telling the delete listener first.
    fn delete_slot(&mut self, sequence: u32) {
        if self.slots.contains(sequence) {
            if let Some(on_delete) = &self.on_delete {
                on_delete(sequence);
            }
            self.slots.remove(sequence);
        }
    }

    fn notify_deleted(&self, sequences: &[u32]) {
        if let Some(on_delete) = &self.on_delete {
            for sequence in sequences {
                on_delete(*sequence);
            }
        }
    }

    fn clear(&mut self) {
        let sequences = self.slots.clear();
        self.notify_deleted(&sequences);
    }

    fn set_producer_cache_clean(&mut self, flag: bool) {
        self.producer_cache_clean = flag;
        self.producer_cache_list.clear();
    }

    fn producer_cache_complete(&self) -> bool {
        self.slots
            .sequences()
            .iter()
            .all(|seq| self.producer_cache_list.contains(seq))
    }
}

/// One producer/consumer buffer queue.
pub struct BufferQueue {
    ctx: Arc<CoreContext>,
    name: String,
    unique_id: u64,
    is_shared: bool,
    status: AtomicBool,
    state: Mutex<QueueState>,
    listener: Mutex<Option<Arc<dyn ConsumerListener>>>,
    on_release: Mutex<Option<OnReleaseFunc>>,
}

impl BufferQueue {
    pub fn new(ctx: Arc<CoreContext>, name: impl Into<String>, is_shared: bool) -> Self {
        let name = name.into();
        let unique_id = ctx.next_queue_unique_id();
        let buffer_config = &ctx.config().buffer;
        let queue_size = if is_shared { 1 } else { buffer_config.default_queue_size };
        debug!("ctor, Queue id: {} name: {} isShared: {}", unique_id, name, is_shared);

        let state = QueueState {
            slots: SlotTable::default(),
            queue_size,
            default_width: buffer_config.default_width,
            default_height: buffer_config.default_height,
            default_usage: buffer_config.default_usage,
            transform: TransformType::default(),
            tunnel_handle: None,
            producer_cache_clean: false,
            producer_cache_list: Vec::new(),
            background: false,
            on_delete: None,
        };

        Self {
            ctx,
            name,
            unique_id,
            is_shared,
            status: AtomicBool::new(true),
            state: Mutex::new(state),
            listener: Mutex::new(None),
            on_release: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    pub fn status(&self) -> bool {
        self.status.load(Ordering::Acquire)
    }

    /// `false` makes request and flush fail with `NoConsumer`.
    pub fn set_status(&self, status: bool) {
        self.status.store(status, Ordering::Release);
    }

    fn consumer(&self) -> Option<Arc<dyn ConsumerListener>> {
        self.listener.lock().clone()
    }

    // ========================================================================
    // Producer side
    // ========================================================================

    pub fn request_buffer(&self, config: &BufferRequestConfig) -> GsResult<RequestBufferReturn> {
        if !self.status() {
            return Err(GsError::NoConsumer);
        }
        if self.consumer().is_none() {
            debug!("request_buffer: no consumer, Queue id: {}", self.unique_id);
            return Err(GsError::NoConsumer);
        }
        config.validate()?;

        let mut state = self.state.lock();
        let reused = if self.is_shared && state.slots.used() > 0 {
            state.slots.first()
        } else {
            state.slots.pop_free(config)
        };
        if let Some(sequence) = reused {
            return self.reuse_buffer(&mut state, sequence, config);
        }

        if state.slots.used() >= state.queue_size {
            debug!("all buffer are using, Queue id: {}", self.unique_id);
            return Err(GsError::NoBuffer);
        }

        let buffer = match self.alloc_buffer(&mut state, config) {
            Ok(buffer) => buffer,
            Err(err) => {
                error!(
                    "Fail to alloc or map Buffer[{} {}] ret: {}, id: {}",
                    config.width, config.height, err, self.unique_id
                );
                return Err(err);
            }
        };
        let sequence = buffer.seq_num();
        debug!(
            "Success alloc Buffer[{} {}] seq: {} id: {}",
            config.width, config.height, sequence, self.unique_id
        );
        Ok(RequestBufferReturn {
            sequence,
            extra_data: buffer.extra_data(),
            buffer,
            cache_hit: false,
            fence: SyncFence::invalid(),
            deleting_buffers: state.slots.take_deleting(),
        })
    }

    fn reuse_buffer(
        &self,
        state: &mut QueueState,
        sequence: u32,
        config: &BufferRequestConfig,
    ) -> GsResult<RequestBufferReturn> {
        let cached_config = state
            .slots
            .get(sequence)
            .map(|slot| slot.config)
            .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not in cache")))?;

        let need_realloc = cached_config != *config;
        let (sequence, buffer, fence) = if need_realloc {
            if self.is_shared {
                return Err(GsError::invalid_arguments("shared queue cannot change buffer config"));
            }
            state.delete_slot(sequence);
            let buffer = self.alloc_buffer(state, config).inspect_err(|err| {
                error!("realloc failed: {}", err);
            })?;
            (buffer.seq_num(), buffer, SyncFence::invalid())
        } else {
            let slot = state
                .slots
                .get_mut(sequence)
                .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not in cache")))?;
            slot.state = BufferState::Requested;
            (sequence, slot.buffer.clone(), slot.fence.clone())
        };

        let cache_hit = !(need_realloc || self.is_shared || state.producer_cache_clean);
        if state.producer_cache_clean {
            state.producer_cache_list.push(sequence);
            if state.producer_cache_complete() {
                state.set_producer_cache_clean(false);
            }
        }

        if cache_hit {
            debug!(
                "RequestBuffer Succ Buffer[{} {}] in seq id: {} qid: {} releaseFence: {}",
                config.width,
                config.height,
                sequence,
                self.unique_id,
                fence.get()
            );
        } else {
            debug!(
                "RequestBuffer Succ realloc Buffer[{} {}] with new config seq: {} id: {}",
                config.width, config.height, sequence, self.unique_id
            );
        }

        Ok(RequestBufferReturn {
            sequence,
            extra_data: buffer.extra_data(),
            buffer,
            cache_hit,
            fence,
            deleting_buffers: state.slots.take_deleting(),
        })
    }

    fn alloc_buffer(
        &self,
        state: &mut QueueState,
        config: &BufferRequestConfig,
    ) -> GsResult<SharedBuffer> {
        let sequence = self.ctx.next_buffer_sequence();
        let buffer = self.ctx.allocator().alloc(sequence, config)?;
        buffer.map()?;
        trace!(sequence, "mapped new buffer");
        state
            .slots
            .insert(sequence, BufferSlot::new(buffer.clone(), BufferState::Requested, *config));
        Ok(buffer)
    }

    pub fn cancel_buffer(&self, sequence: u32, extra_data: ExtraData) -> GsResult<()> {
        if self.is_shared {
            return Err(GsError::invalid_operating("cancel on a shared queue"));
        }
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get_mut(sequence)
            .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not found in cache")))?;
        if slot.state != BufferState::Requested {
            return Err(GsError::invalid_arguments(format!(
                "sequence {sequence} state is {:?}, not Requested",
                slot.state
            )));
        }
        slot.state = BufferState::Free;
        slot.buffer.set_extra_data(extra_data);

        if slot.is_deleting {
            state.delete_slot(sequence);
            debug!("Cancel deleted Buffer id: {} Queue id: {}", sequence, self.unique_id);
        } else {
            state.slots.push_free(sequence);
            debug!("Success Buffer id: {} Queue id: {}", sequence, self.unique_id);
        }
        Ok(())
    }

    pub fn flush_buffer(
        &self,
        sequence: u32,
        extra_data: ExtraData,
        fence: Arc<SyncFence>,
        config: &BufferFlushConfig,
    ) -> GsResult<()> {
        if !self.status() {
            return Err(GsError::NoConsumer);
        }
        config.validate()?;

        {
            let state = self.state.lock();
            let slot = state
                .slots
                .get(sequence)
                .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not found in cache")))?;
            if !self.is_shared && slot.state != BufferState::Requested {
                return Err(GsError::invalid_arguments(format!(
                    "sequence {sequence} invalid state {:?}",
                    slot.state
                )));
            }
        }

        let Some(listener) = self.consumer() else {
            if let Err(err) = self.cancel_buffer(sequence, extra_data) {
                warn!("cancel after missing consumer failed: {}", err);
            }
            return Err(GsError::NoConsumer);
        };

        let notify = self.do_flush_buffer(sequence, extra_data, fence, config)?;
        if notify {
            listener.on_buffer_available();
        }
        Ok(())
    }

    /// Returns whether the consumer should hear about the flush: the buffer
    /// landed on the dirty list and the queue is in the foreground.
    fn do_flush_buffer(
        &self,
        sequence: u32,
        extra_data: ExtraData,
        fence: Arc<SyncFence>,
        config: &BufferFlushConfig,
    ) -> GsResult<bool> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get(sequence)
            .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not found in cache")))?;
        // a cancel may have won the race since the caller's check
        if !self.is_shared && slot.state != BufferState::Requested {
            return Err(GsError::invalid_arguments(format!(
                "sequence {sequence} invalid state {:?}",
                slot.state
            )));
        }
        if slot.is_deleting {
            state.delete_slot(sequence);
            debug!("flush discarded deleting Buffer id: {}", sequence);
            return Ok(false);
        }

        let Some(slot) = state.slots.get_mut(sequence) else {
            return Err(GsError::invalid_arguments(format!("sequence {sequence} not found in cache")));
        };
        slot.state = BufferState::Queued;
        slot.buffer.set_extra_data(extra_data);
        slot.fence = fence;
        slot.damage = config.damage;
        slot.timestamp = if config.timestamp == 0 {
            chrono::Utc::now().timestamp_micros()
        } else {
            config.timestamp
        };
        let cpu_write = slot.config.usage & usage::CPU_WRITE != 0;
        let buffer = slot.buffer.clone();
        if !self.is_shared {
            state.slots.push_dirty(sequence);
        }

        if cpu_write {
            buffer.flush_cache().inspect_err(|err| {
                error!("FlushCache failed for seq {}: {}", sequence, err);
            })?;
        }

        if let Some(dir) = &self.ctx.config().buffer.dump_dir {
            self.dump_to_file(dir.clone(), &buffer);
        }
        debug!(
            "Success Buffer seq id: {} Queue id: {} AcquireFence: {}",
            sequence,
            self.unique_id,
            state.slots.get(sequence).map(|slot| slot.fence.get()).unwrap_or(-1)
        );
        Ok(!state.background)
    }

    fn dump_to_file(&self, dir: PathBuf, buffer: &SharedBuffer) {
        let Some(contents) = buffer.read_contents() else {
            warn!("DumpToFile: buffer {} is not mapped", buffer.seq_num());
            return;
        };
        let now = chrono::Utc::now().timestamp_micros();
        let path = dir.join(format!("bq_{}_{}_{}.raw", std::process::id(), self.name, now));
        match std::fs::write(&path, contents) {
            Ok(()) => debug!("DumpToFile: {}", path.display()),
            Err(err) => crate::dlog!(BUFFER, "dump to {} failed: {}", path.display(), err),
        }
    }

    // ========================================================================
    // Consumer side
    // ========================================================================

    pub fn acquire_buffer(&self) -> GsResult<AcquiredBuffer> {
        let mut state = self.state.lock();
        let sequence = if self.is_shared {
            state.slots.first()
        } else {
            state.slots.pop_dirty()
        };
        let Some(sequence) = sequence else {
            debug!("there is no dirty buffer, Queue id: {}", self.unique_id);
            return Err(GsError::NoBuffer);
        };
        let Some(slot) = state.slots.get_mut(sequence) else {
            return Err(GsError::invalid_arguments(format!("sequence {sequence} not found in cache")));
        };
        if !self.is_shared && slot.state != BufferState::Queued {
            warn!("Warning [{}], Reason: state is not Queued", sequence);
        }
        slot.state = BufferState::Acquired;

        debug!(
            "Success Buffer seq id: {} Queue id: {} AcquireFence: {}",
            sequence,
            self.unique_id,
            slot.fence.get()
        );
        Ok(AcquiredBuffer {
            sequence,
            buffer: slot.buffer.clone(),
            fence: slot.fence.clone(),
            timestamp: slot.timestamp,
            damage: slot.damage,
        })
    }

    pub fn release_buffer(&self, buffer: &SharedBuffer, fence: Arc<SyncFence>) -> GsResult<()> {
        let sequence = buffer.seq_num();
        {
            let mut state = self.state.lock();
            let slot = state.slots.get_mut(sequence).ok_or_else(|| {
                GsError::invalid_arguments(format!(
                    "sequence {sequence} not in cache, Queue id: {}",
                    self.unique_id
                ))
            })?;
            if !self.is_shared && slot.state != BufferState::Acquired {
                return Err(GsError::invalid_arguments(format!(
                    "sequence {sequence} invalid state {:?}",
                    slot.state
                )));
            }
            slot.state = BufferState::Free;
            slot.fence = fence;
            let release_fence = slot.fence.get();

            if slot.is_deleting {
                state.delete_slot(sequence);
                debug!("Succ delete Buffer seq id: {} Queue id: {} in cache", sequence, self.unique_id);
            } else {
                if !self.is_shared {
                    state.slots.push_free(sequence);
                }
                debug!(
                    "Succ push Buffer seq id: {} Qid: {} to free list, releaseFence: {}",
                    sequence, self.unique_id, release_fence
                );
            }
        }

        let on_release = self.on_release.lock().clone();
        if let Some(on_release) = on_release {
            if let Err(err) = on_release(buffer) {
                warn!("OnBufferRelease for seq {} failed: {}", sequence, err);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Attach / detach
    // ========================================================================

    /// Insert an externally owned buffer as a new free slot.
    pub fn attach_buffer(&self, buffer: SharedBuffer) -> GsResult<()> {
        if self.is_shared {
            return Err(GsError::invalid_operating("attach on a shared queue"));
        }
        let sequence = buffer.seq_num();
        let config = BufferRequestConfig {
            width: buffer.width(),
            height: buffer.height(),
            stride_alignment: 8,
            format: buffer.format(),
            usage: buffer.usage(),
            timeout: 0,
            ..Default::default()
        };

        let mut state = self.state.lock();
        if state.slots.contains(sequence) {
            return Err(GsError::invalid_arguments(format!("sequence {sequence} already attached")));
        }

        let used = state.slots.used();
        if used >= state.queue_size {
            let need = (used - state.queue_size + 1) as usize;
            if state.slots.free_len() < need {
                return Err(GsError::out_of_range(format!(
                    "queue full ({used}/{}), cannot free {need} slot(s)",
                    state.queue_size
                )));
            }
            let evicted = state.slots.evict_free(need);
            state.notify_deleted(&evicted);
            debug!("attach evicted {:?}", evicted);
        }

        let mut slot = BufferSlot::new(buffer, BufferState::Free, config);
        slot.damage = Rect::new(0, 0, config.width, config.height);
        state.slots.insert(sequence, slot);
        state.slots.push_free(sequence);
        debug!("attached Buffer seq id: {} Queue id: {}", sequence, self.unique_id);
        Ok(())
    }

    /// Remove a requested or acquired buffer from the queue. The caller keeps it.
    pub fn detach_buffer(&self, buffer: &SharedBuffer) -> GsResult<()> {
        if self.is_shared {
            return Err(GsError::invalid_operating("detach on a shared queue"));
        }
        let sequence = buffer.seq_num();
        let mut state = self.state.lock();
        let slot_state = state
            .slots
            .get(sequence)
            .map(|slot| slot.state)
            .ok_or_else(|| GsError::invalid_arguments(format!("sequence {sequence} not found in cache")))?;
        match slot_state {
            BufferState::Requested | BufferState::Acquired => {
                debug!("detach seq {} from {:?}", sequence, slot_state);
            }
            other => {
                return Err(GsError::invalid_arguments(format!(
                    "sequence {sequence} cannot be detached in state {other:?}"
                )));
            }
        }
        if let Some(on_delete) = &state.on_delete {
            on_delete(sequence);
        }
        state.slots.detach(sequence);
        Ok(())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn queue_size(&self) -> u32 {
        self.state.lock().queue_size
    }

    pub fn used_size(&self) -> u32 {
        self.state.lock().slots.used()
    }

    /// Resize the queue. Shrinking drops free slots right away and flags busy
    /// ones for deletion when they come back; queued and acquired buffers stay valid.
    pub fn set_queue_size(&self, queue_size: u32) -> GsResult<()> {
        if self.is_shared && queue_size != 1 {
            return Err(GsError::invalid_arguments("shared queue, size must be 1"));
        }
        if queue_size == 0 {
            return Err(GsError::invalid_arguments(format!("queue size ({queue_size}) <= 0")));
        }
        if queue_size > SURFACE_MAX_QUEUE_SIZE {
            return Err(GsError::invalid_arguments(format!(
                "invalid queueSize[{queue_size}] > SURFACE_MAX_QUEUE_SIZE[{SURFACE_MAX_QUEUE_SIZE}]"
            )));
        }

        let mut state = self.state.lock();
        let excess = state.slots.used().saturating_sub(queue_size) as usize;
        if excess > 0 {
            let evicted = state.slots.evict_free(excess);
            state.notify_deleted(&evicted);
            let marked = state.slots.mark_deleting(excess - evicted.len());
            debug!("shrink: evicted {:?}, marked {} for deletion", evicted, marked);
        }
        state.queue_size = queue_size;
        debug!("queue size: {}, Queue id: {}", queue_size, self.unique_id);
        Ok(())
    }

    pub fn set_default_width_and_height(&self, width: i32, height: i32) -> GsResult<()> {
        if width <= 0 {
            return Err(GsError::invalid_arguments(format!(
                "defaultWidth is greater than 0, now is {width}"
            )));
        }
        if height <= 0 {
            return Err(GsError::invalid_arguments(format!(
                "defaultHeight is greater than 0, now is {height}"
            )));
        }
        let mut state = self.state.lock();
        state.default_width = width;
        state.default_height = height;
        Ok(())
    }

    pub fn default_width(&self) -> i32 {
        self.state.lock().default_width
    }

    pub fn default_height(&self) -> i32 {
        self.state.lock().default_height
    }

    pub fn set_default_usage(&self, usage: u64) {
        self.state.lock().default_usage = usage;
    }

    pub fn default_usage(&self) -> u64 {
        self.state.lock().default_usage
    }

    pub fn set_transform(&self, transform: TransformType) {
        self.state.lock().transform = transform;
    }

    pub fn transform(&self) -> TransformType {
        self.state.lock().transform
    }

    pub fn is_supported_alloc(&self, infos: &[BufferVerifyAllocInfo]) -> GsResult<Vec<bool>> {
        self.ctx.allocator().is_supported_alloc(infos).inspect_err(|err| {
            error!("IsSupportedAlloc failed: {}", err);
        })
    }

    /// While set, every request reports a cache miss until the producer has
    /// seen each cached buffer once.
    pub fn set_producer_cache_clean_flag(&self, flag: bool) {
        self.state.lock().set_producer_cache_clean(flag);
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn register_consumer_listener(&self, listener: Arc<dyn ConsumerListener>) {
        *self.listener.lock() = Some(listener);
    }

    pub fn unregister_consumer_listener(&self) {
        *self.listener.lock() = None;
    }

    pub fn register_release_listener(&self, func: OnReleaseFunc) {
        *self.on_release.lock() = Some(func);
    }

    /// The first registration wins; later calls are ignored.
    pub fn register_delete_buffer_listener(&self, func: OnDeleteBufferFunc) {
        let mut state = self.state.lock();
        if state.on_delete.is_none() {
            state.on_delete = Some(func);
        }
    }

    // ========================================================================
    // Cache teardown
    // ========================================================================

    /// Drops every cached buffer and silences `on_buffer_available` until
    /// [`BufferQueue::go_foreground`]. Flushes keep queueing meanwhile.
    pub fn go_background(&self) {
        debug!("GoBackground, Queue id: {}", self.unique_id);
        if let Some(listener) = self.consumer() {
            listener.on_go_background();
        }
        let mut state = self.state.lock();
        state.background = true;
        state.clear();
        state.set_producer_cache_clean(false);
    }

    pub fn go_foreground(&self) {
        debug!("GoForeground, Queue id: {}", self.unique_id);
        self.state.lock().background = false;
    }

    pub fn is_background(&self) -> bool {
        self.state.lock().background
    }

    pub fn clean_cache(&self) {
        if let Some(listener) = self.consumer() {
            listener.on_clean_cache();
        }
        self.state.lock().clear();
    }

    pub fn on_consumer_died(&self) {
        debug!("consumer died, Queue id: {}", self.unique_id);
        self.state.lock().clear();
    }

    // ========================================================================
    // Per-sequence metadata
    // ========================================================================

    fn with_slot<T>(&self, sequence: u32, f: impl FnOnce(&mut BufferSlot) -> T) -> GsResult<T> {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .get_mut(sequence)
            .ok_or_else(|| GsError::no_entry(format!("sequence {sequence} not find in cache")))?;
        Ok(f(slot))
    }

    pub fn set_scaling_mode(&self, sequence: u32, mode: ScalingMode) -> GsResult<()> {
        self.with_slot(sequence, |slot| slot.scaling_mode = mode)
    }

    pub fn get_scaling_mode(&self, sequence: u32) -> GsResult<ScalingMode> {
        self.with_slot(sequence, |slot| slot.scaling_mode)
    }

    pub fn set_metadata(&self, sequence: u32, metadata: &[HdrMetaData]) -> GsResult<()> {
        if metadata.is_empty() {
            return Err(GsError::invalid_arguments("metaData size is 0"));
        }
        self.with_slot(sequence, |slot| {
            slot.metadata = metadata.to_vec();
            slot.hdr_metadata_type = HdrMetaDataType::MetaData;
        })
    }

    pub fn set_metadata_set(&self, sequence: u32, key: u32, metadata: &[u8]) -> GsResult<()> {
        let key = HdrMetadataKey::try_from(key)?;
        if metadata.is_empty() {
            return Err(GsError::invalid_arguments("metaData size is 0"));
        }
        self.with_slot(sequence, |slot| {
            slot.metadata_key = key;
            slot.metadata_set = metadata.to_vec();
            slot.hdr_metadata_type = HdrMetaDataType::MetaDataSet;
        })
    }

    pub fn query_metadata_type(&self, sequence: u32) -> GsResult<HdrMetaDataType> {
        self.with_slot(sequence, |slot| slot.hdr_metadata_type)
    }

    pub fn get_metadata(&self, sequence: u32) -> GsResult<Vec<HdrMetaData>> {
        self.with_slot(sequence, |slot| slot.metadata.clone())
    }

    pub fn get_metadata_set(&self, sequence: u32) -> GsResult<(HdrMetadataKey, Vec<u8>)> {
        self.with_slot(sequence, |slot| (slot.metadata_key, slot.metadata_set.clone()))
    }

    pub fn set_present_timestamp(&self, sequence: u32, timestamp: PresentTimestamp) -> GsResult<()> {
        self.with_slot(sequence, |slot| slot.present_timestamp = timestamp)
    }

    pub fn get_present_timestamp(&self, sequence: u32, kind: PresentTimestampType) -> GsResult<i64> {
        let (present, flushed_at) =
            self.with_slot(sequence, |slot| (slot.present_timestamp, slot.timestamp))?;
        if kind != present.kind {
            return Err(GsError::no_entry(format!(
                "PresentTimestampType [{:?}] is not supported, the supported type is [{:?}]",
                kind, present.kind
            )));
        }
        match kind {
            PresentTimestampType::Delay => Ok(present.time),
            PresentTimestampType::Timestamp => Ok(present.time - flushed_at),
            PresentTimestampType::Unsupported => {
                Err(GsError::type_error(format!("unsupported present timestamp type for {sequence}")))
            }
        }
    }

    // ========================================================================
    // Tunnel handle
    // ========================================================================

    pub fn set_tunnel_handle(&self, handle: Option<Arc<TunnelHandle>>) -> GsResult<()> {
        {
            let mut state = self.state.lock();
            let changed = match &state.tunnel_handle {
                None if handle.is_none() => {
                    return Err(GsError::invalid_arguments("tunnel handle is null"));
                }
                None => true,
                Some(current) => current.different(handle.as_deref()),
            };
            if !changed {
                warn!("same tunnel handle, please check");
                return Ok(());
            }
            state.tunnel_handle = handle;
        }

        match self.consumer() {
            Some(listener) => {
                listener.on_tunnel_handle_change();
                Ok(())
            }
            None => Err(GsError::NoConsumer),
        }
    }

    pub fn get_tunnel_handle(&self) -> Option<Arc<TunnelHandle>> {
        self.state.lock().tunnel_handle.clone()
    }

    // ========================================================================
    // Dump
    // ========================================================================

    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let mut result = String::new();
        let total_kib = state.slots.total_size() as f64 / BUFFER_MEMSIZE_RATE;

        result.push_str("    BufferQueue:\n");
        let _ = writeln!(
            result,
            "      default-size = [{}x{}], FIFO = {}, name = {}, uniqueId = {}, usedBufferListLen = {}, \
             freeBufferListLen = {}, dirtyBufferListLen = {}, totalBuffersMemSize = {:.2}(KiB).",
            state.default_width,
            state.default_height,
            state.queue_size,
            self.name,
            self.unique_id,
            state.slots.used(),
            state.slots.free_len(),
            state.slots.dirty_len(),
            total_kib
        );
        result.push_str("      bufferQueueCache:\n");
        for (sequence, slot) in state.slots.iter() {
            let _ = writeln!(
                result,
                "        sequence = {}, state = {}, timestamp = {}, damageRect = [{}, {}, {}, {}], \
                 config = [{}x{}, {}, {}, {}, {}], bufferWith = {}, bufferHeight = {}, \
                 bufferMemSize = {:.2}(KiB).",
                sequence,
                slot.state,
                slot.timestamp,
                slot.damage.x,
                slot.damage.y,
                slot.damage.w,
                slot.damage.h,
                slot.config.width,
                slot.config.height,
                slot.config.stride_alignment,
                slot.config.format,
                slot.config.usage,
                slot.config.timeout,
                slot.buffer.width(),
                slot.buffer.height(),
                slot.buffer.size() as f64 / BUFFER_MEMSIZE_RATE
            );
        }
        result
    }
}

impl Drop for BufferQueue {
    fn drop(&mut self) {
        debug!("dtor, Queue id: {}", self.unique_id);
        let state = self.state.get_mut();
        let sequences = state.slots.sequences();
        state.notify_deleted(&sequences);
    }
}
