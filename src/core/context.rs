//! Explicitly scoped collaborators shared by queues and controllers.
//!
//! One `CoreContext` replaces every process-wide singleton: the allocator,
//! the render service, the agent fan-out and the id counters all hang off
//! it, so a test can build a fresh one from fakes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::CoreConfig;
use crate::core::agent::{DisplayManagerAgent, RecordingAgent};
use crate::core::buffer::{BufferAllocator, ShmAllocator};
use crate::platform::{RenderService, SimulatedRenderService};

pub struct CoreContext {
    config: CoreConfig,
    allocator: Arc<dyn BufferAllocator>,
    render_service: Arc<dyn RenderService>,
    agent: Arc<dyn DisplayManagerAgent>,
    buffer_sequence: AtomicU32,
    queue_counter: AtomicU32,
}

impl CoreContext {
    pub fn new(
        config: CoreConfig,
        allocator: Arc<dyn BufferAllocator>,
        render_service: Arc<dyn RenderService>,
        agent: Arc<dyn DisplayManagerAgent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            allocator,
            render_service,
            agent,
            buffer_sequence: AtomicU32::new(0),
            queue_counter: AtomicU32::new(0),
        })
    }

    /// Context built entirely from the in-process fakes.
    pub fn simulated(
        config: CoreConfig,
    ) -> (Arc<Self>, Arc<SimulatedRenderService>, Arc<RecordingAgent>) {
        let render_service = Arc::new(SimulatedRenderService::new());
        let agent = Arc::new(RecordingAgent::new());
        let ctx = Self::new(config, Arc::new(ShmAllocator), render_service.clone(), agent.clone());
        (ctx, render_service, agent)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<dyn BufferAllocator> {
        &self.allocator
    }

    pub fn render_service(&self) -> &Arc<dyn RenderService> {
        &self.render_service
    }

    pub fn agent(&self) -> &Arc<dyn DisplayManagerAgent> {
        &self.agent
    }

    /// Sequence numbers are unique across every queue of this context.
    pub fn next_buffer_sequence(&self) -> u32 {
        self.buffer_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// `pid << 32 | counter`
    pub fn next_queue_unique_id(&self) -> u64 {
        let counter = self.queue_counter.fetch_add(1, Ordering::Relaxed);
        (u64::from(std::process::id()) << 32) | u64::from(counter)
    }
}
