use std::sync::Arc;

use anyhow::{Context, Result};

use displaycore::config::CoreConfig;
use displaycore::core::buffer::{
    BufferFlushConfig, BufferQueue, BufferRequestConfig, ConsumerListener, ExtraData, SyncFence,
};
use displaycore::core::context::CoreContext;
use displaycore::core::display::AbstractDisplayController;
use displaycore::core::screen::{AbstractScreenController, ScreenMode};
use displaycore::core::worker::SerialWorker;
use displaycore::dlog;
use displaycore::platform::RsScreenType;
use displaycore::util::geometry::Rect;
use displaycore::util::logging::{self, init_tracing};

struct LogConsumer;

impl ConsumerListener for LogConsumer {
    fn on_buffer_available(&self) {
        tracing::info!("buffer available");
    }
}

fn main() -> Result<()> {
    let config = CoreConfig::from_env().context("loading configuration")?;
    init_tracing(&config.logging.level);
    dlog!(logging::MAIN, "displaycore demo starting");

    let (ctx, rs, agent) = CoreContext::simulated(config);
    let worker = Arc::new(SerialWorker::new("screen-worker").context("starting screen worker")?);
    let screens = AbstractScreenController::new(ctx.clone(), worker.clone());
    screens.init();
    let displays = AbstractDisplayController::new(ctx.clone(), screens.clone());
    displays.init();

    rs.connect(0, RsScreenType::BuiltIn, vec![ScreenMode::new(1080, 2340, 60)], 0);
    rs.connect(1, RsScreenType::External, vec![ScreenMode::new(1920, 1080, 60)], 0);
    worker.flush();

    for id in screens.get_all_screen_ids() {
        if let Some(screen) = screens.get_abstract_screen(id) {
            let info = screen.read().convert_to_screen_info();
            println!(
                "screen {} ({}): {}x{} group={} is_group={}",
                info.id, info.name, info.virtual_width, info.virtual_height, info.parent, info.is_screen_group
            );
        }
    }
    for id in displays.get_all_display_ids() {
        if let Some(display) = displays.get_abstract_display(id) {
            println!(
                "display {} ({}): {}x{} on screen {}",
                display.id, display.name, display.width, display.height, display.screen_id
            );
        }
    }

    let queue = BufferQueue::new(ctx, "demo", false);
    queue.register_consumer_listener(Arc::new(LogConsumer));
    let config = BufferRequestConfig::new(320, 240);
    let ret = queue.request_buffer(&config).context("requesting buffer")?;
    ret.buffer
        .write_contents(0, &[0xff; 16])
        .context("writing buffer contents")?;
    queue
        .flush_buffer(
            ret.sequence,
            ExtraData::new(),
            SyncFence::invalid(),
            &BufferFlushConfig::new(Rect::new(0, 0, 320, 240), 0),
        )
        .context("flushing buffer")?;
    let acquired = queue.acquire_buffer().context("acquiring buffer")?;
    queue
        .release_buffer(&acquired.buffer, SyncFence::invalid())
        .context("releasing buffer")?;

    print!("{}", queue.dump());
    dlog!(logging::MAIN, "agent saw {} events", agent.events().len());
    Ok(())
}
