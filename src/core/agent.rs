//! Fan-out of screen and display notifications to the window-management
//! layer.
//!
//! Every payload is an owned snapshot. Implementations must not call back
//! into the controllers; the screen controller delivers from its worker.

use parking_lot::Mutex;

use crate::core::display::DisplayInfo;
use crate::core::screen::types::{
    DisplayChangeEvent, DisplayId, DisplayPowerEvent, EventStatus, ScreenChangeEvent,
    ScreenGroupChangeEvent, ScreenId, ScreenInfo,
};

pub trait DisplayManagerAgent: Send + Sync {
    fn on_screen_connect(&self, info: ScreenInfo);

    fn on_screen_disconnect(&self, screen_id: ScreenId);

    fn on_screen_change(&self, info: ScreenInfo, event: ScreenChangeEvent);

    /// `trigger` names the client that caused the change.
    fn on_screen_group_change(&self, trigger: &str, infos: Vec<ScreenInfo>, event: ScreenGroupChangeEvent);

    fn on_display_create(&self, info: DisplayInfo);

    fn on_display_destroy(&self, display_id: DisplayId);

    fn on_display_change(&self, info: DisplayInfo, event: DisplayChangeEvent);

    /// Returns whether any listener accepted the event.
    fn notify_display_power_event(&self, event: DisplayPowerEvent, status: EventStatus) -> bool;
}

/// Flattened record of one agent call.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ScreenConnect(ScreenId),
    ScreenDisconnect(ScreenId),
    ScreenChange(ScreenId, ScreenChangeEvent),
    ScreenGroupChange(Vec<ScreenId>, ScreenGroupChangeEvent),
    DisplayCreate(DisplayId),
    DisplayDestroy(DisplayId),
    DisplayChange(DisplayId, DisplayChangeEvent),
    DisplayPower(DisplayPowerEvent, EventStatus),
}

/// Agent that stores every call. Used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct RecordingAgent {
    events: Mutex<Vec<AgentEvent>>,
    last_display_info: Mutex<Option<DisplayInfo>>,
}

impl RecordingAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<AgentEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, pred: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|event| pred(event)).count()
    }

    /// Payload of the most recent display create/change call.
    pub fn last_display_info(&self) -> Option<DisplayInfo> {
        self.last_display_info.lock().clone()
    }

    fn push(&self, event: AgentEvent) {
        tracing::trace!(?event, "agent event");
        self.events.lock().push(event);
    }
}

impl DisplayManagerAgent for RecordingAgent {
    fn on_screen_connect(&self, info: ScreenInfo) {
        self.push(AgentEvent::ScreenConnect(info.id));
    }

    fn on_screen_disconnect(&self, screen_id: ScreenId) {
        self.push(AgentEvent::ScreenDisconnect(screen_id));
    }

    fn on_screen_change(&self, info: ScreenInfo, event: ScreenChangeEvent) {
        self.push(AgentEvent::ScreenChange(info.id, event));
    }

    fn on_screen_group_change(&self, _trigger: &str, infos: Vec<ScreenInfo>, event: ScreenGroupChangeEvent) {
        let ids = infos.iter().map(|info| info.id).collect();
        self.push(AgentEvent::ScreenGroupChange(ids, event));
    }

    fn on_display_create(&self, info: DisplayInfo) {
        self.push(AgentEvent::DisplayCreate(info.id));
        *self.last_display_info.lock() = Some(info);
    }

    fn on_display_destroy(&self, display_id: DisplayId) {
        self.push(AgentEvent::DisplayDestroy(display_id));
    }

    fn on_display_change(&self, info: DisplayInfo, event: DisplayChangeEvent) {
        self.push(AgentEvent::DisplayChange(info.id, event));
        *self.last_display_info.lock() = Some(info);
    }

    fn notify_display_power_event(&self, event: DisplayPowerEvent, status: EventStatus) -> bool {
        self.push(AgentEvent::DisplayPower(event, status));
        true
    }
}
