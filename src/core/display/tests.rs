use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::CoreConfig;
use crate::core::agent::{AgentEvent, RecordingAgent};
use crate::core::context::CoreContext;
use crate::core::display::*;
use crate::core::screen::*;
use crate::core::worker::SerialWorker;
use crate::platform::{RsScreenType, SimulatedRenderService};
use crate::util::geometry::Point;

#[derive(Debug, Clone, PartialEq)]
struct StateChange {
    default_display_id: DisplayId,
    display_id: DisplayId,
    group: Vec<DisplayId>,
    change: DisplayStateChangeType,
}

#[derive(Default)]
struct RecordingListener {
    changes: Mutex<Vec<StateChange>>,
}

impl RecordingListener {
    fn changes(&self) -> Vec<DisplayStateChangeType> {
        self.changes.lock().iter().map(|c| c.change).collect()
    }
}

impl DisplayStateChangeListener for RecordingListener {
    fn on_display_state_change(
        &self,
        default_display_id: DisplayId,
        info: DisplayInfo,
        group: BTreeMap<DisplayId, DisplayInfo>,
        change: DisplayStateChangeType,
    ) {
        self.changes.lock().push(StateChange {
            default_display_id,
            display_id: info.id,
            group: group.keys().copied().collect(),
            change,
        });
    }
}

struct Harness {
    displays: Arc<AbstractDisplayController>,
    screens: Arc<AbstractScreenController>,
    rs: Arc<SimulatedRenderService>,
    agent: Arc<RecordingAgent>,
    listener: Arc<RecordingListener>,
}

impl Harness {
    fn with_config(config: CoreConfig) -> Self {
        let (ctx, rs, agent) = CoreContext::simulated(config);
        let worker = Arc::new(SerialWorker::new("display-test").unwrap());
        let screens = AbstractScreenController::new(ctx.clone(), worker);
        screens.init();
        let displays = AbstractDisplayController::new(ctx, screens.clone());
        displays.init();
        let listener = Arc::new(RecordingListener::default());
        displays.register_display_state_change_listener(listener.clone());
        Self { displays, screens, rs, agent, listener }
    }

    fn new(expand: bool) -> Self {
        let mut config = CoreConfig::default();
        config.screen.expand_combination = expand;
        Self::with_config(config)
    }

    fn connect(&self, rs_id: ScreenId, kind: RsScreenType, width: u32, height: u32) {
        self.rs.connect(rs_id, kind, vec![ScreenMode::new(width, height, 60)], 0);
        self.settle();
    }

    fn settle(&self) {
        self.screens.worker().flush();
    }

    fn display(&self, display_id: DisplayId) -> AbstractDisplay {
        self.displays.get_abstract_display(display_id).unwrap()
    }
}

#[test]
fn test_first_screen_binds_display() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);

    assert_eq!(h.displays.get_all_display_ids(), vec![0]);
    let display = h.display(0);
    assert_eq!(display.name, "display_0");
    assert_eq!((display.width, display.height), (1080, 2340));
    assert_eq!(display.screen_id, 0);
    assert_eq!(display.screen_group_id, 1);
    assert_eq!(h.displays.get_default_display_id(), 0);
    assert_eq!(h.displays.get_abstract_display_by_screen(0).unwrap().id, 0);
    assert_eq!(h.agent.count(|e| *e == AgentEvent::DisplayCreate(0)), 1);
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::Create]);
}

#[test]
fn test_no_default_display_without_screens() {
    let h = Harness::new(false);
    assert_eq!(h.displays.get_default_display_id(), DISPLAY_ID_INVALID);
    assert!(h.displays.get_all_display_ids().is_empty());
}

#[test]
fn test_mirror_screen_gets_no_display() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.connect(1, RsScreenType::External, 1920, 1080);
    assert_eq!(h.displays.get_all_display_ids(), vec![0]);
    assert!(h.displays.get_abstract_display_by_screen(2).is_none());
}

#[test]
fn test_expand_displays_and_offsets() {
    let h = Harness::new(true);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.connect(1, RsScreenType::External, 1920, 1080);

    assert_eq!(h.displays.get_all_display_ids(), vec![0, 1]);
    let second = h.display(1);
    assert_eq!(second.screen_id, 2);
    assert_eq!((second.offset_x, second.offset_y), (1080, 0));
    assert_eq!((second.width, second.height), (1920, 1080));

    let info = second.convert_to_display_info();
    let group = h.displays.get_all_display_info_of_group(&info);
    assert_eq!(group.keys().copied().collect::<Vec<_>>(), vec![0, 1]);

    let last = h.listener.changes.lock().last().cloned().unwrap();
    assert_eq!(last.display_id, 1);
    assert_eq!(last.default_display_id, 0);
    assert_eq!(last.group, vec![0, 1]);
    assert_eq!(last.change, DisplayStateChangeType::Create);
}

#[test]
fn test_make_expand_from_mirror_adds_display() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.connect(1, RsScreenType::External, 1920, 1080);

    assert!(h.screens.make_expand(&[0, 2], &[Point::new(0, 0), Point::new(1080, 0)]));
    h.settle();

    assert_eq!(h.displays.get_all_display_ids(), vec![0, 1]);
    assert_eq!(h.display(0).screen_id, 0);
    let second = h.display(1);
    assert_eq!(second.screen_id, 2);
    assert_eq!((second.offset_x, second.offset_y), (1080, 0));
}

#[test]
fn test_expand_disconnect_destroys_display() {
    let h = Harness::new(true);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.connect(1, RsScreenType::External, 1920, 1080);
    h.listener.changes.lock().clear();

    h.rs.disconnect(1);
    h.settle();

    assert_eq!(h.displays.get_all_display_ids(), vec![0]);
    let first = h.display(0);
    assert_eq!((first.offset_x, first.offset_y), (0, 0));
    let node = h.screens.get_rs_display_node_by_screen_id(0).unwrap();
    assert_eq!(node.offset(), Point::new(0, 0));
    assert_eq!(h.agent.count(|e| *e == AgentEvent::DisplayDestroy(1)), 1);
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::Destroy]);
}

#[test]
fn test_dummy_display_is_rebound() {
    let h = Harness::new(false);
    let dummy = h.displays.create_dummy_display(ScreenMode::new(1080, 2340, 60));
    assert_eq!(dummy, 0);
    assert_eq!(h.displays.get_default_display_id(), DISPLAY_ID_INVALID);

    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);

    assert_eq!(h.displays.get_all_display_ids(), vec![0]);
    assert_eq!(h.display(0).screen_id, 0);
    assert_eq!(h.displays.get_default_display_id(), 0);
    assert_eq!(h.agent.count(|e| *e == AgentEvent::DisplayCreate(0)), 1);
}

#[test]
fn test_dummy_display_size_mismatch_reports_change() {
    let h = Harness::new(false);
    h.displays.create_dummy_display(ScreenMode::new(720, 1280, 60));
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);

    assert_eq!((h.display(0).width, h.display(0).height), (1080, 2340));
    assert_eq!(
        h.agent.count(|e| *e == AgentEvent::DisplayChange(0, DisplayChangeEvent::DisplaySizeChanged)),
        1
    );
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::SizeChange]);
}

#[test]
fn test_freeze_skips_missing_and_repeated() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.listener.changes.lock().clear();

    h.displays.set_freeze(&[0, 99], true);
    assert_eq!(h.display(0).freeze_flag, FreezeFlag::Freezing);
    h.displays.set_freeze(&[0], true);
    assert_eq!(
        h.agent.count(|e| *e == AgentEvent::DisplayChange(0, DisplayChangeEvent::DisplayFreezed)),
        1
    );

    h.displays.set_freeze(&[0], false);
    assert_eq!(h.display(0).freeze_flag, FreezeFlag::Unfreezing);
    assert_eq!(
        h.listener.changes(),
        vec![DisplayStateChangeType::Freeze, DisplayStateChangeType::Unfreeze]
    );
}

#[test]
fn test_active_mode_change_resizes_display() {
    let h = Harness::new(false);
    h.rs.connect(
        0,
        RsScreenType::BuiltIn,
        vec![ScreenMode::new(1080, 2340, 60), ScreenMode::new(720, 1280, 60)],
        0,
    );
    h.settle();
    h.listener.changes.lock().clear();

    assert!(h.screens.set_screen_active_mode(0, 1));
    h.settle();

    assert_eq!((h.display(0).width, h.display(0).height), (720, 1280));
    assert_eq!(
        h.agent.count(|e| *e == AgentEvent::DisplayChange(0, DisplayChangeEvent::DisplaySizeChanged)),
        1
    );
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::SizeChange]);
}

#[test]
fn test_same_size_mode_change_keeps_display() {
    let h = Harness::new(false);
    h.rs.connect(
        0,
        RsScreenType::BuiltIn,
        vec![ScreenMode::new(1080, 2340, 60), ScreenMode::new(1080, 2340, 90)],
        0,
    );
    h.settle();
    h.listener.changes.lock().clear();

    assert!(h.screens.set_screen_active_mode(0, 1));
    h.settle();

    assert_eq!((h.display(0).width, h.display(0).height), (1080, 2340));
    assert!(h.listener.changes().is_empty());
    assert_eq!(
        h.agent.count(|e| *e == AgentEvent::DisplayChange(0, DisplayChangeEvent::DisplaySizeChanged)),
        0
    );
}

#[test]
fn test_virtual_pixel_ratio_reaches_display() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.listener.changes.lock().clear();

    assert!(h.screens.set_virtual_pixel_ratio(0, 3.0));
    assert_eq!(h.display(0).virtual_pixel_ratio, 3.0);
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::VirtualPixelRatioChange]);
    assert_eq!(
        h.agent.count(|e| {
            *e == AgentEvent::DisplayChange(0, DisplayChangeEvent::DisplayVirtualPixelRatioChanged)
        }),
        1
    );
}

#[test]
fn test_orientation_rotates_display() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    h.listener.changes.lock().clear();

    assert!(h.screens.set_orientation(0, Orientation::Horizontal, false));

    let display = h.display(0);
    assert_eq!(display.rotation, Rotation::Rotation90);
    assert_eq!(display.orientation, Orientation::Horizontal);
    assert_eq!((display.width, display.height), (2340, 1080));
    assert_eq!(h.listener.changes(), vec![DisplayStateChangeType::UpdateRotation]);
}

#[test]
fn test_repeated_rotation_is_silent() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    assert!(h.screens.set_rotation(0, Rotation::Rotation90, false));
    h.listener.changes.lock().clear();

    assert!(h.screens.set_rotation(0, Rotation::Rotation90, false));
    assert!(h.listener.changes().is_empty());
}

fn waterfall_harness(size_vp: u32) -> Harness {
    let mut config = CoreConfig::default();
    config.display.waterfall_compression_enabled = true;
    config.display.waterfall_compression_size_vp = size_vp;
    Harness::with_config(config)
}

#[test]
fn test_waterfall_compression_round_trip() {
    let h = waterfall_harness(8);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    let before = h.display(0).convert_to_display_info();
    h.listener.changes.lock().clear();

    assert!(h.screens.set_rotation(0, Rotation::Rotation90, false));
    let compressed = h.display(0);
    assert!(compressed.waterfall_compressed);
    assert_eq!((compressed.offset_x, compressed.offset_y), (0, 8));
    assert_eq!((compressed.width, compressed.height), (2340, 1064));
    assert_eq!(
        h.listener.changes(),
        vec![DisplayStateChangeType::UpdateRotation, DisplayStateChangeType::DisplayCompress]
    );

    assert!(h.screens.set_rotation(0, Rotation::Rotation0, false));
    assert_eq!(h.display(0).convert_to_display_info(), before);
}

#[test]
fn test_waterfall_compression_ignores_oversized_edges() {
    let h = waterfall_harness(300);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);

    assert!(h.screens.set_rotation(0, Rotation::Rotation90, false));
    let display = h.display(0);
    assert!(!display.waterfall_compressed);
    assert_eq!((display.width, display.height), (2340, 1080));
    assert_eq!(display.offset_y, 0);
}

#[test]
fn test_waterfall_compression_disabled_by_default() {
    let h = Harness::new(false);
    h.connect(0, RsScreenType::BuiltIn, 1080, 2340);
    assert!(h.screens.set_rotation(0, Rotation::Rotation270, false));
    assert!(!h.display(0).waterfall_compressed);
    assert!(!h.listener.changes().contains(&DisplayStateChangeType::DisplayCompress));
}
