//! Abstract Screen Controller
//!
//! Owns the dms id namespace, every [`AbstractScreen`] and every screen
//! group. Platform connection events are queued on a [`SerialWorker`] and
//! processed there; synchronous callers share the same re-entrant lock.
//!
//! # Lock order
//! controller lock, then group screen, then child screen. No `RefCell`
//! borrow of the registry is held across a callback, so callbacks may call
//! straight back into the controller from the same thread.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, trace, warn};

use super::id_manager::ScreenIdManager;
use super::screen::{AbstractScreen, SharedScreen, VPR_EPSILON};
use super::types::{
    DisplayChangeEvent, DisplayPowerEvent, EventStatus, Orientation, PowerStateChangeReason,
    Rotation, ScreenChangeEvent, ScreenColorGamut, ScreenCombination, ScreenEvent, ScreenGamutMap,
    ScreenGroupChangeEvent, ScreenId, ScreenInfo, ScreenMode, ScreenPowerState, ScreenPowerStatus,
    ScreenType, VirtualScreenOption, DEFAULT_SCREEN_NAME, SCREEN_ID_INVALID,
};
use crate::core::agent::DisplayManagerAgent;
use crate::core::buffer::BufferQueue;
use crate::core::context::CoreContext;
use crate::core::errors::{DmError, DmResult};
use crate::core::render::{DisplayNode, SurfaceNode};
use crate::core::worker::SerialWorker;
use crate::platform::{RenderService, ScreenChangeCallback};
use crate::util::geometry::Point;
use crate::util::logging::SCREEN;

/// Identifies the client that owns virtual screens.
pub type AgentId = u64;

/// Receives orientation requests that came from a window rather than the
/// system. The hook decides when the screen actually rotates.
pub type OrientationSwitchHook = Arc<dyn Fn(ScreenId, Orientation) + Send + Sync>;

const INIT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Screen lifecycle hooks used by the display layer.
///
/// Called with the controller lock held and no screen lock held.
pub trait AbstractScreenCallback: Send + Sync {
    fn on_connect(&self, screen: &SharedScreen);
    fn on_disconnect(&self, screen: &SharedScreen);
    fn on_change(&self, screen: &SharedScreen, event: DisplayChangeEvent);
}

pub trait RsScreenChangeListener: Send + Sync {
    fn on_connected(&self, screen_id: ScreenId);
    fn on_disconnected(&self, screen_id: ScreenId);
}

struct Registry {
    ids: ScreenIdManager,
    /// Every screen, groups included
    screens: HashMap<ScreenId, SharedScreen>,
    groups: HashMap<ScreenId, SharedScreen>,
    agent_screens: HashMap<AgentId, Vec<ScreenId>>,
    default_rs_id: ScreenId,
    build_in_default_orientation: Orientation,
    callback: Option<Arc<dyn AbstractScreenCallback>>,
    rs_listener: Option<Arc<dyn RsScreenChangeListener>>,
    orientation_hook: Option<OrientationSwitchHook>,
}

pub struct AbstractScreenController {
    ctx: Arc<CoreContext>,
    render: Arc<dyn RenderService>,
    worker: Arc<SerialWorker>,
    state: ReentrantMutex<RefCell<Registry>>,
    weak_self: Weak<Self>,
}

impl AbstractScreenController {
    pub fn new(ctx: Arc<CoreContext>, worker: Arc<SerialWorker>) -> Arc<Self> {
        let render = ctx.render_service().clone();
        let orientation = ctx.config().screen.build_in_default_orientation;
        Arc::new_cyclic(|weak_self| Self {
            ctx,
            render,
            worker,
            state: ReentrantMutex::new(RefCell::new(Registry {
                ids: ScreenIdManager::new(),
                screens: HashMap::new(),
                groups: HashMap::new(),
                agent_screens: HashMap::new(),
                default_rs_id: SCREEN_ID_INVALID,
                build_in_default_orientation: orientation,
                callback: None,
                rs_listener: None,
                orientation_hook: None,
            })),
            weak_self: weak_self.clone(),
        })
    }

    pub fn worker(&self) -> &Arc<SerialWorker> {
        &self.worker
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let guard = self.state.lock();
        let mut registry = guard.borrow_mut();
        f(&mut registry)
    }

    /// Install the connection callback; retries on the worker until the
    /// render service accepts it.
    pub fn init(&self) {
        debug!("screen controller init");
        let weak = self.weak_self.clone();
        let callback: ScreenChangeCallback = Arc::new(move |rs_id, event| {
            if let Some(controller) = weak.upgrade() {
                controller.on_rs_screen_connection_change(rs_id, event);
            }
        });
        if let Err(err) = self.render.set_screen_change_callback(callback) {
            warn!("SetScreenChangeCallback failed: {}, retry in {:?}", err, INIT_RETRY_DELAY);
            let weak = self.weak_self.clone();
            self.worker.post_delayed(
                move || {
                    if let Some(controller) = weak.upgrade() {
                        controller.init();
                    }
                },
                INIT_RETRY_DELAY,
            );
            return;
        }
        crate::dlog!(SCREEN, "listening for render service screen changes");
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_all_screen_ids(&self) -> Vec<ScreenId> {
        let mut ids: Vec<ScreenId> = self.with_registry(|r| r.screens.keys().copied().collect());
        ids.sort_unstable();
        ids
    }

    /// Drop duplicates, unknown ids and screens of undefined type.
    pub fn get_all_valid_screen_ids(&self, screen_ids: &[ScreenId]) -> Vec<ScreenId> {
        let _guard = self.state.lock();
        let mut seen = HashSet::new();
        screen_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .filter(|id| {
                self.get_abstract_screen(*id)
                    .map(|screen| screen.read().screen_type != ScreenType::Undefined)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn get_abstract_screen(&self, dms_id: ScreenId) -> Option<SharedScreen> {
        let screen = self.with_registry(|r| r.screens.get(&dms_id).cloned());
        if screen.is_none() {
            trace!("did not find screen: {}", dms_id);
        }
        screen
    }

    pub fn get_abstract_screen_group(&self, dms_id: ScreenId) -> Option<SharedScreen> {
        self.with_registry(|r| r.groups.get(&dms_id).cloned())
    }

    pub fn convert_to_rs_screen_id(&self, dms_id: ScreenId) -> Option<ScreenId> {
        self.with_registry(|r| r.ids.convert_to_rs_screen_id(dms_id))
    }

    pub fn convert_to_dms_screen_id(&self, rs_id: ScreenId) -> Option<ScreenId> {
        self.with_registry(|r| r.ids.convert_to_dms_screen_id(rs_id))
    }

    pub fn get_rs_screen_num(&self) -> u32 {
        self.with_registry(|r| r.ids.rs_screen_num())
    }

    pub fn get_rs_display_node_by_screen_id(&self, dms_id: ScreenId) -> Option<Arc<DisplayNode>> {
        self.get_abstract_screen(dms_id)?.read().display_node.clone()
    }

    /// dms id of the built-in screen. Connects it on demand when the render
    /// service knows it but no event has been processed yet.
    pub fn get_default_abstract_screen_id(&self) -> ScreenId {
        let _guard = self.state.lock();
        let mut rs_id = self.with_registry(|r| r.default_rs_id);
        if rs_id == SCREEN_ID_INVALID {
            rs_id = self.render.default_screen_id();
            self.with_registry(|r| r.default_rs_id = rs_id);
        }
        if rs_id == SCREEN_ID_INVALID {
            info!("GetDefaultAbstractScreenId, rsDefaultId is invalid.");
            return SCREEN_ID_INVALID;
        }
        if let Some(dms_id) = self.convert_to_dms_screen_id(rs_id) {
            return dms_id;
        }
        info!("default screen {} not connected yet, connecting", rs_id);
        self.process_screen_connected(rs_id);
        self.convert_to_dms_screen_id(rs_id).unwrap_or(SCREEN_ID_INVALID)
    }

    pub fn update_rs_tree(
        &self,
        dms_id: ScreenId,
        parent_id: ScreenId,
        surface: &SurfaceNode,
        is_add: bool,
        is_multi_display: bool,
    ) {
        let Some(screen) = self.get_abstract_screen(dms_id) else {
            error!("can not find abstractScreen {}", dms_id);
            return;
        };
        if !is_multi_display {
            screen.read().update_rs_tree(surface, is_add);
            return;
        }
        let parent_node = self
            .get_abstract_screen(parent_id)
            .and_then(|parent| parent.read().display_node_id());
        match parent_node {
            Some(node_id) => screen.read().update_display_group_rs_tree(surface, node_id, is_add),
            None => error!("can not find parent node of screen {}", parent_id),
        }
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Replays `on_connect` for every known leaf screen.
    pub fn register_abstract_screen_callback(&self, callback: Arc<dyn AbstractScreenCallback>) {
        let _guard = self.state.lock();
        let screens: Vec<SharedScreen> = self.with_registry(|r| {
            r.callback = Some(callback.clone());
            let mut screens: Vec<_> = r.screens.iter().map(|(id, s)| (*id, s.clone())).collect();
            screens.sort_by_key(|(id, _)| *id);
            screens.into_iter().map(|(_, s)| s).collect()
        });
        for screen in screens {
            if screen.read().is_group() {
                continue;
            }
            callback.on_connect(&screen);
        }
    }

    pub fn register_rs_screen_change_listener(&self, listener: Arc<dyn RsScreenChangeListener>) {
        self.with_registry(|r| r.rs_listener = Some(listener));
    }

    pub fn set_orientation_switch_hook(&self, hook: OrientationSwitchHook) {
        self.with_registry(|r| r.orientation_hook = Some(hook));
    }

    fn screen_callback(&self) -> Option<Arc<dyn AbstractScreenCallback>> {
        self.with_registry(|r| r.callback.clone())
    }

    fn rs_listener(&self) -> Option<Arc<dyn RsScreenChangeListener>> {
        self.with_registry(|r| r.rs_listener.clone())
    }

    // ========================================================================
    // Connection events
    // ========================================================================

    fn on_rs_screen_connection_change(&self, rs_id: ScreenId, event: ScreenEvent) {
        info!("rs screen event. id:{}, event:{:?}", rs_id, event);
        let weak = self.weak_self.clone();
        match event {
            ScreenEvent::Connected => self.worker.post(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.process_screen_connected(rs_id);
                }
            }),
            ScreenEvent::Disconnected => {
                self.worker.post(move || {
                    if let Some(controller) = weak.upgrade() {
                        controller.process_screen_disconnected(rs_id);
                    }
                });
                self.with_registry(|r| {
                    if r.default_rs_id == rs_id {
                        r.default_rs_id = SCREEN_ID_INVALID;
                    }
                });
            }
            ScreenEvent::Unknown => warn!("unknown message: {:?}", event),
        }
    }

    fn process_screen_connected(&self, rs_id: ScreenId) {
        let _guard = self.state.lock();
        if self.with_registry(|r| r.ids.has_rs_screen_id(rs_id)) {
            debug!("rs screen {} already connected", rs_id);
            return;
        }
        debug!("connect new screen {}", rs_id);
        let Some(screen) = self.init_and_get_screen(rs_id) else {
            return;
        };
        let dms_id = screen.read().dms_id;
        if self.add_to_group_locked(&screen).is_none() {
            error!("fail to add screen {} to group, rolling back", dms_id);
            self.with_registry(|r| {
                r.screens.remove(&dms_id);
                r.ids.delete_screen_id(dms_id);
            });
            return;
        }
        if rs_id == self.render.default_screen_id() {
            self.init_default_screen_rotation(&screen);
        }

        let info = screen.read().convert_to_screen_info();
        self.notify_screen_connected(info.clone());
        self.notify_screen_group_changed(info, ScreenGroupChangeEvent::AddToGroup);
        if let Some(callback) = self.screen_callback() {
            callback.on_connect(&screen);
        }
        if let Some(listener) = self.rs_listener() {
            listener.on_connected(dms_id);
        }
    }

    fn init_default_screen_rotation(&self, screen: &SharedScreen) {
        let orientation = self.with_registry(|r| r.build_in_default_orientation);
        let mut screen = screen.write();
        let Some(node) = screen.display_node.clone() else {
            return;
        };
        screen.requested_orientation = orientation;
        let rotation = screen.calc_rotation(orientation);
        if let Some(mode) = screen.active_screen_mode() {
            apply_node_rotation(&node, rotation, mode);
        }
        self.render.flush_transaction();
        screen.rotation = rotation;
        screen.set_orientation(orientation);
        info!("default screen {} starts at {:?} ({:?})", screen.dms_id, rotation, orientation);
    }

    fn init_and_get_screen(&self, rs_id: ScreenId) -> Option<SharedScreen> {
        let dms_id = self.with_registry(|r| r.ids.create_and_get_new_screen_id(rs_id));
        let mut screen = AbstractScreen::new(
            self.render.clone(),
            format!("{DEFAULT_SCREEN_NAME}_{dms_id}"),
            dms_id,
            rs_id,
        );
        if !self.fill_screen_modes(&mut screen) {
            error!("fail to fill modes of screen {}", dms_id);
            self.with_registry(|r| r.ids.delete_screen_id(dms_id));
            return None;
        }
        let screen = screen.into_shared();
        self.with_registry(|r| r.screens.insert(dms_id, screen.clone()));
        Some(screen)
    }

    fn fill_screen_modes(&self, screen: &mut AbstractScreen) -> bool {
        let modes = self.render.screen_supported_modes(screen.rs_id);
        if modes.is_empty() {
            error!("supported screen mode is 0, screen: {}", screen.rs_id);
            return false;
        }
        screen.modes = modes
            .iter()
            .map(|mode| ScreenMode::new(mode.width, mode.height, mode.refresh_rate))
            .collect();
        let active = self.render.screen_active_mode(screen.rs_id);
        if active.mode_id < 0 || active.mode_id as usize >= screen.modes.len() {
            error!(
                "active mode index is wrong: {}, modes: {}",
                active.mode_id,
                screen.modes.len()
            );
            return false;
        }
        screen.active_idx = active.mode_id;
        true
    }

    fn process_screen_disconnected(&self, rs_id: ScreenId) {
        let _guard = self.state.lock();
        let Some(dms_id) = self.convert_to_dms_screen_id(rs_id) else {
            info!("disconnect screen, rsId:{} is not in rs2DmsScreenIdMap_", rs_id);
            return;
        };
        info!("disconnect screen, rsScreenId={}, dmsScreenId={}", rs_id, dms_id);
        if let Some(screen) = self.get_abstract_screen(dms_id) {
            let group_id = screen.read().group_dms_id;
            let in_group = self
                .get_abstract_screen_group(group_id)
                .map(|group| group.read().group().map_or(false, |g| g.has_child(dms_id)))
                .unwrap_or(false);
            if in_group {
                if let Some(callback) = self.screen_callback() {
                    callback.on_disconnect(&screen);
                }
            }
            let group = self.remove_from_group_locked(&screen);
            if group.is_some() {
                let info = screen.read().convert_to_screen_info();
                self.notify_screen_group_changed(info, ScreenGroupChangeEvent::RemoveFromGroup);
            }
            self.with_registry(|r| r.screens.remove(&dms_id));
            self.notify_screen_disconnected(dms_id);
            if let Some(listener) = self.rs_listener() {
                listener.on_disconnected(dms_id);
            }
            if let Some(group) = group {
                self.remirror_after_source_lost(&group, dms_id);
            }
        }
        self.with_registry(|r| r.ids.delete_screen_id(dms_id));
    }

    fn remirror_after_source_lost(&self, group: &SharedScreen, lost_id: ScreenId) {
        let children = {
            let group = group.read();
            match group.group() {
                Some(g) if g.combination == ScreenCombination::Mirror
                    && g.mirror_screen_id == lost_id
                    && g.child_count() != 0 =>
                {
                    g.children_ids()
                }
                _ => return,
            }
        };
        let default_id = self.get_default_abstract_screen_id();
        let mirrors: Vec<ScreenId> = children.into_iter().filter(|id| *id != default_id).collect();
        info!("mirror source {} lost, re-mirror {:?} to {}", lost_id, mirrors, default_id);
        if !self.make_mirror(default_id, mirrors) {
            warn!("re-mirror to default screen {} failed", default_id);
        }
    }

    // ========================================================================
    // Groups
    // ========================================================================

    fn add_to_group_locked(&self, screen: &SharedScreen) -> Option<SharedScreen> {
        if self.with_registry(|r| r.groups.is_empty()) {
            info!("connect the first screen");
            self.add_as_first_screen_locked(screen)
        } else {
            info!("connect a new screen");
            self.add_as_succedent_screen_locked(screen)
        }
    }

    fn add_as_first_screen_locked(&self, screen: &SharedScreen) -> Option<SharedScreen> {
        let group_id = self.with_registry(|r| r.ids.create_and_get_new_screen_id(SCREEN_ID_INVALID));
        let combination = if self.ctx.config().screen.expand_combination {
            ScreenCombination::Expand
        } else {
            ScreenCombination::Mirror
        };
        let screen_id = screen.read().dms_id;
        let mut group = AbstractScreen::new_group(
            self.render.clone(),
            format!("ScreenGroup_{group_id}"),
            group_id,
            SCREEN_ID_INVALID,
            combination,
        );
        if let Some(g) = group.group_mut() {
            g.mirror_screen_id = screen_id;
        }
        if !group.add_child(screen, Point::new(0, 0), None) {
            error!("fail to add screen {} to new group {}", screen_id, group_id);
            self.with_registry(|r| r.ids.delete_screen_id(group_id));
            return None;
        }
        let group = group.into_shared();
        self.with_registry(|r| {
            r.screens.insert(group_id, group.clone());
            r.groups.insert(group_id, group.clone());
        });
        info!("new group {} ({:?}) for screen {}", group_id, combination, screen_id);
        Some(group)
    }

    fn add_as_succedent_screen_locked(&self, screen: &SharedScreen) -> Option<SharedScreen> {
        let default_id = self.get_default_abstract_screen_id();
        let Some(default_screen) = self.get_abstract_screen(default_id) else {
            error!("did not find default screen {}", default_id);
            return None;
        };
        let group = self.get_abstract_screen_group(default_screen.read().group_dms_id).or_else(|| {
            // the default screen itself is still joining; use the oldest group
            self.with_registry(|r| {
                r.groups.iter().min_by_key(|(id, _)| **id).map(|(_, group)| group.clone())
            })
        });
        let Some(group) = group else {
            error!("no group for the new screen");
            return None;
        };
        let combination = group.read().group().map(|g| g.combination)?;
        let point = match combination {
            ScreenCombination::Expand => {
                let width = default_screen
                    .read()
                    .active_screen_mode()
                    .map(|mode| mode.width)
                    .unwrap_or(0);
                Point::new(width as i32, 0)
            }
            _ => Point::new(0, 0),
        };
        if !group.write().add_child(screen, point, Some(&default_screen)) {
            return None;
        }
        Some(group)
    }

    fn remove_from_group_locked(&self, screen: &SharedScreen) -> Option<SharedScreen> {
        let (dms_id, group_id) = {
            let screen = screen.read();
            (screen.dms_id, screen.group_dms_id)
        };
        if group_id == SCREEN_ID_INVALID {
            debug!("screen {} is in no group", dms_id);
            return None;
        }
        let Some(group) = self.get_abstract_screen_group(group_id) else {
            error!("groupDmsId:{} is not in dmsScreenGroupMap_", group_id);
            return None;
        };
        if !group.read().group().map_or(false, |g| g.has_child(dms_id)) {
            error!("screen {} is not a child of group {}", dms_id, group_id);
            return None;
        }
        if !self.remove_child_from_group(screen, &group) {
            error!("RemoveFromGroupLocked failed for screen {}", dms_id);
            return None;
        }
        Some(group)
    }

    /// Removes `screen`; an emptied group is dropped from both maps.
    fn remove_child_from_group(&self, screen: &SharedScreen, group: &SharedScreen) -> bool {
        let removed = group.write().remove_child(screen);
        if !removed {
            return false;
        }
        let (group_id, remaining) = {
            let group = group.read();
            (group.dms_id, group.group().map_or(0, |g| g.child_count()))
        };
        if remaining == 0 {
            info!("group {} is empty, removing it", group_id);
            self.with_registry(|r| {
                r.groups.remove(&group_id);
                r.screens.remove(&group_id);
            });
        }
        true
    }

    /// Mirror `screen_id` onto `mirror_screen_ids`.
    pub fn make_mirror(&self, screen_id: ScreenId, mirror_screen_ids: Vec<ScreenId>) -> bool {
        let _guard = self.state.lock();
        info!("MakeMirror, screenId:{}", screen_id);
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("MakeMirror, screen {} not found", screen_id);
            return false;
        };
        if screen.read().screen_type != ScreenType::Real {
            error!("MakeMirror, screen {} is not a real screen", screen_id);
            return false;
        }
        let group_id = screen.read().group_dms_id;
        let group = match self.get_abstract_screen_group(group_id) {
            Some(group) => group,
            None => {
                let Some(group) = self.add_to_group_locked(&screen) else {
                    error!("MakeMirror, fail to add screen {} to a group", screen_id);
                    return false;
                };
                let info = screen.read().convert_to_screen_info();
                self.notify_screen_group_changed(info, ScreenGroupChangeEvent::AddToGroup);
                if let Some(callback) = self.screen_callback() {
                    callback.on_connect(&screen);
                }
                group
            }
        };
        let filter = group.read().group().map_or(false, |g| {
            g.combination == ScreenCombination::Mirror && g.mirror_screen_id == screen_id
        });
        if let Some(g) = group.write().group_mut() {
            g.mirror_screen_id = screen_id;
        }
        let points = vec![Point::default(); mirror_screen_ids.len()];
        self.change_screen_group(&group, &mirror_screen_ids, &points, filter, ScreenCombination::Mirror);
        true
    }

    /// Tile `screen_ids` at `start_points` in the default screen's group.
    pub fn make_expand(&self, screen_ids: &[ScreenId], start_points: &[Point]) -> bool {
        if screen_ids.len() != start_points.len() {
            error!("MakeExpand, {} screens but {} points", screen_ids.len(), start_points.len());
            return false;
        }
        let _guard = self.state.lock();
        let default_id = self.get_default_abstract_screen_id();
        let Some(default_screen) = self.get_abstract_screen(default_id) else {
            error!("MakeExpand, default screen {} not found", default_id);
            return false;
        };
        let Some(group) = self.get_abstract_screen_group(default_screen.read().group_dms_id) else {
            error!("MakeExpand, default screen has no group");
            return false;
        };
        let filter = group
            .read()
            .group()
            .map_or(false, |g| g.combination == ScreenCombination::Expand);
        self.change_screen_group(&group, screen_ids, start_points, filter, ScreenCombination::Expand);
        true
    }

    /// Move `screen_ids` into `group` with `combination`. With `filter`,
    /// screens already in `group` are left alone.
    fn change_screen_group(
        &self,
        group: &SharedScreen,
        screen_ids: &[ScreenId],
        start_points: &[Point],
        filter: bool,
        combination: ScreenCombination,
    ) {
        let group_id = group.read().dms_id;
        let mut pending: Vec<(SharedScreen, Point, bool)> = Vec::new();
        for (idx, screen_id) in screen_ids.iter().enumerate() {
            let Some(screen) = self.get_abstract_screen(*screen_id) else {
                continue;
            };
            let current_group = screen.read().group_dms_id;
            if filter
                && current_group == group_id
                && group.read().group().map_or(false, |g| g.has_child(*screen_id))
            {
                trace!("screen {} already in group {}", screen_id, group_id);
                continue;
            }
            if self.get_abstract_screen_group(current_group).is_some() {
                if let Some(callback) = self.screen_callback() {
                    callback.on_disconnect(&screen);
                }
            }
            let removed = self.remove_from_group_locked(&screen).is_some();
            let point = start_points.get(idx).copied().unwrap_or_default();
            pending.push((screen, point, removed));
        }
        if let Some(g) = group.write().group_mut() {
            g.combination = combination;
        }
        self.add_screens_to_group(group, pending);
    }

    fn add_screens_to_group(&self, group: &SharedScreen, pending: Vec<(SharedScreen, Point, bool)>) {
        if pending.is_empty() {
            return;
        }
        let default_screen = self.get_abstract_screen(self.get_default_abstract_screen_id());
        let mut add_infos = Vec::new();
        let mut remove_infos = Vec::new();
        let mut change_infos = Vec::new();
        for (screen, point, removed) in pending {
            let added = group.write().add_child(&screen, point, default_screen.as_ref());
            if added {
                self.ensure_group_registered(group);
            }
            let info = screen.read().convert_to_screen_info();
            let screen_id = info.id;
            match (removed, added) {
                (true, true) => change_infos.push(info),
                (true, false) => remove_infos.push(info),
                (false, true) => add_infos.push(info),
                (false, false) => {
                    error!("screen {} neither left nor joined a group", info.id);
                    continue;
                }
            }
            if added {
                if let Some(callback) = self.screen_callback() {
                    callback.on_connect(&screen);
                }
                if let Some(listener) = self.rs_listener() {
                    listener.on_connected(screen_id);
                }
            }
        }
        self.notify_screen_group_changed_batch(remove_infos, ScreenGroupChangeEvent::RemoveFromGroup);
        self.notify_screen_group_changed_batch(change_infos, ScreenGroupChangeEvent::ChangeGroup);
        self.notify_screen_group_changed_batch(add_infos, ScreenGroupChangeEvent::AddToGroup);
    }

    /// A group emptied by the remove pass comes back once it has children.
    fn ensure_group_registered(&self, group: &SharedScreen) {
        let group_id = group.read().dms_id;
        self.with_registry(|r| {
            if !r.groups.contains_key(&group_id) {
                debug!("re-register group {}", group_id);
                r.groups.insert(group_id, group.clone());
                r.screens.insert(group_id, group.clone());
            }
        });
    }

    pub fn remove_virtual_screen_from_group(&self, screen_ids: &[ScreenId]) {
        if screen_ids.is_empty() {
            return;
        }
        let _guard = self.state.lock();
        let mut infos = Vec::new();
        for screen_id in screen_ids {
            let Some(screen) = self.get_abstract_screen(*screen_id) else {
                continue;
            };
            let (screen_type, group_id) = {
                let screen = screen.read();
                (screen.screen_type, screen.group_dms_id)
            };
            if screen_type != ScreenType::Virtual {
                continue;
            }
            let Some(group) = self.get_abstract_screen_group(group_id) else {
                continue;
            };
            if !group.read().group().map_or(false, |g| g.has_child(*screen_id)) {
                continue;
            }
            if let Some(callback) = self.screen_callback() {
                callback.on_disconnect(&screen);
            }
            if self.remove_child_from_group(&screen, &group) {
                infos.push(screen.read().convert_to_screen_info());
            }
        }
        self.notify_screen_group_changed_batch(infos, ScreenGroupChangeEvent::RemoveFromGroup);
    }

    // ========================================================================
    // Virtual screens
    // ========================================================================

    /// Creates a virtual screen owned by `agent`. Nothing here watches the
    /// agent: its transport must call [`Self::on_remote_died`] when the agent
    /// dies, which destroys every screen recorded for it.
    pub fn create_virtual_screen(
        &self,
        option: VirtualScreenOption,
        surface: Option<Arc<BufferQueue>>,
        agent: AgentId,
    ) -> ScreenId {
        let rs_id = self.render.create_virtual_screen(&option, surface, SCREEN_ID_INVALID);
        info!("id: {} name: {}", rs_id, option.name);
        if rs_id == SCREEN_ID_INVALID {
            error!("virtual screen create failed");
            return SCREEN_ID_INVALID;
        }
        let _guard = self.state.lock();
        if let Some(dms_id) = self.convert_to_dms_screen_id(rs_id) {
            info!("id: {} appears in screenIdManager_.", rs_id);
            return dms_id;
        }
        let dms_id = self.with_registry(|r| r.ids.create_and_get_new_screen_id(rs_id));
        let screen = self.init_virtual_screen(dms_id, rs_id, &option).into_shared();
        let info = screen.read().convert_to_screen_info();
        self.with_registry(|r| {
            r.screens.insert(dms_id, screen.clone());
            r.agent_screens.entry(agent).or_default().push(dms_id);
        });
        self.notify_screen_connected(info);
        dms_id
    }

    fn init_virtual_screen(
        &self,
        dms_id: ScreenId,
        rs_id: ScreenId,
        option: &VirtualScreenOption,
    ) -> AbstractScreen {
        let refresh_rate = self
            .get_abstract_screen(self.get_default_abstract_screen_id())
            .and_then(|screen| screen.read().active_screen_mode())
            .map(|mode| mode.refresh_rate)
            .unwrap_or(0);
        let mut screen = AbstractScreen::new(self.render.clone(), option.name.clone(), dms_id, rs_id);
        screen.modes = vec![ScreenMode::new(option.width, option.height, refresh_rate)];
        screen.active_idx = 0;
        screen.screen_type = ScreenType::Virtual;
        screen.virtual_pixel_ratio = option.density;
        screen
    }

    pub fn destroy_virtual_screen(&self, screen_id: ScreenId) -> DmResult<()> {
        info!("DestroyVirtualScreen, screenId: {}", screen_id);
        let _guard = self.state.lock();
        self.with_registry(|r| {
            r.agent_screens.retain(|_, ids| {
                ids.retain(|id| *id != screen_id);
                !ids.is_empty()
            });
        });
        let rs_id = self.convert_to_rs_screen_id(screen_id).unwrap_or(SCREEN_ID_INVALID);
        if rs_id != SCREEN_ID_INVALID && self.get_abstract_screen(screen_id).is_some() {
            self.process_screen_disconnected(rs_id);
        }
        self.with_registry(|r| r.ids.delete_screen_id(screen_id));
        if rs_id == SCREEN_ID_INVALID {
            error!("DestroyVirtualScreen: no corresponding rsScreenId");
            return Err(DmError::invalid_param(format!("screen {screen_id}")));
        }
        self.render.remove_virtual_screen(rs_id);
        Ok(())
    }

    pub fn set_virtual_screen_surface(
        &self,
        screen_id: ScreenId,
        surface: Option<Arc<BufferQueue>>,
    ) -> DmResult<()> {
        let rs_id = self
            .convert_to_rs_screen_id(screen_id)
            .filter(|id| *id != SCREEN_ID_INVALID)
            .ok_or_else(|| DmError::invalid_param(format!("screen {screen_id}")))?;
        self.render.set_virtual_screen_surface(rs_id, surface).map_err(|err| {
            error!("SetVirtualScreenSurface failed in RenderService: {}", err);
            DmError::render_service_failed(err.to_string())
        })
    }

    /// Destroy every virtual screen created by `agent`.
    pub fn on_remote_died(&self, agent: AgentId) -> bool {
        let _guard = self.state.lock();
        let screen_ids = self.with_registry(|r| r.agent_screens.remove(&agent)).unwrap_or_default();
        for screen_id in screen_ids {
            if let Err(err) = self.destroy_virtual_screen(screen_id) {
                warn!("destroy screen {} of dead agent {}: {}", screen_id, agent, err);
            }
        }
        true
    }

    // ========================================================================
    // Orientation / rotation / mode
    // ========================================================================

    pub fn set_build_in_default_orientation(&self, orientation: Orientation) {
        self.with_registry(|r| r.build_in_default_orientation = orientation);
    }

    pub fn set_orientation(
        &self,
        screen_id: ScreenId,
        orientation: Orientation,
        is_from_window: bool,
    ) -> bool {
        info!("set orientation. screen {} orientation {:?}", screen_id, orientation);
        let _guard = self.state.lock();
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("fail to set orientation, cannot find screen {}", screen_id);
            return false;
        };
        let orientation = {
            let mut s = screen.write();
            if s.is_group() {
                warn!("cannot set orientation to the combination. screen: {}", screen_id);
                return false;
            }
            let orientation = if is_from_window {
                if orientation == Orientation::Unspecified {
                    s.requested_orientation
                } else {
                    orientation
                }
            } else {
                s.requested_orientation = orientation;
                orientation
            };
            if s.orientation == orientation {
                info!("skip setting orientation. screen {} orientation {:?}", screen_id, orientation);
                return true;
            }
            orientation
        };

        if is_from_window {
            match self.with_registry(|r| r.orientation_hook.clone()) {
                Some(hook) => hook(screen_id, orientation),
                None => debug!("no orientation switch hook, {:?} pending", orientation),
            }
        } else {
            let rotation = screen.read().calc_rotation(orientation);
            self.set_rotation(screen_id, rotation, false);
        }
        screen.write().set_orientation(orientation);

        let info = screen.read().convert_to_screen_info();
        self.notify_screen_changed(info, ScreenChangeEvent::UpdateOrientation);
        if let Some(callback) = self.screen_callback() {
            callback.on_change(&screen, DisplayChangeEvent::UpdateOrientation);
        }
        true
    }

    /// Rotate the screen's display node. Both listeners hear about it even
    /// when the rotation is unchanged.
    pub fn set_rotation(&self, screen_id: ScreenId, rotation: Rotation, is_from_window: bool) -> bool {
        info!("Enter SetRotation, screenId: {}, rotation: {:?}, fromWindow: {}", screen_id, rotation, is_from_window);
        let _guard = self.state.lock();
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("SetRotation error, cannot get screen with screenId: {}", screen_id);
            return false;
        };
        {
            let mut s = screen.write();
            if rotation != s.rotation {
                if s.rs_id == SCREEN_ID_INVALID {
                    error!("SetRotation: rsScreenId is invalid");
                    return false;
                }
                let Some(node) = s.display_node.clone() else {
                    error!("SetRotation: displayNode is null");
                    return false;
                };
                match (s.rotation, rotation) {
                    // play 90 -> 0 instead of sweeping back through 180
                    (Rotation::Rotation270, Rotation::Rotation0) => node.set_rotation(90.0),
                    (Rotation::Rotation0, Rotation::Rotation270) => node.set_rotation(-360.0),
                    _ => {}
                }
                if let Some(mode) = s.active_screen_mode() {
                    apply_node_rotation(&node, rotation, mode);
                }
                self.render.flush_transaction();
                s.rotation = rotation;
            }
        }
        let info = screen.read().convert_to_screen_info();
        self.notify_screen_changed(info, ScreenChangeEvent::UpdateRotation);
        if let Some(callback) = self.screen_callback() {
            callback.on_change(&screen, DisplayChangeEvent::UpdateRotation);
        }
        true
    }

    pub fn set_screen_active_mode(&self, screen_id: ScreenId, mode_id: u32) -> bool {
        info!("SetScreenActiveMode: screenId: {}, modeId: {}", screen_id, mode_id);
        if screen_id == SCREEN_ID_INVALID {
            error!("SetScreenActiveMode: invalid screenId");
            return false;
        }
        let _guard = self.state.lock();
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("SetScreenActiveMode: get AbstractScreen failed");
            return false;
        };
        let Some(rs_id) = self.convert_to_rs_screen_id(screen_id).filter(|id| *id != SCREEN_ID_INVALID) else {
            error!("SetScreenActiveMode: no rs screen for {}", screen_id);
            return false;
        };
        self.render.set_screen_active_mode(rs_id, mode_id);
        let changed = {
            let mut s = screen.write();
            let previous = s.active_idx;
            s.active_idx = mode_id as i32;
            previous != s.active_idx
        };
        if changed {
            let weak = self.weak_self.clone();
            self.worker.post(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.process_screen_mode_changed(screen_id);
                }
            });
        }
        true
    }

    fn process_screen_mode_changed(&self, screen_id: ScreenId) {
        let _guard = self.state.lock();
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("screen is nullptr. screenId: {}", screen_id);
            return;
        };
        if screen.read().active_screen_mode().is_none() {
            error!("active screen mode is nullptr. screenId: {}", screen_id);
            return;
        }
        if let Some(callback) = self.screen_callback() {
            callback.on_change(&screen, DisplayChangeEvent::DisplaySizeChanged);
        }
        let info = screen.read().convert_to_screen_info();
        self.notify_screen_changed(info, ScreenChangeEvent::ChangeMode);
    }

    pub fn set_virtual_pixel_ratio(&self, screen_id: ScreenId, ratio: f32) -> bool {
        let _guard = self.state.lock();
        let Some(screen) = self.get_abstract_screen(screen_id) else {
            error!("fail to set virtual pixel ratio, cannot find screen {}", screen_id);
            return false;
        };
        {
            let mut s = screen.write();
            if s.is_group() {
                error!("cannot set virtual pixel ratio to the combination. screen: {}", screen_id);
                return false;
            }
            if (s.virtual_pixel_ratio - ratio).abs() < VPR_EPSILON {
                info!("The density is equivalent to the original value. screen {}", screen_id);
                return true;
            }
            s.set_virtual_pixel_ratio(ratio);
        }
        if let Some(callback) = self.screen_callback() {
            callback.on_change(&screen, DisplayChangeEvent::DisplayVirtualPixelRatioChanged);
        }
        let info = screen.read().convert_to_screen_info();
        self.notify_screen_changed(info, ScreenChangeEvent::VirtualPixelRatioChanged);
        true
    }

    // ========================================================================
    // Color
    // ========================================================================

    fn screen_or_invalid(&self, screen_id: ScreenId) -> DmResult<SharedScreen> {
        self.get_abstract_screen(screen_id)
            .ok_or_else(|| DmError::invalid_param(format!("screen {screen_id}")))
    }

    pub fn get_screen_supported_color_gamuts(&self, screen_id: ScreenId) -> DmResult<Vec<ScreenColorGamut>> {
        self.screen_or_invalid(screen_id)?.read().screen_supported_color_gamuts()
    }

    pub fn get_screen_color_gamut(&self, screen_id: ScreenId) -> DmResult<ScreenColorGamut> {
        self.screen_or_invalid(screen_id)?.read().screen_color_gamut()
    }

    pub fn set_screen_color_gamut(&self, screen_id: ScreenId, index: i32) -> DmResult<()> {
        self.screen_or_invalid(screen_id)?.read().set_screen_color_gamut(index)
    }

    pub fn get_screen_gamut_map(&self, screen_id: ScreenId) -> DmResult<ScreenGamutMap> {
        self.screen_or_invalid(screen_id)?.read().screen_gamut_map()
    }

    pub fn set_screen_gamut_map(&self, screen_id: ScreenId, map: ScreenGamutMap) -> DmResult<()> {
        self.screen_or_invalid(screen_id)?.read().set_screen_gamut_map(map)
    }

    pub fn set_screen_color_transform(&self, screen_id: ScreenId) -> DmResult<()> {
        self.screen_or_invalid(screen_id)?.read().set_screen_color_transform()
    }

    // ========================================================================
    // Power
    // ========================================================================

    pub fn set_screen_power_for_all(&self, state: ScreenPowerState, reason: PowerStateChangeReason) -> bool {
        info!("state:{:?}, reason:{:?}", state, reason);
        let _guard = self.state.lock();
        let screens: Vec<SharedScreen> = self.with_registry(|r| r.screens.values().cloned().collect());
        if screens.is_empty() {
            error!("no screen info");
            return false;
        }
        let (status, event) = match state {
            ScreenPowerState::PowerOn => (ScreenPowerStatus::On, DisplayPowerEvent::DisplayOn),
            ScreenPowerState::PowerOff => (ScreenPowerStatus::Off, DisplayPowerEvent::DisplayOff),
            other => {
                warn!("SetScreenPowerStatus state not support: {:?}", other);
                return false;
            }
        };
        let mut has_real_screen = false;
        for screen in screens {
            let (screen_type, rs_id) = {
                let screen = screen.read();
                (screen.screen_type, screen.rs_id)
            };
            if screen_type != ScreenType::Real {
                continue;
            }
            self.render.set_screen_power_status(rs_id, status);
            has_real_screen = true;
        }
        if !has_real_screen {
            warn!("no real screen to power {:?}", state);
            return false;
        }
        self.ctx.agent().notify_display_power_event(event, EventStatus::End)
    }

    pub fn get_screen_power(&self, screen_id: ScreenId) -> ScreenPowerState {
        let _guard = self.state.lock();
        let rs_id = self.with_registry(|r| r.screens.get(&screen_id).map(|screen| screen.read().rs_id));
        match rs_id {
            Some(rs_id) => ScreenPowerState::from(self.render.screen_power_status(rs_id)),
            None => {
                error!("cannot find screen {}", screen_id);
                ScreenPowerState::InvalidState
            }
        }
    }

    // ========================================================================
    // Agent notifications
    // ========================================================================

    /// Deliver on the worker, inline when already there.
    fn post_notification<F>(&self, task: F)
    where
        F: FnOnce(&dyn DisplayManagerAgent) + Send + 'static,
    {
        let agent = self.ctx.agent().clone();
        if self.worker.is_worker_thread() {
            task(agent.as_ref());
        } else {
            self.worker.post(move || task(agent.as_ref()));
        }
    }

    fn notify_screen_connected(&self, info: ScreenInfo) {
        self.post_notification(move |agent| agent.on_screen_connect(info));
    }

    fn notify_screen_disconnected(&self, screen_id: ScreenId) {
        self.post_notification(move |agent| agent.on_screen_disconnect(screen_id));
    }

    fn notify_screen_changed(&self, info: ScreenInfo, event: ScreenChangeEvent) {
        self.post_notification(move |agent| agent.on_screen_change(info, event));
    }

    fn notify_screen_group_changed(&self, info: ScreenInfo, event: ScreenGroupChangeEvent) {
        self.notify_screen_group_changed_batch(vec![info], event);
    }

    fn notify_screen_group_changed_batch(&self, infos: Vec<ScreenInfo>, event: ScreenGroupChangeEvent) {
        if infos.is_empty() {
            return;
        }
        let trigger = std::thread::current().name().unwrap_or_default().to_string();
        self.post_notification(move |agent| agent.on_screen_group_change(&trigger, infos, event));
    }
}

/// Rotate `node` by `rotation`; horizontal rotations swap the frame around
/// the panel centre.
fn apply_node_rotation(node: &DisplayNode, rotation: Rotation, mode: ScreenMode) {
    let (mut width, mut height) = (mode.width as f32, mode.height as f32);
    let (mut x, mut y) = (0.0, 0.0);
    if !rotation.is_vertical() {
        std::mem::swap(&mut width, &mut height);
        x = (height - width) / 2.0;
        y = (width - height) / 2.0;
    }
    node.set_rotation(-rotation.degrees());
    node.set_frame(x, y, width, height);
    node.set_bounds(x, y, width, height);
}
