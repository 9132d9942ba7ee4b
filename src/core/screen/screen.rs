//! A logical screen: physical, virtual, or a group of screens.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info};

use super::group::ScreenGroup;
use super::types::{
    Orientation, Rotation, ScreenColorGamut, ScreenCombination, ScreenGamutMap, ScreenId,
    ScreenInfo, ScreenMode, ScreenType, NodeId, SCREEN_ID_INVALID,
};
use crate::core::errors::{DmError, DmResult};
use crate::core::render::{DisplayNode, DisplayNodeConfig, SurfaceNode};
use crate::platform::RenderService;
use crate::util::geometry::Point;

/// Screens are shared between the controller maps and their group.
pub type SharedScreen = Arc<RwLock<AbstractScreen>>;

/// Densities closer than this are treated as equal.
pub(crate) const VPR_EPSILON: f32 = 1e-6;

pub enum ScreenKind {
    Leaf,
    Group(ScreenGroup),
}

pub struct AbstractScreen {
    pub dms_id: ScreenId,
    pub rs_id: ScreenId,
    pub name: String,
    pub screen_type: ScreenType,
    pub modes: Vec<ScreenMode>,
    /// Index into `modes`; anything out of range means "no active mode"
    pub active_idx: i32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    /// Orientation last asked for by the system, not by a window
    pub requested_orientation: Orientation,
    pub virtual_pixel_ratio: f32,
    pub group_dms_id: ScreenId,
    pub last_group_dms_id: ScreenId,
    pub display_node: Option<Arc<DisplayNode>>,
    pub node_config: DisplayNodeConfig,
    pub kind: ScreenKind,
    render: Arc<dyn RenderService>,
}

impl fmt::Debug for AbstractScreen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractScreen")
            .field("dms_id", &self.dms_id)
            .field("rs_id", &self.rs_id)
            .field("name", &self.name)
            .field("type", &self.screen_type)
            .field("active_idx", &self.active_idx)
            .field("rotation", &self.rotation)
            .field("group", &self.group_dms_id)
            .field("is_group", &self.is_group())
            .finish()
    }
}

impl AbstractScreen {
    pub fn new(
        render: Arc<dyn RenderService>,
        name: impl Into<String>,
        dms_id: ScreenId,
        rs_id: ScreenId,
    ) -> Self {
        Self {
            dms_id,
            rs_id,
            name: name.into(),
            screen_type: ScreenType::Real,
            modes: Vec::new(),
            active_idx: 0,
            rotation: Rotation::Rotation0,
            orientation: Orientation::Unspecified,
            requested_orientation: Orientation::Unspecified,
            virtual_pixel_ratio: 1.0,
            group_dms_id: SCREEN_ID_INVALID,
            last_group_dms_id: SCREEN_ID_INVALID,
            display_node: None,
            node_config: DisplayNodeConfig::plain(rs_id),
            kind: ScreenKind::Leaf,
            render,
        }
    }

    pub fn new_group(
        render: Arc<dyn RenderService>,
        name: impl Into<String>,
        dms_id: ScreenId,
        rs_id: ScreenId,
        combination: ScreenCombination,
    ) -> Self {
        let mut screen = Self::new(render, name, dms_id, rs_id);
        screen.screen_type = ScreenType::Undefined;
        screen.kind = ScreenKind::Group(ScreenGroup::new(combination));
        screen
    }

    pub fn into_shared(self) -> SharedScreen {
        Arc::new(RwLock::new(self))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ScreenKind::Group(_))
    }

    pub fn group(&self) -> Option<&ScreenGroup> {
        match &self.kind {
            ScreenKind::Group(group) => Some(group),
            ScreenKind::Leaf => None,
        }
    }

    pub fn group_mut(&mut self) -> Option<&mut ScreenGroup> {
        match &mut self.kind {
            ScreenKind::Group(group) => Some(group),
            ScreenKind::Leaf => None,
        }
    }

    pub fn active_screen_mode(&self) -> Option<ScreenMode> {
        let mode = usize::try_from(self.active_idx).ok().and_then(|idx| self.modes.get(idx)).copied();
        if mode.is_none() {
            debug!("active mode index is wrong: {}", self.active_idx);
        }
        mode
    }

    pub fn modes(&self) -> &[ScreenMode] {
        &self.modes
    }

    pub fn display_node_id(&self) -> Option<NodeId> {
        self.display_node.as_ref().map(|node| node.id())
    }

    pub fn convert_to_screen_info(&self) -> ScreenInfo {
        let (width, height) = self
            .active_screen_mode()
            .map(|mode| (mode.width, mode.height))
            .unwrap_or((0, 0));
        let mut ratio = self.virtual_pixel_ratio;
        if ratio.abs() < VPR_EPSILON {
            ratio = 1.0;
        }
        ScreenInfo {
            id: self.dms_id,
            name: self.name.clone(),
            virtual_width: (width as f32 / ratio) as u32,
            virtual_height: (height as f32 / ratio) as u32,
            virtual_pixel_ratio: ratio,
            last_parent: self.last_group_dms_id,
            parent: self.group_dms_id,
            is_screen_group: self.is_group(),
            rotation: self.rotation,
            orientation: self.orientation,
            screen_type: self.screen_type,
            mode_id: self.active_idx,
            modes: self.modes.clone(),
        }
    }

    pub fn set_orientation(&mut self, orientation: Orientation) -> bool {
        self.orientation = orientation;
        true
    }

    pub fn set_virtual_pixel_ratio(&mut self, ratio: f32) -> bool {
        self.virtual_pixel_ratio = ratio;
        true
    }

    /// Rotation that shows `orientation` on this panel.
    ///
    /// Panels taller than wide count as vertical; everything else (tablets,
    /// external monitors) as horizontal.
    pub fn calc_rotation(&self, orientation: Orientation) -> Rotation {
        let Some(mode) = self.active_screen_mode() else {
            return Rotation::Rotation0;
        };
        let is_vertical_screen = mode.width < mode.height;
        match orientation {
            Orientation::Unspecified => Rotation::Rotation0,
            Orientation::Vertical if is_vertical_screen => Rotation::Rotation0,
            Orientation::Vertical => Rotation::Rotation90,
            Orientation::Horizontal if is_vertical_screen => Rotation::Rotation90,
            Orientation::Horizontal => Rotation::Rotation0,
            Orientation::ReverseVertical if is_vertical_screen => Rotation::Rotation180,
            Orientation::ReverseVertical => Rotation::Rotation270,
            Orientation::ReverseHorizontal if is_vertical_screen => Rotation::Rotation270,
            Orientation::ReverseHorizontal => Rotation::Rotation180,
            other => {
                error!("unknown orientation {:?}", other);
                Rotation::Rotation0
            }
        }
    }

    // ========================================================================
    // Render tree
    // ========================================================================

    /// Create the display node, or point the existing one at `config`, and
    /// size it to the active mode at `start_point`.
    pub fn init_display_node(&mut self, config: DisplayNodeConfig, start_point: Point) {
        let node = match &self.display_node {
            Some(node) => {
                node.set_mirror_config(config);
                node.clone()
            }
            None => match self.render.create_display_node(config) {
                Some(node) => {
                    self.display_node = Some(node.clone());
                    node
                }
                None => {
                    error!("fail to add child. create rsDisplayNode fail!");
                    return;
                }
            },
        };
        self.node_config = config;
        info!("SetDisplayOffset: posX:{}, posY:{}", start_point.x, start_point.y);
        node.set_display_offset(start_point.x, start_point.y);

        let (width, height) = self
            .active_screen_mode()
            .map(|mode| (mode.width as f32, mode.height as f32))
            .unwrap_or((0.0, 0.0));
        if self.screen_type == ScreenType::Virtual {
            node.set_security_display(true);
            debug!("virtual screen {} marked as security display", self.dms_id);
        }
        node.set_frame(0.0, 0.0, width, height);
        node.set_bounds(0.0, 0.0, width, height);
        self.render.flush_transaction();
    }

    /// Detach the display node from the tree and drop it.
    pub(crate) fn release_display_node(&mut self) {
        if let Some(node) = self.display_node.take() {
            node.set_display_offset(0, 0);
            node.remove_from_tree();
            self.render.flush_transaction();
        }
    }

    pub fn update_rs_tree(&self, surface: &SurfaceNode, is_add: bool) {
        let Some(node) = &self.display_node else {
            error!("node is nullptr");
            return;
        };
        info!(
            "{} surface: {}, {}",
            if is_add { "add" } else { "remove" },
            surface.name(),
            surface.id()
        );
        if is_add {
            surface.set_visible(true);
            node.add_child(surface);
        } else {
            node.remove_child(surface);
        }
    }

    pub fn update_display_group_rs_tree(&self, surface: &SurfaceNode, parent_node_id: NodeId, is_add: bool) {
        let Some(node) = &self.display_node else {
            error!("node is nullptr");
            return;
        };
        info!(
            "{} surface: {}, {}",
            if is_add { "add" } else { "remove" },
            surface.name(),
            surface.id()
        );
        if is_add {
            surface.set_visible(true);
            node.add_cross_parent_child(surface);
        } else {
            node.remove_cross_parent_child(surface, parent_node_id);
        }
    }

    // ========================================================================
    // Color
    // ========================================================================

    pub fn screen_supported_color_gamuts(&self) -> DmResult<Vec<ScreenColorGamut>> {
        self.render.supported_color_gamuts(self.rs_id).map_err(|err| {
            error!("GetScreenSupportedColorGamuts fail! rsId {}: {}", self.rs_id, err);
            DmError::render_service_failed(err.to_string())
        })
    }

    pub fn screen_color_gamut(&self) -> DmResult<ScreenColorGamut> {
        self.render.color_gamut(self.rs_id).map_err(|err| {
            error!("GetScreenColorGamut fail! rsId {}: {}", self.rs_id, err);
            DmError::render_service_failed(err.to_string())
        })
    }

    pub fn set_screen_color_gamut(&self, index: i32) -> DmResult<()> {
        let gamuts = self.screen_supported_color_gamuts()?;
        if index < 0 || index as usize >= gamuts.len() {
            error!("SetScreenColorGamut fail! rsId {} colorGamutIdx {} invalid.", self.rs_id, index);
            return Err(DmError::invalid_param(format!("color gamut index {index}")));
        }
        self.render.set_color_gamut(self.rs_id, index).map_err(|err| {
            error!("SetScreenColorGamut fail! rsId {}: {}", self.rs_id, err);
            DmError::render_service_failed(err.to_string())
        })?;
        info!("SetScreenColorGamut ok! rsId {}, colorGamutIdx {}", self.rs_id, index);
        Ok(())
    }

    pub fn screen_gamut_map(&self) -> DmResult<ScreenGamutMap> {
        self.render.gamut_map(self.rs_id).map_err(|err| {
            error!("GetScreenGamutMap fail! rsId {}: {}", self.rs_id, err);
            DmError::render_service_failed(err.to_string())
        })
    }

    pub fn set_screen_gamut_map(&self, map: ScreenGamutMap) -> DmResult<()> {
        if map > ScreenGamutMap::HdrExtension {
            return Err(DmError::invalid_param(format!("gamut map {map:?}")));
        }
        self.render.set_gamut_map(self.rs_id, map).map_err(|err| {
            error!("SetScreenGamutMap fail! rsId {}: {}", self.rs_id, err);
            DmError::render_service_failed(err.to_string())
        })
    }

    pub fn set_screen_color_transform(&self) -> DmResult<()> {
        info!("SetScreenColorTransform ok! rsId {}", self.rs_id);
        Ok(())
    }
}
