use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::screen::types::{NodeId, ScreenId};
use crate::util::geometry::{FrameF, Point};

/// How a display node sources its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisplayNodeConfig {
    pub screen_id: ScreenId,
    pub is_mirrored: bool,
    /// Node being mirrored; only meaningful when `is_mirrored`
    pub mirror_node_id: NodeId,
}

impl DisplayNodeConfig {
    pub fn plain(screen_id: ScreenId) -> Self {
        Self { screen_id, is_mirrored: false, mirror_node_id: 0 }
    }

    pub fn mirror(screen_id: ScreenId, mirror_node_id: NodeId) -> Self {
        Self { screen_id, is_mirrored: true, mirror_node_id }
    }
}

#[derive(Debug, Default)]
struct DisplayNodeState {
    config: DisplayNodeConfig,
    offset: Point,
    frame: FrameF,
    bounds: FrameF,
    rotation: f32,
    security: bool,
    in_tree: bool,
    children: Vec<NodeId>,
    cross_parent_children: Vec<NodeId>,
}

/// Root of one screen's render tree.
///
/// Mutations are staged on the node and become visible to the compositor
/// when the owning render service flushes its transaction.
#[derive(Debug)]
pub struct DisplayNode {
    id: NodeId,
    state: Mutex<DisplayNodeState>,
}

impl DisplayNode {
    pub fn new(id: NodeId, config: DisplayNodeConfig) -> Self {
        Self {
            id,
            state: Mutex::new(DisplayNodeState { config, in_tree: true, ..Default::default() }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> DisplayNodeConfig {
        self.state.lock().config
    }

    pub fn set_mirror_config(&self, config: DisplayNodeConfig) {
        self.state.lock().config = config;
    }

    pub fn offset(&self) -> Point {
        self.state.lock().offset
    }

    pub fn set_display_offset(&self, x: i32, y: i32) {
        self.state.lock().offset = Point::new(x, y);
    }

    pub fn frame(&self) -> FrameF {
        self.state.lock().frame
    }

    pub fn set_frame(&self, x: f32, y: f32, w: f32, h: f32) {
        self.state.lock().frame = FrameF::new(x, y, w, h);
    }

    pub fn bounds(&self) -> FrameF {
        self.state.lock().bounds
    }

    pub fn set_bounds(&self, x: f32, y: f32, w: f32, h: f32) {
        self.state.lock().bounds = FrameF::new(x, y, w, h);
    }

    /// Degrees, counter-clockwise negative.
    pub fn rotation(&self) -> f32 {
        self.state.lock().rotation
    }

    pub fn set_rotation(&self, degrees: f32) {
        self.state.lock().rotation = degrees;
    }

    pub fn is_security_display(&self) -> bool {
        self.state.lock().security
    }

    pub fn set_security_display(&self, security: bool) {
        self.state.lock().security = security;
    }

    pub fn is_in_tree(&self) -> bool {
        self.state.lock().in_tree
    }

    pub fn remove_from_tree(&self) {
        self.state.lock().in_tree = false;
    }

    pub fn add_child(&self, child: &SurfaceNode) {
        let mut state = self.state.lock();
        if !state.children.contains(&child.id()) {
            state.children.push(child.id());
        }
    }

    pub fn remove_child(&self, child: &SurfaceNode) {
        self.state.lock().children.retain(|&id| id != child.id());
    }

    pub fn add_cross_parent_child(&self, child: &SurfaceNode) {
        let mut state = self.state.lock();
        if !state.cross_parent_children.contains(&child.id()) {
            state.cross_parent_children.push(child.id());
        }
    }

    pub fn remove_cross_parent_child(&self, child: &SurfaceNode, new_parent: NodeId) {
        tracing::trace!(node = self.id, child = child.id(), new_parent, "remove cross parent child");
        self.state.lock().cross_parent_children.retain(|&id| id != child.id());
    }

    pub fn children(&self) -> Vec<NodeId> {
        self.state.lock().children.clone()
    }

    pub fn cross_parent_children(&self) -> Vec<NodeId> {
        self.state.lock().cross_parent_children.clone()
    }
}

/// A window's surface as seen by the render tree.
#[derive(Debug)]
pub struct SurfaceNode {
    id: NodeId,
    name: String,
    visible: Mutex<bool>,
}

impl SurfaceNode {
    pub fn new(id: NodeId, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { id, name: name.into(), visible: Mutex::new(false) })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.lock()
    }

    pub fn set_visible(&self, visible: bool) {
        *self.visible.lock() = visible;
    }
}
