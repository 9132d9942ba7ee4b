//! Screen groups: a group owns the placement of its child screens and
//! decides how each child's display node sources its content.

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use super::screen::{AbstractScreen, SharedScreen};
use super::types::{ScreenCombination, ScreenGroupInfo, ScreenId, SCREEN_ID_INVALID};
use crate::core::render::DisplayNodeConfig;
use crate::util::geometry::Point;

pub struct ScreenGroup {
    pub combination: ScreenCombination,
    /// Source screen of a mirror group
    pub mirror_screen_id: ScreenId,
    children: BTreeMap<ScreenId, (SharedScreen, Point)>,
}

impl ScreenGroup {
    pub fn new(combination: ScreenCombination) -> Self {
        Self {
            combination,
            mirror_screen_id: SCREEN_ID_INVALID,
            children: BTreeMap::new(),
        }
    }

    pub fn has_child(&self, id: ScreenId) -> bool {
        self.children.contains_key(&id)
    }

    pub fn child(&self, id: ScreenId) -> Option<SharedScreen> {
        self.children.get(&id).map(|(screen, _)| screen.clone())
    }

    /// Children ordered by id.
    pub fn children(&self) -> Vec<SharedScreen> {
        self.children.values().map(|(screen, _)| screen.clone()).collect()
    }

    pub fn children_ids(&self) -> Vec<ScreenId> {
        self.children.keys().copied().collect()
    }

    pub fn children_position(&self) -> Vec<Point> {
        self.children.values().map(|(_, point)| *point).collect()
    }

    /// Origin for unknown children.
    pub fn child_position(&self, id: ScreenId) -> Point {
        self.children.get(&id).map(|(_, point)| *point).unwrap_or_default()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }
}

impl AbstractScreen {
    /// Add `child` at `start_point`.
    ///
    /// In a mirror group every child other than the source mirrors the
    /// source's display node. When the source is gone, `default_screen`
    /// stands in for it.
    pub fn add_child(
        &mut self,
        child: &SharedScreen,
        start_point: Point,
        default_screen: Option<&SharedScreen>,
    ) -> bool {
        let group_id = self.dms_id;
        let Some(group) = self.group() else {
            error!("screen {} is not a group", group_id);
            return false;
        };
        let (child_id, child_rs_id) = {
            let child = child.read();
            (child.dms_id, child.rs_id)
        };
        if group.has_child(child_id) {
            warn!("screen {} is already a child of group {}", child_id, group_id);
            return false;
        }

        let config = match group.combination {
            ScreenCombination::Alone | ScreenCombination::Expand => DisplayNodeConfig::plain(child_rs_id),
            ScreenCombination::Mirror => {
                let source = if group.mirror_screen_id == child_id {
                    None
                } else {
                    group.child(group.mirror_screen_id).or_else(|| {
                        info!("mirror screen {} gone, fall back to default", group.mirror_screen_id);
                        default_screen.cloned()
                    })
                };
                let source_node = source.and_then(|source| {
                    let source = source.read();
                    if source.dms_id == child_id {
                        None
                    } else {
                        source.display_node_id()
                    }
                });
                match source_node {
                    Some(node_id) => DisplayNodeConfig::mirror(child_rs_id, node_id),
                    None => DisplayNodeConfig::plain(child_rs_id),
                }
            }
        };

        {
            let mut child_guard = child.write();
            child_guard.init_display_node(config, start_point);
            child_guard.last_group_dms_id = child_guard.group_dms_id;
            child_guard.group_dms_id = group_id;
        }
        if let Some(group) = self.group_mut() {
            group.children.insert(child_id, (child.clone(), start_point));
        }
        debug!("screen {} joined group {} at {:?}", child_id, group_id, start_point);
        true
    }

    /// Fails without adding anything when the lengths differ.
    pub fn add_children(
        &mut self,
        children: &[SharedScreen],
        start_points: &[Point],
        default_screen: Option<&SharedScreen>,
    ) -> bool {
        if children.len() != start_points.len() {
            error!(
                "size mismatch, children: {}, points: {}",
                children.len(),
                start_points.len()
            );
            return false;
        }
        let mut all_added = true;
        for (child, point) in children.iter().zip(start_points) {
            all_added &= self.add_child(child, *point, default_screen);
        }
        all_added
    }

    pub fn remove_child(&mut self, child: &SharedScreen) -> bool {
        let group_id = self.dms_id;
        let child_id = {
            let mut child = child.write();
            child.last_group_dms_id = child.group_dms_id;
            child.group_dms_id = SCREEN_ID_INVALID;
            child.release_display_node();
            child.dms_id
        };
        let removed = self
            .group_mut()
            .map(|group| group.children.remove(&child_id).is_some())
            .unwrap_or(false);
        debug!("screen {} left group {}: {}", child_id, group_id, removed);
        removed
    }

    pub fn convert_to_screen_group_info(&self) -> Option<ScreenGroupInfo> {
        let group = self.group()?;
        Some(ScreenGroupInfo {
            screen: self.convert_to_screen_info(),
            combination: group.combination,
            children: group.children_ids(),
            position: group.children_position(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::screen::types::ScreenMode;
    use crate::platform::{RenderService, SimulatedRenderService};

    fn leaf(render: &Arc<dyn RenderService>, dms_id: ScreenId, rs_id: ScreenId) -> SharedScreen {
        let mut screen = AbstractScreen::new(render.clone(), format!("Screen_{dms_id}"), dms_id, rs_id);
        screen.modes = vec![ScreenMode::new(1080, 1920, 60)];
        screen.into_shared()
    }

    #[test]
    fn test_mirror_children_follow_source() {
        let render: Arc<dyn RenderService> = Arc::new(SimulatedRenderService::new());
        let mut group = AbstractScreen::new_group(render.clone(), "ScreenGroup_9", 9, SCREEN_ID_INVALID, ScreenCombination::Mirror);
        let source = leaf(&render, 0, 0);
        let mirror = leaf(&render, 1, 1);
        group.group_mut().unwrap().mirror_screen_id = 0;

        assert!(group.add_child(&source, Point::new(0, 0), None));
        assert!(group.add_child(&mirror, Point::new(0, 0), None));
        assert!(!group.add_child(&mirror, Point::new(0, 0), None));

        let source_node = source.read().display_node_id().unwrap();
        let config = mirror.read().node_config;
        assert!(config.is_mirrored);
        assert_eq!(config.mirror_node_id, source_node);
        assert!(!source.read().node_config.is_mirrored);
        assert_eq!(mirror.read().group_dms_id, 9);
    }

    #[test]
    fn test_remove_child_drops_node() {
        let render: Arc<dyn RenderService> = Arc::new(SimulatedRenderService::new());
        let mut group = AbstractScreen::new_group(render.clone(), "ScreenGroup_5", 5, SCREEN_ID_INVALID, ScreenCombination::Expand);
        let screen = leaf(&render, 2, 2);
        assert!(group.add_child(&screen, Point::new(1080, 0), None));
        assert_eq!(group.group().unwrap().child_position(2), Point::new(1080, 0));
        let node = screen.read().display_node.clone().unwrap();
        assert_eq!(node.offset(), Point::new(1080, 0));

        assert!(group.remove_child(&screen));
        assert!(!node.is_in_tree());
        let screen = screen.read();
        assert!(screen.display_node.is_none());
        assert_eq!(screen.group_dms_id, SCREEN_ID_INVALID);
        assert_eq!(screen.last_group_dms_id, 5);
        assert_eq!(group.group().unwrap().child_count(), 0);
        assert_eq!(group.group().unwrap().child_position(2), Point::default());
    }

    #[test]
    fn test_add_children_rejects_length_mismatch() {
        let render: Arc<dyn RenderService> = Arc::new(SimulatedRenderService::new());
        let mut group = AbstractScreen::new_group(render.clone(), "ScreenGroup_3", 3, SCREEN_ID_INVALID, ScreenCombination::Expand);
        let screen = leaf(&render, 0, 0);
        assert!(!group.add_children(&[screen], &[], None));
        assert_eq!(group.group().unwrap().child_count(), 0);
    }
}
