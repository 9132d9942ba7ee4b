//! Two-way map between logical (dms) and platform (rs) screen ids.

use std::collections::HashMap;

use tracing::warn;

use super::types::{ScreenId, SCREEN_ID_INVALID};

/// dms ids come from a counter that never goes back, so an id is never
/// reused within one controller even after the screen is gone.
#[derive(Debug, Default)]
pub struct ScreenIdManager {
    dms_screen_count: ScreenId,
    dms_to_rs: HashMap<ScreenId, ScreenId>,
    rs_to_dms: HashMap<ScreenId, ScreenId>,
}

impl ScreenIdManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a dms id for `rs_id`. Groups pass `SCREEN_ID_INVALID` and get
    /// no reverse mapping.
    pub fn create_and_get_new_screen_id(&mut self, rs_id: ScreenId) -> ScreenId {
        let dms_id = self.dms_screen_count;
        self.dms_screen_count += 1;
        if self.dms_to_rs.insert(dms_id, rs_id).is_some() {
            warn!("dmsScreenId: {} exit in dms2RsScreenIdMap_, warning.", dms_id);
        }
        if rs_id == SCREEN_ID_INVALID {
            return dms_id;
        }
        if self.rs_to_dms.insert(rs_id, dms_id).is_some() {
            warn!("rsScreenId: {} exit in rs2DmsScreenIdMap_, warning.", rs_id);
        }
        dms_id
    }

    pub fn delete_screen_id(&mut self, dms_id: ScreenId) -> bool {
        let Some(rs_id) = self.dms_to_rs.remove(&dms_id) else {
            return false;
        };
        self.rs_to_dms.remove(&rs_id);
        true
    }

    pub fn has_dms_screen_id(&self, dms_id: ScreenId) -> bool {
        self.dms_to_rs.contains_key(&dms_id)
    }

    pub fn has_rs_screen_id(&self, rs_id: ScreenId) -> bool {
        self.rs_to_dms.contains_key(&rs_id)
    }

    pub fn rs_screen_num(&self) -> u32 {
        self.rs_to_dms.len() as u32
    }

    pub fn convert_to_rs_screen_id(&self, dms_id: ScreenId) -> Option<ScreenId> {
        self.dms_to_rs.get(&dms_id).copied()
    }

    pub fn convert_to_dms_screen_id(&self, rs_id: ScreenId) -> Option<ScreenId> {
        self.rs_to_dms.get(&rs_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_never_reused() {
        let mut ids = ScreenIdManager::new();
        let first = ids.create_and_get_new_screen_id(10);
        assert!(ids.delete_screen_id(first));
        let second = ids.create_and_get_new_screen_id(10);
        assert_ne!(first, second);
        assert_eq!(ids.convert_to_dms_screen_id(10), Some(second));
    }

    #[test]
    fn test_group_ids_have_no_rs_side() {
        let mut ids = ScreenIdManager::new();
        let group = ids.create_and_get_new_screen_id(SCREEN_ID_INVALID);
        assert!(ids.has_dms_screen_id(group));
        assert_eq!(ids.convert_to_rs_screen_id(group), Some(SCREEN_ID_INVALID));
        assert_eq!(ids.rs_screen_num(), 0);
        assert!(!ids.has_rs_screen_id(SCREEN_ID_INVALID));
    }

    #[test]
    fn test_delete_removes_both_directions() {
        let mut ids = ScreenIdManager::new();
        let dms = ids.create_and_get_new_screen_id(3);
        assert_eq!(ids.rs_screen_num(), 1);
        assert!(ids.delete_screen_id(dms));
        assert!(!ids.has_rs_screen_id(3));
        assert!(!ids.delete_screen_id(dms));
    }
}
