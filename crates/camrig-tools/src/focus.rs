//! # 对焦点
//!
//! 对焦点是世界坐标系中的一个固定点（毫米），附带展示用的元数据。
//! 运动层在会话开始时复制坐标，之后存储中的修改不影响正在进行的会话。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 对焦点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusPoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl FocusPoint {
    /// 只有坐标的对焦点
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            id: None,
            name: None,
            description: None,
            x,
            y,
            z,
            color: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// 对焦点存储（外部协作方）
///
/// 运动层只在会话开始时读取一次。
pub trait FocusPointStore: Send + Sync {
    fn get_point(&self, id: u32) -> Option<FocusPoint>;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct InMemoryFocusPointStore {
    points: RwLock<BTreeMap<u32, FocusPoint>>,
}

impl InMemoryFocusPointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖，未指定 id 时分配下一个可用 id
    pub fn insert(&self, mut point: FocusPoint) -> u32 {
        let mut points = self.points.write();
        let id = point
            .id
            .unwrap_or_else(|| points.keys().next_back().map_or(0, |last| last + 1));
        point.id = Some(id);
        points.insert(id, point);
        id
    }

    pub fn remove(&self, id: u32) -> Option<FocusPoint> {
        self.points.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}

impl FocusPointStore for InMemoryFocusPointStore {
    fn get_point(&self, id: u32) -> Option<FocusPoint> {
        self.points.read().get(&id).cloned()
    }
}

impl FromIterator<FocusPoint> for InMemoryFocusPointStore {
    fn from_iter<I: IntoIterator<Item = FocusPoint>>(iter: I) -> Self {
        let store = Self::new();
        for point in iter {
            store.insert(point);
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_assigns_ids() {
        let store = InMemoryFocusPointStore::new();
        assert_eq!(store.insert(FocusPoint::at(0.0, 100.0, 0.0)), 0);
        assert_eq!(store.insert(FocusPoint::at(1.0, 2.0, 3.0)), 1);
        assert_eq!(store.get_point(1).unwrap().position(), [1.0, 2.0, 3.0]);
        assert!(store.get_point(7).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_point_returns_copy() {
        let store = InMemoryFocusPointStore::new();
        let id = store.insert(FocusPoint::at(10.0, 20.0, 30.0));
        let copy = store.get_point(id).unwrap();
        store.remove(id);
        assert!(store.is_empty());
        assert_eq!(copy.x, 10.0);
    }

    #[test]
    fn test_focus_point_json_with_metadata() {
        let json = r##"{
            "id": 0,
            "name": "Point 1",
            "description": "",
            "x": 120.5,
            "y": 400.0,
            "z": -50.0,
            "color": "#4a9eff",
            "created_at": "2024-01-01T12:00:00",
            "updated_at": "2024-01-01T12:00:00"
        }"##;
        let point: FocusPoint = serde_json::from_str(json).unwrap();
        assert_eq!(point.id, Some(0));
        assert_eq!(point.position(), [120.5, 400.0, -50.0]);
        assert!(point.is_finite());
        assert!(!FocusPoint::at(f64::NAN, 0.0, 0.0).is_finite());
    }
}
