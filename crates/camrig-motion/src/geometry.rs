//! 对焦几何
//!
//! 相机位于 `(camera_x, slider_y, camera_z)`，滑轨沿 y 轴移动。
//! 对焦点 `(fx, fy, fz)`：
//!
//! ```text
//! pan  = -deg(atan2(fx - camera_x, fy - slider_y))
//! tilt =  deg(atan2(fz - camera_z, hypot(fx - camera_x, fy - slider_y)))
//! ```
//!
//! 两个角度都归一化到 (-180°, 180°]。

use camrig_tools::{FocusSettings, GeometrySettings};

/// 归一化到 (-180°, 180°]
pub fn normalize_angle(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 { wrapped - 360.0 } else { wrapped }
}

/// 相机的固定安装坐标（毫米）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraGeometry {
    pub camera_x: f64,
    pub camera_z: f64,
}

impl Default for CameraGeometry {
    fn default() -> Self {
        Self::from(&GeometrySettings::default())
    }
}

impl From<&GeometrySettings> for CameraGeometry {
    fn from(settings: &GeometrySettings) -> Self {
        Self {
            camera_x: settings.camera_x_mm,
            camera_z: settings.camera_z_mm,
        }
    }
}

impl CameraGeometry {
    /// 相机在指定滑轨位置时指向目标所需的 (pan, tilt)，单位度
    pub fn pan_tilt_for(&self, slider_y: f64, target: [f64; 3]) -> (f64, f64) {
        let [fx, fy, fz] = target;
        let dx = fx - self.camera_x;
        let dy = fy - slider_y;
        let dz = fz - self.camera_z;

        let pan = -dx.atan2(dy).to_degrees();
        let tilt = dz.atan2(dx.hypot(dy)).to_degrees();
        (normalize_angle(pan), normalize_angle(tilt))
    }

    /// 相机到目标的直线距离（毫米）
    pub fn camera_distance(&self, slider_y: f64, target: [f64; 3]) -> f64 {
        let [fx, fy, fz] = target;
        let dx = fx - self.camera_x;
        let dy = fy - slider_y;
        let dz = fz - self.camera_z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// 对焦距离到对焦轴步数的线性映射
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusRange {
    pub min_distance: f64,
    pub max_distance: f64,
    pub min_steps: i32,
    pub max_steps: i32,
}

impl FocusRange {
    pub fn new(settings: &FocusSettings, min_steps: i32, max_steps: i32) -> Self {
        Self {
            min_distance: settings.min_distance_mm,
            max_distance: settings.max_distance_mm,
            min_steps,
            max_steps,
        }
    }

    /// 距离超出范围时夹到行程两端
    pub fn steps_for_distance(&self, distance: f64) -> i32 {
        let span = self.max_distance - self.min_distance;
        let fraction = if span > 0.0 {
            ((distance - self.min_distance) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let steps = self.min_steps as f64 + fraction * (self.max_steps - self.min_steps) as f64;
        (steps.round() as i32).clamp(self.min_steps, self.max_steps)
    }
}
