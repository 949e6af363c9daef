//! 视口投影
//!
//! 相机位于原点，朝 -Z 看。屏幕坐标原点在左上角，深度范围 [0, 1]。

use crate::config::native::NativeConfig;
use glam::{Mat4, Vec3};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("point is behind the camera")]
    BehindCamera,
    #[error("point has non-finite components")]
    NonFinite,
}

/// 透视相机 + 视口
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    projection: Mat4,
    inverse: Mat4,
    width: f32,
    height: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32, fov_deg: f32, near: f32, far: f32) -> Self {
        let width = width.max(1) as f32;
        let height = height.max(1) as f32;
        let projection = Mat4::perspective_rh(fov_deg.to_radians(), width / height, near, far);
        Self {
            projection,
            inverse: projection.inverse(),
            width,
            height,
        }
    }

    pub fn from_config(config: &NativeConfig) -> Self {
        Self::new(
            config.viewport_width,
            config.viewport_height,
            config.field_of_view_deg,
            config.near_plane,
            config.far_plane,
        )
    }

    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// 世界坐标 → (屏幕 x, 屏幕 y, 深度)
    pub fn project(&self, world: Vec3) -> Result<Vec3, ProjectionError> {
        if !world.is_finite() {
            return Err(ProjectionError::NonFinite);
        }
        if world.z >= 0.0 {
            return Err(ProjectionError::BehindCamera);
        }
        let ndc = self.projection.project_point3(world);
        Ok(Vec3::new(
            (ndc.x + 1.0) * 0.5 * self.width,
            (1.0 - ndc.y) * 0.5 * self.height,
            ndc.z,
        ))
    }

    /// (屏幕 x, 屏幕 y, 深度) → 世界坐标；深度 0 落在近裁剪面上
    pub fn unproject(&self, screen: Vec3) -> Result<Vec3, ProjectionError> {
        if !screen.is_finite() {
            return Err(ProjectionError::NonFinite);
        }
        let ndc = Vec3::new(
            screen.x / self.width * 2.0 - 1.0,
            1.0 - screen.y / self.height * 2.0,
            screen.z,
        );
        Ok(self.inverse.project_point3(ndc))
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::from_config(&NativeConfig::default())
    }
}
