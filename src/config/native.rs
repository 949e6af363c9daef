use super::{ConfigError, ConfigResult};
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 原生侧（无头实现）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// 原生工作线程数
    pub worker_threads: usize,

    /// 视口宽度（像素）
    pub viewport_width: u32,

    /// 视口高度（像素）
    pub viewport_height: u32,

    /// 垂直视场角（度）
    pub field_of_view_deg: f32,

    /// 近裁剪面
    pub near_plane: f32,

    /// 远裁剪面
    pub far_plane: f32,

    /// 自检操作的完成延迟（毫秒）
    pub self_test_delay_ms: u64,
}

impl_default!(NativeConfig {
    worker_threads: 2,
    viewport_width: 1080,
    viewport_height: 1920,
    field_of_view_deg: 60.0,
    near_plane: 0.01,
    far_plane: 1000.0,
    self_test_delay_ms: 1000,
});

impl NativeConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ValidationError(
                "At least one native worker thread is required".to_string(),
            ));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ConfigError::ValidationError(
                "Viewport dimensions must be non-zero".to_string(),
            ));
        }
        if !(self.field_of_view_deg > 0.0 && self.field_of_view_deg < 180.0) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid field of view: {}",
                self.field_of_view_deg
            )));
        }
        if !(self.near_plane > 0.0 && self.far_plane > self.near_plane) {
            return Err(ConfigError::ValidationError(
                "Clip planes must satisfy 0 < near < far".to_string(),
            ));
        }
        Ok(())
    }
}
