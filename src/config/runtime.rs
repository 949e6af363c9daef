use super::{ConfigError, ConfigResult};
use crate::domain::PressureLimits;
use crate::impl_default;
use serde::{Deserialize, Serialize};

/// 脚本运行时线程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// 专用运行时线程名
    pub thread_name: String,

    /// 单次 pump 最多执行的任务数，0 表示排空队列
    pub max_jobs_per_pump: usize,
}

impl_default!(RuntimeConfig {
    thread_name: "script-runtime".to_string(),
    max_jobs_per_pump: 0,
});

impl RuntimeConfig {
    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Runtime thread name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 待决操作配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingConfig {
    /// 默认超时（毫秒），None 表示不设超时
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

/// 场景内存回收配置
///
/// 阈值按存活场景数和节点数计算，超过即触发；0 表示关闭该项。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 激进回收时，非活动场景超过该年龄（秒）才会被销毁
    pub stale_scene_age_secs: u64,

    /// 超过后执行普通清理并发出 onMemoryWarning
    pub warning_scenes: usize,
    pub warning_nodes: usize,

    /// 超过后执行激进清理
    pub critical_scenes: usize,
    pub critical_nodes: usize,
}

impl_default!(MemoryConfig {
    stale_scene_age_secs: 30,
    warning_scenes: 8,
    warning_nodes: 5000,
    critical_scenes: 16,
    critical_nodes: 10000,
});

impl MemoryConfig {
    pub fn limits(&self) -> PressureLimits {
        PressureLimits {
            warning_scenes: self.warning_scenes,
            critical_scenes: self.critical_scenes,
            warning_nodes: self.warning_nodes,
            critical_nodes: self.critical_nodes,
        }
    }

    /// 同时启用时，警告阈值必须低于危急阈值
    pub fn validate(&self) -> ConfigResult<()> {
        for (what, warning, critical) in [
            ("scene", self.warning_scenes, self.critical_scenes),
            ("node", self.warning_nodes, self.critical_nodes),
        ] {
            if warning > 0 && critical > 0 && warning >= critical {
                return Err(ConfigError::ValidationError(format!(
                    "Memory {} warning threshold {} must be below critical threshold {}",
                    what, warning, critical
                )));
            }
        }
        Ok(())
    }
}
