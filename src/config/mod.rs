/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和校验
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub mod native;
pub mod runtime;

pub use native::NativeConfig;
pub use runtime::{MemoryConfig, PendingConfig, RuntimeConfig};

use crate::bindings::protocol::InitOptions;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接层主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,

    /// 脚本运行时线程配置
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// 原生侧配置
    #[serde(default)]
    pub native: NativeConfig,

    /// 内存回收配置
    #[serde(default)]
    pub memory: MemoryConfig,

    /// 待决操作配置
    #[serde(default)]
    pub pending: PendingConfig,

    /// `initialize` 缺省选项
    #[serde(default)]
    pub init: InitOptions,
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 保存为JSON文件
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BRIDGE_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                self.logging.level = level;
            }
        }

        if let Ok(val) = env::var("BRIDGE_NATIVE_WORKERS") {
            if let Ok(workers) = val.parse() {
                self.native.worker_threads = workers;
            }
        }
        if let Ok(val) = env::var("BRIDGE_VIEWPORT_WIDTH") {
            if let Ok(width) = val.parse() {
                self.native.viewport_width = width;
            }
        }
        if let Ok(val) = env::var("BRIDGE_VIEWPORT_HEIGHT") {
            if let Ok(height) = val.parse() {
                self.native.viewport_height = height;
            }
        }

        if let Ok(val) = env::var("BRIDGE_PENDING_TIMEOUT_MS") {
            self.pending.default_timeout_ms = val.parse().ok().filter(|ms| *ms > 0);
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.runtime.validate()?;
        self.native.validate()?;
        self.memory.validate()?;
        Ok(())
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. <config_dir>/scene_bridge/bridge.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置会再叠加环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::discover().unwrap_or_else(|| {
            tracing::info!(target: "bridge", "Using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn discover() -> Option<Self> {
        if let Some(config) = Self::load_candidate(Path::new("bridge.toml")) {
            return Some(config);
        }
        if let Some(config) = Self::load_candidate(Path::new("bridge.json")) {
            return Some(config);
        }
        let config_path = dirs::config_dir()?.join("scene_bridge").join("bridge.toml");
        Self::load_candidate(&config_path)
    }

    /// 按扩展名加载一个候选文件；文件不存在时静默跳过，内容有误时告警后跳过
    fn load_candidate(path: &Path) -> Option<Self> {
        let loaded = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_toml_file(path),
        };
        match loaded {
            Ok(config) => {
                tracing::info!(target: "bridge", "Loaded config from {:?}", path);
                Some(config)
            }
            Err(ConfigError::FileError(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(target: "bridge", "Ignoring {:?}: {}", path, e);
                None
            }
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

use crate::impl_default;

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    /// 大小写不敏感地解析级别名
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// `EnvFilter` 指令字符串
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}
