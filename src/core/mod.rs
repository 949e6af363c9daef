//! 核心模块
//!
//! - `bridge` - 桥接入口，组装所有组件
//! - `error` - 错误类型定义
//! - `utils` - 时间戳与锁工具
//! - `macros` - `Default`/`new` 实现宏

#[macro_use]
pub mod macros;
pub mod bridge;
pub mod error;
pub mod utils;

// 重新导出错误类型
pub use error::{
    BridgeError, BridgeResult, CommandError, CommandResult, ScriptError, ScriptResult,
};

// 重新导出主要类型
pub use bridge::{init_logging, Bridge};
pub use utils::{current_timestamp_f64, current_timestamp_ms};
