//! 统一错误处理模块
//!
//! 提供桥接层范围内的统一错误类型定义
//!
//! ## 错误类型分层
//!
//! - **基础设施层错误** (`core::error`): 命令分发、脚本运行时、配置
//! - **领域层错误** (`domain::errors`): 场景状态机与节点图的规则违例
//!
//! `BridgeError` 可以同时承载两层的错误。

use crate::config::ConfigError;
use crate::domain::errors::SceneError;
use thiserror::Error;

/// 桥接层核心错误类型
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 命令分发错误
///
/// 只在调用线程上同步返回，从不进入待决操作队列。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command}: {message}")]
    InvalidArgument { command: String, message: String },
}

impl CommandError {
    pub fn invalid_argument(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            command: command.into(),
            message: message.into(),
        }
    }

    /// 面向脚本侧的单字段错误消息
    pub fn message(&self) -> String {
        match self {
            Self::UnknownCommand(name) => format!("unknown command '{}'", name),
            Self::InvalidArgument { message, .. } => message.clone(),
        }
    }
}

/// 脚本运行时错误
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Runtime initialization failed: {0}")]
    Init(String),

    #[error("Callable not found: {0}")]
    CallableNotFound(u64),

    #[error("Callback invocation failed: {0}")]
    Invocation(String),
}

/// 结果类型别名
pub type BridgeResult<T> = Result<T, BridgeError>;
pub type CommandResult<T> = Result<T, CommandError>;
pub type ScriptResult<T> = Result<T, ScriptError>;
