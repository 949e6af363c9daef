//! 领域特定错误类型

use super::scene::SceneState;
use thiserror::Error;

/// 场景/节点领域错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// 场景未找到
    #[error("Scene not found: {0}")]
    SceneNotFound(String),
    /// 节点未找到
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    /// 节点 ID 已存在
    #[error("Node already exists: {0}")]
    DuplicateNode(String),
    /// 节点和场景共用同一个 ID 空间
    #[error("Id {0} is already used by a scene or node")]
    IdInUse(String),
    /// 不支持的场景类型
    #[error("Unknown scene type: {0}")]
    InvalidSceneType(String),
    /// 非法状态转换
    #[error("Scene {scene}: cannot transition from {from} to {to}")]
    InvalidTransition {
        scene: String,
        from: SceneState,
        to: SceneState,
    },
    /// 节点已挂在另一个父节点下
    #[error("Node {child} already has parent {parent}")]
    AlreadyParented { child: String, parent: String },
    /// 挂载会形成环
    #[error("Adding {child} under {parent} would create a cycle")]
    CycleDetected { parent: String, child: String },
    /// 节点不能是自己的子节点
    #[error("Node {0} cannot be its own child")]
    SelfParent(String),
}

pub type SceneResult<T> = Result<T, SceneError>;
