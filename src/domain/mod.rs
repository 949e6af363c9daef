//! 领域层模块
//! 场景状态机、节点父子图以及管理它们的生命周期管理器

pub mod errors;
pub mod lifecycle;
pub mod node;
#[cfg(test)]
mod property_tests;
pub mod scene;

// 重新导出主要类型
pub use errors::{SceneError, SceneResult};
pub use lifecycle::{
    CleanupReport, LifecycleManager, LifecycleStats, MemoryPressure, MemoryWarning,
    PressureLimits, SceneTransition, MEMORY_WARNING_EVENT, SCENE_STATE_EVENT, SUPPORTED_EVENTS,
};
pub use node::{EventRegistration, Node, NodeGraph, Parent};
pub use scene::{Scene, SceneState, SceneType};
