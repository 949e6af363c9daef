//! 场景领域对象
//! 场景作为聚合根，负责自身的生命周期状态机

use crate::bindings::marshal::PropertyMap;
use crate::domain::errors::{SceneError, SceneResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// 场景状态
///
/// ```text
/// Created → Loading → Loaded → Active ⇄ Paused
///    └─────────┴─────────┴────────┴───────┴──→ Destroyed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneState {
    /// 已创建
    Created,
    /// 加载中
    Loading,
    /// 已加载
    Loaded,
    /// 激活
    Active,
    /// 暂停
    Paused,
    /// 已销毁（终态）
    Destroyed,
}

impl SceneState {
    /// 脚本侧看到的状态标签
    pub fn label(&self) -> &'static str {
        match self {
            SceneState::Created => "created",
            SceneState::Loading => "loading",
            SceneState::Loaded => "loaded",
            SceneState::Active => "active",
            SceneState::Paused => "paused",
            SceneState::Destroyed => "destroyed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SceneState::Destroyed)
    }

    /// 状态机允许的单步转换
    pub fn can_transition_to(&self, next: SceneState) -> bool {
        use SceneState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Created, Loading) | (Loading, Loaded) => true,
            (Loaded, Active) | (Paused, Active) => true,
            (Active, Paused) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SceneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 场景类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneType {
    Scene,
    ArScene,
}

impl SceneType {
    pub fn parse(value: &str) -> SceneResult<Self> {
        match value {
            "scene" => Ok(SceneType::Scene),
            "arScene" => Ok(SceneType::ArScene),
            other => Err(SceneError::InvalidSceneType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SceneType::Scene => "scene",
            SceneType::ArScene => "arScene",
        }
    }
}

/// 场景 - 聚合根
///
/// ## 业务规则
///
/// 1. 状态只能沿 [`SceneState::can_transition_to`] 允许的边移动
/// 2. `Destroyed` 是终态
/// 3. 场景拥有挂在它下面的根节点，销毁时由生命周期管理器一并释放
#[derive(Debug, Clone)]
pub struct Scene {
    id: String,
    scene_type: SceneType,
    props: PropertyMap,
    state: SceneState,
    created_at: Instant,
    roots: Vec<String>,
}

impl Scene {
    pub fn new(id: impl Into<String>, scene_type: SceneType, props: PropertyMap) -> Self {
        Self {
            id: id.into(),
            scene_type,
            props,
            state: SceneState::Created,
            created_at: Instant::now(),
            roots: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn scene_type(&self) -> SceneType {
        self.scene_type
    }

    pub fn props(&self) -> &PropertyMap {
        &self.props
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 直接挂在场景下的节点，保持插入顺序
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub(crate) fn add_root(&mut self, node_id: &str) -> bool {
        if self.roots.iter().any(|r| r == node_id) {
            return false;
        }
        self.roots.push(node_id.to_string());
        true
    }

    pub(crate) fn remove_root(&mut self, node_id: &str) -> bool {
        let before = self.roots.len();
        self.roots.retain(|r| r != node_id);
        self.roots.len() != before
    }

    pub(crate) fn take_roots(&mut self) -> Vec<String> {
        std::mem::take(&mut self.roots)
    }

    fn transition(&mut self, next: SceneState) -> SceneResult<SceneState> {
        if !self.state.can_transition_to(next) {
            return Err(SceneError::InvalidTransition {
                scene: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }

    /// Created → Loading
    pub fn begin_loading(&mut self) -> SceneResult<()> {
        self.transition(SceneState::Loading).map(|_| ())
    }

    /// Loading → Loaded
    pub fn finish_loading(&mut self) -> SceneResult<()> {
        self.transition(SceneState::Loaded).map(|_| ())
    }

    /// 激活场景，返回经过的所有中间状态
    ///
    /// 尚未加载完的场景会先走完 Loading/Loaded。已激活时不做任何事。
    pub fn activate(&mut self) -> SceneResult<Vec<SceneState>> {
        let mut path = Vec::new();
        if self.state == SceneState::Active {
            return Ok(path);
        }
        if self.state == SceneState::Created {
            self.begin_loading()?;
            path.push(SceneState::Loading);
        }
        if self.state == SceneState::Loading {
            self.finish_loading()?;
            path.push(SceneState::Loaded);
        }
        self.transition(SceneState::Active)?;
        path.push(SceneState::Active);
        Ok(path)
    }

    /// Active → Paused；未激活的场景保持原状
    pub fn pause(&mut self) -> SceneResult<bool> {
        match self.state {
            SceneState::Active => self.transition(SceneState::Paused).map(|_| true),
            SceneState::Destroyed => Err(SceneError::InvalidTransition {
                scene: self.id.clone(),
                from: self.state,
                to: SceneState::Paused,
            }),
            _ => Ok(false),
        }
    }

    /// 任意非终态 → Destroyed
    pub fn destroy(&mut self) -> SceneResult<SceneState> {
        self.transition(SceneState::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(id: &str) -> Scene {
        Scene::new(id, SceneType::Scene, PropertyMap::new())
    }

    #[test]
    fn test_scene_creation() {
        let scene = scene("main");
        assert_eq!(scene.id(), "main");
        assert_eq!(scene.state(), SceneState::Created);
        assert!(scene.roots().is_empty());
    }

    #[test]
    fn test_scene_lifecycle() {
        let mut scene = scene("main");
        scene.begin_loading().unwrap();
        assert_eq!(scene.state(), SceneState::Loading);
        scene.finish_loading().unwrap();
        assert_eq!(scene.activate().unwrap(), vec![SceneState::Active]);
        assert!(scene.pause().unwrap());
        assert_eq!(scene.state(), SceneState::Paused);
        assert_eq!(scene.activate().unwrap(), vec![SceneState::Active]);
        assert_eq!(scene.destroy().unwrap(), SceneState::Active);
        assert!(scene.state().is_terminal());
    }

    #[test]
    fn test_scene_activate_from_created_walks_through_loading() {
        let mut scene = scene("main");
        assert_eq!(
            scene.activate().unwrap(),
            vec![SceneState::Loading, SceneState::Loaded, SceneState::Active]
        );
        assert!(scene.activate().unwrap().is_empty());
    }

    #[test]
    fn test_scene_invalid_state_transition() {
        let mut scene = scene("main");
        assert!(matches!(
            scene.finish_loading(),
            Err(SceneError::InvalidTransition { .. })
        ));

        scene.destroy().unwrap();
        assert!(scene.activate().is_err());
        assert!(scene.destroy().is_err());
        assert!(scene.pause().is_err());
    }

    #[test]
    fn test_scene_pause_when_not_active_is_noop() {
        let mut scene = scene("main");
        assert!(!scene.pause().unwrap());
        assert_eq!(scene.state(), SceneState::Created);
    }

    #[test]
    fn test_scene_type_parse() {
        assert_eq!(SceneType::parse("arScene").unwrap(), SceneType::ArScene);
        assert_eq!(
            SceneType::parse("vrScene"),
            Err(SceneError::InvalidSceneType("vrScene".into()))
        );
    }

    #[test]
    fn test_scene_roots_are_ordered_and_unique() {
        let mut scene = scene("main");
        assert!(scene.add_root("a"));
        assert!(scene.add_root("b"));
        assert!(!scene.add_root("a"));
        assert_eq!(scene.roots(), &["a".to_string(), "b".to_string()]);
        assert!(scene.remove_root("a"));
        assert!(!scene.remove_root("a"));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(SceneState::Paused.to_string(), "paused");
        assert_eq!(SceneState::Destroyed.label(), "destroyed");
    }
}
