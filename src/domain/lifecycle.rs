//! 场景/节点生命周期管理器
//!
//! 场景状态机与节点父子图的唯一所有者。管理器本身不加锁，桥接层把它放在
//! 一个 `Mutex` 后面，让脚本线程和原生后台线程的结构性修改串行化。
//!
//! 每次场景状态变化都会记录一条 [`SceneTransition`]，调用方在释放锁之后
//! 通过 [`LifecycleManager::take_transitions`] 取走并投递给脚本侧。

use super::errors::{SceneError, SceneResult};
use super::node::{EventRegistration, Node, NodeGraph, Parent, RegistrationTable};
use super::scene::{Scene, SceneState, SceneType};
use crate::bindings::marshal::{PropValue, PropertyMap};
use std::collections::HashMap;
use std::time::Duration;

/// 场景状态变化事件名
pub const SCENE_STATE_EVENT: &str = "onSceneStateChanged";

/// 内存压力警告事件名
pub const MEMORY_WARNING_EVENT: &str = "onMemoryWarning";

/// 原生侧已知的节点事件名
pub const SUPPORTED_EVENTS: &[&str] = &[
    "onClick",
    "onTouch",
    "onHover",
    "onDrag",
    "onPinch",
    "onRotate",
    "onFuse",
    "onCollision",
    "onTransformUpdate",
    "onLoadStart",
    "onLoadEnd",
    "onError",
    "onAnimationStart",
    "onAnimationFinish",
    "onTrackingUpdated",
    "onAnchorFound",
    "onAnchorUpdated",
    "onAnchorRemoved",
    SCENE_STATE_EVENT,
    MEMORY_WARNING_EVENT,
];

/// 一次场景状态变化，以及当时注册在该场景上的回调
#[derive(Debug, Clone, PartialEq)]
pub struct SceneTransition {
    pub scene_id: String,
    /// 新建场景时为 None
    pub from: Option<SceneState>,
    pub to: SceneState,
    pub callback_ids: Vec<String>,
}

impl SceneTransition {
    /// 投递给脚本侧的事件数据
    pub fn to_props(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("sceneId".into(), PropValue::from(self.scene_id.as_str()));
        map.insert("eventName".into(), PropValue::from(SCENE_STATE_EVENT));
        map.insert(
            "previousState".into(),
            self.from
                .map_or(PropValue::Null, |s| PropValue::from(s.label())),
        );
        map.insert("state".into(), PropValue::from(self.to.label()));
        map
    }
}

/// 内存统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleStats {
    pub total_scenes: usize,
    pub active_scenes: usize,
    pub managed_nodes: usize,
    pub event_registrations: usize,
    pub oldest_scene_age_secs: u64,
}

impl LifecycleStats {
    pub fn to_props(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("totalScenes".into(), self.total_scenes.into());
        map.insert("activeScenes".into(), self.active_scenes.into());
        map.insert("managedNodes".into(), self.managed_nodes.into());
        map.insert("eventRegistrations".into(), self.event_registrations.into());
        map.insert(
            "oldestSceneAgeSeconds".into(),
            self.oldest_scene_age_secs.into(),
        );
        map
    }
}

/// 一次清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scenes_destroyed: Vec<String>,
    pub tombstones_pruned: usize,
    pub registrations_pruned: usize,
}

/// 内存压力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryPressure {
    Normal,
    Warning,
    Critical,
}

impl MemoryPressure {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// 压力阈值：存活场景数或托管节点数超过阈值即进入对应等级，0 表示不检查
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PressureLimits {
    pub warning_scenes: usize,
    pub critical_scenes: usize,
    pub warning_nodes: usize,
    pub critical_nodes: usize,
}

impl PressureLimits {
    pub fn classify(&self, scenes: usize, nodes: usize) -> MemoryPressure {
        let exceeds = |value: usize, limit: usize| limit > 0 && value > limit;
        if exceeds(scenes, self.critical_scenes) || exceeds(nodes, self.critical_nodes) {
            MemoryPressure::Critical
        } else if exceeds(scenes, self.warning_scenes) || exceeds(nodes, self.warning_nodes) {
            MemoryPressure::Warning
        } else {
            MemoryPressure::Normal
        }
    }
}

/// 一次内存压力警告：触发等级、随之执行的清理和清理后的统计
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryWarning {
    pub level: MemoryPressure,
    pub report: CleanupReport,
    pub stats: LifecycleStats,
    /// 清理之后仍注册着 `onMemoryWarning` 的回调
    pub callback_ids: Vec<String>,
}

impl MemoryWarning {
    pub fn to_props(&self) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert("eventName".into(), PropValue::from(MEMORY_WARNING_EVENT));
        map.insert("level".into(), PropValue::from(self.level.label()));
        map.insert("memoryStats".into(), PropValue::Object(self.stats.to_props()));
        map.insert(
            "scenesDestroyed".into(),
            PropValue::Array(
                self.report
                    .scenes_destroyed
                    .iter()
                    .map(|id| PropValue::from(id.as_str()))
                    .collect(),
            ),
        );
        map
    }
}

/// 生命周期管理器
pub struct LifecycleManager {
    scenes: HashMap<String, Scene>,
    active_scene: Option<String>,
    graph: NodeGraph,
    registrations: RegistrationTable,
    transitions: Vec<SceneTransition>,
    stale_scene_age: Duration,
    limits: PressureLimits,
    /// 越过阈值后置位，压力回落前不重复告警
    pressure_latched: bool,
    warnings: Vec<MemoryWarning>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl LifecycleManager {
    pub fn new(stale_scene_age: Duration) -> Self {
        Self {
            scenes: HashMap::new(),
            active_scene: None,
            graph: NodeGraph::new(),
            registrations: RegistrationTable::new(),
            transitions: Vec::new(),
            stale_scene_age,
            limits: PressureLimits::default(),
            pressure_latched: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_pressure_limits(mut self, limits: PressureLimits) -> Self {
        self.limits = limits;
        self
    }

    // ---------------------------------------------------------------------
    // 节点
    // ---------------------------------------------------------------------

    /// 节点 ID 不能与存活场景重名
    pub fn create_node(&mut self, id: &str, node_type: &str, props: PropertyMap) -> SceneResult<()> {
        if self.scenes.get(id).is_some_and(|s| !s.state().is_terminal()) {
            return Err(SceneError::IdInUse(id.to_string()));
        }
        self.graph.create(id, node_type, props)?;
        tracing::debug!(target: "scene", "Created node {} ({})", id, node_type);
        Ok(())
    }

    pub fn update_node(&mut self, id: &str, props: PropertyMap) -> SceneResult<()> {
        self.graph.update(id, props)
    }

    /// 删除节点：从父级移除，并撤销整棵原子树上的事件注册
    pub fn delete_node(&mut self, id: &str) -> SceneResult<()> {
        let detached = self.graph.remove(id)?;
        if let Some(Parent::Scene(scene_id)) = &detached.former_parent {
            if let Some(scene) = self.scenes.get_mut(scene_id) {
                scene.remove_root(id);
            }
        }

        let mut revoked = 0;
        for node_id in &detached.subtree {
            revoked += self.registrations.remove_node(node_id);
        }
        tracing::debug!(
            target: "scene",
            "Deleted node {} ({} registrations revoked, {} children orphaned)",
            id,
            revoked,
            detached.orphaned_children.len()
        );
        Ok(())
    }

    /// `parent_id` 可以是节点，也可以是场景（节点成为场景的根节点）。
    /// 创建时保证节点与存活场景不重名，所以解析结果唯一。
    pub fn add_child(&mut self, parent_id: &str, child_id: &str) -> SceneResult<bool> {
        let parent = self.resolve_parent(parent_id)?;
        let attached = self.graph.set_parent(child_id, parent.clone())?;
        if let Parent::Scene(scene_id) = &parent {
            if let Some(scene) = self.scenes.get_mut(scene_id) {
                scene.add_root(child_id);
            }
        }
        Ok(attached)
    }

    pub fn remove_child(&mut self, parent_id: &str, child_id: &str) -> SceneResult<bool> {
        let parent = self.resolve_parent(parent_id)?;
        let detached = self.graph.clear_parent(child_id, &parent)?;
        if detached {
            if let Parent::Scene(scene_id) = &parent {
                if let Some(scene) = self.scenes.get_mut(scene_id) {
                    scene.remove_root(child_id);
                }
            }
        }
        Ok(detached)
    }

    fn resolve_parent(&self, parent_id: &str) -> SceneResult<Parent> {
        if self.graph.contains(parent_id) {
            return Ok(Parent::Node(parent_id.to_string()));
        }
        match self.scenes.get(parent_id) {
            Some(scene) if !scene.state().is_terminal() => Ok(Parent::Scene(parent_id.to_string())),
            _ => Err(SceneError::NodeNotFound(parent_id.to_string())),
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.graph.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.graph.len()
    }

    pub fn node_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.graph.ids().cloned().collect();
        ids.sort();
        ids
    }

    // ---------------------------------------------------------------------
    // 事件注册
    // ---------------------------------------------------------------------

    fn is_live_target(&self, id: &str) -> bool {
        self.graph.contains(id)
            || self
                .scenes
                .get(id)
                .is_some_and(|s| !s.state().is_terminal())
    }

    /// 幂等注册；目标节点/场景必须存在
    pub fn register_event(
        &mut self,
        node_id: &str,
        event_name: &str,
        callback_id: &str,
    ) -> SceneResult<bool> {
        if !self.is_live_target(node_id) {
            return Err(SceneError::NodeNotFound(node_id.to_string()));
        }
        if !SUPPORTED_EVENTS.contains(&event_name) {
            tracing::debug!(target: "scene", "Registering non-standard event {}", event_name);
        }
        Ok(self
            .registrations
            .insert(EventRegistration::new(node_id, event_name, callback_id)))
    }

    /// 幂等注销，不存在的三元组不是错误
    pub fn unregister_event(&mut self, node_id: &str, event_name: &str, callback_id: &str) -> bool {
        self.registrations
            .remove(&EventRegistration::new(node_id, event_name, callback_id))
    }

    pub fn registrations_for(&self, node_id: &str, event_name: &str) -> Vec<String> {
        self.registrations.callbacks_for(node_id, event_name)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &EventRegistration> {
        self.registrations.iter()
    }

    // ---------------------------------------------------------------------
    // 场景
    // ---------------------------------------------------------------------

    fn record(&mut self, scene_id: &str, from: Option<SceneState>, to: SceneState) {
        let callback_ids = self.registrations_for(scene_id, SCENE_STATE_EVENT);
        tracing::debug!(
            target: "scene",
            "Scene {}: {} -> {}",
            scene_id,
            from.map_or("none", |s| s.label()),
            to
        );
        self.transitions.push(SceneTransition {
            scene_id: scene_id.to_string(),
            from,
            to,
            callback_ids,
        });
    }

    /// 取走尚未投递的状态变化
    pub fn take_transitions(&mut self) -> Vec<SceneTransition> {
        std::mem::take(&mut self.transitions)
    }

    fn scene_mut(&mut self, id: &str) -> SceneResult<&mut Scene> {
        self.scenes
            .get_mut(id)
            .ok_or_else(|| SceneError::SceneNotFound(id.to_string()))
    }

    /// 创建场景；同 ID 的存活场景已存在时什么都不做并返回 false。
    /// 与已有节点重名时返回 [`SceneError::IdInUse`]。
    pub fn create_scene(&mut self, id: &str, scene_type: &str, props: PropertyMap) -> SceneResult<bool> {
        let scene_type = SceneType::parse(scene_type)?;
        if self.graph.contains(id) {
            return Err(SceneError::IdInUse(id.to_string()));
        }
        if let Some(existing) = self.scenes.get(id) {
            if !existing.state().is_terminal() {
                tracing::warn!(target: "scene", "Scene {} already exists", id);
                return Ok(false);
            }
        }
        self.scenes
            .insert(id.to_string(), Scene::new(id, scene_type, props));
        self.record(id, None, SceneState::Created);
        tracing::info!(target: "scene", "Created {} {}", scene_type.as_str(), id);
        self.check_memory_pressure();
        Ok(true)
    }

    /// 原生侧开始构建场景内容
    pub fn begin_loading(&mut self, id: &str) -> SceneResult<()> {
        self.scene_mut(id)?.begin_loading()?;
        self.record(id, Some(SceneState::Created), SceneState::Loading);
        Ok(())
    }

    /// 原生侧完成场景构建
    pub fn finish_loading(&mut self, id: &str) -> SceneResult<()> {
        self.scene_mut(id)?.finish_loading()?;
        self.record(id, Some(SceneState::Loading), SceneState::Loaded);
        Ok(())
    }

    /// 激活场景，之前的活动场景转为 Paused
    pub fn activate_scene(&mut self, id: &str) -> SceneResult<()> {
        let state = self
            .scenes
            .get(id)
            .map(Scene::state)
            .ok_or_else(|| SceneError::SceneNotFound(id.to_string()))?;
        if state == SceneState::Destroyed {
            return Err(SceneError::InvalidTransition {
                scene: id.to_string(),
                from: state,
                to: SceneState::Active,
            });
        }
        if state == SceneState::Active {
            return Ok(());
        }

        if let Some(previous) = self.active_scene.take() {
            if previous != id {
                self.pause_scene(&previous)?;
            }
        }

        let mut from = state;
        for step in self.scene_mut(id)?.activate()? {
            self.record(id, Some(from), step);
            from = step;
        }
        self.active_scene = Some(id.to_string());
        tracing::info!(target: "scene", "Activated scene {}", id);
        self.check_memory_pressure();
        Ok(())
    }

    fn pause_scene(&mut self, id: &str) -> SceneResult<bool> {
        let paused = self.scene_mut(id)?.pause()?;
        if paused {
            self.record(id, Some(SceneState::Active), SceneState::Paused);
        }
        Ok(paused)
    }

    /// Active → Paused；清除活动场景指针
    pub fn deactivate_scene(&mut self, id: &str) -> SceneResult<()> {
        self.pause_scene(id)?;
        if self.active_scene.as_deref() == Some(id) {
            self.active_scene = None;
        }
        Ok(())
    }

    /// 销毁场景：释放其拥有的节点子树以及挂在场景和这些节点上的注册
    pub fn destroy_scene(&mut self, id: &str) -> SceneResult<()> {
        let scene = self.scene_mut(id)?;
        let previous = scene.destroy()?;
        let roots = scene.take_roots();

        if self.active_scene.as_deref() == Some(id) {
            self.active_scene = None;
        }
        // 先记录，回调列表要在注册被清除之前取出
        self.record(id, Some(previous), SceneState::Destroyed);

        let mut released = 0;
        for root in roots {
            for node_id in self.graph.remove_subtree(&root) {
                self.registrations.remove_node(&node_id);
                released += 1;
            }
        }
        self.registrations.remove_node(id);
        tracing::info!(
            target: "scene",
            "Destroyed scene {} ({} nodes released)",
            id,
            released
        );
        Ok(())
    }

    /// 销毁所有存活场景
    pub fn destroy_all(&mut self) {
        let ids = self.scene_ids();
        for id in ids {
            if let Err(e) = self.destroy_scene(&id) {
                tracing::warn!(target: "scene", "Failed to destroy scene {}: {}", id, e);
            }
        }
    }

    pub fn scene_state(&self, id: &str) -> Option<SceneState> {
        self.scenes.get(id).map(Scene::state)
    }

    pub fn scene(&self, id: &str) -> Option<&Scene> {
        self.scenes.get(id)
    }

    pub fn active_scene_id(&self) -> Option<&str> {
        self.active_scene.as_deref()
    }

    /// 所有未销毁的场景 ID（排序）
    pub fn scene_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .scenes
            .values()
            .filter(|s| !s.state().is_terminal())
            .map(|s| s.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    // ---------------------------------------------------------------------
    // 诊断
    // ---------------------------------------------------------------------

    pub fn stats(&self) -> LifecycleStats {
        let live = self.scenes.values().filter(|s| !s.state().is_terminal());
        let mut stats = LifecycleStats {
            managed_nodes: self.graph.len(),
            event_registrations: self.registrations.len(),
            ..Default::default()
        };
        for scene in live {
            stats.total_scenes += 1;
            if scene.state() == SceneState::Active {
                stats.active_scenes += 1;
            }
            stats.oldest_scene_age_secs = stats.oldest_scene_age_secs.max(scene.age().as_secs());
        }
        stats
    }

    pub fn memory_pressure(&self) -> MemoryPressure {
        let stats = self.stats();
        self.limits.classify(stats.total_scenes, stats.managed_nodes)
    }

    /// 检查内存压力，场景创建和激活之后自动调用
    ///
    /// 首次越过阈值时执行清理（Critical 为激进模式）并记录一条 [`MemoryWarning`]；
    /// 压力回落到 Normal 之前不会再次触发。
    pub fn check_memory_pressure(&mut self) -> Option<MemoryWarning> {
        let level = self.memory_pressure();
        if level == MemoryPressure::Normal {
            if self.pressure_latched {
                tracing::info!(target: "scene", "Memory pressure subsided");
                self.pressure_latched = false;
            }
            return None;
        }
        if self.pressure_latched {
            return None;
        }
        self.pressure_latched = true;
        tracing::warn!(target: "scene", "Memory pressure {} detected", level.label());

        let report = self.perform_cleanup(level == MemoryPressure::Critical);
        let mut callback_ids: Vec<String> = self
            .registrations
            .iter()
            .filter(|r| r.event_name == MEMORY_WARNING_EVENT)
            .map(|r| r.callback_id.clone())
            .collect();
        callback_ids.sort();
        callback_ids.dedup();
        let warning = MemoryWarning {
            level,
            report,
            stats: self.stats(),
            callback_ids,
        };
        self.warnings.push(warning.clone());
        Some(warning)
    }

    /// 取走尚未投递的内存警告
    pub fn take_memory_warnings(&mut self) -> Vec<MemoryWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// 内存清理
    ///
    /// 普通模式清除已销毁场景的记录和指向不存在目标的注册；激进模式还会销毁
    /// 闲置超过阈值的非活动 Loaded/Paused 场景，从最老的开始，最多 n/2+1 个。
    pub fn perform_cleanup(&mut self, aggressive: bool) -> CleanupReport {
        let mut report = CleanupReport::default();

        if aggressive {
            let mut candidates: Vec<(std::time::Instant, String)> = self
                .scenes
                .values()
                .filter(|s| matches!(s.state(), SceneState::Loaded | SceneState::Paused))
                .filter(|s| self.active_scene.as_deref() != Some(s.id()))
                .filter(|s| s.age() >= self.stale_scene_age)
                .map(|s| (s.created_at(), s.id().to_string()))
                .collect();
            candidates.sort();

            let limit = candidates.len() / 2 + 1;
            for (_, id) in candidates.into_iter().take(limit) {
                if self.destroy_scene(&id).is_ok() {
                    report.scenes_destroyed.push(id);
                }
            }
        }

        let before = self.scenes.len();
        self.scenes.retain(|_, s| !s.state().is_terminal());
        report.tombstones_pruned = before - self.scenes.len();

        let graph = &self.graph;
        let scenes = &self.scenes;
        report.registrations_pruned = self
            .registrations
            .retain_targets(|id| graph.contains(id) || scenes.contains_key(id));

        tracing::info!(
            target: "scene",
            "Memory cleanup (aggressive={}): {} scenes destroyed, {} tombstones, {} registrations",
            aggressive,
            report.scenes_destroyed.len(),
            report.tombstones_pruned,
            report.registrations_pruned
        );
        report
    }
}
