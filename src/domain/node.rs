//! 节点图与事件注册
//!
//! 节点图只允许单一父节点：`children` 与子节点的 `parent` 始终互相一致。

use crate::bindings::marshal::{merge_props, PropertyMap};
use crate::domain::errors::{SceneError, SceneResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// 节点的父级：另一个节点，或者直接挂在场景下
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Parent {
    Node(String),
    Scene(String),
}

impl Parent {
    pub fn id(&self) -> &str {
        match self {
            Parent::Node(id) | Parent::Scene(id) => id,
        }
    }
}

/// 场景图节点
#[derive(Debug, Clone)]
pub struct Node {
    id: String,
    node_type: String,
    props: PropertyMap,
    children: Vec<String>,
    parent: Option<Parent>,
}

impl Node {
    fn new(id: &str, node_type: &str, props: PropertyMap) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            props,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    pub fn props(&self) -> &PropertyMap {
        &self.props
    }

    /// 子节点 ID，保持插入顺序且不重复
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn parent(&self) -> Option<&Parent> {
        self.parent.as_ref()
    }
}

/// 删除节点的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachedNode {
    /// 原父级
    pub former_parent: Option<Parent>,
    /// 被删除节点原来的整棵子树（含自身），用于清理事件注册
    pub subtree: Vec<String>,
    /// 失去父节点、成为游离根的直接子节点
    pub orphaned_children: Vec<String>,
}

/// 节点图
#[derive(Debug, Default)]
pub struct NodeGraph {
    nodes: HashMap<String, Node>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    fn get_mut(&mut self, id: &str) -> SceneResult<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| SceneError::NodeNotFound(id.to_string()))
    }

    pub fn create(&mut self, id: &str, node_type: &str, props: PropertyMap) -> SceneResult<()> {
        if self.nodes.contains_key(id) {
            return Err(SceneError::DuplicateNode(id.to_string()));
        }
        self.nodes
            .insert(id.to_string(), Node::new(id, node_type, props));
        Ok(())
    }

    /// 合并属性，`null` 值删除对应键
    pub fn update(&mut self, id: &str, patch: PropertyMap) -> SceneResult<()> {
        merge_props(&mut self.get_mut(id)?.props, patch);
        Ok(())
    }

    /// `id` 及其所有后代（前序）
    pub fn subtree(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
                out.push(current);
            }
        }
        out
    }

    fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        let mut cursor = self.nodes.get(node).and_then(|n| n.parent.clone());
        while let Some(Parent::Node(parent_id)) = cursor {
            if parent_id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&parent_id).and_then(|n| n.parent.clone());
        }
        false
    }

    /// 为子节点设置父级
    ///
    /// 返回 false 表示已经挂在同一父级下（幂等）。挂到第二个父级会被拒绝。
    pub fn set_parent(&mut self, child_id: &str, parent: Parent) -> SceneResult<bool> {
        let child = self
            .nodes
            .get(child_id)
            .ok_or_else(|| SceneError::NodeNotFound(child_id.to_string()))?;

        match &child.parent {
            Some(existing) if *existing == parent => return Ok(false),
            Some(existing) => {
                return Err(SceneError::AlreadyParented {
                    child: child_id.to_string(),
                    parent: existing.id().to_string(),
                })
            }
            None => {}
        }

        if let Parent::Node(parent_id) = &parent {
            if parent_id == child_id {
                return Err(SceneError::SelfParent(child_id.to_string()));
            }
            if !self.nodes.contains_key(parent_id) {
                return Err(SceneError::NodeNotFound(parent_id.clone()));
            }
            if self.is_ancestor(child_id, parent_id) {
                return Err(SceneError::CycleDetected {
                    parent: parent_id.clone(),
                    child: child_id.to_string(),
                });
            }
            self.get_mut(parent_id)?.children.push(child_id.to_string());
        }

        self.get_mut(child_id)?.parent = Some(parent);
        Ok(true)
    }

    /// 解除父子关系；`child_id` 不在 `parent` 下时什么都不做
    pub fn clear_parent(&mut self, child_id: &str, parent: &Parent) -> SceneResult<bool> {
        let child = self.get_mut(child_id)?;
        if child.parent.as_ref() != Some(parent) {
            return Ok(false);
        }
        child.parent = None;

        if let Parent::Node(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                parent_node.children.retain(|c| c != child_id);
            }
        }
        Ok(true)
    }

    /// 删除单个节点
    ///
    /// 节点从原父级的 children 中移除；它的直接子节点保留在图中但失去父级。
    pub fn remove(&mut self, id: &str) -> SceneResult<DetachedNode> {
        let subtree = self.subtree(id);
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| SceneError::NodeNotFound(id.to_string()))?;

        if let Some(Parent::Node(parent_id)) = &node.parent {
            if let Some(parent_node) = self.nodes.get_mut(parent_id) {
                parent_node.children.retain(|c| c != id);
            }
        }
        for child in &node.children {
            if let Some(child_node) = self.nodes.get_mut(child) {
                child_node.parent = None;
            }
        }

        Ok(DetachedNode {
            former_parent: node.parent,
            subtree,
            orphaned_children: node.children,
        })
    }

    /// 删除整棵子树，返回被删除的节点 ID
    pub fn remove_subtree(&mut self, id: &str) -> Vec<String> {
        let subtree = self.subtree(id);
        if let Some(Parent::Node(parent_id)) = self.nodes.get(id).and_then(|n| n.parent.clone()) {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.retain(|c| c != id);
            }
        }
        for node_id in &subtree {
            self.nodes.remove(node_id);
        }
        subtree
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.nodes.keys()
    }
}

/// 事件注册：(节点, 事件名, 回调 ID) 三元组
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistration {
    pub node_id: String,
    pub event_name: String,
    pub callback_id: String,
}

impl EventRegistration {
    pub fn new(
        node_id: impl Into<String>,
        event_name: impl Into<String>,
        callback_id: impl Into<String>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            event_name: event_name.into(),
            callback_id: callback_id.into(),
        }
    }
}

/// 事件注册表，插入与删除都是幂等的
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: BTreeSet<EventRegistration>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, registration: EventRegistration) -> bool {
        self.entries.insert(registration)
    }

    pub fn remove(&mut self, registration: &EventRegistration) -> bool {
        self.entries.remove(registration)
    }

    pub fn contains(&self, registration: &EventRegistration) -> bool {
        self.entries.contains(registration)
    }

    /// 某节点某事件的全部回调 ID
    pub fn callbacks_for(&self, node_id: &str, event_name: &str) -> Vec<String> {
        let start = EventRegistration::new(node_id, event_name, "");
        self.entries
            .range(start..)
            .take_while(|r| r.node_id == node_id && r.event_name == event_name)
            .map(|r| r.callback_id.clone())
            .collect()
    }

    /// 删除某节点的全部注册，返回删除数量
    pub fn remove_node(&mut self, node_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| r.node_id != node_id);
        before - self.entries.len()
    }

    /// 只保留 `keep` 返回 true 的目标上的注册
    pub fn retain_targets(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| keep(&r.node_id));
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventRegistration> {
        self.entries.iter()
    }
}
