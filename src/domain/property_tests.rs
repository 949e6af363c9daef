//! 生命周期管理器属性测试
//!
//! 随机生成一串结构性操作，检查每一步之后节点图和场景状态机的不变量

use crate::bindings::marshal::PropertyMap;
use crate::domain::lifecycle::LifecycleManager;
use crate::domain::node::Parent;
use crate::domain::scene::SceneState;
use proptest::prelude::*;
use std::time::Duration;

const NODE_IDS: &[&str] = &["n0", "n1", "n2", "n3", "n4", "n5"];
const SCENE_IDS: &[&str] = &["s0", "s1", "s2"];

#[derive(Debug, Clone)]
enum Op {
    CreateNode(usize),
    DeleteNode(usize),
    AddChild(usize, usize),
    AttachToScene(usize, usize),
    RemoveChild(usize, usize),
    Register(usize, u8),
    Unregister(usize, u8),
    CreateScene(usize),
    Activate(usize),
    Deactivate(usize),
    Destroy(usize),
    Cleanup(bool),
}

fn node() -> impl Strategy<Value = usize> {
    0..NODE_IDS.len()
}

fn scene() -> impl Strategy<Value = usize> {
    0..SCENE_IDS.len()
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        node().prop_map(Op::CreateNode),
        node().prop_map(Op::DeleteNode),
        (node(), node()).prop_map(|(p, c)| Op::AddChild(p, c)),
        (scene(), node()).prop_map(|(s, c)| Op::AttachToScene(s, c)),
        (node(), node()).prop_map(|(p, c)| Op::RemoveChild(p, c)),
        (node(), 0u8..3).prop_map(|(n, cb)| Op::Register(n, cb)),
        (node(), 0u8..3).prop_map(|(n, cb)| Op::Unregister(n, cb)),
        scene().prop_map(Op::CreateScene),
        scene().prop_map(Op::Activate),
        scene().prop_map(Op::Deactivate),
        scene().prop_map(Op::Destroy),
        any::<bool>().prop_map(Op::Cleanup),
    ]
}

fn apply(m: &mut LifecycleManager, op: &Op) {
    // 领域错误是允许的，只关心不变量
    let _ = match op {
        Op::CreateNode(n) => m.create_node(NODE_IDS[*n], "node", PropertyMap::new()),
        Op::DeleteNode(n) => m.delete_node(NODE_IDS[*n]),
        Op::AddChild(p, c) => m.add_child(NODE_IDS[*p], NODE_IDS[*c]).map(|_| ()),
        Op::AttachToScene(s, c) => m.add_child(SCENE_IDS[*s], NODE_IDS[*c]).map(|_| ()),
        Op::RemoveChild(p, c) => m.remove_child(NODE_IDS[*p], NODE_IDS[*c]).map(|_| ()),
        Op::Register(n, cb) => m
            .register_event(NODE_IDS[*n], "onClick", &format!("cb{}", cb))
            .map(|_| ()),
        Op::Unregister(n, cb) => {
            m.unregister_event(NODE_IDS[*n], "onClick", &format!("cb{}", cb));
            Ok(())
        }
        Op::CreateScene(s) => m
            .create_scene(SCENE_IDS[*s], "scene", PropertyMap::new())
            .map(|_| ()),
        Op::Activate(s) => m.activate_scene(SCENE_IDS[*s]),
        Op::Deactivate(s) => m.deactivate_scene(SCENE_IDS[*s]),
        Op::Destroy(s) => m.destroy_scene(SCENE_IDS[*s]),
        Op::Cleanup(aggressive) => {
            m.perform_cleanup(*aggressive);
            Ok(())
        }
    };
}

fn check_invariants(m: &LifecycleManager) -> Result<(), TestCaseError> {
    // 父子关系双向一致
    for id in m.node_ids() {
        let node = m.node(&id).unwrap();
        match node.parent() {
            Some(Parent::Node(parent_id)) => {
                let parent = m.node(parent_id);
                prop_assert!(parent.is_some(), "dangling parent {}", parent_id);
                let count = parent.unwrap().children().iter().filter(|c| **c == id).count();
                prop_assert_eq!(count, 1);
            }
            Some(Parent::Scene(scene_id)) => {
                let scene = m.scene(scene_id);
                prop_assert!(scene.is_some());
                let scene = scene.unwrap();
                prop_assert!(!scene.state().is_terminal());
                prop_assert!(scene.roots().contains(&id));
            }
            None => {}
        }
        for child in node.children() {
            let child_node = m.node(child);
            prop_assert!(child_node.is_some());
            prop_assert_eq!(
                child_node.unwrap().parent(),
                Some(&Parent::Node(id.clone()))
            );
        }
    }

    // 最多一个活动场景，且与活动指针一致
    let active: Vec<String> = m
        .scene_ids()
        .into_iter()
        .filter(|id| m.scene_state(id) == Some(SceneState::Active))
        .collect();
    prop_assert!(active.len() <= 1);
    prop_assert_eq!(active.first().map(String::as_str), m.active_scene_id());

    // 注册总是指向存在的目标
    for registration in m.registrations() {
        let id = registration.node_id.as_str();
        prop_assert!(m.node(id).is_some() || m.scene(id).is_some());
    }
    Ok(())
}

proptest! {
    #[test]
    fn lifecycle_invariants_hold(ops in prop::collection::vec(op(), 1..60)) {
        let mut m = LifecycleManager::new(Duration::ZERO);
        for op in &ops {
            apply(&mut m, op);
            check_invariants(&m)?;
        }
    }

    #[test]
    fn registration_is_idempotent(repeats in 1usize..5) {
        let mut m = LifecycleManager::new(Duration::ZERO);
        m.create_node("n", "node", PropertyMap::new()).unwrap();
        for _ in 0..repeats {
            m.register_event("n", "onClick", "cb").unwrap();
        }
        prop_assert_eq!(m.registrations_for("n", "onClick"), vec!["cb".to_string()]);
        for _ in 0..repeats {
            m.unregister_event("n", "onClick", "cb");
        }
        prop_assert_eq!(m.registration_count(), 0);
    }
}
