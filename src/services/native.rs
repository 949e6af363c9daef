//! 原生侧协作者
//!
//! 命令分发器把结构性命令的效果和需要往返的异步操作转发给 [`NativeHandler`]。
//! 异步操作拿到一个 [`Completer`]，可以在任意线程上结算；原生侧产生的节点事件
//! 通过 [`NodeEventSink`] 回到脚本运行时。

use super::projection::Viewport;
use crate::bindings::marshal::{PropValue, PropertyMap};
use crate::bindings::protocol::{InitOptions, ResultPayload};
use crate::config::native::NativeConfig;
use crate::core::utils::lock_or_recover;
use crate::impl_default_and_new;
use crate::domain::lifecycle::{LifecycleManager, MemoryPressure, MemoryWarning, SceneTransition};
use crate::scripting::events::{Delivery, EventChannel};
use crate::scripting::pending::{OperationId, OperationSink};
use glam::Vec3;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 一个待决操作的结算句柄
///
/// 按值消费，所以同一个句柄只能结算一次；注册表本身也会忽略重复结算。
pub struct Completer {
    id: OperationId,
    sink: Arc<dyn OperationSink>,
}

impl Completer {
    pub fn new(id: OperationId, sink: Arc<dyn OperationSink>) -> Self {
        Self { id, sink }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn complete(self, payload: ResultPayload) -> bool {
        self.sink.complete(&self.id, payload)
    }

    pub fn fail(self, message: impl Into<String>) -> bool {
        self.sink.fail(&self.id, message.into())
    }
}

impl std::fmt::Debug for Completer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer").field("id", &self.id).finish()
    }
}

/// 原生侧发出节点事件的入口
pub trait NodeEventSink: Send + Sync {
    /// 返回成功排入运行时的回调数
    fn emit_node_event(&self, node_id: &str, event_name: &str, data: PropertyMap) -> usize;
}

/// 原生处理器
///
/// 所有方法都有默认实现，具体平台只覆盖自己支持的部分。
#[allow(unused_variables)]
pub trait NativeHandler: Send + Sync {
    /// 绑定事件出口，桥接创建时调用一次
    fn attach(&self, events: Arc<dyn NodeEventSink>) {}

    fn initialize(&self, options: &InitOptions) {}

    fn node_created(&self, id: &str, node_type: &str, props: &PropertyMap) {}
    fn node_updated(&self, id: &str, props: &PropertyMap) {}
    fn node_deleted(&self, id: &str) {}
    fn scene_changed(&self, transition: &SceneTransition) {}

    fn create_material(&self, name: &str, props: &PropertyMap) {}
    fn update_material(&self, name: &str, props: &PropertyMap) {}
    fn create_animation(&self, name: &str, props: &PropertyMap) {}
    fn execute_animation(&self, node_id: &str, name: &str, options: &PropertyMap) {}

    fn set_ar_plane_detection(&self, config: &PropertyMap) {}
    fn set_ar_image_targets(&self, config: &PropertyMap) {}
    fn recenter_tracking(&self, node_id: &str) {}

    fn project(&self, node_id: &str, point: Vec3, done: Completer) {
        done.fail("project is not supported by this platform");
    }

    fn unproject(&self, node_id: &str, point: Vec3, done: Completer) {
        done.fail("unproject is not supported by this platform");
    }

    fn self_test(&self, done: Completer) {
        done.complete(ResultPayload::NumericArray(vec![1.0, 2.0, 3.0]));
    }

    /// 附加到 getMemoryStats 结果里的原生统计
    fn stats(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn cleanup(&self, aggressive: bool) {}

    /// 生命周期管理器越过内存阈值时调用，此时场景清理已经完成
    fn memory_warning(&self, warning: &MemoryWarning) {}
}

/// 把原生事件按注册表路由到事件通道
pub struct EventRouter<S> {
    lifecycle: Arc<Mutex<LifecycleManager>>,
    channel: Arc<EventChannel<S>>,
}

impl<S: 'static> EventRouter<S> {
    pub fn new(lifecycle: Arc<Mutex<LifecycleManager>>, channel: Arc<EventChannel<S>>) -> Self {
        Self { lifecycle, channel }
    }

    /// 投递场景状态变化；调用时不能持有生命周期管理器的锁
    pub fn emit_transitions(&self, transitions: Vec<SceneTransition>) -> usize {
        let mut scheduled = 0;
        for transition in transitions {
            let data = transition.to_props();
            for callback_id in &transition.callback_ids {
                if self.channel.dispatch(callback_id, data.clone()) == Delivery::Scheduled {
                    scheduled += 1;
                }
            }
        }
        scheduled
    }

    /// 把内存警告投递给所有注册了 `onMemoryWarning` 的回调
    pub fn emit_memory_warning(&self, warning: &MemoryWarning) -> usize {
        let data = warning.to_props();
        warning
            .callback_ids
            .iter()
            .filter(|id| self.channel.dispatch(id, data.clone()) == Delivery::Scheduled)
            .count()
    }
}

impl<S: 'static> NodeEventSink for EventRouter<S> {
    fn emit_node_event(&self, node_id: &str, event_name: &str, data: PropertyMap) -> usize {
        let callbacks = lock_or_recover(&self.lifecycle).registrations_for(node_id, event_name);
        if callbacks.is_empty() {
            tracing::trace!(
                target: "events",
                "No registrations for {} on {}",
                event_name,
                node_id
            );
            return 0;
        }

        let mut envelope = PropertyMap::new();
        envelope.insert("nodeId".into(), node_id.into());
        envelope.insert("eventName".into(), event_name.into());
        envelope.insert("eventData".into(), PropValue::Object(data));

        callbacks
            .iter()
            .filter(|cb| self.channel.dispatch(cb, envelope.clone()) == Delivery::Scheduled)
            .count()
    }
}

struct HeadlessState {
    options: Option<InitOptions>,
    nodes: usize,
    materials: HashMap<String, PropertyMap>,
    animations: HashMap<String, PropertyMap>,
    plane_detection: PropertyMap,
    image_targets: PropertyMap,
    recenter_count: u64,
}

impl_default_and_new!(HeadlessState {
    options: None,
    nodes: 0,
    materials: HashMap::new(),
    animations: HashMap::new(),
    plane_detection: PropertyMap::new(),
    image_targets: PropertyMap::new(),
    recenter_count: 0,
});

/// 无渲染的原生实现
///
/// 材质、动画和 AR 配置只保存在内存里；异步工作运行在自带的 tokio 运行时上，
/// 从工作线程结算，和真实平台上的线程模型一致。
pub struct HeadlessNative {
    runtime: tokio::runtime::Runtime,
    viewport: Viewport,
    self_test_delay: Duration,
    state: Mutex<HeadlessState>,
    events: Mutex<Option<Arc<dyn NodeEventSink>>>,
}

impl HeadlessNative {
    pub fn new(config: &NativeConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("native-worker")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime,
            viewport: Viewport::from_config(config),
            self_test_delay: Duration::from_millis(config.self_test_delay_ms),
            state: Mutex::new(HeadlessState::new()),
            events: Mutex::new(None),
        })
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn init_options(&self) -> Option<InitOptions> {
        lock_or_recover(&self.state).options.clone()
    }

    pub fn material(&self, name: &str) -> Option<PropertyMap> {
        lock_or_recover(&self.state).materials.get(name).cloned()
    }

    pub fn animation(&self, name: &str) -> Option<PropertyMap> {
        lock_or_recover(&self.state).animations.get(name).cloned()
    }

    pub fn plane_detection(&self) -> PropertyMap {
        lock_or_recover(&self.state).plane_detection.clone()
    }

    pub fn image_targets(&self) -> PropertyMap {
        lock_or_recover(&self.state).image_targets.clone()
    }

    pub fn recenter_count(&self) -> u64 {
        lock_or_recover(&self.state).recenter_count
    }

    fn event_sink(&self) -> Option<Arc<dyn NodeEventSink>> {
        lock_or_recover(&self.events).clone()
    }

    fn emit(&self, node_id: &str, event_name: &str, data: PropertyMap) {
        match self.event_sink() {
            Some(sink) => {
                sink.emit_node_event(node_id, event_name, data);
            }
            None => tracing::debug!(
                target: "native",
                "No event sink attached, {} on {} not emitted",
                event_name,
                node_id
            ),
        }
    }
}

fn animation_event(name: &str) -> PropertyMap {
    let mut data = PropertyMap::new();
    data.insert("animation".into(), name.into());
    data
}

fn vec3_payload(v: Vec3) -> ResultPayload {
    ResultPayload::NumericArray(vec![v.x as f64, v.y as f64, v.z as f64])
}

impl NativeHandler for HeadlessNative {
    fn attach(&self, events: Arc<dyn NodeEventSink>) {
        *lock_or_recover(&self.events) = Some(events);
    }

    fn initialize(&self, options: &InitOptions) {
        tracing::info!(
            target: "native",
            "Native initialised (debug={}, arEnabled={}, worldAlignment={})",
            options.debug,
            options.ar_enabled,
            options.world_alignment.as_str()
        );
        lock_or_recover(&self.state).options = Some(options.clone());
    }

    fn node_created(&self, _id: &str, _node_type: &str, _props: &PropertyMap) {
        lock_or_recover(&self.state).nodes += 1;
    }

    fn node_deleted(&self, _id: &str) {
        let mut state = lock_or_recover(&self.state);
        state.nodes = state.nodes.saturating_sub(1);
    }

    fn create_material(&self, name: &str, props: &PropertyMap) {
        lock_or_recover(&self.state)
            .materials
            .insert(name.to_string(), props.clone());
    }

    fn update_material(&self, name: &str, props: &PropertyMap) {
        let mut state = lock_or_recover(&self.state);
        match state.materials.get_mut(name) {
            Some(existing) => crate::bindings::marshal::merge_props(existing, props.clone()),
            None => tracing::warn!(target: "native", "Unknown material {}", name),
        }
    }

    fn create_animation(&self, name: &str, props: &PropertyMap) {
        lock_or_recover(&self.state)
            .animations
            .insert(name.to_string(), props.clone());
    }

    fn execute_animation(&self, node_id: &str, name: &str, options: &PropertyMap) {
        let Some(animation) = self.animation(name) else {
            tracing::warn!(target: "native", "Unknown animation {} for {}", name, node_id);
            return;
        };
        let duration_ms = options
            .get("duration")
            .or_else(|| animation.get("duration"))
            .and_then(PropValue::as_f64)
            .unwrap_or(0.0)
            .max(0.0);
        let delay = Duration::try_from_secs_f64(duration_ms / 1000.0).unwrap_or_else(|_| {
            tracing::warn!(
                target: "native",
                "Animation {} duration {}ms out of range, finishing immediately",
                name,
                duration_ms
            );
            Duration::ZERO
        });

        self.emit(node_id, "onAnimationStart", animation_event(name));

        let sink = self.event_sink();
        let node_id = node_id.to_string();
        let name = name.to_string();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(sink) = sink {
                sink.emit_node_event(&node_id, "onAnimationFinish", animation_event(&name));
            }
        });
    }

    fn set_ar_plane_detection(&self, config: &PropertyMap) {
        lock_or_recover(&self.state).plane_detection = config.clone();
    }

    fn set_ar_image_targets(&self, config: &PropertyMap) {
        lock_or_recover(&self.state).image_targets = config.clone();
    }

    fn recenter_tracking(&self, node_id: &str) {
        let count = {
            let mut state = lock_or_recover(&self.state);
            state.recenter_count += 1;
            state.recenter_count
        };
        let mut data = PropertyMap::new();
        data.insert("recentered".into(), true.into());
        data.insert("count".into(), count.into());
        self.emit(node_id, "onTrackingUpdated", data);
    }

    fn project(&self, node_id: &str, point: Vec3, done: Completer) {
        let viewport = self.viewport;
        tracing::trace!(target: "native", "project {} for {}", point, node_id);
        self.runtime.spawn(async move {
            match viewport.project(point) {
                Ok(screen) => done.complete(vec3_payload(screen)),
                Err(e) => done.fail(e.to_string()),
            }
        });
    }

    fn unproject(&self, node_id: &str, point: Vec3, done: Completer) {
        let viewport = self.viewport;
        tracing::trace!(target: "native", "unproject {} for {}", point, node_id);
        self.runtime.spawn(async move {
            match viewport.unproject(point) {
                Ok(world) => done.complete(vec3_payload(world)),
                Err(e) => done.fail(e.to_string()),
            }
        });
    }

    fn self_test(&self, done: Completer) {
        let delay = self.self_test_delay;
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            done.complete(ResultPayload::NumericArray(vec![1.0, 2.0, 3.0]));
        });
    }

    fn stats(&self) -> PropertyMap {
        let state = lock_or_recover(&self.state);
        let mut map = PropertyMap::new();
        map.insert("nativeNodes".into(), state.nodes.into());
        map.insert("materials".into(), state.materials.len().into());
        map.insert("animations".into(), state.animations.len().into());
        map.insert("recenterCount".into(), state.recenter_count.into());
        map
    }

    fn cleanup(&self, aggressive: bool) {
        if aggressive {
            let mut state = lock_or_recover(&self.state);
            let dropped = state.animations.len();
            state.animations.clear();
            tracing::debug!(target: "native", "Dropped {} animation definitions", dropped);
        }
    }

    fn memory_warning(&self, warning: &MemoryWarning) {
        tracing::warn!(
            target: "native",
            "Memory pressure {}: {} scenes destroyed",
            warning.level.label(),
            warning.report.scenes_destroyed.len()
        );
        self.cleanup(warning.level == MemoryPressure::Critical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    /// 记录结算结果的 sink
    struct ChannelSink(Mutex<mpsc::Sender<(String, Result<ResultPayload, String>)>>);

    impl OperationSink for ChannelSink {
        fn complete(&self, id: &str, payload: ResultPayload) -> bool {
            lock_or_recover(&self.0).send((id.to_string(), Ok(payload))).is_ok()
        }

        fn fail(&self, id: &str, message: String) -> bool {
            lock_or_recover(&self.0).send((id.to_string(), Err(message))).is_ok()
        }
    }

    #[derive(Default)]
    struct RecordingEvents(Mutex<Vec<(String, String)>>);

    impl NodeEventSink for RecordingEvents {
        fn emit_node_event(&self, node_id: &str, event_name: &str, _data: PropertyMap) -> usize {
            lock_or_recover(&self.0).push((node_id.to_string(), event_name.to_string()));
            1
        }
    }

    fn native() -> HeadlessNative {
        let config = NativeConfig {
            self_test_delay_ms: 5,
            ..NativeConfig::default()
        };
        HeadlessNative::new(&config).unwrap()
    }

    fn completer(id: &str) -> (Completer, mpsc::Receiver<(String, Result<ResultPayload, String>)>) {
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn OperationSink> = Arc::new(ChannelSink(Mutex::new(tx)));
        (Completer::new(id.to_string(), sink), rx)
    }

    #[test]
    fn test_project_completes_from_worker() {
        let native = native();
        let (done, rx) = completer("op1");
        native.project("n", Vec3::new(0.0, 0.0, -2.0), done);
        let (id, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(id, "op1");
        match result.unwrap() {
            ResultPayload::NumericArray(values) => {
                assert_eq!(values.len(), 3);
                assert!((values[0] - 540.0).abs() < 1e-2);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_project_behind_camera_fails() {
        let native = native();
        let (done, rx) = completer("op2");
        native.project("n", Vec3::new(0.0, 0.0, 3.0), done);
        let (_, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.unwrap_err(), "point is behind the camera");
    }

    #[test]
    fn test_self_test_resolves_numeric_array() {
        let native = native();
        let (done, rx) = completer("op3");
        native.self_test(done);
        let (_, result) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            result.unwrap(),
            ResultPayload::NumericArray(vec![1.0, 2.0, 3.0])
        );
    }

    #[test]
    fn test_materials_and_stats() {
        let native = native();
        let mut props = PropertyMap::new();
        props.insert("diffuseColor".into(), "#ff0000".into());
        native.create_material("red", &props);

        let mut patch = PropertyMap::new();
        patch.insert("shininess".into(), PropValue::Number(2.0));
        native.update_material("red", &patch);
        native.update_material("missing", &patch);

        let material = native.material("red").unwrap();
        assert_eq!(material.len(), 2);
        assert_eq!(native.stats()["materials"].as_f64(), Some(1.0));
    }

    #[test]
    fn test_recenter_emits_tracking_event() {
        let native = native();
        let events = Arc::new(RecordingEvents::default());
        native.attach(events.clone());
        native.recenter_tracking("camera");
        assert_eq!(native.recenter_count(), 1);
        assert_eq!(
            *lock_or_recover(&events.0),
            vec![("camera".to_string(), "onTrackingUpdated".to_string())]
        );
    }

    #[test]
    fn test_animation_emits_start_and_finish() {
        let native = native();
        let events = Arc::new(RecordingEvents::default());
        native.attach(events.clone());
        native.create_animation("spin", &PropertyMap::new());
        native.execute_animation("box", "spin", &PropertyMap::new());
        native.execute_animation("box", "unknown", &PropertyMap::new());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while lock_or_recover(&events.0).len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let names: Vec<String> = lock_or_recover(&events.0)
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        assert_eq!(names, vec!["onAnimationStart", "onAnimationFinish"]);
    }

    #[test]
    fn test_huge_animation_duration_finishes_immediately() {
        let native = native();
        let events = Arc::new(RecordingEvents::default());
        native.attach(events.clone());
        let mut props = PropertyMap::new();
        props.insert("duration".into(), PropValue::Number(1e300));
        native.create_animation("spin", &props);
        native.execute_animation("box", "spin", &PropertyMap::new());

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while lock_or_recover(&events.0).len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let names: Vec<String> = lock_or_recover(&events.0)
            .iter()
            .map(|(_, name)| name.clone())
            .collect();
        assert_eq!(names, vec!["onAnimationStart", "onAnimationFinish"]);
    }

    #[test]
    fn test_critical_memory_warning_drops_animations() {
        use crate::domain::lifecycle::{CleanupReport, LifecycleStats};

        let native = native();
        native.create_animation("spin", &PropertyMap::new());
        let mut warning = MemoryWarning {
            level: MemoryPressure::Warning,
            report: CleanupReport::default(),
            stats: LifecycleStats::default(),
            callback_ids: Vec::new(),
        };
        native.memory_warning(&warning);
        assert!(native.animation("spin").is_some());

        warning.level = MemoryPressure::Critical;
        native.memory_warning(&warning);
        assert!(native.animation("spin").is_none());
    }

    #[test]
    fn test_default_handler_rejects_projection() {
        struct Bare;
        impl NativeHandler for Bare {}

        let (done, rx) = completer("op4");
        Bare.unproject("n", Vec3::ZERO, done);
        let (_, result) = rx.recv().unwrap();
        assert!(result.unwrap_err().contains("not supported"));
    }
}
