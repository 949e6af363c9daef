use scene_bridge::bindings::{
    CommandOutcome, ErrorPayload, EventEnvelope, JsBridge, PropValue, ResultPayload,
};
use scene_bridge::config::BridgeConfig;
use scene_bridge::core::Bridge;
use scene_bridge::domain::SceneState;
use scene_bridge::scripting::{EventCallback, RuntimeQueue, RuntimeThread};
use scene_bridge::services::{Completer, HeadlessNative, NativeHandler};
use serde_json::json;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

type Settled = Vec<Result<ResultPayload, ErrorPayload>>;

#[derive(Default)]
struct Recorder {
    settled: Settled,
    events: Vec<(String, String)>,
}

/// 在独立线程上完成 selfTest 的原生实现
struct ThreadedNative {
    completers: Mutex<Vec<Completer>>,
}

impl NativeHandler for ThreadedNative {
    fn self_test(&self, done: Completer) {
        scene_bridge::core::utils::lock_or_recover(&self.completers).push(done);
    }
}

fn args(value: serde_json::Value) -> Vec<PropValue> {
    match PropValue::from(value) {
        PropValue::Array(items) => items,
        other => vec![other],
    }
}

fn settle<S: 'static>(outcome: CommandOutcome<S>) -> Option<String>
where
    S: AsMut<Settled>,
{
    match outcome {
        CommandOutcome::Deferred(call) => Some(call.settle(
            Box::new(|s: &mut S, p: ResultPayload| s.as_mut().push(Ok(p))),
            Box::new(|s: &mut S, e: ErrorPayload| s.as_mut().push(Err(e))),
        )),
        _ => None,
    }
}

impl AsMut<Settled> for Recorder {
    fn as_mut(&mut self) -> &mut Settled {
        &mut self.settled
    }
}

fn threaded_bridge() -> (Bridge<Recorder>, Arc<ThreadedNative>) {
    let native = Arc::new(ThreadedNative {
        completers: Mutex::new(Vec::new()),
    });
    let bridge = Bridge::new(BridgeConfig::default(), native.clone()).unwrap();
    (bridge, native)
}

#[test]
fn test_scene_lifecycle_through_dispatcher() {
    let bridge = threaded_bridge().0;

    for (name, call) in [
        ("createScene", json!(["a", "scene", {}])),
        ("createScene", json!(["b", "scene", {}])),
        ("createNode", json!(["root", "node", {}])),
        ("addChild", json!(["a", "root"])),
        ("activateScene", json!(["a"])),
        ("activateScene", json!(["b"])),
    ] {
        bridge.dispatch(name, &args(call)).unwrap();
    }

    let lifecycle = bridge.lifecycle().lock().unwrap();
    assert_eq!(lifecycle.scene_state("a"), Some(SceneState::Paused));
    assert_eq!(lifecycle.scene_state("b"), Some(SceneState::Active));
    assert_eq!(lifecycle.active_scene_id(), Some("b"));
    assert!(lifecycle.node("root").is_some());
}

#[test]
fn test_unknown_command_is_synchronous_error() {
    let bridge = threaded_bridge().0;
    let err = bridge.dispatch("explode", &[]).unwrap_err();
    assert_eq!(err.message(), "unknown command 'explode'");
}

#[test]
fn test_completion_from_another_thread_runs_on_runtime_thread() {
    let (bridge, native) = threaded_bridge();

    let outcome = bridge.dispatch("selfTest", &[]).unwrap();
    let id = settle(outcome).unwrap();
    assert!(bridge.pending().is_pending(&id));

    let completer = native.completers.lock().unwrap().pop().unwrap();
    std::thread::spawn(move || {
        assert!(completer.complete(ResultPayload::Text("done".into())));
    })
    .join()
    .unwrap();

    // 结算只在 pump 时运行，且只运行一次
    assert!(!bridge.pending().complete(&id, ResultPayload::Boolean(true)));
    let mut recorder = Recorder::default();
    assert_eq!(bridge.pump(&mut recorder), 1);
    assert_eq!(recorder.settled, vec![Ok(ResultPayload::Text("done".into()))]);
    assert!(bridge.is_idle());
}

#[test]
fn test_events_on_dedicated_runtime_thread() {
    let queue: Arc<RuntimeQueue<Recorder>> = Arc::new(RuntimeQueue::new());
    let (tx, rx) = mpsc::channel::<Vec<(String, String)>>();
    let runtime =
        RuntimeThread::spawn(Arc::clone(&queue), "test-runtime", Recorder::default).unwrap();

    let invoker: Arc<dyn scene_bridge::scripting::CallInvoker<Recorder>> = queue.clone();
    let channel = scene_bridge::scripting::EventChannel::new(invoker);
    let callback: EventCallback<Recorder> =
        Arc::new(move |state: &mut Recorder, envelope: &EventEnvelope| {
            state
                .events
                .push((envelope.callback_id.clone(), envelope.data.len().to_string()));
            tx.send(state.events.clone()).ok();
            Ok(())
        });
    channel.register_callback("cb", callback);

    // 没有监听者时丢弃
    channel.dispatch("cb", Default::default());
    assert_eq!(channel.dropped_events(), 1);

    channel.add_listener("onTap");
    channel.dispatch("cb", Default::default());
    let seen = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(seen, vec![("cb".to_string(), "0".to_string())]);

    runtime.shutdown();
    assert!(queue.is_closed());
}

#[test]
fn test_config_file_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bridge.toml");

    let mut config = BridgeConfig::default();
    config.native.self_test_delay_ms = 7;
    config.pending.default_timeout_ms = Some(2500);
    config.save_toml(&path)?;

    let loaded = BridgeConfig::from_toml_file(&path)?;
    assert_eq!(loaded.native.self_test_delay_ms, 7);
    assert_eq!(loaded.pending.default_timeout_ms, Some(2500));
    loaded.validate()?;
    Ok(())
}

#[test]
fn test_script_drives_native_and_receives_events() -> anyhow::Result<()> {
    let mut config = BridgeConfig::default();
    config.native.self_test_delay_ms = 1;
    let native = Arc::new(HeadlessNative::new(&config.native)?);
    let mut js = JsBridge::new(config, native.clone())?;

    js.eval(
        r##"
        globalThis.log = [];
        BridgeEvents.addListener("onAnimationFinish");
        registerEventHandler("animDone", (data) => log.push(data.eventName));
        NativeScene.createScene("main", "arScene", {});
        NativeScene.createNode("box", "box", {});
        NativeScene.addChild("main", "box");
        NativeScene.createMaterial("red", { diffuse: "#ff0000" });
        NativeScene.createAnimation("spin", { duration: 10 });
        NativeScene.registerEventCallback("box", "onAnimationFinish", "animDone");
        NativeScene.executeAnimation("box", "spin", {});
        globalThis.pendingOps = NativeScene.getMemoryStats().pendingOperations;
        "##,
    )?;

    assert!(js.run_until_idle(Duration::from_secs(5)));
    std::thread::sleep(Duration::from_millis(50));
    js.pump();

    assert!(native.material("red").is_some());
    assert_eq!(js.eval_string("pendingOps")?, "0");
    assert_eq!(js.eval_string("log.join(',')")?, "onAnimationFinish");
    Ok(())
}
