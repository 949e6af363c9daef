/// 桥接层性能基准测试
///
/// 覆盖命令分发、值转换、待决操作结算和生命周期操作

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use scene_bridge::bindings::{ErrorPayload, PropValue, ResultPayload};
use scene_bridge::config::BridgeConfig;
use scene_bridge::core::Bridge;
use scene_bridge::domain::LifecycleManager;
use scene_bridge::services::NativeHandler;
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

struct NullNative;
impl NativeHandler for NullNative {}

type Settled = Vec<Result<ResultPayload, ErrorPayload>>;

// ============================================================================
// 值转换
// ============================================================================

fn bench_marshal(c: &mut Criterion) {
    let mut group = c.benchmark_group("marshal");

    let props = json!({
        "name": "box",
        "position": [1.0, 2.0, 3.0],
        "material": { "diffuse": "#ff0000", "metalness": 0.5 },
        "visible": true,
    });

    group.bench_function("from_json", |b| {
        b.iter(|| black_box(PropValue::from(props.clone())))
    });

    let value = PropValue::from(props.clone());
    group.bench_function("to_json", |b| {
        b.iter(|| black_box(serde_json::Value::from(value.clone())))
    });

    group.bench_function("result_from_wire", |b| {
        b.iter(|| black_box(ResultPayload::from_wire("[1.5,2.5,3.5]")))
    });

    group.finish();
}

// ============================================================================
// 命令分发
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let bridge: Bridge<Settled> = match Bridge::new(BridgeConfig::default(), Arc::new(NullNative)) {
        Ok(bridge) => bridge,
        Err(e) => panic!("bridge: {}", e),
    };

    let update = match PropValue::from(json!(["n", { "x": 1.0 }])) {
        PropValue::Array(items) => items,
        _ => unreachable!(),
    };
    let create = match PropValue::from(json!(["n", "node", {}])) {
        PropValue::Array(items) => items,
        _ => unreachable!(),
    };
    let _ = bridge.dispatch("createNode", &create);

    group.bench_function("update_node", |b| {
        b.iter(|| black_box(bridge.dispatch("updateNode", &update).is_ok()))
    });

    group.bench_function("memory_stats", |b| {
        b.iter(|| black_box(bridge.dispatch("getMemoryStats", &[]).is_ok()))
    });

    group.bench_function("unknown_command", |b| {
        b.iter(|| black_box(bridge.dispatch("noSuchCommand", &[]).is_err()))
    });

    group.finish();
}

// ============================================================================
// 待决操作
// ============================================================================

fn bench_pending(c: &mut Criterion) {
    let mut group = c.benchmark_group("pending");
    let bridge: Bridge<Settled> = match Bridge::new(BridgeConfig::default(), Arc::new(NullNative)) {
        Ok(bridge) => bridge,
        Err(e) => panic!("bridge: {}", e),
    };
    let mut settled = Settled::new();

    for batch in [1usize, 64, 1024] {
        group.bench_with_input(BenchmarkId::new("create_complete_pump", batch), &batch, |b, &n| {
            b.iter(|| {
                for _ in 0..n {
                    let id = bridge.pending().create(
                        Box::new(|s: &mut Settled, p: ResultPayload| s.push(Ok(p))),
                        Box::new(|s: &mut Settled, e: ErrorPayload| s.push(Err(e))),
                    );
                    bridge.pending().complete(&id, ResultPayload::Boolean(true));
                }
                let ran = bridge.pump(&mut settled);
                settled.clear();
                black_box(ran)
            })
        });
    }

    group.finish();
}

// ============================================================================
// 生命周期
// ============================================================================

fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lifecycle");

    for depth in [8usize, 128] {
        group.bench_with_input(BenchmarkId::new("build_and_destroy_scene", depth), &depth, |b, &n| {
            b.iter(|| {
                let mut lifecycle = LifecycleManager::new(Duration::from_secs(30));
                let _ = lifecycle.create_scene("s", "scene", Default::default());
                let mut parent = "s".to_string();
                for i in 0..n {
                    let id = format!("n{}", i);
                    let _ = lifecycle.create_node(&id, "node", Default::default());
                    let _ = lifecycle.add_child(&parent, &id);
                    parent = id;
                }
                let _ = lifecycle.activate_scene("s");
                let _ = lifecycle.destroy_scene("s");
                black_box(lifecycle.take_transitions().len())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_marshal,
    bench_dispatch,
    bench_pending,
    bench_lifecycle
);
criterion_main!(benches);
