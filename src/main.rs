use scene_bridge::bindings::JsBridge;
use scene_bridge::config::BridgeConfig;
use scene_bridge::core::{init_logging, BridgeError, BridgeResult};
use scene_bridge::services::HeadlessNative;
use std::sync::Arc;
use std::time::Duration;

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// 在运行时线程上执行脚本，直到没有待决操作
fn run(config: BridgeConfig, path: String) -> BridgeResult<()> {
    let source = std::fs::read_to_string(&path)?;
    let native = Arc::new(HeadlessNative::new(&config.native)?);
    let mut js = JsBridge::new(config, native)?;
    js.eval(&source)?;

    if !js.run_until_idle(IDLE_TIMEOUT) {
        tracing::warn!(target: "bridge", "{} still had pending work after {:?}", path, IDLE_TIMEOUT);
    }
    Ok(())
}

fn main() {
    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: scene_bridge <script.js>");
        std::process::exit(2);
    };

    let config = BridgeConfig::load_or_default();
    init_logging(&config.logging);

    // QuickJS 运行时不能跨线程移动，整个会话都在这条线程上
    let result = std::thread::Builder::new()
        .name(config.runtime.thread_name.clone())
        .spawn(move || run(config, path))
        .map_err(BridgeError::from)
        .and_then(|handle| match handle.join() {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::other("script runtime thread panicked").into()),
        });

    if let Err(e) = result {
        eprintln!("Bridge failed: {}", e);
        std::process::exit(1);
    }
}
