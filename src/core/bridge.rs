//! 桥接入口
//!
//! [`Bridge`] 通过构造注入把各组件连起来：运行时任务队列、待决操作注册表、
//! 事件通道、生命周期管理器、原生处理器和命令分发器。注册表和回调表随桥接
//! 实例创建，随 [`Bridge::teardown`] 清理，不存在全局状态。
//!
//! ```text
//!  脚本运行时 ──命令──▶ Dispatcher ──▶ LifecycleManager
//!      ▲                    │
//!      │                    └────▶ NativeHandler ──(工作线程)──┐
//!      │                                                      ▼
//!  RuntimeQueue ◀── PendingRegistry / EventChannel ◀── 结算 / 节点事件
//! ```

use crate::bindings::dispatcher::{CommandOutcome, Dispatcher};
use crate::bindings::marshal::PropValue;
use crate::config::{BridgeConfig, LoggingConfig};
use crate::core::error::{BridgeResult, CommandResult};
use crate::core::utils::lock_or_recover;
use crate::domain::lifecycle::LifecycleManager;
use crate::scripting::events::EventChannel;
use crate::scripting::invoker::{CallInvoker, RuntimeQueue};
use crate::scripting::pending::PendingRegistry;
use crate::services::native::{EventRouter, NativeHandler, NodeEventSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 初始化日志：`RUST_LOG` 优先，否则使用配置的级别
pub fn init_logging(config: &LoggingConfig) {
    if !config.log_to_console {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.as_filter()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 命令/事件桥接
///
/// `S` 是脚本运行时自己的状态，只在运行时线程上通过 [`Bridge::pump`] 访问。
pub struct Bridge<S: 'static> {
    config: BridgeConfig,
    queue: Arc<RuntimeQueue<S>>,
    pending: Arc<PendingRegistry<S>>,
    events: Arc<EventChannel<S>>,
    lifecycle: Arc<Mutex<LifecycleManager>>,
    router: Arc<EventRouter<S>>,
    native: Arc<dyn NativeHandler>,
    dispatcher: Arc<Dispatcher<S>>,
    torn_down: AtomicBool,
}

impl<S: 'static> Bridge<S> {
    pub fn new(config: BridgeConfig, native: Arc<dyn NativeHandler>) -> BridgeResult<Self> {
        config.validate()?;

        let queue = Arc::new(RuntimeQueue::with_batch_limit(
            config.runtime.max_jobs_per_pump,
        ));
        let invoker: Arc<dyn CallInvoker<S>> = queue.clone();

        let pending = Arc::new(
            PendingRegistry::new(Arc::clone(&invoker)).with_default_timeout(
                config.pending.default_timeout_ms.map(Duration::from_millis),
            ),
        );
        let events = Arc::new(EventChannel::new(invoker));
        let lifecycle = Arc::new(Mutex::new(
            LifecycleManager::new(Duration::from_secs(config.memory.stale_scene_age_secs))
                .with_pressure_limits(config.memory.limits()),
        ));
        let router = Arc::new(EventRouter::new(
            Arc::clone(&lifecycle),
            Arc::clone(&events),
        ));
        let sink: Arc<dyn NodeEventSink> = router.clone();
        native.attach(sink);

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&lifecycle),
            Arc::clone(&native),
            Arc::clone(&pending),
            Arc::clone(&router),
            config.init.clone(),
        ));

        tracing::info!(target: "bridge", "Bridge created");
        Ok(Self {
            config,
            queue,
            pending,
            events,
            lifecycle,
            router,
            native,
            dispatcher,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<RuntimeQueue<S>> {
        &self.queue
    }

    pub fn pending(&self) -> &Arc<PendingRegistry<S>> {
        &self.pending
    }

    pub fn events(&self) -> &Arc<EventChannel<S>> {
        &self.events
    }

    pub fn lifecycle(&self) -> &Arc<Mutex<LifecycleManager>> {
        &self.lifecycle
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher<S>> {
        &self.dispatcher
    }

    pub fn native(&self) -> &Arc<dyn NativeHandler> {
        &self.native
    }

    /// 原生代码发出节点事件的入口
    pub fn node_events(&self) -> Arc<dyn NodeEventSink> {
        self.router.clone()
    }

    pub fn dispatch(&self, name: &str, args: &[PropValue]) -> CommandResult<CommandOutcome<S>> {
        self.dispatcher.dispatch(name, args)
    }

    /// 在运行时线程上执行排队的结算和事件投递
    pub fn pump(&self, state: &mut S) -> usize {
        self.pending.expire_overdue();
        self.queue.pump(state)
    }

    /// 等待至多 `timeout`，再执行排队任务
    pub fn pump_timeout(&self, state: &mut S, timeout: Duration) -> usize {
        self.pending.expire_overdue();
        self.queue.pump_timeout(state, timeout)
    }

    /// 没有待决操作也没有排队任务
    pub fn is_idle(&self) -> bool {
        self.pending.pending_count() == 0 && self.queue.pending_jobs() == 0
    }

    /// 销毁桥接：丢弃待决操作和回调，销毁所有场景，关闭运行时队列。可重复调用。
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let orphaned = self.pending.clear();
        self.events.cleanup();
        {
            let mut lifecycle = lock_or_recover(&self.lifecycle);
            lifecycle.destroy_all();
            lifecycle.take_transitions();
        }
        self.queue.close();
        tracing::info!(
            target: "bridge",
            "Bridge torn down ({} pending operations discarded)",
            orphaned
        );
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl<S: 'static> Drop for Bridge<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
