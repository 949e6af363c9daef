//! 事件投递通道
//!
//! 原生侧产生的通知（节点事件、场景状态变化、跟踪更新）通过这里回到
//! 脚本运行时。没有监听者时事件直接丢弃并记录日志，不缓存也不重试；
//! 有监听者时投递任务被排到运行时线程，按 callbackId 查找运行时侧回调。

use super::invoker::CallInvoker;
use crate::bindings::marshal::PropertyMap;
use crate::bindings::protocol::EventEnvelope;
use crate::core::error::ScriptError;
use crate::core::utils::{current_timestamp_f64, lock_or_recover};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 运行时侧事件回调
pub type EventCallback<S> =
    Arc<dyn Fn(&mut S, &EventEnvelope) -> Result<(), ScriptError> + Send + Sync + 'static>;

type CallbackTable<S> = Arc<Mutex<HashMap<String, EventCallback<S>>>>;

/// 单次投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 已排入运行时线程
    Scheduled,
    /// 没有监听者，事件被丢弃
    NoListener,
    /// 运行时已关闭，事件被丢弃
    ChannelClosed,
}

/// 事件投递通道
pub struct EventChannel<S> {
    listeners: AtomicUsize,
    callbacks: CallbackTable<S>,
    invoker: Arc<dyn CallInvoker<S>>,
    dropped: AtomicU64,
}

impl<S: 'static> EventChannel<S> {
    pub fn new(invoker: Arc<dyn CallInvoker<S>>) -> Self {
        Self {
            listeners: AtomicUsize::new(0),
            callbacks: Arc::new(Mutex::new(HashMap::new())),
            invoker,
            dropped: AtomicU64::new(0),
        }
    }

    /// 运行时侧开始监听
    pub fn add_listener(&self, event_name: &str) {
        let count = self.listeners.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(target: "events", "Listener added for {} (total {})", event_name, count);
    }

    /// 移除 `count` 个监听者，计数不会低于零
    pub fn remove_listeners(&self, count: usize) {
        let mut current = self.listeners.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(count);
            match self.listeners.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    tracing::debug!(target: "events", "Listeners removed, {} remaining", next);
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Acquire)
    }

    /// 至少有一个监听者时才投递
    pub fn is_ready(&self) -> bool {
        self.listener_count() > 0
    }

    /// 注册运行时侧回调，同一 callbackId 会被覆盖
    pub fn register_callback(&self, callback_id: impl Into<String>, callback: EventCallback<S>) {
        let callback_id = callback_id.into();
        let replaced = lock_or_recover(&self.callbacks)
            .insert(callback_id.clone(), callback)
            .is_some();
        if replaced {
            tracing::debug!(target: "events", "Callback {} replaced", callback_id);
        }
    }

    pub fn unregister_callback(&self, callback_id: &str) -> bool {
        lock_or_recover(&self.callbacks).remove(callback_id).is_some()
    }

    pub fn has_callback(&self, callback_id: &str) -> bool {
        lock_or_recover(&self.callbacks).contains_key(callback_id)
    }

    /// 因无监听者或运行时关闭而丢弃的事件数
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 把事件投递给 `callback_id` 对应的运行时回调
    ///
    /// 可以从任意线程调用；回调总是在运行时线程上执行。
    pub fn dispatch(&self, callback_id: &str, data: PropertyMap) -> Delivery {
        if !self.is_ready() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "events",
                "No listener attached, dropping event for callback {}",
                callback_id
            );
            return Delivery::NoListener;
        }

        let envelope = EventEnvelope {
            callback_id: callback_id.to_string(),
            data,
            timestamp: current_timestamp_f64(),
        };
        let callbacks = Arc::clone(&self.callbacks);
        let scheduled = self
            .invoker
            .invoke_async(Box::new(move |state: &mut S| deliver(&callbacks, state, &envelope)));

        if scheduled {
            Delivery::Scheduled
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            Delivery::ChannelClosed
        }
    }

    /// 桥接销毁时清空回调表
    pub fn cleanup(&self) {
        lock_or_recover(&self.callbacks).clear();
        self.listeners.store(0, Ordering::Release);
        tracing::debug!(target: "events", "Event channel cleaned up");
    }
}

/// 在运行时线程上执行：回调的错误和 panic 都止步于此
fn deliver<S>(callbacks: &CallbackTable<S>, state: &mut S, envelope: &EventEnvelope) {
    // 先克隆再释放锁，回调里可以重新注册
    let callback = lock_or_recover(callbacks).get(&envelope.callback_id).cloned();
    let Some(callback) = callback else {
        tracing::debug!(
            target: "events",
            "No runtime callback registered for {}",
            envelope.callback_id
        );
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| callback(state, envelope))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(
            target: "events",
            "Callback {} failed: {}",
            envelope.callback_id,
            e
        ),
        Err(_) => tracing::error!(
            target: "events",
            "Callback {} panicked",
            envelope.callback_id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::marshal::PropValue;
    use crate::scripting::invoker::RuntimeQueue;

    type Log = Vec<(String, PropertyMap)>;

    fn setup() -> (Arc<RuntimeQueue<Log>>, EventChannel<Log>) {
        let queue = Arc::new(RuntimeQueue::new());
        let channel = EventChannel::new(queue.clone() as Arc<dyn CallInvoker<Log>>);
        (queue, channel)
    }

    fn recording_callback() -> EventCallback<Log> {
        Arc::new(|log: &mut Log, env: &EventEnvelope| -> Result<(), ScriptError> {
            log.push((env.callback_id.clone(), env.data.clone()));
            Ok(())
        })
    }

    fn payload(key: &str, value: f64) -> PropertyMap {
        let mut map = PropertyMap::new();
        map.insert(key.to_string(), PropValue::Number(value));
        map
    }

    #[test]
    fn test_dropped_without_listener() {
        let (queue, channel) = setup();
        channel.register_callback("cb1", recording_callback());
        assert_eq!(channel.dispatch("cb1", payload("x", 1.0)), Delivery::NoListener);
        assert_eq!(channel.dropped_events(), 1);
        assert_eq!(queue.pending_jobs(), 0);
    }

    #[test]
    fn test_delivered_on_pump() {
        let (queue, channel) = setup();
        channel.add_listener("onClick");
        channel.register_callback("cb1", recording_callback());
        assert_eq!(channel.dispatch("cb1", payload("x", 1.0)), Delivery::Scheduled);

        let mut log = Log::new();
        assert_eq!(queue.pump(&mut log), 1);
        assert_eq!(log, vec![("cb1".to_string(), payload("x", 1.0))]);
    }

    #[test]
    fn test_listener_count_clamps_at_zero() {
        let (_queue, channel) = setup();
        channel.add_listener("a");
        channel.add_listener("b");
        channel.remove_listeners(5);
        assert_eq!(channel.listener_count(), 0);
        assert!(!channel.is_ready());
    }

    #[test]
    fn test_overwrite_callback() {
        let (queue, channel) = setup();
        channel.add_listener("any");
        channel.register_callback("cb", recording_callback());
        channel.register_callback(
            "cb",
            Arc::new(|log: &mut Log, _env: &EventEnvelope| -> Result<(), ScriptError> {
                log.push(("replacement".to_string(), PropertyMap::new()));
                Ok(())
            }),
        );
        channel.dispatch("cb", PropertyMap::new());

        let mut log = Log::new();
        queue.pump(&mut log);
        assert_eq!(log[0].0, "replacement");
    }

    #[test]
    fn test_unknown_callback_is_noop() {
        let (queue, channel) = setup();
        channel.add_listener("any");
        channel.dispatch("missing", PropertyMap::new());
        let mut log = Log::new();
        assert_eq!(queue.pump(&mut log), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_failing_and_panicking_callbacks_are_contained() {
        let (queue, channel) = setup();
        channel.add_listener("any");
        channel.register_callback(
            "err",
            Arc::new(
                |_: &mut Log, _: &EventEnvelope| -> Result<(), ScriptError> {
                    Err(ScriptError::Invocation("handler threw".into()))
                },
            ),
        );
        channel.register_callback(
            "panic",
            Arc::new(
                |_: &mut Log, _: &EventEnvelope| -> Result<(), ScriptError> {
                    panic!("handler panicked")
                },
            ),
        );
        channel.register_callback("ok", recording_callback());

        channel.dispatch("err", PropertyMap::new());
        channel.dispatch("panic", PropertyMap::new());
        channel.dispatch("ok", PropertyMap::new());

        let mut log = Log::new();
        assert_eq!(queue.pump(&mut log), 3);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_closed_runtime_counts_as_dropped() {
        let (queue, channel) = setup();
        channel.add_listener("any");
        queue.close();
        assert_eq!(channel.dispatch("cb", PropertyMap::new()), Delivery::ChannelClosed);
        assert_eq!(channel.dropped_events(), 1);
    }

    #[test]
    fn test_cleanup() {
        let (_queue, channel) = setup();
        channel.add_listener("any");
        channel.register_callback("cb", recording_callback());
        channel.cleanup();
        assert!(!channel.has_callback("cb"));
        assert!(!channel.is_ready());
    }
}
