//! 待决操作（Promise）注册表
//!
//! 异步命令在这里登记运行时侧的成功/失败回调，原生线程完成工作后通过 ID
//! 回到注册表。每个条目最多被结算一次：条目先从表中移除，再把回调连同
//! 结果一起投递到运行时线程，注册表的锁从不跨越回调执行。

use super::invoker::CallInvoker;
use crate::bindings::protocol::{ErrorPayload, ResultPayload};
use crate::core::utils::{current_timestamp_ms, lock_or_recover};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 待决操作 ID，形如 `promise_<counter>_<epoch-millis>`
pub type OperationId = String;

/// 成功回调，在运行时线程上执行
pub type SuccessFn<S> = Box<dyn FnOnce(&mut S, ResultPayload) + Send + 'static>;

/// 失败回调，在运行时线程上执行
pub type FailureFn<S> = Box<dyn FnOnce(&mut S, ErrorPayload) + Send + 'static>;

/// 超时失败的消息
pub const TIMEOUT_MESSAGE: &str = "operation timed out";

struct PendingOperation<S> {
    on_success: SuccessFn<S>,
    on_failure: FailureFn<S>,
    deadline: Option<Instant>,
}

enum Settlement {
    Success(ResultPayload),
    Failure(ErrorPayload),
}

/// 原生侧看到的结算接口，与运行时状态类型无关
pub trait OperationSink: Send + Sync {
    fn complete(&self, id: &str, payload: ResultPayload) -> bool;
    fn fail(&self, id: &str, message: String) -> bool;
}

/// 待决操作注册表
///
/// 随桥接实例创建和销毁，不是全局状态。
pub struct PendingRegistry<S> {
    entries: Mutex<HashMap<OperationId, PendingOperation<S>>>,
    counter: AtomicU64,
    invoker: Arc<dyn CallInvoker<S>>,
    default_timeout: Option<Duration>,
}

impl<S: 'static> PendingRegistry<S> {
    pub fn new(invoker: Arc<dyn CallInvoker<S>>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            invoker,
            default_timeout: None,
        }
    }

    /// 为之后通过 [`create`](Self::create) 登记的操作设置默认超时
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn next_id(&self) -> OperationId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        format!("promise_{}_{}", n, current_timestamp_ms())
    }

    /// 登记一个待决操作，返回需要传给原生调用的 ID
    pub fn create(&self, on_success: SuccessFn<S>, on_failure: FailureFn<S>) -> OperationId {
        self.create_with_timeout(on_success, on_failure, self.default_timeout)
    }

    /// 登记带超时的待决操作，超时由 [`expire_overdue`](Self::expire_overdue) 结算
    pub fn create_with_timeout(
        &self,
        on_success: SuccessFn<S>,
        on_failure: FailureFn<S>,
        timeout: Option<Duration>,
    ) -> OperationId {
        let id = self.next_id();
        let op = PendingOperation {
            on_success,
            on_failure,
            deadline: timeout.map(|t| Instant::now() + t),
        };
        lock_or_recover(&self.entries).insert(id.clone(), op);
        tracing::trace!(target: "pending", "Created pending operation {}", id);
        id
    }

    /// 以成功结果结算；未知或已结算的 ID 是无害的空操作
    pub fn complete(&self, id: &str, payload: ResultPayload) -> bool {
        self.settle(id, Settlement::Success(payload))
    }

    /// 以旧的字符串格式结算（`"[1,2,3]"` 为数值数组，其余为文本）
    pub fn complete_wire(&self, id: &str, raw: &str) -> bool {
        self.complete(id, ResultPayload::from_wire(raw))
    }

    /// 以失败结算，错误统一包装为单字段消息
    pub fn fail(&self, id: &str, message: impl Into<String>) -> bool {
        self.settle(id, Settlement::Failure(ErrorPayload::new(message)))
    }

    fn settle(&self, id: &str, settlement: Settlement) -> bool {
        // 先移除再投递，重入或重复结算都看不到这个条目
        let removed = lock_or_recover(&self.entries).remove(id);
        let Some(op) = removed else {
            tracing::debug!(
                target: "pending",
                "No pending operation {} (duplicate or stale completion)",
                id
            );
            return false;
        };

        let scheduled = self.invoker.invoke_async(Box::new(move |state: &mut S| {
            let PendingOperation {
                on_success,
                on_failure,
                ..
            } = op;
            match settlement {
                Settlement::Success(payload) => on_success(state, payload),
                Settlement::Failure(error) => on_failure(state, error),
            }
        }));
        if !scheduled {
            tracing::warn!(
                target: "pending",
                "Runtime gone, completion of {} discarded",
                id
            );
        }
        scheduled
    }

    /// 让所有已过期的操作以超时失败，返回过期数量
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let overdue: Vec<OperationId> = lock_or_recover(&self.entries)
            .iter()
            .filter(|(_, op)| op.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired = 0;
        for id in overdue {
            if self.fail(&id, TIMEOUT_MESSAGE) {
                tracing::warn!(target: "pending", "Pending operation {} timed out", id);
                expired += 1;
            }
        }
        expired
    }

    pub fn is_pending(&self, id: &str) -> bool {
        lock_or_recover(&self.entries).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        lock_or_recover(&self.entries).len()
    }

    /// 丢弃所有条目，它们的回调永远不会执行
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = lock_or_recover(&self.entries).drain().collect();
        if !drained.is_empty() {
            tracing::info!(
                target: "pending",
                "Discarded {} orphaned pending operations",
                drained.len()
            );
        }
        drained.len()
    }
}

impl<S: 'static> OperationSink for PendingRegistry<S> {
    fn complete(&self, id: &str, payload: ResultPayload) -> bool {
        PendingRegistry::complete(self, id, payload)
    }

    fn fail(&self, id: &str, message: String) -> bool {
        PendingRegistry::fail(self, id, message)
    }
}
