//! 运行时线程调度
//!
//! 脚本运行时是单线程的：它拥有的可调用对象（Promise 的 resolve/reject、
//! 事件回调）只能在运行时线程上执行。原生线程通过 [`CallInvoker`] 把任务
//! 按 FIFO 顺序投递到运行时线程，由运行时线程在 `pump` 时执行。

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// 在运行时线程上执行的任务，参数是运行时自身的状态
pub type RuntimeJob<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// "稍后在运行时线程上按顺序执行"
pub trait CallInvoker<S>: Send + Sync {
    /// 投递任务；运行时已关闭时返回 false，任务被丢弃
    fn invoke_async(&self, job: RuntimeJob<S>) -> bool;
}

enum Message<S> {
    Run(RuntimeJob<S>),
    Shutdown,
}

/// 基于 crossbeam 通道的运行时任务队列
pub struct RuntimeQueue<S> {
    sender: Sender<Message<S>>,
    receiver: Receiver<Message<S>>,
    closed: AtomicBool,
    owner: OnceLock<ThreadId>,
    /// 单次 pump 最多执行的任务数，0 表示排空
    max_jobs_per_pump: usize,
}

impl<S> RuntimeQueue<S> {
    pub fn new() -> Self {
        Self::with_batch_limit(0)
    }

    pub fn with_batch_limit(max_jobs_per_pump: usize) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            closed: AtomicBool::new(false),
            owner: OnceLock::new(),
            max_jobs_per_pump,
        }
    }

    /// 排队中的任务数
    pub fn pending_jobs(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 关闭队列：之后投递的任务被丢弃，已排队的任务仍可被 pump
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(Message::Shutdown);
        }
    }

    /// 第一次 pump 的线程成为运行时线程
    fn claim_thread(&self) -> bool {
        let current = thread::current().id();
        let owner = *self.owner.get_or_init(|| current);
        if owner != current {
            tracing::error!(
                target: "runtime",
                "Runtime queue pumped from {:?}, but it is owned by {:?}",
                current,
                owner
            );
            return false;
        }
        true
    }

    /// 执行所有已排队的任务，返回执行数量
    pub fn pump(&self, state: &mut S) -> usize {
        if !self.claim_thread() {
            return 0;
        }
        self.drain(state, 0)
    }

    /// 等待至多 `timeout` 直到有任务到达，然后排空队列；等到的任务也计入批量上限
    pub fn pump_timeout(&self, state: &mut S, timeout: Duration) -> usize {
        if !self.claim_thread() {
            return 0;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(Message::Run(job)) => {
                job(state);
                self.drain(state, 1)
            }
            Ok(Message::Shutdown) => self.drain(state, 0),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    fn drain(&self, state: &mut S, mut executed: usize) -> usize {
        while self.max_jobs_per_pump == 0 || executed < self.max_jobs_per_pump {
            match self.receiver.try_recv() {
                Ok(Message::Run(job)) => {
                    job(state);
                    executed += 1;
                }
                Ok(Message::Shutdown) => continue,
                Err(_) => break,
            }
        }
        executed
    }

    /// 专用运行时线程的主循环，直到队列关闭
    fn run_until_closed(&self, state: &mut S) {
        if !self.claim_thread() {
            return;
        }
        loop {
            match self.receiver.recv() {
                Ok(Message::Run(job)) => job(state),
                Ok(Message::Shutdown) => {
                    // 关闭前投递的任务仍然执行
                    while let Ok(Message::Run(job)) = self.receiver.try_recv() {
                        job(state);
                    }
                    break;
                }
                Err(_) => break,
            }
        }
    }
}

impl<S> Default for RuntimeQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CallInvoker<S> for RuntimeQueue<S> {
    fn invoke_async(&self, job: RuntimeJob<S>) -> bool {
        if self.is_closed() {
            tracing::warn!(target: "runtime", "Runtime queue closed, dropping job");
            return false;
        }
        if self.sender.send(Message::Run(job)).is_err() {
            tracing::warn!(target: "runtime", "Runtime queue disconnected, dropping job");
            return false;
        }
        true
    }
}

/// 拥有运行时状态的专用线程
///
/// 状态在线程内部通过 `init` 构造，因此 `S` 不需要是 `Send`。
pub struct RuntimeThread<S: 'static> {
    queue: Arc<RuntimeQueue<S>>,
    handle: Option<JoinHandle<()>>,
}

impl<S: 'static> RuntimeThread<S> {
    pub fn spawn<F>(queue: Arc<RuntimeQueue<S>>, name: &str, init: F) -> std::io::Result<Self>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let loop_queue = Arc::clone(&queue);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = init();
                tracing::debug!(target: "runtime", "Runtime thread started");
                loop_queue.run_until_closed(&mut state);
                tracing::debug!(target: "runtime", "Runtime thread stopped");
            })?;

        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    pub fn queue(&self) -> &Arc<RuntimeQueue<S>> {
        &self.queue
    }

    /// 关闭队列并等待线程退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(target: "runtime", "Runtime thread panicked");
            }
        }
    }
}

impl<S: 'static> Drop for RuntimeThread<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
