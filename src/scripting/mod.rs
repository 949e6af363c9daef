//! 脚本运行时侧基础设施
//!
//! - `invoker` - 运行时线程任务队列（thread-hop）
//! - `pending` - 待决操作注册表
//! - `events` - 事件投递通道

pub mod events;
pub mod invoker;
pub mod pending;

pub use events::{Delivery, EventCallback, EventChannel};
pub use invoker::{CallInvoker, RuntimeJob, RuntimeQueue, RuntimeThread};
pub use pending::{FailureFn, OperationId, OperationSink, PendingRegistry, SuccessFn};
