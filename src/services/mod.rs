//! 原生服务
//!
//! 命令分发器背后的原生协作者：平台接口、节点事件出口以及无头实现。

pub mod native;
pub mod projection;

pub use native::{Completer, EventRouter, HeadlessNative, NativeHandler, NodeEventSink};
pub use projection::{ProjectionError, Viewport};
