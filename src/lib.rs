//! # Scene Bridge
//!
//! 脚本运行时与原生场景/AR 后端之间的命令与事件桥接层。
//!
//! ## Features
//!
//! - **Value Marshaling**: 脚本值与原生属性表之间的双向转换
//! - **Command Dispatcher**: 固定命令表，带参数个数校验
//! - **Pending Operations**: 异步结果在运行时线程上恰好结算一次
//! - **Event Delivery**: 原生事件投递到脚本回调，没有监听者时丢弃并记录
//! - **Scene Lifecycle**: 场景状态机、节点层级和事件注册表
//!
//! ## Architecture Design
//!
//! 运行时状态只在运行时线程上被访问；其它线程通过 [`scripting::CallInvoker`]
//! 把工作排队回去。命令分发器调用原生侧时从不持有生命周期锁。
//!
//! ### Example
//!
//! ```ignore
//! use scene_bridge::bindings::JsBridge;
//! use scene_bridge::config::BridgeConfig;
//! use scene_bridge::services::HeadlessNative;
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::default();
//! let native = Arc::new(HeadlessNative::new(&config.native)?);
//! let mut js = JsBridge::new(config, native)?;
//! js.eval("NativeScene.createScene('main', 'ar', {})")?;
//! ```
//!
//! ## Modules
//!
//! - [`bindings`]: 命令协议、值转换和 QuickJS 适配
//! - [`config`]: 配置加载与校验
//! - [`core`]: 桥接入口、错误类型和工具
//! - [`domain`]: 场景与节点生命周期
//! - [`scripting`]: 运行时任务队列、待决操作和事件通道
//! - [`services`]: 原生处理器与视口投影

/// Bridge entry point, error types and shared helpers
pub mod core;

/// Configuration loading, environment overrides and validation
pub mod config;

/// Scene/node lifecycle domain model
pub mod domain;

/// Runtime thread-hop queue, pending-operation registry and event channel
pub mod scripting;

/// Native handler trait, headless implementation and projection
pub mod services;

/// Command protocol, value marshaling and the QuickJS adapter
pub mod bindings;
