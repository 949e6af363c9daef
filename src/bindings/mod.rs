//! Language Binding Layer
//!
//! Everything the scripting runtime talks to. The command table and payload
//! types are runtime-agnostic; `js` adapts them to QuickJS.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Scripting Runtime (QuickJS)                 │
//! │        NativeScene.*      registerEventHandler             │
//! │             │                      ▲                        │
//! │             v                      │                        │
//! │  ┌─────────────────────────────────┴───────────────────┐   │
//! │  │            Binding Adapter (js.rs)                  │   │
//! │  └──────────┬──────────────────────────────────────────┘   │
//! │             │ PropValue (marshal.rs)                        │
//! │             v                                               │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │   Command Dispatcher (dispatcher.rs)                │   │
//! │  │   fixed command table + arity rules (protocol.rs)   │   │
//! │  └──────────┬───────────────────────────┬──────────────┘   │
//! │             v                           v                   │
//! │    Lifecycle Manager             Native Handler             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod js;
pub mod marshal;
pub mod protocol;

pub use dispatcher::{CommandOutcome, Dispatcher, PendingCall};
pub use js::{JsBridge, JsHost};
pub use marshal::{PropValue, PropertyMap};
pub use protocol::*;
