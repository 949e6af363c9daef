//! JavaScript Binding Adapter using rquickjs
//!
//! Hosts a QuickJS runtime on the calling thread and exposes the command table
//! to scripts as `NativeScene.<command>(...)`. Deferred commands return a
//! `Promise`; its `resolve`/`reject` functions are kept on the runtime side in
//! a slot table and only their slot ids travel through the pending registry,
//! so nothing that touches the JS heap ever leaves this thread.

use super::dispatcher::{CommandOutcome, Dispatcher};
use super::marshal::PropValue;
use super::protocol::{Command, ErrorPayload, EventEnvelope, ResultPayload};
use crate::config::BridgeConfig;
use crate::core::bridge::Bridge;
use crate::core::error::{BridgeResult, ScriptError, ScriptResult};
use crate::scripting::events::EventChannel;
use crate::services::native::NativeHandler;
use rquickjs::{Context, Ctx, Function, Object, Persistent, Runtime};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Script installed before any user code runs
const PRELUDE: &str = r#"
(function (host) {
    const scene = {};
    for (const name of JSON.parse(host.commands)) {
        scene[name] = function (...args) {
            let settle = null;
            const promise = new Promise((resolve, reject) => {
                settle = { resolve, reject };
            });
            const outcome = JSON.parse(host.call(
                name,
                JSON.stringify(args),
                (json) => settle.resolve(JSON.parse(json)),
                (message) => settle.reject(new Error(message))
            ));
            switch (outcome.kind) {
                case "value": return outcome.value;
                case "deferred": return promise;
                case "rejected": return Promise.reject(new Error(outcome.message));
                case "error": throw new Error(outcome.message);
                default: return undefined;
            }
        };
    }
    globalThis.NativeScene = Object.freeze(scene);

    globalThis.registerEventHandler = function (callbackId, handler) {
        if (arguments.length < 2 || typeof handler !== "function") {
            return;
        }
        host.registerHandler(String(callbackId), (json) => handler(JSON.parse(json)));
    };

    globalThis.BridgeEvents = Object.freeze({
        addListener: (name) => host.addListener(String(name)),
        removeListeners: (count) => host.removeListeners(Number(count) || 0),
    });

    const log = (level) => (...parts) => host.log(level, parts.map(String).join(" "));
    globalThis.console = {
        log: log("info"),
        info: log("info"),
        debug: log("debug"),
        warn: log("warn"),
        error: log("error"),
    };
})(globalThis.__sceneBridge);
delete globalThis.__sceneBridge;
"#;

/// Runtime-side callables, keyed by slot id or callback id
#[derive(Default)]
struct SlotTable {
    next: u64,
    callables: HashMap<u64, Persistent<Function<'static>>>,
    handlers: HashMap<String, Persistent<Function<'static>>>,
}

impl SlotTable {
    fn store(&mut self, callable: Persistent<Function<'static>>) -> u64 {
        self.next += 1;
        self.callables.insert(self.next, callable);
        self.next
    }

    fn clear(&mut self) {
        self.callables.clear();
        self.handlers.clear();
    }
}

/// Runtime state handed to every job pumped on the JS thread
pub struct JsHost {
    slots: Rc<RefCell<SlotTable>>,
    context: Context,
    runtime: Runtime,
}

impl JsHost {
    fn new() -> ScriptResult<Self> {
        let runtime = Runtime::new().map_err(|e| ScriptError::Init(e.to_string()))?;
        let context = Context::full(&runtime).map_err(|e| ScriptError::Init(e.to_string()))?;
        Ok(Self {
            slots: Rc::new(RefCell::new(SlotTable::default())),
            context,
            runtime,
        })
    }

    /// Calls one stored callable and drops its counterpart
    fn settle(&mut self, call: u64, discard: u64, argument: String) {
        let callable = {
            let mut slots = self.slots.borrow_mut();
            slots.callables.remove(&discard);
            slots.callables.remove(&call)
        };
        let Some(callable) = callable else {
            tracing::warn!(target: "js", "{}", ScriptError::CallableNotFound(call));
            return;
        };

        let result = self.context.with(|ctx| -> Result<(), String> {
            let function = callable.restore(&ctx).map_err(|e| e.to_string())?;
            function
                .call::<_, ()>((argument,))
                .map_err(|e| describe_error(&ctx, e))
        });
        if let Err(message) = result {
            tracing::error!(target: "js", "Promise settlement failed: {}", message);
        }
    }

    fn call_handler(&mut self, callback_id: &str, envelope: &EventEnvelope) -> ScriptResult<()> {
        let handler = self.slots.borrow().handlers.get(callback_id).cloned();
        let Some(handler) = handler else {
            return Ok(());
        };
        let data = serde_json::Value::from(PropValue::Object(envelope.data.clone())).to_string();

        self.context
            .with(|ctx| -> Result<(), String> {
                let function = handler.restore(&ctx).map_err(|e| e.to_string())?;
                function
                    .call::<_, ()>((data,))
                    .map_err(|e| describe_error(&ctx, e))
            })
            .map_err(ScriptError::Invocation)
    }

    /// Runs queued QuickJS jobs (promise reactions)
    fn run_microtasks(&self) -> usize {
        let mut executed = 0;
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => executed += 1,
                Ok(false) => break,
                Err(_) => {
                    executed += 1;
                    tracing::error!(target: "js", "Uncaught error in promise job");
                }
            }
        }
        executed
    }
}

impl Drop for JsHost {
    fn drop(&mut self) {
        // 持久化引用必须先于运行时释放
        self.slots.borrow_mut().clear();
    }
}

fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }
    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    if let Some(text) = caught.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    format!("{:?}", caught)
}

fn parse_args(json: &str) -> Result<Vec<PropValue>, String> {
    let values: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| format!("malformed arguments: {}", e))?;
    Ok(values.into_iter().map(PropValue::from).collect())
}

fn payload_json(payload: &ResultPayload) -> String {
    serde_json::Value::from(payload.to_prop_value()).to_string()
}

fn install<'js>(
    ctx: &Ctx<'js>,
    slots: Rc<RefCell<SlotTable>>,
    dispatcher: Arc<Dispatcher<JsHost>>,
    channel: Arc<EventChannel<JsHost>>,
) -> rquickjs::Result<()> {
    let host = Object::new(ctx.clone())?;

    let names: Vec<&str> = Command::ALL.iter().map(Command::name).collect();
    host.set("commands", json!(names).to_string())?;

    let call_slots = Rc::clone(&slots);
    host.set(
        "call",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>,
                  name: String,
                  args: String,
                  resolve: Function<'js>,
                  reject: Function<'js>|
                  -> rquickjs::Result<String> {
                let args = match parse_args(&args) {
                    Ok(args) => args,
                    Err(message) => {
                        return Ok(json!({ "kind": "error", "message": message }).to_string())
                    }
                };

                let outcome = match dispatcher.dispatch(&name, &args) {
                    Err(e) => json!({ "kind": "error", "message": e.message() }),
                    Ok(CommandOutcome::Done) => json!({ "kind": "done" }),
                    Ok(CommandOutcome::Value(value)) => {
                        json!({ "kind": "value", "value": serde_json::Value::from(value) })
                    }
                    Ok(CommandOutcome::Rejected(error)) => {
                        json!({ "kind": "rejected", "message": error.message })
                    }
                    Ok(CommandOutcome::Deferred(call)) => {
                        let (ok, err) = {
                            let mut table = call_slots.borrow_mut();
                            (
                                table.store(Persistent::save(&ctx, resolve)),
                                table.store(Persistent::save(&ctx, reject)),
                            )
                        };
                        let id = call.settle(
                            Box::new(move |host: &mut JsHost, payload: ResultPayload| {
                                host.settle(ok, err, payload_json(&payload))
                            }),
                            Box::new(move |host: &mut JsHost, error: ErrorPayload| {
                                host.settle(err, ok, error.message)
                            }),
                        );
                        json!({ "kind": "deferred", "id": id })
                    }
                };
                Ok(outcome.to_string())
            },
        )?,
    )?;

    let handler_slots = Rc::clone(&slots);
    let handler_channel = Arc::clone(&channel);
    host.set(
        "registerHandler",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, callback_id: String, handler: Function<'js>| {
                handler_slots
                    .borrow_mut()
                    .handlers
                    .insert(callback_id.clone(), Persistent::save(&ctx, handler));
                let id = callback_id.clone();
                handler_channel.register_callback(
                    callback_id,
                    Arc::new(
                        move |host: &mut JsHost, envelope: &EventEnvelope| -> ScriptResult<()> {
                            host.call_handler(&id, envelope)
                        },
                    ),
                );
            },
        )?,
    )?;

    let listener_channel = Arc::clone(&channel);
    host.set(
        "addListener",
        Function::new(ctx.clone(), move |name: String| {
            listener_channel.add_listener(&name)
        })?,
    )?;
    host.set(
        "removeListeners",
        Function::new(ctx.clone(), move |count: f64| {
            channel.remove_listeners(count.max(0.0) as usize)
        })?,
    )?;

    host.set(
        "log",
        Function::new(ctx.clone(), |level: String, message: String| match level.as_str() {
            "error" => tracing::error!(target: "js", "{}", message),
            "warn" => tracing::warn!(target: "js", "{}", message),
            "debug" => tracing::debug!(target: "js", "{}", message),
            _ => tracing::info!(target: "js", "{}", message),
        })?,
    )?;

    ctx.globals().set("__sceneBridge", host)?;
    ctx.eval::<(), _>(PRELUDE)
}

/// A bridge driven by a QuickJS runtime on the current thread
pub struct JsBridge {
    host: JsHost,
    bridge: Bridge<JsHost>,
}

impl JsBridge {
    pub fn new(config: BridgeConfig, native: Arc<dyn NativeHandler>) -> BridgeResult<Self> {
        let bridge = Bridge::new(config, native)?;
        let host = JsHost::new()?;

        let slots = Rc::clone(&host.slots);
        let dispatcher = Arc::clone(bridge.dispatcher());
        let channel = Arc::clone(bridge.events());
        host.context
            .with(|ctx| install(&ctx, slots, dispatcher, channel).map_err(|e| describe_error(&ctx, e)))
            .map_err(ScriptError::Init)?;

        tracing::debug!(target: "js", "QuickJS bridge ready");
        Ok(Self { host, bridge })
    }

    pub fn bridge(&self) -> &Bridge<JsHost> {
        &self.bridge
    }

    /// Evaluates a script, then runs any promise reactions it queued
    pub fn eval(&mut self, source: &str) -> ScriptResult<()> {
        self.host
            .context
            .with(|ctx| {
                ctx.eval::<(), _>(source)
                    .map_err(|e| describe_error(&ctx, e))
            })
            .map_err(ScriptError::Evaluation)?;
        self.host.run_microtasks();
        Ok(())
    }

    /// Evaluates an expression and returns it converted with `String(...)`
    pub fn eval_string(&mut self, expression: &str) -> ScriptResult<String> {
        let source = format!("String(({}))", expression);
        self.host
            .context
            .with(|ctx| {
                ctx.eval::<String, _>(source)
                    .map_err(|e| describe_error(&ctx, e))
            })
            .map_err(ScriptError::Evaluation)
    }

    /// Runs queued settlements and events, then promise reactions
    pub fn pump(&mut self) -> usize {
        let jobs = self.bridge.pump(&mut self.host);
        jobs + self.host.run_microtasks()
    }

    /// Like [`pump`](Self::pump) but waits up to `timeout` for work to arrive
    pub fn pump_for(&mut self, timeout: Duration) -> usize {
        let jobs = self.bridge.pump_timeout(&mut self.host, timeout);
        jobs + self.host.run_microtasks()
    }

    /// Pumps until no operation is pending, or `timeout` passes.
    /// Returns whether the bridge went idle.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.bridge.is_idle() && !self.host.runtime.is_job_pending() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    target: "js",
                    "Still {} pending operations after {:?}",
                    self.bridge.pending().pending_count(),
                    timeout
                );
                return false;
            }
            self.pump_for((deadline - now).min(Duration::from_millis(10)));
        }
    }
}
