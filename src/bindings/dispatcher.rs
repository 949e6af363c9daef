//! Command Dispatcher
//!
//! Entry point for every command issued by the scripting runtime. Arity is
//! checked first, arguments are marshaled, then the command is applied to the
//! lifecycle manager and forwarded to the native handler. Commands that need
//! a native round trip come back as [`CommandOutcome::Deferred`]; the binding
//! adapter attaches its runtime-side callables with [`PendingCall::settle`].

use super::marshal::{to_property_map, PropValue, PropertyMap};
use super::protocol::{Command, CommandKind, ErrorPayload, InitOptions, ResultPayload, ShortArgs};
use crate::core::error::{CommandError, CommandResult};
use crate::core::utils::lock_or_recover;
use crate::domain::errors::SceneResult;
use crate::domain::lifecycle::LifecycleManager;
use crate::scripting::pending::{FailureFn, OperationId, OperationSink, PendingRegistry, SuccessFn};
use crate::services::native::{Completer, EventRouter, NativeHandler};
use glam::Vec3;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Result of a successfully dispatched command
pub enum CommandOutcome<S> {
    /// Structural command applied, no value
    Done,
    /// Synchronous query result
    Value(PropValue),
    /// Needs a native round trip
    Deferred(PendingCall<S>),
    /// Deferred command whose arguments were rejected before reaching native
    Rejected(ErrorPayload),
}

impl<S> fmt::Debug for CommandOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Done => f.write_str("Done"),
            CommandOutcome::Value(v) => f.debug_tuple("Value").field(v).finish(),
            CommandOutcome::Deferred(call) => f.debug_tuple("Deferred").field(&call.action).finish(),
            CommandOutcome::Rejected(e) => f.debug_tuple("Rejected").field(e).finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum DeferredAction {
    Initialize(InitOptions),
    SelfTest,
    Project { node_id: String, point: Vec3 },
    Unproject { node_id: String, point: Vec3 },
}

/// A deferred command waiting for its runtime-side callables
pub struct PendingCall<S> {
    action: DeferredAction,
    pending: Arc<PendingRegistry<S>>,
    native: Arc<dyn NativeHandler>,
}

impl<S: 'static> PendingCall<S> {
    pub fn command(&self) -> Command {
        match self.action {
            DeferredAction::Initialize(_) => Command::Initialize,
            DeferredAction::SelfTest => Command::SelfTest,
            DeferredAction::Project { .. } => Command::Project,
            DeferredAction::Unproject { .. } => Command::Unproject,
        }
    }

    /// Registers the callables and starts the native operation.
    ///
    /// The callables run later on the runtime thread, exactly once.
    pub fn settle(self, on_success: SuccessFn<S>, on_failure: FailureFn<S>) -> OperationId {
        let id = self.pending.create(on_success, on_failure);
        let sink: Arc<dyn OperationSink> = self.pending.clone();
        let done = Completer::new(id.clone(), sink);

        match self.action {
            DeferredAction::Initialize(options) => {
                self.native.initialize(&options);
                done.complete(ResultPayload::Boolean(true));
            }
            DeferredAction::SelfTest => self.native.self_test(done),
            DeferredAction::Project { node_id, point } => self.native.project(&node_id, point, done),
            DeferredAction::Unproject { node_id, point } => {
                self.native.unproject(&node_id, point, done)
            }
        }
        id
    }
}

fn string_arg<'a>(command: Command, args: &'a [PropValue], index: usize, name: &str) -> CommandResult<&'a str> {
    let value = args.get(index).unwrap_or(&PropValue::Null);
    value.as_str().ok_or_else(|| {
        CommandError::invalid_argument(
            command.name(),
            format!("{} must be a string, got {}", name, value.kind()),
        )
    })
}

fn props_arg(args: &[PropValue], index: usize) -> PropertyMap {
    args.get(index).map(to_property_map).unwrap_or_default()
}

/// The command dispatcher
pub struct Dispatcher<S> {
    lifecycle: Arc<Mutex<LifecycleManager>>,
    native: Arc<dyn NativeHandler>,
    pending: Arc<PendingRegistry<S>>,
    router: Arc<EventRouter<S>>,
    init_defaults: InitOptions,
}

impl<S: 'static> Dispatcher<S> {
    pub fn new(
        lifecycle: Arc<Mutex<LifecycleManager>>,
        native: Arc<dyn NativeHandler>,
        pending: Arc<PendingRegistry<S>>,
        router: Arc<EventRouter<S>>,
        init_defaults: InitOptions,
    ) -> Self {
        Self {
            lifecycle,
            native,
            pending,
            router,
            init_defaults,
        }
    }

    /// Dispatches a command by its runtime-side name
    pub fn dispatch(&self, name: &str, args: &[PropValue]) -> CommandResult<CommandOutcome<S>> {
        let command: Command = name.parse()?;
        self.execute(command, args)
    }

    pub fn execute(&self, command: Command, args: &[PropValue]) -> CommandResult<CommandOutcome<S>> {
        tracing::trace!(target: "dispatch", "{} ({} args)", command, args.len());

        if args.len() < command.min_args() {
            match command.short_args() {
                ShortArgs::Fail => {
                    return Err(CommandError::invalid_argument(
                        command.name(),
                        format!(
                            "{} requires {} arguments, got {}",
                            command,
                            command.min_args(),
                            args.len()
                        ),
                    ))
                }
                ShortArgs::Ignore => {
                    tracing::debug!(target: "dispatch", "{} called without arguments, ignored", command);
                    return Ok(CommandOutcome::Done);
                }
                ShortArgs::ReturnNull => return Ok(CommandOutcome::Value(PropValue::Null)),
                ShortArgs::Reject => {
                    return Ok(CommandOutcome::Rejected(ErrorPayload::new(format!(
                        "{} requires 2 arguments: nodeId and point",
                        command
                    ))))
                }
                ShortArgs::UseDefaults => {}
            }
        }

        let outcome = match command.kind() {
            CommandKind::Structural => {
                self.apply_structural(command, args)?;
                CommandOutcome::Done
            }
            CommandKind::Query => CommandOutcome::Value(self.query(command, args)),
            CommandKind::Deferred => match self.deferred_action(command, args) {
                Ok(action) => CommandOutcome::Deferred(PendingCall {
                    action,
                    pending: Arc::clone(&self.pending),
                    native: Arc::clone(&self.native),
                }),
                Err(message) => {
                    tracing::debug!(target: "dispatch", "{} rejected: {}", command, message);
                    CommandOutcome::Rejected(ErrorPayload::new(message))
                }
            },
        };
        Ok(outcome)
    }

    /// Runs `f` under the lifecycle lock, then delivers the scene transitions
    /// and memory warnings it produced once the lock is released. Domain
    /// failures are logged.
    fn with_lifecycle<T>(
        &self,
        command: Command,
        f: impl FnOnce(&mut LifecycleManager) -> SceneResult<T>,
    ) -> Option<T> {
        let (result, transitions, warnings) = {
            let mut lifecycle = lock_or_recover(&self.lifecycle);
            let result = f(&mut lifecycle);
            (
                result,
                lifecycle.take_transitions(),
                lifecycle.take_memory_warnings(),
            )
        };

        for transition in &transitions {
            self.native.scene_changed(transition);
        }
        self.router.emit_transitions(transitions);
        for warning in &warnings {
            self.native.memory_warning(warning);
            self.router.emit_memory_warning(warning);
        }

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(target: "dispatch", "{} failed: {}", command, e);
                None
            }
        }
    }

    fn apply_structural(&self, command: Command, args: &[PropValue]) -> CommandResult<()> {
        match command {
            Command::CreateNode => {
                let id = string_arg(command, args, 0, "id")?;
                let node_type = string_arg(command, args, 1, "type")?;
                let props = props_arg(args, 2);
                if self
                    .with_lifecycle(command, |lm| lm.create_node(id, node_type, props.clone()))
                    .is_some()
                {
                    self.native.node_created(id, node_type, &props);
                }
            }
            Command::UpdateNode => {
                let id = string_arg(command, args, 0, "id")?;
                let props = props_arg(args, 1);
                if self
                    .with_lifecycle(command, |lm| lm.update_node(id, props.clone()))
                    .is_some()
                {
                    self.native.node_updated(id, &props);
                }
            }
            Command::DeleteNode => {
                let id = string_arg(command, args, 0, "id")?;
                if self.with_lifecycle(command, |lm| lm.delete_node(id)).is_some() {
                    self.native.node_deleted(id);
                }
            }
            Command::AddChild => {
                let parent = string_arg(command, args, 0, "parentId")?;
                let child = string_arg(command, args, 1, "childId")?;
                self.with_lifecycle(command, |lm| lm.add_child(parent, child));
            }
            Command::RemoveChild => {
                let parent = string_arg(command, args, 0, "parentId")?;
                let child = string_arg(command, args, 1, "childId")?;
                self.with_lifecycle(command, |lm| lm.remove_child(parent, child));
            }
            Command::RegisterEventCallback => {
                let node_id = string_arg(command, args, 0, "nodeId")?;
                let event = string_arg(command, args, 1, "eventName")?;
                let callback = string_arg(command, args, 2, "callbackId")?;
                self.with_lifecycle(command, |lm| lm.register_event(node_id, event, callback));
            }
            Command::UnregisterEventCallback => {
                let node_id = string_arg(command, args, 0, "nodeId")?;
                let event = string_arg(command, args, 1, "eventName")?;
                let callback = string_arg(command, args, 2, "callbackId")?;
                self.with_lifecycle(command, |lm| {
                    Ok(lm.unregister_event(node_id, event, callback))
                });
            }
            Command::CreateScene => {
                let id = string_arg(command, args, 0, "sceneId")?;
                let scene_type = string_arg(command, args, 1, "type")?;
                let props = props_arg(args, 2);
                self.with_lifecycle(command, |lm| lm.create_scene(id, scene_type, props));
            }
            Command::ActivateScene => {
                let id = string_arg(command, args, 0, "sceneId")?;
                self.with_lifecycle(command, |lm| lm.activate_scene(id));
            }
            Command::DeactivateScene => {
                let id = string_arg(command, args, 0, "sceneId")?;
                self.with_lifecycle(command, |lm| lm.deactivate_scene(id));
            }
            Command::DestroyScene => {
                let id = string_arg(command, args, 0, "sceneId")?;
                self.with_lifecycle(command, |lm| lm.destroy_scene(id));
            }
            Command::PerformMemoryCleanup => {
                let aggressive = args.first().and_then(PropValue::as_bool).unwrap_or(false);
                self.with_lifecycle(command, |lm| Ok(lm.perform_cleanup(aggressive)));
                let expired = self.pending.expire_overdue();
                if expired > 0 {
                    tracing::info!(target: "dispatch", "Expired {} overdue operations", expired);
                }
                self.native.cleanup(aggressive);
            }
            Command::CreateMaterial => {
                let name = string_arg(command, args, 0, "name")?;
                self.native.create_material(name, &props_arg(args, 1));
            }
            Command::UpdateMaterial => {
                let name = string_arg(command, args, 0, "name")?;
                self.native.update_material(name, &props_arg(args, 1));
            }
            Command::CreateAnimation => {
                let name = string_arg(command, args, 0, "name")?;
                self.native.create_animation(name, &props_arg(args, 1));
            }
            Command::ExecuteAnimation => {
                let node_id = string_arg(command, args, 0, "nodeId")?;
                let name = string_arg(command, args, 1, "name")?;
                self.native.execute_animation(node_id, name, &props_arg(args, 2));
            }
            Command::SetArPlaneDetection => self.native.set_ar_plane_detection(&props_arg(args, 0)),
            Command::SetArImageTargets => self.native.set_ar_image_targets(&props_arg(args, 0)),
            Command::RecenterTracking => {
                let node_id = string_arg(command, args, 0, "nodeId")?;
                self.native.recenter_tracking(node_id);
            }
            other => {
                return Err(CommandError::invalid_argument(
                    other.name(),
                    "not a structural command",
                ))
            }
        }
        Ok(())
    }

    fn query(&self, command: Command, args: &[PropValue]) -> PropValue {
        match command {
            Command::GetSceneState => {
                let state = args
                    .first()
                    .and_then(PropValue::as_str)
                    .and_then(|id| lock_or_recover(&self.lifecycle).scene_state(id));
                state.map_or(PropValue::Null, |s| PropValue::from(s.label()))
            }
            Command::GetMemoryStats => PropValue::Object(self.memory_stats()),
            _ => PropValue::Null,
        }
    }

    /// Lifecycle statistics plus pending operation count and native stats
    pub fn memory_stats(&self) -> PropertyMap {
        let mut stats = {
            let lifecycle = lock_or_recover(&self.lifecycle);
            let mut stats = lifecycle.stats().to_props();
            stats.insert(
                "memoryPressure".into(),
                lifecycle.memory_pressure().label().into(),
            );
            stats
        };
        stats.insert(
            "pendingOperations".into(),
            self.pending.pending_count().into(),
        );
        stats.extend(self.native.stats());
        stats
    }

    fn deferred_action(&self, command: Command, args: &[PropValue]) -> Result<DeferredAction, String> {
        match command {
            Command::Initialize => {
                let options = match args.first().and_then(PropValue::as_object) {
                    Some(props) => InitOptions::from_props(props, &self.init_defaults),
                    None => self.init_defaults.clone(),
                };
                Ok(DeferredAction::Initialize(options))
            }
            Command::SelfTest => Ok(DeferredAction::SelfTest),
            Command::Project => {
                let node_id = node_id_arg(command, args)?;
                let point = args[1]
                    .numeric_components()
                    .filter(|c| c.len() >= 3)
                    .ok_or("point must be a 3-element array [x, y, z]")?;
                Ok(DeferredAction::Project {
                    node_id,
                    point: Vec3::new(point[0] as f32, point[1] as f32, point[2] as f32),
                })
            }
            Command::Unproject => {
                let node_id = node_id_arg(command, args)?;
                let point = args[1]
                    .numeric_components()
                    .filter(|c| c.len() >= 2)
                    .ok_or("point must be at least a 2-element array [x, y] or [x, y, z]")?;
                let z = point.get(2).copied().unwrap_or(0.0);
                Ok(DeferredAction::Unproject {
                    node_id,
                    point: Vec3::new(point[0] as f32, point[1] as f32, z as f32),
                })
            }
            other => Err(format!("{} is not a deferred command", other)),
        }
    }
}

fn node_id_arg(command: Command, args: &[PropValue]) -> Result<String, String> {
    args[0]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("{}: nodeId must be a string", command))
}
