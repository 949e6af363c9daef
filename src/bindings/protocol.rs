//! Unified Command/Event Protocol
//!
//! The fixed command table exposed to the scripting runtime, plus the
//! payload types that travel back to it: deferred results, failure
//! messages and event envelopes.

use super::marshal::{bool_or, str_or, PropValue, PropertyMap};
use crate::core::error::CommandError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Commands callable from the scripting runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Node graph
    CreateNode,
    UpdateNode,
    DeleteNode,
    AddChild,
    RemoveChild,
    RegisterEventCallback,
    UnregisterEventCallback,

    // Bridge
    Initialize,

    // Scene lifecycle
    CreateScene,
    ActivateScene,
    DeactivateScene,
    DestroyScene,
    GetSceneState,

    // Diagnostics
    GetMemoryStats,
    PerformMemoryCleanup,
    SelfTest,

    // Materials & animation
    CreateMaterial,
    UpdateMaterial,
    CreateAnimation,
    ExecuteAnimation,

    // AR
    SetArPlaneDetection,
    SetArImageTargets,
    RecenterTracking,
    Project,
    Unproject,
}

/// How a command reports back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Mutates state, returns nothing
    Structural,
    /// Returns a value synchronously
    Query,
    /// Returns a deferred result settled later on the runtime thread
    Deferred,
}

/// What happens when a command receives fewer than its minimum arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortArgs {
    /// Synchronous `InvalidArgument`
    Fail,
    /// Silently ignored
    Ignore,
    /// Returns null
    ReturnNull,
    /// Deferred result rejected immediately
    Reject,
    /// Proceeds with default options
    UseDefaults,
}

impl Command {
    pub const ALL: [Command; 25] = [
        Command::CreateNode,
        Command::UpdateNode,
        Command::DeleteNode,
        Command::AddChild,
        Command::RemoveChild,
        Command::RegisterEventCallback,
        Command::UnregisterEventCallback,
        Command::Initialize,
        Command::CreateScene,
        Command::ActivateScene,
        Command::DeactivateScene,
        Command::DestroyScene,
        Command::GetSceneState,
        Command::GetMemoryStats,
        Command::PerformMemoryCleanup,
        Command::SelfTest,
        Command::CreateMaterial,
        Command::UpdateMaterial,
        Command::CreateAnimation,
        Command::ExecuteAnimation,
        Command::SetArPlaneDetection,
        Command::SetArImageTargets,
        Command::RecenterTracking,
        Command::Project,
        Command::Unproject,
    ];

    /// Name as seen by the scripting runtime
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateNode => "createNode",
            Command::UpdateNode => "updateNode",
            Command::DeleteNode => "deleteNode",
            Command::AddChild => "addChild",
            Command::RemoveChild => "removeChild",
            Command::RegisterEventCallback => "registerEventCallback",
            Command::UnregisterEventCallback => "unregisterEventCallback",
            Command::Initialize => "initialize",
            Command::CreateScene => "createScene",
            Command::ActivateScene => "activateScene",
            Command::DeactivateScene => "deactivateScene",
            Command::DestroyScene => "destroyScene",
            Command::GetSceneState => "getSceneState",
            Command::GetMemoryStats => "getMemoryStats",
            Command::PerformMemoryCleanup => "performMemoryCleanup",
            Command::SelfTest => "selfTest",
            Command::CreateMaterial => "createMaterial",
            Command::UpdateMaterial => "updateMaterial",
            Command::CreateAnimation => "createAnimation",
            Command::ExecuteAnimation => "executeAnimation",
            Command::SetArPlaneDetection => "setARPlaneDetection",
            Command::SetArImageTargets => "setARImageTargets",
            Command::RecenterTracking => "recenterTracking",
            Command::Project => "project",
            Command::Unproject => "unproject",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|cmd| cmd.name() == name)
    }

    pub fn min_args(&self) -> usize {
        match self {
            Command::CreateNode => 3,
            Command::UpdateNode => 2,
            Command::DeleteNode => 1,
            Command::AddChild | Command::RemoveChild => 2,
            Command::RegisterEventCallback | Command::UnregisterEventCallback => 3,
            Command::Initialize => 1,
            Command::CreateScene => 3,
            Command::ActivateScene | Command::DeactivateScene | Command::DestroyScene => 1,
            Command::GetSceneState => 1,
            Command::GetMemoryStats | Command::PerformMemoryCleanup | Command::SelfTest => 0,
            Command::CreateMaterial | Command::UpdateMaterial | Command::CreateAnimation => 2,
            Command::ExecuteAnimation => 3,
            Command::SetArPlaneDetection | Command::SetArImageTargets => 1,
            Command::RecenterTracking => 1,
            Command::Project | Command::Unproject => 2,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Initialize | Command::SelfTest | Command::Project | Command::Unproject => {
                CommandKind::Deferred
            }
            Command::GetSceneState | Command::GetMemoryStats => CommandKind::Query,
            _ => CommandKind::Structural,
        }
    }

    pub fn short_args(&self) -> ShortArgs {
        match self {
            Command::RecenterTracking => ShortArgs::Ignore,
            Command::GetSceneState => ShortArgs::ReturnNull,
            Command::Project | Command::Unproject => ShortArgs::Reject,
            Command::Initialize => ShortArgs::UseDefaults,
            _ => ShortArgs::Fail,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| CommandError::UnknownCommand(s.to_string()))
    }
}

/// Value a deferred command settles with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ResultPayload {
    NumericArray(Vec<f64>),
    Text(String),
    Boolean(bool),
}

impl ResultPayload {
    /// Decodes the legacy string wire form.
    ///
    /// `"[1,2,3]"` becomes a numeric array; anything else, including a
    /// bracketed list with non-numeric elements, stays text.
    pub fn from_wire(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(inner) = trimmed
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            if inner.trim().is_empty() {
                return ResultPayload::NumericArray(Vec::new());
            }
            let parsed: Result<Vec<f64>, _> =
                inner.split(',').map(|part| part.trim().parse::<f64>()).collect();
            if let Ok(values) = parsed {
                return ResultPayload::NumericArray(values);
            }
        }
        ResultPayload::Text(raw.to_string())
    }

    /// Legacy string wire form
    pub fn to_wire(&self) -> String {
        match self {
            ResultPayload::NumericArray(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("[{}]", parts.join(","))
            }
            ResultPayload::Text(text) => text.clone(),
            ResultPayload::Boolean(b) => b.to_string(),
        }
    }

    /// The value handed to the runtime's success callable
    pub fn to_prop_value(&self) -> PropValue {
        match self {
            ResultPayload::NumericArray(values) => PropValue::from(values.clone()),
            ResultPayload::Text(text) => PropValue::String(text.clone()),
            ResultPayload::Boolean(b) => PropValue::Bool(*b),
        }
    }
}

/// Failure payload: a single message field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Event delivered to a runtime-side callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub callback_id: String,
    pub data: PropertyMap,
    /// Epoch milliseconds
    pub timestamp: f64,
}

/// AR world alignment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorldAlignment {
    #[default]
    Gravity,
    GravityAndHeading,
    Camera,
}

impl WorldAlignment {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldAlignment::Gravity => "Gravity",
            WorldAlignment::GravityAndHeading => "GravityAndHeading",
            WorldAlignment::Camera => "Camera",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Gravity" => Some(WorldAlignment::Gravity),
            "GravityAndHeading" => Some(WorldAlignment::GravityAndHeading),
            "Camera" => Some(WorldAlignment::Camera),
            _ => None,
        }
    }
}

/// Options accepted by `initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOptions {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub ar_enabled: bool,
    #[serde(default)]
    pub world_alignment: WorldAlignment,
}

crate::impl_default!(InitOptions {
    debug: false,
    ar_enabled: false,
    world_alignment: WorldAlignment::Gravity,
});

impl InitOptions {
    /// Reads the runtime-side option object on top of `defaults`.
    pub fn from_props(props: &PropertyMap, defaults: &InitOptions) -> Self {
        let alignment = str_or(props, "worldAlignment", defaults.world_alignment.as_str());
        let world_alignment = WorldAlignment::parse(alignment).unwrap_or_else(|| {
            tracing::warn!(
                target: "dispatch",
                "Unknown worldAlignment '{}', using {}",
                alignment,
                defaults.world_alignment.as_str()
            );
            defaults.world_alignment
        });

        Self {
            debug: bool_or(props, "debug", defaults.debug),
            ar_enabled: bool_or(props, "arEnabled", defaults.ar_enabled),
            world_alignment,
        }
    }
}
