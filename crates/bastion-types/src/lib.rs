use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// String-keyed parameter bag carried by every [`ActionRequest`].  Values are
/// mixed scalars and objects; `null` is treated as "absent" throughout.
pub type ParamMap = Map<String, Value>;

/// Lease priority for the locomotion actuator.
///
/// Variants are declared in rank order so the derived `Ord` matches
/// `normal(0) < high(1) < emergency(2)`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Emergency,
}

impl Priority {
    /// Numeric rank used when comparing holders.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Normal => 0,
            Priority::High => 1,
            Priority::Emergency => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Emergency => write!(f, "emergency"),
        }
    }
}

/// World-space position in blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, k: f64) -> Vec3 {
        Vec3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Euclidean distance; the single metric used for detection radii,
    /// attack radii and exploration displacement.
    pub fn distance_to(self, other: Vec3) -> f64 {
        self.sub(other).length()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len < 1e-9 || !len.is_finite() {
            None
        } else {
            Some(self.scale(1.0 / len))
        }
    }

    /// Parse a `{x, y, z}` parameter object.  A missing `y` defaults to 0.
    pub fn from_value(value: &Value) -> Option<Vec3> {
        let obj = value.as_object()?;
        let x = obj.get("x")?.as_f64()?;
        let z = obj.get("z")?.as_f64()?;
        let y = obj.get("y").and_then(Value::as_f64).unwrap_or(0.0);
        Some(Vec3::new(x, y, z))
    }

    pub fn to_value(self) -> Value {
        serde_json::json!({ "x": self.x, "y": self.y, "z": self.z })
    }
}

/// A request for the agent's next physical (or conversational) action.
///
/// Producers are the external planner and the safety monitor.  `holder` and
/// `priority` only matter for navigation-type actions, which must win the
/// locomotion lease before they run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: ParamMap,
    /// Upper bound the leaf must honour, in milliseconds.  `None` uses the
    /// dispatcher's configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl ActionRequest {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            parameters: ParamMap::new(),
            timeout_ms: None,
            holder: None,
            priority: Priority::Normal,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.parameters = params;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Issue the request on behalf of `holder` at `priority`.
    pub fn on_behalf_of(mut self, holder: impl Into<String>, priority: Priority) -> Self {
        self.holder = Some(holder.into());
        self.priority = priority;
        self
    }
}

/// JSON Schema of [`ActionRequest`], handed to the external planning service so
/// its output can be constrained to well-formed requests.
pub fn action_request_schema() -> Value {
    let schema = schemars::schema_for!(ActionRequest);
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

// ─────────────────────────────────────────────────────────────────────────────
// Leaf envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of a capability leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafSpec {
    pub name: String,
    /// Registered but unimplemented; must never be dispatched to.
    #[serde(default)]
    pub placeholder: bool,
}

impl LeafSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            placeholder: false,
        }
    }

    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            placeholder: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafStatus {
    Success,
    Failure,
}

/// Error code a leaf must report once its abort signal fires.
pub const ABORTED_CODE: &str = "aborted";

/// Structured failure reported by a leaf or legacy handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafError {
    pub code: String,
    pub detail: String,
    pub retryable: bool,
}

impl LeafError {
    pub fn new(code: impl Into<String>, detail: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
            retryable,
        }
    }

    /// Terminal, non-retryable cancellation.
    pub fn aborted(detail: impl Into<String>) -> Self {
        Self::new(ABORTED_CODE, detail, false)
    }

    pub fn is_aborted(&self) -> bool {
        self.code == ABORTED_CODE
    }
}

impl fmt::Display for LeafError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

/// Result envelope returned by `Leaf::run` and by legacy handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafOutcome {
    pub status: LeafStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LeafError>,
}

impl LeafOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            status: LeafStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: LeafError) -> Self {
        Self {
            status: LeafStatus::Failure,
            result: None,
            error: Some(error),
        }
    }

    pub fn aborted(detail: impl Into<String>) -> Self {
        Self::failure(LeafError::aborted(detail))
    }

    /// Attach observations to the envelope; leaves may do this on failure too.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == LeafStatus::Success
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Which executor actually performed the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchRoute {
    Leaf,
    LegacyHandler,
}

/// Successful result of dispatching one [`ActionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_type: String,
    pub route: DispatchRoute,
    /// Leaf name when routed to a capability leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaf: Option<String>,
    #[serde(default)]
    pub result: Value,
    /// Normalization warnings (deprecated keys, alias conflicts).
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning lease contention, dispatch routing, leaf
/// failures, world-client faults and configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BastionError {
    #[error("Navigation busy: '{holder}' holds the lease ({requested} request rejected)")]
    Busy { requested: Priority, holder: String },

    #[error("Unknown action type: {0}")]
    UnknownActionType(String),

    #[error("Leaf factory not available for '{action_type}'")]
    FactoryUnavailable { action_type: String },

    #[error("No leaf registered for '{leaf}'")]
    NoLeafRegistered { leaf: String },

    #[error("{leaf} is a placeholder")]
    PlaceholderLeaf { leaf: String },

    #[error("Leaf '{leaf}' is not routable")]
    LeafNotRoutable { leaf: String },

    #[error("Action '{action_type}' aborted")]
    Aborted { action_type: String },

    #[error("Leaf '{leaf}' failed: {error}")]
    LeafFailed {
        leaf: String,
        error: LeafError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnostics: Option<Value>,
    },

    #[error("World client error: {0}")]
    World(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BastionError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            BastionError::Busy { .. }
            | BastionError::FactoryUnavailable { .. }
            | BastionError::NoLeafRegistered { .. }
            | BastionError::PlaceholderLeaf { .. }
            | BastionError::LeafNotRoutable { .. }
            | BastionError::World(_) => true,
            BastionError::LeafFailed { error, .. } => error.retryable,
            BastionError::UnknownActionType(_)
            | BastionError::Aborted { .. }
            | BastionError::Config(_) => false,
        }
    }
}
