//! Action contract registry.
//!
//! Every action type the planner may request has an [`ActionContract`]: the
//! leaf that implements it, how the dispatcher may route it, and the rules
//! that turn a loosely-typed parameter map into the canonical one the leaf
//! expects.
//!
//! # Normalization
//!
//! [`normalize_action_params`] applies, in order:
//!
//! 1. Unknown action type: parameters are returned untouched.
//! 2. Deprecated keys that are present and non-null are removed, one warning
//!    each.
//! 3. Alias rules, in declared order.  A null value counts as absent.  A lone
//!    source is moved onto its target; when both are present the target wins,
//!    the source is dropped and one `alias conflict` warning names both keys
//!    and both values.
//! 4. Defaults fill keys that are absent or null.  `0`, `false` and `""` are
//!    explicit values and are kept.
//! 5. Required keys still absent or null are reported in `missing_keys`.
//!
//! Normalizing an already-normalized map is a fixed point: same parameters,
//! no warnings.

use std::collections::BTreeMap;

use bastion_types::ParamMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// How the dispatcher may route a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Leaf first, legacy handler as fallback.
    None,
    /// Leaf only when the registry reports it routable.
    Guarded,
    /// Never look up a leaf; legacy handler only.
    HandlerOnly,
}

/// Rename `source` to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasRule {
    pub source: &'static str,
    pub target: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeprecatedKey {
    pub key: &'static str,
    /// Appended to the warning.
    pub hint: &'static str,
}

/// A default parameter value.  Kept as a tiny enum so the contract table can
/// live in a `static`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DefaultValue {
    Int(i64),
    Bool(bool),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            DefaultValue::Int(n) => Value::from(n),
            DefaultValue::Bool(b) => Value::Bool(b),
            DefaultValue::Str(s) => Value::from(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionContract {
    pub action_type: &'static str,
    pub leaf_name: &'static str,
    pub dispatch_mode: DispatchMode,
    pub aliases: &'static [AliasRule],
    pub deprecated: &'static [DeprecatedKey],
    pub defaults: &'static [(&'static str, DefaultValue)],
    pub required: &'static [&'static str],
}

/// Result of [`normalize_action_params`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationResult {
    pub params: ParamMap,
    pub warnings: Vec<String>,
    pub missing_keys: Vec<String>,
}

impl NormalizationResult {
    pub fn is_complete(&self) -> bool {
        self.missing_keys.is_empty()
    }
}

/// Action types that drive the locomotion actuator and therefore need the
/// navigation lease.
const NAVIGATION_ACTIONS: [&str; 4] = ["navigate", "move_forward", "explore", "find_shelter"];

const fn alias(source: &'static str, target: &'static str) -> AliasRule {
    AliasRule { source, target }
}

const fn deprecated(key: &'static str, hint: &'static str) -> DeprecatedKey {
    DeprecatedKey { key, hint }
}

use DefaultValue::{Bool, Int, Str};

static CONTRACTS: &[ActionContract] = &[
    ActionContract {
        action_type: "acquire_material",
        leaf_name: "acquire_material",
        dispatch_mode: DispatchMode::None,
        aliases: &[
            alias("blockType", "item"),
            alias("block_type", "item"),
            alias("material", "item"),
            alias("quantity", "count"),
        ],
        deprecated: &[deprecated("useTool", "tool selection is automatic")],
        defaults: &[("count", Int(1))],
        required: &["item"],
    },
    ActionContract {
        action_type: "place_block",
        leaf_name: "place_block",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("block_type", "item"), alias("blockType", "item")],
        deprecated: &[deprecated("placeAt", "placement is chosen by the leaf")],
        defaults: &[("count", Int(1))],
        required: &["item"],
    },
    ActionContract {
        action_type: "dig_block",
        leaf_name: "dig_block",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("pos", "position"), alias("target", "position")],
        deprecated: &[],
        defaults: &[("tool", Str("auto"))],
        required: &["position"],
    },
    ActionContract {
        action_type: "craft_recipe",
        leaf_name: "craft_recipe",
        dispatch_mode: DispatchMode::None,
        aliases: &[
            alias("item", "recipe"),
            alias("itemName", "recipe"),
            alias("quantity", "qty"),
        ],
        deprecated: &[deprecated("table", "crafting tables are located automatically")],
        defaults: &[("qty", Int(1))],
        required: &["recipe"],
    },
    ActionContract {
        action_type: "smelt",
        leaf_name: "smelt",
        dispatch_mode: DispatchMode::Guarded,
        aliases: &[alias("item", "input"), alias("quantity", "qty")],
        deprecated: &[],
        defaults: &[("qty", Int(1)), ("fuel", Str("auto"))],
        required: &["input"],
    },
    ActionContract {
        action_type: "collect_items",
        leaf_name: "collect_items",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("item", "itemName"), alias("range", "radius")],
        deprecated: &[],
        defaults: &[("radius", Int(8)), ("exploreOnFail", Bool(true))],
        required: &[],
    },
    ActionContract {
        action_type: "navigate",
        leaf_name: "navigate",
        dispatch_mode: DispatchMode::None,
        aliases: &[
            alias("pos", "target"),
            alias("destination", "target"),
            alias("goal", "target"),
        ],
        deprecated: &[deprecated("pathfinder", "path planning is owned by the leaf")],
        defaults: &[("range", Int(1)), ("sprint", Bool(false))],
        required: &["target"],
    },
    ActionContract {
        action_type: "move_forward",
        leaf_name: "move_forward",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("blocks", "distance")],
        deprecated: &[],
        defaults: &[("distance", Int(3))],
        required: &[],
    },
    ActionContract {
        action_type: "explore",
        leaf_name: "navigate",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("radius", "distance")],
        deprecated: &[],
        defaults: &[
            ("distance", Int(24)),
            ("scope", Str("explore")),
            ("purpose", Str("resources")),
            ("range", Int(2)),
            ("sprint", Bool(false)),
        ],
        required: &[],
    },
    ActionContract {
        action_type: "find_shelter",
        leaf_name: "find_shelter",
        dispatch_mode: DispatchMode::None,
        aliases: &[],
        deprecated: &[],
        defaults: &[("urgency", Str("normal")), ("radius", Int(16))],
        required: &[],
    },
    ActionContract {
        action_type: "equip_weapon",
        leaf_name: "equip_weapon",
        dispatch_mode: DispatchMode::None,
        aliases: &[alias("weapon", "preference")],
        deprecated: &[],
        defaults: &[("preference", Str("best"))],
        required: &[],
    },
    ActionContract {
        action_type: "attack_entity",
        leaf_name: "attack_entity",
        dispatch_mode: DispatchMode::None,
        aliases: &[
            alias("entity", "entityId"),
            alias("target", "entityId"),
            alias("entity_id", "entityId"),
        ],
        deprecated: &[],
        defaults: &[("maxDuration", Int(10_000))],
        required: &["entityId"],
    },
    ActionContract {
        action_type: "consume_food",
        leaf_name: "consume_food",
        dispatch_mode: DispatchMode::Guarded,
        aliases: &[alias("item", "food")],
        deprecated: &[],
        defaults: &[("food", Str("any"))],
        required: &[],
    },
    ActionContract {
        action_type: "sense_hostiles",
        leaf_name: "sense_hostiles",
        dispatch_mode: DispatchMode::Guarded,
        aliases: &[alias("range", "radius")],
        deprecated: &[],
        defaults: &[("radius", Int(16))],
        required: &[],
    },
    ActionContract {
        action_type: "chat",
        leaf_name: "chat",
        dispatch_mode: DispatchMode::HandlerOnly,
        aliases: &[alias("text", "message"), alias("msg", "message")],
        deprecated: &[],
        defaults: &[],
        required: &["message"],
    },
    ActionContract {
        action_type: "wait",
        leaf_name: "wait",
        dispatch_mode: DispatchMode::HandlerOnly,
        aliases: &[alias("duration", "ms")],
        deprecated: &[],
        defaults: &[("ms", Int(1000))],
        required: &[],
    },
];

// ─────────────────────────────────────────────────────────────────────────────
// Lookup
// ─────────────────────────────────────────────────────────────────────────────

pub fn contract_for(action_type: &str) -> Option<&'static ActionContract> {
    CONTRACTS.iter().find(|c| c.action_type == action_type)
}

/// Leaf implementing `action_type`, or `None` for unknown types.
pub fn resolve_leaf_name(action_type: &str) -> Option<&'static str> {
    contract_for(action_type).map(|c| c.leaf_name)
}

/// Every registered action type, in table order.
pub fn action_types() -> impl Iterator<Item = &'static str> {
    CONTRACTS.iter().map(|c| c.action_type)
}

/// `{action type → leaf name}` for every registered type.
pub fn build_action_type_to_leaf_map() -> BTreeMap<String, String> {
    CONTRACTS
        .iter()
        .map(|c| (c.action_type.to_string(), c.leaf_name.to_string()))
        .collect()
}

pub fn is_navigation_action(action_type: &str) -> bool {
    NAVIGATION_ACTIONS.contains(&action_type)
}

// ─────────────────────────────────────────────────────────────────────────────
// Normalization
// ─────────────────────────────────────────────────────────────────────────────

fn is_present(params: &ParamMap, key: &str) -> bool {
    params.get(key).is_some_and(|v| !v.is_null())
}

pub fn normalize_action_params(action_type: &str, raw: &ParamMap) -> NormalizationResult {
    let mut params = raw.clone();
    let Some(contract) = contract_for(action_type) else {
        return NormalizationResult {
            params,
            ..Default::default()
        };
    };
    let mut warnings = Vec::new();

    for dep in contract.deprecated {
        if is_present(&params, dep.key) {
            params.remove(dep.key);
            debug!(action_type, key = dep.key, "deprecated parameter removed");
            warnings.push(format!(
                "{action_type}: deprecated parameter '{}' removed ({})",
                dep.key, dep.hint
            ));
        }
    }

    for rule in contract.aliases {
        if !is_present(&params, rule.source) {
            continue;
        }
        if is_present(&params, rule.target) {
            let dropped = params.remove(rule.source).unwrap_or(Value::Null);
            let kept = params.get(rule.target).cloned().unwrap_or(Value::Null);
            debug!(
                action_type,
                source = rule.source,
                target = rule.target,
                "alias conflict"
            );
            warnings.push(format!(
                "{action_type}: alias conflict: '{}'={} ignored, '{}'={} kept",
                rule.source, dropped, rule.target, kept
            ));
        } else if let Some(value) = params.remove(rule.source) {
            params.insert(rule.target.to_string(), value);
        }
    }

    for (key, default) in contract.defaults {
        if !is_present(&params, key) {
            params.insert((*key).to_string(), default.to_value());
        }
    }

    let missing_keys = contract
        .required
        .iter()
        .filter(|k| !is_present(&params, k))
        .map(|k| (*k).to_string())
        .collect();

    NormalizationResult {
        params,
        warnings,
        missing_keys,
    }
}
