//! Diagnostics for `collect_items`.
//!
//! A collection attempt can fail for reasons that look identical from the
//! outside: nothing was on the ground, the pathfinder never found a route,
//! the agent never moved at all.  The `collect_items` leaf reports what it
//! observed; [`CollectDiagnostics::from_report`] condenses that into a
//! versioned structure with a single [`ReasonCode`].
//!
//! Leaf report shape (all fields optional):
//!
//! ```json
//! {
//!   "scan": { "items": [ { "name": "oak_log", "distance": 4.27 } ] },
//!   "exploration": {
//!     "waypointsPlanned": 3,
//!     "pathRequests": 3,
//!     "pathSuccesses": 2,
//!     "durationMs": 4210.5,
//!     "timedOut": false
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DIAGNOSTICS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    CollectedOk,
    MovementNotExecuted,
    PathfinderFailed,
    Timeout,
    NoItemEntities,
}

/// Pick the reason code.  A successful collection is `CollectedOk` whatever
/// the counters say.  Otherwise precedence is strict: no path requests wins,
/// then no successful path, then timeout.
pub fn reason_code(
    path_requests: u32,
    path_successes: u32,
    timed_out: bool,
    collected: bool,
) -> ReasonCode {
    if collected {
        ReasonCode::CollectedOk
    } else if path_requests == 0 {
        ReasonCode::MovementNotExecuted
    } else if path_successes == 0 {
        ReasonCode::PathfinderFailed
    } else if timed_out {
        ReasonCode::Timeout
    } else {
        ReasonCode::NoItemEntities
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub items_seen: u32,
    /// Distinct item types, sorted.
    pub item_types: Vec<String>,
    /// Closest item, rounded to 0.1 blocks.
    pub closest_item_distance: Option<f64>,
}

impl ScanStats {
    /// Items without a usable distance still count as seen.
    pub fn from_items<'a>(items: impl IntoIterator<Item = (&'a str, Option<f64>)>) -> Self {
        let mut seen = 0u32;
        let mut types: Vec<String> = Vec::new();
        let mut closest: Option<f64> = None;
        for (name, distance) in items {
            seen += 1;
            if !types.iter().any(|t| t == name) {
                types.push(name.to_string());
            }
            if let Some(d) = distance.filter(|d| d.is_finite()) {
                closest = Some(closest.map_or(d, |c| c.min(d)));
            }
        }
        types.sort();
        Self {
            items_seen: seen,
            item_types: types,
            closest_item_distance: closest.map(|d| (d * 10.0).round() / 10.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplorationStats {
    pub waypoints_planned: u32,
    pub waypoints_reached: u32,
    pub path_requests: u32,
    pub path_successes: u32,
    pub path_failures: u32,
    pub net_displacement: f64,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExplorationStats {
    /// Read the leaf's `exploration` section field by field.  A missing or
    /// mistyped field reads as zero without touching the others; fractional
    /// counts are rounded.
    pub fn from_section(section: &Value) -> Self {
        Self {
            waypoints_planned: count(section, "waypointsPlanned"),
            waypoints_reached: count(section, "waypointsReached"),
            path_requests: count(section, "pathRequests"),
            path_successes: count(section, "pathSuccesses"),
            path_failures: count(section, "pathFailures"),
            net_displacement: section
                .get("netDisplacement")
                .and_then(Value::as_f64)
                .filter(|d| d.is_finite())
                .unwrap_or(0.0),
            duration_ms: non_negative(section, "durationMs").map_or(0, |v| v as u64),
            timed_out: section.get("timedOut").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

fn non_negative(section: &Value, key: &str) -> Option<f64> {
    section
        .get(key)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(f64::round)
}

fn count(section: &Value, key: &str) -> u32 {
    non_negative(section, key).map_or(0, |v| v.min(u32::MAX as f64) as u32)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectDiagnostics {
    pub version: u32,
    pub scan: ScanStats,
    pub exploration: ExplorationStats,
    #[serde(rename = "reason_code")]
    pub reason_code: ReasonCode,
}

impl CollectDiagnostics {
    pub fn new(scan: ScanStats, exploration: ExplorationStats, collected: bool) -> Self {
        let reason_code = reason_code(
            exploration.path_requests,
            exploration.path_successes,
            exploration.timed_out,
            collected,
        );
        Self {
            version: DIAGNOSTICS_VERSION,
            scan,
            exploration,
            reason_code,
        }
    }

    /// Build from a leaf's `result` payload.  Missing sections count as
    /// empty; items without a `name` are skipped.
    pub fn from_report(report: Option<&Value>, collected: bool) -> Self {
        let items = report
            .and_then(|r| r.pointer("/scan/items"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let scan = ScanStats::from_items(items.iter().filter_map(|item| {
            let name = item.get("name")?.as_str()?;
            Some((name, item.get("distance").and_then(Value::as_f64)))
        }));
        let exploration = report
            .and_then(|r| r.get("exploration"))
            .map(ExplorationStats::from_section)
            .unwrap_or_default();
        Self::new(scan, exploration, collected)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
