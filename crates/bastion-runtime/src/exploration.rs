//! Deterministic exploration headings.
//!
//! An `explore` request without an explicit target walks `distance` blocks
//! along a heading derived from [`exploration_seed_hash`].  The hash key
//! combines the exploration scope, its purpose, the agent's block position
//! and the distance, so the same situation always picks the same heading,
//! while moving, changing purpose or appending a retry counter rotates it
//! away from a dead end.

use std::f64::consts::TAU;
use std::fmt;

use bastion_types::Vec3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Composite hash key `"{scope}:{purpose}:{x}:{z}:{distance}[:retry:{n}]"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExplorationKey {
    pub scope: String,
    pub purpose: String,
    /// Block coordinates.
    pub x: i64,
    pub z: i64,
    pub distance: i64,
    pub retry: Option<u32>,
}

impl ExplorationKey {
    /// Key for an agent standing at `origin`; coordinates and distance are
    /// rounded to whole blocks.
    pub fn new(
        scope: impl Into<String>,
        purpose: impl Into<String>,
        origin: Vec3,
        distance: f64,
    ) -> Self {
        Self {
            scope: scope.into(),
            purpose: purpose.into(),
            x: origin.x.round() as i64,
            z: origin.z.round() as i64,
            distance: distance.round() as i64,
            retry: None,
        }
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = Some(retry);
        self
    }
}

impl fmt::Display for ExplorationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.scope, self.purpose, self.x, self.z, self.distance
        )?;
        if let Some(n) = self.retry {
            write!(f, ":retry:{n}")?;
        }
        Ok(())
    }
}

/// Map `key` to a uniform value in `[0, 1)`.
///
/// FNV-1a over the key's bytes, then the splitmix64 finalizer so nearby
/// keys land far apart.  The top 53 bits become the mantissa.
pub fn exploration_seed_hash(key: &ExplorationKey) -> f64 {
    let mut h = FNV_OFFSET;
    for byte in key.to_string().bytes() {
        h ^= u64::from(byte);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h ^= h >> 30;
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^= h >> 27;
    h = h.wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^= h >> 31;
    (h >> 11) as f64 / (1u64 << 53) as f64
}

/// Point `distance` blocks from `origin` along heading `seed · 2π` in the
/// horizontal plane.  `y` is kept.
pub fn exploration_target(origin: Vec3, distance: f64, seed: f64) -> Vec3 {
    let theta = seed * TAU;
    Vec3::new(
        origin.x + distance * theta.cos(),
        origin.y,
        origin.z + distance * theta.sin(),
    )
}
