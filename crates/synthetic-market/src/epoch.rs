//! Long-horizon price levels.
//!
//! Once the scripted timeline (phases and overlay windows) is over, bars are
//! walked in epochs of [`EPOCH_BARS`]. The close at every epoch boundary comes
//! from a seeded Brownian path refined by midpoint displacement, so any
//! boundary is reached in a fixed number of steps however far it lies from the
//! anchor. Inside an epoch the walk is steered onto the next boundary level
//! while every bar return stays within the per-bar bound.

use market_core::round_price;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::seed::{splitmix64, SeedDeriver};

/// Bars per epoch.
pub const EPOCH_BARS: i64 = 1024;

/// Ceiling for boundary levels; a long trend saturates here instead of overflowing.
pub const MAX_LEVEL: f64 = 1_000_000.0;

/// The level path spans `2^LEVEL_TREE_DEPTH` epochs.
const LEVEL_TREE_DEPTH: u32 = 32;
const LEVEL_STREAM_SALT: u64 = 0x6C65_7665_6C00_0000;
const Z_CLAMP: f64 = 6.0;

/// Seeded log-price path sampled at epoch boundaries
#[derive(Debug, Clone, Copy)]
pub struct LevelPath {
    seeds: SeedDeriver,
    origin: f64,
    /// Log drift per epoch
    drift: f64,
    /// Log standard deviation per epoch
    spread: f64,
}

impl LevelPath {
    /// `origin` is the close before epoch 0; `sigma` and `drift` are per bar.
    pub fn new(seeds: SeedDeriver, origin: f64, sigma: f64, drift: f64) -> Self {
        let bars = EPOCH_BARS as f64;
        Self {
            seeds,
            origin,
            drift: drift * bars,
            spread: sigma.max(0.0) * bars.sqrt(),
        }
    }

    /// Close of the last bar before `epoch` starts.
    pub fn level(&self, epoch: u64) -> f64 {
        if epoch == 0 {
            return self.origin;
        }
        round_price((self.origin * self.offset(epoch).exp()).min(MAX_LEVEL))
    }

    /// Log offset from the origin at boundary `epoch`.
    ///
    /// The far end of the path is drawn first; each midpoint is then drawn
    /// from the Brownian bridge between its neighbours, descending toward
    /// `epoch`.
    fn offset(&self, epoch: u64) -> f64 {
        let mut lo = 0u64;
        let mut hi = 1u64 << LEVEL_TREE_DEPTH;
        let epoch = epoch.min(hi);

        let span = hi as f64;
        let mut w_lo = 0.0;
        let mut w_hi = self.drift * span + self.spread * span.sqrt() * self.node_z(0, 0);

        while epoch != lo && epoch != hi {
            let mid = lo + (hi - lo) / 2;
            let span = (hi - lo) as f64;
            let w_mid =
                0.5 * (w_lo + w_hi) + 0.5 * self.spread * span.sqrt() * self.node_z(lo, hi);
            if epoch < mid {
                hi = mid;
                w_hi = w_mid;
            } else {
                lo = mid;
                w_lo = w_mid;
            }
        }

        if epoch == lo {
            w_lo
        } else {
            w_hi
        }
    }

    fn node_z(&self, lo: u64, hi: u64) -> f64 {
        let node = splitmix64(lo ^ splitmix64(hi));
        let z: f64 = self
            .seeds
            .stream_rng(LEVEL_STREAM_SALT ^ node)
            .sample(StandardNormal);
        z.clamp(-Z_CLAMP, Z_CLAMP)
    }
}

/// Keeps one epoch's walk on course for the level at its end.
///
/// Before each bar the remaining distance to the target must be coverable by
/// the bars left at the per-bar bound; a bar's return is clamped so that stays
/// true, and the final bar closes exactly on the target.
#[derive(Debug, Clone, Copy)]
pub struct EpochBridge {
    target: f64,
    /// `ln(1 + max_return)`
    up: f64,
    /// `ln(1 - max_return)`
    down: f64,
}

impl EpochBridge {
    pub fn new(target: f64, max_return: f64) -> Self {
        let max_return = max_return.clamp(1e-6, 0.99);
        Self {
            target,
            up: max_return.ln_1p(),
            down: (-max_return).ln_1p(),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// `gap` if the target stays reachable after it, otherwise no gap.
    ///
    /// `remaining` counts the bars left in the epoch, this one included.
    pub fn admit_gap(&self, prev_close: f64, gap: f64, remaining: i64) -> f64 {
        if gap == 0.0 {
            return 0.0;
        }
        let rem = remaining as f64;
        let after = self.distance(prev_close * (1.0 + gap));
        if after >= rem * self.down && after <= rem * self.up {
            gap
        } else {
            0.0
        }
    }

    /// Return for a bar opening at `open`.
    ///
    /// Adds a bridge pull toward the target to `bar_return` (less the drift
    /// the target already includes), then clamps to what keeps the target in
    /// reach.
    pub fn steer(&self, open: f64, bar_return: f64, drift: f64, remaining: i64) -> f64 {
        let distance = self.distance(open);
        if remaining <= 1 {
            return self.target / open - 1.0;
        }

        let rem = remaining as f64;
        let candidate = bar_return.ln_1p() + distance / rem - drift;
        let lo = self.down.max(distance - (rem - 1.0) * self.up);
        let hi = self.up.min(distance - (rem - 1.0) * self.down);
        let log_return = if lo <= hi {
            candidate.clamp(lo, hi)
        } else {
            candidate.clamp(self.down, self.up)
        };
        log_return.exp_m1()
    }

    fn distance(&self, price: f64) -> f64 {
        (self.target / price).ln()
    }
}
