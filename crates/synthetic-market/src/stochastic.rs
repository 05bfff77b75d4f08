use rand::Rng;
use rand_distr::StandardNormal;

use crate::regime::EffectiveParameters;

/// Largest |z| accepted from the normal draw.
const Z_CLAMP: f64 = 6.0;

/// Every random number a bar consumes, drawn up front in a fixed order.
///
/// Drawing everything before use keeps the stream layout stable: a branch that
/// skips a draw (no fat tail, no gap) cannot shift the values seen later.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarDraws {
    pub z: f64,
    pub fat_tail_u: f64,
    pub fat_tail_factor_u: f64,
    pub gap_u: f64,
    pub gap_size_u: f64,
    pub gap_sign_u: f64,
    pub high_u: f64,
    pub low_u: f64,
    pub volume_u: f64,
}

impl BarDraws {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let z: f64 = rng.sample(StandardNormal);
        Self {
            z: z.clamp(-Z_CLAMP, Z_CLAMP),
            fat_tail_u: rng.gen(),
            fat_tail_factor_u: rng.gen(),
            gap_u: rng.gen(),
            gap_size_u: rng.gen(),
            gap_sign_u: rng.gen(),
            high_u: rng.gen(),
            low_u: rng.gen(),
            volume_u: rng.gen(),
        }
    }
}

/// Return-pipeline bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnLimits {
    pub max_return_per_bar: f64,
    pub fat_tail_min: f64,
    pub fat_tail_max: f64,
}

impl Default for ReturnLimits {
    fn default() -> Self {
        Self {
            max_return_per_bar: 0.02,
            fat_tail_min: 2.0,
            fat_tail_max: 4.0,
        }
    }
}

/// Overnight gap settings of a scenario
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapSettings {
    pub probability: f64,
    pub min_pct: f64,
    pub max_pct: f64,
}

/// Outcome of the return pipeline for one bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarReturn {
    pub value: f64,
    pub fat_tail: bool,
}

/// Produces per-bar returns from regime parameters and pre-drawn randomness.
///
/// Pure: identical inputs always give bit-identical outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StochasticBarGenerator {
    limits: ReturnLimits,
}

impl StochasticBarGenerator {
    pub fn new(limits: ReturnLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ReturnLimits {
        &self.limits
    }

    /// noise + drift + mean reversion, optionally fat-tailed, clamped.
    ///
    /// `reference` is the EMA of recent closes the mean-reversion term pulls
    /// toward.
    pub fn bar_return(
        &self,
        params: &EffectiveParameters,
        draws: &BarDraws,
        prev_close: f64,
        reference: f64,
    ) -> BarReturn {
        let mut r = params.sigma * draws.z + params.drift;

        if params.mean_reversion > 0.0 && reference > 0.0 && prev_close.is_finite() {
            r -= params.mean_reversion * (prev_close - reference) / reference;
        }

        let fat_tail = draws.fat_tail_u < params.fat_tail_probability;
        if fat_tail {
            let span = self.limits.fat_tail_max - self.limits.fat_tail_min;
            r *= self.limits.fat_tail_min + span * draws.fat_tail_factor_u;
        }

        BarReturn {
            value: self.clamp_return(r),
            fat_tail,
        }
    }

    pub fn clamp_return(&self, r: f64) -> f64 {
        if !r.is_finite() {
            return 0.0;
        }
        let max = self.limits.max_return_per_bar;
        r.clamp(-max, max)
    }

    /// Overnight gap for a bar that contains the session open.
    pub fn session_gap(
        &self,
        params: &EffectiveParameters,
        gaps: &GapSettings,
        draws: &BarDraws,
    ) -> Option<f64> {
        let probability = (gaps.probability * params.gap_probability_modifier).clamp(0.0, 1.0);
        if draws.gap_u >= probability {
            return None;
        }
        let size = gaps.min_pct + (gaps.max_pct - gaps.min_pct) * draws.gap_size_u;
        let sign = if draws.gap_sign_u < 0.5 { -1.0 } else { 1.0 };
        Some(sign * size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::{RegimeKind, RegimePhase, RegimeScheduler};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn params(regime: RegimeKind) -> EffectiveParameters {
        RegimeScheduler::new(vec![RegimePhase::new(regime, 10)], 0.01)
            .unwrap()
            .resolve(0)
            .params
    }

    fn draws(z: f64) -> BarDraws {
        BarDraws {
            z,
            fat_tail_u: 0.99,
            fat_tail_factor_u: 0.5,
            gap_u: 0.99,
            gap_size_u: 0.5,
            gap_sign_u: 0.7,
            high_u: 0.5,
            low_u: 0.5,
            volume_u: 0.5,
        }
    }

    #[test]
    fn test_draws_reproducible() {
        let a = BarDraws::sample(&mut ChaCha8Rng::seed_from_u64(7));
        let b = BarDraws::sample(&mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
        assert!(a.z.abs() <= Z_CLAMP);
    }

    #[test]
    fn test_return_is_noise_plus_drift() {
        let generator = StochasticBarGenerator::default();
        let p = params(RegimeKind::TrendUp);
        let r = generator.bar_return(&p, &draws(0.5), 100.0, 100.0);
        assert!((r.value - (0.01 * 0.5 + 0.0008)).abs() < 1e-12);
        assert!(!r.fat_tail);
    }

    #[test]
    fn test_mean_reversion_pulls_toward_reference() {
        let generator = StochasticBarGenerator::default();
        let p = params(RegimeKind::Range);
        let above = generator.bar_return(&p, &draws(0.0), 105.0, 100.0);
        let below = generator.bar_return(&p, &draws(0.0), 95.0, 100.0);
        assert!(above.value < 0.0);
        assert!(below.value > 0.0);
    }

    #[test]
    fn test_fat_tail_amplifies() {
        let generator = StochasticBarGenerator::default();
        let p = params(RegimeKind::Range);
        let mut d = draws(0.5);
        d.fat_tail_u = 0.0;
        let r = generator.bar_return(&p, &d, 100.0, 100.0);
        assert!(r.fat_tail);
        assert!((r.value - 0.008 * 0.5 * 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_returns_clamped() {
        let generator = StochasticBarGenerator::default();
        let p = params(RegimeKind::NewsSpike);
        let r = generator.bar_return(&p, &draws(6.0), 100.0, 100.0);
        assert_eq!(r.value, 0.02);
        assert_eq!(generator.clamp_return(f64::NAN), 0.0);
    }

    #[test]
    fn test_session_gap() {
        let generator = StochasticBarGenerator::default();
        let p = params(RegimeKind::TrendUp);
        let gaps = GapSettings {
            probability: 0.5,
            min_pct: 0.01,
            max_pct: 0.03,
        };
        let mut d = draws(0.0);
        assert_eq!(generator.session_gap(&p, &gaps, &d), None);

        d.gap_u = 0.1;
        let gap = generator.session_gap(&p, &gaps, &d).unwrap();
        assert!((gap - 0.02).abs() < 1e-12);

        let no_gaps = GapSettings {
            probability: 0.0,
            ..gaps
        };
        d.gap_u = 0.0;
        assert_eq!(generator.session_gap(&p, &no_gaps, &d), None);
    }
}
