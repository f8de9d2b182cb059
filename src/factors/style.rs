//! Offensive and defensive profile collisions.

use super::{require, Confidence, FactorCalculator, FactorCategory, FactorSignal, MissingInput};
use crate::data::{DataField, GameContext, Side, SourceTier, TeamStats};

/// Matchup-level collision of offensive and defensive profiles.
pub struct StyleMismatch;

const SUCCESS_WEIGHT: f64 = 2.0;
const EXPLOSIVENESS_WEIGHT: f64 = 1.5;
const PACE_WEIGHT: f64 = 1.2;
const EFFICIENCY_WEIGHT: f64 = 1.0;
const HAVOC_WEIGHT: f64 = 0.8;
const WEIGHT_TOTAL: f64 = 6.0;

/// Net success-rate edge: each offense against the other defense.
pub fn success_mismatch(home: &TeamStats, away: &TeamStats) -> f64 {
    let edge = (home.success_rate_off - away.success_rate_def)
        - (away.success_rate_off - home.success_rate_def);
    if edge.abs() > 0.05 {
        edge * 8.0
    } else {
        0.0
    }
}

/// Big-play edge, plus an underdog nudge when both sides are explosive
/// enough to make the game high-variance.
pub fn explosiveness_mismatch(home: &TeamStats, away: &TeamStats) -> f64 {
    let edge = (home.explosiveness_off - away.explosiveness_def)
        - (away.explosiveness_off - home.explosiveness_def);
    let mut parts = Vec::with_capacity(2);
    if edge.abs() > 0.5 {
        parts.push(edge * 1.5);
    }
    if home.explosiveness_off + away.explosiveness_off > 3.0 {
        parts.push(if edge > 0.0 { -0.3 } else { 0.3 });
    }
    if parts.is_empty() {
        0.0
    } else {
        parts.iter().sum::<f64>() / parts.len() as f64
    }
}

/// The slower team controls a lopsided tempo matchup.
pub fn pace_mismatch(home: &TeamStats, away: &TeamStats) -> f64 {
    if (home.plays_per_game - away.plays_per_game).abs() <= 10.0 {
        0.0
    } else if home.plays_per_game < away.plays_per_game {
        0.5
    } else {
        -0.5
    }
}

pub fn efficiency_mismatch(home: &TeamStats, away: &TeamStats) -> f64 {
    let home_edge = home.points_per_game - away.points_allowed_per_game;
    let away_edge = away.points_per_game - home.points_allowed_per_game;
    (home_edge - away_edge) * 0.1
}

/// Chaos helps the underdog, which for this purpose is the visitor.
pub fn havoc_mismatch(home: &TeamStats, away: &TeamStats) -> f64 {
    if (home.havoc_rate + away.havoc_rate) / 2.0 > 0.20 {
        -0.3
    } else if home.havoc_rate > away.havoc_rate * 1.3 {
        0.5
    } else if away.havoc_rate > home.havoc_rate * 1.3 {
        -0.5
    } else {
        0.0
    }
}

impl FactorCalculator for StyleMismatch {
    fn name(&self) -> &'static str {
        "style_mismatch"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.30
    }
    fn output_range(&self) -> (f64, f64) {
        (-4.0, 4.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.05
    }

    fn evaluate(
        &self,
        _home: &str,
        _away: &str,
        ctx: &GameContext,
    ) -> Result<FactorSignal, MissingInput> {
        let fields = [DataField::Stats(Side::Home), DataField::Stats(Side::Away)];
        require(ctx, &fields)?;

        let (h, a) = (&ctx.home.stats, &ctx.away.stats);
        let success = success_mismatch(h, a);
        let explosive = explosiveness_mismatch(h, a);
        let pace = pace_mismatch(h, a);
        let efficiency = efficiency_mismatch(h, a);
        let havoc = havoc_mismatch(h, a);

        let value = (success * SUCCESS_WEIGHT
            + explosive * EXPLOSIVENESS_WEIGHT
            + pace * PACE_WEIGHT
            + efficiency * EFFICIENCY_WEIGHT
            + havoc * HAVOC_WEIGHT)
            / WEIGHT_TOTAL;

        // the fallback source carries no efficiency metrics
        let confidence = if fields.iter().all(|f| ctx.tier(*f) == SourceTier::Primary) {
            Confidence::High
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new(value, confidence).because(format!(
            "success {:+.2}, explosiveness {:+.2}, pace {:+.2}, efficiency {:+.2}, havoc {:+.2}",
            success, explosive, pace, efficiency, havoc
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::testing::context;
    use crate::factors::FactorOutcome;
    use approx::assert_relative_eq;

    #[test]
    fn test_mirror_matchup_is_quiet() {
        let r = StyleMismatch.calculate("Home", "Away", &context(6));
        assert_eq!(r.raw_value, 0.0);
        assert_eq!(r.outcome, FactorOutcome::BelowThreshold);
    }

    #[test]
    fn test_component_formulas() {
        let mut h = TeamStats::neutral();
        let mut a = TeamStats::neutral();
        h.success_rate_off = 0.50;
        a.success_rate_def = 0.42;
        // (0.50-0.42) - (0.40-0.40) = 0.08 → 0.64
        assert_relative_eq!(success_mismatch(&h, &a), 0.64, epsilon = 1e-12);

        h.plays_per_game = 60.0;
        a.plays_per_game = 75.0;
        assert_relative_eq!(pace_mismatch(&h, &a), 0.5);

        h.havoc_rate = 0.10;
        a.havoc_rate = 0.14;
        assert_relative_eq!(havoc_mismatch(&h, &a), -0.5);

        h.explosiveness_off = 2.0;
        a.explosiveness_off = 1.5;
        // edge (2.0-1.0)-(1.5-1.0) = 0.5, not > 0.5; combined 3.5 > 3.0
        assert_relative_eq!(explosiveness_mismatch(&h, &a), -0.3);
    }

    #[test]
    fn test_dominant_home_profile() {
        let mut ctx = context(6);
        ctx.home.stats.success_rate_off = 0.60;
        ctx.home.stats.success_rate_def = 0.50;
        ctx.home.stats.points_per_game = 40.0;
        ctx.home.stats.points_allowed_per_game = 14.0;
        let r = StyleMismatch.calculate("Home", "Away", &ctx);
        assert!(r.raw_value > 0.5, "got {}", r.raw_value);
        assert_eq!(r.confidence, Confidence::High);
    }
}
