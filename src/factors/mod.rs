//! Human-factor signals and the contract every calculator shares.
//!
//! A calculator only *evaluates*: it reads the game context and proposes a
//! signed point value (positive favors the home side against the spread)
//! with a self-assessed confidence. The provided
//! [`FactorCalculator::calculate`] turns that proposal into a
//! [`FactorResult`] by applying, in order, the missing-input rule, the
//! finiteness check, the activation threshold and the declared output range.

pub mod coaching;
pub mod fatigue;
pub mod market;
pub mod momentum;
pub mod registry;
pub mod situational;
pub mod style;

pub use registry::{normalize_weights, CategoryShares, FactorRegistry, FactorTotals};

use serde::{Deserialize, Serialize};

use crate::data::{DataField, GameContext, SourceTier};

/// Ordinal self-assessment of a factor's reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub const ALL: [Confidence; 5] = [
        Confidence::None,
        Confidence::Low,
        Confidence::Medium,
        Confidence::High,
        Confidence::VeryHigh,
    ];

    /// Share of a factor's weighted value that reaches the total. Never 1.0:
    /// even a very-high-confidence factor is discounted.
    pub fn multiplier(self) -> f64 {
        match self {
            Confidence::None => 0.0,
            Confidence::Low => 0.25,
            Confidence::Medium => 0.5,
            Confidence::High => 0.75,
            Confidence::VeryHigh => 0.9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactorCategory {
    /// Additive, largest share
    Primary,
    /// Additive
    Secondary,
    /// Scales the additive total instead of adding to it
    Modifier,
}

impl FactorCategory {
    pub const ALL: [FactorCategory; 3] = [
        FactorCategory::Primary,
        FactorCategory::Secondary,
        FactorCategory::Modifier,
    ];

    pub fn is_additive(self) -> bool {
        !matches!(self, FactorCategory::Modifier)
    }
}

/// What happened when a calculator ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorOutcome {
    Active,
    BelowThreshold,
    MissingData,
    Failed,
}

/// Raw proposal from [`FactorCalculator::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct FactorSignal {
    pub value: f64,
    pub confidence: Confidence,
    pub reasoning: Vec<String>,
}

impl FactorSignal {
    pub fn new(value: f64, confidence: Confidence) -> Self {
        FactorSignal {
            value,
            confidence,
            reasoning: Vec::new(),
        }
    }

    pub fn because(mut self, reason: impl Into<String>) -> Self {
        self.reasoning.push(reason.into());
        self
    }
}

/// A required input was absent or defaulted.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingInput(pub String);

impl MissingInput {
    pub fn new(reason: impl Into<String>) -> Self {
        MissingInput(reason.into())
    }
}

/// Reject fields the data manager had to fill with neutral defaults.
pub fn require(ctx: &GameContext, fields: &[DataField]) -> Result<(), MissingInput> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|f| ctx.is_degraded(**f))
        .map(|f| f.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingInput(format!("defaulted inputs: {}", missing.join(", "))))
    }
}

/// High when every input came from the primary source, medium otherwise.
pub fn sourcing_confidence(ctx: &GameContext, fields: &[DataField]) -> Confidence {
    if fields.iter().all(|f| ctx.tier(*f) == SourceTier::Primary) {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactorResult {
    pub name: String,
    pub category: FactorCategory,
    /// Clamped to the calculator's declared range
    pub raw_value: f64,
    pub confidence: Confidence,
    /// Effective weight (category share × intra-category weight)
    pub weight: f64,
    /// `raw_value × weight × confidence multiplier`
    pub contribution: f64,
    pub outcome: FactorOutcome,
    pub reasoning: Vec<String>,
}

impl FactorResult {
    /// A zero-valued, NONE-confidence result.
    pub fn neutral(
        name: &str,
        category: FactorCategory,
        outcome: FactorOutcome,
        reason: impl Into<String>,
    ) -> Self {
        FactorResult {
            name: name.to_string(),
            category,
            raw_value: 0.0,
            confidence: Confidence::None,
            weight: 0.0,
            contribution: 0.0,
            outcome,
            reasoning: vec![reason.into()],
        }
    }

    /// Attach the registry-assigned weight and derive the contribution.
    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self.contribution = self.raw_value * weight * self.confidence.multiplier();
        self
    }

    pub fn is_active(&self) -> bool {
        self.outcome == FactorOutcome::Active && self.raw_value != 0.0
    }
}

pub trait FactorCalculator: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> FactorCategory;

    /// Intra-category weight before normalization.
    fn base_weight(&self) -> f64;

    /// Inclusive `(min, max)` bounds on `raw_value`.
    fn output_range(&self) -> (f64, f64);

    /// Pre-clamp magnitudes below this report exactly 0.0.
    fn activation_threshold(&self) -> f64;

    fn evaluate(
        &self,
        home: &str,
        away: &str,
        ctx: &GameContext,
    ) -> Result<FactorSignal, MissingInput>;

    fn calculate(&self, home: &str, away: &str, ctx: &GameContext) -> FactorResult {
        let name = self.name();
        let category = self.category();

        let signal = match self.evaluate(home, away, ctx) {
            Ok(signal) => signal,
            Err(MissingInput(reason)) => {
                return FactorResult::neutral(name, category, FactorOutcome::MissingData, reason)
            }
        };

        if !signal.value.is_finite() {
            return FactorResult::neutral(
                name,
                category,
                FactorOutcome::Failed,
                format!("non-finite output {}", signal.value),
            );
        }

        let threshold = self.activation_threshold();
        let mut reasoning = signal.reasoning;
        if signal.value.abs() < threshold {
            reasoning.push(format!(
                "{:+.2} below activation threshold {:.2}",
                signal.value, threshold
            ));
            return FactorResult {
                name: name.to_string(),
                category,
                raw_value: 0.0,
                confidence: Confidence::None,
                weight: 0.0,
                contribution: 0.0,
                outcome: FactorOutcome::BelowThreshold,
                reasoning,
            };
        }

        let (min, max) = self.output_range();
        let raw_value = signal.value.clamp(min, max);
        if raw_value != signal.value {
            reasoning.push(format!("clamped from {:+.2}", signal.value));
        }

        FactorResult {
            name: name.to_string(),
            category,
            raw_value,
            confidence: signal.confidence,
            weight: 0.0,
            contribution: 0.0,
            outcome: FactorOutcome::Active,
            reasoning,
        }
    }
}

/// The full production calculator set, in a fixed order.
pub fn default_calculators() -> Vec<Box<dyn FactorCalculator>> {
    vec![
        Box::new(fatigue::SchedulingFatigue),
        Box::new(coaching::ExperienceDifferential),
        Box::new(situational::DesperationIndex),
        Box::new(momentum::PointDifferentialTrends),
        Box::new(style::StyleMismatch),
        Box::new(coaching::VenuePerformance),
        Box::new(coaching::PressureSituation),
        Box::new(coaching::HeadToHeadRecord),
        Box::new(situational::LookaheadSandwich),
        Box::new(momentum::CloseGamePerformance),
        Box::new(market::MarketSentiment),
    ]
}


#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_multiplier_table_is_monotonic_and_below_one() {
        let values: Vec<f64> = Confidence::ALL.iter().map(|c| c.multiplier()).collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 0.9]);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert!(values.iter().all(|m| *m < 1.0));
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::None < Confidence::Low);
        assert!(Confidence::High < Confidence::VeryHigh);
    }

    struct Fixed {
        value: f64,
        missing: bool,
    }

    impl FactorCalculator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn category(&self) -> FactorCategory {
            FactorCategory::Secondary
        }
        fn base_weight(&self) -> f64 {
            1.0
        }
        fn output_range(&self) -> (f64, f64) {
            (-2.0, 2.0)
        }
        fn activation_threshold(&self) -> f64 {
            0.5
        }
        fn evaluate(&self, _: &str, _: &str, _: &GameContext) -> Result<FactorSignal, MissingInput> {
            if self.missing {
                return Err(MissingInput::new("no schedule"));
            }
            Ok(FactorSignal::new(self.value, Confidence::High).because("fixed"))
        }
    }

    fn run(value: f64, missing: bool) -> FactorResult {
        Fixed { value, missing }.calculate("H", "A", &context(6))
    }

    #[test]
    fn test_below_threshold_is_exactly_zero() {
        let r = run(0.49, false);
        assert_eq!(r.raw_value, 0.0);
        assert_eq!(r.confidence, Confidence::None);
        assert_eq!(r.outcome, FactorOutcome::BelowThreshold);
        assert!(!r.is_active());
    }

    #[test]
    fn test_output_clamped_to_range() {
        let r = run(7.3, false);
        assert_relative_eq!(r.raw_value, 2.0);
        assert!(r.reasoning.iter().any(|s| s.contains("clamped")));
        assert_relative_eq!(run(-9.0, false).raw_value, -2.0);
    }

    #[test]
    fn test_missing_input_is_none_and_zero() {
        let r = run(1.0, true);
        assert_eq!(r.raw_value, 0.0);
        assert_eq!(r.confidence, Confidence::None);
        assert_eq!(r.outcome, FactorOutcome::MissingData);
        assert_eq!(r.reasoning, vec!["no schedule".to_string()]);
    }

    #[test]
    fn test_non_finite_is_failure() {
        let r = run(f64::NAN, false);
        assert_eq!(r.outcome, FactorOutcome::Failed);
        assert_eq!(r.raw_value, 0.0);
        assert_eq!(run(f64::INFINITY, false).outcome, FactorOutcome::Failed);
    }

    #[test]
    fn test_weighted_contribution() {
        let r = run(1.2, false).weighted(0.2);
        assert_relative_eq!(r.contribution, 1.2 * 0.2 * 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_default_set_has_eleven_unique_calculators() {
        let calcs = default_calculators();
        assert_eq!(calcs.len(), 11);
        let mut names: Vec<_> = calcs.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 11);
        let modifiers = calcs
            .iter()
            .filter(|c| c.category() == FactorCategory::Modifier)
            .count();
        assert_eq!(modifiers, 1);
    }

    /// Every production calculator must stay in range on sourced, defaulted,
    /// and adversarial contexts.
    #[test]
    fn test_all_calculators_respect_declared_range() {
        let mut contexts = vec![context(1), context(6), context(14)];

        let mut defaulted = context(6);
        for f in DataField::ALL {
            testing::degrade(&mut defaulted, f);
        }
        defaulted.market = None;
        contexts.push(defaulted);

        let mut extreme = context(12);
        extreme.home.stats.success_rate_off = 1.0;
        extreme.home.stats.explosiveness_off = 50.0;
        extreme.away.stats.havoc_rate = 0.0;
        extreme.home.stats.points_per_game = 1e6;
        extreme.home.coaching.experience_years = 0;
        extreme.away.coaching.experience_years = 60;
        extreme.matchup.home_wins = 1000;
        if let Some(m) = extreme.market.as_mut() {
            m.dispersion = 99.0;
            m.spread = -60.0;
            m.book_count = 40;
        }
        contexts.push(extreme);

        for ctx in &contexts {
            for calc in default_calculators() {
                let r = calc.calculate("Home", "Away", ctx);
                let (min, max) = calc.output_range();
                assert!(
                    r.raw_value >= min && r.raw_value <= max,
                    "{} produced {} outside [{}, {}]",
                    r.name,
                    r.raw_value,
                    min,
                    max
                );
                assert!(r.raw_value.is_finite());
            }
        }
    }

    #[test]
    fn test_defaulted_context_yields_none_everywhere() {
        let mut ctx = context(6);
        for f in DataField::ALL {
            testing::degrade(&mut ctx, f);
        }
        ctx.market = None;
        for calc in default_calculators() {
            let r = calc.calculate("Home", "Away", &ctx);
            assert_eq!(r.confidence, Confidence::None, "{}", r.name);
            assert_eq!(r.raw_value, 0.0, "{}", r.name);
        }
    }
}
