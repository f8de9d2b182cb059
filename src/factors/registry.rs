//! Owns the calculator set, keeps its weights normalized and folds the
//! individual results into category totals.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, error, warn};

use super::{
    default_calculators, Confidence, FactorCalculator, FactorCategory, FactorOutcome,
    FactorResult,
};
use crate::data::GameContext;
use crate::error::{panic_message, PredictError};

/// Bounds on the modifier scalar.
pub const MODIFIER_RANGE: (f64, f64) = (0.5, 1.5);
/// Maximum magnitude of the combined adjustment, in points.
pub const MAX_ADJUSTMENT: f64 = 10.0;
/// How strongly a full-scale modifier signal moves the scalar away from 1.0.
const MODIFIER_SENSITIVITY: f64 = 0.5;

/// Fixed share of the total weight held by each category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CategoryShares {
    pub primary: f64,
    pub secondary: f64,
    pub modifier: f64,
}

impl Default for CategoryShares {
    fn default() -> Self {
        CategoryShares {
            primary: 0.6,
            secondary: 0.3,
            modifier: 0.1,
        }
    }
}

impl CategoryShares {
    pub fn get(&self, category: FactorCategory) -> f64 {
        match category {
            FactorCategory::Primary => self.primary,
            FactorCategory::Secondary => self.secondary,
            FactorCategory::Modifier => self.modifier,
        }
    }
}

/// Effective weight for every `(category, base_weight)` pair, in input order.
///
/// Within a category the base weights are scaled to sum to one (split evenly
/// when they are all zero or negative); each is then multiplied by its
/// category's share. Shares of empty categories are spread proportionally over
/// the occupied ones, so the result always sums to one unless `specs` is empty.
pub fn normalize_weights(specs: &[(FactorCategory, f64)], shares: &CategoryShares) -> Vec<f64> {
    let mut sums: BTreeMap<FactorCategory, (f64, usize)> = BTreeMap::new();
    for (category, weight) in specs {
        let entry = sums.entry(*category).or_insert((0.0, 0));
        entry.0 += weight.max(0.0);
        entry.1 += 1;
    }

    let occupied_share: f64 = sums.keys().map(|c| shares.get(*c).max(0.0)).sum();
    let share_of = |category: FactorCategory| -> f64 {
        if occupied_share > 0.0 {
            shares.get(category).max(0.0) / occupied_share
        } else {
            1.0 / sums.len() as f64
        }
    };

    specs
        .iter()
        .map(|(category, weight)| {
            let (sum, count) = sums[category];
            let intra = if sum > 0.0 {
                weight.max(0.0) / sum
            } else {
                1.0 / count as f64
            };
            share_of(*category) * intra
        })
        .collect()
}

/// Category sums for one game. `modifier` is the scalar, not a point value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorTotals {
    pub primary: f64,
    pub secondary: f64,
    pub modifier: f64,
    /// `(primary + secondary) × modifier`, clamped to ±[`MAX_ADJUSTMENT`]
    pub total: f64,
}

impl FactorTotals {
    pub fn additive(&self) -> f64 {
        self.primary + self.secondary
    }
}

/// Scale the additive sum by the modifier scalar, then clamp.
pub fn apply_modifier(additive: f64, scalar: f64) -> f64 {
    (additive * scalar).clamp(-MAX_ADJUSTMENT, MAX_ADJUSTMENT)
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    activations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub name: String,
    pub runs: u64,
    pub activations: u64,
    pub failures: u64,
}

struct Registered {
    calculator: Box<dyn FactorCalculator>,
    weight: f64,
    counters: Counters,
}

impl Registered {
    fn new(calculator: Box<dyn FactorCalculator>) -> Self {
        Registered {
            calculator,
            weight: 0.0,
            counters: Counters::default(),
        }
    }
}

pub struct FactorRegistry {
    entries: Vec<Registered>,
    shares: CategoryShares,
}

impl FactorRegistry {
    /// Registry over an explicit calculator list, normalized once.
    pub fn new(calculators: Vec<Box<dyn FactorCalculator>>) -> Self {
        Self::with_shares(calculators, CategoryShares::default())
    }

    pub fn with_shares(
        calculators: Vec<Box<dyn FactorCalculator>>,
        shares: CategoryShares,
    ) -> Self {
        let mut registry = FactorRegistry {
            entries: calculators.into_iter().map(Registered::new).collect(),
            shares,
        };
        registry.renormalize();
        registry
    }

    pub fn with_defaults() -> Self {
        Self::new(default_calculators())
    }

    /// Add a calculator, replacing any existing one with the same name.
    pub fn register(&mut self, calculator: Box<dyn FactorCalculator>) {
        let name = calculator.name();
        match self.entries.iter().position(|e| e.calculator.name() == name) {
            Some(i) => {
                debug!("Replacing factor {}", name);
                self.entries[i] = Registered::new(calculator);
            }
            None => self.entries.push(Registered::new(calculator)),
        }
        self.renormalize();
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn FactorCalculator>> {
        let i = self.entries.iter().position(|e| e.calculator.name() == name)?;
        let removed = self.entries.remove(i);
        self.renormalize();
        Some(removed.calculator)
    }

    fn renormalize(&mut self) {
        let specs: Vec<(FactorCategory, f64)> = self
            .entries
            .iter()
            .map(|e| (e.calculator.category(), e.calculator.base_weight()))
            .collect();
        let weights = normalize_weights(&specs, &self.shares);
        for (entry, weight) in self.entries.iter_mut().zip(weights) {
            entry.weight = weight;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.calculator.name()).collect()
    }

    pub fn weight_of(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.calculator.name() == name)
            .map(|e| e.weight)
    }

    /// Σ effective weights; 1.0 for any non-empty registry.
    pub fn total_weight(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    /// Run every calculator against `ctx`. Never fails: a panic or a
    /// non-finite value becomes a zero, NONE-confidence result.
    pub fn calculate_all(&self, home: &str, away: &str, ctx: &GameContext) -> Vec<FactorResult> {
        self.entries
            .iter()
            .map(|entry| {
                let calc = entry.calculator.as_ref();
                entry.counters.runs.fetch_add(1, Ordering::Relaxed);

                let outcome = catch_unwind(AssertUnwindSafe(|| calc.calculate(home, away, ctx)));
                let result = match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let failure = PredictError::FactorFailure {
                            factor: calc.name().to_string(),
                            reason: panic_message(panic.as_ref()),
                        };
                        error!("{}", failure);
                        FactorResult::neutral(
                            calc.name(),
                            calc.category(),
                            FactorOutcome::Failed,
                            failure.to_string(),
                        )
                    }
                };

                match result.outcome {
                    FactorOutcome::Failed => {
                        entry.counters.failures.fetch_add(1, Ordering::Relaxed);
                    }
                    _ if result.is_active() => {
                        entry.counters.activations.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {}
                }

                result.weighted(entry.weight)
            })
            .collect()
    }

    /// Fold weighted results into category totals.
    ///
    /// PRIMARY and SECONDARY contributions are summed; MODIFIER results are
    /// combined into a scalar using their weights relative to each other,
    /// which is applied to the additive sum afterwards.
    pub fn aggregate(&self, results: &[FactorResult]) -> FactorTotals {
        let sum_of = |category: FactorCategory| -> f64 {
            results
                .iter()
                .filter(|r| r.category == category)
                .map(|r| r.contribution)
                .sum()
        };
        let primary = sum_of(FactorCategory::Primary);
        let secondary = sum_of(FactorCategory::Secondary);

        let modifiers: Vec<&FactorResult> = results
            .iter()
            .filter(|r| r.category == FactorCategory::Modifier)
            .collect();
        let modifier_weight: f64 = modifiers.iter().map(|r| r.weight).sum();
        let signal: f64 = if modifier_weight > 0.0 {
            modifiers
                .iter()
                .map(|r| r.raw_value * (r.weight / modifier_weight) * r.confidence.multiplier())
                .sum()
        } else {
            0.0
        };
        let modifier = (1.0 + MODIFIER_SENSITIVITY * signal).clamp(MODIFIER_RANGE.0, MODIFIER_RANGE.1);

        FactorTotals {
            primary,
            secondary,
            modifier,
            total: apply_modifier(primary + secondary, modifier),
        }
    }

    pub fn execution_stats(&self) -> Vec<ExecutionStats> {
        self.entries
            .iter()
            .map(|e| ExecutionStats {
                name: e.calculator.name().to_string(),
                runs: e.counters.runs.load(Ordering::Relaxed),
                activations: e.counters.activations.load(Ordering::Relaxed),
                failures: e.counters.failures.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Check the calculator set for duplicate names, unusable weights,
    /// inverted ranges and a weight sum that drifted from one.
    pub fn validate_configuration(&self) -> anyhow::Result<()> {
        let mut issues = Vec::new();

        let mut seen = BTreeMap::new();
        for entry in &self.entries {
            let calc = entry.calculator.as_ref();
            *seen.entry(calc.name()).or_insert(0usize) += 1;

            let weight = calc.base_weight();
            if weight.is_nan() || weight <= 0.0 {
                issues.push(format!("{}: base weight {} is not positive", calc.name(), weight));
            }
            let (min, max) = calc.output_range();
            if min >= max || !min.is_finite() || !max.is_finite() {
                issues.push(format!("{}: invalid output range [{}, {}]", calc.name(), min, max));
            }
            if calc.activation_threshold() < 0.0 {
                issues.push(format!("{}: negative activation threshold", calc.name()));
            }
        }
        for (name, count) in seen {
            if count > 1 {
                issues.push(format!("{name}: registered {count} times"));
            }
        }
        if !self.entries.is_empty() && (self.total_weight() - 1.0).abs() > 1e-6 {
            issues.push(format!("weights sum to {:.8}", self.total_weight()));
        }

        if issues.is_empty() {
            Ok(())
        } else {
            for issue in &issues {
                warn!("Factor configuration: {}", issue);
            }
            anyhow::bail!("invalid factor configuration: {}", issues.join("; "))
        }
    }
}

/// Results that moved the number, strongest first.
pub fn active_by_strength(results: &[FactorResult]) -> Vec<&FactorResult> {
    let mut active: Vec<&FactorResult> = results
        .iter()
        .filter(|r| r.is_active() && r.confidence > Confidence::None)
        .collect();
    active.sort_by(|a, b| b.contribution.abs().total_cmp(&a.contribution.abs()));
    active
}
