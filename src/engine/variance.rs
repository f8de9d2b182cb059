//! Measures how much the active factors disagree with each other.

use serde::{Deserialize, Serialize};

use crate::factors::{FactorCategory, FactorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarianceClass {
    Consensus,
    Mild,
    Moderate,
    Strong,
    Extreme,
}

impl VarianceClass {
    /// Map an opposition index in `[0, 1]` onto the ordinal scale.
    pub fn from_index(index: f64) -> Self {
        match index {
            i if i < 0.15 => VarianceClass::Consensus,
            i if i < 0.30 => VarianceClass::Mild,
            i if i < 0.50 => VarianceClass::Moderate,
            i if i < 0.75 => VarianceClass::Strong,
            _ => VarianceClass::Extreme,
        }
    }

    /// Fraction removed from the base confidence.
    pub fn penalty(self) -> f64 {
        match self {
            VarianceClass::Consensus => 0.0,
            VarianceClass::Mild => 0.10,
            VarianceClass::Moderate => 0.30,
            VarianceClass::Strong => 0.50,
            VarianceClass::Extreme => 0.75,
        }
    }
}

impl std::fmt::Display for VarianceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VarianceClass::Consensus => "CONSENSUS",
            VarianceClass::Mild => "MILD",
            VarianceClass::Moderate => "MODERATE",
            VarianceClass::Strong => "STRONG",
            VarianceClass::Extreme => "EXTREME",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VarianceReport {
    pub class: VarianceClass,
    pub confidence_penalty: f64,
    /// `2·min(Σ⁺, Σ|⁻|) / Σ|c|`: 0 when every contribution points the same
    /// way, 1 when the two sides cancel exactly.
    pub opposition_index: f64,
    /// Coefficient of variation of the contribution magnitudes.
    pub magnitude_cv: f64,
    /// Class computed over PRIMARY contributions alone.
    pub primary_class: VarianceClass,
    /// Share of the absolute contribution mass on the dominant side.
    pub direction_consensus: f64,
    /// Factors whose contribution sits more than the z-cutoff from the mean.
    pub outliers: Vec<String>,
    pub implications: Vec<String>,
    pub active_factors: usize,
}

impl VarianceReport {
    /// Report for a batch with nothing to disagree about.
    pub fn consensus() -> Self {
        VarianceReport {
            class: VarianceClass::Consensus,
            confidence_penalty: 0.0,
            opposition_index: 0.0,
            magnitude_cv: 0.0,
            primary_class: VarianceClass::Consensus,
            direction_consensus: 1.0,
            outliers: Vec::new(),
            implications: Vec::new(),
            active_factors: 0,
        }
    }
}

/// Opposition index over signed contributions; 0 for fewer than two values.
pub fn opposition_index(contributions: &[f64]) -> f64 {
    if contributions.len() < 2 {
        return 0.0;
    }
    let positive: f64 = contributions.iter().filter(|c| **c > 0.0).sum();
    let negative: f64 = contributions.iter().filter(|c| **c < 0.0).map(|c| -c).sum();
    let mass = positive + negative;
    if mass > 0.0 {
        2.0 * positive.min(negative) / mass
    } else {
        0.0
    }
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[derive(Debug, Clone)]
pub struct VarianceDetector {
    outlier_z: f64,
}

impl Default for VarianceDetector {
    fn default() -> Self {
        VarianceDetector { outlier_z: 1.5 }
    }
}

impl VarianceDetector {
    pub fn new(outlier_z: f64) -> Self {
        VarianceDetector { outlier_z }
    }

    /// Analyze the non-zero additive contributions of one batch. Modifier
    /// results scale the total rather than pull on it, so they are ignored.
    pub fn analyze(&self, results: &[FactorResult]) -> VarianceReport {
        let active: Vec<&FactorResult> = results
            .iter()
            .filter(|r| r.category.is_additive() && r.contribution != 0.0)
            .collect();
        if active.len() < 2 {
            let mut report = VarianceReport::consensus();
            report.active_factors = active.len();
            report
                .implications
                .push("too few active factors for disagreement".to_string());
            return report;
        }

        let contributions: Vec<f64> = active.iter().map(|r| r.contribution).collect();
        let index = opposition_index(&contributions);
        let class = VarianceClass::from_index(index);

        let magnitudes: Vec<f64> = contributions.iter().map(|c| c.abs()).collect();
        let (mag_mean, mag_std) = mean_and_std(&magnitudes);
        let magnitude_cv = if mag_mean > 0.0 { mag_std / mag_mean } else { 0.0 };

        let primary: Vec<f64> = active
            .iter()
            .filter(|r| r.category == FactorCategory::Primary)
            .map(|r| r.contribution)
            .collect();
        let primary_class = VarianceClass::from_index(opposition_index(&primary));

        let mass: f64 = magnitudes.iter().sum();
        let positive: f64 = contributions.iter().filter(|c| **c > 0.0).sum();
        let direction_consensus = positive.max(mass - positive) / mass;

        let outliers = if active.len() >= 3 {
            let (mean, std) = mean_and_std(&contributions);
            if std > 0.0 {
                active
                    .iter()
                    .filter(|r| ((r.contribution - mean) / std).abs() > self.outlier_z)
                    .map(|r| r.name.clone())
                    .collect()
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        let mut implications = vec![match class {
            VarianceClass::Consensus => "factors agree on direction".to_string(),
            VarianceClass::Mild => "minor dissent among factors".to_string(),
            VarianceClass::Moderate => "factors partly offset each other".to_string(),
            VarianceClass::Strong => "factors pull hard in opposite directions".to_string(),
            VarianceClass::Extreme => "factors cancel out, no reliable read".to_string(),
        }];
        if primary_class > class {
            implications.push(format!("primary factors disagree more ({primary_class})"));
        }
        for name in &outliers {
            implications.push(format!("{name} dominates the adjustment"));
        }

        VarianceReport {
            class,
            confidence_penalty: class.penalty(),
            opposition_index: index,
            magnitude_cv,
            primary_class,
            direction_consensus,
            outliers,
            implications,
            active_factors: active.len(),
        }
    }
}
