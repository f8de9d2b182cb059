//! One request, end to end: market line, game context, factors, variance,
//! then the final number and how much to trust it.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::variance::{VarianceClass, VarianceDetector, VarianceReport};
use crate::data::{DataManager, FieldSource, GameContext, Side};
use crate::error::{panic_message, PredictError, Result};
use crate::factors::registry::active_by_strength;
use crate::factors::{Confidence, FactorCategory, FactorRegistry, FactorResult, FactorTotals};

/// Final confidence never leaves this band.
pub const CONFIDENCE_RANGE: (f64, f64) = (15.0, 95.0);
const CONFIDENCE_BASE: f64 = 10.0;
const QUALITY_WEIGHT: f64 = 0.6;
const EDGE_WEIGHT: f64 = 30.0;
/// Edge, in points, at which the edge term of the confidence saturates.
const EDGE_SATURATION: f64 = 5.0;
const MIN_BET_EDGE: f64 = 1.0;
const MIN_BET_CONFIDENCE: f64 = 50.0;
/// Below this data quality no pick is made, whatever the edge.
const MIN_BET_QUALITY: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeClass {
    NoEdge,
    Slight,
    Moderate,
    Strong,
    Massive,
}

impl EdgeClass {
    pub fn from_edge(edge: f64) -> Self {
        match edge {
            e if e < 0.5 => EdgeClass::NoEdge,
            e if e < 1.5 => EdgeClass::Slight,
            e if e < 3.0 => EdgeClass::Moderate,
            e if e < 5.0 => EdgeClass::Strong,
            _ => EdgeClass::Massive,
        }
    }
}

impl std::fmt::Display for EdgeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EdgeClass::NoEdge => "NO_EDGE",
            EdgeClass::Slight => "SLIGHT",
            EdgeClass::Moderate => "MODERATE",
            EdgeClass::Strong => "STRONG",
            EdgeClass::Massive => "MASSIVE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Recommendation {
    /// Take `team` at `line` (the market number from that side's view).
    Bet { side: Side, team: String, line: f64 },
    Pass { reason: String },
}

impl Recommendation {
    pub fn is_bet(&self) -> bool {
        matches!(self, Recommendation::Bet { .. })
    }
}

/// The terms that make up a final confidence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub base: f64,
    /// `0.6 × data_quality`
    pub data_quality: f64,
    /// `30 × min(edge / 5, 1)`
    pub edge: f64,
    /// Fraction removed for factor disagreement
    pub variance_penalty: f64,
    /// Final score after the penalty and the clamp
    pub value: f64,
}

impl ConfidenceBreakdown {
    /// `(10 + 0.6·quality + 30·min(edge/5, 1)) × (1 − penalty)`, clamped to
    /// [`CONFIDENCE_RANGE`].
    pub fn compute(edge_size: f64, data_quality: f64, penalty: f64) -> Self {
        let quality = QUALITY_WEIGHT * data_quality;
        let edge = (edge_size / EDGE_SATURATION).min(1.0) * EDGE_WEIGHT;
        let raw = (CONFIDENCE_BASE + quality + edge) * (1.0 - penalty);
        ConfidenceBreakdown {
            base: CONFIDENCE_BASE,
            data_quality: quality,
            edge,
            variance_penalty: penalty,
            value: raw.clamp(CONFIDENCE_RANGE.0, CONFIDENCE_RANGE.1),
        }
    }

    /// Floor-confidence breakdown for a degraded prediction.
    fn floor() -> Self {
        ConfidenceBreakdown {
            value: CONFIDENCE_RANGE.0,
            ..Default::default()
        }
    }

    fn unclamped(&self) -> f64 {
        (self.base + self.data_quality + self.edge) * (1.0 - self.variance_penalty)
    }

    /// One-line account of how the score was reached.
    pub fn explanation(&self) -> String {
        let mut text = format!(
            "base {:.0} + data quality {:.1} + edge {:.1}",
            self.base, self.data_quality, self.edge
        );
        if self.variance_penalty > 0.0 {
            text.push_str(&format!(
                ", less {:.0}% for factor disagreement",
                self.variance_penalty * 100.0
            ));
        }
        let raw = self.unclamped();
        if (raw - self.value).abs() > 1e-9 {
            text.push_str(&format!(" = {raw:.1}, held to {:.0}", self.value));
        } else {
            text.push_str(&format!(" = {:.1}", self.value));
        }
        text
    }
}

/// Registry totals plus the disagreement analysis for the same batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateAdjustment {
    pub primary: f64,
    pub secondary: f64,
    /// Scalar applied to `primary + secondary`
    pub modifier: f64,
    /// Points added to the market spread; positive favors the home side
    pub total: f64,
    pub variance: VarianceReport,
}

impl AggregateAdjustment {
    fn new(totals: FactorTotals, variance: VarianceReport) -> Self {
        AggregateAdjustment {
            primary: totals.primary,
            secondary: totals.secondary,
            modifier: totals.modifier,
            total: totals.total,
            variance,
        }
    }

    fn zero() -> Self {
        AggregateAdjustment {
            primary: 0.0,
            secondary: 0.0,
            modifier: 1.0,
            total: 0.0,
            variance: VarianceReport::consensus(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub home: String,
    pub away: String,
    pub week: u32,
    pub season: i32,
    pub market_spread: f64,
    pub contrarian_spread: f64,
    pub adjustment: AggregateAdjustment,
    pub edge_size: f64,
    pub edge_class: EdgeClass,
    /// 15–95
    pub confidence: f64,
    pub confidence_breakdown: ConfidenceBreakdown,
    /// 0–100
    pub data_quality: f64,
    /// Provenance of each context field, keyed by field name
    pub data_sources: BTreeMap<String, FieldSource>,
    pub factors: Vec<FactorResult>,
    pub recommendation: Recommendation,
    /// Reason the normal computation was abandoned, if it was
    pub degraded: Option<String>,
    pub degraded_fields: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    /// Lowest-confidence result that keeps the market number untouched.
    fn degraded(
        home: &str,
        away: &str,
        ctx: &GameContext,
        market_spread: f64,
        reason: String,
    ) -> Self {
        Prediction {
            home: home.to_string(),
            away: away.to_string(),
            week: ctx.week,
            season: ctx.season,
            market_spread,
            contrarian_spread: market_spread,
            adjustment: AggregateAdjustment::zero(),
            edge_size: 0.0,
            edge_class: EdgeClass::NoEdge,
            confidence: CONFIDENCE_RANGE.0,
            confidence_breakdown: ConfidenceBreakdown::floor(),
            data_quality: ctx.data_quality,
            data_sources: named_sources(ctx),
            factors: Vec::new(),
            recommendation: Recommendation::Pass {
                reason: "prediction degraded".to_string(),
            },
            degraded: Some(reason),
            degraded_fields: ctx.degraded_fields().iter().map(|f| f.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    fn is_finite(&self) -> bool {
        self.contrarian_spread.is_finite()
            && self.edge_size.is_finite()
            && self.confidence.is_finite()
    }

    pub fn to_record(&self) -> PredictionRecord {
        PredictionRecord {
            home: self.home.clone(),
            away: self.away.clone(),
            week: self.week,
            season: self.season,
            timestamp: self.timestamp,
            market_spread: self.market_spread,
            contrarian_spread: self.contrarian_spread,
            total_adjustment: self.adjustment.total,
            edge_size: self.edge_size,
            edge_class: self.edge_class,
            confidence: self.confidence,
            confidence_breakdown: self.confidence_breakdown,
            confidence_explanation: self.confidence_breakdown.explanation(),
            data_quality: self.data_quality,
            data_sources: self.data_sources.clone(),
            variance_class: self.adjustment.variance.class,
            factors: self
                .factors
                .iter()
                .map(|f| FactorRecord {
                    name: f.name.clone(),
                    category: f.category,
                    raw: f.raw_value,
                    confidence: f.confidence,
                    weight: f.weight,
                    contribution: f.contribution,
                    reasoning: f.reasoning.clone(),
                })
                .collect(),
            recommendation: self.recommendation.clone(),
            degraded: self.is_degraded(),
            degraded_reason: self.degraded.clone(),
            degraded_fields: self.degraded_fields.clone(),
        }
    }
}

/// Flat, storage-agnostic form of a [`Prediction`] for downstream trackers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub home: String,
    pub away: String,
    pub week: u32,
    pub season: i32,
    pub timestamp: DateTime<Utc>,
    pub market_spread: f64,
    pub contrarian_spread: f64,
    pub total_adjustment: f64,
    pub edge_size: f64,
    pub edge_class: EdgeClass,
    pub confidence: f64,
    #[serde(default)]
    pub confidence_breakdown: ConfidenceBreakdown,
    #[serde(default)]
    pub confidence_explanation: String,
    pub data_quality: f64,
    #[serde(default)]
    pub data_sources: BTreeMap<String, FieldSource>,
    pub variance_class: VarianceClass,
    pub factors: Vec<FactorRecord>,
    pub recommendation: Recommendation,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
    #[serde(default)]
    pub degraded_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRecord {
    pub name: String,
    pub category: FactorCategory,
    pub raw: f64,
    pub confidence: Confidence,
    pub weight: f64,
    pub contribution: f64,
    pub reasoning: Vec<String>,
}

/// See [`ConfidenceBreakdown::compute`].
pub fn final_confidence(edge_size: f64, data_quality: f64, penalty: f64) -> f64 {
    ConfidenceBreakdown::compute(edge_size, data_quality, penalty).value
}

fn named_sources(ctx: &GameContext) -> BTreeMap<String, FieldSource> {
    ctx.data_sources
        .iter()
        .map(|(field, source)| (field.to_string(), source.clone()))
        .collect()
}

pub fn recommend(
    home: &str,
    away: &str,
    market_spread: f64,
    total: f64,
    confidence: f64,
    data_quality: f64,
    variance: VarianceClass,
) -> Recommendation {
    let edge = total.abs();
    if edge < MIN_BET_EDGE {
        return Recommendation::Pass {
            reason: format!("edge {edge:.2} below {MIN_BET_EDGE:.1}"),
        };
    }
    if data_quality < MIN_BET_QUALITY {
        return Recommendation::Pass {
            reason: format!("data quality {data_quality:.0} below {MIN_BET_QUALITY:.0}"),
        };
    }
    if confidence < MIN_BET_CONFIDENCE {
        return Recommendation::Pass {
            reason: format!("confidence {confidence:.0} below {MIN_BET_CONFIDENCE:.0}"),
        };
    }
    if variance >= VarianceClass::Strong {
        return Recommendation::Pass {
            reason: format!("{variance} factor disagreement"),
        };
    }
    if total > 0.0 {
        Recommendation::Bet {
            side: Side::Home,
            team: home.to_string(),
            line: market_spread,
        }
    } else {
        Recommendation::Bet {
            side: Side::Away,
            team: away.to_string(),
            line: -market_spread,
        }
    }
}

pub struct PredictionEngine {
    data: DataManager,
    registry: FactorRegistry,
    detector: VarianceDetector,
}

impl PredictionEngine {
    pub fn new(data: DataManager, registry: FactorRegistry, detector: VarianceDetector) -> Self {
        PredictionEngine {
            data,
            registry,
            detector,
        }
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.data
    }

    pub fn registry(&self) -> &FactorRegistry {
        &self.registry
    }

    /// Predict one game. Fails only with [`PredictError::DataUnavailable`],
    /// and in that case no team data is fetched and no factor runs.
    pub async fn predict(&self, home: &str, away: &str, week: u32) -> Result<Prediction> {
        let Some(line) = self.data.resolve_market_line(home, away).await else {
            let err = PredictError::DataUnavailable {
                home: home.to_string(),
                away: away.to_string(),
                week,
            };
            warn!("{}", err);
            return Err(err);
        };
        let ctx = self.data.resolve_context(home, away, week, Some(line)).await;
        self.evaluate(home, away, &ctx)
    }

    /// Predict every `(home, away)` game concurrently; results keep input order.
    pub async fn predict_slate(
        &self,
        games: &[(String, String)],
        week: u32,
    ) -> Vec<Result<Prediction>> {
        let results = join_all(
            games
                .iter()
                .map(|(home, away)| self.predict(home, away, week)),
        )
        .await;

        let bets = results
            .iter()
            .filter(|r| matches!(r, Ok(p) if p.recommendation.is_bet()))
            .count();
        let unavailable = results.iter().filter(|r| r.is_err()).count();
        info!(
            "Week {} slate: {} games, {} bets, {} without a line",
            week,
            games.len(),
            bets,
            unavailable
        );
        results
    }

    /// Run the factor pipeline over an already resolved context.
    pub fn evaluate(&self, home: &str, away: &str, ctx: &GameContext) -> Result<Prediction> {
        let market = ctx
            .market_spread()
            .ok_or_else(|| PredictError::DataUnavailable {
                home: home.to_string(),
                away: away.to_string(),
                week: ctx.week,
            })?;

        let outcome = catch_unwind(AssertUnwindSafe(|| self.finalize(home, away, ctx, market)));
        let prediction = match outcome {
            Ok(p) if p.is_finite() => p,
            Ok(p) => {
                let reason = format!(
                    "non-finite result (spread {}, adjustment {})",
                    p.contrarian_spread, p.adjustment.total
                );
                error!("{} @ {} degraded: {}", away, home, reason);
                Prediction::degraded(home, away, ctx, market, reason)
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!("{} @ {} degraded: {}", away, home, reason);
                Prediction::degraded(home, away, ctx, market, reason)
            }
        };

        if !prediction.is_degraded() {
            info!(
                "{} @ {}: market {:+.1} → {:+.2} ({} edge, {:.0}% confidence, {})",
                away,
                home,
                prediction.market_spread,
                prediction.contrarian_spread,
                prediction.edge_class,
                prediction.confidence,
                prediction.adjustment.variance.class
            );
            debug!(
                "{} @ {} confidence: {}",
                away,
                home,
                prediction.confidence_breakdown.explanation()
            );
        }
        Ok(prediction)
    }

    fn finalize(
        &self,
        home: &str,
        away: &str,
        ctx: &GameContext,
        market_spread: f64,
    ) -> Prediction {
        let factors = self.registry.calculate_all(home, away, ctx);
        let totals = self.registry.aggregate(&factors);
        let variance = self.detector.analyze(&factors);

        let total = totals.total;
        let edge_size = total.abs();
        let breakdown =
            ConfidenceBreakdown::compute(edge_size, ctx.data_quality, variance.confidence_penalty);
        let recommendation = recommend(
            home,
            away,
            market_spread,
            total,
            breakdown.value,
            ctx.data_quality,
            variance.class,
        );

        for r in active_by_strength(&factors).iter().take(3) {
            debug!("{} @ {}: {} {:+.3}", away, home, r.name, r.contribution);
        }

        Prediction {
            home: home.to_string(),
            away: away.to_string(),
            week: ctx.week,
            season: ctx.season,
            market_spread,
            contrarian_spread: market_spread + total,
            adjustment: AggregateAdjustment::new(totals, variance),
            edge_size,
            edge_class: EdgeClass::from_edge(edge_size),
            confidence: breakdown.value,
            confidence_breakdown: breakdown,
            data_quality: ctx.data_quality,
            data_sources: named_sources(ctx),
            factors,
            recommendation,
            degraded: None,
            degraded_fields: ctx.degraded_fields().iter().map(|f| f.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }
}
