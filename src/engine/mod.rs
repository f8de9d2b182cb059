pub mod prediction;
pub mod variance;

pub use prediction::{
    final_confidence, recommend, AggregateAdjustment, ConfidenceBreakdown, EdgeClass,
    FactorRecord, Prediction, PredictionEngine, PredictionRecord, Recommendation,
};
pub use variance::{VarianceClass, VarianceDetector, VarianceReport};
