//! Contrarian college-football spread predictions.
//!
//! A [`engine::PredictionEngine`] resolves a market line and game context
//! through [`data::DataManager`], runs the human-factor calculators held by
//! [`factors::FactorRegistry`], measures their disagreement and turns the
//! result into an adjusted spread with a bounded confidence.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod factors;
