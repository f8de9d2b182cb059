//! Reads the betting market itself as a signal about how much to trust the
//! human-factor adjustment.

use super::{Confidence, FactorCalculator, FactorCategory, FactorSignal, MissingInput};
use crate::data::{GameContext, MarketLine};

/// Modifier: positive values amplify the additive adjustment, negative
/// values damp it.
pub struct MarketSentiment;

/// Books disagreeing this much means the number is still soft.
const SOFT_DISPERSION: f64 = 1.0;
/// Tight agreement across this many books means the number is sharp.
const SHARP_DISPERSION: f64 = 0.25;
const SHARP_BOOKS: usize = 6;
const BLOWOUT_SPREAD: f64 = 21.0;
const PICKEM_SPREAD: f64 = 3.0;

fn sentiment(line: &MarketLine) -> (f64, Vec<String>) {
    let mut value = 0.0;
    let mut reasons = Vec::new();

    if line.dispersion >= SOFT_DISPERSION {
        value += 0.3;
        reasons.push(format!("books split (σ {:.2})", line.dispersion));
    } else if line.book_count >= SHARP_BOOKS && line.dispersion <= SHARP_DISPERSION {
        value -= 0.3;
        reasons.push(format!("{} books agree within {:.2}", line.book_count, line.dispersion));
    }

    let size = line.spread.abs();
    if size >= BLOWOUT_SPREAD {
        value += 0.2;
        reasons.push(format!("inflated number {:.1}", line.spread));
    } else if size <= PICKEM_SPREAD {
        value -= 0.1;
        reasons.push(format!("near pick'em {:.1}", line.spread));
    }

    (value, reasons)
}

fn book_confidence(book_count: usize) -> Confidence {
    match book_count {
        0 => Confidence::None,
        1..=2 => Confidence::Low,
        3..=5 => Confidence::Medium,
        _ => Confidence::High,
    }
}

impl FactorCalculator for MarketSentiment {
    fn name(&self) -> &'static str {
        "market_sentiment"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Modifier
    }
    fn base_weight(&self) -> f64 {
        1.0
    }
    fn output_range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.1
    }

    fn evaluate(
        &self,
        _home: &str,
        _away: &str,
        ctx: &GameContext,
    ) -> Result<FactorSignal, MissingInput> {
        let line = ctx
            .market
            .as_ref()
            .ok_or_else(|| MissingInput::new("no consensus market line"))?;
        let (value, reasons) = sentiment(line);
        let mut signal = FactorSignal::new(value, book_confidence(line.book_count));
        signal.reasoning = reasons;
        Ok(signal)
    }
}
