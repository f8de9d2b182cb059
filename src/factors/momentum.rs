//! Form factors derived from recent scoring margins.

use super::{require, Confidence, FactorCalculator, FactorCategory, FactorSignal, MissingInput};
use crate::data::{DataField, GameContext, Schedule, Side};

/// Margins of completed games before `week`, oldest first.
fn margins(schedule: &Schedule, week: u32) -> Vec<f64> {
    schedule
        .completed_before(week)
        .iter()
        .filter_map(|g| g.margin())
        .map(|m| m as f64)
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    xs.iter().sum::<f64>() / xs.len() as f64
}

fn std_dev(xs: &[f64]) -> f64 {
    let m = mean(xs);
    (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Whether a team's margins are trending up relative to its season.
pub struct PointDifferentialTrends;

const MIN_TREND_GAMES: usize = 3;
const RECENT_WEIGHTS: [f64; 4] = [0.4, 0.3, 0.2, 0.1];

/// Trend score: recency-weighted margin against the season mean, banded,
/// plus a small bonus for consistent margins.
pub fn trend_score(margins: &[f64]) -> f64 {
    let recent: Vec<f64> = margins.iter().rev().take(RECENT_WEIGHTS.len()).copied().collect();
    let used = &RECENT_WEIGHTS[..recent.len()];
    let weighted =
        recent.iter().zip(used).map(|(m, w)| m * w).sum::<f64>() / used.iter().sum::<f64>();

    let improvement = weighted - mean(margins);
    let band = if improvement >= 10.0 {
        1.5
    } else if improvement >= 5.0 {
        1.0
    } else if improvement <= -5.0 {
        -1.0
    } else {
        improvement / 10.0
    };

    let spread = std_dev(margins);
    let consistency = if spread < 7.0 {
        0.3
    } else if spread < 14.0 {
        0.15
    } else {
        0.0
    };

    band + consistency
}

impl FactorCalculator for PointDifferentialTrends {
    fn name(&self) -> &'static str {
        "point_differential_trends"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Primary
    }
    fn base_weight(&self) -> f64 {
        0.20
    }
    fn output_range(&self) -> (f64, f64) {
        (-2.0, 2.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.2
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let home = margins(&ctx.home.schedule, ctx.week);
        let away = margins(&ctx.away.schedule, ctx.week);
        let games = home.len().min(away.len());
        if games < MIN_TREND_GAMES {
            return Err(MissingInput::new(format!(
                "need {MIN_TREND_GAMES} completed games per team, have {games}"
            )));
        }

        let (h, a) = (trend_score(&home), trend_score(&away));
        let confidence = if games >= 6 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new(h - a, confidence)
            .because(format!("trend home {:+.2}, away {:+.2}", h, a)))
    }
}

/// Record in one-score games against record in blowouts.
pub struct CloseGamePerformance;

const CLOSE_MARGIN: f64 = 7.0;
const CLOSE_WINDOW: usize = 6;
const MIN_CLOSE_GAMES: usize = 2;

/// `None` when fewer than two of the last six games were close.
pub fn close_game_score(margins: &[f64]) -> Option<f64> {
    let window = &margins[margins.len().saturating_sub(CLOSE_WINDOW)..];
    let (close, blowouts): (Vec<f64>, Vec<f64>) =
        window.iter().partition(|m| m.abs() <= CLOSE_MARGIN);
    if close.len() < MIN_CLOSE_GAMES {
        return None;
    }

    let close_result = mean(
        &close
            .iter()
            .map(|m| match m {
                m if *m > 0.0 => 1.0,
                m if *m < 0.0 => -0.7,
                _ => 0.0,
            })
            .collect::<Vec<_>>(),
    );
    let experience = (close.len() as f64 / 4.0).min(1.0);
    let blowout_result = if blowouts.is_empty() {
        0.0
    } else {
        mean(
            &blowouts
                .iter()
                .map(|m| if *m > 0.0 { 0.3 } else { -0.3 })
                .collect::<Vec<_>>(),
        )
    };

    Some(close_result * 0.8 + experience * 0.2 + blowout_result * 0.2)
}

impl FactorCalculator for CloseGamePerformance {
    fn name(&self) -> &'static str {
        "close_game_performance"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.10
    }
    fn output_range(&self) -> (f64, f64) {
        (-1.5, 1.5)
    }
    fn activation_threshold(&self) -> f64 {
        0.15
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let home = margins(&ctx.home.schedule, ctx.week);
        let away = margins(&ctx.away.schedule, ctx.week);
        let (Some(h), Some(a)) = (close_game_score(&home), close_game_score(&away)) else {
            return Err(MissingInput::new(format!(
                "need {MIN_CLOSE_GAMES} one-score games in the last {CLOSE_WINDOW} per team"
            )));
        };

        let close_games = |m: &[f64]| {
            m[m.len().saturating_sub(CLOSE_WINDOW)..]
                .iter()
                .filter(|x| x.abs() <= CLOSE_MARGIN)
                .count()
        };
        let confidence = if close_games(&home).min(close_games(&away)) >= 4 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new(h - a, confidence)
            .because(format!("close-game score home {:+.2}, away {:+.2}", h, a)))
    }
}
