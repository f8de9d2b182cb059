//! Where a game sits in the season: stakes, and what came before or comes next.

use super::{require, Confidence, FactorCalculator, FactorCategory, FactorSignal, MissingInput};
use crate::data::{DataField, GameContext, GameRecord, Schedule, Side};

const REGULAR_SEASON_GAMES: u32 = 12;
const BOWL_WINS: u32 = 6;

/// Which side needs this game more.
pub struct DesperationIndex;

fn bowl_urgency(wins: u32, games_remaining: u32) -> f64 {
    if wins >= BOWL_WINS {
        return 0.0;
    }
    let needed = BOWL_WINS - wins;
    if needed > games_remaining {
        -0.3
    } else if needed == games_remaining {
        0.6
    } else if needed == 1 {
        0.4
    } else {
        0.2
    }
}

fn playoff_urgency(losses: u32, week: u32) -> f64 {
    match (losses, week >= 10) {
        (l, _) if l > 1 => 0.0,
        (0, true) => 0.5,
        (1, true) => 0.3,
        _ => 0.1,
    }
}

fn late_season_urgency(week: u32) -> f64 {
    match week {
        w if w >= 13 => 0.4,
        w if w >= 11 => 0.3,
        w if w >= 9 => 0.2,
        _ => 0.0,
    }
}

/// 0–1 desperation for one team entering `week`.
pub fn desperation(schedule: &Schedule, week: u32) -> f64 {
    let (wins, losses) = schedule.record_before(week);
    let listed = schedule.games_from(week).count() as u32;
    let games_remaining = if listed > 0 {
        listed
    } else {
        REGULAR_SEASON_GAMES.saturating_sub(wins + losses)
    };

    let score = 0.5
        + bowl_urgency(wins, games_remaining) * 0.4
        + playoff_urgency(losses, week) * 0.3
        + late_season_urgency(week) * 0.3;
    score.clamp(0.0, 1.0)
}

impl FactorCalculator for DesperationIndex {
    fn name(&self) -> &'static str {
        "desperation_index"
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
        0.3
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let home = desperation(&ctx.home.schedule, ctx.week);
        let away = desperation(&ctx.away.schedule, ctx.week);
        let confidence = if ctx.week >= 6 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let (hw, hl) = ctx.home.schedule.record_before(ctx.week);
        let (aw, al) = ctx.away.schedule.record_before(ctx.week);
        Ok(FactorSignal::new((home - away) * 4.0, confidence).because(format!(
            "desperation home {:.2} ({}-{}), away {:.2} ({}-{})",
            home, hw, hl, away, aw, al
        )))
    }
}

const LOOKAHEAD_WEEKS: u32 = 2;

/// Distraction from a big game next up, or a hangover from one just played.
pub struct LookaheadSandwich;

fn importance(game: &GameRecord) -> f64 {
    let mut score: f64 = 0.5;
    if game.conference_game {
        score += 0.3;
    }
    if game.neutral_site {
        score += 0.2;
    }
    score.min(1.0)
}

/// 60% lookahead to the next two weeks, 40% letdown from last week.
pub fn distraction(schedule: &Schedule, week: u32) -> f64 {
    let lookahead = schedule
        .games
        .iter()
        .filter(|g| g.week > week && g.week <= week + LOOKAHEAD_WEEKS)
        .map(|g| importance(g) / (g.week - week) as f64)
        .fold(0.0, f64::max)
        .min(1.0);

    let letdown = schedule
        .games
        .iter()
        .find(|g| g.week + 1 == week && g.is_completed())
        .map(|g| importance(g) * 0.7)
        .unwrap_or(0.0)
        .min(1.0);

    lookahead * 0.6 + letdown * 0.4
}

impl FactorCalculator for LookaheadSandwich {
    fn name(&self) -> &'static str {
        "lookahead_sandwich"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.10
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

        let home = distraction(&ctx.home.schedule, ctx.week);
        let away = distraction(&ctx.away.schedule, ctx.week);

        Ok(FactorSignal::new(away - home, Confidence::Low)
            .because(format!("distraction home {:.2}, away {:.2}", home, away)))
    }
}
