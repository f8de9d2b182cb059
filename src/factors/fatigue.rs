use super::{require, Confidence, FactorCalculator, FactorCategory, FactorSignal, MissingInput};
use crate::data::{DataField, GameContext, GameRecord, Schedule, Side};

const LOOKBACK_WEEKS: u32 = 4;
const MIN_GAMES: usize = 2;
const ROAD_GAME: f64 = 0.8;
const SHORT_REST: f64 = 1.5;
const EMOTIONAL_GAME: f64 = 0.6;
const TRAVEL_SWITCH: f64 = 0.4;

/// Cumulative travel, short rest and emotional-game load over the last few
/// weeks. The fresher side is favored.
pub struct SchedulingFatigue;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct FatigueLoad {
    pub road_games: usize,
    pub short_rests: usize,
    pub emotional_games: usize,
    pub travel_switches: usize,
}

impl FatigueLoad {
    pub fn score(&self) -> f64 {
        self.road_games as f64 * ROAD_GAME
            + self.short_rests as f64 * SHORT_REST
            + self.emotional_games as f64 * EMOTIONAL_GAME
            + self.travel_switches as f64 * TRAVEL_SWITCH
    }
}

/// Close finishes and shootouts (a proxy for overtime) drain a roster.
fn is_emotional(game: &GameRecord) -> bool {
    match (game.points_for, game.points_against) {
        (Some(pf), Some(pa)) => pf.abs_diff(pa) <= 7 || (pf > 40 && pa > 40),
        _ => false,
    }
}

/// Days between kickoffs; unknown dates count as a normal week.
fn rest_days(prev: &GameRecord, next: &GameRecord) -> i64 {
    match (prev.start_date, next.start_date) {
        (Some(a), Some(b)) => (b - a).num_days().abs(),
        _ => 7,
    }
}

pub fn fatigue_load(schedule: &Schedule, week: u32) -> Option<FatigueLoad> {
    let start = week.saturating_sub(LOOKBACK_WEEKS);
    let recent: Vec<&GameRecord> = schedule
        .completed_before(week)
        .into_iter()
        .filter(|g| g.week >= start)
        .collect();
    if recent.len() < MIN_GAMES {
        return None;
    }

    let mut load = FatigueLoad {
        road_games: recent.iter().filter(|g| g.is_road()).count(),
        emotional_games: recent.iter().filter(|g| is_emotional(g)).count(),
        ..FatigueLoad::default()
    };
    for pair in recent.windows(2) {
        if rest_days(pair[0], pair[1]) < 7 {
            load.short_rests += 1;
        }
        if pair[0].is_road() != pair[1].is_road() {
            load.travel_switches += 1;
        }
    }
    Some(load)
}

impl FactorCalculator for SchedulingFatigue {
    fn name(&self) -> &'static str {
        "scheduling_fatigue"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Primary
    }
    fn base_weight(&self) -> f64 {
        0.35
    }
    fn output_range(&self) -> (f64, f64) {
        (-3.5, 3.5)
    }
    fn activation_threshold(&self) -> f64 {
        1.0
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let (Some(home), Some(away)) = (
            fatigue_load(&ctx.home.schedule, ctx.week),
            fatigue_load(&ctx.away.schedule, ctx.week),
        ) else {
            return Err(MissingInput::new(format!(
                "fewer than {MIN_GAMES} games in the last {LOOKBACK_WEEKS} weeks"
            )));
        };

        let value = (away.score() - home.score()) * 0.5;
        let confidence = match value.abs() {
            v if v > 2.5 => Confidence::VeryHigh,
            v if v > 1.5 => Confidence::High,
            v if v > 0.8 => Confidence::Medium,
            _ => Confidence::Low,
        };

        Ok(FactorSignal::new(value, confidence).because(format!(
            "fatigue home {:.1} ({} road, {} short rest), away {:.1} ({} road, {} short rest)",
            home.score(),
            home.road_games,
            home.short_rests,
            away.score(),
            away.road_games,
            away.short_rests
        )))
    }
}
