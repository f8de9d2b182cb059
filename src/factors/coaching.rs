//! Coaching and program-level factors.

use super::{
    require, sourcing_confidence, Confidence, FactorCalculator, FactorCategory, FactorSignal,
    MissingInput,
};
use crate::data::{CoachingRecord, DataField, GameContext, GameRecord, Schedule, Side};

/// Gap in head-coaching experience and tenure.
pub struct ExperienceDifferential;

/// 0–1 experience score: 70% career length (saturating at 15 years), 30%
/// tenure at the school (saturating at 8). First-year head coaches are halved.
pub fn experience_score(coach: &CoachingRecord) -> f64 {
    let career = (coach.experience_years.min(15) as f64 / 15.0) * 0.7;
    let tenure = (coach.tenure_years.min(8) as f64 / 8.0) * 0.3;
    let score = career + tenure;
    if coach.experience_years <= 1 {
        score * 0.5
    } else {
        score
    }
}

impl FactorCalculator for ExperienceDifferential {
    fn name(&self) -> &'static str {
        "experience_differential"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Primary
    }
    fn base_weight(&self) -> f64 {
        0.25
    }
    fn output_range(&self) -> (f64, f64) {
        (-2.0, 2.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.25
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        let fields = [
            DataField::Coaching(Side::Home),
            DataField::Coaching(Side::Away),
        ];
        require(ctx, &fields)?;

        let home = &ctx.home.coaching;
        let away = &ctx.away.coaching;
        let value = (experience_score(home) - experience_score(away)) * 2.0;

        Ok(FactorSignal::new(value, sourcing_confidence(ctx, &fields)).because(format!(
            "{} ({}y, {}y at school) vs {} ({}y, {}y at school)",
            home.coach,
            home.experience_years,
            home.tenure_years,
            away.coach,
            away.experience_years,
            away.tenure_years
        )))
    }
}

fn win_pct(games: &[&GameRecord]) -> Option<f64> {
    let decided: Vec<i64> = games
        .iter()
        .filter_map(|g| g.margin())
        .filter(|m| *m != 0)
        .collect();
    if decided.is_empty() {
        return None;
    }
    Some(decided.iter().filter(|m| **m > 0).count() as f64 / decided.len() as f64)
}

/// Job-security and game-stakes pressure; pressure hurts the side carrying it.
pub struct PressureSituation;

fn job_pressure(win_pct: Option<f64>) -> f64 {
    match win_pct {
        Some(p) if p < 0.3 => 0.8,
        Some(p) if p < 0.5 => 0.6,
        Some(p) if p > 0.8 => 0.2,
        _ => 0.4,
    }
}

fn game_pressure(week: u32, is_home: bool) -> f64 {
    let mut pressure = 0.3;
    if week >= 12 {
        pressure += 0.2;
    } else if week <= 3 {
        pressure -= 0.1;
    }
    if is_home {
        pressure += 0.1;
    }
    pressure
}

fn team_pressure(schedule: &Schedule, week: u32, is_home: bool) -> f64 {
    let played = schedule.completed_before(week);
    job_pressure(win_pct(&played)) * 0.4 + game_pressure(week, is_home) * 0.6
}

impl FactorCalculator for PressureSituation {
    fn name(&self) -> &'static str {
        "pressure_situation"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.15
    }
    fn output_range(&self) -> (f64, f64) {
        (-2.0, 2.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.1
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let home = team_pressure(&ctx.home.schedule, ctx.week, true);
        let away = team_pressure(&ctx.away.schedule, ctx.week, false);
        let played = ctx
            .home
            .schedule
            .completed_before(ctx.week)
            .len()
            .min(ctx.away.schedule.completed_before(ctx.week).len());
        let confidence = if played >= 4 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new(away - home, confidence)
            .because(format!("pressure home {:.2}, away {:.2}", home, away)))
    }
}

/// Home team's record at home against the visitor's record on the road.
pub struct VenuePerformance;

const MIN_VENUE_GAMES: usize = 2;

impl FactorCalculator for VenuePerformance {
    fn name(&self) -> &'static str {
        "venue_performance"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.20
    }
    fn output_range(&self) -> (f64, f64) {
        (-1.5, 1.5)
    }
    fn activation_threshold(&self) -> f64 {
        0.2
    }

    fn evaluate(&self, _home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(
            ctx,
            &[DataField::Schedule(Side::Home), DataField::Schedule(Side::Away)],
        )?;

        let home_games: Vec<&GameRecord> = ctx
            .home
            .schedule
            .completed_before(ctx.week)
            .into_iter()
            .filter(|g| g.is_home && !g.neutral_site)
            .collect();
        let road_games: Vec<&GameRecord> = ctx
            .away
            .schedule
            .completed_before(ctx.week)
            .into_iter()
            .filter(|g| g.is_road())
            .collect();

        if home_games.len() < MIN_VENUE_GAMES || road_games.len() < MIN_VENUE_GAMES {
            return Err(MissingInput::new(format!(
                "need {} home and road games, have {} and {}",
                MIN_VENUE_GAMES,
                home_games.len(),
                road_games.len()
            )));
        }

        let (Some(home_pct), Some(road_pct)) = (win_pct(&home_games), win_pct(&road_games)) else {
            return Err(MissingInput::new("no decided venue games"));
        };

        let value = (home_pct - 0.5) * 2.0 - (road_pct - 0.5) * 1.5 + 0.3;
        let confidence = if home_games.len().min(road_games.len()) >= 4 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new(value, confidence).because(format!(
            "home win% at home {:.0}%, away win% on road {:.0}%",
            home_pct * 100.0,
            road_pct * 100.0
        )))
    }
}

/// All-time series record between the two programs.
pub struct HeadToHeadRecord;

const MIN_MEETINGS: u32 = 3;

impl FactorCalculator for HeadToHeadRecord {
    fn name(&self) -> &'static str {
        "head_to_head_record"
    }
    fn category(&self) -> FactorCategory {
        FactorCategory::Secondary
    }
    fn base_weight(&self) -> f64 {
        0.15
    }
    fn output_range(&self) -> (f64, f64) {
        (-1.0, 1.0)
    }
    fn activation_threshold(&self) -> f64 {
        0.1
    }

    fn evaluate(&self, home: &str, _away: &str, ctx: &GameContext) -> Result<FactorSignal, MissingInput> {
        require(ctx, &[DataField::Matchup])?;

        let series = &ctx.matchup;
        let decided = series.decided();
        if decided < MIN_MEETINGS {
            return Err(MissingInput::new(format!(
                "only {decided} decided meetings, need {MIN_MEETINGS}"
            )));
        }

        let home_pct = series.home_wins as f64 / decided as f64;
        let confidence = if decided >= 10 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        Ok(FactorSignal::new((home_pct - 0.5) * 2.0, confidence).because(format!(
            "{} leads series {}-{}-{}",
            home, series.home_wins, series.away_wins, series.ties
        )))
    }
}
