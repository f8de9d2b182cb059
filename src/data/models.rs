use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static team metadata; changes at most once a season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamIdentity {
    pub name: String,
    pub abbreviation: Option<String>,
    pub conference: Option<String>,
    /// ESPN numeric team id, used to address the fallback source
    pub espn_id: Option<String>,
}

impl TeamIdentity {
    pub fn neutral(team: &str) -> Self {
        TeamIdentity {
            name: team.to_string(),
            abbreviation: None,
            conference: None,
            espn_id: None,
        }
    }
}

/// Season-to-date team statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub games: u32,
    pub points_per_game: f64,
    pub points_allowed_per_game: f64,
    /// Offensive success rate (0.0–1.0)
    pub success_rate_off: f64,
    /// Success rate allowed on defense (0.0–1.0)
    pub success_rate_def: f64,
    pub explosiveness_off: f64,
    pub explosiveness_def: f64,
    pub plays_per_game: f64,
    /// Share of defensive snaps producing a TFL, sack, or takeaway
    pub havoc_rate: f64,
}

impl TeamStats {
    pub fn neutral() -> Self {
        TeamStats {
            games: 0,
            points_per_game: 25.0,
            points_allowed_per_game: 25.0,
            success_rate_off: 0.40,
            success_rate_def: 0.40,
            explosiveness_off: 1.0,
            explosiveness_def: 1.0,
            plays_per_game: 70.0,
            havoc_rate: 0.15,
        }
    }
}

/// Head coach record as of the requested season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingRecord {
    pub coach: String,
    /// Seasons as an FBS head coach, any school
    pub experience_years: u32,
    /// Seasons at the current school
    pub tenure_years: u32,
    pub career_wins: u32,
    pub career_losses: u32,
}

impl CoachingRecord {
    pub fn neutral() -> Self {
        CoachingRecord {
            coach: "unknown".to_string(),
            experience_years: 5,
            tenure_years: 3,
            career_wins: 0,
            career_losses: 0,
        }
    }
}

/// Highest score a feed may report before the value is treated as corrupt.
pub const MAX_PLAUSIBLE_SCORE: u64 = 300;

/// A feed score as points, or `None` when it is out of any plausible range.
pub fn plausible_score(raw: u64) -> Option<u32> {
    (raw <= MAX_PLAUSIBLE_SCORE).then_some(raw as u32)
}

/// One game on a team's schedule, seen from that team's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    pub week: u32,
    pub opponent: String,
    pub is_home: bool,
    pub neutral_site: bool,
    pub conference_game: bool,
    pub points_for: Option<u32>,
    pub points_against: Option<u32>,
    pub start_date: Option<DateTime<Utc>>,
}

impl GameRecord {
    pub fn is_completed(&self) -> bool {
        self.points_for.is_some() && self.points_against.is_some()
    }

    /// Points for minus points against, for completed games.
    pub fn margin(&self) -> Option<i64> {
        Some(i64::from(self.points_for?) - i64::from(self.points_against?))
    }

    /// Road game from this team's side. Neutral-site games are not road games.
    pub fn is_road(&self) -> bool {
        !self.is_home && !self.neutral_site
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Ordered by week
    pub games: Vec<GameRecord>,
}

impl Schedule {
    pub fn new(mut games: Vec<GameRecord>) -> Self {
        games.sort_by_key(|g| g.week);
        Schedule { games }
    }

    /// Completed games played before `week`, oldest first.
    pub fn completed_before(&self, week: u32) -> Vec<&GameRecord> {
        self.games
            .iter()
            .filter(|g| g.week < week && g.is_completed())
            .collect()
    }

    /// Wins and losses in completed games before `week`.
    pub fn record_before(&self, week: u32) -> (u32, u32) {
        self.completed_before(week)
            .iter()
            .filter_map(|g| g.margin())
            .fold((0, 0), |(w, l), m| match m {
                m if m > 0 => (w + 1, l),
                m if m < 0 => (w, l + 1),
                _ => (w, l),
            })
    }

    /// Games scheduled for `week` (inclusive lower bound) or later.
    pub fn games_from(&self, week: u32) -> impl Iterator<Item = &GameRecord> {
        self.games.iter().filter(move |g| g.week >= week)
    }

    /// Total regular-season games listed.
    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

/// All-time series between the two sides, oriented to this game's home team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchupHistory {
    pub home_wins: u32,
    pub away_wins: u32,
    pub ties: u32,
}

impl MatchupHistory {
    /// Meetings that produced a winner.
    pub fn decided(&self) -> u32 {
        self.home_wins + self.away_wins
    }
}

/// Consensus point spread across bookmakers, home perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketLine {
    /// Negative when the home team is favored
    pub spread: f64,
    pub book_count: usize,
    /// Standard deviation of the individual books' spreads
    pub dispersion: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => write!(f, "home"),
            Side::Away => write!(f, "away"),
        }
    }
}

/// The quality-scored parts of a [`GameContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataField {
    Identity(Side),
    Stats(Side),
    Coaching(Side),
    Schedule(Side),
    Matchup,
}

impl DataField {
    pub const ALL: [DataField; 9] = [
        DataField::Identity(Side::Home),
        DataField::Stats(Side::Home),
        DataField::Coaching(Side::Home),
        DataField::Schedule(Side::Home),
        DataField::Identity(Side::Away),
        DataField::Stats(Side::Away),
        DataField::Coaching(Side::Away),
        DataField::Schedule(Side::Away),
        DataField::Matchup,
    ];
}

impl fmt::Display for DataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataField::Identity(side) => write!(f, "{side}.identity"),
            DataField::Stats(side) => write!(f, "{side}.stats"),
            DataField::Coaching(side) => write!(f, "{side}.coaching"),
            DataField::Schedule(side) => write!(f, "{side}.schedule"),
            DataField::Matchup => write!(f, "matchup"),
        }
    }
}

/// Where a field's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Primary,
    Fallback,
    Default,
}

impl SourceTier {
    /// Share of full quality credit a field earns from this tier.
    pub fn credit(self) -> f64 {
        match self {
            SourceTier::Primary => 1.0,
            SourceTier::Fallback => 0.75,
            SourceTier::Default => 0.0,
        }
    }
}

/// Which source filled a field, at what tier, and how much of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub tier: SourceTier,
    /// Name of the answering source; `None` for a neutral default
    pub source: Option<String>,
    /// Share of the record the source actually supplied, in `[0, 1]`.
    /// The rest holds neutral values.
    pub coverage: f64,
}

impl FieldSource {
    pub fn sourced(tier: SourceTier, source: &str, coverage: f64) -> Self {
        FieldSource {
            tier,
            source: Some(source.to_string()),
            coverage: coverage.clamp(0.0, 1.0),
        }
    }

    pub fn neutral() -> Self {
        FieldSource {
            tier: SourceTier::Default,
            source: None,
            coverage: 0.0,
        }
    }

    pub fn credit(&self) -> f64 {
        self.tier.credit() * self.coverage.clamp(0.0, 1.0)
    }
}

/// Unnamed, fully covered provenance at `tier`.
impl From<SourceTier> for FieldSource {
    fn from(tier: SourceTier) -> Self {
        match tier {
            SourceTier::Default => FieldSource::neutral(),
            _ => FieldSource {
                tier,
                source: None,
                coverage: 1.0,
            },
        }
    }
}

/// 0–100 completeness score. Fields absent from `sources` count as defaulted.
pub fn quality_score(sources: &BTreeMap<DataField, FieldSource>) -> f64 {
    let credit: f64 = DataField::ALL
        .iter()
        .map(|f| sources.get(f).map_or(0.0, FieldSource::credit))
        .sum();
    100.0 * credit / DataField::ALL.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamContext {
    /// Team identifier as requested
    pub team: String,
    pub identity: TeamIdentity,
    pub stats: TeamStats,
    pub coaching: CoachingRecord,
    pub schedule: Schedule,
}

impl TeamContext {
    pub fn neutral(team: &str) -> Self {
        TeamContext {
            team: team.to_string(),
            identity: TeamIdentity::neutral(team),
            stats: TeamStats::neutral(),
            coaching: CoachingRecord::neutral(),
            schedule: Schedule::default(),
        }
    }
}

/// Everything the factor calculators may read about one game.
///
/// Built fresh per request by the data manager and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct GameContext {
    pub home: TeamContext,
    pub away: TeamContext,
    pub week: u32,
    pub season: i32,
    pub market: Option<MarketLine>,
    pub matchup: MatchupHistory,
    pub data_sources: BTreeMap<DataField, FieldSource>,
    pub data_quality: f64,
}

impl GameContext {
    pub fn new(
        home: TeamContext,
        away: TeamContext,
        week: u32,
        season: i32,
        market: Option<MarketLine>,
        matchup: MatchupHistory,
        data_sources: BTreeMap<DataField, FieldSource>,
    ) -> Self {
        let data_quality = quality_score(&data_sources);
        GameContext {
            home,
            away,
            week,
            season,
            market,
            matchup,
            data_sources,
            data_quality,
        }
    }

    pub fn market_spread(&self) -> Option<f64> {
        self.market.as_ref().map(|m| m.spread)
    }

    pub fn team(&self, side: Side) -> &TeamContext {
        match side {
            Side::Home => &self.home,
            Side::Away => &self.away,
        }
    }

    pub fn tier(&self, field: DataField) -> SourceTier {
        self.data_sources
            .get(&field)
            .map_or(SourceTier::Default, |s| s.tier)
    }

    /// Name of the source that populated `field`, if any did.
    pub fn source_of(&self, field: DataField) -> Option<&str> {
        self.data_sources.get(&field)?.source.as_deref()
    }

    /// True when the field holds a neutral default rather than sourced data.
    pub fn is_degraded(&self, field: DataField) -> bool {
        self.tier(field) == SourceTier::Default
    }

    pub fn degraded_fields(&self) -> Vec<DataField> {
        DataField::ALL
            .into_iter()
            .filter(|f| self.is_degraded(*f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn all(tier: SourceTier) -> BTreeMap<DataField, FieldSource> {
        DataField::ALL.iter().map(|f| (*f, tier.into())).collect()
    }

    #[test]
    fn test_quality_bounds() {
        assert_relative_eq!(quality_score(&all(SourceTier::Primary)), 100.0);
        assert_relative_eq!(quality_score(&all(SourceTier::Fallback)), 75.0);
        assert_relative_eq!(quality_score(&all(SourceTier::Default)), 0.0);
        assert_relative_eq!(quality_score(&BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_quality_partial_credit() {
        let mut sources = all(SourceTier::Primary);
        sources.insert(DataField::Stats(Side::Away), SourceTier::Fallback.into());
        sources.insert(DataField::Matchup, SourceTier::Default.into());
        // (7 + 0.75 + 0) / 9
        assert_relative_eq!(quality_score(&sources), 775.0 / 9.0, epsilon = 1e-9);
    }

    #[test]
    fn test_partial_coverage_earns_partial_credit() {
        let mut sources = all(SourceTier::Primary);
        sources.insert(
            DataField::Stats(Side::Home),
            FieldSource::sourced(SourceTier::Fallback, "espn", 0.5),
        );
        // (8 + 0.75 × 0.5) / 9
        assert_relative_eq!(quality_score(&sources), 837.5 / 9.0, epsilon = 1e-9);
        assert_relative_eq!(FieldSource::sourced(SourceTier::Primary, "cfbd", 7.0).credit(), 1.0);
        assert_eq!(FieldSource::neutral().credit(), 0.0);
    }

    #[test]
    fn test_context_reports_source_per_field() {
        let mut sources: BTreeMap<DataField, FieldSource> = DataField::ALL
            .iter()
            .map(|f| (*f, FieldSource::sourced(SourceTier::Primary, "cfbd", 1.0)))
            .collect();
        sources.insert(
            DataField::Coaching(Side::Away),
            FieldSource::sourced(SourceTier::Fallback, "espn", 1.0),
        );
        sources.insert(DataField::Matchup, FieldSource::neutral());
        let ctx = GameContext::new(
            TeamContext::neutral("Georgia"),
            TeamContext::neutral("Auburn"),
            6,
            2024,
            None,
            MatchupHistory::default(),
            sources,
        );

        assert_eq!(ctx.source_of(DataField::Stats(Side::Home)), Some("cfbd"));
        assert_eq!(ctx.source_of(DataField::Coaching(Side::Away)), Some("espn"));
        assert_eq!(ctx.tier(DataField::Coaching(Side::Away)), SourceTier::Fallback);
        assert_eq!(ctx.source_of(DataField::Matchup), None);
        assert_eq!(ctx.degraded_fields(), vec![DataField::Matchup]);
    }

    fn game(week: u32, pf: Option<u32>, pa: Option<u32>) -> GameRecord {
        GameRecord {
            week,
            opponent: format!("opp{week}"),
            is_home: week % 2 == 0,
            neutral_site: false,
            conference_game: false,
            points_for: pf,
            points_against: pa,
            start_date: None,
        }
    }

    #[test]
    fn test_schedule_record_before() {
        let schedule = Schedule::new(vec![
            game(3, Some(10), Some(20)),
            game(1, Some(30), Some(7)),
            game(2, Some(21), Some(21)),
            game(4, None, None),
        ]);
        assert_eq!(schedule.games[0].week, 1);
        assert_eq!(schedule.record_before(4), (1, 1));
        assert_eq!(schedule.completed_before(3).len(), 2);
        assert_eq!(schedule.games_from(4).count(), 1);
    }

    #[test]
    fn test_field_display() {
        assert_eq!(DataField::Coaching(Side::Away).to_string(), "away.coaching");
        assert_eq!(DataField::Matchup.to_string(), "matchup");
    }

    #[test]
    fn test_road_game_excludes_neutral_site() {
        let mut g = game(1, None, None);
        g.is_home = false;
        assert!(g.is_road());
        g.neutral_site = true;
        assert!(!g.is_road());
    }
}
