use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    CoachingRecord, DataField, MarketLine, MatchupHistory, Schedule, TeamIdentity, TeamStats,
};
use super::rate_limiter::RateLimiter;

/// A source of team statistics and history.
///
/// `Ok(None)` means the source answered but had nothing usable for the
/// request; callers treat it exactly like an error and move down the
/// fallback chain.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Human-readable name for logging and cache keys.
    fn name(&self) -> &str;

    /// Share of a `field` record this source fills with real data. A source
    /// that pads part of a record with neutral values reports less than 1.
    fn coverage(&self, _field: DataField) -> f64 {
        1.0
    }

    /// The limiter this source charges per upstream request, if it has one.
    fn limiter(&self) -> Option<&RateLimiter> {
        None
    }

    async fn get_team_identity(&self, team: &str) -> Result<Option<TeamIdentity>>;

    async fn get_team_stats(&self, team: &str, season: i32) -> Result<Option<TeamStats>>;

    async fn get_coaching_info(&self, team: &str, season: i32) -> Result<Option<CoachingRecord>>;

    async fn get_schedule(&self, team: &str, season: i32) -> Result<Option<Schedule>>;

    /// All-time series oriented so `home_wins` counts wins by `home`.
    async fn get_matchup_history(&self, home: &str, away: &str) -> Result<Option<MatchupHistory>>;
}

/// A source of sportsbook point spreads.
#[async_trait]
pub trait MarketSource: Send + Sync {
    fn name(&self) -> &str;

    fn limiter(&self) -> Option<&RateLimiter> {
        None
    }

    /// Consensus home spread across bookmakers, or `None` when no book
    /// currently lists the game.
    async fn get_consensus_spread(&self, home: &str, away: &str) -> Result<Option<MarketLine>>;
}
