use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::models::{
    plausible_score, CoachingRecord, GameRecord, MatchupHistory, Schedule, TeamIdentity,
    TeamStats,
};
use super::provider::StatsSource;
use super::rate_limiter::RateLimiter;

/// Primary stats source backed by the CollegeFootballData API.
/// Docs: <https://api.collegefootballdata.com>
///
/// Every HTTP request is charged to `limiter`, so a trait call that needs
/// two endpoints spends two permits.
pub struct CfbdClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl CfbdClient {
    pub fn new(api_key: Option<&str>, base_url: &str, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(CfbdClient {
            http,
            api_key: api_key.map(str::to_string),
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.limiter.acquire().await;
        debug!("CFBD GET {} {:?}", url, query);

        let mut req = self.http.get(&url).query(query);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.context("CFBD request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("CFBD error on {}: {}", path, resp.status());
        }
        resp.json().await.context("Failed to parse CFBD response")
    }

    async fn games(&self, team: &str, season: i32) -> Result<Value> {
        self.get_json(
            "/games",
            &[
                ("year", season.to_string()),
                ("team", team.to_string()),
                ("seasonType", "regular".to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl StatsSource for CfbdClient {
    fn name(&self) -> &str {
        "cfbd"
    }

    fn limiter(&self) -> Option<&RateLimiter> {
        Some(self.limiter.as_ref())
    }

    async fn get_team_identity(&self, team: &str) -> Result<Option<TeamIdentity>> {
        let raw = self.get_json("/teams", &[]).await?;
        Ok(parse_team_identity(&raw, team))
    }

    async fn get_team_stats(&self, team: &str, season: i32) -> Result<Option<TeamStats>> {
        let advanced = self
            .get_json(
                "/stats/season/advanced",
                &[("year", season.to_string()), ("team", team.to_string())],
            )
            .await?;
        let games = self.games(team, season).await?;
        Ok(parse_team_stats(&advanced, &parse_schedule(&games, team)))
    }

    async fn get_coaching_info(&self, team: &str, season: i32) -> Result<Option<CoachingRecord>> {
        let raw = self
            .get_json(
                "/coaches",
                &[("team", team.to_string()), ("year", season.to_string())],
            )
            .await?;
        Ok(parse_coaching(&raw, team, season))
    }

    async fn get_schedule(&self, team: &str, season: i32) -> Result<Option<Schedule>> {
        let raw = self.games(team, season).await?;
        let schedule = parse_schedule(&raw, team);
        Ok((!schedule.is_empty()).then_some(schedule))
    }

    async fn get_matchup_history(&self, home: &str, away: &str) -> Result<Option<MatchupHistory>> {
        let raw = self
            .get_json(
                "/teams/matchup",
                &[("team1", home.to_string()), ("team2", away.to_string())],
            )
            .await?;
        Ok(parse_matchup(&raw))
    }
}

/// CFBD has served both camelCase and snake_case keys across API versions.
fn field<'a>(v: &'a Value, names: &[&str]) -> &'a Value {
    names
        .iter()
        .map(|n| &v[*n])
        .find(|f| !f.is_null())
        .unwrap_or(&Value::Null)
}

fn same_team(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn parse_team_identity(raw: &Value, team: &str) -> Option<TeamIdentity> {
    let row = raw
        .as_array()?
        .iter()
        .find(|t| t["school"].as_str().is_some_and(|s| same_team(s, team)))?;

    Some(TeamIdentity {
        name: row["school"].as_str()?.to_string(),
        abbreviation: row["abbreviation"].as_str().map(str::to_string),
        conference: row["conference"].as_str().map(str::to_string),
        espn_id: row["id"].as_i64().map(|id| id.to_string()),
    })
}

fn parse_schedule(raw: &Value, team: &str) -> Schedule {
    let Some(games) = raw.as_array() else {
        return Schedule::default();
    };

    let records = games
        .iter()
        .filter_map(|g| {
            let home = field(g, &["homeTeam", "home_team"]).as_str()?;
            let away = field(g, &["awayTeam", "away_team"]).as_str()?;
            let is_home = same_team(home, team);
            if !is_home && !same_team(away, team) {
                return None;
            }
            let home_pts = field(g, &["homePoints", "home_points"])
                .as_u64()
                .and_then(plausible_score);
            let away_pts = field(g, &["awayPoints", "away_points"])
                .as_u64()
                .and_then(plausible_score);
            let (points_for, points_against, opponent) = if is_home {
                (home_pts, away_pts, away)
            } else {
                (away_pts, home_pts, home)
            };

            Some(GameRecord {
                week: g["week"].as_u64()? as u32,
                opponent: opponent.to_string(),
                is_home,
                neutral_site: field(g, &["neutralSite", "neutral_site"])
                    .as_bool()
                    .unwrap_or(false),
                conference_game: field(g, &["conferenceGame", "conference_game"])
                    .as_bool()
                    .unwrap_or(false),
                points_for,
                points_against,
                start_date: field(g, &["startDate", "start_date"])
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc)),
            })
        })
        .collect();

    Schedule::new(records)
}

/// Season efficiency comes from the advanced-stats row; scoring comes from
/// the completed games so both sides of the ledger use the same sample.
fn parse_team_stats(advanced: &Value, schedule: &Schedule) -> Option<TeamStats> {
    let row = advanced.as_array()?.first()?;
    let offense = &row["offense"];
    let defense = &row["defense"];

    let completed: Vec<&GameRecord> = schedule.games.iter().filter(|g| g.is_completed()).collect();
    if completed.is_empty() {
        return None;
    }
    let games = completed.len() as f64;
    let scored: u64 = completed.iter().filter_map(|g| g.points_for).map(u64::from).sum();
    let allowed: u64 = completed.iter().filter_map(|g| g.points_against).map(u64::from).sum();

    let plays = offense["plays"].as_f64()?;

    Some(TeamStats {
        games: completed.len() as u32,
        points_per_game: scored as f64 / games,
        points_allowed_per_game: allowed as f64 / games,
        success_rate_off: field(offense, &["successRate", "success_rate"]).as_f64()?,
        success_rate_def: field(defense, &["successRate", "success_rate"]).as_f64()?,
        explosiveness_off: offense["explosiveness"].as_f64()?,
        explosiveness_def: defense["explosiveness"].as_f64()?,
        plays_per_game: plays / games,
        havoc_rate: defense["havoc"]["total"].as_f64().unwrap_or(0.15),
    })
}

fn parse_coaching(raw: &Value, team: &str, season: i32) -> Option<CoachingRecord> {
    let coach = raw.as_array()?.first()?;
    let seasons = coach["seasons"].as_array()?;
    if !seasons
        .iter()
        .any(|s| s["year"].as_i64() == Some(season as i64))
    {
        return None;
    }

    let name = format!(
        "{} {}",
        field(coach, &["firstName", "first_name"]).as_str().unwrap_or(""),
        field(coach, &["lastName", "last_name"]).as_str().unwrap_or("")
    )
    .trim()
    .to_string();

    let years: Vec<i64> = seasons.iter().filter_map(|s| s["year"].as_i64()).collect();
    let earliest = years.iter().copied().min().unwrap_or(season as i64);
    let span = (season as i64 - earliest + 1).max(1) as u32;
    let experience_years = span.max(years.len() as u32);

    let tenure_years = seasons
        .iter()
        .filter(|s| s["school"].as_str().is_some_and(|sch| same_team(sch, team)))
        .filter(|s| s["year"].as_i64().is_some_and(|y| y <= season as i64))
        .count()
        .max(1) as u32;

    let count = |s: &Value, key: &str| u32::try_from(s[key].as_u64().unwrap_or(0)).unwrap_or(u32::MAX);
    let (career_wins, career_losses) = seasons.iter().fold((0u32, 0u32), |(w, l), s| {
        (
            w.saturating_add(count(s, "wins")),
            l.saturating_add(count(s, "losses")),
        )
    });

    Some(CoachingRecord {
        coach: if name.is_empty() {
            format!("{team} head coach")
        } else {
            name
        },
        experience_years,
        tenure_years,
        career_wins,
        career_losses,
    })
}

fn parse_matchup(raw: &Value) -> Option<MatchupHistory> {
    Some(MatchupHistory {
        home_wins: field(raw, &["team1Wins", "team1_wins"]).as_u64()? as u32,
        away_wins: field(raw, &["team2Wins", "team2_wins"]).as_u64()? as u32,
        ties: raw["ties"].as_u64().unwrap_or(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::JsonServer;
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::time::Duration;

    fn games_fixture() -> Value {
        json!([
            {"week": 1, "homeTeam": "Georgia", "awayTeam": "Clemson", "homePoints": 34, "awayPoints": 3,
             "neutralSite": true, "conferenceGame": false, "startDate": "2024-08-31T16:00:00.000Z"},
            {"week": 2, "homeTeam": "Georgia", "awayTeam": "Tennessee Tech", "homePoints": 48, "awayPoints": 3,
             "neutralSite": false, "conferenceGame": false, "startDate": "2024-09-07T16:00:00.000Z"},
            {"week": 3, "home_team": "Kentucky", "away_team": "Georgia", "home_points": 12, "away_points": 13,
             "neutral_site": false, "conference_game": true, "start_date": "2024-09-14T23:30:00.000Z"},
            {"week": 5, "homeTeam": "Alabama", "awayTeam": "Georgia", "homePoints": null, "awayPoints": null}
        ])
    }

    #[test]
    fn test_parse_schedule_orients_to_team() {
        let schedule = parse_schedule(&games_fixture(), "georgia");
        assert_eq!(schedule.len(), 4);

        let kentucky = &schedule.games[2];
        assert!(!kentucky.is_home);
        assert!(kentucky.conference_game);
        assert_eq!(kentucky.opponent, "Kentucky");
        assert_eq!(kentucky.margin(), Some(1));

        assert!(schedule.games[0].neutral_site);
        assert!(!schedule.games[3].is_completed());
        assert!(schedule.games[1].start_date.is_some());
    }

    #[test]
    fn test_parse_team_stats() {
        let advanced = json!([{
            "season": 2024, "team": "Georgia",
            "offense": {"plays": 210, "successRate": 0.48, "explosiveness": 1.3},
            "defense": {"successRate": 0.35, "explosiveness": 1.1, "havoc": {"total": 0.19}}
        }]);
        let schedule = parse_schedule(&games_fixture(), "Georgia");
        let stats = parse_team_stats(&advanced, &schedule).unwrap();

        assert_eq!(stats.games, 3);
        assert_relative_eq!(stats.points_per_game, 95.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(stats.points_allowed_per_game, 18.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(stats.plays_per_game, 70.0, epsilon = 1e-9);
        assert_relative_eq!(stats.havoc_rate, 0.19);
    }

    #[test]
    fn test_parse_team_stats_incomplete() {
        let schedule = parse_schedule(&games_fixture(), "Georgia");
        assert!(parse_team_stats(&json!([]), &schedule).is_none());
        let no_success = json!([{"offense": {"plays": 100}, "defense": {}}]);
        assert!(parse_team_stats(&no_success, &schedule).is_none());
    }

    #[test]
    fn test_parse_coaching_experience_and_tenure() {
        let raw = json!([{
            "firstName": "Kirby", "lastName": "Smart",
            "seasons": [
                {"school": "Georgia", "year": 2016, "wins": 8, "losses": 5},
                {"school": "Georgia", "year": 2017, "wins": 13, "losses": 2},
                {"school": "Georgia", "year": 2018, "wins": 11, "losses": 3}
            ]
        }]);
        let coach = parse_coaching(&raw, "Georgia", 2018).unwrap();
        assert_eq!(coach.coach, "Kirby Smart");
        assert_eq!(coach.experience_years, 3);
        assert_eq!(coach.tenure_years, 3);
        assert_eq!(coach.career_wins, 32);
        assert_eq!(coach.career_losses, 10);
    }

    #[test]
    fn test_parse_coaching_requires_current_season() {
        let raw = json!([{"firstName": "A", "lastName": "B",
            "seasons": [{"school": "Georgia", "year": 2015}]}]);
        assert!(parse_coaching(&raw, "Georgia", 2018).is_none());
        assert!(parse_coaching(&json!([]), "Georgia", 2018).is_none());
    }

    #[test]
    fn test_parse_identity_and_matchup() {
        let teams = json!([
            {"id": 61, "school": "Georgia", "abbreviation": "UGA", "conference": "SEC"},
            {"id": 59, "school": "Georgia Tech", "abbreviation": "GT", "conference": "ACC"}
        ]);
        let id = parse_team_identity(&teams, "GEORGIA").unwrap();
        assert_eq!(id.abbreviation.as_deref(), Some("UGA"));
        assert_eq!(id.espn_id.as_deref(), Some("61"));
        assert!(parse_team_identity(&teams, "Auburn").is_none());

        let matchup = parse_matchup(&json!({"team1Wins": 64, "team2Wins": 56, "ties": 8})).unwrap();
        assert_eq!(matchup.decided(), 120);
        assert!(parse_matchup(&json!({})).is_none());
    }

    #[test]
    fn test_oversized_scores_are_dropped_not_summed() {
        let games = json!([
            {"week": 1, "homeTeam": "Georgia", "awayTeam": "Clemson",
             "homePoints": 3_000_000_000u64, "awayPoints": 3},
            {"week": 2, "homeTeam": "Georgia", "awayTeam": "Auburn",
             "homePoints": 3_000_000_000u64, "awayPoints": 7},
            {"week": 3, "homeTeam": "Georgia", "awayTeam": "Kentucky",
             "homePoints": 28, "awayPoints": 14}
        ]);
        let advanced = json!([{
            "offense": {"plays": 70, "successRate": 0.48, "explosiveness": 1.3},
            "defense": {"successRate": 0.35, "explosiveness": 1.1}
        }]);
        let schedule = parse_schedule(&games, "Georgia");
        assert_eq!(schedule.games[0].points_for, None);
        assert!(!schedule.games[0].is_completed());

        let stats = parse_team_stats(&advanced, &schedule).unwrap();
        assert_eq!(stats.games, 1);
        assert_relative_eq!(stats.points_per_game, 28.0);
    }

    fn cfbd_routes(path: &str) -> Value {
        match path {
            "/stats/season/advanced" => json!([{
                "offense": {"plays": 210, "successRate": 0.48, "explosiveness": 1.3},
                "defense": {"successRate": 0.35, "explosiveness": 1.1}
            }]),
            "/games" => games_fixture(),
            _ => json!([]),
        }
    }

    #[tokio::test]
    async fn test_each_http_request_is_charged() {
        let server = JsonServer::start(cfbd_routes).await;
        let limiter = Arc::new(RateLimiter::new("cfbd", 150, Duration::from_secs(86_400)));
        let client = CfbdClient::new(None, &server.base_url, Arc::clone(&limiter)).unwrap();

        let stats = client.get_team_stats("Georgia", 2024).await.unwrap();
        assert!(stats.is_some());
        assert_eq!(server.paths(), vec!["/stats/season/advanced", "/games"]);
        assert_eq!(limiter.in_window().await, 2);

        client.get_schedule("Georgia", 2024).await.unwrap();
        assert_eq!(limiter.in_window().await, server.paths().len());
    }
}
