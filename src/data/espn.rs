use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use super::models::{
    plausible_score, CoachingRecord, DataField, GameRecord, MatchupHistory, Schedule,
    TeamIdentity, TeamStats,
};
use super::provider::StatsSource;
use super::rate_limiter::RateLimiter;

/// Games, scoring both ways and pace: four of the nine [`TeamStats`] fields.
/// Success rates, explosiveness and havoc stay league-average.
const STATS_COVERAGE: f64 = 4.0 / 9.0;

/// Fallback stats source backed by ESPN's public site API.
///
/// ESPN exposes no advanced efficiency metrics, coaching tenure, or series
/// history, so those requests answer `Ok(None)` and efficiency fields keep
/// league-average values. Every HTTP request, the team directory included,
/// is charged to `limiter`.
pub struct EspnClient {
    http: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    /// Team directory, fetched once per client
    teams: OnceCell<Vec<TeamIdentity>>,
}

impl EspnClient {
    pub fn new(base_url: &str, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(EspnClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            teams: OnceCell::new(),
        })
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        self.limiter.acquire().await;
        debug!("ESPN GET {} {:?}", url, query);

        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .context("ESPN request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("ESPN error on {}: {}", path, resp.status());
        }
        resp.json().await.context("Failed to parse ESPN response")
    }

    async fn find_team(&self, team: &str) -> Result<Option<TeamIdentity>> {
        let teams = self
            .teams
            .get_or_try_init(|| async {
                let raw = self.get_json("/teams", &[("limit", "1000".to_string())]).await?;
                Ok::<_, anyhow::Error>(parse_team_directory(&raw))
            })
            .await?;
        Ok(match_team(teams, team).cloned())
    }

    async fn team_id(&self, team: &str) -> Result<Option<String>> {
        Ok(self.find_team(team).await?.and_then(|t| t.espn_id))
    }
}

#[async_trait]
impl StatsSource for EspnClient {
    fn name(&self) -> &str {
        "espn"
    }

    fn limiter(&self) -> Option<&RateLimiter> {
        Some(self.limiter.as_ref())
    }

    fn coverage(&self, field: DataField) -> f64 {
        match field {
            DataField::Stats(_) => STATS_COVERAGE,
            _ => 1.0,
        }
    }

    async fn get_team_identity(&self, team: &str) -> Result<Option<TeamIdentity>> {
        self.find_team(team).await
    }

    async fn get_team_stats(&self, team: &str, season: i32) -> Result<Option<TeamStats>> {
        let Some(id) = self.team_id(team).await? else {
            return Ok(None);
        };
        let schedule_raw = self
            .get_json(&format!("/teams/{id}/schedule"), &[("season", season.to_string())])
            .await?;
        let stats_raw = self
            .get_json(&format!("/teams/{id}/statistics"), &[("season", season.to_string())])
            .await?;
        Ok(parse_team_stats(&stats_raw, &parse_schedule(&schedule_raw, &id)))
    }

    async fn get_coaching_info(&self, _team: &str, _season: i32) -> Result<Option<CoachingRecord>> {
        Ok(None)
    }

    async fn get_schedule(&self, team: &str, season: i32) -> Result<Option<Schedule>> {
        let Some(id) = self.team_id(team).await? else {
            return Ok(None);
        };
        let raw = self
            .get_json(&format!("/teams/{id}/schedule"), &[("season", season.to_string())])
            .await?;
        let schedule = parse_schedule(&raw, &id);
        Ok((!schedule.is_empty()).then_some(schedule))
    }

    async fn get_matchup_history(&self, _home: &str, _away: &str) -> Result<Option<MatchupHistory>> {
        Ok(None)
    }
}

fn parse_team_directory(raw: &Value) -> Vec<TeamIdentity> {
    let Some(teams) = raw["sports"][0]["leagues"][0]["teams"].as_array() else {
        return vec![];
    };
    teams
        .iter()
        .filter_map(|entry| {
            let t = &entry["team"];
            Some(TeamIdentity {
                name: t["location"]
                    .as_str()
                    .or_else(|| t["displayName"].as_str())?
                    .to_string(),
                abbreviation: t["abbreviation"].as_str().map(str::to_string),
                conference: None,
                espn_id: t["id"].as_str().map(str::to_string),
            })
        })
        .collect()
}

fn match_team<'a>(teams: &'a [TeamIdentity], team: &str) -> Option<&'a TeamIdentity> {
    let wanted = team.trim();
    teams
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(wanted))
        .or_else(|| {
            teams.iter().find(|t| {
                t.abbreviation
                    .as_deref()
                    .is_some_and(|a| a.eq_ignore_ascii_case(wanted))
            })
        })
}

/// Scores arrive as `{"value": 24.0}` on the schedule endpoint and as bare
/// strings elsewhere.
fn score(v: &Value) -> Option<u32> {
    v["value"]
        .as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        .or_else(|| v.as_f64())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .and_then(|s| plausible_score(s as u64))
}

/// ESPN dates usually omit seconds (`2024-08-31T16:00Z`), which RFC 3339 rejects.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(raw) {
        return Some(d.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw.trim_end_matches('Z'), "%Y-%m-%dT%H:%M")
        .ok()
        .map(|d| d.and_utc())
}

fn parse_schedule(raw: &Value, team_id: &str) -> Schedule {
    let Some(events) = raw["events"].as_array() else {
        return Schedule::default();
    };

    let games = events
        .iter()
        .filter_map(|ev| {
            let comp = &ev["competitions"][0];
            let competitors = comp["competitors"].as_array()?;
            let us = competitors.iter().find(|c| c["id"].as_str() == Some(team_id))?;
            let them = competitors.iter().find(|c| c["id"].as_str() != Some(team_id))?;

            let completed = comp["status"]["type"]["completed"].as_bool().unwrap_or(false);
            let (points_for, points_against) = if completed {
                (score(&us["score"]), score(&them["score"]))
            } else {
                (None, None)
            };

            Some(GameRecord {
                week: ev["week"]["number"].as_u64()? as u32,
                opponent: them["team"]["location"]
                    .as_str()
                    .or_else(|| them["team"]["displayName"].as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                is_home: us["homeAway"].as_str() == Some("home"),
                neutral_site: comp["neutralSite"].as_bool().unwrap_or(false),
                conference_game: comp["conferenceCompetition"].as_bool().unwrap_or(false),
                points_for,
                points_against,
                start_date: ev["date"].as_str().and_then(parse_date),
            })
        })
        .collect();

    Schedule::new(games)
}

fn stat_value(raw: &Value, name: &str) -> Option<f64> {
    raw["results"]["stats"]["categories"]
        .as_array()?
        .iter()
        .filter_map(|c| c["stats"].as_array())
        .flatten()
        .find(|s| s["name"].as_str() == Some(name))
        .and_then(|s| s["value"].as_f64())
}

fn parse_team_stats(raw: &Value, schedule: &Schedule) -> Option<TeamStats> {
    let completed: Vec<&GameRecord> = schedule.games.iter().filter(|g| g.is_completed()).collect();
    if completed.is_empty() {
        return None;
    }
    let games = completed.len() as f64;
    let scored: u64 = completed.iter().filter_map(|g| g.points_for).map(u64::from).sum();
    let allowed: u64 = completed.iter().filter_map(|g| g.points_against).map(u64::from).sum();

    let neutral = TeamStats::neutral();
    let plays_per_game = stat_value(raw, "totalOffensivePlays")
        .map(|p| p / games)
        .unwrap_or(neutral.plays_per_game);

    Some(TeamStats {
        games: completed.len() as u32,
        points_per_game: scored as f64 / games,
        points_allowed_per_game: allowed as f64 / games,
        plays_per_game,
        ..neutral
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::models::Side;
    use crate::data::testing::JsonServer;
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::time::Duration;

    fn schedule_fixture() -> Value {
        json!({"events": [
            {"week": {"number": 1}, "date": "2024-08-31T16:00Z",
             "competitions": [{"neutralSite": true, "conferenceCompetition": false,
                "status": {"type": {"completed": true}},
                "competitors": [
                    {"id": "61", "homeAway": "home", "score": {"value": 34.0}, "team": {"location": "Georgia"}},
                    {"id": "228", "homeAway": "away", "score": {"value": 3.0}, "team": {"location": "Clemson"}}
                ]}]},
            {"week": {"number": 3}, "date": "2024-09-14T23:30Z",
             "competitions": [{"neutralSite": false, "conferenceCompetition": true,
                "status": {"type": {"completed": true}},
                "competitors": [
                    {"id": "96", "homeAway": "home", "score": "12", "team": {"location": "Kentucky"}},
                    {"id": "61", "homeAway": "away", "score": "13", "team": {"location": "Georgia"}}
                ]}]},
            {"week": {"number": 5}, "date": "2024-09-28T19:30Z",
             "competitions": [{"status": {"type": {"completed": false}},
                "competitors": [
                    {"id": "333", "homeAway": "home", "team": {"location": "Alabama"}},
                    {"id": "61", "homeAway": "away", "team": {"location": "Georgia"}}
                ]}]}
        ]})
    }

    #[test]
    fn test_parse_schedule() {
        let schedule = parse_schedule(&schedule_fixture(), "61");
        assert_eq!(schedule.len(), 3);
        assert!(schedule.games[0].is_home);
        assert!(schedule.games[0].neutral_site);
        assert_eq!(schedule.games[1].opponent, "Kentucky");
        assert_eq!(schedule.games[1].margin(), Some(1));
        assert!(!schedule.games[2].is_completed());
        assert!(schedule.games[0].start_date.is_some());
    }

    #[test]
    fn test_parse_stats_from_schedule() {
        let stats_raw = json!({"results": {"stats": {"categories": [
            {"name": "general", "stats": [{"name": "totalOffensivePlays", "value": 140.0}]}
        ]}}});
        let schedule = parse_schedule(&schedule_fixture(), "61");
        let stats = parse_team_stats(&stats_raw, &schedule).unwrap();
        assert_eq!(stats.games, 2);
        assert_relative_eq!(stats.points_per_game, 23.5);
        assert_relative_eq!(stats.points_allowed_per_game, 7.5);
        assert_relative_eq!(stats.plays_per_game, 70.0);
        assert_relative_eq!(stats.success_rate_off, TeamStats::neutral().success_rate_off);
    }

    #[test]
    fn test_parse_date_without_seconds() {
        let d = parse_date("2024-08-31T16:00Z").unwrap();
        assert_eq!(d.to_rfc3339(), "2024-08-31T16:00:00+00:00");
        assert!(parse_date("2024-08-31T16:00:00Z").is_some());
        assert!(parse_date("garbage").is_none());
    }

    #[test]
    fn test_stats_need_completed_games() {
        assert!(parse_team_stats(&json!({}), &Schedule::default()).is_none());
    }

    #[test]
    fn test_team_directory_lookup() {
        let raw = json!({"sports": [{"leagues": [{"teams": [
            {"team": {"id": "61", "location": "Georgia", "abbreviation": "UGA"}},
            {"team": {"id": "59", "location": "Georgia Tech", "abbreviation": "GT"}}
        ]}]}]});
        let teams = parse_team_directory(&raw);
        assert_eq!(teams.len(), 2);
        assert_eq!(match_team(&teams, "georgia").unwrap().espn_id.as_deref(), Some("61"));
        assert_eq!(match_team(&teams, "gt").unwrap().name, "Georgia Tech");
        assert!(match_team(&teams, "Auburn").is_none());
    }

    #[test]
    fn test_absurd_scores_are_not_completed_games() {
        assert_eq!(score(&json!({"value": 3.0e9})), None);
        assert_eq!(score(&json!("-4")), None);
        assert_eq!(score(&json!("31")), Some(31));
    }

    fn espn_routes(path: &str) -> Value {
        match path {
            "/teams" => json!({"sports": [{"leagues": [{"teams": [
                {"team": {"id": "61", "location": "Georgia", "abbreviation": "UGA"}}
            ]}]}]}),
            "/teams/61/schedule" => schedule_fixture(),
            "/teams/61/statistics" => json!({"results": {"stats": {"categories": []}}}),
            _ => json!({}),
        }
    }

    #[tokio::test]
    async fn test_directory_and_each_request_are_charged() {
        let server = JsonServer::start(espn_routes).await;
        let limiter = Arc::new(RateLimiter::new("espn", 60, Duration::from_secs(60)));
        let client = EspnClient::new(&server.base_url, Arc::clone(&limiter)).unwrap();

        assert!(client.get_team_stats("Georgia", 2024).await.unwrap().is_some());
        assert_eq!(
            server.paths(),
            vec!["/teams", "/teams/61/schedule", "/teams/61/statistics"]
        );
        assert_eq!(limiter.in_window().await, 3);

        // the directory is fetched once per client
        assert!(client.get_schedule("Georgia", 2024).await.unwrap().is_some());
        assert_eq!(limiter.in_window().await, 4);
        assert_eq!(server.paths().len(), 4);
    }

    #[test]
    fn test_partial_stats_report_partial_coverage() {
        let limiter = Arc::new(RateLimiter::new("espn", 60, Duration::from_secs(60)));
        let client = EspnClient::new("http://localhost", limiter).unwrap();
        assert!(client.coverage(DataField::Stats(Side::Home)) < 0.5);
        assert_eq!(client.coverage(DataField::Schedule(Side::Away)), 1.0);
    }
}
