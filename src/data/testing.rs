//! Test doubles for the data layer: in-memory sources, plus a loopback
//! JSON server for driving the real HTTP clients.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::models::{
    CoachingRecord, DataField, GameRecord, MarketLine, MatchupHistory, Schedule, TeamIdentity,
    TeamStats,
};
use super::provider::{MarketSource, StatsSource};
use super::rate_limiter::RateLimiter;

#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// Answer every request; the value seeds points per game
    Ok(f64),
    Fail,
    Empty,
    Stall(Duration),
    Panic,
}

pub struct MockStats {
    name: String,
    mode: Mode,
    calls: AtomicUsize,
    /// Charged once per call, the way the HTTP clients charge per request
    limiter: Option<Arc<RateLimiter>>,
    stats_coverage: f64,
}

pub fn sample_stats(points_per_game: f64) -> TeamStats {
    TeamStats {
        games: 5,
        points_per_game,
        points_allowed_per_game: 21.0,
        success_rate_off: 0.45,
        success_rate_def: 0.38,
        explosiveness_off: 1.2,
        explosiveness_def: 1.1,
        plays_per_game: 68.0,
        havoc_rate: 0.17,
    }
}

pub fn sample_line(spread: f64) -> MarketLine {
    MarketLine {
        spread,
        book_count: 5,
        dispersion: 0.5,
    }
}

pub fn sample_schedule() -> Schedule {
    let game = |week: u32, is_home: bool, pf: u32, pa: u32| GameRecord {
        week,
        opponent: format!("Opponent {week}"),
        is_home,
        neutral_site: false,
        conference_game: week > 2,
        points_for: Some(pf),
        points_against: Some(pa),
        start_date: None,
    };
    Schedule::new(vec![
        game(1, true, 35, 10),
        game(2, false, 24, 27),
        game(3, true, 31, 28),
        game(4, false, 17, 14),
    ])
}

impl MockStats {
    pub fn new(name: &str, mode: Mode) -> Self {
        MockStats {
            name: name.to_string(),
            mode,
            calls: AtomicUsize::new(0),
            limiter: None,
            stats_coverage: 1.0,
        }
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_stats_coverage(mut self, coverage: f64) -> Self {
        self.stats_coverage = coverage;
        self
    }

    /// Calls that got past the limiter.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer<T: Send>(&self, value: T) -> Result<Option<T>> {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::Ok(_) => Ok(Some(value)),
            Mode::Fail => anyhow::bail!("{} unavailable", self.name),
            Mode::Empty => Ok(None),
            Mode::Stall(d) => {
                tokio::time::sleep(d).await;
                Ok(Some(value))
            }
            Mode::Panic => panic!("{} blew up mid-request", self.name),
        }
    }

    fn seed(&self) -> f64 {
        match self.mode {
            Mode::Ok(ppg) => ppg,
            _ => 30.0,
        }
    }
}

#[async_trait]
impl StatsSource for MockStats {
    fn name(&self) -> &str {
        &self.name
    }

    fn coverage(&self, field: DataField) -> f64 {
        match field {
            DataField::Stats(_) => self.stats_coverage,
            _ => 1.0,
        }
    }

    fn limiter(&self) -> Option<&RateLimiter> {
        self.limiter.as_deref()
    }

    async fn get_team_identity(&self, team: &str) -> Result<Option<TeamIdentity>> {
        self.answer(TeamIdentity {
            name: team.to_string(),
            abbreviation: Some(team.chars().take(3).collect::<String>().to_uppercase()),
            conference: Some("SEC".to_string()),
            espn_id: None,
        })
        .await
    }

    async fn get_team_stats(&self, _team: &str, _season: i32) -> Result<Option<TeamStats>> {
        self.answer(sample_stats(self.seed())).await
    }

    async fn get_coaching_info(&self, team: &str, _season: i32) -> Result<Option<CoachingRecord>> {
        self.answer(CoachingRecord {
            coach: format!("{team} coach"),
            experience_years: 10,
            tenure_years: 6,
            career_wins: 80,
            career_losses: 40,
        })
        .await
    }

    async fn get_schedule(&self, _team: &str, _season: i32) -> Result<Option<Schedule>> {
        self.answer(sample_schedule()).await
    }

    async fn get_matchup_history(&self, _home: &str, _away: &str) -> Result<Option<MatchupHistory>> {
        self.answer(MatchupHistory {
            home_wins: 3,
            away_wins: 2,
            ties: 0,
        })
        .await
    }
}

pub struct MockMarket {
    line: Option<MarketLine>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockMarket {
    pub fn new(line: Option<MarketLine>) -> Self {
        MockMarket {
            line,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        MockMarket {
            line: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketSource for MockMarket {
    fn name(&self) -> &str {
        "mock_market"
    }

    async fn get_consensus_spread(&self, _home: &str, _away: &str) -> Result<Option<MarketLine>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("market feed down");
        }
        Ok(self.line.clone())
    }
}

/// Loopback HTTP server answering every GET with `route(path)` as JSON.
pub struct JsonServer {
    pub base_url: String,
    paths: Arc<Mutex<Vec<String>>>,
}

impl JsonServer {
    pub async fn start(route: fn(&str) -> Value) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let paths = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&paths);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => head.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head);
                    let target = head.split_whitespace().nth(1).unwrap_or("/");
                    let path = target.split('?').next().unwrap_or("/").to_string();

                    let body = route(&path).to_string();
                    log.lock().unwrap().push(path);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        JsonServer {
            base_url: format!("http://{addr}"),
            paths,
        }
    }

    /// Paths requested so far, in arrival order.
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}
