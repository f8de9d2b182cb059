use std::time::Duration;

use chrono::{Datelike, Utc};
use clap::Parser;

/// Contrarian college-football spread predictor
#[derive(Parser, Debug, Clone)]
#[command(name = "cfb-edge", version, about)]
pub struct Config {
    /// Home team for a single prediction
    #[arg(long, env = "HOME_TEAM")]
    pub home: Option<String>,

    /// Away team for a single prediction
    #[arg(long, env = "AWAY_TEAM")]
    pub away: Option<String>,

    /// Comma-separated slate of AWAY@HOME pairs (overrides --home/--away)
    #[arg(long, env = "SLATE")]
    pub slate: Option<String>,

    /// Regular-season week being predicted
    #[arg(long, env = "WEEK", default_value = "1")]
    pub week: u32,

    /// Season year (defaults to the current football season)
    #[arg(long, env = "SEASON")]
    pub season: Option<i32>,

    /// CollegeFootballData API base URL (primary stats source)
    #[arg(
        long,
        env = "CFBD_API_URL",
        default_value = "https://api.collegefootballdata.com"
    )]
    pub cfbd_api_url: String,

    /// CollegeFootballData API key (bearer token)
    #[arg(long, env = "CFBD_API_KEY")]
    pub cfbd_api_key: Option<String>,

    /// ESPN site API base URL (fallback stats source)
    #[arg(
        long,
        env = "ESPN_API_URL",
        default_value = "https://site.api.espn.com/apis/site/v2/sports/football/college-football"
    )]
    pub espn_api_url: String,

    /// The Odds API base URL (market lines)
    #[arg(long, env = "ODDS_API_URL", default_value = "https://api.the-odds-api.com/v4")]
    pub odds_api_url: String,

    /// The Odds API key
    #[arg(long, env = "ODDS_API_KEY")]
    pub odds_api_key: Option<String>,

    /// Max CFBD calls per window
    #[arg(long, env = "CFBD_RATE_LIMIT", default_value = "150")]
    pub cfbd_rate_limit: usize,

    /// CFBD rate window in seconds
    #[arg(long, env = "CFBD_RATE_WINDOW_SECS", default_value = "86400")]
    pub cfbd_rate_window_secs: u64,

    /// Max ESPN calls per window
    #[arg(long, env = "ESPN_RATE_LIMIT", default_value = "60")]
    pub espn_rate_limit: usize,

    /// ESPN rate window in seconds
    #[arg(long, env = "ESPN_RATE_WINDOW_SECS", default_value = "60")]
    pub espn_rate_window_secs: u64,

    /// Max Odds API calls per window (free tier is ~500/month)
    #[arg(long, env = "ODDS_RATE_LIMIT", default_value = "83")]
    pub odds_rate_limit: usize,

    /// Odds API rate window in seconds
    #[arg(long, env = "ODDS_RATE_WINDOW_SECS", default_value = "86400")]
    pub odds_rate_window_secs: u64,

    /// Max CFBD calls per burst window (0 disables)
    #[arg(long, env = "CFBD_BURST_LIMIT", default_value = "0")]
    pub cfbd_burst_limit: usize,

    /// Max ESPN calls per burst window (0 disables)
    #[arg(long, env = "ESPN_BURST_LIMIT", default_value = "0")]
    pub espn_burst_limit: usize,

    /// Max Odds API calls per burst window, so one slate cannot drain the
    /// daily budget (0 disables)
    #[arg(long, env = "ODDS_BURST_LIMIT", default_value = "15")]
    pub odds_burst_limit: usize,

    /// Burst window in seconds, shared by all sources
    #[arg(long, env = "BURST_WINDOW_SECS", default_value = "60")]
    pub burst_window_secs: u64,

    /// Upper bound on rate-limit wait plus HTTP call, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "10")]
    pub request_timeout_secs: u64,

    /// TTL for team identity data (seconds)
    #[arg(long, env = "IDENTITY_TTL_SECS", default_value = "259200")]
    pub identity_ttl_secs: u64,

    /// TTL for coaching, season stats and schedules (seconds)
    #[arg(long, env = "SEASON_TTL_SECS", default_value = "21600")]
    pub season_ttl_secs: u64,

    /// TTL for market lines (seconds)
    #[arg(long, env = "MARKET_TTL_SECS", default_value = "900")]
    pub market_ttl_secs: u64,

    /// Maximum number of cached payloads
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "2000")]
    pub cache_max_entries: usize,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=20).contains(&self.week) {
            anyhow::bail!("week must be between 1 and 20");
        }
        for (name, limit, window, burst) in [
            (
                "cfbd",
                self.cfbd_rate_limit,
                self.cfbd_rate_window_secs,
                self.cfbd_burst_limit,
            ),
            (
                "espn",
                self.espn_rate_limit,
                self.espn_rate_window_secs,
                self.espn_burst_limit,
            ),
            (
                "odds",
                self.odds_rate_limit,
                self.odds_rate_window_secs,
                self.odds_burst_limit,
            ),
        ] {
            if limit == 0 {
                anyhow::bail!("{name} rate limit must be positive");
            }
            if window == 0 {
                anyhow::bail!("{name} rate window must be positive");
            }
            if burst == 0 {
                continue;
            }
            if burst > limit {
                anyhow::bail!("{name} burst limit must not exceed its rate limit");
            }
            if self.burst_window_secs == 0 || self.burst_window_secs >= window {
                anyhow::bail!(
                    "burst window must be positive and shorter than the {name} rate window"
                );
            }
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }
        if self.market_ttl_secs == 0 {
            anyhow::bail!("market_ttl_secs must be positive");
        }
        if self.season_ttl_secs < self.market_ttl_secs {
            anyhow::bail!("season_ttl_secs must not be shorter than market_ttl_secs");
        }
        if self.identity_ttl_secs < self.season_ttl_secs {
            anyhow::bail!("identity_ttl_secs must not be shorter than season_ttl_secs");
        }
        if self.cache_max_entries == 0 {
            anyhow::bail!("cache_max_entries must be positive");
        }
        for (name, raw) in [
            ("CFBD_API_URL", &self.cfbd_api_url),
            ("ESPN_API_URL", &self.espn_api_url),
            ("ODDS_API_URL", &self.odds_api_url),
        ] {
            url::Url::parse(raw).map_err(|e| anyhow::anyhow!("{name} is not a valid URL: {e}"))?;
        }
        Ok(())
    }

    /// Season year, defaulting to the one in progress. Games before August
    /// belong to the previous year's season.
    pub fn season(&self) -> i32 {
        self.season.unwrap_or_else(|| {
            let today = Utc::now().date_naive();
            if today.month() < 8 {
                today.year() - 1
            } else {
                today.year()
            }
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Games to predict as `(home, away)` pairs.
    pub fn games(&self) -> anyhow::Result<Vec<(String, String)>> {
        if let Some(slate) = &self.slate {
            return parse_slate(slate);
        }
        match (&self.home, &self.away) {
            (Some(home), Some(away)) => Ok(vec![(home.clone(), away.clone())]),
            _ => anyhow::bail!("either --slate or both --home and --away are required"),
        }
    }
}

/// Parse `"Auburn@Georgia, Texas@Oklahoma"` into `(home, away)` pairs.
pub fn parse_slate(raw: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut games = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((away, home)) = entry.split_once('@') else {
            anyhow::bail!("slate entry '{entry}' is not in AWAY@HOME form");
        };
        let (away, home) = (away.trim(), home.trim());
        if away.is_empty() || home.is_empty() {
            anyhow::bail!("slate entry '{entry}' has an empty team name");
        }
        games.push((home.to_string(), away.to_string()));
    }
    if games.is_empty() {
        anyhow::bail!("slate is empty");
    }
    Ok(games)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["cfb-edge"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn test_defaults_validate() {
        let cfg = config(&["--home", "Georgia", "--away", "Auburn"]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.odds_rate_limit, 83);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_inverted_ttls() {
        let cfg = config(&["--season-ttl-secs", "60", "--market-ttl-secs", "600"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let cfg = config(&["--espn-rate-limit", "0"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_odds_burst_defaults_inside_daily_budget() {
        let cfg = config(&[]);
        assert_eq!(cfg.odds_burst_limit, 15);
        assert!(cfg.odds_burst_limit <= cfg.odds_rate_limit / 4);
        assert_eq!(cfg.cfbd_burst_limit, 0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_burst_above_budget() {
        let cfg = config(&["--odds-burst-limit", "100"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_burst_window_as_long_as_rate_window() {
        let cfg = config(&["--espn-burst-limit", "10"]);
        assert!(cfg.validate().is_err(), "espn already limits per 60s");
        let cfg = config(&["--espn-burst-limit", "10", "--burst-window-secs", "10"]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_url() {
        let cfg = config(&["--odds-api-url", "not a url"]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_explicit_season_wins() {
        let cfg = config(&["--season", "2023"]);
        assert_eq!(cfg.season(), 2023);
    }

    #[test]
    fn test_parse_slate() {
        let games = parse_slate("Auburn@Georgia, Texas @ Oklahoma").unwrap();
        assert_eq!(
            games,
            vec![
                ("Georgia".to_string(), "Auburn".to_string()),
                ("Oklahoma".to_string(), "Texas".to_string()),
            ]
        );
        assert!(parse_slate("Georgia").is_err());
        assert!(parse_slate(" , ").is_err());
    }

    #[test]
    fn test_games_requires_both_teams() {
        let cfg = config(&["--home", "Georgia"]);
        assert!(cfg.games().is_err());
    }
}
