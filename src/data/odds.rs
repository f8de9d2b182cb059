use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::models::MarketLine;
use super::provider::MarketSource;
use super::rate_limiter::RateLimiter;

const SPORT_KEY: &str = "americanfootball_ncaaf";

/// Books in order of trust; earlier entries carry more consensus weight.
const PREFERRED_BOOKS: [&str; 9] = [
    "fanduel",
    "draftkings",
    "pointsbet_us",
    "betmgm",
    "caesars",
    "williamhill_us",
    "betrivers",
    "unibet_us",
    "bovada",
];

fn book_weight(key: &str) -> f64 {
    PREFERRED_BOOKS
        .iter()
        .position(|b| *b == key)
        .map(|rank| 1.0 / (rank as f64 + 1.0))
        .unwrap_or(0.1)
}

/// Market source backed by The Odds API v4.
/// Docs: <https://the-odds-api.com/liveapi/guides/v4/>
pub struct OddsApiClient {
    http: Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl OddsApiClient {
    pub fn new(api_key: &str, base_url: &str, limiter: Arc<RateLimiter>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(OddsApiClient {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
        })
    }
}

#[async_trait]
impl MarketSource for OddsApiClient {
    fn name(&self) -> &str {
        "odds_api"
    }

    fn limiter(&self) -> Option<&RateLimiter> {
        Some(self.limiter.as_ref())
    }

    async fn get_consensus_spread(&self, home: &str, away: &str) -> Result<Option<MarketLine>> {
        let url = format!("{}/sports/{}/odds", self.base_url, SPORT_KEY);
        self.limiter.acquire().await;
        debug!("Fetching spreads for {} @ {}", away, home);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("apiKey", self.api_key.as_str()),
                ("regions", "us"),
                ("markets", "spreads"),
                ("oddsFormat", "american"),
            ])
            .send()
            .await
            .context("Odds API request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("Odds API error: {}", resp.status());
        }
        if let Some(left) = resp.headers().get("x-requests-remaining") {
            debug!("Odds API quota remaining: {:?}", left);
        }

        let raw: Value = resp.json().await.context("Failed to parse Odds API response")?;
        Ok(find_event(&raw, home, away).and_then(consensus_line))
    }
}

/// How well a listed team name matches a requested one: exact beats
/// "school + mascot", and shorter listings beat longer ones so that
/// "Georgia" picks "Georgia Bulldogs" over "Georgia Tech Yellow Jackets".
fn name_match(listed: &str, wanted: &str) -> Option<usize> {
    let listed = listed.trim().to_lowercase();
    let wanted = wanted.trim().to_lowercase();
    if listed == wanted {
        Some(0)
    } else if listed.starts_with(&format!("{wanted} ")) {
        Some(listed.len())
    } else {
        None
    }
}

fn find_event<'a>(raw: &'a Value, home: &str, away: &str) -> Option<&'a Value> {
    raw.as_array()?
        .iter()
        .filter_map(|ev| {
            let h = name_match(ev["home_team"].as_str()?, home)?;
            let a = name_match(ev["away_team"].as_str()?, away)?;
            Some((h + a, ev))
        })
        .min_by_key(|(score, _)| *score)
        .map(|(_, ev)| ev)
}

/// Weighted consensus of each book's home spread, rounded to the half point.
fn consensus_line(event: &Value) -> Option<MarketLine> {
    let home_team = event["home_team"].as_str()?;
    let books = event["bookmakers"].as_array()?;

    let quotes: Vec<(f64, f64)> = books
        .iter()
        .filter_map(|book| {
            let key = book["key"].as_str()?;
            let market = book["markets"]
                .as_array()?
                .iter()
                .find(|m| m["key"].as_str() == Some("spreads"))?;
            let point = market["outcomes"]
                .as_array()?
                .iter()
                .find(|o| o["name"].as_str() == Some(home_team))?["point"]
                .as_f64()?;
            Some((point, book_weight(key)))
        })
        .collect();

    if quotes.is_empty() {
        return None;
    }

    let total_weight: f64 = quotes.iter().map(|(_, w)| w).sum();
    let weighted = quotes.iter().map(|(p, w)| p * w).sum::<f64>() / total_weight;

    let n = quotes.len() as f64;
    let mean = quotes.iter().map(|(p, _)| p).sum::<f64>() / n;
    let variance = quotes.iter().map(|(p, _)| (p - mean).powi(2)).sum::<f64>() / n;

    Some(MarketLine {
        spread: (weighted * 2.0).round() / 2.0,
        book_count: quotes.len(),
        dispersion: variance.sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn book(key: &str, home: &str, point: f64) -> Value {
        json!({"key": key, "markets": [{"key": "spreads", "outcomes": [
            {"name": home, "price": -110, "point": point},
            {"name": "other", "price": -110, "point": -point}
        ]}]})
    }

    #[test]
    fn test_consensus_weights_preferred_books() {
        let event = json!({
            "home_team": "Georgia Bulldogs",
            "away_team": "Auburn Tigers",
            "bookmakers": [
                book("fanduel", "Georgia Bulldogs", -7.0),
                book("draftkings", "Georgia Bulldogs", -6.0),
                book("some_offshore", "Georgia Bulldogs", -3.0)
            ]
        });
        let line = consensus_line(&event).unwrap();
        // (-7*1 + -6*0.5 + -3*0.1) / 1.6 = -6.4375 → -6.5
        assert_relative_eq!(line.spread, -6.5);
        assert_eq!(line.book_count, 3);
        assert!(line.dispersion > 1.0);
    }

    #[test]
    fn test_consensus_without_spreads() {
        let event = json!({"home_team": "Georgia Bulldogs", "bookmakers": [
            {"key": "fanduel", "markets": [{"key": "h2h", "outcomes": []}]}
        ]});
        assert!(consensus_line(&event).is_none());
    }

    #[test]
    fn test_find_event_prefers_closest_name() {
        let raw = json!([
            {"home_team": "Georgia Tech Yellow Jackets", "away_team": "Auburn Tigers"},
            {"home_team": "Georgia Bulldogs", "away_team": "Auburn Tigers"},
            {"home_team": "Texas Longhorns", "away_team": "Oklahoma Sooners"}
        ]);
        let ev = find_event(&raw, "Georgia", "Auburn").unwrap();
        assert_eq!(ev["home_team"], "Georgia Bulldogs");
        assert!(find_event(&raw, "Alabama", "Auburn").is_none());
    }

    #[test]
    fn test_book_weight() {
        assert_relative_eq!(book_weight("fanduel"), 1.0);
        assert_relative_eq!(book_weight("betmgm"), 0.25);
        assert_relative_eq!(book_weight("unknown"), 0.1);
    }
}
