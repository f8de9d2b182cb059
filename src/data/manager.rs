//! Resolves a complete [`GameContext`] for one game.
//!
//! Every field walks the same chain: primary source, then fallback source,
//! then a documented neutral default. Each hop is guarded by a cache lookup
//! keyed on `(source, kind, subject, season)` and a timeout. Sources charge
//! their own rate limiter once per upstream request, so the timeout bounds
//! limiter waits as well as the calls. A failing or panicking source costs
//! quality, never the request: nothing here returns an error to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use super::cache::{CacheStats, TtlCache};
use super::cfbd::CfbdClient;
use super::espn::EspnClient;
use super::models::{
    CoachingRecord, DataField, FieldSource, GameContext, MarketLine, MatchupHistory, Schedule,
    Side, SourceTier, TeamContext, TeamIdentity, TeamStats,
};
use super::odds::OddsApiClient;
use super::provider::{MarketSource, StatsSource};
use super::rate_limiter::{RateLimiter, Remaining};
use crate::config::Config;
use crate::error::{panic_message, PredictError};

/// How quickly a kind of data goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Team names, conferences, ids: days
    Identity,
    /// Coaching, season stats, schedules, series history: hours
    Season,
    /// Sportsbook lines: minutes
    Market,
}

#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    pub identity: Duration,
    pub season: Duration,
    pub market: Duration,
}

impl TtlPolicy {
    pub fn ttl(&self, volatility: Volatility) -> Duration {
        match volatility {
            Volatility::Identity => self.identity,
            Volatility::Season => self.season,
            Volatility::Market => self.market,
        }
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        TtlPolicy {
            identity: Duration::from_secs(3 * 24 * 60 * 60),
            season: Duration::from_secs(6 * 60 * 60),
            market: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub kind: &'static str,
    pub subject: String,
    pub season: i32,
}

/// Everything the shared cache can hold.
#[derive(Debug, Clone)]
pub enum Payload {
    Identity(TeamIdentity),
    Stats(TeamStats),
    Coaching(CoachingRecord),
    Schedule(Schedule),
    Matchup(MatchupHistory),
    Market(MarketLine),
}

/// A value that can travel through the shared cache.
pub trait Cacheable: Clone + Sized {
    const KIND: &'static str;
    const VOLATILITY: Volatility;

    fn into_payload(self) -> Payload;
    fn from_payload(payload: Payload) -> Option<Self>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident, $kind:literal, $volatility:expr) => {
        impl Cacheable for $ty {
            const KIND: &'static str = $kind;
            const VOLATILITY: Volatility = $volatility;

            fn into_payload(self) -> Payload {
                Payload::$variant(self)
            }

            fn from_payload(payload: Payload) -> Option<Self> {
                match payload {
                    Payload::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(TeamIdentity, Identity, "identity", Volatility::Identity);
cacheable!(TeamStats, Stats, "stats", Volatility::Season);
cacheable!(CoachingRecord, Coaching, "coaching", Volatility::Season);
cacheable!(Schedule, Schedule, "schedule", Volatility::Season);
cacheable!(MatchupHistory, Matchup, "matchup", Volatility::Season);
cacheable!(MarketLine, Market, "market", Volatility::Market);

type SourceCall<'a, T> = Pin<Box<dyn Future<Output = Result<Option<T>>> + Send + 'a>>;

pub struct DataManager {
    primary: Arc<dyn StatsSource>,
    fallback: Option<Arc<dyn StatsSource>>,
    market: Arc<dyn MarketSource>,
    cache: TtlCache<CacheKey, Payload>,
    ttl: TtlPolicy,
    timeout: Duration,
    season: i32,
}

impl DataManager {
    pub fn new(primary: Arc<dyn StatsSource>, market: Arc<dyn MarketSource>, season: i32) -> Self {
        DataManager {
            primary,
            fallback: None,
            market,
            cache: TtlCache::new(2000),
            ttl: TtlPolicy::default(),
            timeout: Duration::from_secs(10),
            season,
        }
    }

    pub fn with_fallback(mut self, source: Arc<dyn StatsSource>) -> Self {
        self.fallback = Some(source);
        self
    }

    pub fn with_ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache = TtlCache::new(max_entries);
        self
    }

    /// Wire the production sources: CFBD primary, ESPN fallback, The Odds API.
    pub fn from_config(config: &Config) -> Result<Self> {
        let Some(odds_key) = config.odds_api_key.as_deref() else {
            anyhow::bail!("ODDS_API_KEY is required: predictions need a market line");
        };
        if config.cfbd_api_key.is_none() {
            warn!("CFBD_API_KEY not set; primary stats requests will likely be rejected");
        }

        let burst_window = Duration::from_secs(config.burst_window_secs);
        let limiter = |name: &str, calls: usize, window: u64, burst: usize| {
            Arc::new(
                RateLimiter::new(name, calls, Duration::from_secs(window))
                    .with_burst(burst, burst_window),
            )
        };

        let cfbd = CfbdClient::new(
            config.cfbd_api_key.as_deref(),
            &config.cfbd_api_url,
            limiter(
                "cfbd",
                config.cfbd_rate_limit,
                config.cfbd_rate_window_secs,
                config.cfbd_burst_limit,
            ),
        )?;
        let espn = EspnClient::new(
            &config.espn_api_url,
            limiter(
                "espn",
                config.espn_rate_limit,
                config.espn_rate_window_secs,
                config.espn_burst_limit,
            ),
        )?;
        let odds = OddsApiClient::new(
            odds_key,
            &config.odds_api_url,
            limiter(
                "odds_api",
                config.odds_rate_limit,
                config.odds_rate_window_secs,
                config.odds_burst_limit,
            ),
        )?;

        info!(
            "Data sources: cfbd ({}/{}s, burst {}) → espn ({}/{}s, burst {}), odds_api ({}/{}s, burst {}) per {}s",
            config.cfbd_rate_limit,
            config.cfbd_rate_window_secs,
            config.cfbd_burst_limit,
            config.espn_rate_limit,
            config.espn_rate_window_secs,
            config.espn_burst_limit,
            config.odds_rate_limit,
            config.odds_rate_window_secs,
            config.odds_burst_limit,
            config.burst_window_secs
        );

        Ok(DataManager::new(Arc::new(cfbd), Arc::new(odds), config.season())
            .with_fallback(Arc::new(espn))
            .with_ttl(TtlPolicy {
                identity: Duration::from_secs(config.identity_ttl_secs),
                season: Duration::from_secs(config.season_ttl_secs),
                market: Duration::from_secs(config.market_ttl_secs),
            })
            .with_timeout(config.request_timeout())
            .with_cache_capacity(config.cache_max_entries))
    }

    pub fn season(&self) -> i32 {
        self.season
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sweep_cache(&self) -> usize {
        self.cache.sweep()
    }

    /// Calls each metered source may still make right now.
    pub async fn quota(&self) -> Vec<(String, Remaining)> {
        let limiters = std::iter::once(self.primary.limiter())
            .chain(self.fallback.iter().map(|f| f.limiter()))
            .chain(std::iter::once(self.market.limiter()))
            .flatten();
        let mut quota = Vec::new();
        for limiter in limiters {
            quota.push((limiter.name().to_string(), limiter.remaining().await));
        }
        quota
    }

    /// Cache, then the call under one timeout that also covers the source's
    /// rate-limiter waits. A panic inside the call comes back as an error.
    /// Only successful, non-empty answers are cached.
    async fn guarded<T, F>(&self, source: &str, subject: &str, call: F) -> Result<Option<T>>
    where
        T: Cacheable,
        F: Future<Output = Result<Option<T>>>,
    {
        let key = CacheKey {
            source: source.to_string(),
            kind: T::KIND,
            subject: subject.to_lowercase(),
            season: self.season,
        };
        if let Some(hit) = self.cache.get(&key).and_then(T::from_payload) {
            debug!("cache hit {}:{}:{}", source, T::KIND, key.subject);
            return Ok(Some(hit));
        }

        let fetched = tokio::time::timeout(self.timeout, AssertUnwindSafe(call).catch_unwind())
            .await
            .map_err(|_| anyhow::anyhow!("{} timed out after {:?}", source, self.timeout))?
            .map_err(|panic| anyhow::anyhow!("{} {}", source, panic_message(panic.as_ref())))??;

        if let Some(value) = &fetched {
            self.cache
                .set(key, value.clone().into_payload(), self.ttl.ttl(T::VOLATILITY));
        }
        Ok(fetched)
    }

    /// Walk primary → fallback → default for one field.
    async fn resolve<'a, T, F, D>(
        &'a self,
        field: DataField,
        subject: &str,
        call: F,
        default: D,
    ) -> (T, FieldSource)
    where
        T: Cacheable,
        F: Fn(&'a dyn StatsSource) -> SourceCall<'a, T>,
        D: FnOnce() -> T,
    {
        let tiers = std::iter::once((&self.primary, SourceTier::Primary))
            .chain(self.fallback.iter().map(|f| (f, SourceTier::Fallback)));

        for (source, tier) in tiers {
            let name = source.name();
            match self.guarded(name, subject, call(source.as_ref())).await {
                Ok(Some(value)) => {
                    return (value, FieldSource::sourced(tier, name, source.coverage(field)))
                }
                Ok(None) => debug!("{} has no usable {} for {}", name, field, subject),
                Err(e) => warn!("{} failed for {} ({}): {:#}", name, field, subject, e),
            }
        }

        (default(), FieldSource::neutral())
    }

    async fn resolve_team<'a>(
        &'a self,
        team: &'a str,
        side: Side,
    ) -> (TeamContext, [(DataField, FieldSource); 4]) {
        let season = self.season;
        let (identity, stats, coaching, schedule) = tokio::join!(
            self.resolve(
                DataField::Identity(side),
                team,
                |s| s.get_team_identity(team),
                || TeamIdentity::neutral(team),
            ),
            self.resolve(
                DataField::Stats(side),
                team,
                |s| s.get_team_stats(team, season),
                TeamStats::neutral,
            ),
            self.resolve(
                DataField::Coaching(side),
                team,
                |s| s.get_coaching_info(team, season),
                CoachingRecord::neutral,
            ),
            self.resolve(
                DataField::Schedule(side),
                team,
                |s| s.get_schedule(team, season),
                Schedule::default,
            ),
        );

        (
            TeamContext {
                team: team.to_string(),
                identity: identity.0,
                stats: stats.0,
                coaching: coaching.0,
                schedule: schedule.0,
            },
            [
                (DataField::Identity(side), identity.1),
                (DataField::Stats(side), stats.1),
                (DataField::Coaching(side), coaching.1),
                (DataField::Schedule(side), schedule.1),
            ],
        )
    }

    /// Consensus market line, or `None` when no book lists the game or the
    /// market source is unreachable.
    pub async fn resolve_market_line(&self, home: &str, away: &str) -> Option<MarketLine> {
        let name = self.market.name();
        let subject = format!("{away}@{home}");
        match self
            .guarded(name, &subject, self.market.get_consensus_spread(home, away))
            .await
        {
            Ok(line) => line,
            Err(e) => {
                warn!("{} failed for {}: {:#}", name, subject, e);
                None
            }
        }
    }

    /// Team and series data for a game whose market line is already known.
    pub async fn resolve_context(
        &self,
        home: &str,
        away: &str,
        week: u32,
        market: Option<MarketLine>,
    ) -> GameContext {
        let matchup_subject = format!("{home}|{away}");
        let ((home_ctx, home_tiers), (away_ctx, away_tiers), (matchup, matchup_tier)) = tokio::join!(
            self.resolve_team(home, Side::Home),
            self.resolve_team(away, Side::Away),
            self.resolve(
                DataField::Matchup,
                &matchup_subject,
                |s| s.get_matchup_history(home, away),
                MatchupHistory::default,
            ),
        );

        let mut sources: BTreeMap<DataField, FieldSource> =
            home_tiers.into_iter().chain(away_tiers).collect();
        sources.insert(DataField::Matchup, matchup_tier);

        let context = GameContext::new(
            home_ctx,
            away_ctx,
            week,
            self.season,
            market,
            matchup,
            sources,
        );

        let degraded = context.degraded_fields();
        if !degraded.is_empty() {
            let err = PredictError::SourceDegraded {
                fields: degraded.iter().map(|f| f.to_string()).collect(),
            };
            warn!("{} @ {}: {}", away, home, err);
        }
        debug!(
            "{} @ {} context resolved, quality {:.1}",
            away, home, context.data_quality
        );
        context
    }

    /// Full resolution, market line included. Never fails: missing data is
    /// reflected in the returned quality score and `data_sources`.
    pub async fn get_game_context(&self, home: &str, away: &str, week: u32) -> (GameContext, f64) {
        let market = self.resolve_market_line(home, away).await;
        let context = self.resolve_context(home, away, week, market).await;
        let quality = context.data_quality;
        (context, quality)
    }
}
