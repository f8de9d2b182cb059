pub mod cache;
pub mod cfbd;
pub mod espn;
pub mod manager;
pub mod models;
pub mod odds;
pub mod provider;
pub mod rate_limiter;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheEntry, CacheStats, TtlCache};
pub use cfbd::CfbdClient;
pub use espn::EspnClient;
pub use manager::{DataManager, TtlPolicy, Volatility};
pub use models::{
    CoachingRecord, DataField, FieldSource, GameContext, GameRecord, MarketLine, MatchupHistory,
    Schedule, Side, SourceTier, TeamContext, TeamIdentity, TeamStats,
};
pub use odds::OddsApiClient;
pub use provider::{MarketSource, StatsSource};
pub use rate_limiter::{RateLimiter, Remaining, Window};
