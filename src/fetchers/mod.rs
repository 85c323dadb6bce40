pub mod bet9ja;
pub mod betpawa;
pub mod sportybet;

use crate::mapping::RawMarket;
use crate::model::ExternalMatchId;
use async_trait::async_trait;
use chrono::NaiveDateTime;

pub use bet9ja::Bet9jaFetcher;
pub use betpawa::BetpawaFetcher;
pub use sportybet::SportyBetFetcher;

/// Discovery-level metadata for one event, enough to identify it across
/// bookmakers (spec §4.G step 1).
#[derive(Debug, Clone)]
pub struct DiscoveredEvent {
    pub external_id: ExternalMatchId,
    pub home_team: String,
    pub away_team: String,
    pub kickoff: NaiveDateTime,
    pub tournament_name: String,
    pub country: Option<String>,
    pub sport: String,
}

/// One bookmaker's detail response for a single event: every raw market the
/// bookmaker currently offers for it.
#[derive(Debug, Clone, Default)]
pub struct EventDetail {
    pub markets: Vec<RawMarket>,
}

/// Capability every bookmaker fetcher implements (spec §9 "dynamic dispatch
/// across bookmakers"). Deliberately thin: authentication, User-Agent
/// rotation and retry-on-transient-error live in the opaque HTTP client
/// each fetcher wraps, which is out of scope per spec §1.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn bookmaker(&self) -> crate::model::Bookmaker;

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, crate::error::AppError>;

    async fn fetch_event(&self, external_id: ExternalMatchId) -> Result<EventDetail, crate::error::AppError>;
}
