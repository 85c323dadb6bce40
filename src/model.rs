//! Core data model (spec §3): Bookmaker, Event, Tournament, Market, Outcome,
//! MarketSnapshot, WriteBatch, HistoryPoint, PushMessage.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The closed set of three bookmakers the system scrapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Bookmaker {
    Betpawa,
    SportyBet,
    Bet9ja,
}

impl Bookmaker {
    pub const ALL: [Bookmaker; 3] = [Bookmaker::Betpawa, Bookmaker::SportyBet, Bookmaker::Bet9ja];

    pub fn slug(self) -> &'static str {
        match self {
            Bookmaker::Betpawa => "betpawa",
            Bookmaker::SportyBet => "sportybet",
            Bookmaker::Bet9ja => "bet9ja",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "betpawa" => Some(Bookmaker::Betpawa),
            "sportybet" => Some(Bookmaker::SportyBet),
            "bet9ja" => Some(Bookmaker::Bet9ja),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Bookmaker::Betpawa => "Betpawa",
            Bookmaker::SportyBet => "SportyBet",
            Bookmaker::Bet9ja => "Bet9ja",
        }
    }

    /// Default per-bookmaker concurrency cap (spec §4.G).
    pub fn default_concurrency(self) -> usize {
        match self {
            Bookmaker::Betpawa => 50,
            Bookmaker::SportyBet => 50,
            Bookmaker::Bet9ja => 15,
        }
    }

    /// Last-writer-wins ordering for metadata precedence when competitors
    /// disagree (spec §9 Open Question): SportyBet before Bet9ja.
    pub fn metadata_priority(self) -> u8 {
        match self {
            Bookmaker::Betpawa => 0,
            Bookmaker::SportyBet => 1,
            Bookmaker::Bet9ja => 2,
        }
    }
}

impl fmt::Display for Bookmaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// 8-digit numeric external match id, present in every bookmaker's response
/// for the same match (the cross-bookmaker key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalMatchId(pub u32);

impl fmt::Display for ExternalMatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TournamentKey {
    pub sport: String,
    pub name: String,
    /// Null only when truly international.
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub key: TournamentKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub external_id: ExternalMatchId,
    pub home_team: String,
    pub away_team: String,
    /// Naive UTC.
    pub kickoff: NaiveDateTime,
    pub tournament: TournamentKey,
    pub sport: String,
}

impl Event {
    pub fn evict_cutoff(&self) -> NaiveDateTime {
        self.kickoff + chrono::Duration::hours(1)
    }
}

/// Category tags a canonical market can belong to (a market may have more than one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CategoryTag {
    Popular,
    Goals,
    Handicaps,
    Combos,
    Halves,
    Corners,
    Cards,
    Specials,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalMarketId(pub String);

/// `(event, bookmaker, canonical_market_id, line)` identity, with `line`
/// compared via `COALESCE(line, 0)` so null and 0 collide intentionally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketIdentity {
    pub event: ExternalMatchId,
    pub bookmaker: Bookmaker,
    pub canonical_market_id: CanonicalMarketId,
    pub line: LineKey,
}

/// `line` normalised so that `None` and `Some(0.0)` are the same key, while
/// still letting callers distinguish "no line parameter" from "line 0".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineKey(pub Option<f64>);

impl LineKey {
    pub fn coalesced(self) -> i64 {
        // odds lines are always at a fixed granularity (0.25); scale and round
        // to keep the coalesced key well-defined for Eq/Hash/Ord.
        ((self.0.unwrap_or(0.0)) * 100.0).round() as i64
    }
}

impl PartialEq for LineKey {
    fn eq(&self, other: &Self) -> bool {
        self.coalesced() == other.coalesced()
    }
}
impl Eq for LineKey {}
impl std::hash::Hash for LineKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.coalesced().hash(state)
    }
}
impl PartialOrd for LineKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LineKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.coalesced().cmp(&other.coalesced())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub name: String,
    pub odds: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub identity: MarketIdentity,
    pub display_name: String,
    pub categories: BTreeSet<CategoryTag>,
    pub margin: f64,
    pub outcomes: Vec<Outcome>,
    pub unavailable_at: Option<NaiveDateTime>,
}

impl Market {
    /// Canonical form used for change detection: outcomes sorted by name,
    /// odds rounded to 4 decimals. Deliberately excludes `unavailable_at`
    /// and display metadata, which are availability/UI concerns, not odds.
    pub fn canonical_digest(&self) -> Vec<(String, u64, bool)> {
        let mut out: Vec<_> = self
            .outcomes
            .iter()
            .map(|o| {
                let rounded = (o.odds * 10_000.0).round() as u64;
                (o.name.clone(), rounded, o.active)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub event: ExternalMatchId,
    pub bookmaker: Bookmaker,
    pub markets: Vec<Market>,
    pub captured_at: NaiveDateTime,
    pub last_confirmed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInsert {
    pub market: Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUpdate {
    pub market: Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketUnavailable {
    pub identity: MarketIdentity,
    pub unavailable_at: NaiveDateTime,
    /// Last-known market state (outcomes, margin, display metadata) with
    /// `unavailable_at` set, so history writers can append a full row
    /// without a second lookup.
    pub last_known: Market,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBecameAvailable {
    pub market: Market,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WriteBatch {
    pub event: Option<ExternalMatchId>,
    pub bookmaker: Option<Bookmaker>,
    pub inserts: Vec<MarketInsert>,
    pub updates: Vec<MarketUpdate>,
    pub unavailable: Vec<MarketUnavailable>,
    pub became_available: Vec<MarketBecameAvailable>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
            && self.updates.is_empty()
            && self.unavailable.is_empty()
            && self.became_available.is_empty()
    }

    pub fn for_key(event: ExternalMatchId, bookmaker: Bookmaker) -> Self {
        Self {
            event: Some(event),
            bookmaker: Some(bookmaker),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub identity: MarketIdentity,
    pub captured_at: NaiveDateTime,
    pub margin: f64,
    pub outcomes: Vec<Outcome>,
    pub available: bool,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topic {
    ScrapeProgress,
    OddsUpdates,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::ScrapeProgress => "scrape_progress",
            Topic::OddsUpdates => "odds_updates",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scrape_progress" => Some(Topic::ScrapeProgress),
            "odds_updates" => Some(Topic::OddsUpdates),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    pub topic: Topic,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_key_coalesces_none_and_zero() {
        assert_eq!(LineKey(None), LineKey(Some(0.0)));
        assert_ne!(LineKey(None), LineKey(Some(0.5)));
    }

    #[test]
    fn canonical_digest_is_order_independent() {
        let m1 = Market {
            identity: MarketIdentity {
                event: ExternalMatchId(12345678),
                bookmaker: Bookmaker::Betpawa,
                canonical_market_id: CanonicalMarketId("1x2".into()),
                line: LineKey(None),
            },
            display_name: "1X2".into(),
            categories: BTreeSet::new(),
            margin: 0.0,
            outcomes: vec![
                Outcome { name: "1".into(), odds: 2.1, active: true },
                Outcome { name: "X".into(), odds: 3.3, active: true },
            ],
            unavailable_at: None,
        };
        let mut m2 = m1.clone();
        m2.outcomes.reverse();
        assert_eq!(m1.canonical_digest(), m2.canonical_digest());
    }
}
