//! In-memory Odds Cache (spec §4.C): per `(event, bookmaker)` snapshot of the
//! latest markets, change detection at market granularity, availability
//! transitions and kickoff-based eviction.
//!
//! Grounded on `odds-processor/src/cache/mod.rs`'s shape (a `HashMap` of
//! per-key state plus a derived eviction index), generalised from "fixture
//! odds" to "event+bookmaker market snapshot" and given the full
//! insert/update/unavailable/became-available transition set the spec
//! requires. Guarded with `dashmap` so mutation only ever takes a short,
//! per-shard lock rather than one coarse mutex (spec §5 "Cache operations
//! never block on I/O; they only take a short lock").

use crate::model::{
    Bookmaker, Event, ExternalMatchId, HistoryPoint, Market, MarketBecameAvailable, MarketIdentity,
    MarketInsert, MarketSnapshot, MarketUnavailable, MarketUpdate, Outcome, WriteBatch,
};
use chrono::NaiveDateTime;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

pub type CacheKey = (ExternalMatchId, Bookmaker);

/// Result of a `put`: the batch of persistable changes, plus any history
/// points for markets that were merely confirmed unchanged.
pub struct PutOutcome {
    pub batch: WriteBatch,
    pub confirmations: Vec<HistoryPoint>,
}

pub struct OddsCache {
    snapshots: DashMap<CacheKey, MarketSnapshot>,
    events: DashMap<ExternalMatchId, Event>,
}

impl OddsCache {
    pub fn new() -> Self {
        Self {
            snapshots: DashMap::new(),
            events: DashMap::new(),
        }
    }

    pub fn upsert_event(&self, event: Event) {
        // Kickoff may be refreshed; all other fields are set-once per spec §3.
        self.events
            .entry(event.external_id)
            .and_modify(|e| e.kickoff = event.kickoff)
            .or_insert(event);
    }

    pub fn event(&self, id: ExternalMatchId) -> Option<Event> {
        self.events.get(&id).map(|e| e.clone())
    }

    /// All events currently cached, for the read API's `GET /events` listing.
    pub fn all_events(&self) -> Vec<Event> {
        self.events.iter().map(|kv| kv.value().clone()).collect()
    }

    /// Bookmaker slugs currently present for an event (derived, not stored).
    pub fn bookmakers_present(&self, event: ExternalMatchId) -> HashSet<Bookmaker> {
        self.snapshots
            .iter()
            .filter(|kv| kv.key().0 == event)
            .map(|kv| kv.key().1)
            .collect()
    }

    /// Apply a freshly-fetched market set for `(event, bookmaker)`, returning
    /// the write batch and any confirmation history points (spec §4.C).
    pub fn put(&self, event: ExternalMatchId, bookmaker: Bookmaker, mut new_markets: Vec<Market>, observed_at: NaiveDateTime) -> PutOutcome {
        canonicalise(&mut new_markets);

        let key = (event, bookmaker);
        let mut batch = WriteBatch::for_key(event, bookmaker);
        let mut confirmations = Vec::new();

        let previous_markets = self
            .snapshots
            .get(&key)
            .map(|s| s.markets.clone())
            .unwrap_or_default();

        let mut previous_by_identity: HashMap<MarketIdentity, Market> = previous_markets
            .into_iter()
            .map(|m| (m.identity.clone(), m))
            .collect();

        for new_market in new_markets.iter().cloned() {
            match previous_by_identity.remove(&new_market.identity) {
                None => {
                    batch.inserts.push(MarketInsert { market: new_market });
                }
                Some(prev) => {
                    let was_unavailable = prev.unavailable_at.is_some();
                    if was_unavailable {
                        batch.became_available.push(MarketBecameAvailable {
                            market: new_market.clone(),
                        });
                    }
                    if prev.canonical_digest() != new_market.canonical_digest() {
                        batch.updates.push(MarketUpdate { market: new_market });
                    } else if !was_unavailable {
                        confirmations.push(confirmation_point(&new_market, observed_at));
                    }
                }
            }
        }

        // Anything left in `previous_by_identity` was present before and is
        // absent now: newly unavailable, unless already flagged as such.
        for (identity, mut prev) in previous_by_identity {
            if prev.unavailable_at.is_none() {
                prev.unavailable_at = Some(observed_at);
                batch.unavailable.push(MarketUnavailable {
                    identity,
                    unavailable_at: observed_at,
                    last_known: prev,
                });
            }
        }

        let captured_at = self.snapshots.get(&key).map(|s| s.captured_at).unwrap_or(observed_at);
        self.snapshots.insert(
            key,
            MarketSnapshot {
                event,
                bookmaker,
                markets: new_markets,
                captured_at,
                last_confirmed_at: observed_at,
            },
        );

        PutOutcome { batch, confirmations }
    }

    /// Mark the snapshot observed unchanged: bump `last_confirmed_at` and
    /// return confirmation history points for every currently-available
    /// market, with no write batch.
    pub fn confirm(&self, event: ExternalMatchId, bookmaker: Bookmaker, observed_at: NaiveDateTime) -> Vec<HistoryPoint> {
        let key = (event, bookmaker);
        let Some(mut snapshot) = self.snapshots.get_mut(&key) else {
            return Vec::new();
        };
        snapshot.last_confirmed_at = observed_at;
        snapshot
            .markets
            .iter()
            .filter(|m| m.unavailable_at.is_none())
            .map(|m| confirmation_point(m, observed_at))
            .collect()
    }

    pub fn get_current(&self, event: ExternalMatchId) -> Vec<MarketSnapshot> {
        Bookmaker::ALL
            .iter()
            .filter_map(|b| self.snapshots.get(&(event, *b)).map(|s| s.clone()))
            .collect()
    }

    /// Mark every market in a snapshot unavailable (reconciliation pass,
    /// spec §4.G step 2, and spec §4.C).
    pub fn mark_unavailable(&self, event: ExternalMatchId, bookmaker: Bookmaker, observed_at: NaiveDateTime) -> WriteBatch {
        let key = (event, bookmaker);
        let mut batch = WriteBatch::for_key(event, bookmaker);
        let Some(mut snapshot) = self.snapshots.get_mut(&key) else {
            return batch;
        };

        for market in snapshot.markets.iter_mut() {
            if market.unavailable_at.is_none() {
                market.unavailable_at = Some(observed_at);
                batch.unavailable.push(MarketUnavailable {
                    identity: market.identity.clone(),
                    unavailable_at: observed_at,
                    last_known: market.clone(),
                });
            }
        }

        batch
    }

    /// Clear `unavailable_at` on a single market identity that has
    /// reappeared, without requiring a full `put`.
    pub fn mark_available(&self, event: ExternalMatchId, bookmaker: Bookmaker, identity: &MarketIdentity, observed_at: NaiveDateTime) -> Option<MarketBecameAvailable> {
        let key = (event, bookmaker);
        let mut snapshot = self.snapshots.get_mut(&key)?;
        let market = snapshot.markets.iter_mut().find(|m| &m.identity == identity)?;
        if market.unavailable_at.is_none() {
            return None;
        }
        market.unavailable_at = None;
        snapshot.last_confirmed_at = observed_at;
        Some(MarketBecameAvailable { market: market.clone() })
    }

    /// Drop `(event, bookmaker)` entries whose event kickoff is more than
    /// one hour in the past. `now` must already be naive UTC; mixing naive
    /// and timezone-aware timestamps here is the known failure mode spec §9
    /// calls out, so this function refuses to guess a timezone for `now`.
    pub fn evict_expired(&self, now: NaiveDateTime) -> usize {
        let expired: Vec<ExternalMatchId> = self
            .events
            .iter()
            .filter(|kv| now > kv.value().evict_cutoff())
            .map(|kv| *kv.key())
            .collect();

        let mut evicted = 0;
        for id in expired {
            for bookmaker in Bookmaker::ALL {
                if self.snapshots.remove(&(id, bookmaker)).is_some() {
                    evicted += 1;
                }
            }
            self.events.remove(&id);
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }
}

impl Default for OddsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort markets by `(canonical_id, line)` and each market's outcomes by
/// canonical name, so two observations of the same logical state always
/// canonicalise identically regardless of upstream ordering.
fn canonicalise(markets: &mut [Market]) {
    markets.sort_by(|a, b| {
        a.identity
            .canonical_market_id
            .0
            .cmp(&b.identity.canonical_market_id.0)
            .then(a.identity.line.coalesced().cmp(&b.identity.line.coalesced()))
    });
    for market in markets.iter_mut() {
        market.outcomes.sort_by(|a: &Outcome, b: &Outcome| a.name.cmp(&b.name));
    }
}

fn confirmation_point(market: &Market, observed_at: NaiveDateTime) -> HistoryPoint {
    HistoryPoint {
        identity: market.identity.clone(),
        captured_at: observed_at,
        margin: market.margin,
        outcomes: market.outcomes.clone(),
        available: market.unavailable_at.is_none(),
        confirmed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalMarketId, CategoryTag, LineKey};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn at(hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, 30)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    fn market(canonical_id: &str, odds: &[(&str, f64, bool)]) -> Market {
        Market {
            identity: MarketIdentity {
                event: ExternalMatchId(12345678),
                bookmaker: Bookmaker::Betpawa,
                canonical_market_id: CanonicalMarketId(canonical_id.to_string()),
                line: LineKey(None),
            },
            display_name: canonical_id.to_string(),
            categories: BTreeSet::from([CategoryTag::Popular]),
            margin: 0.0,
            outcomes: odds
                .iter()
                .map(|(n, o, a)| Outcome { name: n.to_string(), odds: *o, active: *a })
                .collect(),
            unavailable_at: None,
        }
    }

    #[test]
    fn first_sighting_is_all_inserts() {
        let cache = OddsCache::new();
        let markets = vec![market("1x2", &[("1", 2.1, true), ("X", 3.3, true), ("2", 3.4, true)])];
        let out = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, markets, at((10, 0, 0)));
        assert_eq!(out.batch.inserts.len(), 1);
        assert!(out.batch.updates.is_empty());
    }

    #[test]
    fn unchanged_second_cycle_confirms_not_updates() {
        let cache = OddsCache::new();
        let markets = vec![market("1x2", &[("1", 2.1, true), ("X", 3.3, true), ("2", 3.4, true)])];
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, markets.clone(), at((10, 0, 0)));
        let out = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, markets, at((10, 5, 0)));
        assert!(out.batch.is_empty());
        assert_eq!(out.confirmations.len(), 1);
    }

    #[test]
    fn price_move_emits_update() {
        let cache = OddsCache::new();
        let m1 = vec![market("1x2", &[("1", 2.1, true), ("X", 3.3, true), ("2", 3.4, true)])];
        let m2 = vec![market("1x2", &[("1", 2.0, true), ("X", 3.3, true), ("2", 3.4, true)])];
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, m1, at((10, 0, 0)));
        let out = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, m2, at((10, 5, 0)));
        assert_eq!(out.batch.updates.len(), 1);
    }

    #[test]
    fn market_disappearing_emits_unavailable_and_stays_set() {
        let cache = OddsCache::new();
        let m1 = vec![market("1x2", &[("1", 2.1, true), ("X", 3.3, true), ("2", 3.4, true)])];
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, m1, at((10, 0, 0)));
        let out = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, vec![], at((10, 5, 0)));
        assert_eq!(out.batch.unavailable.len(), 1);

        // Observing the empty set again must not re-emit unavailable for the
        // same identity (monotonicity).
        let out2 = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, vec![], at((10, 10, 0)));
        assert!(out2.batch.unavailable.is_empty());
    }

    #[test]
    fn reappearing_market_clears_unavailable_and_inserts() {
        let cache = OddsCache::new();
        let m1 = vec![market("1x2", &[("1", 2.1, true), ("X", 3.3, true), ("2", 3.4, true)])];
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, m1.clone(), at((10, 0, 0)));
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, vec![], at((10, 5, 0)));
        let out = cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, m1, at((10, 10, 0)));
        assert_eq!(out.batch.became_available.len(), 1);
    }

    #[test]
    fn eviction_boundary_is_exact_at_one_hour() {
        let cache = OddsCache::new();
        let kickoff = at((10, 0, 0));
        cache.upsert_event(Event {
            external_id: ExternalMatchId(12345678),
            home_team: "A".into(),
            away_team: "B".into(),
            kickoff,
            tournament: crate::model::TournamentKey {
                sport: "football".into(),
                name: "League".into(),
                country: Some("NG".into()),
            },
            sport: "football".into(),
        });
        cache.put(ExternalMatchId(12345678), Bookmaker::Betpawa, vec![], kickoff);

        assert_eq!(cache.evict_expired(kickoff + chrono::Duration::seconds(3599)), 0);
        assert_eq!(cache.evict_expired(kickoff + chrono::Duration::seconds(3601)), 1);
    }
}
