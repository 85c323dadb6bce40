//! Betpawa fetcher. Betpawa is the canonical bookmaker (spec §3): its own
//! market ids and outcome labels define the mapping tables' target shape,
//! so this client's job is the thinnest of the three.
//!
//! Grounded on `monaco::client::MonacoApiClient`'s shape (a `reqwest::Client`
//! wrapped with a fixed base URL and timeout); Betpawa needs no session
//! handshake so there is nothing here to mirror from its token refresh logic.

use super::{DiscoveredEvent, EventDetail, Fetcher};
use crate::error::AppError;
use crate::mapping::{RawMarket, RawOutcome};
use crate::model::{Bookmaker, ExternalMatchId};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    events: Vec<BetpawaEvent>,
}

#[derive(Debug, Deserialize)]
struct BetpawaEvent {
    #[serde(rename = "eventId")]
    event_id: u32,
    #[serde(rename = "homeTeamName")]
    home_team_name: String,
    #[serde(rename = "awayTeamName")]
    away_team_name: String,
    #[serde(rename = "startTime")]
    start_time: String,
    #[serde(rename = "competitionName")]
    competition_name: String,
    #[serde(rename = "countryName")]
    country_name: Option<String>,
    #[serde(rename = "sportName")]
    sport_name: String,
}

#[derive(Debug, Deserialize)]
struct EventDetailResponse {
    markets: Vec<BetpawaMarket>,
}

#[derive(Debug, Deserialize)]
struct BetpawaMarket {
    #[serde(rename = "marketId")]
    market_id: String,
    name: String,
    line: Option<f64>,
    #[serde(rename = "handicapHome")]
    handicap_home: Option<f64>,
    outcomes: Vec<BetpawaOutcome>,
}

#[derive(Debug, Deserialize)]
struct BetpawaOutcome {
    name: String,
    price: f64,
    active: bool,
}

pub struct BetpawaFetcher {
    client: Client,
    base_url: String,
}

impl BetpawaFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url,
        }
    }
}

#[async_trait]
impl Fetcher for BetpawaFetcher {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::Betpawa
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, AppError> {
        let url = format!("{}/v2/events/upcoming", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "betpawa".into(), source })?;

        let body: DiscoverResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "betpawa".into(), source })?;

        Ok(body
            .events
            .into_iter()
            .filter_map(|e| {
                let kickoff = parse_kickoff(&e.start_time)?;
                Some(DiscoveredEvent {
                    external_id: ExternalMatchId(e.event_id),
                    home_team: e.home_team_name,
                    away_team: e.away_team_name,
                    kickoff,
                    tournament_name: e.competition_name,
                    country: e.country_name,
                    sport: e.sport_name,
                })
            })
            .collect())
    }

    async fn fetch_event(&self, external_id: ExternalMatchId) -> Result<EventDetail, AppError> {
        let url = format!("{}/v2/events/{}/markets", self.base_url, external_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "betpawa".into(), source })?;

        let body: EventDetailResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "betpawa".into(), source })?;

        let markets = body
            .markets
            .into_iter()
            .map(|m| RawMarket {
                bookmaker: Bookmaker::Betpawa,
                event: external_id,
                native_market_id: m.market_id,
                display_name: m.name,
                line: m.line,
                handicap_home: m.handicap_home,
                outcomes: m
                    .outcomes
                    .into_iter()
                    .map(|o| RawOutcome { native_label: o.name, odds: o.price, active: o.active })
                    .collect(),
            })
            .collect();

        Ok(EventDetail { markets })
    }
}

fn parse_kickoff(raw: &str) -> Option<NaiveDateTime> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| warn!(raw, error = %e, "betpawa: unparseable kickoff timestamp"))
        .ok()
}
