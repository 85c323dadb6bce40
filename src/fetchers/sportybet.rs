//! SportyBet fetcher. Native market ids are bare numeric strings ("1", "16",
//! "18", ...); translated to canonical ids by `mapping::tables`.
//!
//! Grounded on `monaco::client::MonacoApiClient`'s client-wrapper shape.

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
    data: Vec<SportyBetEvent>,
}

#[derive(Debug, Deserialize)]
struct SportyBetEvent {
    #[serde(rename = "eventId")]
    event_id: u32,
    #[serde(rename = "homeTeam")]
    home_team: String,
    #[serde(rename = "awayTeam")]
    away_team: String,
    #[serde(rename = "estimateStartTime")]
    estimate_start_time: i64,
    tournament: String,
    category: Option<String>,
    sport: String,
}

#[derive(Debug, Deserialize)]
struct EventDetailResponse {
    markets: Vec<SportyBetMarket>,
}

#[derive(Debug, Deserialize)]
struct SportyBetMarket {
    id: String,
    name: String,
    #[serde(rename = "specifier")]
    line: Option<f64>,
    #[serde(rename = "handicap")]
    handicap_home: Option<f64>,
    outcomes: Vec<SportyBetOutcome>,
}

#[derive(Debug, Deserialize)]
struct SportyBetOutcome {
    desc: String,
    odds: f64,
    #[serde(rename = "isActive")]
    is_active: bool,
}

pub struct SportyBetFetcher {
    client: Client,
    base_url: String,
}

impl SportyBetFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url,
        }
    }
}

#[async_trait]
impl Fetcher for SportyBetFetcher {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::SportyBet
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, AppError> {
        let url = format!("{}/factsCenter/prematchEvents", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "sportybet".into(), source })?;

        let body: DiscoverResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "sportybet".into(), source })?;

        Ok(body
            .data
            .into_iter()
            .filter_map(|e| {
                let kickoff = parse_kickoff_millis(e.estimate_start_time)?;
                Some(DiscoveredEvent {
                    external_id: ExternalMatchId(e.event_id),
                    home_team: e.home_team,
                    away_team: e.away_team,
                    kickoff,
                    tournament_name: e.tournament,
                    country: e.category,
                    sport: e.sport,
                })
            })
            .collect())
    }

    async fn fetch_event(&self, external_id: ExternalMatchId) -> Result<EventDetail, AppError> {
        let url = format!("{}/factsCenter/event/{}/markets", self.base_url, external_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "sportybet".into(), source })?;

        let body: EventDetailResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "sportybet".into(), source })?;

        let markets = body
            .markets
            .into_iter()
            .map(|m| RawMarket {
                bookmaker: Bookmaker::SportyBet,
                event: external_id,
                native_market_id: m.id,
                display_name: m.name,
                line: m.line,
                handicap_home: m.handicap_home,
                outcomes: m
                    .outcomes
                    .into_iter()
                    .map(|o| RawOutcome { native_label: o.desc, odds: o.odds, active: o.is_active })
                    .collect(),
            })
            .collect();

        Ok(EventDetail { markets })
    }
}

fn parse_kickoff_millis(millis: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.naive_utc())
        .or_else(|| {
            warn!(millis, "sportybet: unparseable kickoff timestamp");
            None
        })
}
