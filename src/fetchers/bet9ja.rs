//! Bet9ja fetcher. Native market ids are short uppercase codes ("1X2", "OU",
//! "HND", "GG_NG", "COU"); translated to canonical ids by `mapping::tables`.
//! Bet9ja has the lowest default concurrency cap of the three (spec §4.G) —
//! its origin is noticeably stricter about request rates than the others.
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
    events: Vec<Bet9jaEvent>,
}

#[derive(Debug, Deserialize)]
struct Bet9jaEvent {
    #[serde(rename = "EXTID")]
    extid: u32,
    #[serde(rename = "HOME")]
    home: String,
    #[serde(rename = "AWAY")]
    away: String,
    #[serde(rename = "DATE")]
    date: String,
    #[serde(rename = "LEAGUE")]
    league: String,
    #[serde(rename = "COUNTRY")]
    country: Option<String>,
    #[serde(rename = "SPORT")]
    sport: String,
}

#[derive(Debug, Deserialize)]
struct EventDetailResponse {
    #[serde(rename = "MARKETS")]
    markets: Vec<Bet9jaMarket>,
}

#[derive(Debug, Deserialize)]
struct Bet9jaMarket {
    #[serde(rename = "CODE")]
    code: String,
    #[serde(rename = "DESC")]
    desc: String,
    #[serde(rename = "LINE")]
    line: Option<f64>,
    #[serde(rename = "HANDICAP")]
    handicap_home: Option<f64>,
    #[serde(rename = "ODDS")]
    odds: Vec<Bet9jaOutcome>,
}

#[derive(Debug, Deserialize)]
struct Bet9jaOutcome {
    #[serde(rename = "SEL")]
    selection: String,
    #[serde(rename = "VAL")]
    value: f64,
    #[serde(rename = "OPEN")]
    open: bool,
}

pub struct Bet9jaFetcher {
    client: Client,
    base_url: String,
}

impl Bet9jaFetcher {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url,
        }
    }
}

#[async_trait]
impl Fetcher for Bet9jaFetcher {
    fn bookmaker(&self) -> Bookmaker {
        Bookmaker::Bet9ja
    }

    async fn discover(&self) -> Result<Vec<DiscoveredEvent>, AppError> {
        let url = format!("{}/api/events/upcoming", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "bet9ja".into(), source })?;

        let body: DiscoverResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "bet9ja".into(), source })?;

        Ok(body
            .events
            .into_iter()
            .filter_map(|e| {
                let kickoff = parse_kickoff(&e.date)?;
                Some(DiscoveredEvent {
                    external_id: ExternalMatchId(e.extid),
                    home_team: e.home,
                    away_team: e.away,
                    kickoff,
                    tournament_name: e.league,
                    country: e.country,
                    sport: e.sport,
                })
            })
            .collect())
    }

    async fn fetch_event(&self, external_id: ExternalMatchId) -> Result<EventDetail, AppError> {
        let url = format!("{}/api/events/{}/markets", self.base_url, external_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "bet9ja".into(), source })?;

        let body: EventDetailResponse = response
            .json()
            .await
            .map_err(|source| AppError::Fetch { bookmaker: "bet9ja".into(), source })?;

        let markets = body
            .markets
            .into_iter()
            .map(|m| RawMarket {
                bookmaker: Bookmaker::Bet9ja,
                event: external_id,
                native_market_id: m.code,
                display_name: m.desc,
                line: m.line,
                handicap_home: m.handicap_home,
                outcomes: m
                    .odds
                    .into_iter()
                    .map(|o| RawOutcome { native_label: o.selection, odds: o.value, active: o.open })
                    .collect(),
            })
            .collect();

        Ok(EventDetail { markets })
    }
}

fn parse_kickoff(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| warn!(raw, error = %e, "bet9ja: unparseable kickoff timestamp"))
        .ok()
}
