//! Read API + push upgrade route (spec §6): thin handlers over
//! `cache`/`coordinator`/`db` state.
//!
//! Grounded on the teacher's `main.rs` Axum `Router` wiring and
//! `odds-processor::network::stream`'s `AppState`/`ws_handler`/`get_stats`
//! shape, generalised from one broadcast channel to the topic-subscribed
//! `PushHub`.

use crate::cache::OddsCache;
use crate::coordinator::EventCoordinator;
use crate::model::{Bookmaker, ExternalMatchId, Topic};
use crate::push::PushHub;
use axum::{
    extract::ws::{Message, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<OddsCache>,
    pub coordinator: Arc<EventCoordinator>,
    pub push_hub: PushHub,
    pub pool: PgPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(list_events))
        .route("/events/:id", get(get_event))
        .route("/history/odds", get(history_odds))
        .route("/history/margin", get(history_margin))
        .route("/scrape/event/:external_id", post(scrape_one_event))
        .route("/scrape", post(trigger_scrape))
        .route("/scrape/:run_id", get(scrape_status))
        .route("/scrape/stream", get(scrape_stream_gone))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    tournament: Option<String>,
    country: Option<String>,
    from: Option<chrono::NaiveDateTime>,
    to: Option<chrono::NaiveDateTime>,
    #[serde(default)]
    include_started: bool,
}

#[derive(Debug, Serialize)]
struct EventView {
    external_id: u32,
    home_team: String,
    away_team: String,
    kickoff: chrono::NaiveDateTime,
    tournament: String,
    country: Option<String>,
    sport: String,
    markets: Vec<crate::model::MarketSnapshot>,
}

async fn list_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Json<Vec<EventView>> {
    let now = chrono::Utc::now().naive_utc();
    let views: Vec<EventView> = state
        .cache
        .all_events()
        .into_iter()
        .filter(|e| query.tournament.as_deref().map_or(true, |t| e.tournament.name == t))
        .filter(|e| query.country.as_deref().map_or(true, |c| e.tournament.country.as_deref() == Some(c)))
        .filter(|e| query.from.map_or(true, |from| e.kickoff >= from))
        .filter(|e| query.to.map_or(true, |to| e.kickoff <= to))
        .filter(|e| query.include_started || e.kickoff > now)
        .map(|e| EventView {
            external_id: e.external_id.0,
            home_team: e.home_team,
            away_team: e.away_team,
            kickoff: e.kickoff,
            tournament: e.tournament.name,
            country: e.tournament.country,
            sport: e.sport,
            markets: state.cache.get_current(e.external_id),
        })
        .collect();
    Json(views)
}

async fn get_event(State(state): State<AppState>, Path(id): Path<u32>) -> Result<Json<EventView>, StatusCode> {
    let external_id = ExternalMatchId(id);
    let event = state.cache.event(external_id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(EventView {
        external_id: event.external_id.0,
        home_team: event.home_team,
        away_team: event.away_team,
        kickoff: event.kickoff,
        tournament: event.tournament.name,
        country: event.tournament.country,
        sport: event.sport,
        markets: state.cache.get_current(external_id),
    }))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    event: u32,
    market: String,
    bookmaker: String,
    line: Option<f64>,
}

async fn history_odds(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Result<Json<Vec<crate::db::OddsHistoryRow>>, StatusCode> {
    if Bookmaker::from_slug(&query.bookmaker).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let rows = crate::db::fetch_odds_history(&state.pool, query.event, &query.bookmaker, &query.market, query.line)
        .await
        .map_err(|e| {
            warn!(error = %e, "history/odds query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(rows))
}

async fn history_margin(State(state): State<AppState>, Query(query): Query<HistoryQuery>) -> Result<Json<Vec<crate::db::MarginHistoryRow>>, StatusCode> {
    if Bookmaker::from_slug(&query.bookmaker).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let rows = crate::db::fetch_margin_history(&state.pool, query.event, &query.bookmaker, &query.market, query.line)
        .await
        .map_err(|e| {
            warn!(error = %e, "history/margin query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
struct ScrapeEventResult {
    event: u32,
    inserted: usize,
    updated: usize,
    confirmed: usize,
    unmappable: usize,
}

async fn scrape_one_event(State(state): State<AppState>, Path(external_id): Path<u32>) -> Json<ScrapeEventResult> {
    let id = ExternalMatchId(external_id);
    let counts = state.coordinator.run_single_event(id).await;
    Json(ScrapeEventResult {
        event: external_id,
        inserted: counts.inserted,
        updated: counts.updated,
        confirmed: counts.confirmed,
        unmappable: counts.unmappable,
    })
}

#[derive(Debug, Serialize)]
struct ScrapeTriggerResult {
    run_id: u64,
}

async fn trigger_scrape(State(state): State<AppState>) -> Json<ScrapeTriggerResult> {
    let run_id = state.coordinator.spawn_cycle();
    Json(ScrapeTriggerResult { run_id })
}

async fn scrape_status(State(state): State<AppState>, Path(run_id): Path<u64>) -> Result<Json<crate::coordinator::CycleReport>, StatusCode> {
    state.coordinator.registry().get(run_id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Historical path, replaced by the push channel (spec §6).
async fn scrape_stream_gone() -> StatusCode {
    StatusCode::GONE
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientControl {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, state: AppState) {
    let handle = state.push_hub.connect();
    let subscriber_id = handle.id;
    info!(subscriber_id, "push channel client connected");

    let (mut sender, mut receiver) = futures::StreamExt::split(socket);
    let push_hub = state.push_hub.clone();

    let send_task = tokio::spawn(async move {
        // `handle` is owned by this task, not partially moved out of, so its
        // `Drop` impl still fires (and unsubscribes) once the task ends.
        let mut handle = handle;
        while let Some(message) = handle.rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if futures::SinkExt::send(&mut sender, Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = futures::StreamExt::next(&mut receiver).await {
        let Message::Text(text) = message else { continue };
        let Ok(control) = serde_json::from_str::<ClientControl>(&text) else {
            continue;
        };
        match control {
            ClientControl::Subscribe { topics } => {
                let topics: Vec<Topic> = topics.iter().filter_map(|t| Topic::from_str(t)).collect();
                push_hub.subscribe(subscriber_id, &topics);
            }
            ClientControl::Unsubscribe { topics } => {
                let topics: Vec<Topic> = topics.iter().filter_map(|t| Topic::from_str(t)).collect();
                push_hub.unsubscribe(subscriber_id, &topics);
            }
        }
    }

    send_task.abort();
    info!(subscriber_id, "push channel client disconnected");
}
