use football_odds_core::api::{self, AppState};
use football_odds_core::cache::OddsCache;
use football_odds_core::config::Config;
use football_odds_core::coordinator::{CycleRegistry, EventCoordinator};
use football_odds_core::fetchers::{Bet9jaFetcher, BetpawaFetcher, Fetcher, SportyBetFetcher};
use football_odds_core::mapping::MappingTables;
use football_odds_core::push::PushHub;
use football_odds_core::scheduler::Scheduler;
use football_odds_core::write_pipeline::WritePipeline;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    dotenvy::dotenv().ok();

    info!("starting football-odds-core");

    let config = Config::from_env();
    info!("configuration loaded");

    info!("connecting to postgres...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;
    info!("connected to postgres");

    let cache = Arc::new(OddsCache::new());
    let tables = Arc::new(MappingTables::bootstrap());
    let push_hub = PushHub::with_queue_capacity(config.push_subscriber_queue_capacity);

    let (write_pipeline, write_handle) = WritePipeline::new(pool.clone(), config.write_pipeline_capacity);
    write_pipeline.spawn_workers(config.write_pipeline_workers);

    let fetchers: Vec<Arc<dyn Fetcher>> = vec![
        Arc::new(BetpawaFetcher::new(config.betpawa_base_url.clone(), config.fetch_timeout)),
        Arc::new(SportyBetFetcher::new(config.sportybet_base_url.clone(), config.fetch_timeout)),
        Arc::new(Bet9jaFetcher::new(config.bet9ja_base_url.clone(), config.fetch_timeout)),
    ];

    let registry = Arc::new(CycleRegistry::new());
    let coordinator = Arc::new(EventCoordinator::new(
        cache.clone(),
        tables,
        fetchers,
        write_handle,
        push_hub.clone(),
        config.clone(),
        registry,
    ));

    let scheduler = Scheduler::new(coordinator.clone(), pool.clone(), &config);
    scheduler.start();
    info!("scheduler started");

    let state = AppState {
        cache,
        coordinator,
        push_hub,
        pool,
    };

    let app = api::router(state).layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!(%addr, "http server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
