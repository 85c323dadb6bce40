//! `Config::from_env()` in the teacher's style: one env var per field, a
//! sensible default for everything, `dotenvy` loaded before this runs.

use crate::model::Bookmaker;
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_port: u16,

    pub betpawa_base_url: String,
    pub sportybet_base_url: String,
    pub bet9ja_base_url: String,

    /// Per-bookmaker global concurrency caps (spec §4.G step 4). Indexed by
    /// `Bookmaker::ALL` order.
    pub bookmaker_concurrency: [usize; 3],
    /// Fixed per-event semaphore width, one permit per bookmaker.
    pub per_event_concurrency: usize,
    /// Outer event-parallelism width bounding fan-out across events.
    pub event_parallelism: usize,

    pub fetch_timeout: Duration,
    pub cycle_deadline: Duration,

    pub scrape_interval: Duration,
    pub cleanup_hour_utc: u32,
    pub cleanup_minute_utc: u32,
    pub retention_days: i64,

    pub watchdog_interval: Duration,
    pub watchdog_staleness_threshold: Duration,

    pub write_pipeline_capacity: usize,
    pub write_pipeline_workers: usize,

    pub push_subscriber_queue_capacity: usize,
}

impl Config {
    pub fn from_env() -> Self {
        let server_port = env_parse("PORT", 8080);

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            server_port,

            betpawa_base_url: env::var("BETPAWA_BASE_URL").unwrap_or_default(),
            sportybet_base_url: env::var("SPORTYBET_BASE_URL").unwrap_or_default(),
            bet9ja_base_url: env::var("BET9JA_BASE_URL").unwrap_or_default(),

            bookmaker_concurrency: [
                env_parse("BETPAWA_CONCURRENCY", Bookmaker::Betpawa.default_concurrency()),
                env_parse("SPORTYBET_CONCURRENCY", Bookmaker::SportyBet.default_concurrency()),
                env_parse("BET9JA_CONCURRENCY", Bookmaker::Bet9ja.default_concurrency()),
            ],
            per_event_concurrency: 3,
            event_parallelism: env_parse("EVENT_PARALLELISM", 10),

            fetch_timeout: Duration::from_secs(env_parse("FETCH_TIMEOUT_SECS", 20)),
            cycle_deadline: Duration::from_secs(env_parse("CYCLE_DEADLINE_SECS", 900)),

            scrape_interval: Duration::from_secs(env_parse("SCRAPE_INTERVAL_SECS", 60)),
            cleanup_hour_utc: env_parse("CLEANUP_HOUR_UTC", 2),
            cleanup_minute_utc: env_parse("CLEANUP_MINUTE_UTC", 0),
            retention_days: env_parse::<i64>("RETENTION_DAYS", 14).clamp(1, 90),

            watchdog_interval: Duration::from_secs(env_parse("WATCHDOG_INTERVAL_SECS", 120)),
            watchdog_staleness_threshold: Duration::from_secs(env_parse("WATCHDOG_STALENESS_SECS", 900)),

            write_pipeline_capacity: env_parse("WRITE_PIPELINE_CAPACITY", 1024),
            write_pipeline_workers: env_parse("WRITE_PIPELINE_WORKERS", 4),

            push_subscriber_queue_capacity: env_parse("PUSH_QUEUE_CAPACITY", 64),
        }
    }

    pub fn bookmaker_concurrency_for(&self, bookmaker: Bookmaker) -> usize {
        let idx = Bookmaker::ALL.iter().position(|b| *b == bookmaker).unwrap_or(0);
        self.bookmaker_concurrency[idx]
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| {
            if env::var(key).is_ok() {
                eprintln!("Warning: invalid {key}, using default");
            }
            default
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_days_clamps_to_valid_range() {
        std::env::set_var("RETENTION_DAYS", "400");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        let config = Config::from_env();
        assert_eq!(config.retention_days, 90);
        std::env::remove_var("RETENTION_DAYS");
        std::env::remove_var("DATABASE_URL");
    }
}
