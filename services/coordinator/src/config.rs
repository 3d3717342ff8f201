//! Environment-driven configuration.
//!
//! Everything the binary needs comes from the environment; there is no
//! config file layer. Mandatory keys fail startup with `ConfigMissing`,
//! optional keys fall back to defaults that suit a single mainnet
//! deployment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chain_gateway::GatewayConfig;
use match_selector::SelectorConfig;
use results_collector::{CollectorConfig, HttpFeedConfig};
use services_common::{DailySchedule, MAX_RESULTS_POLL_SECS};

use crate::error::{CoordinatorError, CoordinatorResult};

// Mandatory keys.
const ENV_DATABASE_URL: &str = "DATABASE_URL";
const ENV_RPC_URL: &str = "TENFOLD_RPC_URL";
const ENV_CONTRACT_ADDRESS: &str = "TENFOLD_CONTRACT_ADDRESS";
const ENV_SIGNER_KEY: &str = "TENFOLD_SIGNER_KEY";
const ENV_FEED_URL: &str = "TENFOLD_RESULTS_FEED_URL";

// Optional keys.
const ENV_FEED_KEY: &str = "TENFOLD_RESULTS_FEED_KEY";
const ENV_SELECTION_TIME: &str = "TENFOLD_SELECTION_TIME";
const ENV_START_BLOCK: &str = "TENFOLD_START_BLOCK";
const ENV_METRICS_ADDR: &str = "TENFOLD_METRICS_ADDR";
const ENV_WORKER_THREADS: &str = "TENFOLD_WORKER_THREADS";
const ENV_SHUTDOWN_BUDGET_SECS: &str = "TENFOLD_SHUTDOWN_BUDGET_SECS";
const ENV_LIFECYCLE_TICK_SECS: &str = "TENFOLD_LIFECYCLE_TICK_SECS";
const ENV_EVENT_POLL_SECS: &str = "TENFOLD_EVENT_POLL_SECS";
const ENV_CONFIRMATION_DEPTH: &str = "TENFOLD_CONFIRMATION_DEPTH";

const DEFAULT_SELECTION_TIME: &str = "0 9 * * *";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9464";
const DEFAULT_WORKER_THREADS: usize = 4;
const DEFAULT_SHUTDOWN_BUDGET_SECS: u64 = 30;
const DEFAULT_LIFECYCLE_TICK_SECS: u64 = 15;
const DEFAULT_EVENT_POLL_SECS: u64 = 5;
const DEFAULT_FEED_TIMEOUT_SECS: u64 = 10;

/// Full configuration of the coordinator binary.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Chain endpoint, contract and confirmation policy.
    pub gateway: GatewayConfig,
    /// Sports data provider connection.
    pub feed: HttpFeedConfig,
    /// Results sweep tuning.
    pub collector: CollectorConfig,
    /// Slate selection tuning.
    pub selector: SelectorConfig,
    /// Daily selection moment, UTC.
    pub selection_schedule: DailySchedule,
    /// Block the event replay starts from on a fresh database. Typically
    /// the contract deployment block.
    pub start_block: u64,
    /// Listener for `/healthz` and `/metrics`.
    pub metrics_addr: SocketAddr,
    /// Tokio worker threads.
    pub worker_threads: usize,
    /// How long shutdown waits for in-flight transaction drivers.
    pub shutdown_budget: Duration,
    /// Pause between lifecycle sweeps. Capped at the sixty-second results
    /// poll ceiling.
    pub lifecycle_tick: Duration,
    /// Pause between event replay polls.
    pub event_poll_interval: Duration,
}

impl CoordinatorConfig {
    /// Load from the process environment.
    pub fn from_env() -> CoordinatorResult<Self> {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> CoordinatorResult<Self> {
        let database_url = required(env, ENV_DATABASE_URL)?;

        let mut gateway = GatewayConfig::for_contract(
            required(env, ENV_RPC_URL)?,
            &required(env, ENV_CONTRACT_ADDRESS)?,
            required(env, ENV_SIGNER_KEY)?,
        )?;
        gateway.confirmation_depth =
            parsed(env, ENV_CONFIRMATION_DEPTH, gateway.confirmation_depth)?;

        let feed = HttpFeedConfig {
            base_url: required(env, ENV_FEED_URL)?,
            api_key: env(ENV_FEED_KEY).unwrap_or_default(),
            timeout: Duration::from_secs(DEFAULT_FEED_TIMEOUT_SECS),
        };

        let selection_schedule: DailySchedule = env(ENV_SELECTION_TIME)
            .unwrap_or_else(|| DEFAULT_SELECTION_TIME.to_string())
            .parse()
            .map_err(|err: services_common::CommonError| CoordinatorError::ConfigInvalid {
                key: ENV_SELECTION_TIME,
                reason: err.to_string(),
            })?;

        let metrics_addr: SocketAddr = env(ENV_METRICS_ADDR)
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string())
            .parse()
            .map_err(|err: std::net::AddrParseError| CoordinatorError::ConfigInvalid {
                key: ENV_METRICS_ADDR,
                reason: err.to_string(),
            })?;

        let lifecycle_secs: u64 = parsed(env, ENV_LIFECYCLE_TICK_SECS, DEFAULT_LIFECYCLE_TICK_SECS)?;

        Ok(Self {
            database_url,
            gateway,
            feed,
            collector: CollectorConfig::default(),
            selector: SelectorConfig::default(),
            selection_schedule,
            start_block: parsed(env, ENV_START_BLOCK, 0)?,
            metrics_addr,
            worker_threads: parsed(env, ENV_WORKER_THREADS, DEFAULT_WORKER_THREADS)?.max(2),
            shutdown_budget: Duration::from_secs(parsed(
                env,
                ENV_SHUTDOWN_BUDGET_SECS,
                DEFAULT_SHUTDOWN_BUDGET_SECS,
            )?),
            lifecycle_tick: Duration::from_secs(
                lifecycle_secs.clamp(1, MAX_RESULTS_POLL_SECS),
            ),
            event_poll_interval: Duration::from_secs(
                parsed(env, ENV_EVENT_POLL_SECS, DEFAULT_EVENT_POLL_SECS)?.max(1),
            ),
        })
    }
}

fn required(env: &dyn Fn(&str) -> Option<String>, key: &'static str) -> CoordinatorResult<String> {
    match env(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(CoordinatorError::ConfigMissing { key }),
    }
}

fn parsed<T>(
    env: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> CoordinatorResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err: T::Err| CoordinatorError::ConfigInvalid {
                key,
                reason: err.to_string(),
            }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rustc_hash::FxHashMap;

    fn base_env() -> FxHashMap<&'static str, &'static str> {
        let mut env = FxHashMap::default();
        env.insert(ENV_DATABASE_URL, "postgres://localhost/tenfold");
        env.insert(ENV_RPC_URL, "http://127.0.0.1:8545");
        env.insert(
            ENV_CONTRACT_ADDRESS,
            "0x00000000000000000000000000000000000000cc",
        );
        env.insert(ENV_SIGNER_KEY, "0xabc123");
        env.insert(ENV_FEED_URL, "https://feed.example.com");
        env
    }

    fn load(env: &FxHashMap<&'static str, &'static str>) -> CoordinatorResult<CoordinatorConfig> {
        CoordinatorConfig::from_lookup(&|key| env.get(key).map(|v| (*v).to_string()))
    }

    #[test]
    fn mandatory_keys_fill_a_default_config() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/tenfold");
        assert_eq!(config.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(config.lifecycle_tick, Duration::from_secs(15));
        assert_eq!(config.shutdown_budget, Duration::from_secs(30));
        assert_eq!(config.start_block, 0);
        assert_eq!(config.metrics_addr.port(), 9464);
    }

    #[test]
    fn a_missing_mandatory_key_is_fatal() {
        let mut env = base_env();
        env.remove(ENV_SIGNER_KEY);
        let err = load(&env).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::ConfigMissing {
                key: ENV_SIGNER_KEY
            }
        ));
    }

    #[test]
    fn a_blank_mandatory_key_counts_as_missing() {
        let mut env = base_env();
        env.insert(ENV_DATABASE_URL, "   ");
        let err = load(&env).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::ConfigMissing {
                key: ENV_DATABASE_URL
            }
        ));
    }

    #[test]
    fn a_bad_contract_address_is_rejected_at_load() {
        let mut env = base_env();
        env.insert(ENV_CONTRACT_ADDRESS, "not-an-address");
        assert!(matches!(
            load(&env).unwrap_err(),
            CoordinatorError::Gateway(chain_gateway::GatewayError::BadAddress { .. })
        ));
    }

    #[test]
    fn the_lifecycle_tick_is_clamped_to_the_results_poll_ceiling() {
        let mut env = base_env();
        env.insert(ENV_LIFECYCLE_TICK_SECS, "300");
        let config = load(&env).unwrap();
        assert_eq!(
            config.lifecycle_tick,
            Duration::from_secs(MAX_RESULTS_POLL_SECS)
        );
    }

    #[test]
    fn overrides_parse_and_land_in_place() {
        let mut env = base_env();
        env.insert(ENV_SELECTION_TIME, "30 7 * * *");
        env.insert(ENV_START_BLOCK, "123456");
        env.insert(ENV_CONFIRMATION_DEPTH, "20");
        env.insert(ENV_WORKER_THREADS, "8");
        let config = load(&env).unwrap();
        assert_eq!(config.selection_schedule.to_string(), "30 7 * * *");
        assert_eq!(config.start_block, 123_456);
        assert_eq!(config.gateway.confirmation_depth, 20);
        assert_eq!(config.worker_threads, 8);
    }

    #[test]
    fn an_unparseable_override_names_its_key() {
        let mut env = base_env();
        env.insert(ENV_START_BLOCK, "soon");
        let err = load(&env).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::ConfigInvalid {
                key: ENV_START_BLOCK,
                ..
            }
        ));
    }
}
