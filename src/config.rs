use std::env::var;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Error raised while assembling the configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is absent.
    #[error("missing environment variable {0}")]
    MissingVar(&'static str),
    /// A URL-valued variable could not be parsed.
    #[error("invalid url in {0}: {1}")]
    InvalidUrl(&'static str, #[source] url::ParseError),
}

/// Runtime configuration, read from the environment at startup.
///
/// Every option except `RPCUrl` has a default; unparseable values fall back
/// to the default with a warning, matching the behaviour operators expect
/// from a `.env`-driven deployment.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the upstream node.
    pub rpc_url: Url,
    /// Delay between two `txpool_content` snapshots, in milliseconds.
    pub polling_period_ms: u64,
    /// Worker pool sizing factor; pool size = ⌈factor × cpu_count⌉, min 1.
    pub concurrency_factor: f64,
    /// Capacity of the pending pool.
    pub pending_pool_size: usize,
    /// Capacity of the queued pool.
    pub queued_pool_size: usize,
    /// Bus topic for transactions entering the pending pool.
    pub pending_entry_topic: String,
    /// Bus topic for transactions leaving the pending pool.
    pub pending_exit_topic: String,
    /// Bus topic for transactions entering the queued pool.
    pub queued_entry_topic: String,
    /// Bus topic for transactions leaving the queued pool.
    pub queued_exit_topic: String,
    /// Stream protocol id exchanged during the peer handshake.
    pub networking_stream: String,
    /// Discovery tag under which peers advertise themselves.
    pub networking_rendezvous: String,
    /// Address of an initial overlay peer to dial, if any.
    pub bootstrap_peer: Option<String>,
    /// TCP port the gossip listener binds on.
    pub networking_port: u16,
}

impl Config {
    /// Reads the configuration from environment variables.
    ///
    /// `RPCUrl` is mandatory; everything else falls back to a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let rpc_url = var("RPCUrl").map_err(|_| ConfigError::MissingVar("RPCUrl"))?;
        let rpc_url = Url::parse(&rpc_url).map_err(|e| ConfigError::InvalidUrl("RPCUrl", e))?;

        Ok(Self {
            rpc_url,
            polling_period_ms: parsed_or("MemPoolPollingPeriod", 1000),
            concurrency_factor: parsed_or("ConcurrencyFactor", 1.0),
            pending_pool_size: parsed_or("PendingPoolSize", 4096),
            queued_pool_size: parsed_or("QueuedPoolSize", 4096),
            pending_entry_topic: string_or("PendingTxEntryTopic", "pending_pool_entry"),
            pending_exit_topic: string_or("PendingTxExitTopic", "pending_pool_exit"),
            queued_entry_topic: string_or("QueuedTxEntryTopic", "queued_pool_entry"),
            queued_exit_topic: string_or("QueuedTxExitTopic", "queued_pool_exit"),
            networking_stream: string_or("NetworkingStream", "/mempool-mirror/tx/1.0.0"),
            networking_rendezvous: string_or("NetworkingRendezvous", "mempool-mirror"),
            bootstrap_peer: var("BootstrapPeer").ok().filter(|v| !v.is_empty()),
            networking_port: parsed_or("NetworkingPort", 7230),
        })
    }

    /// Snapshot polling period as a [`Duration`].
    pub const fn polling_period(&self) -> Duration {
        Duration::from_millis(self.polling_period_ms)
    }

    /// Number of concurrent RPC probe workers: ⌈factor × cpu_count⌉, min 1.
    pub fn worker_pool_size(&self) -> usize {
        let cpus = std::thread::available_parallelism().map_or(1, usize::from);
        let size = (self.concurrency_factor * cpus as f64).ceil() as isize;
        if size < 1 {
            tracing::warn!(target: "config", "bad concurrency factor, using unit sized pool");
            return 1;
        }
        size as usize
    }

    /// Address the gossip listener binds on.
    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.networking_port)
    }
}

fn string_or(key: &'static str, default: &str) -> String {
    match var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_owned(),
    }
}

fn parsed_or<T: std::str::FromStr + std::fmt::Display + Copy>(key: &'static str, default: T) -> T {
    match var(key) {
        Err(_) => default,
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(target: "config", %key, %raw, %default, "unparseable value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_pool_size_never_below_one() {
        let mut config = Config {
            rpc_url: Url::parse("http://localhost:8545").unwrap(),
            polling_period_ms: 1000,
            concurrency_factor: -3.0,
            pending_pool_size: 4096,
            queued_pool_size: 4096,
            pending_entry_topic: "pending_pool_entry".into(),
            pending_exit_topic: "pending_pool_exit".into(),
            queued_entry_topic: "queued_pool_entry".into(),
            queued_exit_topic: "queued_pool_exit".into(),
            networking_stream: "/mempool-mirror/tx/1.0.0".into(),
            networking_rendezvous: "mempool-mirror".into(),
            bootstrap_peer: None,
            networking_port: 7230,
        };
        assert_eq!(config.worker_pool_size(), 1);

        config.concurrency_factor = 0.0001;
        assert_eq!(config.worker_pool_size(), 1);

        config.concurrency_factor = 2.0;
        assert!(config.worker_pool_size() >= 2);
    }

    // Env-derived fields are covered in one test: the variables are process
    // globals and concurrent tests would race on them.
    #[test]
    fn from_env_defaults_and_overrides() {
        std::env::set_var("RPCUrl", "http://localhost:8545");
        let config = Config::from_env().unwrap();
        assert_eq!(config.polling_period_ms, 1000);
        assert_eq!(config.pending_entry_topic, "pending_pool_entry");
        assert_eq!(config.queued_exit_topic, "queued_pool_exit");
        assert_eq!(config.networking_port, 7230);
        assert!(config.bootstrap_peer.is_none());

        std::env::set_var("MemPoolPollingPeriod", "250");
        std::env::set_var("PendingTxEntryTopic", "custom_entry");
        std::env::set_var("PendingPoolSize", "not-a-number");
        std::env::set_var("BootstrapPeer", "10.0.0.7:7230");
        let config = Config::from_env().unwrap();
        assert_eq!(config.polling_period_ms, 250);
        assert_eq!(config.pending_entry_topic, "custom_entry");
        assert_eq!(config.pending_pool_size, 4096);
        assert_eq!(config.bootstrap_peer.as_deref(), Some("10.0.0.7:7230"));

        std::env::remove_var("RPCUrl");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::MissingVar("RPCUrl"))
        ));
    }
}
