use std::path::PathBuf;

use byte_unit::n_mib_bytes;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

#[cfg(feature = "logging")]
use tracing_subscriber::filter::LevelFilter;

/// Ledger connection configuration.
#[derive(Deserialize)]
pub struct Ledger {
    /// JSON-RPC endpoint of a ledger node.
    pub rpc_url: String,

    /// Network passphrase mixed into every signed transaction payload.
    pub network_passphrase: String,

    /// Escrow contract identifier.
    pub escrow_contract: String,

    /// Order book contract identifier.
    pub order_book_contract: String,

    /// Provider registry contract identifier.
    pub provider_registry_contract: String,

    /// Hex-encoded ed25519 seed of the orchestrator's own account.
    pub signer_secret_key: String,

    /// Base inclusion fee, added on top of the simulated resource fee.
    #[serde(default = "default_base_fee")]
    pub base_fee: u64,

    /// Transaction validity window, in seconds.
    #[serde(default = "default_transaction_timeout")]
    pub transaction_timeout: u64,

    /// Delay between transaction status polls, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Max number of transaction status polls before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    /// Average ledger close time, in seconds.
    #[serde(default = "default_block_interval")]
    pub block_interval: u64,
}

fn default_base_fee() -> u64 {
    100
}

fn default_transaction_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_poll_attempts() -> u32 {
    30
}

fn default_block_interval() -> u64 {
    5
}

/// Container runtime configuration.
#[derive(Deserialize)]
pub struct Runtime {
    /// Docker socket path. Local defaults are used if not set.
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Prefix of every container name created for a lease.
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Platform passed to the container runtime, e.g. `linux/amd64`.
    #[serde(default)]
    pub platform: Option<String>,

    /// Grace period before a stopped container is killed, in seconds.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,

    /// Number of log lines returned from a container.
    #[serde(default = "default_log_tail")]
    pub log_tail: usize,

    /// Max size of a single log retrieval, in bytes.
    #[serde(default = "default_log_size_limit")]
    pub log_size_limit: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            socket_path: None,
            container_prefix: default_container_prefix(),
            platform: None,
            stop_timeout: default_stop_timeout(),
            log_tail: default_log_tail(),
            log_size_limit: default_log_size_limit(),
        }
    }
}

fn default_container_prefix() -> String {
    String::from("lease")
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_log_tail() -> usize {
    100
}

fn default_log_size_limit() -> usize {
    n_mib_bytes!(1) as usize
}

/// Deployment health supervision configuration.
#[derive(Deserialize)]
pub struct Monitoring {
    /// Delay between health sweeps, in seconds.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,

    /// Consecutive failed checks that trigger remediation.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Timeout of a single runtime call made by a health check, in seconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout: u64,

    /// Max number of health events kept per deployment.
    #[serde(default = "default_health_log_retention")]
    pub health_log_retention: usize,
}

impl Default for Monitoring {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
            failure_threshold: default_failure_threshold(),
            check_timeout: default_check_timeout(),
            health_log_retention: default_health_log_retention(),
        }
    }
}

// A minute between sweeps and three strikes before remediation
// matches what providers on a typical network are expected to tolerate.
fn default_health_check_interval() -> u64 {
    60
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_check_timeout() -> u64 {
    30
}

fn default_health_log_retention() -> usize {
    100
}

/// Escrow settlement configuration.
#[derive(Deserialize, Default)]
pub struct Escrow {
    /// Token used to lock provider funds as a penalty.
    #[serde(default)]
    pub penalty_token: Option<String>,
}

/// Implementation of [`serde`]'s deserializer for [`FromStr`] types.
#[cfg(feature = "logging")]
fn deserialize_from_str<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
    T: std::str::FromStr,
    T::Err: std::error::Error,
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    std::str::FromStr::from_str(&s).map_err(serde::de::Error::custom)
}

/// Logging configuration.
#[cfg(feature = "logging")]
#[derive(Deserialize)]
pub struct Logging {
    /// Log level.
    #[serde(deserialize_with = "deserialize_from_str")]
    pub level: LevelFilter,
}

#[cfg(feature = "logging")]
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::WARN,
        }
    }
}

/// General configuration.
#[derive(Deserialize)]
pub struct Config {
    /// Ledger connection configuration.
    pub ledger: Ledger,

    /// Container runtime configuration.
    #[serde(default)]
    pub runtime: Runtime,

    /// Health supervision configuration.
    #[serde(default)]
    pub monitoring: Monitoring,

    /// Escrow configuration.
    #[serde(default)]
    pub escrow: Escrow,

    /// Logging configuration.
    #[cfg(feature = "logging")]
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    /// Create new config using default configuration file or environment variables.
    ///
    /// Nested keys are separated with a double underscore,
    /// e.g. `CONFIG_MONITORING__FAILURE_THRESHOLD=5`.
    ///
    /// See [`Env`] for more details on how to use environment variables configuration.
    ///
    /// [`Env`]: figment::providers::Env
    pub fn new(path: Option<PathBuf>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.unwrap_or(PathBuf::from("Config.toml"))))
            .merge(Env::prefixed("CONFIG_").split("__"))
            .extract()
    }

    /// Create new config suitable for running unit tests.
    ///
    /// Polling never sleeps and the attempt budgets are kept small.
    #[cfg(feature = "test-utils")]
    pub fn for_tests() -> Self {
        Self {
            ledger: Ledger {
                rpc_url: String::from("http://127.0.0.1:8000/rpc"),
                network_passphrase: String::from("Test Network"),
                escrow_contract: String::from("escrow"),
                order_book_contract: String::from("order_book"),
                provider_registry_contract: String::from("provider_registry"),
                signer_secret_key: hex::encode([7; 32]),
                base_fee: default_base_fee(),
                transaction_timeout: default_transaction_timeout(),
                poll_interval: 0,
                poll_attempts: 3,
                block_interval: default_block_interval(),
            },
            runtime: Runtime::default(),
            monitoring: Monitoring {
                health_check_interval: 1,
                failure_threshold: default_failure_threshold(),
                check_timeout: 1,
                health_log_retention: 16,
            },
            escrow: Escrow {
                penalty_token: Some(String::from("token")),
            },
            #[cfg(feature = "logging")]
            logging: Logging::default(),
        }
    }
}
