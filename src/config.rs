//! Process configuration read from the environment.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::api::RateLimitConfig;
use crate::app::{NotaryConfig, WorkerConfig};
use crate::domain::ConfigError;
use crate::infra::EvmClientConfig;
use crate::infra::observability::LogFormat;

/// Connection details of the notarization contract and its funding account.
pub struct LedgerSettings {
    pub rpc_url: String,
    pub contract_address: String,
    pub private_key: SecretString,
    pub client: EvmClientConfig,
}

impl std::fmt::Debug for LedgerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSettings")
            .field("rpc_url", &self.rpc_url)
            .field("contract_address", &self.contract_address)
            .field("private_key", &"[REDACTED]")
            .field("client", &self.client)
            .finish()
    }
}

#[derive(Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub server_addr: String,
    /// `None` runs without a ledger; every write then reports a failure.
    pub ledger: Option<LedgerSettings>,
    pub notary: NotaryConfig,
    pub worker: WorkerConfig,
    pub rate_limit: RateLimitConfig,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` when `DATABASE_URL` is unset, or when `LEDGER_RPC_URL`
    /// is set without the contract address and private key. `InvalidValue`
    /// when a variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable or `None` when it is unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let database_url = env.required("DATABASE_URL")?;
        let server_addr = env
            .get("SERVER_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string());

        let mut client = EvmClientConfig {
            chain_id: env.parse_opt("LEDGER_CHAIN_ID")?,
            ..EvmClientConfig::default()
        };
        client.gas_limit = env.parse_or("LEDGER_GAS_LIMIT", client.gas_limit)?;
        client.confirmation_timeout = Duration::from_secs(env.parse_or(
            "LEDGER_CONFIRMATION_TIMEOUT_SECS",
            client.confirmation_timeout.as_secs(),
        )?);

        let ledger = match env.get("LEDGER_RPC_URL") {
            Some(rpc_url) => Some(LedgerSettings {
                rpc_url,
                contract_address: env.required("LEDGER_CONTRACT_ADDRESS")?,
                private_key: SecretString::from(env.required("LEDGER_PRIVATE_KEY")?),
                client: client.clone(),
            }),
            None => None,
        };

        let defaults = NotaryConfig::default();
        let notary = NotaryConfig {
            mode: env.parse_or("LEDGER_CONFIRMATION_MODE", defaults.mode)?,
            // A lease shorter than the confirmation wait would let the
            // reconciler resubmit a write that is still in flight.
            lease: defaults.lease.max(client.confirmation_timeout * 2),
            max_attempts: env.parse_or("PROOF_MAX_ATTEMPTS", defaults.max_attempts)?,
            ..defaults
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            enabled: env.parse_or("PROOF_WORKER_ENABLED", worker_defaults.enabled)?,
            poll_interval: Duration::from_secs(env.parse_or(
                "PROOF_WORKER_POLL_SECS",
                worker_defaults.poll_interval.as_secs(),
            )?),
            batch_size: env.parse_or("PROOF_WORKER_BATCH_SIZE", worker_defaults.batch_size)?,
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            general_rps: env.parse_or("RATE_LIMIT_RPS", rate_defaults.general_rps)?,
            general_burst: env.parse_or("RATE_LIMIT_BURST", rate_defaults.general_burst)?,
            ..rate_defaults
        };

        Ok(Self {
            database_url,
            server_addr,
            ledger,
            notary,
            worker,
            rate_limit,
            log_format: env.parse_or("LOG_FORMAT", LogFormat::default())?,
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Unset and blank are the same.
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    fn parse_opt<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse_opt(key)?.unwrap_or(default))
    }
}
