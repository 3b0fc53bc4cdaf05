use crate::features::lifecycle::repo::grpc::DEFAULT_PER_CALL_TIMEOUT;
use crate::features::subscription::{
    SubscriptionPolicy, DEFAULT_SUBSCRIBE_ATTEMPTS, DEFAULT_SUBSCRIBE_BACKOFF,
};
use crate::shared::error::{HarnessError, HarnessResult};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MANAGER_ADDR: &str = "http://127.0.0.1:8080";
pub const DEFAULT_NAMESPACE: &str = "default";

/// Harness settings, read from `DEVRIG_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub manager_addr: String,
    pub namespace: String,
    pub server_endpoint: Option<String>,
    pub server_token: Option<String>,
    pub per_call_timeout: Duration,
    pub subscription: SubscriptionPolicy,
    pub agent_dir: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            manager_addr: DEFAULT_MANAGER_ADDR.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            server_endpoint: None,
            server_token: None,
            per_call_timeout: DEFAULT_PER_CALL_TIMEOUT,
            subscription: SubscriptionPolicy {
                attempts: DEFAULT_SUBSCRIBE_ATTEMPTS,
                backoff: DEFAULT_SUBSCRIBE_BACKOFF,
            },
            agent_dir: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Unset or blank keys
    /// fall back to defaults; malformed numbers are rejected.
    pub fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let per_call_timeout = match get("DEVRIG_PER_CALL_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("DEVRIG_PER_CALL_TIMEOUT_SECS", &raw)?),
            None => defaults.per_call_timeout,
        };
        let attempts = match get("DEVRIG_SUBSCRIBE_ATTEMPTS") {
            Some(raw) => {
                let attempts = parse_number("DEVRIG_SUBSCRIBE_ATTEMPTS", &raw)?;
                u32::try_from(attempts).map_err(|_| {
                    HarnessError::Config(format!("DEVRIG_SUBSCRIBE_ATTEMPTS out of range: {raw}"))
                })?
            }
            None => defaults.subscription.attempts,
        };
        if attempts == 0 {
            return Err(HarnessError::Config(
                "DEVRIG_SUBSCRIBE_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let backoff = match get("DEVRIG_SUBSCRIBE_BACKOFF_MS") {
            Some(raw) => Duration::from_millis(parse_number("DEVRIG_SUBSCRIBE_BACKOFF_MS", &raw)?),
            None => defaults.subscription.backoff,
        };

        Ok(Self {
            manager_addr: get("DEVRIG_MANAGER_ADDR").unwrap_or(defaults.manager_addr),
            namespace: get("DEVRIG_NAMESPACE").unwrap_or(defaults.namespace),
            server_endpoint: get("DEVRIG_SERVER_ENDPOINT"),
            server_token: get("DEVRIG_SERVER_TOKEN"),
            per_call_timeout,
            subscription: SubscriptionPolicy { attempts, backoff },
            agent_dir: get("DEVRIG_AGENT_DIR").map(PathBuf::from),
        })
    }

    pub fn with_manager_addr(mut self, addr: impl Into<String>) -> Self {
        self.manager_addr = addr.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_server(mut self, endpoint: impl Into<String>, token: Option<String>) -> Self {
        self.server_endpoint = Some(endpoint.into());
        self.server_token = token;
        self
    }

    pub fn with_per_call_timeout(mut self, timeout: Duration) -> Self {
        self.per_call_timeout = timeout;
        self
    }

    pub fn with_subscription(mut self, policy: SubscriptionPolicy) -> Self {
        self.subscription = policy;
        self
    }
}

fn parse_number(key: &str, raw: &str) -> HarnessResult<u64> {
    raw.parse::<u64>()
        .map_err(|e| HarnessError::Config(format!("{key} must be a non-negative integer, got {raw:?}: {e}")))
}
