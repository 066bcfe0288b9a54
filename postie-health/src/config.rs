use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// When disabled, no server is started.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// e.g. `[::]:8080`, `0.0.0.0:8080` or `127.0.0.1:8080`
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Readiness fails while more retries than this are waiting to be
    /// republished.
    #[serde(default = "default_max_pending_retries")]
    pub max_pending_retries: u64,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_max_pending_retries() -> u64 {
    10000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            max_pending_retries: default_max_pending_retries(),
        }
    }
}
