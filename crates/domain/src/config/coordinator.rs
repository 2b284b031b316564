use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Coordinator (control plane) connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How the node reaches the coordinator and how the coordinator reaches
/// the node back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator base URL (e.g. `http://localhost:8080`).
    /// When `None`, the node never registers and runs standalone.
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the coordinator bearer token.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Explicit externally reachable base address of this node.  Takes
    /// precedence over the `AGENT_CALLBACK_URL` environment variable and
    /// over the address synthesized from `server.host`/`server.port`.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Register with the coordinator when the node starts serving.
    #[serde(default = "d_true")]
    pub auto_register: bool,
    /// Seconds between `ready` lease renewals.  `0` disables renewal.
    #[serde(default = "d_lease_refresh_secs")]
    pub lease_refresh_secs: u64,
    /// Per-request timeout for every outbound coordinator call.
    #[serde(default = "d_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: None,
            token_env: d_token_env(),
            callback_url: None,
            auto_register: true,
            lease_refresh_secs: d_lease_refresh_secs(),
            request_timeout_ms: d_request_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Resolve the bearer token from [`token_env`](Self::token_env).
    /// Unset or empty variables yield `None`.
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

fn d_token_env() -> String {
    "AN_COORDINATOR_TOKEN".into()
}
fn d_true() -> bool {
    true
}
fn d_lease_refresh_secs() -> u64 {
    120
}
fn d_request_timeout_ms() -> u64 {
    15_000
}
