use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity announced to the coordinator at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentityConfig {
    #[serde(default = "d_node_id")]
    pub id: String,
    #[serde(default = "d_version")]
    pub version: String,
    #[serde(default = "d_team_id")]
    pub team_id: String,
}

impl Default for NodeIdentityConfig {
    fn default() -> Self {
        Self {
            id: d_node_id(),
            version: d_version(),
            team_id: d_team_id(),
        }
    }
}

fn d_node_id() -> String {
    "hello-node".into()
}
fn d_version() -> String {
    "0.1.0".into()
}
fn d_team_id() -> String {
    "default".into()
}
