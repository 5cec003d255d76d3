use serde::{Deserialize, Serialize};

/// Where the client finds the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:3000`.
    pub api_url: String,
    /// Realtime endpoint, e.g. `ws://localhost:3000/gateway`.
    pub gateway_url: String,
}

impl ClientConfig {
    /// Derives the gateway URL from the REST base.
    pub fn new(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_base = if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            api_url.clone()
        };
        Self {
            gateway_url: format!("{}/gateway", ws_base),
            api_url,
        }
    }

    /// Reads `ARCHEVAULT_API_URL` and optionally `ARCHEVAULT_GATEWAY_URL`.
    pub fn from_env() -> Self {
        let api_url = std::env::var("ARCHEVAULT_API_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let mut config = Self::new(&api_url);
        if let Ok(gateway_url) = std::env::var("ARCHEVAULT_GATEWAY_URL") {
            config.gateway_url = gateway_url;
        }
        config
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}
