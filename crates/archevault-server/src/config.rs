use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";
const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub rpc_url: String,
    /// Token gating is off when no mint is configured.
    pub token_mint: Option<String>,
    pub min_balance: f64,
}

impl Config {
    /// Reads `ARCHEVAULT_*` variables, falling back to development defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("ARCHEVAULT_JWT_SECRET").unwrap_or_else(|| {
            warn!("ARCHEVAULT_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let port = match get("ARCHEVAULT_PORT") {
            Some(raw) => raw.parse().context("ARCHEVAULT_PORT must be a port number")?,
            None => 3000,
        };
        let min_balance = match get("ARCHEVAULT_MIN_BALANCE") {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .context("ARCHEVAULT_MIN_BALANCE must be a non-negative number")?,
            None => 0.0,
        };

        Ok(Self {
            host: get("ARCHEVAULT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(get("ARCHEVAULT_DB_PATH").unwrap_or_else(|| "archevault.db".into())),
            jwt_secret,
            rpc_url: get("ARCHEVAULT_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.into()),
            token_mint: get("ARCHEVAULT_TOKEN_MINT").filter(|m| !m.trim().is_empty()),
            min_balance,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}
