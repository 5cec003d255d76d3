use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("RPC request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("malformed RPC response: {0}")]
    Malformed(&'static str),
}

/// Source of a wallet's holdings of the gating token.
#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn token_balance(&self, owner: &str) -> Result<f64, BalanceError>;
}

/// Constant balance, for open deployments and tests.
pub struct FixedBalance(pub f64);

#[async_trait]
impl BalanceProvider for FixedBalance {
    async fn token_balance(&self, _owner: &str) -> Result<f64, BalanceError> {
        Ok(self.0)
    }
}

/// Sums the owner's SPL token accounts for one mint via Solana JSON-RPC.
pub struct SolanaRpcBalance {
    client: reqwest::Client,
    rpc_url: String,
    mint: String,
}

impl SolanaRpcBalance {
    pub fn new(rpc_url: impl Into<String>, mint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            mint: mint.into(),
        }
    }
}

#[async_trait]
impl BalanceProvider for SolanaRpcBalance {
    async fn token_balance(&self, owner: &str) -> Result<f64, BalanceError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTokenAccountsByOwner",
            "params": [
                owner,
                { "mint": self.mint },
                { "encoding": "jsonParsed" }
            ]
        });

        let body: Value = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = body.get("error") {
            return Err(BalanceError::Rpc(err.to_string()));
        }
        let result = body
            .get("result")
            .ok_or(BalanceError::Malformed("missing result"))?;
        sum_token_amounts(result)
    }
}

/// Adds up `uiAmount` (or `uiAmountString`) across every account in a
/// `getTokenAccountsByOwner` result.
pub fn sum_token_amounts(result: &Value) -> Result<f64, BalanceError> {
    let accounts = result
        .get("value")
        .and_then(Value::as_array)
        .ok_or(BalanceError::Malformed("missing value array"))?;

    let mut total = 0.0;
    for account in accounts {
        let amount = account
            .pointer("/account/data/parsed/info/tokenAmount")
            .ok_or(BalanceError::Malformed("missing tokenAmount"))?;

        let ui = match amount.get("uiAmount").and_then(Value::as_f64) {
            Some(ui) => ui,
            None => amount
                .get("uiAmountString")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or(BalanceError::Malformed("missing uiAmount"))?,
        };
        total += ui;
    }
    Ok(total)
}
