//! Wallet signature verification.
//!
//! A wallet proves control of its key by signing a short challenge:
//!
//! ```text
//! Sign in to Archevault
//! Wallet: <base58 address>
//! Timestamp: <unix millis>
//! ```
//!
//! The verifier checks, in order: the address, the challenge format and
//! freshness, the ed25519 signature, and finally the token balance. Each
//! step has its own failure so the caller can tell the user what to redo.
//! Nothing is persisted here.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;
use tracing::{debug, warn};

use archevault_types::api::VerifyRequest;

use crate::balance::BalanceProvider;

pub const CHALLENGE_HEADER: &str = "Sign in to Archevault";

/// Oldest acceptable challenge, in milliseconds.
pub const SIGNATURE_FRESHNESS_MS: i64 = 5 * 60 * 1000;

/// How far in the future a challenge timestamp may be.
const MAX_CLOCK_SKEW_MS: i64 = 60 * 1000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    #[error("invalid wallet address")]
    InvalidAddress,
    #[error("invalid message format: {0}")]
    InvalidMessageFormat(&'static str),
    #[error("message was signed for a different wallet")]
    WalletMismatch,
    #[error("message expired, sign a new one")]
    MessageExpired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("insufficient token balance: {balance} < {requirement}")]
    InsufficientBalance { balance: f64, requirement: f64 },
}

impl VerifyError {
    /// Stable reason code sent to clients in the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress => "InvalidAddress",
            Self::InvalidMessageFormat(_) => "InvalidMessageFormat",
            Self::WalletMismatch => "WalletMismatch",
            Self::MessageExpired => "MessageExpired",
            Self::InvalidSignature => "InvalidSignature",
            Self::InsufficientBalance { .. } => "InsufficientBalance",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidAddress | Self::InvalidMessageFormat(_) | Self::WalletMismatch => {
                StatusCode::BAD_REQUEST
            }
            Self::MessageExpired | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::InsufficientBalance { .. } => StatusCode::FORBIDDEN,
        }
    }
}

/// Renders the challenge a wallet must sign.
pub fn challenge_message(address: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}\nWallet: {}\nTimestamp: {}",
        CHALLENGE_HEADER,
        address,
        at.timestamp_millis()
    )
}

/// Extracts `(wallet, timestamp_millis)` from a challenge.
pub fn parse_challenge(message: &str) -> Result<(&str, i64), VerifyError> {
    let mut lines = message.lines().map(str::trim);

    if lines.next() != Some(CHALLENGE_HEADER) {
        return Err(VerifyError::InvalidMessageFormat("missing header"));
    }

    let mut wallet = None;
    let mut timestamp = None;
    for line in lines {
        if let Some(value) = line.strip_prefix("Wallet:") {
            wallet = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("Timestamp:") {
            timestamp = Some(
                value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| VerifyError::InvalidMessageFormat("bad timestamp"))?,
            );
        }
    }

    let wallet = wallet.ok_or(VerifyError::InvalidMessageFormat("missing wallet"))?;
    let timestamp = timestamp.ok_or(VerifyError::InvalidMessageFormat("missing timestamp"))?;
    Ok((wallet, timestamp))
}

pub fn parse_address(address: &str) -> Result<VerifyingKey, VerifyError> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| VerifyError::InvalidAddress)?;
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| VerifyError::InvalidAddress)?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| VerifyError::InvalidAddress)
}

/// Steps 1-3: address, challenge and signature. Balance-independent.
pub fn check_signed_challenge(
    address: &str,
    message: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<(), VerifyError> {
    let key = parse_address(address)?;

    let (wallet, timestamp) = parse_challenge(message)?;
    if wallet != address {
        return Err(VerifyError::WalletMismatch);
    }
    // A timestamp too far out to subtract is outside any window.
    let age = now
        .timestamp_millis()
        .checked_sub(timestamp)
        .ok_or(VerifyError::MessageExpired)?;
    if age > SIGNATURE_FRESHNESS_MS || age < -MAX_CLOCK_SKEW_MS {
        return Err(VerifyError::MessageExpired);
    }

    let sig_bytes = bs58::decode(signature)
        .into_vec()
        .map_err(|_| VerifyError::InvalidSignature)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| VerifyError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    key.verify_strict(message.as_bytes(), &signature)
        .map_err(|_| VerifyError::InvalidSignature)
}

/// Holder level, monotonic in balance.
pub fn level_for_balance(balance: f64) -> u8 {
    const TIERS: [f64; 5] = [1.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0];
    let passed = TIERS.iter().take_while(|tier| balance >= **tier).count();
    1 + passed as u8
}

#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub address: String,
    pub wallet_name: Option<String>,
    pub token_balance: f64,
    pub level: u8,
}

#[derive(Clone)]
pub struct WalletVerifier {
    balance: Arc<dyn BalanceProvider>,
    min_balance: f64,
}

impl WalletVerifier {
    pub fn new(balance: Arc<dyn BalanceProvider>, min_balance: f64) -> Self {
        Self {
            balance,
            min_balance,
        }
    }

    pub fn min_balance(&self) -> f64 {
        self.min_balance
    }

    pub async fn verify(
        &self,
        req: &VerifyRequest,
        now: DateTime<Utc>,
    ) -> Result<Authorization, VerifyError> {
        check_signed_challenge(&req.address, &req.message, &req.signature, now)?;

        // Lookup failures are soft: treat as an empty wallet.
        let balance = match self.balance.token_balance(&req.address).await {
            Ok(balance) if balance.is_finite() && balance >= 0.0 => balance,
            Ok(balance) => {
                warn!("Ignoring nonsensical balance {} for {}", balance, req.address);
                0.0
            }
            Err(e) => {
                warn!("Balance lookup failed for {}: {}", req.address, e);
                0.0
            }
        };

        if let Some(reported) = req.token_balance
            && (reported - balance).abs() > f64::EPSILON
        {
            debug!(
                "Client reported balance {} for {}, measured {}",
                reported, req.address, balance
            );
        }

        if balance < self.min_balance {
            return Err(VerifyError::InsufficientBalance {
                balance,
                requirement: self.min_balance,
            });
        }

        Ok(Authorization {
            address: req.address.clone(),
            wallet_name: req.wallet_name.clone(),
            token_balance: balance,
            level: level_for_balance(balance),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{BalanceError, FixedBalance};
    use async_trait::async_trait;
    use chrono::Duration;
    use ed25519_dalek::{Signer, SigningKey};

    fn keypair(seed: u8) -> (SigningKey, String) {
        let key = SigningKey::from_bytes(&[seed; 32]);
        let address = bs58::encode(key.verifying_key().as_bytes()).into_string();
        (key, address)
    }

    fn signed_request(key: &SigningKey, address: &str, at: DateTime<Utc>) -> VerifyRequest {
        let message = challenge_message(address, at);
        let signature = bs58::encode(key.sign(message.as_bytes()).to_bytes()).into_string();
        VerifyRequest {
            address: address.to_string(),
            message,
            signature,
            wallet_name: Some("Phantom".into()),
            token_balance: None,
        }
    }

    fn verifier(balance: f64, min: f64) -> WalletVerifier {
        WalletVerifier::new(Arc::new(FixedBalance(balance)), min)
    }

    struct FailingBalance;

    #[async_trait]
    impl BalanceProvider for FailingBalance {
        async fn token_balance(&self, _owner: &str) -> Result<f64, BalanceError> {
            Err(BalanceError::Rpc("node unavailable".into()))
        }
    }

    #[tokio::test]
    async fn fresh_valid_signature_is_authorized() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now - Duration::seconds(30));

        let auth = verifier(2_500.0, 0.0).verify(&req, now).await.unwrap();

        assert_eq!(auth.address, address);
        assert_eq!(auth.wallet_name.as_deref(), Some("Phantom"));
        assert_eq!(auth.token_balance, 2_500.0);
        assert_eq!(auth.level, 3);
    }

    #[tokio::test]
    async fn repeated_verification_is_idempotent() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now);
        let v = verifier(10.0, 0.0);

        assert_eq!(v.verify(&req, now).await, v.verify(&req, now).await);
    }

    #[tokio::test]
    async fn signature_from_other_key_rejected_regardless_of_balance() {
        let (_, address) = keypair(1);
        let (other, _) = keypair(2);
        let now = Utc::now();
        let req = signed_request(&other, &address, now);

        let err = verifier(1e9, 0.0).verify(&req, now).await.unwrap_err();
        assert_eq!(err, VerifyError::InvalidSignature);
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tampered_message_rejected() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let mut req = signed_request(&key, &address, now);
        req.message.push_str("\nNonce: 42");

        let err = verifier(0.0, 0.0).verify(&req, now).await.unwrap_err();
        assert_eq!(err, VerifyError::InvalidSignature);
    }

    #[tokio::test]
    async fn expired_challenge_rejected_even_when_signed() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now - Duration::minutes(6));

        let err = verifier(0.0, 0.0).verify(&req, now).await.unwrap_err();
        assert_eq!(err, VerifyError::MessageExpired);
    }

    #[tokio::test]
    async fn future_challenge_rejected() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now + Duration::minutes(5));

        let err = verifier(0.0, 0.0).verify(&req, now).await.unwrap_err();
        assert_eq!(err, VerifyError::MessageExpired);
    }

    #[tokio::test]
    async fn challenge_for_other_wallet_rejected() {
        let (key, address) = keypair(1);
        let (_, other_address) = keypair(2);
        let now = Utc::now();
        let mut req = signed_request(&key, &other_address, now);
        req.address = address;

        let err = verifier(0.0, 0.0).verify(&req, now).await.unwrap_err();
        assert_eq!(err, VerifyError::WalletMismatch);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn malformed_inputs() {
        let now = Utc::now();
        let (_, address) = keypair(1);

        assert_eq!(
            check_signed_challenge("not-base58-0OIl", "x", "y", now),
            Err(VerifyError::InvalidAddress)
        );
        assert_eq!(
            check_signed_challenge(&bs58::encode([1u8; 16]).into_string(), "x", "y", now),
            Err(VerifyError::InvalidAddress)
        );
        assert_eq!(
            check_signed_challenge(&address, "hello", "y", now),
            Err(VerifyError::InvalidMessageFormat("missing header"))
        );
        assert_eq!(
            check_signed_challenge(&address, CHALLENGE_HEADER, "y", now),
            Err(VerifyError::InvalidMessageFormat("missing wallet"))
        );

        let no_ts = format!("{}\nWallet: {}", CHALLENGE_HEADER, address);
        assert_eq!(
            check_signed_challenge(&address, &no_ts, "y", now),
            Err(VerifyError::InvalidMessageFormat("missing timestamp"))
        );

        for extreme in [i64::MIN, i64::MAX] {
            let far = format!("{}\nWallet: {}\nTimestamp: {}", CHALLENGE_HEADER, address, extreme);
            assert_eq!(
                check_signed_challenge(&address, &far, "abc", now),
                Err(VerifyError::MessageExpired)
            );
        }

        let garbage_sig = challenge_message(&address, now);
        assert_eq!(
            check_signed_challenge(&address, &garbage_sig, "abc", now),
            Err(VerifyError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn insufficient_balance_reports_both_numbers() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now);

        let err = verifier(5.0, 100.0).verify(&req, now).await.unwrap_err();
        assert_eq!(
            err,
            VerifyError::InsufficientBalance {
                balance: 5.0,
                requirement: 100.0
            }
        );
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn balance_outage_passes_when_requirement_is_zero() {
        let (key, address) = keypair(1);
        let now = Utc::now();
        let req = signed_request(&key, &address, now);

        let open = WalletVerifier::new(Arc::new(FailingBalance), 0.0);
        let auth = open.verify(&req, now).await.unwrap();
        assert_eq!(auth.token_balance, 0.0);
        assert_eq!(auth.level, 1);

        let gated = WalletVerifier::new(Arc::new(FailingBalance), 1.0);
        assert!(matches!(
            gated.verify(&req, now).await,
            Err(VerifyError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn levels_are_monotonic() {
        let balances = [0.0, 0.5, 1.0, 999.0, 1_000.0, 50_000.0, 100_000.0, 2e6, 1e12];
        let levels: Vec<u8> = balances.iter().map(|b| level_for_balance(*b)).collect();
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(levels.first(), Some(&1));
        assert_eq!(levels.last(), Some(&6));
    }
}
