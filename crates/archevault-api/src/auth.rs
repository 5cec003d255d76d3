use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info, warn};
use uuid::Uuid;

use archevault_types::api::{Claims, VerifyRequest, VerifyResponse};
use archevault_types::models::short_wallet_name;

use crate::convert::format_timestamp;
use crate::verifier::VerifyError;
use crate::{AppState, run_db};

/// Bearer tokens outlive the signature window; the session cache on the
/// client enforces its own shorter freshness.
const TOKEN_LIFETIME_HOURS: i64 = 24;

/// POST /auth/verify: exchanges a signed challenge for a session.
pub async fn verify_wallet(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(req) => req,
        Err(rejection) => {
            warn!("Malformed verify request: {}", rejection);
            return rejected(StatusCode::BAD_REQUEST, "InvalidRequest");
        }
    };

    let auth = match state.verifier.verify(&req, chrono::Utc::now()).await {
        Ok(auth) => auth,
        Err(e) => {
            warn!("Wallet {} rejected: {}", req.address, e);
            let mut response = VerifyResponse {
                authorized: false,
                error: Some(e.code().to_string()),
                ..Default::default()
            };
            if let VerifyError::InsufficientBalance {
                balance,
                requirement,
            } = e
            {
                response.token_balance = Some(balance);
                response.requirement = Some(requirement);
            }
            return (e.status(), Json(response)).into_response();
        }
    };

    // The verifier persists nothing; record the user here.
    let wallet = auth.address.clone();
    let upsert = run_db(&state, move |db| {
        db.upsert_wallet_user(
            &Uuid::new_v4().to_string(),
            &wallet,
            &short_wallet_name(&wallet),
            &format_timestamp(chrono::Utc::now()),
        )
    })
    .await;

    let (row, created) = match upsert {
        Ok(result) => result,
        Err(status) => return rejected(status, "Internal"),
    };
    let Ok(user_id) = row.id.parse::<Uuid>() else {
        error!("Corrupt user id '{}' for wallet {}", row.id, auth.address);
        return rejected(StatusCode::INTERNAL_SERVER_ERROR, "Internal");
    };
    if created {
        info!("New wallet user {} ({})", auth.address, user_id);
    }

    let token = match create_token(&state.jwt_secret, user_id, &auth.address) {
        Ok(token) => token,
        Err(e) => {
            error!("Failed to sign token: {}", e);
            return rejected(StatusCode::INTERNAL_SERVER_ERROR, "Internal");
        }
    };

    Json(VerifyResponse {
        authorized: true,
        address: Some(auth.address),
        wallet_name: auth.wallet_name,
        token_balance: Some(auth.token_balance),
        level: Some(auth.level),
        token: Some(token),
        user_id: Some(user_id),
        ..Default::default()
    })
    .into_response()
}

fn rejected(status: StatusCode, code: &str) -> Response {
    (
        status,
        Json(VerifyResponse {
            authorized: false,
            error: Some(code.to_string()),
            ..Default::default()
        }),
    )
        .into_response()
}

pub fn create_token(secret: &str, user_id: Uuid, wallet: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        wallet: wallet.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS)).timestamp()
            as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
