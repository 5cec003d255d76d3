use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info, warn};

use archevault_types::api::Claims;
use archevault_types::events::GatewayEvent;
use archevault_types::profile::Profile;

use crate::convert::{profile_from_row, profile_to_row, user_from_row};
use crate::{AppState, run_db};

/// GET /profiles/{address}: 404 means the wallet has not set up a profile yet.
pub async fn get_profile(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = run_db(&state, move |db| db.get_profile(&address))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    let wallet = row.wallet_address.clone();
    let profile = profile_from_row(row).map_err(|e| {
        error!("Corrupt profile for {}: {}", wallet, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(profile))
}

/// PUT /profiles/{address}: full replace, owner only. The display name and
/// avatar are mirrored onto the user record.
pub async fn put_profile(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(mut profile): Json<Profile>,
) -> Result<impl IntoResponse, StatusCode> {
    if claims.wallet != address || profile.wallet_address != address {
        return Err(StatusCode::FORBIDDEN);
    }
    if let Err(e) = profile.validate() {
        warn!("Rejected profile for {}: {}", address, e);
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = chrono::Utc::now();
    profile.updated_at = Some(now);
    let row = profile_to_row(&profile, now).map_err(|e| {
        error!("Failed to encode profile for {}: {}", address, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let uid = claims.sub.to_string();
    let display_name = profile.display_name.clone();
    let avatar_url = profile.avatar_url.clone();
    let user_row = run_db(&state, move |db| {
        db.upsert_profile(&row)?;
        db.update_user(&uid, Some(&display_name), avatar_url.as_deref(), None)
    })
    .await?;

    info!("Profile saved for {}", address);
    if let Some(user) = user_row.and_then(|row| user_from_row(row).ok()) {
        state.dispatcher.broadcast(GatewayEvent::UserUpdate { user });
    }

    Ok(Json(profile))
}
