use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use archevault_types::api::{Claims, UpdateUserRequest};
use archevault_types::events::GatewayEvent;
use archevault_types::models::User;
use archevault_types::validate::{check_len, check_url};

use crate::convert::user_from_row;
use crate::{AppState, run_db};

const MAX_DISPLAY_NAME: usize = 32;

fn to_user(row: archevault_db::models::UserRow) -> Result<User, StatusCode> {
    let id = row.id.clone();
    user_from_row(row).map_err(|e| {
        error!("Corrupt user row '{}': {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let row = run_db(&state, move |db| db.get_user_by_id(&uid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_user(row)?))
}

/// GET /users/by-wallet/{address}: used by clients to revalidate a cached
/// session against the server's record.
pub async fn by_wallet(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let row = run_db(&state, move |db| db.get_user_by_wallet(&address))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(to_user(row)?))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Some(name) = &req.display_name
        && (name.trim().is_empty() || check_len("display name", name, MAX_DISPLAY_NAME).is_err())
    {
        return Err(StatusCode::BAD_REQUEST);
    }
    if let Some(url) = &req.avatar_url {
        check_url(url).map_err(|_| StatusCode::BAD_REQUEST)?;
    }

    let uid = claims.sub.to_string();
    let display_name = req.display_name.map(|n| n.trim().to_string());
    let avatar_url = req.avatar_url;
    let status = req.status.map(|s| s.as_str());
    let row = run_db(&state, move |db| {
        db.update_user(&uid, display_name.as_deref(), avatar_url.as_deref(), status)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;
    let user = to_user(row)?;

    if let Some(status) = req.status {
        state.dispatcher.set_presence(user.id, status).await;
    }
    state
        .dispatcher
        .broadcast(GatewayEvent::UserUpdate { user: user.clone() });

    Ok(Json(user))
}
