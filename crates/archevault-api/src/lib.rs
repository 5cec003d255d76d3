pub mod auth;
pub mod balance;
pub mod convert;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod reactions;
pub mod rooms;
pub mod users;
pub mod verifier;

use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, patch, post, put},
};
use tracing::error;
use uuid::Uuid;

use archevault_db::Database;
use archevault_db::models::RoomRow;
use archevault_gateway::dispatcher::Dispatcher;

use crate::verifier::WalletVerifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub verifier: WalletVerifier,
}

/// REST routes. The gateway route is mounted by the server binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/verify", post(auth::verify_wallet))
        .route(
            "/profiles/{address}",
            // Anyone may view a profile; only its owner may replace it.
            get(profiles::get_profile).merge(
                put(profiles::put_profile)
                    .route_layer(from_fn_with_state(state.clone(), middleware::require_auth)),
            ),
        );

    let protected_routes = Router::new()
        .route("/users/me", get(users::me).patch(users::update_me))
        .route("/users/by-wallet/{address}", get(users::by_wallet))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/{room_id}/join", post(rooms::join_room))
        .route("/rooms/{room_id}/leave", post(rooms::leave_room))
        .route("/rooms/{room_id}/invite", post(rooms::invite))
        .route(
            "/rooms/{room_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/rooms/{room_id}/messages/{message_id}",
            patch(messages::edit_message).delete(messages::delete_message),
        )
        .route("/rooms/{room_id}/messages/{message_id}/pin", post(messages::pin_message))
        .route(
            "/rooms/{room_id}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .route("/rooms/{room_id}/threads/{parent_id}", get(messages::get_thread))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

/// Run blocking DB work off the async runtime, mapping failures to 500.
pub(crate) async fn run_db<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// Loads a room the user may read: 404 if missing, 403 if private and the
/// user is not a member.
pub(crate) async fn accessible_room(
    state: &AppState,
    room_id: Uuid,
    user_id: Uuid,
) -> Result<RoomRow, StatusCode> {
    let rid = room_id.to_string();
    let uid = user_id.to_string();
    let (room, member) = run_db(state, move |db| {
        let room = db.get_room(&rid)?;
        let member = db.is_member(&rid, &uid)?;
        Ok((room, member))
    })
    .await?;

    let room = room.ok_or(StatusCode::NOT_FOUND)?;
    if room.is_private && !member {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(room)
}
