use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use archevault_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};
use archevault_types::events::GatewayEvent;
use archevault_types::models::Reaction;
use archevault_types::validate::Emoji;

use crate::convert::parse_id;
use crate::messages::load_message;
use crate::{AppState, accessible_room, run_db};

/// Toggles the caller's reaction. The add-or-remove decision is made inside
/// one DB transaction, so a double click can never add twice.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let emoji = Emoji::parse(&req.emoji).map_err(|_| StatusCode::BAD_REQUEST)?;
    accessible_room(&state, room_id, claims.sub).await?;

    let message = load_message(&state, room_id, message_id).await?;
    if message.deleted {
        return Err(StatusCode::GONE);
    }

    let reaction_id = Uuid::new_v4().to_string();
    let mid = message_id.to_string();
    let uid = claims.sub.to_string();
    let emoji_str = emoji.as_str().to_string();
    let (added, rows) = run_db(&state, move |db| {
        db.toggle_reaction(&reaction_id, &mid, &uid, &emoji_str)
    })
    .await?;

    let reactions = Reaction::aggregate(
        rows.into_iter()
            .filter_map(|r| parse_id(&r.user_id).ok().map(|uid| (r.emoji, uid))),
    );

    let emoji = emoji.into_inner();
    if added {
        state.dispatcher.broadcast(GatewayEvent::ReactionAdd {
            room_id,
            message_id,
            user_id: claims.sub,
            emoji,
        });
    } else {
        state.dispatcher.broadcast(GatewayEvent::ReactionRemove {
            room_id,
            message_id,
            user_id: claims.sub,
            emoji,
        });
    }

    Ok(Json(ToggleReactionResponse { added, reactions }))
}
