use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use archevault_db::Database;
use archevault_db::models::RoomRow;
use archevault_types::api::{Claims, CreateRoomRequest, InviteRequest};
use archevault_types::events::GatewayEvent;
use archevault_types::models::Room;
use archevault_types::validate::RoomName;

use crate::convert::{format_timestamp, message_from_row, parse_id, room_from_row, user_from_row};
use crate::{AppState, accessible_room, run_db};

/// Attaches members and the last message to each room row. Corrupt rows are
/// logged and skipped.
pub(crate) fn hydrate_rooms(db: &Database, rows: Vec<RoomRow>) -> anyhow::Result<Vec<Room>> {
    let room_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let mut members: HashMap<String, Vec<Uuid>> = HashMap::new();
    for m in db.get_members_for_rooms(&room_ids)? {
        match parse_id(&m.user_id) {
            Ok(uid) => members.entry(m.room_id).or_default().push(uid),
            Err(e) => warn!("Corrupt member of room '{}': {}", m.room_id, e),
        }
    }

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        let last = match db.get_last_message(&row.id)? {
            Some(msg_row) => {
                let reactions = db.get_reactions_for_messages(std::slice::from_ref(&msg_row.id))?;
                message_from_row(msg_row, &reactions).ok()
            }
            None => None,
        };
        let room_members = members.remove(&row.id).unwrap_or_default();
        let id = row.id.clone();
        match room_from_row(row, room_members, last) {
            Ok(room) => rooms.push(room),
            Err(e) => warn!("Skipping corrupt room '{}': {}", id, e),
        }
    }
    Ok(rooms)
}

async fn load_room(state: &AppState, room_id: Uuid) -> Result<Room, StatusCode> {
    let rid = room_id.to_string();
    run_db(state, move |db| {
        let rows: Vec<RoomRow> = db.get_room(&rid)?.into_iter().collect();
        hydrate_rooms(db, rows)
    })
    .await?
    .pop()
    .ok_or(StatusCode::NOT_FOUND)
}

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let uid = claims.sub.to_string();
    let rooms = run_db(&state, move |db| {
        let rows = db.list_rooms_for_user(&uid)?;
        hydrate_rooms(db, rows)
    })
    .await?;
    Ok(Json(rooms))
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = RoomName::parse(&req.name).map_err(|_| StatusCode::BAD_REQUEST)?;

    let room_id = Uuid::new_v4();
    let rid = room_id.to_string();
    let uid = claims.sub.to_string();
    let (is_private, is_voice) = (req.is_private, req.is_voice);
    run_db(&state, move |db| {
        db.create_room(
            &rid,
            name.as_str(),
            is_private,
            is_voice,
            &uid,
            &format_timestamp(chrono::Utc::now()),
        )
    })
    .await?;

    let room = load_room(&state, room_id).await?;
    info!("{} created room '{}' ({})", claims.wallet, room.name, room.id);

    if room.is_private {
        state
            .dispatcher
            .send_to_user(claims.sub, GatewayEvent::RoomCreate { room: room.clone() })
            .await;
    } else {
        state
            .dispatcher
            .broadcast(GatewayEvent::RoomCreate { room: room.clone() });
    }

    Ok((StatusCode::CREATED, Json(room)))
}

/// POST /rooms/{room_id}/join: public rooms only; private rooms need an invite.
pub async fn join_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let _ = accessible_room(&state, room_id, claims.sub).await?;

    let rid = room_id.to_string();
    let uid = claims.sub.to_string();
    let (added, user_row) = run_db(&state, move |db| {
        let added = db.add_member(&rid, &uid, &format_timestamp(chrono::Utc::now()))?;
        Ok((added, db.get_user_by_id(&uid)?))
    })
    .await?;

    let room = load_room(&state, room_id).await?;
    if added && let Some(user) = user_row.and_then(|row| user_from_row(row).ok()) {
        state
            .dispatcher
            .broadcast(GatewayEvent::MemberJoin { room_id, user });
    }

    Ok(Json(room))
}

pub async fn leave_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let rid = room_id.to_string();
    let uid = claims.sub.to_string();
    let removed = run_db(&state, move |db| db.remove_member(&rid, &uid)).await?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }

    let room = load_room(&state, room_id).await?;
    if !room.is_private {
        state
            .dispatcher
            .broadcast(GatewayEvent::RoomUpdate { room });
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /rooms/{room_id}/invite: any member may add another user.
pub async fn invite(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<InviteRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let rid = room_id.to_string();
    let inviter = claims.sub.to_string();
    let invitee = req.user_id.to_string();
    let outcome = run_db(&state, move |db| {
        if db.get_room(&rid)?.is_none() {
            return Ok(Err(StatusCode::NOT_FOUND));
        }
        if !db.is_member(&rid, &inviter)? {
            return Ok(Err(StatusCode::FORBIDDEN));
        }
        let Some(user_row) = db.get_user_by_id(&invitee)? else {
            return Ok(Err(StatusCode::NOT_FOUND));
        };
        let added = db.add_member(&rid, &invitee, &format_timestamp(chrono::Utc::now()))?;
        Ok(Ok((added, user_row)))
    })
    .await?;
    let (added, user_row) = outcome?;

    let room = load_room(&state, room_id).await?;
    if added {
        info!("{} invited {} to room {}", claims.wallet, req.user_id, room_id);
        state
            .dispatcher
            .send_to_user(req.user_id, GatewayEvent::RoomCreate { room: room.clone() })
            .await;
        if let Ok(user) = user_from_row(user_row) {
            state
                .dispatcher
                .broadcast(GatewayEvent::MemberJoin { room_id, user });
        }
    }

    Ok(Json(room))
}
