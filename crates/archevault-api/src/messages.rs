use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::SubsecRound;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use archevault_db::models::MessageRow;
use archevault_types::api::{Claims, EditMessageRequest, PinMessageRequest, SendMessageRequest};
use archevault_types::events::GatewayEvent;
use archevault_types::models::{Message, Thread};
use archevault_types::validate::MessageContent;

use crate::convert::{format_timestamp, message_from_row, messages_from_rows};
use crate::{AppState, accessible_room, run_db};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: the `created_at` of the oldest message from
    /// the previous page.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

const MAX_PAGE: u32 = 200;

/// Loads a message with its reactions, 404 unless it lives in `room_id`.
pub(crate) async fn load_message(
    state: &AppState,
    room_id: Uuid,
    message_id: Uuid,
) -> Result<Message, StatusCode> {
    let mid = message_id.to_string();
    let (row, reactions) = run_db(state, move |db| {
        let row = db.get_message(&mid)?;
        let reactions = db.get_reactions_for_messages(std::slice::from_ref(&mid))?;
        Ok((row, reactions))
    })
    .await?;

    let row = row.ok_or(StatusCode::NOT_FOUND)?;
    let message = to_message(row, &reactions)?;
    if message.room_id != room_id {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(message)
}

fn to_message(
    row: MessageRow,
    reactions: &[archevault_db::models::ReactionRow],
) -> Result<Message, StatusCode> {
    let id = row.id.clone();
    message_from_row(row, reactions).map_err(|e| {
        error!("Corrupt message row '{}': {}", id, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    accessible_room(&state, room_id, claims.sub).await?;

    let rid = room_id.to_string();
    let limit = query.limit.clamp(1, MAX_PAGE);
    let before = query.before;
    let (rows, reaction_rows) = run_db(&state, move |db| {
        let rows = db.get_messages(&rid, limit, before.as_deref())?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reactions = db.get_reactions_for_messages(&ids)?;
        Ok((rows, reactions))
    })
    .await?;

    // Rows come newest first; clients want reading order.
    let mut messages = messages_from_rows(rows, &reaction_rows);
    messages.reverse();
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = MessageContent::parse(&req.content).map_err(|_| StatusCode::BAD_REQUEST)?;
    accessible_room(&state, room_id, claims.sub).await?;

    if let Some(thread_id) = req.thread_id {
        let parent = load_message(&state, room_id, thread_id)
            .await
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        // Threads hang off top-level messages only.
        if parent.thread_id.is_some() || parent.deleted {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    if let Some(parent_id) = req.parent_id {
        load_message(&state, room_id, parent_id)
            .await
            .map_err(|_| StatusCode::BAD_REQUEST)?;
    }

    // Stored with millisecond precision; keep the broadcast copy identical.
    let now = chrono::Utc::now().trunc_subsecs(3);
    let message = Message {
        id: Uuid::new_v4(),
        room_id,
        author_id: claims.sub,
        content: content.into_inner(),
        created_at: now,
        updated_at: None,
        parent_id: req.parent_id,
        thread_id: req.thread_id,
        pinned: false,
        deleted: false,
        reactions: vec![],
    };

    let row = MessageRow {
        id: message.id.to_string(),
        room_id: room_id.to_string(),
        author_id: claims.sub.to_string(),
        content: message.content.clone(),
        parent_id: message.parent_id.map(|id| id.to_string()),
        thread_id: message.thread_id.map(|id| id.to_string()),
        pinned: false,
        deleted: false,
        created_at: format_timestamp(now),
        updated_at: None,
    };
    run_db(&state, move |db| db.insert_message(&row)).await?;

    // Broadcast to every client subscribed to the room
    state.dispatcher.broadcast(GatewayEvent::MessageCreate {
        message: message.clone(),
    });

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let content = MessageContent::parse(&req.content).map_err(|_| StatusCode::BAD_REQUEST)?;
    accessible_room(&state, room_id, claims.sub).await?;

    let existing = load_message(&state, room_id, message_id).await?;
    if existing.author_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    if existing.deleted {
        return Err(StatusCode::GONE);
    }

    let mid = message_id.to_string();
    let updated_at = format_timestamp(chrono::Utc::now());
    run_db(&state, move |db| {
        db.update_message_content(&mid, content.as_str(), &updated_at)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    let message = load_message(&state, room_id, message_id).await?;
    state.dispatcher.broadcast(GatewayEvent::MessageUpdate {
        message: message.clone(),
    });
    Ok(Json(message))
}

/// DELETE: soft delete, author only. The row stays so replies keep their anchor.
pub async fn delete_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    accessible_room(&state, room_id, claims.sub).await?;

    let existing = load_message(&state, room_id, message_id).await?;
    if existing.author_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }

    let mid = message_id.to_string();
    let updated_at = format_timestamp(chrono::Utc::now());
    let changed = run_db(&state, move |db| db.soft_delete_message(&mid, &updated_at)).await?;
    if changed {
        state.dispatcher.broadcast(GatewayEvent::MessageDelete {
            room_id,
            message_id,
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn pin_message(
    State(state): State<AppState>,
    Path((room_id, message_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PinMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    accessible_room(&state, room_id, claims.sub).await?;
    load_message(&state, room_id, message_id).await?;

    let mid = message_id.to_string();
    let updated_at = format_timestamp(chrono::Utc::now());
    run_db(&state, move |db| db.set_pinned(&mid, req.pinned, &updated_at))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    let message = load_message(&state, room_id, message_id).await?;
    state.dispatcher.broadcast(GatewayEvent::MessageUpdate {
        message: message.clone(),
    });
    Ok(Json(message))
}

pub async fn get_thread(
    State(state): State<AppState>,
    Path((room_id, parent_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    accessible_room(&state, room_id, claims.sub).await?;
    load_message(&state, room_id, parent_id).await?;

    let pid = parent_id.to_string();
    let (rows, reaction_rows) = run_db(&state, move |db| {
        let rows = db.get_thread_messages(&pid)?;
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reactions = db.get_reactions_for_messages(&ids)?;
        Ok((rows, reactions))
    })
    .await?;

    let mut thread = Thread::new(parent_id, room_id);
    thread.messages = messages_from_rows(rows, &reaction_rows);
    Ok(Json(thread))
}
