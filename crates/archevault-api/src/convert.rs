//! Row -> model conversion. Every value read from SQLite passes through
//! here once; corrupt rows are reported instead of silently defaulted.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use archevault_db::models::{MessageRow, ProfileRow, ReactionRow, RoomRow, UserRow};
use archevault_types::models::{Message, Reaction, Room, User};
use archevault_types::profile::{HoldingsDisplay, Profile, Pylons};
use archevault_types::validate::ModelError;

/// Timestamps are stored as RFC 3339 with millisecond precision so that
/// lexical order in SQLite matches time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ModelError> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime() format: "YYYY-MM-DD HH:MM:SS" without timezone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|_| ModelError::InvalidTimestamp(raw.to_string()))
}

pub fn parse_id(raw: &str) -> Result<Uuid, ModelError> {
    raw.parse().map_err(|_| ModelError::InvalidId(raw.to_string()))
}

fn parse_opt_id(raw: Option<&String>) -> Result<Option<Uuid>, ModelError> {
    raw.map(|s| parse_id(s)).transpose()
}

pub fn user_from_row(row: UserRow) -> Result<User, ModelError> {
    Ok(User {
        id: parse_id(&row.id)?,
        status: row.status.parse()?,
        roles: row
            .roles
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect(),
        created_at: parse_timestamp(&row.created_at)?,
        display_name: row.display_name,
        avatar_url: row.avatar_url,
        wallet_address: row.wallet_address,
    })
}

pub fn room_from_row(
    row: RoomRow,
    members: Vec<Uuid>,
    last_message: Option<Message>,
) -> Result<Room, ModelError> {
    let mut room = Room {
        id: parse_id(&row.id)?,
        name: row.name,
        is_private: row.is_private,
        is_voice: row.is_voice,
        members,
        unread_count: 0,
        last_message: None,
        created_at: parse_timestamp(&row.created_at)?,
    };
    if let Some(message) = last_message {
        room.set_last_message(&message);
    }
    Ok(room)
}

pub fn message_from_row(row: MessageRow, reactions: &[ReactionRow]) -> Result<Message, ModelError> {
    let mut pairs = Vec::with_capacity(reactions.len());
    for r in reactions.iter().filter(|r| r.message_id == row.id) {
        pairs.push((r.emoji.clone(), parse_id(&r.user_id)?));
    }

    Ok(Message {
        id: parse_id(&row.id)?,
        room_id: parse_id(&row.room_id)?,
        author_id: parse_id(&row.author_id)?,
        parent_id: parse_opt_id(row.parent_id.as_ref())?,
        thread_id: parse_opt_id(row.thread_id.as_ref())?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: row.updated_at.as_deref().map(parse_timestamp).transpose()?,
        content: row.content,
        pinned: row.pinned,
        deleted: row.deleted,
        reactions: Reaction::aggregate(pairs),
    })
}

/// Converts a page of rows, dropping (and logging) corrupt ones.
pub fn messages_from_rows(rows: Vec<MessageRow>, reactions: &[ReactionRow]) -> Vec<Message> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match message_from_row(row, reactions) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!("Skipping corrupt message '{}': {}", id, e);
                    None
                }
            }
        })
        .collect()
}

pub fn profile_from_row(row: ProfileRow) -> Result<Profile, ModelError> {
    let badges: Vec<String> = serde_json::from_str(&row.badges)
        .map_err(|_| ModelError::Corrupt(format!("badges of {}", row.wallet_address)))?;
    let social_links: BTreeMap<String, String> = serde_json::from_str(&row.social_links)
        .map_err(|_| ModelError::Corrupt(format!("social links of {}", row.wallet_address)))?;
    let pylons: Pylons = serde_json::from_str(&row.pylons)
        .map_err(|_| ModelError::Corrupt(format!("pylons of {}", row.wallet_address)))?;

    Ok(Profile {
        updated_at: Some(parse_timestamp(&row.updated_at)?),
        wallet_address: row.wallet_address,
        display_name: row.display_name,
        bio: row.bio,
        avatar_url: row.avatar_url,
        theme: row.theme,
        badges,
        social_links,
        holdings: HoldingsDisplay {
            show_balance: row.show_balance,
            show_level: row.show_level,
        },
        pylons,
    })
}

pub fn profile_to_row(profile: &Profile, updated_at: DateTime<Utc>) -> anyhow::Result<ProfileRow> {
    Ok(ProfileRow {
        wallet_address: profile.wallet_address.clone(),
        display_name: profile.display_name.clone(),
        bio: profile.bio.clone(),
        avatar_url: profile.avatar_url.clone(),
        theme: profile.theme.clone(),
        badges: serde_json::to_string(&profile.badges)?,
        social_links: serde_json::to_string(&profile.social_links)?,
        show_balance: profile.holdings.show_balance,
        show_level: profile.holdings.show_level,
        pylons: serde_json::to_string(&profile.pylons)?,
        updated_at: format_timestamp(updated_at),
    })
}
