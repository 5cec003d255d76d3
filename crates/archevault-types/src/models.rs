use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::validate::ModelError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
    Away,
    Dnd,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
            Self::Dnd => "dnd",
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PresenceStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            "away" => Ok(Self::Away),
            "dnd" => Ok(Self::Dnd),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default)]
    pub roles: Vec<String>,
    pub wallet_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Display name given to a wallet user until they pick one: `AbCd..WxYz`.
pub fn short_wallet_name(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}..{}", head, tail)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub is_private: bool,
    #[serde(default)]
    pub is_voice: bool,
    /// Member user ids in join order.
    #[serde(default)]
    pub members: Vec<Uuid>,
    /// Maintained by the client; the server always reports 0.
    #[serde(default)]
    pub unread_count: u32,
    pub last_message: Option<Box<Message>>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// Points `last_message` at `message` if it belongs to this room.
    pub fn set_last_message(&mut self, message: &Message) -> bool {
        if message.room_id != self.id {
            return false;
        }
        self.last_message = Some(Box::new(message.clone()));
        true
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn add_member(&mut self, user_id: Uuid) -> bool {
        if self.is_member(user_id) {
            return false;
        }
        self.members.push(user_id);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Message this one replies to.
    pub parent_id: Option<Uuid>,
    /// Parent message of the thread this message lives in.
    pub thread_id: Option<Uuid>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn has_reacted(&self, emoji: &str, user_id: Uuid) -> bool {
        self.reactions
            .iter()
            .any(|r| r.emoji == emoji && r.user_ids.contains(&user_id))
    }

    /// Adds `user_id` to the bucket for `emoji`. Returns false if the user
    /// was already counted there.
    pub fn add_reaction(&mut self, emoji: &str, user_id: Uuid) -> bool {
        match self.reactions.iter_mut().find(|r| r.emoji == emoji) {
            Some(bucket) => bucket.insert(user_id),
            None => {
                self.reactions.push(Reaction {
                    emoji: emoji.to_string(),
                    count: 1,
                    user_ids: vec![user_id],
                });
                true
            }
        }
    }

    /// Removes `user_id` from the bucket for `emoji`, dropping empty buckets.
    pub fn remove_reaction(&mut self, emoji: &str, user_id: Uuid) -> bool {
        let Some(pos) = self.reactions.iter().position(|r| r.emoji == emoji) else {
            return false;
        };
        let removed = self.reactions[pos].remove(user_id);
        if self.reactions[pos].user_ids.is_empty() {
            self.reactions.remove(pos);
        }
        removed
    }

    /// Soft delete: the row stays, the content does not.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted = true;
        self.content.clear();
        self.reactions.clear();
        self.updated_at = Some(at);
    }
}

/// Emoji bucket on a message. `count` always equals `user_ids.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

impl Reaction {
    fn insert(&mut self, user_id: Uuid) -> bool {
        if self.user_ids.contains(&user_id) {
            return false;
        }
        self.user_ids.push(user_id);
        self.count = self.user_ids.len();
        true
    }

    fn remove(&mut self, user_id: Uuid) -> bool {
        let before = self.user_ids.len();
        self.user_ids.retain(|id| *id != user_id);
        self.count = self.user_ids.len();
        before != self.user_ids.len()
    }

    /// Groups `(emoji, user_id)` pairs into buckets in first-seen order,
    /// counting each user once per emoji.
    pub fn aggregate<I>(pairs: I) -> Vec<Reaction>
    where
        I: IntoIterator<Item = (String, Uuid)>,
    {
        let mut buckets: Vec<Reaction> = Vec::new();
        for (emoji, user_id) in pairs {
            match buckets.iter_mut().find(|r| r.emoji == emoji) {
                Some(bucket) => {
                    bucket.insert(user_id);
                }
                None => buckets.push(Reaction {
                    emoji,
                    count: 1,
                    user_ids: vec![user_id],
                }),
            }
        }
        buckets
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub parent_id: Uuid,
    pub room_id: Uuid,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub unread: bool,
}

impl Thread {
    pub fn new(parent_id: Uuid, room_id: Uuid) -> Self {
        Self {
            parent_id,
            room_id,
            messages: Vec::new(),
            unread: false,
        }
    }
}
