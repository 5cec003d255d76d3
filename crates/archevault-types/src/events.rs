use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, PresenceStatus, Room, User};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, wallet: String },

    /// A message was posted (room or thread)
    MessageCreate { message: Message },

    /// A message was edited or (un)pinned
    MessageUpdate { message: Message },

    /// A message was soft-deleted
    MessageDelete { room_id: Uuid, message_id: Uuid },

    ReactionAdd {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    ReactionRemove {
        room_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },

    /// A room became visible to the receiver
    RoomCreate { room: Room },

    RoomUpdate { room: Room },

    /// A user joined (or was invited into) a room
    MemberJoin { room_id: Uuid, user: User },

    TypingStart { room_id: Uuid, user_id: Uuid },

    PresenceUpdate {
        user_id: Uuid,
        status: PresenceStatus,
    },

    UserUpdate { user: User },

    /// Sent only to the connection that issued `Subscribe`, once its
    /// room-scoped delivery covers `room_ids`.
    Subscribed { room_ids: Vec<Uuid> },
}

impl GatewayEvent {
    /// Returns the room id if this event is scoped to a specific room.
    /// Events that return `None` are global and delivered to every client.
    pub fn room_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } | Self::MessageUpdate { message } => {
                Some(message.room_id)
            }
            Self::MessageDelete { room_id, .. }
            | Self::ReactionAdd { room_id, .. }
            | Self::ReactionRemove { room_id, .. }
            | Self::MemberJoin { room_id, .. }
            | Self::TypingStart { room_id, .. } => Some(*room_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace the set of rooms whose scoped events this connection receives.
    Subscribe { room_ids: Vec<Uuid> },

    StartTyping { room_id: Uuid },

    SetPresence { status: PresenceStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_tagged() {
        let room_id = Uuid::nil();
        let json = serde_json::to_value(GatewayCommand::Subscribe {
            room_ids: vec![room_id],
        })
        .unwrap();
        assert_eq!(json["type"], "Subscribe");
        assert_eq!(json["data"]["room_ids"][0], room_id.to_string());
    }

    #[test]
    fn presence_is_global() {
        let event = GatewayEvent::PresenceUpdate {
            user_id: Uuid::new_v4(),
            status: PresenceStatus::Away,
        };
        assert_eq!(event.room_id(), None);

        let room_id = Uuid::new_v4();
        let typing = GatewayEvent::TypingStart {
            room_id,
            user_id: Uuid::new_v4(),
        };
        assert_eq!(typing.room_id(), Some(room_id));
    }
}
