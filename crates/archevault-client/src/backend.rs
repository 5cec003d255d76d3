use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use archevault_types::api::ToggleReactionResponse;
use archevault_types::models::{Message, PresenceStatus, Room, Thread, User};

use crate::error::Result;

/// Request/response side of the chat service. Pushed updates arrive through
/// an [`EventSource`](crate::source::EventSource) instead.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>>;

    async fn create_room(&self, name: &str, is_private: bool) -> Result<Room>;

    async fn invite(&self, room_id: Uuid, user_id: Uuid) -> Result<Room>;

    /// Newest `limit` top-level messages older than `before`, oldest first.
    async fn fetch_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>>;

    async fn send_message(
        &self,
        room_id: Uuid,
        content: &str,
        thread_id: Option<Uuid>,
    ) -> Result<Message>;

    async fn edit_message(&self, room_id: Uuid, message_id: Uuid, content: &str) -> Result<Message>;

    async fn delete_message(&self, room_id: Uuid, message_id: Uuid) -> Result<()>;

    async fn pin_message(&self, room_id: Uuid, message_id: Uuid, pinned: bool) -> Result<Message>;

    async fn toggle_reaction(
        &self,
        room_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ToggleReactionResponse>;

    async fn fetch_thread(&self, room_id: Uuid, parent_id: Uuid) -> Result<Thread>;

    async fn set_presence(&self, status: PresenceStatus) -> Result<User>;
}
