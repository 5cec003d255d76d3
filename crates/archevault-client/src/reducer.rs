//! Pure chat state transitions.
//!
//! Every change to [`ChatState`] goes through [`reduce`]. Actions are keyed by
//! entity id so the same pushed event can be applied twice without effect.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use archevault_types::events::GatewayEvent;
use archevault_types::models::{Message, PresenceStatus, Reaction, Room, Thread, User};

/// How long a typing signal stays visible.
pub const TYPING_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Newest first.
    pub rooms: Vec<Room>,
    pub current_room: Option<Uuid>,
    /// Top-level messages of the current room, oldest first.
    pub messages: Vec<Message>,
    /// Keyed by parent message id.
    pub threads: HashMap<Uuid, Thread>,
    pub users: HashMap<Uuid, User>,
    pub presence: HashMap<Uuid, PresenceStatus>,
    /// Last typing signal per (room, user).
    pub typing: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    pub error: Option<String>,
}

impl ChatState {
    pub fn room(&self, room_id: Uuid) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id).or_else(|| {
            self.threads
                .values()
                .flat_map(|t| t.messages.iter())
                .find(|m| m.id == message_id)
        })
    }

    pub fn presence_of(&self, user_id: Uuid) -> PresenceStatus {
        self.presence.get(&user_id).copied().unwrap_or_default()
    }

    /// Users whose typing signal in `room_id` is still live at `now`.
    pub fn typing_users(&self, room_id: Uuid, now: DateTime<Utc>) -> Vec<Uuid> {
        let ttl = Duration::seconds(TYPING_TTL_SECS);
        let mut users: Vec<Uuid> = self
            .typing
            .iter()
            .filter(|((room, _), at)| *room == room_id && now - **at < ttl)
            .map(|((_, user), _)| *user)
            .collect();
        users.sort();
        users
    }

    fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        if let Some(pos) = self.messages.iter().position(|m| m.id == message_id) {
            return self.messages.get_mut(pos);
        }
        self.threads
            .values_mut()
            .flat_map(|t| t.messages.iter_mut())
            .find(|m| m.id == message_id)
    }

    fn room_mut(&mut self, room_id: Uuid) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == room_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    RoomsLoaded(Vec<Room>),
    RoomCreated(Room),
    RoomUpdated(Room),
    RoomDeleted(Uuid),
    CurrentRoomSet(Uuid),
    RoomLeft,
    /// Replaces the current room's history.
    MessagesLoaded(Vec<Message>),
    /// Merges a history page by id, e.g. the tail fetched after a reconnect.
    MessagesMerged(Vec<Message>),
    MessageNew(Message),
    MessageUpdated(Message),
    MessageDeleted {
        room_id: Uuid,
        message_id: Uuid,
        at: DateTime<Utc>,
    },
    ReactionAdded {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },
    ReactionRemoved {
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
    },
    /// Authoritative reaction list from the server.
    ReactionsReplaced {
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },
    ThreadCreated {
        parent_id: Uuid,
        room_id: Uuid,
    },
    ThreadMessageAdded(Message),
    ThreadLoaded(Thread),
    UserJoined {
        room_id: Uuid,
        user: User,
    },
    UserUpdated(User),
    PresenceChanged {
        user_id: Uuid,
        status: PresenceStatus,
    },
    TypingStarted {
        room_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    },
    ErrorSet(String),
    ErrorCleared,
}

impl ChatAction {
    /// Maps a pushed gateway event onto the action it implies. `Ready` carries
    /// no state change.
    pub fn from_event(event: GatewayEvent, now: DateTime<Utc>) -> Option<Self> {
        let action = match event {
            GatewayEvent::Ready { .. } | GatewayEvent::Subscribed { .. } => return None,
            GatewayEvent::MessageCreate { message } => Self::MessageNew(message),
            GatewayEvent::MessageUpdate { message } => Self::MessageUpdated(message),
            GatewayEvent::MessageDelete {
                room_id,
                message_id,
            } => Self::MessageDeleted {
                room_id,
                message_id,
                at: now,
            },
            GatewayEvent::ReactionAdd {
                message_id,
                user_id,
                emoji,
                ..
            } => Self::ReactionAdded {
                message_id,
                user_id,
                emoji,
            },
            GatewayEvent::ReactionRemove {
                message_id,
                user_id,
                emoji,
                ..
            } => Self::ReactionRemoved {
                message_id,
                user_id,
                emoji,
            },
            GatewayEvent::RoomCreate { room } => Self::RoomCreated(room),
            GatewayEvent::RoomUpdate { room } => Self::RoomUpdated(room),
            GatewayEvent::MemberJoin { room_id, user } => Self::UserJoined { room_id, user },
            GatewayEvent::TypingStart { room_id, user_id } => Self::TypingStarted {
                room_id,
                user_id,
                at: now,
            },
            GatewayEvent::PresenceUpdate { user_id, status } => {
                Self::PresenceChanged { user_id, status }
            }
            GatewayEvent::UserUpdate { user } => Self::UserUpdated(user),
        };
        Some(action)
    }
}

pub fn reduce(state: &mut ChatState, action: ChatAction) {
    match action {
        ChatAction::RoomsLoaded(rooms) => {
            // Unread counters only exist on this side; carry them over.
            let unread: HashMap<Uuid, u32> = state
                .rooms
                .iter()
                .map(|r| (r.id, r.unread_count))
                .collect();
            state.rooms = rooms;
            for room in &mut state.rooms {
                if let Some(count) = unread.get(&room.id) {
                    room.unread_count = *count;
                }
            }
        }
        ChatAction::RoomCreated(room) => match state.room_mut(room.id) {
            Some(existing) => replace_room(existing, room),
            None => state.rooms.insert(0, room),
        },
        ChatAction::RoomUpdated(room) => {
            if let Some(existing) = state.room_mut(room.id) {
                replace_room(existing, room);
            }
        }
        ChatAction::RoomDeleted(room_id) => {
            state.rooms.retain(|r| r.id != room_id);
            state.threads.retain(|_, t| t.room_id != room_id);
            if state.current_room == Some(room_id) {
                state.current_room = None;
                state.messages.clear();
            }
        }
        ChatAction::CurrentRoomSet(room_id) => {
            state.current_room = Some(room_id);
            if let Some(room) = state.room_mut(room_id) {
                room.unread_count = 0;
            }
        }
        ChatAction::RoomLeft => {
            state.current_room = None;
            state.messages.clear();
        }
        ChatAction::MessagesLoaded(messages) => {
            state.messages = messages;
        }
        ChatAction::MessagesMerged(messages) => {
            for message in messages {
                match state.messages.iter_mut().find(|m| m.id == message.id) {
                    Some(existing) => *existing = message,
                    None => state.messages.push(message),
                }
            }
            state.messages.sort_by_key(|m| m.created_at);
        }
        ChatAction::MessageNew(message) => insert_message(state, message),
        ChatAction::MessageUpdated(message) => {
            if let Some(room) = state.room_mut(message.room_id)
                && room.last_message.as_ref().is_some_and(|m| m.id == message.id)
            {
                room.set_last_message(&message);
            }
            if let Some(existing) = state.message_mut(message.id) {
                *existing = message;
            }
        }
        ChatAction::MessageDeleted {
            room_id,
            message_id,
            at,
        } => {
            if let Some(existing) = state.message_mut(message_id) {
                existing.mark_deleted(at);
            }
            if let Some(room) = state.room_mut(room_id)
                && let Some(last) = room.last_message.as_mut()
                && last.id == message_id
            {
                last.mark_deleted(at);
            }
        }
        ChatAction::ReactionAdded {
            message_id,
            user_id,
            emoji,
        } => {
            if let Some(message) = state.message_mut(message_id) {
                message.add_reaction(&emoji, user_id);
            }
        }
        ChatAction::ReactionRemoved {
            message_id,
            user_id,
            emoji,
        } => {
            if let Some(message) = state.message_mut(message_id) {
                message.remove_reaction(&emoji, user_id);
            }
        }
        ChatAction::ReactionsReplaced {
            message_id,
            reactions,
        } => {
            if let Some(message) = state.message_mut(message_id) {
                message.reactions = reactions;
            }
        }
        ChatAction::ThreadCreated { parent_id, room_id } => {
            state
                .threads
                .entry(parent_id)
                .or_insert_with(|| Thread::new(parent_id, room_id));
        }
        ChatAction::ThreadMessageAdded(message) => {
            if message.thread_id.is_some() {
                insert_message(state, message);
            }
        }
        ChatAction::ThreadLoaded(thread) => {
            state.threads.insert(thread.parent_id, thread);
        }
        ChatAction::UserJoined { room_id, user } => {
            if let Some(room) = state.room_mut(room_id) {
                room.add_member(user.id);
            }
            state.users.insert(user.id, user);
        }
        ChatAction::UserUpdated(user) => {
            state.users.insert(user.id, user);
        }
        ChatAction::PresenceChanged { user_id, status } => {
            state.presence.insert(user_id, status);
            if let Some(user) = state.users.get_mut(&user_id) {
                user.status = status;
            }
        }
        ChatAction::TypingStarted {
            room_id,
            user_id,
            at,
        } => {
            state.typing.insert((room_id, user_id), at);
        }
        ChatAction::ErrorSet(message) => state.error = Some(message),
        ChatAction::ErrorCleared => state.error = None,
    }
}

/// Keeps the client-side unread counter across server updates.
fn replace_room(existing: &mut Room, mut room: Room) {
    room.unread_count = existing.unread_count;
    if room.last_message.is_none() {
        room.last_message = existing.last_message.take();
    }
    *existing = room;
}

fn insert_message(state: &mut ChatState, message: Message) {
    state.typing.remove(&(message.room_id, message.author_id));

    if let Some(parent_id) = message.thread_id {
        let thread = state
            .threads
            .entry(parent_id)
            .or_insert_with(|| Thread::new(parent_id, message.room_id));
        if !thread.messages.iter().any(|m| m.id == message.id) {
            thread.messages.push(message);
            thread.unread = true;
        }
        return;
    }

    let is_current = state.current_room == Some(message.room_id);
    if is_current {
        if state.messages.iter().any(|m| m.id == message.id) {
            return;
        }
    } else if state
        .room(message.room_id)
        .and_then(|r| r.last_message.as_ref())
        .is_some_and(|m| m.id == message.id)
    {
        // Already counted.
        return;
    }

    if let Some(room) = state.room_mut(message.room_id) {
        room.set_last_message(&message);
        if !is_current {
            room.unread_count += 1;
        }
    }
    if is_current {
        state.messages.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(name: &str) -> Room {
        Room {
            id: Uuid::new_v4(),
            name: name.into(),
            is_private: false,
            is_voice: false,
            members: vec![],
            unread_count: 0,
            last_message: None,
            created_at: Utc::now(),
        }
    }

    fn message(room_id: Uuid, author_id: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            room_id,
            author_id,
            content: content.into(),
            created_at: Utc::now(),
            updated_at: None,
            parent_id: None,
            thread_id: None,
            pinned: false,
            deleted: false,
            reactions: vec![],
        }
    }

    fn state_with(rooms: &[&Room], current: Option<Uuid>) -> ChatState {
        let mut state = ChatState::default();
        reduce(
            &mut state,
            ChatAction::RoomsLoaded(rooms.iter().map(|r| (*r).clone()).collect()),
        );
        if let Some(id) = current {
            reduce(&mut state, ChatAction::CurrentRoomSet(id));
        }
        state
    }

    #[test]
    fn message_new_is_idempotent() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let msg = message(r1.id, Uuid::new_v4(), "gm");

        reduce(&mut state, ChatAction::MessageNew(msg.clone()));
        reduce(&mut state, ChatAction::MessageNew(msg.clone()));

        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.room(r1.id).unwrap().last_message.as_ref().unwrap().id, msg.id);
        assert_eq!(state.room(r1.id).unwrap().unread_count, 0);
    }

    #[test]
    fn message_for_other_room_counts_unread_once() {
        let r1 = room("general");
        let r2 = room("alpha");
        let mut state = state_with(&[&r1, &r2], Some(r1.id));
        let msg = message(r2.id, Uuid::new_v4(), "hello");

        reduce(&mut state, ChatAction::MessageNew(msg.clone()));
        reduce(&mut state, ChatAction::MessageNew(msg.clone()));

        assert!(state.messages.is_empty());
        let r2_state = state.room(r2.id).unwrap();
        assert_eq!(r2_state.unread_count, 1);
        assert_eq!(r2_state.last_message.as_ref().unwrap().id, msg.id);
        assert!(state.room(r1.id).unwrap().last_message.is_none());
    }

    #[test]
    fn selecting_room_resets_unread() {
        let r1 = room("general");
        let r2 = room("alpha");
        let mut state = state_with(&[&r1, &r2], Some(r1.id));
        reduce(&mut state, ChatAction::MessageNew(message(r2.id, Uuid::new_v4(), "a")));
        reduce(&mut state, ChatAction::MessageNew(message(r2.id, Uuid::new_v4(), "b")));
        assert_eq!(state.room(r2.id).unwrap().unread_count, 2);

        reduce(&mut state, ChatAction::CurrentRoomSet(r2.id));
        assert_eq!(state.room(r2.id).unwrap().unread_count, 0);
    }

    #[test]
    fn rooms_reload_keeps_unread() {
        let r1 = room("general");
        let r2 = room("alpha");
        let mut state = state_with(&[&r1, &r2], Some(r1.id));
        reduce(&mut state, ChatAction::MessageNew(message(r2.id, Uuid::new_v4(), "a")));

        reduce(&mut state, ChatAction::RoomsLoaded(vec![r1.clone(), r2.clone()]));
        assert_eq!(state.room(r2.id).unwrap().unread_count, 1);
    }

    #[test]
    fn thread_messages_go_to_their_thread() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let parent = message(r1.id, Uuid::new_v4(), "root");
        reduce(&mut state, ChatAction::MessageNew(parent.clone()));

        let mut reply = message(r1.id, Uuid::new_v4(), "in thread");
        reply.thread_id = Some(parent.id);
        reduce(&mut state, ChatAction::MessageNew(reply.clone()));
        reduce(&mut state, ChatAction::ThreadMessageAdded(reply.clone()));

        assert_eq!(state.messages.len(), 1);
        let thread = &state.threads[&parent.id];
        assert_eq!(thread.messages.len(), 1);
        assert!(thread.unread);
        assert_eq!(state.room(r1.id).unwrap().last_message.as_ref().unwrap().id, parent.id);
    }

    #[test]
    fn thread_created_opens_once() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let parent = message(r1.id, Uuid::new_v4(), "root");

        reduce(&mut state, ChatAction::ThreadCreated { parent_id: parent.id, room_id: r1.id });
        let thread = &state.threads[&parent.id];
        assert_eq!(thread.room_id, r1.id);
        assert!(thread.messages.is_empty());

        let mut reply = message(r1.id, Uuid::new_v4(), "first");
        reply.thread_id = Some(parent.id);
        reduce(&mut state, ChatAction::ThreadMessageAdded(reply.clone()));
        reduce(&mut state, ChatAction::ThreadCreated { parent_id: parent.id, room_id: r1.id });

        assert_eq!(state.threads.len(), 1);
        assert_eq!(state.threads[&parent.id].messages, vec![reply]);
    }

    #[test]
    fn reactions_use_set_semantics() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let msg = message(r1.id, Uuid::new_v4(), "gm");
        reduce(&mut state, ChatAction::MessageNew(msg.clone()));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        for user_id in [alice, alice, bob] {
            reduce(
                &mut state,
                ChatAction::ReactionAdded {
                    message_id: msg.id,
                    user_id,
                    emoji: "🔥".into(),
                },
            );
        }
        let reactions = &state.message(msg.id).unwrap().reactions;
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].count, 2);
        assert_eq!(reactions[0].user_ids, vec![alice, bob]);

        for user_id in [alice, bob] {
            reduce(
                &mut state,
                ChatAction::ReactionRemoved {
                    message_id: msg.id,
                    user_id,
                    emoji: "🔥".into(),
                },
            );
        }
        assert!(state.message(msg.id).unwrap().reactions.is_empty());
    }

    #[test]
    fn merge_fills_gap_without_duplicates() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let author = Uuid::new_v4();
        let mut first = message(r1.id, author, "one");
        let mut missed = message(r1.id, author, "two");
        let mut last = message(r1.id, author, "three");
        let base = Utc::now();
        first.created_at = base;
        missed.created_at = base + Duration::seconds(1);
        last.created_at = base + Duration::seconds(2);

        reduce(&mut state, ChatAction::MessagesLoaded(vec![first.clone()]));
        reduce(&mut state, ChatAction::MessageNew(last.clone()));
        reduce(
            &mut state,
            ChatAction::MessagesMerged(vec![first.clone(), missed.clone(), last.clone()]),
        );

        let ids: Vec<Uuid> = state.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, missed.id, last.id]);
    }

    #[test]
    fn delete_blanks_message_and_last_message() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let msg = message(r1.id, Uuid::new_v4(), "oops");
        reduce(&mut state, ChatAction::MessageNew(msg.clone()));

        reduce(
            &mut state,
            ChatAction::MessageDeleted {
                room_id: r1.id,
                message_id: msg.id,
                at: Utc::now(),
            },
        );

        let stored = state.message(msg.id).unwrap();
        assert!(stored.deleted);
        assert!(stored.content.is_empty());
        assert!(state.room(r1.id).unwrap().last_message.as_ref().unwrap().deleted);
    }

    #[test]
    fn typing_expires_and_clears_on_message() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();

        reduce(&mut state, ChatAction::TypingStarted { room_id: r1.id, user_id: alice, at: now });
        reduce(&mut state, ChatAction::TypingStarted { room_id: r1.id, user_id: bob, at: now });
        assert_eq!(state.typing_users(r1.id, now).len(), 2);
        assert!(state.typing_users(r1.id, now + Duration::seconds(6)).is_empty());

        reduce(&mut state, ChatAction::MessageNew(message(r1.id, alice, "done typing")));
        assert_eq!(state.typing_users(r1.id, now), vec![bob]);
    }

    #[test]
    fn room_deleted_clears_current() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], Some(r1.id));
        reduce(&mut state, ChatAction::MessageNew(message(r1.id, Uuid::new_v4(), "gm")));

        reduce(&mut state, ChatAction::RoomDeleted(r1.id));

        assert!(state.rooms.is_empty());
        assert_eq!(state.current_room, None);
        assert!(state.messages.is_empty());
    }

    #[test]
    fn presence_last_event_wins() {
        let mut state = ChatState::default();
        let user_id = Uuid::new_v4();
        for status in [PresenceStatus::Online, PresenceStatus::Away] {
            reduce(&mut state, ChatAction::PresenceChanged { user_id, status });
        }
        assert_eq!(state.presence_of(user_id), PresenceStatus::Away);
        assert_eq!(state.presence_of(Uuid::new_v4()), PresenceStatus::Offline);
    }

    #[test]
    fn created_room_is_prepended() {
        let r1 = room("general");
        let mut state = state_with(&[&r1], None);
        let r2 = room("fresh");

        reduce(&mut state, ChatAction::RoomCreated(r2.clone()));
        reduce(&mut state, ChatAction::RoomCreated(r2.clone()));

        let ids: Vec<Uuid> = state.rooms.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![r2.id, r1.id]);
    }

    #[test]
    fn ready_maps_to_nothing() {
        let event = GatewayEvent::Ready {
            user_id: Uuid::new_v4(),
            wallet: "w".into(),
        };
        assert_eq!(ChatAction::from_event(event, Utc::now()), None);
    }
}
