/// Chat store behaviour against an in-memory backend and event source.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use archevault_client::backend::ChatBackend;
use archevault_client::error::{ClientError, Result};
use archevault_client::source::MemoryEventSource;
use archevault_client::{ChatAction, ChatStore};
use archevault_types::api::ToggleReactionResponse;
use archevault_types::events::GatewayEvent;
use archevault_types::models::{Message, PresenceStatus, Room, Thread, User};

#[derive(Default)]
struct FakeBackend {
    me: Uuid,
    rooms: Mutex<Vec<Room>>,
    messages: Mutex<HashMap<Uuid, Vec<Message>>>,
    fail_rooms: AtomicBool,
    /// Room whose history requests fail.
    fail_history: Mutex<Option<Uuid>>,
    /// Taken by the next `fetch_messages`, which reads its page, signals
    /// `entered` and waits for `release` before returning it.
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            me: Uuid::new_v4(),
            ..Default::default()
        }
    }

    fn add_room(&self, name: &str) -> Uuid {
        let room = room(name);
        let id = room.id;
        self.rooms.lock().unwrap().push(room);
        id
    }

    fn seed(&self, room_id: Uuid, content: &str) -> Message {
        let msg = message(room_id, Uuid::new_v4(), content);
        self.messages
            .lock()
            .unwrap()
            .entry(room_id)
            .or_default()
            .push(msg.clone());
        msg
    }
}

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

fn api_error() -> ClientError {
    ClientError::Api {
        status: 500,
        message: "backend down".into(),
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_rooms(&self) -> Result<Vec<Room>> {
        if self.fail_rooms.load(Ordering::SeqCst) {
            return Err(api_error());
        }
        Ok(self.rooms.lock().unwrap().clone())
    }

    async fn create_room(&self, name: &str, is_private: bool) -> Result<Room> {
        let mut created = room(name);
        created.is_private = is_private;
        created.members = vec![self.me];
        self.rooms.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn invite(&self, room_id: Uuid, user_id: Uuid) -> Result<Room> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms
            .iter_mut()
            .find(|r| r.id == room_id)
            .ok_or_else(api_error)?;
        room.add_member(user_id);
        Ok(room.clone())
    }

    async fn fetch_messages(
        &self,
        room_id: Uuid,
        limit: u32,
        _before: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        if *self.fail_history.lock().unwrap() == Some(room_id) {
            return Err(api_error());
        }
        let all = self
            .messages
            .lock()
            .unwrap()
            .get(&room_id)
            .cloned()
            .unwrap_or_default();
        let skip = all.len().saturating_sub(limit as usize);
        let page: Vec<Message> = all.into_iter().skip(skip).collect();

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        Ok(page)
    }

    async fn send_message(&self, room_id: Uuid, content: &str, thread_id: Option<Uuid>) -> Result<Message> {
        let mut msg = message(room_id, self.me, content);
        msg.thread_id = thread_id;
        self.messages
            .lock()
            .unwrap()
            .entry(room_id)
            .or_default()
            .push(msg.clone());
        Ok(msg)
    }

    async fn edit_message(&self, room_id: Uuid, message_id: Uuid, content: &str) -> Result<Message> {
        let mut messages = self.messages.lock().unwrap();
        let msg = messages
            .get_mut(&room_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(api_error)?;
        msg.content = content.into();
        msg.updated_at = Some(Utc::now());
        Ok(msg.clone())
    }

    async fn delete_message(&self, _room_id: Uuid, _message_id: Uuid) -> Result<()> {
        Ok(())
    }

    async fn pin_message(&self, room_id: Uuid, message_id: Uuid, pinned: bool) -> Result<Message> {
        let mut messages = self.messages.lock().unwrap();
        let msg = messages
            .get_mut(&room_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(api_error)?;
        msg.pinned = pinned;
        Ok(msg.clone())
    }

    async fn toggle_reaction(&self, room_id: Uuid, message_id: Uuid, emoji: &str) -> Result<ToggleReactionResponse> {
        let mut messages = self.messages.lock().unwrap();
        let msg = messages
            .get_mut(&room_id)
            .and_then(|list| list.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(api_error)?;
        let added = if msg.has_reacted(emoji, self.me) {
            msg.remove_reaction(emoji, self.me);
            false
        } else {
            msg.add_reaction(emoji, self.me);
            true
        };
        Ok(ToggleReactionResponse {
            added,
            reactions: msg.reactions.clone(),
        })
    }

    async fn fetch_thread(&self, room_id: Uuid, parent_id: Uuid) -> Result<Thread> {
        let mut thread = Thread::new(parent_id, room_id);
        thread.messages = self
            .messages
            .lock()
            .unwrap()
            .get(&room_id)
            .map(|list| {
                list.iter()
                    .filter(|m| m.thread_id == Some(parent_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(thread)
    }

    async fn set_presence(&self, status: PresenceStatus) -> Result<User> {
        Ok(User {
            id: self.me,
            display_name: "me".into(),
            avatar_url: None,
            status,
            roles: vec![],
            wallet_address: None,
            created_at: Utc::now(),
        })
    }
}

fn store_with(backend: FakeBackend) -> (Arc<ChatStore>, Arc<FakeBackend>, Arc<MemoryEventSource>) {
    let backend = Arc::new(backend);
    let source = Arc::new(MemoryEventSource::new());
    let store = Arc::new(ChatStore::new(backend.clone(), source.clone()));
    (store, backend, source)
}

/// Waits until the store applies an action matching `pred`.
async fn wait_for(rx: &mut broadcast::Receiver<ChatAction>, pred: impl Fn(&ChatAction) -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let action = rx.recv().await.unwrap();
            if pred(&action) {
                return;
            }
        }
    })
    .await
    .expect("action was never applied");
}

#[tokio::test]
async fn concurrent_joins_leave_one_subscription() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let (store, _, source) = store_with(backend);
    store.load_rooms().await.unwrap();

    let (a, b) = tokio::join!(store.join_room(r1), store.join_room(r1));
    a.unwrap();
    b.unwrap();

    assert_eq!(source.active_subscriptions(), 1);
    assert_eq!(store.subscribed_room().await, Some(r1));
    assert_eq!(store.snapshot().current_room, Some(r1));
}

#[tokio::test]
async fn switching_rooms_replaces_history_and_subscription() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let r2 = backend.add_room("alpha");
    backend.seed(r2, "welcome to alpha");
    let (store, _, source) = store_with(backend);
    store.load_rooms().await.unwrap();
    store.join_room(r1).await.unwrap();

    let mut actions = store.subscribe();
    let hello = message(r1, Uuid::new_v4(), "hello");
    source.publish(GatewayEvent::MessageCreate { message: hello.clone() });
    wait_for(&mut actions, |a| matches!(a, ChatAction::MessageNew(m) if m.id == hello.id)).await;
    assert_eq!(store.snapshot().messages, vec![hello.clone()]);

    store.join_room(r2).await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.current_room, Some(r2));
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.messages[0].content, "welcome to alpha");
    assert_eq!(source.active_topics(), vec![r2]);
    assert_eq!(state.room(r1).unwrap().last_message.as_ref().unwrap().id, hello.id);
}

#[tokio::test]
async fn superseded_join_never_subscribes() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let backend = FakeBackend::new();
    *backend.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
    let r1 = backend.add_room("general");
    let (store, _, source) = store_with(backend);

    let join = tokio::spawn({
        let store = store.clone();
        async move { store.join_room(r1).await }
    });
    entered.notified().await;

    store.leave_room().await;
    release.notify_one();
    join.await.unwrap().unwrap();

    assert_eq!(source.active_subscriptions(), 0);
    assert_eq!(store.subscribed_room().await, None);
    assert_eq!(store.snapshot().current_room, None);
}

#[tokio::test]
async fn message_posted_while_joining_is_not_lost() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let backend = FakeBackend::new();
    *backend.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
    let r1 = backend.add_room("general");
    let first = backend.seed(r1, "gm");
    let (store, backend, source) = store_with(backend);

    let join = tokio::spawn({
        let store = store.clone();
        async move { store.join_room(r1).await }
    });
    entered.notified().await;

    // Posted after the history page was read; no subscription exists yet to
    // push it.
    let late = backend.seed(r1, "right after join");
    assert_eq!(source.publish(GatewayEvent::MessageCreate { message: late.clone() }), 0);
    release.notify_one();
    join.await.unwrap().unwrap();

    let mut actions = store.subscribe();
    let marker = message(r1, Uuid::new_v4(), "later");
    assert_eq!(source.publish(GatewayEvent::MessageCreate { message: marker.clone() }), 1);
    wait_for(&mut actions, |a| matches!(a, ChatAction::MessageNew(m) if m.id == marker.id)).await;

    let state = store.snapshot();
    let ids: Vec<Uuid> = state.messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, late.id, marker.id]);
    assert_eq!(state.room(r1).unwrap().unread_count, 0);
}

#[tokio::test]
async fn failed_join_leaves_previous_room() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let r2 = backend.add_room("alpha");
    backend.seed(r1, "gm");
    *backend.fail_history.lock().unwrap() = Some(r2);
    let (store, _, source) = store_with(backend);
    store.load_rooms().await.unwrap();
    store.join_room(r1).await.unwrap();
    assert_eq!(store.snapshot().messages.len(), 1);

    let err = store.join_room(r2).await.unwrap_err();
    assert!(matches!(err, ClientError::Api { status: 500, .. }));

    let state = store.snapshot();
    assert_eq!(state.current_room, None);
    assert!(state.messages.is_empty());
    assert!(state.error.as_deref().unwrap().contains("backend down"));
    assert_eq!(store.subscribed_room().await, None);
    assert_eq!(source.active_subscriptions(), 0);
    assert!(matches!(
        store.send_message("still here?", None).await,
        Err(ClientError::NoCurrentRoom)
    ));

    // Recoverable: the next join works.
    store.join_room(r1).await.unwrap();
    assert_eq!(store.snapshot().current_room, Some(r1));
    assert_eq!(source.active_topics(), vec![r1]);
}

#[tokio::test]
async fn sent_message_appears_exactly_once() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let (store, _, source) = store_with(backend);
    store.load_rooms().await.unwrap();
    store.join_room(r1).await.unwrap();

    let mut actions = store.subscribe();
    let sent = store.send_message("gm", None).await.unwrap();
    // The server echoes it back over the realtime channel.
    source.publish(GatewayEvent::MessageCreate { message: sent.clone() });
    wait_for(&mut actions, |a| matches!(a, ChatAction::MessageNew(m) if m.id == sent.id)).await;
    wait_for(&mut actions, |a| matches!(a, ChatAction::MessageNew(m) if m.id == sent.id)).await;

    let state = store.snapshot();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.room(r1).unwrap().unread_count, 0);
}

#[tokio::test]
async fn reaction_echo_does_not_double_count() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let target = backend.seed(r1, "react to me");
    let (store, backend, source) = store_with(backend);
    store.join_room(r1).await.unwrap();

    assert!(store.react_to_message(target.id, "🔥").await.unwrap());
    let mut actions = store.subscribe();
    let other = Uuid::new_v4();
    for user_id in [backend.me, other] {
        source.publish(GatewayEvent::ReactionAdd {
            room_id: r1,
            message_id: target.id,
            user_id,
            emoji: "🔥".into(),
        });
    }
    wait_for(&mut actions, |a| {
        matches!(a, ChatAction::ReactionAdded { user_id, .. } if *user_id == other)
    })
    .await;

    let state = store.snapshot();
    let reactions = &state.message(target.id).unwrap().reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].count, 2);
    assert_eq!(reactions[0].user_ids, vec![backend.me, other]);

    // Toggling again removes only our own reaction.
    assert!(!store.react_to_message(target.id, "🔥").await.unwrap());
    let state = store.snapshot();
    let reactions = &state.message(target.id).unwrap().reactions;
    assert!(reactions.is_empty() || !reactions[0].user_ids.contains(&backend.me));
}

#[tokio::test]
async fn failed_room_load_keeps_rooms_and_sets_error() {
    let backend = FakeBackend::new();
    backend.add_room("general");
    let (store, backend, _) = store_with(backend);
    store.load_rooms().await.unwrap();

    backend.fail_rooms.store(true, Ordering::SeqCst);
    assert!(store.load_rooms().await.is_err());

    let state = store.snapshot();
    assert_eq!(state.rooms.len(), 1);
    assert!(state.error.as_deref().unwrap().contains("backend down"));

    store.clear_error();
    assert_eq!(store.snapshot().error, None);
}

#[tokio::test]
async fn reconnect_merges_missed_tail() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let first = backend.seed(r1, "before the drop");
    let (store, backend, source) = store_with(backend);
    store.join_room(r1).await.unwrap();

    // Posted while the channel was down; never pushed.
    let missed = backend.seed(r1, "during the drop");
    let mut actions = store.subscribe();
    source.reconnect();
    wait_for(&mut actions, |a| matches!(a, ChatAction::MessagesMerged(_))).await;

    let ids: Vec<Uuid> = store.snapshot().messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, missed.id]);
}

#[tokio::test]
async fn sending_without_a_room_is_an_error() {
    let (store, _, _) = store_with(FakeBackend::new());

    let err = store.send_message("gm", None).await.unwrap_err();

    assert!(matches!(err, ClientError::NoCurrentRoom));
    assert!(store.snapshot().error.is_some());
}

#[tokio::test]
async fn created_room_is_prepended() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let (store, _, _) = store_with(backend);
    store.load_rooms().await.unwrap();

    let created = store.create_room("  council  ", true).await.unwrap();

    assert_eq!(created.name, "council");
    let ids: Vec<Uuid> = store.snapshot().rooms.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![created.id, r1]);
}

#[tokio::test]
async fn leaving_drops_subscription_and_messages() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    backend.seed(r1, "gm");
    let (store, _, source) = store_with(backend);
    store.join_room(r1).await.unwrap();

    store.leave_room().await;

    assert_eq!(source.active_subscriptions(), 0);
    let state = store.snapshot();
    assert_eq!(state.current_room, None);
    assert!(state.messages.is_empty());
}

#[tokio::test]
async fn thread_load_and_reply() {
    let backend = FakeBackend::new();
    let r1 = backend.add_room("general");
    let parent = backend.seed(r1, "root");
    let (store, _, _) = store_with(backend);
    store.join_room(r1).await.unwrap();

    let mut actions = store.subscribe();
    store.send_message("first reply", Some(parent.id)).await.unwrap();
    assert!(matches!(
        actions.try_recv().unwrap(),
        ChatAction::ThreadCreated { parent_id, room_id } if parent_id == parent.id && room_id == r1
    ));
    store.load_thread(parent.id).await.unwrap();

    let state = store.snapshot();
    assert_eq!(state.messages.len(), 1);
    assert_eq!(state.threads[&parent.id].messages.len(), 1);
}
