//! Chat state container.
//!
//! [`ChatStore`] owns the [`ChatState`], the single live room subscription
//! and the backend handles. All mutations go through [`reduce`]; every
//! applied action is rebroadcast to [`ChatStore::subscribe`] listeners.
//!
//! Room switches are serialized by a join lock and tagged with a generation.
//! A pump task or a join whose generation is no longer current drops its
//! results instead of applying them.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use archevault_types::models::{Message, PresenceStatus, Room, User};
use archevault_types::validate::{Emoji, MessageContent, RoomName};

use crate::backend::ChatBackend;
use crate::error::{ClientError, Result};
use crate::reducer::{ChatAction, ChatState, reduce};
use crate::source::{EventSource, SourceEvent, Subscription};

/// Messages fetched when entering a room.
pub const HISTORY_LIMIT: u32 = 50;

/// Messages re-fetched after the realtime channel reconnects.
pub const RECONNECT_TAIL_LIMIT: u32 = 50;

const ACTION_CHANNEL_CAPACITY: usize = 256;

struct Shared {
    state: Mutex<ChatState>,
    actions: broadcast::Sender<ChatAction>,
}

impl Shared {
    fn dispatch(&self, action: ChatAction) {
        match self.state.lock() {
            Ok(mut state) => reduce(&mut state, action.clone()),
            Err(poisoned) => reduce(&mut poisoned.into_inner(), action.clone()),
        }
        // No listeners is fine.
        let _ = self.actions.send(action);
    }

    fn snapshot(&self) -> ChatState {
        match self.state.lock() {
            Ok(state) => state.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

struct LiveSubscription {
    room_id: Uuid,
    pump: JoinHandle<()>,
}

pub struct ChatStore {
    backend: Arc<dyn ChatBackend>,
    source: Arc<dyn EventSource>,
    shared: Arc<Shared>,
    generation: Arc<AtomicU64>,
    join_lock: tokio::sync::Mutex<()>,
    live: tokio::sync::Mutex<Option<LiveSubscription>>,
}

impl ChatStore {
    pub fn new(backend: Arc<dyn ChatBackend>, source: Arc<dyn EventSource>) -> Self {
        let (actions, _) = broadcast::channel(ACTION_CHANNEL_CAPACITY);
        Self {
            backend,
            source,
            shared: Arc::new(Shared {
                state: Mutex::new(ChatState::default()),
                actions,
            }),
            generation: Arc::new(AtomicU64::new(0)),
            join_lock: tokio::sync::Mutex::new(()),
            live: tokio::sync::Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> ChatState {
        self.shared.snapshot()
    }

    /// Every action applied from now on, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatAction> {
        self.shared.actions.subscribe()
    }

    pub fn dispatch(&self, action: ChatAction) {
        self.shared.dispatch(action);
    }

    /// Room the live subscription is bound to, if any.
    pub async fn subscribed_room(&self) -> Option<Uuid> {
        self.live.lock().await.as_ref().map(|live| live.room_id)
    }

    pub fn clear_error(&self) {
        self.dispatch(ChatAction::ErrorCleared);
    }

    fn fail(&self, err: ClientError) -> ClientError {
        warn!("Chat operation failed: {}", err);
        self.dispatch(ChatAction::ErrorSet(err.to_string()));
        err
    }

    fn current_room(&self) -> Result<Uuid> {
        self.snapshot()
            .current_room
            .ok_or_else(|| self.fail(ClientError::NoCurrentRoom))
    }

    pub async fn load_rooms(&self) -> Result<()> {
        let rooms = self.backend.list_rooms().await.map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::RoomsLoaded(rooms));
        Ok(())
    }

    /// Switches to `room_id`: drops the old subscription, loads history,
    /// subscribes and selects the room. The subscription is confirmed before
    /// the source returns it; a catch-up fetch then merges anything posted
    /// between the history snapshot and that point.
    pub async fn join_room(&self, room_id: Uuid) -> Result<()> {
        let _guard = self.join_lock.lock().await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.teardown().await;

        let history = match self.backend.fetch_messages(room_id, HISTORY_LIMIT, None).await {
            Ok(history) => history,
            Err(e) => return Err(self.abandon_join(generation, e)),
        };
        if !self.is_current(generation) {
            debug!("Join of room {} superseded before subscribing", room_id);
            return Ok(());
        }

        let subscription = match self.source.subscribe(room_id).await {
            Ok(subscription) => subscription,
            Err(e) => return Err(self.abandon_join(generation, e)),
        };

        let catch_up = match self
            .backend
            .fetch_messages(room_id, RECONNECT_TAIL_LIMIT, None)
            .await
        {
            Ok(tail) => tail,
            Err(e) => {
                subscription.unsubscribe();
                return Err(self.abandon_join(generation, e));
            }
        };

        let mut live = self.live.lock().await;
        if !self.is_current(generation) {
            debug!("Join of room {} superseded, dropping subscription", room_id);
            subscription.unsubscribe();
            return Ok(());
        }
        // A leave may have raced the fetch; make sure nothing is left over.
        if let Some(stale) = live.take() {
            stop(stale).await;
        }

        self.dispatch(ChatAction::MessagesLoaded(history));
        self.dispatch(ChatAction::MessagesMerged(catch_up));
        // Select the room before pumping so buffered pushes land in it.
        self.dispatch(ChatAction::CurrentRoomSet(room_id));
        let pump = tokio::spawn(pump(
            subscription,
            generation,
            self.generation.clone(),
            self.shared.clone(),
            self.backend.clone(),
        ));
        *live = Some(LiveSubscription { room_id, pump });
        info!("Joined room {}", room_id);
        Ok(())
    }

    /// The previous subscription is gone by now; leave its room so the state
    /// does not point at a room nothing pushes into.
    fn abandon_join(&self, generation: u64, err: ClientError) -> ClientError {
        if self.is_current(generation) {
            self.dispatch(ChatAction::RoomLeft);
        }
        self.fail(err)
    }

    pub async fn leave_room(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.teardown().await;
        self.dispatch(ChatAction::RoomLeft);
    }

    /// Sends to the current room, or into `thread_id` when given. The message
    /// is shown once the server has stored it.
    pub async fn send_message(&self, content: &str, thread_id: Option<Uuid>) -> Result<Message> {
        let room_id = self.current_room()?;
        let content = MessageContent::parse(content).map_err(|e| self.fail(e.into()))?;
        let message = self
            .backend
            .send_message(room_id, content.as_str(), thread_id)
            .await
            .map_err(|e| self.fail(e))?;
        if let Some(parent_id) = thread_id {
            self.dispatch(ChatAction::ThreadCreated { parent_id, room_id });
        }
        self.dispatch(ChatAction::MessageNew(message.clone()));
        Ok(message)
    }

    pub async fn edit_message(&self, message_id: Uuid, content: &str) -> Result<Message> {
        let room_id = self.current_room()?;
        let content = MessageContent::parse(content).map_err(|e| self.fail(e.into()))?;
        let message = self
            .backend
            .edit_message(room_id, message_id, content.as_str())
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::MessageUpdated(message.clone()));
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: Uuid) -> Result<()> {
        let room_id = self.current_room()?;
        self.backend
            .delete_message(room_id, message_id)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::MessageDeleted {
            room_id,
            message_id,
            at: Utc::now(),
        });
        Ok(())
    }

    pub async fn pin_message(&self, message_id: Uuid, pinned: bool) -> Result<Message> {
        let room_id = self.current_room()?;
        let message = self
            .backend
            .pin_message(room_id, message_id, pinned)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::MessageUpdated(message.clone()));
        Ok(message)
    }

    /// Toggles the caller's reaction. The server's reaction list replaces the
    /// local one, so repeated pushes cannot double count.
    pub async fn react_to_message(&self, message_id: Uuid, emoji: &str) -> Result<bool> {
        let room_id = self.current_room()?;
        let emoji = Emoji::parse(emoji).map_err(|e| self.fail(e.into()))?;
        let toggled = self
            .backend
            .toggle_reaction(room_id, message_id, emoji.as_str())
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::ReactionsReplaced {
            message_id,
            reactions: toggled.reactions,
        });
        Ok(toggled.added)
    }

    pub async fn create_room(&self, name: &str, is_private: bool) -> Result<Room> {
        let name = RoomName::parse(name).map_err(|e| self.fail(e.into()))?;
        let room = self
            .backend
            .create_room(name.as_str(), is_private)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::RoomCreated(room.clone()));
        Ok(room)
    }

    pub async fn invite(&self, user_id: Uuid) -> Result<Room> {
        let room_id = self.current_room()?;
        let room = self
            .backend
            .invite(room_id, user_id)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::RoomUpdated(room.clone()));
        Ok(room)
    }

    pub async fn load_thread(&self, parent_id: Uuid) -> Result<()> {
        let room_id = self.current_room()?;
        let thread = self
            .backend
            .fetch_thread(room_id, parent_id)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::ThreadLoaded(thread));
        Ok(())
    }

    pub async fn set_presence(&self, status: PresenceStatus) -> Result<User> {
        let user = self
            .backend
            .set_presence(status)
            .await
            .map_err(|e| self.fail(e))?;
        self.dispatch(ChatAction::PresenceChanged {
            user_id: user.id,
            status,
        });
        self.dispatch(ChatAction::UserUpdated(user.clone()));
        Ok(user)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn teardown(&self) {
        let previous = self.live.lock().await.take();
        if let Some(previous) = previous {
            stop(previous).await;
        }
    }
}

/// Stops the pump and waits until its subscription is dropped.
async fn stop(live: LiveSubscription) {
    debug!("Releasing subscription for room {}", live.room_id);
    live.pump.abort();
    let _ = live.pump.await;
}

async fn pump(
    mut subscription: Subscription,
    generation: u64,
    latest: Arc<AtomicU64>,
    shared: Arc<Shared>,
    backend: Arc<dyn ChatBackend>,
) {
    let room_id = subscription.topic();
    while let Some(event) = subscription.recv().await {
        if latest.load(Ordering::SeqCst) != generation {
            break;
        }
        match event {
            SourceEvent::Event(event) => {
                if let Some(action) = ChatAction::from_event(event, Utc::now()) {
                    shared.dispatch(action);
                }
            }
            SourceEvent::Reconnected => {
                info!("Realtime channel back for room {}, refetching tail", room_id);
                match backend.fetch_messages(room_id, RECONNECT_TAIL_LIMIT, None).await {
                    Ok(tail) if latest.load(Ordering::SeqCst) == generation => {
                        shared.dispatch(ChatAction::MessagesMerged(tail));
                    }
                    Ok(_) => break,
                    Err(e) => {
                        warn!("Tail refetch for room {} failed: {}", room_id, e);
                        shared.dispatch(ChatAction::ErrorSet(e.to_string()));
                    }
                }
            }
        }
    }
    debug!("Pump for room {} finished", room_id);
}
