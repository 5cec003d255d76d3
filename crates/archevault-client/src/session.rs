//! Who is signed in.
//!
//! [`SessionContext`] re-derives the current user whenever the connected
//! wallet changes:
//!
//! ```text
//! Unauthenticated --wallet connects--> Checking --cache ok + user found--> Authenticated
//!                                         |
//!                                         +--mismatch / stale / missing--> Unauthenticated
//! ```
//!
//! Each recomputation takes a generation number and only the latest one may
//! publish its result.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use archevault_types::models::User;

use crate::error::Result;

/// A cached verification stays usable for this long.
pub const SESSION_FRESHNESS_MINS: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub address: String,
    pub user: User,
    pub authenticated_at: DateTime<Utc>,
    pub token_balance: f64,
    pub token: String,
}

impl Session {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.authenticated_at;
        age >= Duration::zero() && age < Duration::minutes(SESSION_FRESHNESS_MINS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Checking,
    Authenticated(User),
}

impl SessionState {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            _ => None,
        }
    }
}

pub trait SessionCache: Send + Sync {
    fn load(&self) -> Result<Option<Session>>;
    fn store(&self, session: &Session) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Looks up the server's record for a wallet.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn user_by_wallet(&self, address: &str) -> Result<Option<User>>;
}

/// Session persisted as a JSON file.
pub struct FileSessionCache {
    path: PathBuf,
}

impl FileSessionCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SessionCache for FileSessionCache {
    fn load(&self) -> Result<Option<Session>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                // An unreadable cache is the same as no cache.
                warn!("Ignoring corrupt session cache {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    fn store(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(session)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionCache {
    session: Mutex<Option<Session>>,
}

impl SessionCache for MemorySessionCache {
    fn load(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().map(|s| s.clone()).unwrap_or_default())
    }

    fn store(&self, session: &Session) -> Result<()> {
        if let Ok(mut slot) = self.session.lock() {
            *slot = Some(session.clone());
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut slot) = self.session.lock() {
            *slot = None;
        }
        Ok(())
    }
}

pub struct SessionContext {
    cache: Arc<dyn SessionCache>,
    directory: Arc<dyn UserDirectory>,
    generation: Mutex<u64>,
    state: watch::Sender<SessionState>,
}

impl SessionContext {
    pub fn new(cache: Arc<dyn SessionCache>, directory: Arc<dyn UserDirectory>) -> Self {
        let (state, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            cache,
            directory,
            generation: Mutex::new(0),
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The cached session, if it belongs to the signed-in user.
    pub fn session(&self) -> Option<Session> {
        let user = self.state().user()?.clone();
        match self.cache.load() {
            Ok(Some(session)) if session.user.id == user.id => Some(session),
            _ => None,
        }
    }

    /// Re-derives the state for a newly connected (or disconnected) wallet
    /// and returns the state this call settled on.
    pub async fn on_wallet_change(&self, wallet: Option<&str>) -> SessionState {
        let generation = self.begin();

        let Some(address) = wallet else {
            // Keep the cache; a mismatch is purged on the next connect.
            self.publish(generation, SessionState::Unauthenticated);
            return SessionState::Unauthenticated;
        };
        self.publish(generation, SessionState::Checking);

        let cached = match self.cache.load() {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Failed to read session cache: {}", e);
                None
            }
        };

        let next = match cached {
            Some(session) if session.address == address && session.is_fresh(Utc::now()) => {
                match self.directory.user_by_wallet(address).await {
                    Ok(Some(user)) => SessionState::Authenticated(user),
                    Ok(None) => {
                        info!("No user record for {}, signing out", address);
                        SessionState::Unauthenticated
                    }
                    Err(e) => {
                        warn!("User lookup for {} failed: {}", address, e);
                        SessionState::Unauthenticated
                    }
                }
            }
            Some(_) => {
                debug!("Cached session does not match {} or is stale", address);
                SessionState::Unauthenticated
            }
            None => SessionState::Unauthenticated,
        };

        if !self.is_current(generation) {
            debug!("Discarding superseded session check for {}", address);
            return self.state();
        }
        if next == SessionState::Unauthenticated
            && let Err(e) = self.cache.clear()
        {
            warn!("Failed to purge session cache: {}", e);
        }
        self.publish(generation, next.clone());
        next
    }

    /// Records a freshly verified session.
    pub fn establish(&self, session: Session) -> Result<()> {
        let generation = self.begin();
        self.cache.store(&session)?;
        info!("Signed in as {}", session.address);
        self.publish(generation, SessionState::Authenticated(session.user));
        Ok(())
    }

    pub fn sign_out(&self) -> Result<()> {
        let generation = self.begin();
        self.cache.clear()?;
        self.publish(generation, SessionState::Unauthenticated);
        Ok(())
    }

    fn begin(&self) -> u64 {
        match self.generation.lock() {
            Ok(mut generation) => {
                *generation += 1;
                *generation
            }
            Err(poisoned) => {
                let mut generation = poisoned.into_inner();
                *generation += 1;
                *generation
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation
            .lock()
            .map(|g| *g == generation)
            .unwrap_or(false)
    }

    fn publish(&self, generation: u64, state: SessionState) -> bool {
        let Ok(latest) = self.generation.lock() else {
            return false;
        };
        if *latest != generation {
            return false;
        }
        self.state.send_replace(state);
        true
    }
}
