//! Client side of Archevault: the session context, the chat store and the
//! adapters that connect them to a server.

pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod http;
pub mod reducer;
pub mod session;
pub mod source;
pub mod store;

pub use backend::ChatBackend;
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use reducer::{ChatAction, ChatState, reduce};
pub use session::{SessionContext, SessionState};
pub use source::{EventSource, SourceEvent, Subscription};
pub use store::ChatStore;
