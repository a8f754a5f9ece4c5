//! In-memory presence and chat relay.
//!
//! [`StateStore`] owns the two collections: a presence registry whose entries
//! expire when heartbeats stop, and a chat log capped at a fixed number of
//! messages. [`Server`] exposes the store over HTTP.

pub mod clock;
pub mod config;
pub mod errors;
pub mod messages;
pub mod presence;
pub mod server;
pub mod store;
pub mod tls;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use errors::StoreError;
pub use messages::{ChatMessage, MessageLog, NewMessage};
pub use presence::{PresenceRecord, PresenceRegistry, PresenceUpdate};
pub use server::Server;
pub use store::{StateStore, StoreSettings, StoreStats};
