//! Authentication module for the EquityCompass client
//!
//! Passwordless sign-in against the EquityCompass API:
//! - Emailed one-time codes (send code, then verify)
//! - Session persistence across restarts
//! - Startup revalidation and 401-driven teardown

mod manager;
pub mod session;
pub mod storage;
pub mod types;

pub use manager::AuthManager;
pub use session::{SessionEvent, SessionHandle};
pub use storage::{FileBackend, MemoryBackend, SessionStore, StorageBackend, StorageError};
pub use types::*;
