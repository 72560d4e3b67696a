//! EquityCompass client library
//!
//! Session lifecycle and request pipeline for the EquityCompass stock
//! analysis service: passwordless sign-in, session persistence, bearer
//! token injection and centralized error handling.

pub mod api;
pub mod auth;
pub mod settings;

// Re-export commonly used items
pub use api::{ApiClient, ApiError, ErrorKind};
pub use auth::{AuthManager, AuthState, SessionEvent, SessionHandle, SessionStore, User};
pub use settings::{load_settings, save_settings, ClientSettings};
