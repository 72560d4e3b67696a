//! Shared session context
//!
//! One [`SessionHandle`] owns the in-memory [`AuthState`] and its durable
//! mirror. Clones share the same state. Every change is published on a
//! `watch` channel; sign-in, sign-out and "go to login" are broadcast as
//! [`SessionEvent`]s for the view layer.
//!
//! Teardowns (logout, 401, failed revalidation) bump an epoch. Operations
//! take a [`Ticket`] before awaiting the network and may only commit if no
//! teardown happened in between.

use super::storage::SessionStore;
use super::types::{AuthSession, AuthState, User};
use crate::api::AuthHooks;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 16;

/// Notifications for the view layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn { user_id: i64 },
    SignedOut,
    /// The backend rejected the session; navigate to the login view
    LoginRequired,
}

/// Snapshot of the teardown epoch taken before a network call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

struct Slot {
    state: AuthState,
    epoch: u64,
}

struct Inner {
    slot: Mutex<Slot>,
    store: SessionStore,
    state_tx: watch::Sender<AuthState>,
    events_tx: broadcast::Sender<SessionEvent>,
}

#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    pub fn new(store: SessionStore) -> Self {
        let (state_tx, _) = watch::channel(AuthState::Unauthenticated);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    state: AuthState::Unauthenticated,
                    epoch: 0,
                }),
                store,
                state_tx,
                events_tx,
            }),
        }
    }

    pub fn state(&self) -> AuthState {
        self.inner.slot.lock().state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.slot.lock().state.is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.slot.lock().state.user().cloned()
    }

    pub fn token(&self) -> Option<String> {
        self.inner.slot.lock().state.token().map(str::to_string)
    }

    /// Receiver that always holds the latest state
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub(crate) fn ticket(&self) -> Ticket {
        Ticket(self.inner.slot.lock().epoch)
    }

    /// Adopt a session read back from storage (no write)
    pub(crate) fn restore(&self, session: AuthSession) {
        let mut slot = self.inner.slot.lock();
        slot.state = AuthState::Authenticated(session);
        self.publish(&slot);
    }

    /// Enter `CodeSent` unless a teardown or sign-in happened meanwhile
    pub(crate) fn mark_code_sent(&self, ticket: Ticket, email: &str) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.epoch != ticket.0 || slot.state.is_authenticated() {
            debug!("Discarding stale send-code response for {}", email);
            return false;
        }
        slot.state = AuthState::CodeSent {
            email: email.to_string(),
        };
        self.publish(&slot);
        true
    }

    /// Leave `CodeSent` without touching an authenticated session.
    ///
    /// Bumps the epoch so an in-flight verification cannot sign in afterwards.
    pub(crate) fn cancel_pending(&self) {
        let mut slot = self.inner.slot.lock();
        if matches!(slot.state, AuthState::CodeSent { .. }) {
            slot.state = AuthState::Unauthenticated;
            slot.epoch += 1;
            self.publish(&slot);
        }
    }

    /// Persist and enter `Authenticated`.
    ///
    /// Commits only if no teardown or cancel happened since `ticket` and the
    /// state is still `CodeSent(email)`, or a concurrent sign-in already
    /// committed (the later response replaces it).
    pub(crate) fn commit_login(&self, ticket: Ticket, email: &str, session: AuthSession) -> bool {
        let mut slot = self.inner.slot.lock();
        let expected = match &slot.state {
            AuthState::CodeSent { email: pending } => pending == email,
            AuthState::Authenticated(_) => true,
            AuthState::Unauthenticated => false,
        };
        if slot.epoch != ticket.0 || !expected {
            info!("Discarding stale sign-in response for {}", email);
            return false;
        }

        if let Err(e) = self.inner.store.save(&session.token, &session.user) {
            // Session stays valid in memory; it just will not survive a restart
            warn!("Failed to persist session: {}", e);
        }

        let user_id = session.user.id;
        slot.state = AuthState::Authenticated(session);
        self.publish(&slot);
        drop(slot);

        self.emit(SessionEvent::SignedIn { user_id });
        true
    }

    /// Swap in a re-fetched identity for the current session
    pub(crate) fn replace_user(&self, ticket: Ticket, user: User) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.epoch != ticket.0 {
            debug!("Discarding stale profile for {}", user.email);
            return false;
        }

        let session = match &slot.state {
            AuthState::Authenticated(current) => AuthSession {
                token: current.token.clone(),
                user,
            },
            _ => return false,
        };

        if let Err(e) = self.inner.store.save(&session.token, &session.user) {
            warn!("Failed to persist refreshed profile: {}", e);
        }
        slot.state = AuthState::Authenticated(session);
        self.publish(&slot);
        true
    }

    /// Clear storage and return to `Unauthenticated`.
    ///
    /// Returns the token of the session that was torn down, if any.
    pub(crate) fn sign_out(&self) -> Option<String> {
        let (previous, changed) = self.teardown();
        if changed {
            self.emit(SessionEvent::SignedOut);
        }
        previous
    }

    /// Teardown after the backend answered 401
    pub(crate) fn reject(&self) {
        let (_, changed) = self.teardown();
        if changed {
            self.emit(SessionEvent::SignedOut);
        }
        self.emit(SessionEvent::LoginRequired);
    }

    fn teardown(&self) -> (Option<String>, bool) {
        let mut slot = self.inner.slot.lock();
        if let Err(e) = self.inner.store.clear() {
            warn!("Failed to clear stored session: {}", e);
        }

        let previous = std::mem::take(&mut slot.state);
        slot.epoch += 1;
        let changed = previous != AuthState::Unauthenticated;
        if changed {
            self.publish(&slot);
        }

        let token = match previous {
            AuthState::Authenticated(session) => Some(session.token),
            _ => None,
        };
        (token, changed)
    }

    fn publish(&self, slot: &Slot) {
        debug!("Auth state -> {}", slot.state.label());
        self.inner.state_tx.send_replace(slot.state.clone());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events_tx.send(event);
    }
}

impl AuthHooks for SessionHandle {
    fn bearer_token(&self) -> Option<String> {
        self.token()
    }

    fn on_rejected(&self) {
        self.reject();
    }
}
