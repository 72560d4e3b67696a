//! Authentication manager - passwordless login, startup revalidation, logout

use super::session::{SessionEvent, SessionHandle};
use super::storage::{FileBackend, SessionStore, StorageError};
use super::types::{
    AuthSession, AuthState, AuthStatus, CodeDispatch, ProfileResponse, User, VerifyCodeResponse,
};
use crate::api::{ApiClient, ApiError, ClientBuildError, Method};
use crate::settings::ClientSettings;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const SEND_CODE_PATH: &str = "/auth/send-code";
const VERIFY_CODE_PATH: &str = "/auth/verify-code";
const STATUS_PATH: &str = "/auth/status";
const LOGOUT_PATH: &str = "/auth/logout";
const PROFILE_PATH: &str = "/auth/profile";

const MAX_NICKNAME_CHARS: usize = 50;

/// Owns the session and drives every transition of [`AuthState`]
pub struct AuthManager {
    session: SessionHandle,
    client: ApiClient,
}

impl AuthManager {
    /// Build the manager and revalidate any stored session.
    ///
    /// Returns only once the stored session (if any) has been confirmed or
    /// discarded, so callers never observe a stale identity.
    pub async fn initialize(session: SessionHandle, client: ApiClient) -> Self {
        info!("========================================");
        info!("Initializing AuthManager...");
        let manager = Self { session, client };
        manager.revalidate().await;
        info!(
            "AuthManager ready with state: {}",
            manager.session.state().label()
        );
        manager
    }

    /// Wire up file storage and the API client from settings, then initialize.
    pub async fn from_settings(settings: &ClientSettings) -> Result<Self, ClientBuildError> {
        let dir = settings
            .resolved_data_dir()
            .ok_or(StorageError::NoDataDir)?;
        let store = SessionStore::new(FileBackend::new(dir)?);
        let session = SessionHandle::new(store);
        let client = ApiClient::new(settings, Arc::new(session.clone()))?;
        Ok(Self::initialize(session, client).await)
    }

    async fn revalidate(&self) {
        let (token, user) = match self.session.store().load() {
            Some(pair) => pair,
            None => {
                info!("No stored session found. User needs to log in.");
                return;
            }
        };

        info!("Found stored session for {} (user {})", user.email, user.id);
        self.session.restore(AuthSession { token, user });

        match self.client.get::<Option<AuthStatus>>(STATUS_PATH).await {
            Ok(status) if status.as_ref().map_or(true, |s| s.authenticated) => {
                info!("Stored session is still valid");
            }
            Ok(_) => {
                warn!("Backend reports the stored session as unauthenticated, clearing it");
                self.session.sign_out();
            }
            Err(e) => {
                warn!("Stored session failed revalidation ({}), clearing it", e);
                self.session.sign_out();
            }
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// The pipeline, for other API calls made on behalf of this session
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn state(&self) -> AuthState {
        self.session.state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn user(&self) -> Option<User> {
        self.session.user()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.session.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session.events()
    }

    /// Ask the backend to email a one-time code.
    ///
    /// On success the state becomes `CodeSent(email)`; on failure it is left as is.
    /// A response that arrives after a logout, 401 or sign-in is discarded and
    /// reported as a session change.
    pub async fn send_verification_code(&self, email: &str) -> Result<CodeDispatch, ApiError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ApiError::validation("Email address is required"));
        }
        if self.session.is_authenticated() {
            return Err(ApiError::validation("Already signed in, log out first"));
        }

        info!("Requesting verification code for {}", email);
        let ticket = self.session.ticket();
        let dispatch: Option<CodeDispatch> = self
            .client
            .post(SEND_CODE_PATH, &json!({ "email": email }))
            .await?;

        let dispatch = dispatch.unwrap_or_else(|| CodeDispatch {
            email: email.clone(),
            expires_in: None,
            code: None,
            message: None,
        });

        if !self.session.mark_code_sent(ticket, &email) {
            return Err(ApiError::session_changed());
        }
        info!(
            "Verification code sent to {} (expires in {:?}s)",
            email, dispatch.expires_in
        );
        Ok(dispatch)
    }

    /// Verify the emailed code and sign in.
    ///
    /// Requires a pending code for the same address. On failure the state
    /// stays `CodeSent` and the backend's message is returned as is.
    pub async fn login(&self, email: &str, code: &str) -> Result<User, ApiError> {
        let email = normalize_email(email);
        let code = code.trim();
        if email.is_empty() {
            return Err(ApiError::validation("Email address is required"));
        }
        if code.is_empty() {
            return Err(ApiError::validation("Verification code is required"));
        }

        match self.session.state() {
            AuthState::CodeSent { email: pending } if pending == email => {}
            AuthState::CodeSent { .. } => {
                return Err(ApiError::validation(
                    "The verification code was sent to a different address",
                ));
            }
            _ => {
                return Err(ApiError::validation(
                    "Request a verification code before signing in",
                ));
            }
        }

        info!("Verifying code for {}", email);
        let ticket = self.session.ticket();
        let response: VerifyCodeResponse = self
            .client
            .post(VERIFY_CODE_PATH, &json!({ "email": email, "code": code }))
            .await?;

        if response.token.is_empty() || !response.user.is_valid() {
            error!("Verify-code response is missing the token or user");
            return Err(ApiError::invalid_response("missing token or user", None));
        }

        let user = response.user.clone();
        let session = AuthSession {
            token: response.token,
            user: response.user,
        };
        if !self.session.commit_login(ticket, &email, session) {
            return Err(ApiError::session_changed());
        }

        info!("Sign in successful for {}", user.email);
        Ok(user)
    }

    /// Re-enter `CodeSent` for a code requested by an earlier process.
    ///
    /// Pending codes live only in memory; a command-line client that sends
    /// the code and verifies it in separate runs uses this before [`login`].
    ///
    /// [`login`]: AuthManager::login
    pub fn resume_pending_code(&self, email: &str) -> Result<(), ApiError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ApiError::validation("Email address is required"));
        }
        if self.session.is_authenticated() {
            return Err(ApiError::validation("Already signed in, log out first"));
        }
        if !self.session.mark_code_sent(self.session.ticket(), &email) {
            return Err(ApiError::session_changed());
        }
        debug!("Resumed pending code for {}", email);
        Ok(())
    }

    /// Abandon a pending code (the user navigated away from the login view)
    pub fn cancel_login(&self) {
        info!("Cancelling login");
        self.session.cancel_pending();
    }

    /// Clear the session, then notify the backend in the background.
    ///
    /// Local state is torn down before anything is sent; the notification's
    /// outcome is ignored. Returns the notification task so short-lived
    /// callers can wait for it before exiting.
    pub fn logout(&self) -> Option<JoinHandle<()>> {
        info!("Logging out");
        let token = self.session.sign_out()?;

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No async runtime, skipping logout notification");
                return None;
            }
        };

        let client = self.client.clone();
        Some(runtime.spawn(async move {
            match client
                .send_with_token::<Value>(Method::POST, LOGOUT_PATH, None, &token)
                .await
            {
                Ok(_) => debug!("Backend acknowledged logout"),
                Err(e) => debug!("Logout notification failed (ignored): {}", e),
            }
        }))
    }

    /// Re-fetch the identity from the backend and replace the cached one
    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        if !self.session.is_authenticated() {
            return Err(ApiError::validation("Not signed in"));
        }

        let ticket = self.session.ticket();
        let profile: ProfileResponse = self.client.get(PROFILE_PATH).await?;
        let user = User::from(profile);

        if self.session.replace_user(ticket, user.clone()) {
            info!("Profile refreshed for {}", user.email);
        }
        Ok(user)
    }

    /// Change the display name, then re-fetch the profile
    pub async fn update_nickname(&self, nickname: &str) -> Result<User, ApiError> {
        let nickname = nickname.trim();
        let length = nickname.chars().count();
        if length == 0 || length > MAX_NICKNAME_CHARS {
            return Err(ApiError::validation(format!(
                "Nickname must be between 1 and {} characters",
                MAX_NICKNAME_CHARS
            )));
        }
        if !self.session.is_authenticated() {
            return Err(ApiError::validation("Not signed in"));
        }

        let _: Value = self
            .client
            .put(PROFILE_PATH, &json!({ "nickname": nickname }))
            .await?;
        self.fetch_profile().await
    }
}

/// The backend trims and lowercases addresses; do the same before comparing.
fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
