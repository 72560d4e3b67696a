//! Authentication types

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication state
///
/// Moves `Unauthenticated -> CodeSent -> Authenticated`; logout returns to
/// `Unauthenticated` from anywhere.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AuthState {
    /// Not logged in
    #[default]
    Unauthenticated,
    /// A one-time code was emailed and awaits verification
    CodeSent { email: String },
    /// Logged in with a token and identity
    Authenticated(AuthSession),
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated(session) => Some(&session.user),
            _ => None,
        }
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            AuthState::Authenticated(session) => Some(&session.token),
            _ => None,
        }
    }

    /// Address the pending code was sent to
    pub fn pending_email(&self) -> Option<&str> {
        match self {
            AuthState::CodeSent { email } => Some(email),
            _ => None,
        }
    }

    /// Short name for logs and the CLI
    pub fn label(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::CodeSent { .. } => "code_sent",
            AuthState::Authenticated(_) => "authenticated",
        }
    }
}

/// Token and identity, always held together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

/// Identity record for the signed-in user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Creation timestamp as sent by the backend (ISO 8601, zone optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<UserPlan>,
}

impl User {
    /// Whether the record is usable as a session identity
    pub fn is_valid(&self) -> bool {
        !self.email.trim().is_empty()
    }

    /// Nickname if set, otherwise the email address
    pub fn display_name(&self) -> &str {
        match self.nickname.as_deref() {
            Some(nick) if !nick.trim().is_empty() => nick,
            _ => &self.email,
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_timestamp)
    }
}

/// Usage plan attached to a user
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPlan {
    #[serde(rename = "type")]
    pub plan_type: PlanType,
    pub remaining_quota: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl UserPlan {
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.expires_at.as_deref().and_then(parse_timestamp)
    }

    /// Whether the plan has an expiry that lies in the past
    pub fn is_expired(&self) -> bool {
        self.expires_at_utc()
            .map(|at| Utc::now() >= at)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    Trial,
    Free,
    Subscription,
    PayPerUse,
    #[serde(other)]
    Unknown,
}

/// Acknowledgement of `POST /auth/send-code`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeDispatch {
    pub email: String,
    /// Code lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Only returned when the backend runs in debug mode
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Payload of `POST /auth/verify-code`
///
/// The backend names the token `access_token`; both spellings are accepted.
/// Refresh token and expiry fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyCodeResponse {
    #[serde(alias = "access_token")]
    pub token: String,
    pub user: User,
}

/// Payload of `GET /auth/status`
#[derive(Debug, Clone, Deserialize)]
pub struct AuthStatus {
    #[serde(default = "default_authenticated")]
    pub authenticated: bool,
}

fn default_authenticated() -> bool {
    true
}

/// Payload of `GET /auth/profile` (flat plan fields)
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub plan_type: Option<PlanType>,
    #[serde(default)]
    pub remaining_quota: Option<i64>,
    #[serde(default)]
    pub plan_expires_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

impl From<ProfileResponse> for User {
    fn from(profile: ProfileResponse) -> Self {
        let plan = profile.plan_type.map(|plan_type| UserPlan {
            plan_type,
            remaining_quota: profile.remaining_quota.unwrap_or(0),
            expires_at: profile.plan_expires_at,
        });

        User {
            id: profile.id,
            email: profile.email,
            nickname: profile.nickname.filter(|n| !n.trim().is_empty()),
            created_at: profile.created_at,
            plan,
        }
    }
}

/// Parse an RFC 3339 timestamp, or a naive one that is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
