//! HTTP pipeline for every EquityCompass API call
//!
//! Each request runs through explicit steps:
//! 1. `attach_auth` decorates the request with the session's bearer token
//! 2. `execute` sends it, turning transport failures into `NetworkUnreachable`
//! 3. `classify` unwraps the envelope into data or a normalized [`ApiError`]
//! 4. `handle_rejection` calls [`AuthHooks::on_rejected`] once per 401

use super::types::{ApiError, ClientBuildError, Envelope, ErrorBody};
use crate::settings::ClientSettings;
use log::{debug, error, warn};
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The pipeline's view of the session: read the token, trigger teardown on 401.
pub trait AuthHooks: Send + Sync {
    /// Bearer token to attach, if signed in
    fn bearer_token(&self) -> Option<String>;

    /// Called once for every 401 response
    fn on_rejected(&self);
}

/// Hooks for a pipeline with no session (every request goes out anonymous).
pub struct Anonymous;

impl AuthHooks for Anonymous {
    fn bearer_token(&self) -> Option<String> {
        None
    }

    fn on_rejected(&self) {}
}

/// Whether a request carries the session's credentials or an explicit one.
#[derive(Clone, Copy)]
enum Credentials<'a> {
    Session,
    Explicit(&'a str),
}

/// Authenticated HTTP client for the EquityCompass API
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    hooks: Arc<dyn AuthHooks>,
}

impl ApiClient {
    /// Create a client from settings; the base URL must parse.
    pub fn new(settings: &ClientSettings, hooks: Arc<dyn AuthHooks>) -> Result<Self, ClientBuildError> {
        let parsed = url::Url::parse(&settings.api_base_url).map_err(|source| {
            ClientBuildError::InvalidBaseUrl {
                url: settings.api_base_url.clone(),
                source,
            }
        })?;

        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        let base_url = parsed.as_str().trim_end_matches('/').to_string();
        debug!(
            "API client ready (base: {}, timeout: {}s)",
            base_url, settings.request_timeout_secs
        );

        Ok(Self {
            client,
            base_url,
            hooks,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an API path such as `/auth/status`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.send(Method::POST, path, Some(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::DELETE, path, None).await
    }

    /// Send a request with the session's credentials and decode the envelope's
    /// `data` into `T`. A missing `data` decodes as JSON `null`, so `()` and
    /// `Option<_>` targets accept acknowledgement-only responses.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let data = self
            .run(method, path, body, Credentials::Session)
            .await?;
        decode_data(data)
    }

    /// Send a request with an explicit token, bypassing the session.
    ///
    /// Used for notifications about a session that has already been torn
    /// down locally; a 401 here does not trigger [`AuthHooks::on_rejected`].
    pub async fn send_with_token<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: &str,
    ) -> Result<T, ApiError> {
        let data = self
            .run(method, path, body, Credentials::Explicit(token))
            .await?;
        decode_data(data)
    }

    async fn run(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        credentials: Credentials<'_>,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.endpoint(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let request = self.attach_auth(request, credentials);
        let response = execute(request).await.map_err(|e| {
            warn!("{} {} unreachable: {}", method, path, e);
            e
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            warn!("{} {} body read failed: {}", method, path, e);
            ApiError::network()
        })?;

        let result = classify(status, &bytes);
        if let Err(err) = &result {
            self.handle_rejection(err, credentials);
            error!(
                "{} {} failed: {} ({}, status {:?})",
                method,
                path,
                err.message(),
                err.code(),
                err.status()
            );
        }
        result
    }

    /// Step 1: decorate with `Authorization: Bearer <token>` when a token exists.
    fn attach_auth(&self, request: RequestBuilder, credentials: Credentials<'_>) -> RequestBuilder {
        let token = match credentials {
            Credentials::Session => self.hooks.bearer_token(),
            Credentials::Explicit(token) => Some(token.to_string()),
        };

        match token {
            Some(token) if !token.is_empty() => {
                request.header(AUTHORIZATION, format!("Bearer {}", token))
            }
            _ => request,
        }
    }

    /// Step 4: global teardown on 401, for session-credentialed requests only.
    fn handle_rejection(&self, err: &ApiError, credentials: Credentials<'_>) {
        if !matches!(err, ApiError::AuthenticationRejected { .. }) {
            return;
        }
        match credentials {
            Credentials::Session => {
                warn!("Request rejected with 401, clearing session");
                self.hooks.on_rejected();
            }
            Credentials::Explicit(_) => {
                debug!("401 on a detached request, session left untouched");
            }
        }
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::validation(format!("Invalid request body: {}", e)))
}

/// Step 2: send the request; no response at all means `NetworkUnreachable`.
async fn execute(request: RequestBuilder) -> Result<Response, ApiError> {
    request.send().await.map_err(|e| {
        if e.is_timeout() {
            debug!("Request timed out: {}", e);
        } else if e.is_connect() {
            debug!("Connection failed: {}", e);
        }
        ApiError::network()
    })
}

/// Step 3: map a received response onto success data or a normalized error.
pub(crate) fn classify(status: StatusCode, body: &[u8]) -> Result<Option<Value>, ApiError> {
    if status == StatusCode::UNAUTHORIZED {
        let fields = parse_error_body(body);
        return Err(ApiError::rejected(fields.message, fields.error));
    }

    if !status.is_success() {
        let fields = parse_error_body(body);
        return Err(ApiError::application(
            fields.message,
            fields.error,
            Some(status.as_u16()),
        ));
    }

    match parse_envelope(body) {
        None => Ok(None),
        Some(Err(e)) => Err(ApiError::invalid_response(e, Some(status.as_u16()))),
        Some(Ok(env)) if !env.success => Err(ApiError::application(
            env.message,
            env.error,
            Some(status.as_u16()),
        )),
        Some(Ok(env)) => Ok(env.data),
    }
}

/// `None` for an empty body, otherwise the parse result.
fn parse_envelope(body: &[u8]) -> Option<Result<Envelope<Value>, serde_json::Error>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(serde_json::from_slice(body))
}

/// Message and code of an error body; non-JSON bodies give neither.
fn parse_error_body(body: &[u8]) -> ErrorBody {
    serde_json::from_slice(body).unwrap_or_default()
}

fn decode_data<T: DeserializeOwned>(data: Option<Value>) -> Result<T, ApiError> {
    serde_json::from_value(data.unwrap_or(Value::Null))
        .map_err(|e| ApiError::invalid_response(e, None))
}
