//! Async client for the dashboard REST API's authentication endpoints.
//!
//! The client holds no credential state: every authenticated call takes the
//! token it should present, so the caller decides which credential is in
//! effect.

mod types;

pub use types::{BearerToken, IssuedToken, LoginResponse, PasswordChange, RestrictedToken, UserIdentity};

pub use reqwest::StatusCode;

use reqwest::{Client, IntoUrl, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Error within reqwest library
    #[error("Dashboard API request failed: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// Endpoint path could not be resolved against the base URL
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Error returned by server
    #[error("HTTP error from API: {status}")]
    HttpError {
        status: StatusCode,
        detail: Option<String>,
    },
}

impl Error {
    /// Returns true if the server rejected the presented credential.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            Error::HttpError { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }

    /// Returns true if the request never produced an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::ReqwestError(e) if !e.is_decode() && !e.is_status())
    }

    /// HTTP status returned by the server, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::ReqwestError(e) => e.status(),
            Error::InvalidUrl(_) => None,
        }
    }

    /// The `detail` message from the server's error body, when it was a string.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::HttpError { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Build an [`Error::HttpError`] from a non-success response.
async fn http_error(resp: Response) -> Error {
    let status = resp.status();
    // Validation errors carry a list here; only plain strings are displayable
    let detail = match resp.json::<ErrorBody>().await {
        Ok(body) => body
            .detail
            .and_then(|d| d.as_str().map(|s| s.to_string())),
        Err(_) => None,
    };
    Error::HttpError { status, detail }
}

pub struct DashboardApi {
    client: Client,
    base_url: Url,
}

impl DashboardApi {
    pub fn new<T: IntoUrl>(
        base_url: T,
        allow_invalid_tls: bool,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder().danger_accept_invalid_certs(allow_invalid_tls);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let mut base_url = base_url.into_url()?;
        // Url::join drops the last segment unless the path ends in a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, token: Option<&str>) -> Result<RequestBuilder> {
        let url = self.base_url.join(path)?;
        debug!("{method} {url}");
        let request_builder = self.client.request(method, url);
        Ok(match token {
            Some(token) => request_builder.bearer_auth(token),
            None => request_builder,
        })
    }

    /// `POST /auth/login` with form-encoded credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse> {
        let params = [("username", username), ("password", password)];
        let resp = self
            .request(Method::POST, "auth/login", None)?
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await?)
        } else {
            debug!("Login rejected for {username}: {status}");
            Err(http_error(resp).await)
        }
    }

    /// `GET /auth/me`: resolve the identity behind a full token.
    pub async fn me(&self, token: &BearerToken) -> Result<UserIdentity> {
        let resp = self
            .request(Method::GET, "auth/me", Some(token.as_str()))?
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.json().await?)
        } else {
            Err(http_error(resp).await)
        }
    }

    /// `POST /auth/logout`. The server only records the event; the response
    /// body is ignored.
    pub async fn logout(&self, token: &BearerToken) -> Result<()> {
        let resp = self
            .request(Method::POST, "auth/logout", Some(token.as_str()))?
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(http_error(resp).await)
        }
    }

    /// `PATCH /auth/me/password`, authenticated with a restricted token.
    pub async fn change_password(
        &self,
        token: &RestrictedToken,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let body = PasswordChange {
            old_password,
            new_password,
        };
        let resp = self
            .request(Method::PATCH, "auth/me/password", Some(token.as_str()))?
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let err = http_error(resp).await;
            error!("Failed to change password: {status}");
            Err(err)
        }
    }
}
