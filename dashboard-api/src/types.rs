//! Wire types for the authentication endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Full bearer credential granting access to every protected endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new<S: ToString>(token: S) -> Self {
        Self(token.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Temporary credential issued to accounts that must change their password.
///
/// Only accepted by the password-change endpoint. There is deliberately no
/// conversion into [`BearerToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct RestrictedToken(String);

impl RestrictedToken {
    pub fn new<S: ToString>(token: S) -> Self {
        Self(token.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RestrictedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RestrictedToken(<redacted>)")
    }
}

/// Token handed out by a successful login, classified by what it may access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuedToken {
    Full(BearerToken),
    Restricted(RestrictedToken),
}

/// Response body of `POST /auth/login`.
#[derive(Deserialize)]
pub struct LoginResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub force_password_change: bool,
    #[serde(default)]
    pub is_admin: bool,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl LoginResponse {
    /// Consume the response, classifying the access token by the
    /// `force_password_change` flag.
    pub fn into_issued_token(self) -> IssuedToken {
        if self.force_password_change {
            IssuedToken::Restricted(RestrictedToken(self.access_token))
        } else {
            IssuedToken::Full(BearerToken(self.access_token))
        }
    }
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("force_password_change", &self.force_password_change)
            .field("is_admin", &self.is_admin)
            .finish()
    }
}

/// Identity record returned by `GET /auth/me`.
///
/// Fields beyond the ones listed are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub email: String,
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_is_active() -> bool {
    true
}

/// Body of `PATCH /auth/me/password`.
#[derive(Serialize)]
pub struct PasswordChange<'a> {
    pub old_password: &'a str,
    pub new_password: &'a str,
}
