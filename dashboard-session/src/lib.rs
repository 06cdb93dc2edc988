//! Session lifecycle for the dashboard client.
//!
//! This crate provides:
//! - The session store: restore, login, forced password change, logout
//! - Durable storage for the full bearer token
//! - The route guard that gates the protected section
//! - Sidebar navigation filtered by the session user

mod error;
pub mod guard;
pub mod navigation;
mod password;
mod session;
mod token_store;

pub use error::{Error, LoginFailure, Result};
pub use guard::{GuardDecision, LOGIN_PATH, RouteGuard};
pub use password::validate_new_password;
pub use session::{LoginOutcome, Session, SessionStatus, SessionStore};
pub use token_store::{FileTokenStore, MemoryTokenStore, TokenStorage};

pub use dashboard_api::{BearerToken, DashboardApi, RestrictedToken, UserIdentity};
