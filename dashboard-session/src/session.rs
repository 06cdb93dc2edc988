//! Session store: the single owner of "who is logged in".
//!
//! The store holds the installed full token, any restricted token issued for
//! a forced password change, and publishes [`Session`] snapshots through a
//! watch channel. It is the only writer of the durable token slot.

use crate::error::{Error, LoginFailure, Result};
use crate::token_store::TokenStorage;
use dashboard_api::{BearerToken, DashboardApi, IssuedToken, RestrictedToken, UserIdentity};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Startup restore has not finished yet.
    Restoring,
    /// No valid session.
    Anonymous,
    /// A full token is stored and the identity is known.
    Authenticated,
    /// A restricted token is held; the password must be changed first.
    PasswordChangeRequired,
}

/// Snapshot of the session published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: SessionStatus,
    pub user: Option<UserIdentity>,
}

impl Session {
    fn restoring() -> Self {
        Self {
            status: SessionStatus::Restoring,
            user: None,
        }
    }

    fn anonymous() -> Self {
        Self {
            status: SessionStatus::Anonymous,
            user: None,
        }
    }

    fn authenticated(user: UserIdentity) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            user: Some(user),
        }
    }

    fn password_change_required() -> Self {
        Self {
            status: SessionStatus::PasswordChangeRequired,
            user: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    /// True only for an authenticated admin.
    pub fn is_admin(&self) -> bool {
        self.is_authenticated() && self.user.as_ref().is_some_and(|u| u.is_admin)
    }
}

/// Successful result of [`SessionStore::login`].
#[derive(Debug, Clone, PartialEq)]
pub enum LoginOutcome {
    /// The full token was stored and the identity loaded.
    Authenticated(UserIdentity),
    /// The account must change its password. The restricted token is only
    /// good for [`SessionStore::change_password`].
    PasswordChangeRequired(RestrictedToken),
}

#[derive(Default)]
struct Credentials {
    full: Option<BearerToken>,
    restricted: Option<RestrictedToken>,
}

pub struct SessionStore {
    api: Arc<DashboardApi>,
    storage: Box<dyn TokenStorage>,
    credentials: Mutex<Credentials>,
    state: watch::Sender<Session>,
    restore_started: AtomicBool,
}

impl SessionStore {
    /// Create a store in the `Restoring` state. Call [`restore`](Self::restore)
    /// once before anything else.
    pub fn new(api: Arc<DashboardApi>, storage: impl TokenStorage + 'static) -> Self {
        let (state, _) = watch::channel(Session::restoring());
        Self {
            api,
            storage: Box::new(storage),
            credentials: Mutex::new(Credentials::default()),
            state,
            restore_started: AtomicBool::new(false),
        }
    }

    /// Subscribe to session snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Current session snapshot.
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.state.borrow().status
    }

    /// The restricted token held for a pending password change, if any.
    pub fn restricted_token(&self) -> Option<RestrictedToken> {
        self.credentials.lock().restricted.clone()
    }

    fn publish(&self, session: Session) {
        debug!("Session status -> {:?}", session.status);
        self.state.send_replace(session);
    }

    /// Drop every credential and publish an anonymous session.
    fn reset_to_anonymous(&self) {
        if let Err(e) = self.storage.clear() {
            error!("Failed to clear stored token: {}", e);
        }
        *self.credentials.lock() = Credentials::default();
        self.publish(Session::anonymous());
    }

    /// Restore the session from the stored token.
    ///
    /// Always resolves to a definite status; failures of any kind end in
    /// `Anonymous` with the stored token removed. Only the first call does
    /// anything.
    pub async fn restore(&self) -> SessionStatus {
        if self.restore_started.swap(true, Ordering::SeqCst) {
            warn!("Session restore already ran, ignoring");
            return self.status();
        }

        let token = match self.storage.load() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No stored token, starting anonymous");
                self.publish(Session::anonymous());
                return SessionStatus::Anonymous;
            }
            Err(e) => {
                warn!("Failed to read stored token: {}", e);
                self.reset_to_anonymous();
                return SessionStatus::Anonymous;
            }
        };

        self.credentials.lock().full = Some(token.clone());

        let result = self.api.me(&token).await;

        // A login or logout may have replaced the token while we waited
        if !self.is_installed(&token) {
            debug!("Session changed during restore, keeping the newer state");
            return self.status();
        }

        match result {
            Ok(user) => {
                info!("Restored session for {}", user.email);
                self.publish(Session::authenticated(user));
                SessionStatus::Authenticated
            }
            Err(e) => {
                warn!("Stored token rejected, clearing session: {}", e);
                self.reset_to_anonymous();
                SessionStatus::Anonymous
            }
        }
    }

    fn is_installed(&self, token: &BearerToken) -> bool {
        self.credentials.lock().full.as_ref() == Some(token)
    }

    /// Log in with an identifier and secret.
    ///
    /// A rejected login leaves the session untouched and returns a message
    /// suitable for display.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> std::result::Result<LoginOutcome, LoginFailure> {
        let response = match self.api.login(identifier, secret).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Login failed for {}: {}", identifier, e);
                return Err(LoginFailure::from_api_error(&e));
            }
        };

        match response.into_issued_token() {
            IssuedToken::Restricted(token) => {
                info!("Account {} must change its password", identifier);
                if let Err(e) = self.storage.clear() {
                    error!("Failed to clear stored token: {}", e);
                }
                {
                    let mut credentials = self.credentials.lock();
                    credentials.full = None;
                    credentials.restricted = Some(token.clone());
                }
                self.publish(Session::password_change_required());
                Ok(LoginOutcome::PasswordChangeRequired(token))
            }
            IssuedToken::Full(token) => {
                if let Err(e) = self.storage.save(&token) {
                    error!("Failed to store access token: {}", e);
                    return Err(LoginFailure::new("Could not save the session"));
                }

                let user = match self.api.me(&token).await {
                    Ok(user) => user,
                    Err(e) => {
                        warn!("Identity lookup after login failed: {}", e);
                        // Put storage back the way it was before this login
                        let previous = self.credentials.lock().full.clone();
                        let restored = match previous {
                            Some(previous) => self.storage.save(&previous),
                            None => self.storage.clear(),
                        };
                        if let Err(e) = restored {
                            error!("Failed to roll back stored token: {}", e);
                        }
                        return Err(LoginFailure::from_api_error(&e));
                    }
                };

                {
                    let mut credentials = self.credentials.lock();
                    credentials.full = Some(token);
                    credentials.restricted = None;
                }
                info!("Logged in as {}", user.email);
                self.publish(Session::authenticated(user.clone()));
                Ok(LoginOutcome::Authenticated(user))
            }
        }
    }

    /// Change the password of an account that was issued a restricted token.
    ///
    /// Does not change the session status. Log in again with the new
    /// password to get a full session.
    pub async fn change_password(
        &self,
        token: &RestrictedToken,
        old_password: &str,
        new_password: &str,
    ) -> bool {
        match self
            .api
            .change_password(token, old_password, new_password)
            .await
        {
            Ok(()) => {
                info!("Password changed");
                self.credentials.lock().restricted = None;
                true
            }
            Err(e) => {
                warn!("Password change rejected: {}", e);
                false
            }
        }
    }

    /// End the session.
    ///
    /// The server is notified on a best-effort basis; the local session is
    /// cleared whatever happens.
    pub async fn logout(&self) {
        let installed = self.credentials.lock().full.clone();
        let token = match installed {
            Some(token) => Some(token),
            None => self.storage.load().ok().flatten(),
        };

        if let Some(token) = token
            && let Err(e) = self.api.logout(&token).await
        {
            warn!("Logout notification failed (ignored): {}", e);
        }

        self.reset_to_anonymous();
        info!("Logged out");
    }

    /// Report that the full token was rejected by some other call.
    pub fn invalidate(&self) {
        if self.status() == SessionStatus::Authenticated {
            warn!("Credential rejected by API, ending session");
        }
        self.reset_to_anonymous();
    }

    /// Like [`invalidate`](Self::invalidate), but only while `token` is still
    /// the installed one. Rejections of a replaced token are ignored.
    pub fn invalidate_if_current(&self, token: &BearerToken) -> bool {
        {
            let mut credentials = self.credentials.lock();
            if credentials.full.as_ref() != Some(token) {
                debug!("Ignoring rejection of a token that is no longer installed");
                return false;
            }
            *credentials = Credentials::default();
        }
        warn!("Credential rejected by API, ending session");
        self.reset_to_anonymous();
        true
    }

    /// Run an authenticated API call with the installed full token.
    ///
    /// A 401/403 from the call ends the session, unless the token has been
    /// replaced in the meantime. Nothing is retried.
    pub async fn with_credential<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce(Arc<DashboardApi>, BearerToken) -> Fut,
        Fut: Future<Output = dashboard_api::Result<T>>,
    {
        let token = self
            .credentials
            .lock()
            .full
            .clone()
            .ok_or(Error::NotAuthenticated)?;

        match call(self.api.clone(), token.clone()).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_auth_error() {
                    self.invalidate_if_current(&token);
                }
                Err(e.into())
            }
        }
    }

    /// Re-fetch the identity for the installed token.
    pub async fn refresh_identity(&self) -> Result<UserIdentity> {
        let user = self
            .with_credential(|api, token| async move { api.me(&token).await })
            .await?;
        self.publish(Session::authenticated(user.clone()));
        Ok(user)
    }
}
