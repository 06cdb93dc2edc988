//! Gate for the protected section of the dashboard.

use crate::session::{Session, SessionStatus};
use tokio::sync::watch;

/// Entry point anonymous users are sent to.
pub const LOGIN_PATH: &str = "/login";

/// What the protected section should do for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Render the protected content.
    Render,
    /// Restore is still running; show a neutral placeholder.
    Placeholder,
    /// Navigate away. `replace` means the history entry is replaced
    /// rather than pushed.
    Redirect { to: &'static str, replace: bool },
}

impl GuardDecision {
    /// Decision for a given status.
    ///
    /// Holders of a restricted token are redirected too: the password change
    /// happens on the login surface.
    pub fn for_status(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Authenticated => GuardDecision::Render,
            SessionStatus::Restoring => GuardDecision::Placeholder,
            SessionStatus::Anonymous | SessionStatus::PasswordChangeRequired => {
                GuardDecision::Redirect {
                    to: LOGIN_PATH,
                    replace: true,
                }
            }
        }
    }
}

/// Reactive guard over session snapshots. Holds no state of its own.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    session: watch::Receiver<Session>,
}

impl RouteGuard {
    pub fn new(session: watch::Receiver<Session>) -> Self {
        Self { session }
    }

    /// Decision for the latest snapshot.
    pub fn decide(&self) -> GuardDecision {
        GuardDecision::for_status(self.session.borrow().status)
    }

    /// Wait for restore to finish, then decide.
    ///
    /// If the store goes away while still restoring, the placeholder stays.
    pub async fn resolve(&mut self) -> GuardDecision {
        let resolved = self
            .session
            .wait_for(|s| s.status != SessionStatus::Restoring)
            .await
            .map(|s| s.status);
        match resolved {
            Ok(status) => GuardDecision::for_status(status),
            Err(_) => self.decide(),
        }
    }

    /// Wait for the next session change and decide again.
    ///
    /// Returns `None` once the session store is dropped.
    pub async fn changed(&mut self) -> Option<GuardDecision> {
        self.session.changed().await.ok()?;
        Some(GuardDecision::for_status(
            self.session.borrow_and_update().status,
        ))
    }
}
