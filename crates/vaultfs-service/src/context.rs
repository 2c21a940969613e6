//! Request context carrying the acting principal and a cancellation signal.

use std::future::Future;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use vaultfs_core::error::AppError;
use vaultfs_core::result::AppResult;
use vaultfs_core::types::Actor;

/// Context for one inbound request or internal operation.
///
/// Services take it by reference so every call knows *who* is acting and
/// can stop waiting when the caller goes away.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Who is acting.
    pub actor: Actor,
    /// Fires when the caller disconnects or the operation is abandoned.
    pub cancel: CancellationToken,
    /// When the request was received.
    pub request_time: DateTime<Utc>,
}

impl RequestContext {
    /// Context for `actor` with a fresh cancellation token.
    pub fn new(actor: Actor) -> Self {
        Self {
            actor,
            cancel: CancellationToken::new(),
            request_time: Utc::now(),
        }
    }

    /// Context for a user request.
    pub fn user(user_id: Uuid) -> Self {
        Self::new(Actor::User(user_id))
    }

    /// Context for internal calls (jobs, signed-URL handlers) that bypass
    /// ownership checks.
    pub fn system() -> Self {
        Self::new(Actor::System)
    }

    /// Replace the cancellation token, typically with a child of the
    /// connection's token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The acting user, if any.
    pub fn user_id(&self) -> Option<Uuid> {
        self.actor.user_id()
    }

    /// Fail with `Forbidden` unless the actor may touch `owner_id`'s files.
    pub fn require_access(&self, owner_id: Uuid) -> AppResult<()> {
        if self.actor.can_access(owner_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("You do not have access to this file"))
        }
    }

    /// Run `fut` unless the context is cancelled first.
    pub async fn guard<F, T>(&self, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AppError::cancelled("Request was cancelled")),
            result = fut => result,
        }
    }
}
