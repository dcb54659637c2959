//! Local identity as handed to the engine by the host application.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crimson_shared::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("No active session")]
    NoSession,

    #[error("Auth backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn acquire_session(&self) -> Result<Session, AuthError>;
}

/// Fixed session, for tests and the loopback demo.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    session: Option<Session>,
}

impl StaticAuth {
    pub fn new(user_id: impl Into<String>, display_name: Option<&str>) -> Self {
        Self {
            session: Some(Session {
                user_id: UserId::new(user_id),
                display_name: display_name.map(str::to_string),
            }),
        }
    }

    /// Signed out; every acquire fails.
    pub fn signed_out() -> Self {
        Self { session: None }
    }
}

#[async_trait]
impl AuthService for StaticAuth {
    async fn acquire_session(&self) -> Result<Session, AuthError> {
        self.session.clone().ok_or(AuthError::NoSession)
    }
}
