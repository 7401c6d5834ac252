//! Hosted backend collaborator contract

use async_trait::async_trait;
use color_eyre::Result;
use thiserror::Error;

use crate::model::leads::Lead;
use crate::model::profiles::Profile;
use crate::model::session::StoredSession;
use crate::model::users::{User, UserId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Backend rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("More than one profile for user {0}")]
    DuplicateProfile(UserId),
}

/// Operations the gate needs from the hosted backend
///
/// All of them are plain request/response calls. Errors are reported as `color_eyre` reports;
/// a refusal by the backend is reported as `Error::Rejected` so callers can tell it apart from
/// transport failures.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the user owning an access token
    async fn user(&self, access_token: &str) -> Result<User>;

    /// Exchanges a refresh token for a new session
    async fn refresh(&self, refresh_token: &str) -> Result<StoredSession>;

    /// Fetches the profile row of an user, on behalf of the access token owner
    async fn profile(&self, access_token: &str, user_id: UserId) -> Result<Option<Profile>>;

    /// Exchanges email and password for a session
    async fn sign_in(&self, email: &str, password: &str) -> Result<StoredSession>;

    /// Revokes the session owning an access token
    async fn sign_out(&self, access_token: &str) -> Result<()>;

    /// Stores a buy request as an order row, on behalf of the caller if signed in
    async fn create_order(&self, access_token: Option<&str>, order: &Lead) -> Result<()>;
}
