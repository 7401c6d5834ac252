//! Backend users

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype for user id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authenticated user as reported by the auth API
///
/// The auth API returns much more than that, but identity and contact email is all the gate
/// cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Backend user id, also the key of the user's profile row
    pub id: UserId,
    /// Login email, absent for phone or anonymous sign-ins
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
impl UserId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

#[cfg(test)]
impl User {
    pub fn new(id: UserId, email: impl Into<String>) -> Self {
        Self {
            id,
            email: Some(email.into()),
        }
    }
}
