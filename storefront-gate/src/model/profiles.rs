//! User profiles and roles

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Policy;
use crate::model::backend::Backend;
use crate::model::users::UserId;

/// Authorization role stored on a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Self::Admin
    }

    /// Looks up the role of an user
    ///
    /// A missing profile row yields `policy.missing_profile_role`. Any failure of the lookup
    /// yields `None`, and so does a row with an empty role. None of these may ever grant admin
    /// access.
    pub async fn lookup(
        backend: &dyn Backend,
        policy: &Policy,
        access_token: &str,
        user_id: UserId,
    ) -> Option<Self> {
        match backend.profile(access_token, user_id).await {
            Ok(Some(profile)) => profile.role,
            Ok(None) => {
                debug!(%user_id, role = ?policy.missing_profile_role, "No profile, assuming default role");
                Some(policy.missing_profile_role)
            }
            Err(err) => {
                warn!(%user_id, ?err, "Profile lookup failed");
                None
            }
        }
    }
}

/// Profile row
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub role: Option<Role>,
}

#[cfg(test)]
impl Profile {
    pub fn with_role(role: Role) -> Self {
        Self { role: Some(role) }
    }
}
