//! Route classification and access decisions

use crate::config::Policy;
use crate::model::profiles::Role;
use crate::model::users::User;

/// Staff login page
pub const LOGIN_PATH: &str = "/admin-login";

/// Authentication endpoints and callbacks
pub const AUTH_PREFIX: &str = "/auth";

/// Back-office
pub const ADMIN_PREFIX: &str = "/admin";

/// Storefront home page
pub const HOME_PATH: &str = "/";

/// Request path in the two forms the gate works with
///
/// `decoded` is what routing decisions are made on: percent-decoded, with backslashes taken as
/// separators and empty segments collapsed, which is how the storefront ends up reading it.
/// `forwarded` is the same path still percent-encoded, safe to resolve against the upstream URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPath {
    decoded: String,
    forwarded: String,
}

impl RequestPath {
    /// Canonicalizes a raw request path
    ///
    /// Returns `None` for paths with `.` or `..` segments in any encoding and for paths that
    /// don't decode to UTF-8. Resolving such paths would reach a different route than the one
    /// checked.
    pub fn parse(raw: &str) -> Option<Self> {
        let decoded = urlencoding::decode(raw).ok()?;
        if segments(&decoded).any(|segment| segment == "." || segment == "..") {
            return None;
        }

        Some(Self {
            decoded: collapse(&decoded),
            forwarded: collapse(raw),
        })
    }

    pub fn decoded(&self) -> &str {
        &self.decoded
    }

    pub fn forwarded(&self) -> &str {
        &self.forwarded
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|segment| !segment.is_empty())
}

fn collapse(path: &str) -> String {
    let mut collapsed = String::with_capacity(path.len());
    for segment in segments(path) {
        collapsed.push('/');
        collapsed.push_str(segment);
    }

    if collapsed.is_empty() || path.ends_with(['/', '\\']) {
        collapsed.push('/');
    }
    collapsed
}

/// Access class of a requested path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Exactly the home page
    Home,
    /// Anything under the login page
    Login,
    /// Anything under the auth prefix
    AuthCallback,
    /// Back-office, requires the admin role
    Admin,
    /// Every other path, requires a session
    Other,
}

impl Route {
    /// Classifies a path by prefix
    ///
    /// Matching is plain string prefix matching, so eg. `/authors` classifies as
    /// `AuthCallback` and `/administration` as `Admin`. Login is checked before admin since
    /// the login path shares the admin prefix.
    pub fn classify(path: &str) -> Self {
        if path.starts_with(LOGIN_PATH) {
            Self::Login
        } else if path.starts_with(AUTH_PREFIX) {
            Self::AuthCallback
        } else if path == HOME_PATH {
            Self::Home
        } else if path.starts_with(ADMIN_PREFIX) {
            Self::Admin
        } else {
            Self::Other
        }
    }

    /// Checks if the route is reachable without a session
    pub fn is_exempt(self, policy: &Policy) -> bool {
        match self {
            Self::Login | Self::AuthCallback => true,
            Self::Home => policy.public_root,
            Self::Admin | Self::Other => false,
        }
    }

    /// Checks if the decision depends on the user's role
    pub fn needs_role(self) -> bool {
        self == Self::Admin
    }
}

/// Gate verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToLogin,
    RedirectHome,
}

impl Decision {
    /// Evaluates access rules, first matching wins
    ///
    /// `role` is only meaningful for `Route::Admin`, and `None` there means the role is unknown
    /// which is never enough for the back-office.
    pub fn evaluate(route: Route, policy: &Policy, user: Option<&User>, role: Option<Role>) -> Self {
        if route.is_exempt(policy) {
            return Self::Allow;
        }

        if user.is_none() {
            return Self::RedirectToLogin;
        }

        if route.needs_role() && !role.is_some_and(Role::is_admin) {
            return Self::RedirectHome;
        }

        Self::Allow
    }

    /// Redirect target, `None` when access is granted
    pub fn location(self) -> Option<&'static str> {
        match self {
            Self::Allow => None,
            Self::RedirectToLogin => Some(LOGIN_PATH),
            Self::RedirectHome => Some(HOME_PATH),
        }
    }
}
