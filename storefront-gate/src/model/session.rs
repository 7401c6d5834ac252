//! Session cookies and session resolution
//!
//! The session lives in the browser as cookies written in the hosted backend's client format: a
//! JSON document holding the token pair, optionally base64url encoded behind a `base64-` prefix
//! and split into numbered chunk cookies when too large for a single cookie.

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use base64::prelude::*;
use chrono::{DateTime, TimeDelta, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::model::Model;
use crate::model::users::User;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot derive cookie name from backend url {0}")]
    NoProjectRef(Url),
    #[error("Session cookie is not valid base64")]
    InvalidEncoding,
    #[error("Session cookie is not a valid session")]
    InvalidSession,
}

/// Largest value stored in a single cookie, longer values are chunked
pub const MAX_CHUNK_SIZE: usize = 3180;

/// Marks base64url encoded cookie values
const BASE64_PREFIX: &str = "base64-";

/// How long the browser keeps session cookies
const COOKIE_MAX_AGE: CookieDuration = CookieDuration::days(400);

/// Token pair issued by the auth API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry as unix timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    /// Access token lifetime in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl StoredSession {
    /// Fills in `expires_at` from `expires_in` for sessions that came without it
    pub fn stamp(mut self, now: DateTime<Utc>) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = self.expires_in.map(|secs| now.timestamp() + secs);
        }
        self
    }

    /// Access token expiration time, if known
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Checks if the access token is expired or about to expire within `margin`
    ///
    /// Sessions of unknown expiry are never refreshed proactively, the auth API tells if they
    /// are stale.
    pub fn needs_refresh(&self, now: DateTime<Utc>, margin: TimeDelta) -> bool {
        self.expires_at()
            .is_some_and(|expires_at| expires_at <= now + margin)
    }
}

/// Reads and writes session cookies
#[derive(Debug, Clone)]
pub struct SessionCookies {
    name: String,
}

impl SessionCookies {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Cookie naming of the backend client, `sb-{project-ref}-auth-token`
    pub fn for_backend(url: &Url) -> Result<Self> {
        let project_ref = url
            .host_str()
            .and_then(|host| host.split('.').next())
            .filter(|project_ref| !project_ref.is_empty())
            .ok_or_else(|| Error::NoProjectRef(url.clone()))?;

        Ok(Self::new(format!("sb-{project_ref}-auth-token")))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn chunk_name(&self, idx: usize) -> String {
        format!("{}.{idx}", self.name)
    }

    /// Checks if the cookie is the session cookie or one of its chunks
    pub fn owns(&self, cookie: &str) -> bool {
        match cookie.strip_prefix(self.name.as_str()) {
            Some("") => true,
            Some(rest) => rest
                .strip_prefix('.')
                .is_some_and(|idx| !idx.is_empty() && idx.bytes().all(|b| b.is_ascii_digit())),
            None => false,
        }
    }

    /// Reads the stored session out of request cookies
    ///
    /// Returns `None` if there is no session cookie at all.
    pub fn read(&self, jar: &[Cookie<'_>]) -> Result<Option<StoredSession>> {
        let find = |name: &str| {
            jar.iter()
                .find(|cookie| cookie.name() == name)
                .map(|cookie| cookie.value())
        };

        let raw = match find(&self.name) {
            Some(value) => value.to_owned(),
            None => {
                let chunks: Vec<_> = (0..)
                    .map(|idx| find(&self.chunk_name(idx)))
                    .take_while(Option::is_some)
                    .flatten()
                    .collect();
                if chunks.is_empty() {
                    return Ok(None);
                }
                chunks.concat()
            }
        };

        let json = match raw.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => {
                let decoded = BASE64_URL_SAFE_NO_PAD
                    .decode(encoded.trim_end_matches('='))
                    .map_err(|_| Error::InvalidEncoding)?;
                String::from_utf8(decoded).map_err(|_| Error::InvalidEncoding)?
            }
            None => raw,
        };

        let session = serde_json::from_str(&json).map_err(|_| Error::InvalidSession)?;
        Ok(Some(session))
    }

    /// Builds cookies storing the session
    ///
    /// Any session cookies present in `jar` and not overwritten by the new ones are expired, so
    /// stale chunks never get concatenated with fresh ones.
    pub fn write(&self, session: &StoredSession, jar: &[Cookie<'_>]) -> Result<Vec<Cookie<'static>>> {
        let json = serde_json::to_string(session)?;
        let value = format!("{BASE64_PREFIX}{}", BASE64_URL_SAFE_NO_PAD.encode(json));

        let mut cookies: Vec<Cookie<'static>> = if value.len() <= MAX_CHUNK_SIZE {
            vec![self.cookie(self.name.clone(), value)]
        } else {
            // Value is plain ASCII, every byte offset is a char boundary
            value
                .as_bytes()
                .chunks(MAX_CHUNK_SIZE)
                .enumerate()
                .map(|(idx, chunk)| {
                    let chunk = String::from_utf8_lossy(chunk).into_owned();
                    self.cookie(self.chunk_name(idx), chunk)
                })
                .collect()
        };

        let stale: Vec<_> = jar
            .iter()
            .map(Cookie::name)
            .filter(|name| self.owns(name))
            .filter(|name| cookies.iter().all(|cookie| cookie.name() != *name))
            .map(|name| self.removal(name.to_owned()))
            .collect();
        cookies.extend(stale);

        Ok(cookies)
    }

    /// Builds cookies expiring every session cookie present in `jar`
    pub fn clear(&self, jar: &[Cookie<'_>]) -> Vec<Cookie<'static>> {
        jar.iter()
            .map(Cookie::name)
            .filter(|name| self.owns(name))
            .map(|name| self.removal(name.to_owned()))
            .collect()
    }

    fn cookie(&self, name: String, value: String) -> Cookie<'static> {
        Cookie::build(name, value)
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(COOKIE_MAX_AGE)
            .finish()
    }

    fn removal(&self, name: String) -> Cookie<'static> {
        Cookie::build(name, "")
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::ZERO)
            .finish()
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user: User,
    /// Access token the user was resolved with
    pub access_token: String,
}

/// Outcome of resolving the caller of a request
#[derive(Debug, Default)]
pub struct Resolution {
    /// Authenticated caller, `None` for anonymous
    pub identity: Option<Identity>,
    /// Cookies to set on the response
    pub cookies: Vec<Cookie<'static>>,
}

impl Resolution {
    fn anonymous(cookies: Vec<Cookie<'static>>) -> Self {
        Self {
            identity: None,
            cookies,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.identity.as_ref().map(|identity| &identity.user)
    }
}

/// Resolves the caller from request cookies
///
/// Stale sessions are refreshed first, and the refreshed session is scheduled to be written
/// back. Every failure resolves to an anonymous caller.
pub async fn resolve(model: &Model, jar: &[Cookie<'_>]) -> Resolution {
    let cookies = model.session_cookies();
    let stored = match cookies.read(jar) {
        Ok(Some(stored)) => stored,
        Ok(None) => return Resolution::default(),
        Err(err) => {
            warn!(?err, "Ignoring malformed session cookie");
            return Resolution::default();
        }
    };

    let margin = model.policy().refresh_margin();
    let mut written = vec![];
    let session = if stored.needs_refresh(Utc::now(), margin) {
        debug!(expires_at = ?stored.expires_at(), "Refreshing session");
        match model.backend().refresh(&stored.refresh_token).await {
            Ok(session) => {
                match cookies.write(&session, jar) {
                    Ok(new_cookies) => written = new_cookies,
                    Err(err) => warn!(?err, "Cannot store refreshed session"),
                }
                session
            }
            Err(err) => {
                warn!(?err, "Session refresh failed");
                return Resolution::default();
            }
        }
    } else {
        stored
    };

    match model.backend().user(&session.access_token).await {
        Ok(user) => Resolution {
            identity: Some(Identity {
                user,
                access_token: session.access_token,
            }),
            cookies: written,
        },
        Err(err) => {
            warn!(?err, "Session rejected");
            Resolution::anonymous(written)
        }
    }
}
