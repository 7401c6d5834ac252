//! Hosted backend client
//!
//! Talks to the auth API (`/auth/v1`) and the table API (`/rest/v1`) of the hosted backend
//! project over HTTPS.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::Result;
use color_eyre::eyre::bail;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};
use url::Url;

use crate::config;
use crate::model::backend::{Backend, Error};
use crate::model::leads::Lead;
use crate::model::profiles::Profile;
use crate::model::session::StoredSession;
use crate::model::users::{User, UserId};

/// Error payload of either API, they don't agree on field names
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn message(self) -> Option<String> {
        self.msg
            .or(self.message)
            .or(self.error_description)
            .or(self.error)
    }
}

/// Hosted backend accessed with the project's public key
pub struct HostedBackend {
    client: Client,
    /// Project URL, always with a trailing slash
    url: Url,
    anon_key: String,
}

impl HostedBackend {
    pub fn with_config(config: &config::Backend) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let mut url = config.url.clone();
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        Ok(Self {
            client,
            url,
            anon_key: config.anon_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.url.join(path).map_err(Into::into)
    }

    /// Request carrying the public key, authorized as `bearer` if given
    fn request(&self, builder: RequestBuilder, bearer: Option<&str>) -> RequestBuilder {
        let bearer = bearer.unwrap_or(&self.anon_key);
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    /// Fails with `Error::Rejected` on non-success responses
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .unwrap_or_default()
            .message()
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown error").to_owned());

        bail!(Error::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn token(&self, grant_type: &str, body: serde_json::Value) -> Result<StoredSession> {
        let mut url = self.endpoint("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);

        let response = self
            .request(self.client.post(url), None)
            .json(&body)
            .send()
            .await?;

        let session: StoredSession = Self::check(response).await?.json().await?;
        Ok(session.stamp(Utc::now()))
    }
}

#[async_trait]
impl Backend for HostedBackend {
    #[instrument(skip_all)]
    async fn user(&self, access_token: &str) -> Result<User> {
        let url = self.endpoint("auth/v1/user")?;
        let response = self
            .request(self.client.get(url), Some(access_token))
            .send()
            .await?;

        let user: User = Self::check(response).await?.json().await?;
        debug!(user_id = %user.id, "Session user resolved");
        Ok(user)
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<StoredSession> {
        self.token("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    #[instrument(skip(self, access_token))]
    async fn profile(&self, access_token: &str, user_id: UserId) -> Result<Option<Profile>> {
        let mut url = self.endpoint("rest/v1/profiles")?;
        url.query_pairs_mut()
            .append_pair("select", "role")
            .append_pair("id", &format!("eq.{user_id}"));

        let response = self
            .request(self.client.get(url), Some(access_token))
            .header("accept", "application/json")
            .send()
            .await?;

        let mut profiles: Vec<Profile> = Self::check(response).await?.json().await?;
        if profiles.len() > 1 {
            bail!(Error::DuplicateProfile(user_id));
        }
        Ok(profiles.pop())
    }

    #[instrument(skip(self, password))]
    async fn sign_in(&self, email: &str, password: &str) -> Result<StoredSession> {
        self.token("password", json!({ "email": email, "password": password }))
            .await
    }

    #[instrument(skip_all)]
    async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = self.endpoint("auth/v1/logout")?;
        let response = self
            .request(self.client.post(url), Some(access_token))
            .send()
            .await?;

        // Already revoked tokens are as good as signed out
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND
        ) {
            return Ok(());
        }

        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(book_id = %order.book_id))]
    async fn create_order(&self, access_token: Option<&str>, order: &Lead) -> Result<()> {
        let url = self.endpoint("rest/v1/orders")?;
        let response = self
            .request(self.client.post(url), access_token)
            .header("prefer", "return=minimal")
            .json(order)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use warp::Filter;
    use warp::http::StatusCode as WarpStatus;

    use crate::model::profiles::Role;

    const ANON_KEY: &str = "anon-key";
    const TOKEN: &str = "user-access-token";
    const USER_ID: &str = "0b6a4b8e-6c0e-4f0c-9a43-0c8d2a4b1f10";

    /// Spawns the fake APIs on an ephemeral port returning its address
    fn serve_api() -> SocketAddr {
        let (addr, server) = warp::serve(api()).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn backend(addr: SocketAddr) -> HostedBackend {
        HostedBackend::with_config(&config::Backend {
            url: format!("http://{addr}").parse().unwrap(),
            anon_key: ANON_KEY.to_owned(),
            cookie_name: None,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn reply(status: WarpStatus, body: serde_json::Value) -> warp::reply::WithStatus<warp::reply::Json> {
        warp::reply::with_status(warp::reply::json(&body), status)
    }

    /// Fake auth and table APIs knowing a single user
    fn api() -> impl Filter<Extract = (warp::reply::WithStatus<warp::reply::Json>,), Error = warp::Rejection> + Clone {
        let user = warp::path!("auth" / "v1" / "user")
            .and(warp::get())
            .and(warp::header::<String>("apikey"))
            .and(warp::header::<String>("authorization"))
            .map(|apikey: String, auth: String| {
                if apikey == ANON_KEY && auth == format!("Bearer {TOKEN}") {
                    reply(
                        WarpStatus::OK,
                        json!({ "id": USER_ID, "email": "admin@bookstore.com", "aud": "authenticated" }),
                    )
                } else {
                    reply(
                        WarpStatus::UNAUTHORIZED,
                        json!({ "code": 401, "msg": "invalid JWT" }),
                    )
                }
            });

        let token = warp::path!("auth" / "v1" / "token")
            .and(warp::post())
            .and(warp::query::<std::collections::HashMap<String, String>>())
            .and(warp::body::json())
            .map(|query: std::collections::HashMap<String, String>, body: serde_json::Value| {
                let granted = match query.get("grant_type").map(String::as_str) {
                    Some("refresh_token") => body["refresh_token"] == "good-refresh",
                    Some("password") => body["email"] == "admin@bookstore.com" && body["password"] == "secret",
                    _ => false,
                };

                if granted {
                    reply(
                        WarpStatus::OK,
                        json!({
                            "access_token": TOKEN,
                            "refresh_token": "next-refresh",
                            "token_type": "bearer",
                            "expires_in": 3600,
                            "user": { "id": USER_ID, "email": "admin@bookstore.com" }
                        }),
                    )
                } else {
                    reply(
                        WarpStatus::BAD_REQUEST,
                        json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }),
                    )
                }
            });

        let profiles = warp::path!("rest" / "v1" / "profiles")
            .and(warp::get())
            .and(warp::query::<std::collections::HashMap<String, String>>())
            .map(|query: std::collections::HashMap<String, String>| {
                let rows = match query.get("id").map(String::as_str) {
                    Some(id) if id == format!("eq.{USER_ID}") => json!([{ "role": "admin" }]),
                    Some("eq.11111111-1111-1111-1111-111111111111") => {
                        json!([{ "role": "user" }, { "role": "admin" }])
                    }
                    _ => json!([]),
                };
                reply(WarpStatus::OK, rows)
            });

        let logout = warp::path!("auth" / "v1" / "logout")
            .and(warp::post())
            .map(|| reply(WarpStatus::NO_CONTENT, json!(null)));

        // Anyone may place an order, as long as the row is complete
        let orders = warp::path!("rest" / "v1" / "orders")
            .and(warp::post())
            .and(warp::header::<String>("authorization"))
            .and(warp::header::<String>("prefer"))
            .and(warp::body::json())
            .map(|auth: String, prefer: String, row: serde_json::Value| {
                let known = auth == format!("Bearer {ANON_KEY}") || auth == format!("Bearer {TOKEN}");
                let complete = ["book_id", "book_title", "full_name", "phone"]
                    .iter()
                    .all(|field| row[field].is_string());

                if !known {
                    reply(
                        WarpStatus::UNAUTHORIZED,
                        json!({ "message": "new row violates row-level security policy for table \"orders\"" }),
                    )
                } else if !complete || prefer != "return=minimal" {
                    reply(WarpStatus::BAD_REQUEST, json!({ "message": "bad row" }))
                } else {
                    reply(WarpStatus::CREATED, json!(null))
                }
            });

        user.or(token)
            .unify()
            .or(profiles)
            .unify()
            .or(logout)
            .unify()
            .or(orders)
            .unify()
    }

    #[tokio::test]
    async fn resolve_user() {
        let backend = backend(serve_api());

        let user = backend.user(TOKEN).await.unwrap();
        assert_eq!(user.id, USER_ID.parse().unwrap());
        assert_eq!(user.email.as_deref(), Some("admin@bookstore.com"));
    }

    #[tokio::test]
    async fn rejected_token() {
        let backend = backend(serve_api());

        let err = backend.user("forged").await.unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Rejected { status, message }) => {
                assert_eq!(*status, 401);
                assert_eq!(message, "invalid JWT");
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend() {
        // Nothing listens on the discard port
        let backend = backend(([127, 0, 0, 1], 9).into());
        let _ = backend.user(TOKEN).await.unwrap_err();
    }

    #[tokio::test]
    async fn refresh_session() {
        let backend = backend(serve_api());

        let before = Utc::now().timestamp();
        let session = backend.refresh("good-refresh").await.unwrap();
        assert_eq!(session.access_token, TOKEN);
        assert_eq!(session.refresh_token, "next-refresh");
        assert!(session.expires_at.unwrap() >= before + 3600);

        let _ = backend.refresh("stale-refresh").await.unwrap_err();
    }

    #[tokio::test]
    async fn sign_in_with_password() {
        let backend = backend(serve_api());

        let session = backend.sign_in("admin@bookstore.com", "secret").await.unwrap();
        assert_eq!(session.user.unwrap().id, USER_ID.parse().unwrap());

        let err = backend
            .sign_in("admin@bookstore.com", "wrong")
            .await
            .unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Rejected { status, message }) => {
                assert_eq!(*status, 400);
                assert_eq!(message, "Invalid login credentials");
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn profile_lookup() {
        let backend = backend(serve_api());

        let profile = backend.profile(TOKEN, USER_ID.parse().unwrap()).await.unwrap();
        assert_eq!(profile, Some(Profile::with_role(Role::Admin)));

        let profile = backend.profile(TOKEN, UserId::random()).await.unwrap();
        assert_eq!(profile, None);

        let duplicated: UserId = "11111111-1111-1111-1111-111111111111".parse().unwrap();
        let err = backend.profile(TOKEN, duplicated).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DuplicateProfile(_))
        ));
    }

    #[tokio::test]
    async fn sign_out() {
        let backend = backend(serve_api());
        backend.sign_out(TOKEN).await.unwrap();
    }

    #[tokio::test]
    async fn place_order() {
        let backend = backend(serve_api());
        let order = Lead {
            book_id: "3f1c2b1e-5d4a-4c7e-9a0b-1f2e3d4c5b6a".to_owned(),
            book_title: "Dune".to_owned(),
            full_name: "Paul Atreides".to_owned(),
            phone: "+998 90 123 45 67".to_owned(),
        };

        backend.create_order(None, &order).await.unwrap();
        backend.create_order(Some(TOKEN), &order).await.unwrap();

        let err = backend.create_order(Some("forged"), &order).await.unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::Rejected { status, message }) => {
                assert_eq!(*status, 401);
                assert!(message.starts_with("new row violates row-level security"));
            }
            other => panic!("Unexpected error {other:?}"),
        }
    }

    #[test]
    fn project_url_with_path() {
        let backend = HostedBackend::with_config(&config::Backend {
            url: "https://gateway.example.com/project".parse().unwrap(),
            anon_key: ANON_KEY.to_owned(),
            cookie_name: None,
            timeout_secs: 5,
        })
        .unwrap();

        assert_eq!(
            backend.endpoint("auth/v1/user").unwrap().as_str(),
            "https://gateway.example.com/project/auth/v1/user"
        );
    }
}
