//! Sign in, sign out and session introspection

use actix_web::error::{ErrorBadGateway, ErrorInternalServerError};
use actix_web::web::{Data, Json};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, Result, get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::model::Model;
use crate::model::backend;
use crate::model::profiles::Role;
use crate::model::session::Identity;
use crate::model::users::User;

/// Staff login form
#[derive(Debug, Deserialize)]
pub struct Credentials {
    email: String,
    password: String,
}

/// Current session description
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub user: User,
    pub role: Option<Role>,
}

/// Exchanges credentials for a session stored in cookies
#[post("/auth/login")]
async fn login(
    req: HttpRequest,
    model: Data<Model>,
    credentials: Json<Credentials>,
) -> Result<HttpResponse> {
    let Credentials { email, password } = credentials.into_inner();

    let stored = match model.backend().sign_in(&email, &password).await {
        Ok(stored) => stored,
        Err(err) => {
            return match err.downcast_ref::<backend::Error>() {
                Some(backend::Error::Rejected { message, .. }) => {
                    info!(%email, %message, "Sign in rejected");
                    Ok(HttpResponse::Unauthorized().json(json!({ "error": message })))
                }
                _ => {
                    warn!(%email, ?err, "Sign in failed");
                    Err(ErrorBadGateway("Authentication service unavailable"))
                }
            };
        }
    };

    let jar = req.cookies().map(|jar| jar.clone()).unwrap_or_default();
    let cookies = model
        .session_cookies()
        .write(&stored, &jar)
        .map_err(|err| ErrorInternalServerError(err.to_string()))?;

    info!(
        %email,
        user_id = ?stored.user.as_ref().map(|user| user.id),
        "Signed in"
    );

    let mut response = HttpResponse::Ok();
    for cookie in cookies {
        response.cookie(cookie);
    }
    Ok(response.json(&stored.user))
}

/// Closes current session
///
/// Revocation at the backend is best effort, session cookies are dropped regardless.
#[post("/auth/logout")]
async fn logout(req: HttpRequest, model: Data<Model>) -> HttpResponse {
    let identity = req.extensions_mut().remove::<Identity>();
    if let Some(identity) = identity {
        match model.backend().sign_out(&identity.access_token).await {
            Ok(()) => info!(user_id = %identity.user.id, "Signed out"),
            Err(err) => warn!(user_id = %identity.user.id, ?err, "Session revocation failed"),
        }
    }

    let jar = req.cookies().map(|jar| jar.clone()).unwrap_or_default();
    let mut response = HttpResponse::NoContent();
    for cookie in model.session_cookies().clear(&jar) {
        response.cookie(cookie);
    }
    response.finish()
}

/// Describes the caller's session
///
/// Passing the gate already refreshes a stale session, so this doubles as a refresh endpoint.
#[get("/auth/session")]
async fn session(req: HttpRequest, model: Data<Model>) -> HttpResponse {
    let identity = req.extensions().get::<Identity>().cloned();
    let Some(identity) = identity else {
        return HttpResponse::Unauthorized().json(json!({ "error": "Not signed in" }));
    };

    let role = Role::lookup(
        model.backend(),
        model.policy(),
        &identity.access_token,
        identity.user.id,
    )
    .await;

    HttpResponse::Ok().json(SessionInfo {
        user: identity.user,
        role,
    })
}
