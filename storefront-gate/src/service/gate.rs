//! Access gate middleware

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::ErrorInternalServerError;
use actix_web::http::header;
use actix_web::middleware::Next;
use actix_web::web::Data;
use actix_web::{Error, HttpMessage, HttpResponse};
use tracing::{debug, info, warn};

use crate::model::Model;
use crate::model::access::{Decision, RequestPath, Route};
use crate::model::profiles::Role;
use crate::model::session::{self, Resolution};

/// Decides for every request whether it passes or gets redirected
///
/// The caller is resolved from session cookies on every request, so stale sessions get
/// refreshed even on pages that don't need them. The role is only looked up for back-office
/// paths. Requests that pass carry the caller's `Identity` and the checked `RequestPath` in
/// extensions, and the pass-through forwards exactly that path. Paths without a canonical form
/// are refused with `400`.
///
/// Cookies scheduled by the session resolution are added to whatever response leaves the gate,
/// unless the handler set session cookies itself, in which case the handler's cookies win.
pub async fn middleware<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, Error>
where
    B: MessageBody + 'static,
{
    let model: Data<Model> = req
        .app_data()
        .cloned()
        .ok_or_else(|| ErrorInternalServerError("Missing model"))?;

    // Unparsable cookie header is as good as no cookies
    let jar = req.cookies().map(|jar| jar.clone()).unwrap_or_default();

    let Some(path) = RequestPath::parse(req.path()) else {
        warn!(path = req.path(), "Refusing non-canonical path");
        let refused = HttpResponse::BadRequest().finish();
        return Ok(req.into_response(refused).map_into_right_body());
    };

    let route = Route::classify(path.decoded());
    let resolution = session::resolve(&model, &jar).await;

    let role = match (&resolution.identity, route.needs_role()) {
        (Some(identity), true) => {
            Role::lookup(
                model.backend(),
                model.policy(),
                &identity.access_token,
                identity.user.id,
            )
            .await
        }
        _ => None,
    };

    let decision = Decision::evaluate(route, model.policy(), resolution.user(), role);
    debug!(
        path = path.decoded(),
        ?route,
        ?decision,
        user_id = ?resolution.user().map(|user| user.id),
        ?role,
        "Access decided"
    );

    let Resolution { identity, cookies } = resolution;
    let mut response = match decision.location() {
        None => {
            if let Some(identity) = identity {
                req.extensions_mut().insert(identity);
            }
            req.extensions_mut().insert(path);
            next.call(req).await?.map_into_left_body()
        }
        Some(location) => {
            let location = match req.query_string() {
                "" => location.to_owned(),
                query => format!("{location}?{query}"),
            };
            info!(path = path.decoded(), %location, "Redirecting");

            let redirect = HttpResponse::TemporaryRedirect()
                .insert_header((header::LOCATION, location))
                .finish();
            req.into_response(redirect).map_into_right_body()
        }
    };

    let session_cookies = model.session_cookies();
    let handler_wrote_session = response
        .response()
        .cookies()
        .any(|cookie| session_cookies.owns(cookie.name()));
    if handler_wrote_session {
        return Ok(response);
    }

    for cookie in &cookies {
        response
            .response_mut()
            .add_cookie(cookie)
            .map_err(ErrorInternalServerError)?;
    }

    Ok(response)
}
