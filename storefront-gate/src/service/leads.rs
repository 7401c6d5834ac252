//! Buy form endpoint

use actix_web::web::{Data, Json};
use actix_web::{HttpMessage, HttpRequest, post};

use crate::model::Model;
use crate::model::leads::{Lead, SyncOutcome};
use crate::model::session::Identity;

/// Buy form submission
///
/// The form lives on the home page and posts back to it, which keeps it reachable for anonymous
/// visitors. Other methods on the home page pass through to the storefront. Signed in callers
/// place the order under their own session.
#[post("/")]
async fn capture_lead(req: HttpRequest, model: Data<Model>, lead: Json<Lead>) -> Json<SyncOutcome> {
    let access_token = req
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.access_token.clone());

    let outcome = model
        .leads()
        .capture(model.backend(), access_token.as_deref(), &lead)
        .await;
    Json(outcome)
}
