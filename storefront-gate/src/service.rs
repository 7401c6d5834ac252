//! Utilities for services building

use actix_web::middleware;
use actix_web::web::{self, Data, ServiceConfig};


mod auth;
mod gate;
mod leads;
pub mod proxy;

use crate::model::Model;
use proxy::Upstream;

/// Returns configuration function for the ActixWeb services
///
/// Every route, the pass-through to `upstream` included, sits behind the access gate. Without
/// an upstream, requests the gate lets through and no endpoint serves end with `404`.
pub async fn configure(
    context: Model,
    upstream: Option<Upstream>,
) -> color_eyre::Result<impl Fn(&mut web::ServiceConfig) + Clone> {
    let cfg = move |cfg: &mut ServiceConfig| {
        let gated = {
            web::scope("")
                .wrap(middleware::from_fn(gate::middleware))
                .service(auth::login)
                .service(auth::logout)
                .service(auth::session)
                .service(leads::capture_lead)
                .default_service(web::to(proxy::forward))
        };

        cfg.app_data(Data::new(context.clone()));
        if let Some(upstream) = &upstream {
            cfg.app_data(Data::new(upstream.clone()));
        }
        cfg.service(gated);
    };

    Ok(cfg)
}
