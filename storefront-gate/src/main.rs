//! Storefront access gate
//!
//! Sits in front of the storefront renderer and decides for every request whether it passes,
//! based on the hosted backend session and the caller's profile role.

use actix_web::{App, HttpServer};
use clap::Parser;
use color_eyre::Result;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

use crate::config::{Config, LogFormat};
use crate::model::Model;
use crate::opt::Opt;
use crate::service::proxy::Upstream;

mod config;
pub mod model;
mod opt;
mod service;

/// Initializes tracing collection
///
/// `RUST_LOG` takes precedence over the `info` default, directives from the config file are
/// applied on top of either.
fn setup_tracing(config: &config::Logging) -> Result<()> {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let fmt_layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };

    let filter_layer = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let filter_layer = config
        .filters
        .iter()
        .cloned()
        .fold(filter_layer, |layer, filter| layer.add_directive(filter));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Opt { config: source } = Opt::parse();
    let config_path = source.path().path().to_owned();
    let config = Config::load(source)?;

    setup_tracing(&config.logging)?;
    color_eyre::install()?;

    info!(
        config = ?config_path,
        backend = %config.backend.url,
        policy = ?config.policy,
        "Tracing initialized, setting up the gate"
    );

    let upstream = match &config.upstream {
        Some(url) => Some(Upstream::new(url.clone(), config.timeout())?),
        None => {
            warn!("No upstream configured, allowed requests will end with 404");
            None
        }
    };

    let context = Model::with_config(&config)?;
    info!(cookie = context.session_cookies().name(), "Reading sessions");
    let service_config = service::configure(context, upstream).await?;
    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(service_config.clone())
    })
    .bind(config.host)?
    .run()
    .await?;

    info!("Gate stopped");
    Ok(())
}
