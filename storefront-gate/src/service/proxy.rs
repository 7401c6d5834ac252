//! Pass-through to the storefront renderer

use std::time::Duration;

use actix_web::error::{ErrorBadGateway, ErrorBadRequest};
use actix_web::http::StatusCode;
use actix_web::http::header::HeaderValue;
use actix_web::web::{Bytes, Data};
use actix_web::{HttpMessage, HttpRequest, HttpResponse, Result};
use reqwest::{Client, Method, redirect};
use tracing::warn;
use url::Url;

use crate::model::access::RequestPath;

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

fn forwarded(name: &str) -> bool {
    !HOP_BY_HOP.contains(&name)
}

/// Storefront renderer
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    /// Base URL, always with a trailing slash
    base: Url,
}

impl Upstream {
    pub fn new(mut base: Url, timeout: Duration) -> color_eyre::Result<Self> {
        // Redirects are the browser's business
        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()?;

        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base })
    }

    /// Upstream URL of a request
    fn target(&self, path: &str, query: &str) -> Result<Url, url::ParseError> {
        // Always a path-relative reference, a leading `scheme:` lookalike must not switch hosts
        let mut url = self.base.join(&format!("./{}", path.trim_start_matches('/')))?;
        url.set_query(Some(query).filter(|query| !query.is_empty()));
        Ok(url)
    }
}

/// Forwards the request upstream relaying the response
///
/// The upstream path is the canonical path the gate classified, never the raw one.
pub async fn forward(
    req: HttpRequest,
    body: Bytes,
    upstream: Option<Data<Upstream>>,
) -> Result<HttpResponse> {
    let Some(upstream) = upstream else {
        return Ok(HttpResponse::NotFound().finish());
    };

    // Path checked by the gate, parsed again only when called outside of it
    let path = req
        .extensions()
        .get::<RequestPath>()
        .cloned()
        .or_else(|| RequestPath::parse(req.path()))
        .ok_or_else(|| ErrorBadRequest("Invalid path"))?;
    let url = upstream
        .target(path.forwarded(), req.query_string())
        .map_err(ErrorBadRequest)?;
    let method = Method::from_bytes(req.method().as_str().as_bytes()).map_err(ErrorBadRequest)?;

    let mut request = upstream.client.request(method, url);
    for (name, value) in req.headers().iter() {
        if forwarded(name.as_str()) {
            request = request.header(name.as_str(), value.as_bytes());
        }
    }
    if let Some(peer) = req.peer_addr() {
        request = request.header("x-forwarded-for", peer.ip().to_string());
    }

    let response = request.body(body).send().await.map_err(|err| {
        warn!(?err, path = path.forwarded(), "Storefront request failed");
        ErrorBadGateway("Storefront unavailable")
    })?;

    let status = StatusCode::from_u16(response.status().as_u16()).map_err(ErrorBadGateway)?;
    let mut relayed = HttpResponse::build(status);
    for (name, value) in response.headers().iter() {
        if !forwarded(name.as_str()) {
            continue;
        }
        if let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) {
            relayed.append_header((name.as_str(), value));
        }
    }

    let body = response.bytes().await.map_err(ErrorBadGateway)?;
    Ok(relayed.body(body))
}
