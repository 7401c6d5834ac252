//! Captured buy requests

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument};
use url::Url;

use crate::model::backend::{self, Backend};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error")]
    NotConfigured,
    #[error("Webhook returned {0}")]
    Status(u16),
    #[error("Network or server error")]
    Network(#[source] reqwest::Error),
}

/// Buy request left on a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub book_id: String,
    pub book_title: String,
    pub full_name: String,
    pub phone: String,
}

/// Spreadsheet row, the sheet has no use for the book id
#[derive(Debug, Serialize)]
struct SheetRow<'a> {
    book_title: &'a str,
    full_name: &'a str,
    phone: &'a str,
}

impl<'a> From<&'a Lead> for SheetRow<'a> {
    fn from(lead: &'a Lead) -> Self {
        Self {
            book_title: &lead.book_title,
            full_name: &lead.full_name,
            phone: &lead.phone,
        }
    }
}

/// Reported when the order store fails without saying why
const ORDER_FAILURE: &str = "Something went wrong. Please try again.";

/// Outcome reported back to the buy form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    /// The order row is stored, even if the webhook sync failed afterwards
    #[serde(default)]
    pub order_recorded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    fn order_failed(message: String) -> Self {
        Self {
            success: false,
            order_recorded: false,
            error: Some(message),
        }
    }

    fn order_recorded(synced: Result<(), Error>) -> Self {
        Self {
            success: synced.is_ok(),
            order_recorded: true,
            error: synced.err().map(|err| err.to_string()),
        }
    }
}

/// Pushes leads to the spreadsheet webhook
#[derive(Debug, Clone)]
pub struct Leads {
    client: Client,
    webhook: Option<Url>,
}

impl Leads {
    pub fn new(webhook: Option<Url>, timeout: Duration) -> color_eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, webhook })
    }

    /// Leads sink with no webhook, every sync fails
    pub fn disabled() -> Self {
        Self {
            client: Client::new(),
            webhook: None,
        }
    }

    /// Records the order, then mirrors it to the webhook
    ///
    /// A failed order store is reported with the backend's message and skips the webhook.
    #[instrument(skip_all, fields(book_id = %lead.book_id))]
    pub async fn capture(
        &self,
        backend: &dyn Backend,
        access_token: Option<&str>,
        lead: &Lead,
    ) -> SyncOutcome {
        if let Err(err) = backend.create_order(access_token, lead).await {
            error!(?err, "Order not recorded");
            let message = match err.downcast_ref::<backend::Error>() {
                Some(backend::Error::Rejected { message, .. }) => message.clone(),
                _ => ORDER_FAILURE.to_owned(),
            };
            return SyncOutcome::order_failed(message);
        }

        info!("Order recorded");
        SyncOutcome::order_recorded(self.sync(lead).await)
    }

    /// Sends the lead to the webhook
    #[instrument(skip_all, fields(book_title = %lead.book_title))]
    pub async fn sync(&self, lead: &Lead) -> Result<(), Error> {
        let Some(webhook) = &self.webhook else {
            error!("Lead webhook is not configured");
            return Err(Error::NotConfigured);
        };

        let response = self
            .client
            .post(webhook.clone())
            .json(&SheetRow::from(lead))
            .send()
            .await
            .map_err(|err| {
                error!(?err, "Lead sync failed");
                Error::Network(err)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                status = status.as_u16(),
                webhook = %preview(webhook.as_str(), 30),
                body = %preview(&body, 200),
                "Lead webhook rejected the lead"
            );
            return Err(Error::Status(status.as_u16()));
        }

        info!("Lead synced");
        Ok(())
    }
}

/// Cuts text to at most `len` characters for logging
fn preview(text: &str, len: usize) -> String {
    match text.char_indices().nth(len) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_owned(),
    }
}
