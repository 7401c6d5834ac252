//! Service global context

use std::sync::Arc;

use color_eyre::Result;

pub mod access;
pub mod backend;
pub mod hosted;
pub mod leads;
pub mod profiles;
pub mod session;
pub mod users;

#[cfg(test)]
pub mod fake;

use crate::config::{Config, Policy};
use backend::Backend;
use hosted::HostedBackend;
use leads::Leads;
use session::SessionCookies;

/// Context shared by all requests
///
/// Everything here is read-only once built, requests never share mutable state.
#[derive(Clone)]
pub struct Model {
    /// Hosted backend access
    backend: Arc<dyn Backend>,
    /// Session cookie format
    session_cookies: SessionCookies,
    /// Access policy
    policy: Arc<Policy>,
    /// Lead webhook
    leads: Leads,
}

impl Model {
    /// Model over an explicitly provided backend, with lead capture disabled
    pub fn new(backend: Arc<dyn Backend>, session_cookies: SessionCookies, policy: Policy) -> Self {
        Self {
            backend,
            session_cookies,
            policy: Arc::new(policy),
            leads: Leads::disabled(),
        }
    }

    /// Model from configuration, talking to the hosted backend
    pub fn with_config(config: &Config) -> Result<Self> {
        let backend = HostedBackend::with_config(&config.backend)?;
        let session_cookies = match &config.backend.cookie_name {
            Some(name) => SessionCookies::new(name.clone()),
            None => SessionCookies::for_backend(&config.backend.url)?,
        };
        let leads = Leads::new(config.leads.webhook.clone(), config.timeout())?;

        Ok(Self::new(Arc::new(backend), session_cookies, config.policy.clone()).with_leads(leads))
    }

    /// Replaces the lead webhook
    pub fn with_leads(self, leads: Leads) -> Self {
        Self { leads, ..self }
    }

    /// Accesses the hosted backend
    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn session_cookies(&self) -> &SessionCookies {
        &self.session_cookies
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn leads(&self) -> &Leads {
        &self.leads
    }
}
