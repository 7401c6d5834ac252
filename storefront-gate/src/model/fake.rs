//! In-memory backend for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::Result;
use color_eyre::eyre::bail;
use uuid::Uuid;

use crate::config::Policy;
use crate::model::Model;
use crate::model::backend::{Backend, Error};
use crate::model::leads::Lead;
use crate::model::profiles::{Profile, Role};
use crate::model::session::{SessionCookies, StoredSession};
use crate::model::users::{User, UserId};

/// Password every fake user signs in with
pub const PASSWORD: &str = "correct horse battery staple";

/// User registered in the fake backend together with a live access token
#[derive(Debug, Clone)]
pub struct FakeUser {
    pub user: User,
    pub token: String,
}

impl FakeUser {
    /// Fresh session for the user's token
    pub fn session(&self) -> StoredSession {
        StoredSession {
            access_token: self.token.clone(),
            refresh_token: format!("refresh-{}", self.token),
            expires_at: Some(Utc::now().timestamp() + 3600),
            expires_in: Some(3600),
            token_type: Some("bearer".to_owned()),
            user: Some(self.user.clone()),
        }
    }
}

#[derive(Default)]
struct State {
    /// Access token to user
    tokens: HashMap<String, User>,
    /// Refresh token to user
    refresh_tokens: HashMap<String, User>,
    /// Email to user
    accounts: HashMap<String, User>,
    profiles: HashMap<UserId, Profile>,
    orders: Vec<Lead>,
}

/// Backend keeping everything in memory, with switches to simulate failures
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
    offline: AtomicBool,
    profiles_failing: AtomicBool,
    orders_rejected: AtomicBool,
    profile_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl FakeBackend {
    /// Model over a fresh fake backend, with default policy
    pub fn model() -> (Model, Arc<Self>) {
        Self::model_with_policy(Policy::default())
    }

    pub fn model_with_policy(policy: Policy) -> (Model, Arc<Self>) {
        let backend = Arc::new(Self::default());
        let model = Model::new(
            backend.clone(),
            SessionCookies::new("sb-test-auth-token"),
            policy,
        );
        (model, backend)
    }

    /// Registers an user, with a profile if `role` is given
    pub fn add_user(&self, email: &str, role: Option<Role>) -> FakeUser {
        let user = User::new(UserId::random(), email);
        let token = Uuid::new_v4().to_string();

        let mut state = self.state.lock().unwrap();
        state.tokens.insert(token.clone(), user.clone());
        state
            .refresh_tokens
            .insert(format!("refresh-{token}"), user.clone());
        state.accounts.insert(email.to_owned(), user.clone());
        if let Some(role) = role {
            state.profiles.insert(user.id, Profile::with_role(role));
        }

        FakeUser { user, token }
    }

    /// Every following call fails as if the backend was unreachable
    pub fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }

    /// Every following profile lookup fails
    pub fn fail_profiles(&self) {
        self.profiles_failing.store(true, Ordering::SeqCst);
    }

    /// Every following order is refused by the row-level security
    pub fn reject_orders(&self) {
        self.orders_rejected.store(true, Ordering::SeqCst);
    }

    /// Orders stored so far
    pub fn orders(&self) -> Vec<Lead> {
        self.state.lock().unwrap().orders.clone()
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("Connection refused");
        }
        Ok(())
    }

    fn issue(state: &mut State, user: User) -> StoredSession {
        let token = Uuid::new_v4().to_string();
        state.tokens.insert(token.clone(), user.clone());
        state
            .refresh_tokens
            .insert(format!("refresh-{token}"), user.clone());

        FakeUser { user, token }.session()
    }
}

fn rejected(status: u16, message: &str) -> color_eyre::Report {
    color_eyre::Report::new(Error::Rejected {
        status,
        message: message.to_owned(),
    })
}

#[async_trait]
impl Backend for FakeBackend {
    async fn user(&self, access_token: &str) -> Result<User> {
        self.ensure_online()?;
        let state = self.state.lock().unwrap();
        state
            .tokens
            .get(access_token)
            .cloned()
            .ok_or_else(|| rejected(401, "invalid JWT"))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredSession> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        let mut state = self.state.lock().unwrap();
        let user = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| rejected(400, "Invalid Refresh Token"))?;
        Ok(Self::issue(&mut state, user))
    }

    async fn profile(&self, _access_token: &str, user_id: UserId) -> Result<Option<Profile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_online()?;
        if self.profiles_failing.load(Ordering::SeqCst) {
            bail!("relation \"profiles\" does not exist");
        }
        Ok(self.state.lock().unwrap().profiles.get(&user_id).cloned())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<StoredSession> {
        self.ensure_online()?;
        let mut state = self.state.lock().unwrap();
        let user = match state.accounts.get(email) {
            Some(user) if password == PASSWORD => user.clone(),
            _ => return Err(rejected(400, "Invalid login credentials")),
        };
        Ok(Self::issue(&mut state, user))
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        self.ensure_online()?;
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.state.lock().unwrap().tokens.remove(access_token);
        Ok(())
    }

    async fn create_order(&self, access_token: Option<&str>, order: &Lead) -> Result<()> {
        self.ensure_online()?;
        let mut state = self.state.lock().unwrap();
        if access_token.is_some_and(|token| !state.tokens.contains_key(token)) {
            return Err(rejected(401, "invalid JWT"));
        }
        if self.orders_rejected.load(Ordering::SeqCst) {
            return Err(rejected(401, "new row violates row-level security policy"));
        }
        state.orders.push(order.clone());
        Ok(())
    }
}
