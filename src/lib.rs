//! Discord login relay: records a visitor's network details in their session,
//! runs the OAuth login, and posts a notification to a Discord webhook.

#[macro_use]
extern crate log;

use std::{sync::Arc, time::Duration};

use uuid::Uuid;

pub mod auth;
pub mod collector;
pub mod config;
pub mod error;
pub mod httpapi;
pub mod metadata;
pub mod notifier;
pub mod session;

use auth::{Broker, Discord};
use config::Config;
use error::{Error, Result};
use httpapi::AppState;
use notifier::Notifier;
use session::SessionStore;

pub const USER_AGENT_STRING: &str = concat!("login_notifier ", env!("CARGO_PKG_VERSION"));

/// How often expired sessions are swept out of memory.
pub const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub type ID = Uuid;
pub fn new_id() -> ID {
    Uuid::new_v4()
}

/// Wires the session store, Discord broker and webhook notifier from `config`.
pub fn build_state(config: &Config) -> Result<AppState> {
    let key = match &config.session_secret {
        Some(secret) => secret.as_bytes().to_vec(),
        None => {
            warn!("SESSION_SECRET is not set, using a random key for this run");
            SessionStore::random_key()
        }
    };
    let sessions =
        SessionStore::new(&key, config.session_ttl()).with_secure_cookies(config.secure_cookies());
    let provider = Discord::new(&config.discord)?;
    let broker = Broker::new(Arc::new(provider), sessions.clone());
    let notifier = Notifier::new(config.webhook_url.clone(), config.webhook_timeout())?;
    Ok(AppState::new(sessions, broker, notifier))
}

/// Serves the login flow until the process is stopped.
pub async fn start(config: Config) -> Result {
    config.validate()?;
    let state = build_state(&config)?;
    let sweeper = state.sessions.spawn_sweeper(SESSION_SWEEP_INTERVAL);
    let (address, server) = warp::serve(httpapi::routes::routes(state))
        .try_bind_ephemeral(config.address()?)
        .map_err(|err| Error::ServerStartFailed(err.to_string()))?;
    info!("Server is running on {}", address);
    server.await;
    sweeper.abort();
    Ok(())
}

pub mod prelude {
    pub use crate::auth::{AuthResult, Broker, IdentityAssertion, IdentityProvider};
    pub use crate::config::Config;
    pub use crate::error::{AuthError, Error, Result};
    pub use crate::httpapi::{routes::routes, AppState};
    pub use crate::metadata::{VisitorMetadata, UNKNOWN};
    pub use crate::notifier::{Notifier, WebhookMessage};
    pub use crate::session::SessionStore;
    pub use crate::ID;
}
