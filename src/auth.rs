use std::sync::Arc;

use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, reqwest::async_http_client, AuthType, AuthUrl, AuthorizationCode,
    ClientId, ClientSecret, CsrfToken, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::DiscordConfig,
    error::{AuthError, ConfigError},
    session::{SessionId, SessionStore},
    USER_AGENT_STRING,
};

pub const DISCORD_AUTH_URL: &str = "https://discord.com/api/oauth2/authorize";
pub const DISCORD_TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
pub const DISCORD_API_URL: &str = "https://discord.com/api";

/// Identity claim returned by the provider after a successful authorization.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IdentityAssertion {
    #[serde(rename = "id")]
    pub external_id: String,
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
    #[serde(rename = "avatar", default)]
    pub avatar_ref: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Outcome of an OAuth callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Authenticated(IdentityAssertion),
    Failed(AuthError),
}

impl From<Result<IdentityAssertion, AuthError>> for AuthResult {
    fn from(result: Result<IdentityAssertion, AuthError>) -> Self {
        match result {
            Ok(identity) => Self::Authenticated(identity),
            Err(error) => Self::Failed(error),
        }
    }
}

/// Query string the provider appends when redirecting back.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackQuery {
    /// Reads the callback parameters from a raw query string.
    ///
    /// A query that repeats one of the known keys is ambiguous and yields the
    /// empty query, which the broker then refuses.
    pub fn from_raw(raw: &str) -> Self {
        let mut query = Self::default();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut query.code,
                "state" => &mut query.state,
                "error" => &mut query.error,
                "error_description" => &mut query.error_description,
                _ => continue,
            };
            if slot.is_some() {
                debug!("Ignoring callback query with repeated `{}`", key);
                return Self::default();
            }
            *slot = Some(value.into_owned());
        }
        query
    }
}

/// An OAuth identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL of the provider's consent page, carrying `state` back to the callback.
    fn authorize_url(&self, state: &str) -> Url;

    /// Exchanges an authorization code for the visitor's identity.
    async fn exchange(&self, code: String) -> Result<IdentityAssertion, AuthError>;
}

/// Discord OAuth2, requesting the `identify` and `email` scopes.
pub struct Discord {
    client: BasicClient,
    http: reqwest::Client,
    api_url: String,
}

impl Discord {
    pub fn new(config: &DiscordConfig) -> Result<Self, ConfigError> {
        Self::with_endpoints(config, DISCORD_AUTH_URL, DISCORD_TOKEN_URL, DISCORD_API_URL)
    }

    /// Builds a client against explicit endpoints, e.g. a local stand-in for Discord.
    pub fn with_endpoints(
        config: &DiscordConfig,
        auth_url: &str,
        token_url: &str,
        api_url: &str,
    ) -> Result<Self, ConfigError> {
        let invalid = |name: &'static str| {
            move |err: url::ParseError| ConfigError::Invalid {
                name,
                reason: err.to_string(),
            }
        };
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(auth_url.to_string()).map_err(invalid("discord auth url"))?,
            Some(TokenUrl::new(token_url.to_string()).map_err(invalid("discord token url"))?),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_redirect_uri(
            RedirectUrl::new(config.callback_url.clone()).map_err(invalid("DISCORD_CALLBACK_URL"))?,
        );
        Ok(Self {
            client,
            http: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_user(&self, token: &str) -> Result<IdentityAssertion, AuthError> {
        let response = self
            .http
            .get(format!("{}/users/@me", self.api_url))
            .header(USER_AGENT, USER_AGENT_STRING)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| {
                warn!("Discord profile request failed: {}", err);
                AuthError::NoResponse
            })?;
        if !response.status().is_success() {
            return Err(AuthError::Provider(format!(
                "profile request returned {}",
                response.status()
            )));
        }
        response
            .json::<IdentityAssertion>()
            .await
            .map_err(|_| AuthError::BadJson)
    }
}

#[async_trait]
impl IdentityProvider for Discord {
    fn authorize_url(&self, state: &str) -> Url {
        let state = state.to_string();
        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scope(Scope::new("identify".to_string()))
            .add_scope(Scope::new("email".to_string()))
            .url();
        url
    }

    async fn exchange(&self, code: String) -> Result<IdentityAssertion, AuthError> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .request_async(async_http_client)
            .await
            .map_err(|err| {
                warn!("Discord code exchange failed: {}", err);
                AuthError::OAuthExchangeFailed
            })?;
        self.get_user(token.access_token().secret()).await
    }
}

/// Wraps a provider with the session bookkeeping of the two-step redirect.
pub struct Broker {
    provider: Arc<dyn IdentityProvider>,
    sessions: SessionStore,
}

impl Broker {
    pub fn new(provider: Arc<dyn IdentityProvider>, sessions: SessionStore) -> Self {
        Self { provider, sessions }
    }

    /// Records a fresh CSRF state for the session and returns where to send the visitor.
    pub async fn start(&self, session: SessionId) -> Url {
        let state = CsrfToken::new_random().secret().clone();
        self.sessions.set_pending_state(session, state.clone()).await;
        self.provider.authorize_url(&state)
    }

    /// Completes a login. Any pending state is consumed whether or not this succeeds.
    pub async fn callback(&self, session: Option<SessionId>, query: CallbackQuery) -> AuthResult {
        let session = match session {
            Some(session) => session,
            None => return AuthResult::Failed(AuthError::InvalidSession),
        };
        let pending = self.sessions.take_pending_state(session).await;
        if let Some(error) = query.error {
            return AuthResult::Failed(if error == "access_denied" {
                AuthError::AccessDenied
            } else {
                AuthError::Provider(error)
            });
        }
        match (pending, query.state) {
            (Some(expected), Some(state)) if expected == state => {}
            _ => return AuthResult::Failed(AuthError::InvalidState),
        }
        let code = match query.code.filter(|code| !code.is_empty()) {
            Some(code) => code,
            None => return AuthResult::Failed(AuthError::MissingCode),
        };
        self.provider.exchange(code).await.into()
    }
}
