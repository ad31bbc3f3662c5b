use std::time::Duration;

use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{
    auth::IdentityAssertion,
    error::{Error, NotifyError},
    metadata::VisitorMetadata,
    USER_AGENT_STRING,
};

pub const SENDER_NAME: &str = "OAuth Logger";
pub const EMBED_TITLE: &str = "New OAuth Login";
pub const EMBED_DESCRIPTION: &str = "A user just logged in via Discord!";
pub const EMBED_COLOR: u32 = 3447003;
pub const DEFAULT_AVATAR_URL: &str = "https://cdn.discordapp.com/embed/avatars/0.png";
pub const EMAIL_PLACEHOLDER: &str = "Not provided";
/// Discord refuses embed field values longer than this.
pub const FIELD_VALUE_LIMIT: usize = 1024;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EmbedThumbnail {
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: truncate(value, FIELD_VALUE_LIMIT),
            inline: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub thumbnail: EmbedThumbnail,
    pub fields: Vec<EmbedField>,
}

/// Body of a Discord webhook execution.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WebhookMessage {
    pub username: String,
    pub embeds: Vec<Embed>,
}

impl WebhookMessage {
    /// Combines a visitor's metadata with the identity that just logged in.
    pub fn compose(metadata: &VisitorMetadata, identity: &IdentityAssertion) -> Self {
        let fields = vec![
            EmbedField::new("User", &user_label(identity)),
            EmbedField::new(
                "Email",
                identity.email.as_deref().unwrap_or(EMAIL_PLACEHOLDER),
            ),
            EmbedField::new("IPv4", metadata.ipv4_or_unknown()),
            EmbedField::new("IPv6", metadata.ipv6_or_unknown()),
            EmbedField::new("Country", metadata.country_or_unknown()),
            EmbedField::new("Browser / User-Agent", metadata.user_agent_or_unknown()),
            EmbedField::new("Accessed At", &metadata.accessed_at_or_now()),
        ];
        Self {
            username: SENDER_NAME.to_string(),
            embeds: vec![Embed {
                title: EMBED_TITLE.to_string(),
                description: EMBED_DESCRIPTION.to_string(),
                color: EMBED_COLOR,
                thumbnail: EmbedThumbnail {
                    url: avatar_url(identity),
                },
                fields,
            }],
        }
    }
}

/// CDN URL of the user's avatar, or Discord's default avatar when they have none.
pub fn avatar_url(identity: &IdentityAssertion) -> String {
    match identity.avatar_ref.as_deref().filter(|avatar| !avatar.is_empty()) {
        Some(avatar) => format!(
            "https://cdn.discordapp.com/avatars/{}/{}.png",
            identity.external_id, avatar
        ),
        None => DEFAULT_AVATAR_URL.to_string(),
    }
}

/// `name#1234 (ID: id)`; the tag is left out for accounts on the discriminator-free scheme.
pub fn user_label(identity: &IdentityAssertion) -> String {
    match identity
        .discriminator
        .as_deref()
        .filter(|tag| !tag.is_empty() && *tag != "0")
    {
        Some(tag) => format!(
            "{}#{} (ID: {})",
            identity.username, tag, identity.external_id
        ),
        None => format!("{} (ID: {})", identity.username, identity.external_id),
    }
}

fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}

/// Posts login notifications to a fixed webhook.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Duration,
}

impl Notifier {
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self {
            client,
            webhook_url,
            timeout,
        })
    }

    /// Delivers one message, failing on transport errors, timeouts and non-2xx answers.
    pub async fn send(&self, message: &WebhookMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header(USER_AGENT, USER_AGENT_STRING)
            .json(message)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else {
                    NotifyError::Request(err)
                }
            })?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status))
        }
    }

    /// Sends `message` on a background task and returns immediately.
    ///
    /// Delivery is best effort: it is attempted once, bounded by the
    /// configured timeout, and failures are only logged. Callers may drop the
    /// handle; tests await it to observe the outcome.
    pub fn dispatch(&self, message: WebhookMessage) -> JoinHandle<Result<(), NotifyError>> {
        let notifier = self.clone();
        tokio::spawn(async move {
            let result = notifier.send(&message).await;
            match &result {
                Ok(()) => info!("Webhook sent successfully"),
                Err(err) => error!("Error sending webhook: {}", err),
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;
    use warp::{http::StatusCode, Filter};

    fn field<'a>(message: &'a WebhookMessage, name: &str) -> Option<&'a str> {
        message.embeds[0]
            .fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }

    fn identity() -> IdentityAssertion {
        IdentityAssertion {
            external_id: "80351110224678912".to_string(),
            username: "Nelly".to_string(),
            discriminator: Some("1337".to_string()),
            avatar_ref: Some("8342729096ea3675442027381ff50dfe".to_string()),
            email: Some("nelly@discord.com".to_string()),
        }
    }

    #[test]
    fn compose_lists_fields_in_order() {
        let metadata = VisitorMetadata {
            ipv4: Some("1.2.3.4".to_string()),
            ipv6: Some("::1".to_string()),
            country: Some("Japan".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            accessed_at: Some("2024/1/5 8:03:07".to_string()),
        };
        let message = WebhookMessage::compose(&metadata, &identity());
        assert_eq!(message.username, SENDER_NAME);
        let embed = &message.embeds[0];
        assert_eq!(embed.color, EMBED_COLOR);
        assert_eq!(
            embed.thumbnail.url,
            "https://cdn.discordapp.com/avatars/80351110224678912/8342729096ea3675442027381ff50dfe.png"
        );
        let names: Vec<&str> = embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["User", "Email", "IPv4", "IPv6", "Country", "Browser / User-Agent", "Accessed At"]
        );
        assert_eq!(field(&message, "User"), Some("Nelly#1337 (ID: 80351110224678912)"));
        assert_eq!(field(&message, "Email"), Some("nelly@discord.com"));
        assert_eq!(field(&message, "Country"), Some("Japan"));
        assert_eq!(field(&message, "Accessed At"), Some("2024/1/5 8:03:07"));
    }

    #[test]
    fn missing_metadata_renders_unknown() {
        let cases: [(&[&str], VisitorMetadata); 3] = [
            (
                &["IPv6", "Country"],
                VisitorMetadata {
                    ipv4: Some("1.2.3.4".to_string()),
                    ..Default::default()
                },
            ),
            (
                &["IPv4"],
                VisitorMetadata {
                    ipv6: Some("::1".to_string()),
                    country: Some("Japan".to_string()),
                    ..Default::default()
                },
            ),
            (&["IPv4", "IPv6", "Country"], VisitorMetadata::default()),
        ];
        for (unknown, metadata) in cases.iter() {
            let message = WebhookMessage::compose(metadata, &identity());
            for name in ["IPv4", "IPv6", "Country"].iter() {
                let value = field(&message, name).unwrap();
                assert_eq!(value == crate::metadata::UNKNOWN, unknown.contains(name), "{}", name);
            }
        }
    }

    #[test]
    fn fallbacks_for_sparse_identity() {
        let identity = IdentityAssertion {
            external_id: "1".to_string(),
            username: "new_style".to_string(),
            discriminator: Some("0".to_string()),
            avatar_ref: None,
            email: None,
        };
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity);
        assert_eq!(message.embeds[0].thumbnail.url, DEFAULT_AVATAR_URL);
        assert_eq!(field(&message, "User"), Some("new_style (ID: 1)"));
        assert_eq!(field(&message, "Email"), Some(EMAIL_PLACEHOLDER));
    }

    #[test]
    fn long_values_are_truncated() {
        let metadata = VisitorMetadata {
            user_agent: Some("é".repeat(2000)),
            ..Default::default()
        };
        let message = WebhookMessage::compose(&metadata, &identity());
        let value = field(&message, "Browser / User-Agent").unwrap();
        assert_eq!(value.chars().count(), FIELD_VALUE_LIMIT);
    }

    #[test]
    fn wire_format_matches_discord() {
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity());
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["username"], "OAuth Logger");
        assert_eq!(json["embeds"][0]["title"], "New OAuth Login");
        assert!(json["embeds"][0]["thumbnail"]["url"].is_string());
        assert_eq!(json["embeds"][0]["fields"][2]["inline"], false);
    }

    async fn sink(status: StatusCode, delay: Duration) -> (SocketAddr, mpsc::UnboundedReceiver<WebhookMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let route = warp::post()
            .and(warp::path!("webhook"))
            .and(warp::body::json())
            .and_then(move |message: WebhookMessage| {
                let tx = tx.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(message);
                    Ok::<_, warp::Rejection>(warp::reply::with_status(warp::reply(), status))
                }
            });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        (addr, rx)
    }

    #[tokio::test]
    async fn dispatch_delivers_once() {
        let (addr, mut rx) = sink(StatusCode::NO_CONTENT, Duration::from_millis(0)).await;
        let notifier = Notifier::new(format!("http://{}/webhook", addr), Duration::from_secs(5)).unwrap();
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity());
        notifier.dispatch(message.clone()).await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(message));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failures_are_reported_not_retried() {
        let (addr, mut rx) = sink(StatusCode::INTERNAL_SERVER_ERROR, Duration::from_millis(0)).await;
        let notifier = Notifier::new(format!("http://{}/webhook", addr), Duration::from_secs(5)).unwrap();
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity());
        let result = notifier.dispatch(message).await.unwrap();
        assert!(matches!(result, Err(NotifyError::Status(StatusCode::INTERNAL_SERVER_ERROR))));
        assert!(rx.recv().await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_webhook_times_out() {
        let (addr, _rx) = sink(StatusCode::OK, Duration::from_secs(5)).await;
        let notifier = Notifier::new(format!("http://{}/webhook", addr), Duration::from_millis(100)).unwrap();
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity());
        let result = notifier.dispatch(message).await.unwrap();
        assert!(matches!(result, Err(NotifyError::Timeout(_))));
    }

    #[tokio::test]
    async fn unreachable_webhook_is_an_error() {
        let notifier = Notifier::new("http://127.0.0.1:9/webhook".to_string(), Duration::from_secs(2)).unwrap();
        let message = WebhookMessage::compose(&VisitorMetadata::default(), &identity());
        assert!(notifier.send(&message).await.is_err());
    }
}
