//! Server-side rendition of the metadata collector that runs in the login page.
//!
//! Used by the `probe` subcommand to exercise a deployment's `/userinfo`
//! sink with the host's own network details.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::USER_AGENT;
use serde_json::Value;

use crate::{
    error::{CollectError, Error},
    metadata::{format_accessed_at, VisitorMetadata, UNKNOWN},
    USER_AGENT_STRING,
};

pub const IPV4_ECHO_URL: &str = "https://api.ipify.org?format=json";
pub const IPV6_ECHO_URL: &str = "https://api64.ipify.org?format=json";
pub const GEOLOCATION_URL: &str = "https://ipapi.co/json";

/// The three lookup services.
#[derive(Clone, Debug)]
pub struct Endpoints {
    pub ipv4: String,
    pub ipv6: String,
    pub geolocation: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ipv4: IPV4_ECHO_URL.to_string(),
            ipv6: IPV6_ECHO_URL.to_string(),
            geolocation: GEOLOCATION_URL.to_string(),
        }
    }
}

pub struct Collector {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl Collector {
    /// Every lookup, and the final submission, is bounded by `timeout`.
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self { client, endpoints })
    }

    /// Runs the three lookups concurrently. A failed lookup only blanks its own field.
    pub async fn collect(&self, user_agent: &str) -> VisitorMetadata {
        let (ipv4, ipv6, country) = futures::join!(
            self.lookup(&self.endpoints.ipv4, "ip"),
            self.lookup(&self.endpoints.ipv6, "ip"),
            self.lookup(&self.endpoints.geolocation, "country_name"),
        );
        VisitorMetadata {
            ipv4: Some(or_unknown("IPv4", ipv4)),
            ipv6: Some(or_unknown("IPv6", ipv6)),
            country: Some(or_unknown("geolocation", country)),
            user_agent: Some(if user_agent.is_empty() {
                UNKNOWN.to_string()
            } else {
                user_agent.to_string()
            }),
            accessed_at: Some(format_accessed_at(Utc::now())),
        }
    }

    async fn lookup(&self, url: &str, key: &'static str) -> Result<String, CollectError> {
        let json = self
            .client
            .get(url)
            .header(USER_AGENT, USER_AGENT_STRING)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        json.get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(CollectError::MissingField(key))
    }

    /// POSTs the record to a metadata sink. Not retried.
    pub async fn submit(&self, sink_url: &str, metadata: &VisitorMetadata) -> Result<(), CollectError> {
        let response = self
            .client
            .post(sink_url)
            .header(USER_AGENT, USER_AGENT_STRING)
            .json(metadata)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CollectError::Status(response.status()))
        }
    }
}

fn or_unknown(what: &str, result: Result<String, CollectError>) -> String {
    result.unwrap_or_else(|err| {
        warn!("Failed to fetch {}: {}", what, err);
        UNKNOWN.to_string()
    })
}
