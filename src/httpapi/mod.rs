use std::sync::Arc;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::Reply;

use crate::{auth::Broker, notifier::Notifier, session::SessionStore};

pub mod handlers;
pub mod routes;

/// Everything a request handler needs, passed into the filters explicitly.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub broker: Arc<Broker>,
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(sessions: SessionStore, broker: Broker, notifier: Notifier) -> Self {
        Self {
            sessions,
            broker: Arc::new(broker),
            notifier,
        }
    }
}

/// Acknowledgement returned by the metadata sink.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Status {
    pub status: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// JSON error body.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn reply(status: StatusCode, message: impl Into<String>) -> warp::reply::Response {
        let body = Self {
            error: message.into(),
        };
        let mut response = warp::reply::json(&body).into_response();
        *response.status_mut() = status;
        response
    }
}
