use std::convert::Infallible;

use lazy_static::lazy_static;
use serde_json::Value;
use warp::{
    http::{
        header::{CONTENT_TYPE, SET_COOKIE},
        HeaderValue, StatusCode, Uri,
    },
    hyper::body::Bytes,
    reject::{
        InvalidHeader, InvalidQuery, LengthRequired, MethodNotAllowed, MissingCookie,
        MissingHeader, PayloadTooLarge, UnsupportedMediaType,
    },
    Rejection, Reply,
};

use crate::{
    auth::{AuthResult, CallbackQuery},
    error::Error,
    httpapi::{AppState, ErrorBody, Status},
    metadata::VisitorMetadata,
    notifier::WebhookMessage,
    session::{SessionId, SessionStore},
};

type Result<T> = std::result::Result<T, Rejection>;

pub const CLOSE_TAB_PATH: &str = "/close-tab";
/// How long the success page stays open before closing itself.
pub const CLOSE_TAB_DELAY_MS: u64 = 2000;

const INDEX_HTML: &str = include_str!("../../assets/index.html");
const MAIN_JS: &str = include_str!("../../assets/main.js");

lazy_static! {
    static ref CLOSE_TAB_HTML: String = include_str!("../../assets/close-tab.html")
        .replace("{{delay_ms}}", &CLOSE_TAB_DELAY_MS.to_string());
}

pub async fn index() -> Result<impl Reply> {
    Ok(warp::reply::html(INDEX_HTML))
}

pub async fn script() -> Result<impl Reply> {
    Ok(warp::reply::with_header(
        MAIN_JS,
        CONTENT_TYPE,
        "application/javascript; charset=utf-8",
    ))
}

pub async fn close_tab() -> Result<impl Reply> {
    Ok(warp::reply::html(CLOSE_TAB_HTML.as_str()))
}

/// Stores whatever metadata the client sent in its session, overwriting earlier reports.
///
/// The body is not validated: anything that is not a JSON object is stored as an empty record.
pub async fn userinfo(
    cookie: Option<String>,
    body: Bytes,
    state: AppState,
) -> Result<warp::reply::Response> {
    let value = serde_json::from_slice::<Value>(&body).unwrap_or_else(|err| {
        debug!("Storing empty metadata for unreadable body: {}", err);
        Value::Null
    });
    let metadata = VisitorMetadata::from_value(&value);
    let (session, created) = state.sessions.resolve_or_create(cookie.as_deref()).await;
    state.sessions.put_metadata(session, metadata).await;
    let mut response = warp::reply::json(&Status::ok()).into_response();
    if created {
        attach_cookie(&mut response, &state.sessions, &session)?;
    }
    Ok(response)
}

/// Sends the visitor to the provider's consent page.
pub async fn auth_start(cookie: Option<String>, state: AppState) -> Result<warp::reply::Response> {
    let (session, created) = state.sessions.resolve_or_create(cookie.as_deref()).await;
    let url = state.broker.start(session).await;
    let uri = url
        .as_str()
        .parse::<Uri>()
        .map_err(|_| warp::reject::custom(Error::InvalidRedirect))?;
    let mut response = warp::redirect::found(uri).into_response();
    if created {
        attach_cookie(&mut response, &state.sessions, &session)?;
    }
    Ok(response)
}

/// Finishes the login and notifies the webhook; failures go back to the start page.
pub async fn auth_callback(
    cookie: Option<String>,
    query: CallbackQuery,
    state: AppState,
) -> Result<warp::reply::Response> {
    let session = state.sessions.resolve(cookie.as_deref()).await;
    match state.broker.callback(session, query).await {
        AuthResult::Authenticated(identity) => {
            let metadata = match session {
                Some(session) => state.sessions.take_metadata(session).await,
                None => None,
            }
            .unwrap_or_default();
            info!(
                "{} (ID: {}) logged in",
                identity.username, identity.external_id
            );
            // Not awaited: the redirect below must not wait on webhook latency.
            let _ = state
                .notifier
                .dispatch(WebhookMessage::compose(&metadata, &identity));
            Ok(warp::redirect::found(Uri::from_static(CLOSE_TAB_PATH)).into_response())
        }
        AuthResult::Failed(reason) => {
            warn!("Login failed: {}", reason);
            Ok(warp::redirect::found(Uri::from_static("/")).into_response())
        }
    }
}

fn attach_cookie(
    response: &mut warp::reply::Response,
    sessions: &SessionStore,
    session: &SessionId,
) -> Result<()> {
    let value = HeaderValue::from_str(&sessions.set_cookie_header(session))
        .map_err(|_| warp::reject::custom(Error::InvalidHeader))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    Ok(if err.is_not_found() {
        ErrorBody::reply(StatusCode::NOT_FOUND, "not found")
    } else if let Some(error) = err.find::<Error>() {
        let status = StatusCode::from(error);
        if status.is_server_error() {
            error!("Request failed: {}", error);
        } else {
            debug!("Request refused: {}", error);
        }
        ErrorBody::reply(status, error.to_string())
    } else if let Some(e) = err.find::<InvalidQuery>() {
        ErrorBody::reply(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<InvalidHeader>() {
        ErrorBody::reply(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<MissingHeader>() {
        ErrorBody::reply(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<MissingCookie>() {
        ErrorBody::reply(StatusCode::BAD_REQUEST, e.to_string())
    } else if let Some(e) = err.find::<LengthRequired>() {
        ErrorBody::reply(StatusCode::LENGTH_REQUIRED, e.to_string())
    } else if let Some(e) = err.find::<UnsupportedMediaType>() {
        ErrorBody::reply(StatusCode::UNSUPPORTED_MEDIA_TYPE, e.to_string())
    } else if err.find::<PayloadTooLarge>().is_some() {
        ErrorBody::reply(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
    } else if err.find::<MethodNotAllowed>().is_some() {
        ErrorBody::reply(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!("Unhandled rejection: {:?}", err);
        ErrorBody::reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })
}
