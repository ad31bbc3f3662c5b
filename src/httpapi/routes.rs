use std::convert::Infallible;

use futures::{pin_mut, Stream, StreamExt};
use warp::{hyper::body::Bytes, path, Buf, Filter, Rejection, Reply};

use crate::{
    auth::CallbackQuery, error::Error, httpapi::handlers, httpapi::AppState, session::COOKIE_NAME,
};

/// Largest metadata body the sink accepts.
const USERINFO_BODY_LIMIT: u64 = 16 * 1024;

/// Every route matches its path before its method so unknown paths stay 404 instead of 405.
pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let log = warp::log("login_notifier::httpapi");

    pages()
        .or(userinfo(state.clone()))
        .or(auth_start(state.clone()))
        .or(auth_callback(state))
        .recover(handlers::handle_rejection)
        .with(log)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

fn pages() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let index = path::end().and(warp::get()).and_then(handlers::index);
    let script = path!("assets" / "main.js")
        .and(warp::get())
        .and_then(handlers::script);
    let close_tab = path!("close-tab")
        .and(warp::get())
        .and_then(handlers::close_tab);
    index.or(script).or(close_tab)
}

fn userinfo(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    path!("userinfo")
        .and(warp::post())
        .and(warp::cookie::optional::<String>(COOKIE_NAME))
        .and(capped_body(USERINFO_BODY_LIMIT))
        .and(with_state(state))
        .and_then(handlers::userinfo)
}

fn auth_start(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    path!("auth" / "start")
        .or(path!("auth" / "discord"))
        .unify()
        .and(warp::get())
        .and(warp::cookie::optional::<String>(COOKIE_NAME))
        .and(with_state(state))
        .and_then(handlers::auth_start)
}

fn auth_callback(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    path!("auth" / "callback")
        .or(path!("auth" / "discord" / "callback"))
        .unify()
        .and(warp::get())
        .and(warp::cookie::optional::<String>(COOKIE_NAME))
        .and(callback_query())
        .and(with_state(state))
        .and_then(handlers::auth_callback)
}

/// Callback parameters, read leniently so a malformed query still reaches the broker.
fn callback_query() -> impl Filter<Extract = (CallbackQuery,), Error = Infallible> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
        .map(|raw: String| CallbackQuery::from_raw(&raw))
}

/// Request body of at most `limit` bytes, whether or not it declares a `Content-Length`.
fn capped_body(limit: u64) -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::header::optional::<u64>("content-length")
        .and(warp::body::stream())
        .and_then(move |declared: Option<u64>, body| async move {
            if declared.map_or(false, |len| len > limit) {
                return Err(warp::reject::custom(Error::BodyTooLarge(limit)));
            }
            read_capped(body, limit).await.map_err(warp::reject::custom)
        })
}

async fn read_capped<S, B>(body: S, limit: u64) -> Result<Bytes, Error>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    pin_mut!(body);
    let mut read = Vec::new();
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(|_| Error::BodyUnreadable)?;
        if (read.len() + chunk.remaining()) as u64 > limit {
            return Err(Error::BodyTooLarge(limit));
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let len = part.len();
            read.extend_from_slice(part);
            chunk.advance(len);
        }
    }
    Ok(Bytes::from(read))
}
