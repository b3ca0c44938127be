//! HTTP routes for the link, unlink and redirect endpoints.
//!
//! | route    | response                                               |
//! |----------|--------------------------------------------------------|
//! | link     | `303` to the authorization URL, sets the grant cookie  |
//! | unlink   | `303` to the authorization URL, sets the grant cookie  |
//! | redirect | `201` with a confirmation, or the error status; clears the grant cookie |

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum_extra::extract::cookie::CookieJar;
use nclink_oauth::{AuthError, CallbackParams, CompletionHandler};
use tracing::debug;

use crate::state::AppState;

/// Builds the router serving the three flow routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(&state.routes.link, get(link))
        .route(&state.routes.unlink, get(unlink))
        .route(&state.routes.redirect, get(redirect))
        .with_state(state)
}

async fn link(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    start(&state, jar, CompletionHandler::Link)
}

async fn unlink(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, Redirect) {
    start(&state, jar, CompletionHandler::Unlink)
}

fn start(state: &AppState, jar: CookieJar, handler: CompletionHandler) -> (CookieJar, Redirect) {
    let initiation = state.controller.initiate(handler);
    (
        jar.add(initiation.cookie),
        Redirect::to(&initiation.redirect_url),
    )
}

async fn redirect(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> (CookieJar, (StatusCode, String)) {
    let grant = jar
        .get(state.controller.cookie_name())
        .map(|cookie| cookie.value().to_string());
    debug!(has_cookie = grant.is_some(), "callback received");

    let response = state.controller.callback(grant.as_deref(), params).await;
    let reply = match response.result {
        Ok(outcome) => (StatusCode::CREATED, outcome.message()),
        Err(e) => (status_for(&e), e.public_message()),
    };

    (jar.add(response.clear_cookie), reply)
}

fn status_for(error: &AuthError) -> StatusCode {
    StatusCode::from_u16(error.code().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
