//! WebSocket upgrade endpoint (`GET /ws`).
//!
//! Classification (standalone vs web) happens before the upgrade from the
//! request headers and query string; the loopback check drives the
//! localhost auth bypass. Everything after `101 Switching Protocols` lives
//! in [`crate::session`].

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use tracing::debug;

use crate::capabilities::ClientType;
use crate::session;
use crate::state::AppState;

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_type = ClientType::detect(&headers, &params);
    let is_localhost = addr.ip().is_loopback();

    debug!(
        client_type = client_type.as_str(),
        %addr,
        "websocket upgrade"
    );

    ws.on_upgrade(move |socket| session::run_session(socket, state, client_type, is_localhost))
}
