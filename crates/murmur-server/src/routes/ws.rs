//! Live delivery channel. Clients authenticate with a token query
//! parameter because browsers cannot set headers on WebSocket upgrades.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use murmur_auth::Claims;
use murmur_schema::{delivery_channel, DeliveryEvent};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::state::AppState;

const CLOSE_INVALID_TOKEN: u16 = 4001;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", any(upgrade))
}

async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.tokens.verify(&params.token) {
        Some(claims) => ws.on_upgrade(move |socket| serve_connection(state, claims, socket)),
        None => ws.on_upgrade(reject_connection),
    }
}

/// The upgrade has to complete before a close code can be sent, so bad
/// tokens get a connection that closes immediately with 4001.
async fn reject_connection(mut socket: WebSocket) {
    warn!("websocket rejected: invalid token");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_INVALID_TOKEN,
            reason: "invalid token".into(),
        })))
        .await;
}

async fn serve_connection(state: AppState, claims: Claims, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let mut events = state.bus.subscribe(claims.tenant_id, claims.user_id).await;

    info!(
        user_id = claims.user_id,
        tenant_id = claims.tenant_id,
        "websocket connected"
    );
    let hello = DeliveryEvent::Connected {
        user_id: claims.user_id,
        tenant_id: claims.tenant_id,
    };
    if send_event(&mut sink, &hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if send_event(&mut sink, &event).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // This channel is outbound-only; ignore anything else.
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(
        user_id = claims.user_id,
        tenant_id = claims.tenant_id,
        channel = %delivery_channel(claims.tenant_id, claims.user_id, "*"),
        "websocket disconnected"
    );
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &DeliveryEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
