use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::http::state::HttpState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(st): State<HttpState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// Push every detection event to the client until either side goes away.
/// Client messages are read only to notice the disconnect.
async fn handle_socket(mut socket: WebSocket, st: HttpState) {
    let mut rx = st.detection.subscribe();
    debug!(subscribers = st.detection.subscriber_count(), "realtime client connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "failed to serialize detection event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "realtime client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("realtime client disconnected");
}
