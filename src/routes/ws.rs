use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::{
    middleware::CurrentUser,
    models::UserId,
    realtime::ConnectionHub,
    routes::AppState,
};

/// GET /ws
///
/// Push-only channel for match events. Inbound frames other than close are ignored.
pub async fn connect(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state.hub, user_id))
}

async fn session(socket: WebSocket, hub: Arc<ConnectionHub>, user_id: UserId) {
    let (handle, mut rx) = hub.connect(user_id).await;
    // Only the hub keeps a sender, so a replacing connection ends this one
    let connection_id = handle.connection_id();
    drop(handle);
    let (mut sender, mut receiver) = socket.split();

    let mut push_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, event = event.kind(), "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut push_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = %e, "WebSocket read failed");
                    break;
                }
            },
        }
    }

    push_task.abort();
    hub.disconnect(user_id, connection_id).await;
}
