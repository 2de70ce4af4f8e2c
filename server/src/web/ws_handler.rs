use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::error::ChatError;
use crate::engine::events::ChatEvent;
use crate::engine::fanout::ChannelSubscription;

use super::app_state::AppState;

/// GET /api/channels/:id/subscribe: upgrade to a WebSocket that streams
/// every message created in the channel from now on. Unknown channels are
/// refused before the upgrade.
pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<String>,
) -> Result<Response, ChatError> {
    let subscription = state.engine.open_subscription(&channel_id).await?;
    Ok(ws.on_upgrade(move |socket| stream_channel(socket, state, channel_id, subscription)))
}

/// Wait for the next event to forward. A `Closed` event is always the last.
async fn next_event(
    subscription: &mut ChannelSubscription,
    shutdown: &CancellationToken,
) -> ChatEvent {
    tokio::select! {
        _ = shutdown.cancelled() => ChatEvent::Closed {
            reason: "server shutting down".into(),
        },
        message = subscription.recv() => match message {
            Some(message) => ChatEvent::Message(message.as_ref().clone()),
            None => ChatEvent::Closed {
                reason: "subscription ended".into(),
            },
        },
    }
}

async fn stream_channel(
    socket: WebSocket,
    state: Arc<AppState>,
    channel_id: String,
    mut subscription: ChannelSubscription,
) {
    let subscriber = subscription.id();
    let subscribers = state.engine.hub().subscriber_count(&channel_id);
    info!(%channel_id, subscriber, subscribers, "websocket subscribed");

    let (mut sender, mut receiver) = socket.split();
    // Clients only ever send close frames; anything else is ignored.
    let client_gone = CancellationToken::new();
    let reader_gone = client_gone.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        reader_gone.cancel();
    });

    let stop = state.shutdown.child_token();
    loop {
        let event = tokio::select! {
            _ = client_gone.cancelled() => break,
            event = next_event(&mut subscription, &stop) => event,
        };
        let last = matches!(event, ChatEvent::Closed { .. });

        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, %channel_id, "failed to encode event");
                continue;
            }
        };
        if sender.send(Message::Text(frame.into())).await.is_err() {
            debug!(%channel_id, subscriber, "websocket send failed");
            break;
        }
        if last {
            let _ = sender.send(Message::Close(None)).await;
            break;
        }
    }

    reader.abort();
    info!(%channel_id, subscriber, "websocket unsubscribed");
}
