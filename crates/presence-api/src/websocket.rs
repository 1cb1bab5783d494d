//! WebSocket handler streaming engine events

use automation_engine::PresenceEvent;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::AppState;

/// Frames sent to clients
#[derive(Serialize)]
#[serde(untagged)]
enum WsFrame {
    Connected { r#type: &'static str },
    Event(PresenceEvent),
}

fn encode(frame: &WsFrame) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!("Failed to encode websocket frame: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before greeting so no event falls between the two
    let mut event_rx = state.engine.subscribe();

    if let Some(connected) = encode(&WsFrame::Connected { r#type: "connected" }) {
        if sender.send(Message::Text(connected)).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let Some(json) = encode(&WsFrame::Event(event)) else {
                        continue;
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("WebSocket client lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Clients only ever close the stream
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_share_type_tag() {
        let connected = encode(&WsFrame::Connected { r#type: "connected" }).unwrap();
        assert_eq!(connected, r#"{"type":"connected"}"#);

        let event = encode(&WsFrame::Event(PresenceEvent::CommandFired {
            id: "tv/office".to_string(),
        }))
        .unwrap();
        let json: serde_json::Value = serde_json::from_str(&event).unwrap();
        assert_eq!(json["type"], "command_fired");
        assert_eq!(json["id"], "tv/office");
    }
}
