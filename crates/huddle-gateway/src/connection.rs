use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use huddle_types::error::ChatError;
use huddle_types::events::{ClientEvent, ServerEvent};

use crate::auth::Identity;
use crate::gateway::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// The handshake frame must arrive within this window.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Drive one WebSocket connection from handshake to teardown.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: wait for the auth frame
    let identity = match wait_for_auth(&mut receiver, &gateway).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("WebSocket client failed to authenticate: {:?}", e);
            // Every handshake failure looks the same to the client
            let rejected = ServerEvent::Error(ChatError::Unauthorized.to_string());
            let _ = send_event(&mut sender, &rejected).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut session, mut outbox) = gateway.open_session(&identity);
    let session_id = session.id();
    let user_id = identity.user_id.clone();
    info!("{} ({}) connected to gateway", user_id, session_id);

    // Step 2: send Ready
    let ready = ServerEvent::Ready {
        user_id: user_id.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let scope = session.scope().clone();
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    // Outbound: routed events and heartbeat pings
    let send_scope = scope.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                _ = send_scope.cancelled() => break,
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Inbound: client events, processed one at a time in arrival order.
    // Cancellation is only observed between frames, so an event that has
    // started always runs to completion.
    let recv_scope = scope.clone();
    let recv_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                biased;
                _ = recv_scope.cancelled() => break,
                frame = receiver.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => recv_gateway.handle_event(&mut session, event).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad event: {} -- raw: {}",
                            session.user_id(),
                            session.id(),
                            e,
                            truncate(&text, 200)
                        );
                        session.send(ServerEvent::Error("Invalid event".into()));
                    }
                },
                Some(Ok(Message::Pong(_))) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
        session.close();
        debug!("{} ({}) receive loop ended", session.user_id(), session.id());
    });

    // Whichever side ends first, stop the other and wait for it to finish
    tokio::select! {
        _ = &mut send_task => {
            scope.cancel();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            scope.cancel();
            let _ = send_task.await;
        }
    }

    info!("{} ({}) disconnected from gateway", user_id, session_id);
}

/// The first text frame must be `auth`. Anything else, or silence past the
/// timeout, rejects the connection.
async fn wait_for_auth(receiver: &mut WsReceiver, gateway: &Gateway) -> Result<Identity, ChatError> {
    let first = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => return serde_json::from_str::<ClientEvent>(&text).ok(),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    match first {
        Some(ClientEvent::Auth(auth)) => gateway.authenticate(&auth).await,
        _ => Err(ChatError::Unauthorized),
    }
}

async fn send_event(sender: &mut WsSender, event: &ServerEvent) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            error!("failed to encode {} event: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::Router;
    use axum::extract::{State, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use serde_json::{Value, json};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as ClientMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use huddle_db::Database;

    use crate::auth::Authenticator;
    use crate::registry::RoomKey;
    use crate::store::MessageStore;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn gateway_with_db() -> (Gateway, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gateway = Gateway::new(MessageStore::new(db.clone()), Authenticator::presence_only());
        (gateway, db)
    }

    async fn upgrade(State(gateway): State<Gateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
        ws.on_upgrade(move |socket| handle_connection(socket, gateway))
    }

    async fn serve(gateway: Gateway) -> String {
        let app = Router::new().route("/socket", get(upgrade)).with_state(gateway);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{}/socket", addr)
    }

    async fn connect(url: &str) -> Client {
        connect_async(url).await.unwrap().0
    }

    async fn send_json(client: &mut Client, value: Value) {
        client.send(ClientMessage::text(value.to_string())).await.unwrap();
    }

    /// Next text frame as JSON, or `None` once the server has closed.
    async fn next_json(client: &mut Client) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await
                .expect("no frame within 5s");
            match frame {
                Some(Ok(ClientMessage::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
                Some(Ok(ClientMessage::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => {}
            }
        }
    }

    async fn authenticated(url: &str, user: &str) -> Client {
        let mut client = connect(url).await;
        send_json(&mut client, json!({ "type": "auth", "data": { "userId": user } })).await;
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "ready", "data": { "userId": user } }))
        );
        client
    }

    #[tokio::test]
    async fn first_frame_other_than_auth_is_rejected_and_closed() {
        let (gateway, _db) = gateway_with_db();
        let url = serve(gateway.clone()).await;
        let mut client = connect(&url).await;

        send_json(&mut client, json!({ "type": "join_channels" })).await;
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "error", "data": "Unauthorized" }))
        );
        assert_eq!(next_json(&mut client).await, None);
        assert_eq!(gateway.registry().room_count(), 0);
    }

    #[tokio::test]
    async fn handshake_without_user_id_is_rejected_and_closed() {
        let (gateway, _db) = gateway_with_db();
        let url = serve(gateway).await;
        let mut client = connect(&url).await;

        send_json(&mut client, json!({ "type": "auth", "data": {} })).await;
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "error", "data": "Unauthorized" }))
        );
        assert_eq!(next_json(&mut client).await, None);
    }

    #[tokio::test]
    async fn handshake_storage_failure_reads_as_unauthorized() {
        let (gateway, db) = gateway_with_db();
        db.with_conn(|conn| Ok(conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE users;")?))
            .unwrap();
        let url = serve(gateway).await;
        let mut client = connect(&url).await;

        send_json(&mut client, json!({ "type": "auth", "data": { "userId": "alice" } })).await;
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "error", "data": "Unauthorized" }))
        );
        assert_eq!(next_json(&mut client).await, None);
    }

    #[tokio::test]
    async fn accepted_handshake_gets_ready() {
        let (gateway, _db) = gateway_with_db();
        let url = serve(gateway).await;
        let _client = authenticated(&url, "alice").await;
    }

    #[tokio::test]
    async fn garbage_frame_is_reported_and_connection_keeps_working() {
        let (gateway, _db) = gateway_with_db();
        let url = serve(gateway).await;
        let mut client = authenticated(&url, "alice").await;

        send_json(&mut client, json!({ "type": "join_channels" })).await;
        client.send(ClientMessage::text("{not json")).await.unwrap();
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "error", "data": "Invalid event" }))
        );

        send_json(
            &mut client,
            json!({ "type": "message", "data": { "content": "still here", "channelId": "general" } }),
        )
        .await;
        let event = next_json(&mut client).await.unwrap();
        assert_eq!(event["type"], "message");
        assert_eq!(event["data"]["content"], "still here");
        assert_eq!(event["data"]["userId"], "alice");
    }

    #[tokio::test]
    async fn client_close_releases_memberships() {
        let (gateway, _db) = gateway_with_db();
        let url = serve(gateway.clone()).await;
        let mut client = authenticated(&url, "alice").await;

        send_json(&mut client, json!({ "type": "join_channels" })).await;
        // An error round trip orders the join before the close
        send_json(&mut client, json!({ "type": "join_channel", "data": "nope" })).await;
        assert_eq!(
            next_json(&mut client).await,
            Some(json!({ "type": "error", "data": "Channel not found" }))
        );
        let inbox = RoomKey::User("alice".into());
        assert_eq!(gateway.registry().members_of(&inbox).len(), 1);

        client.close(None).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while gateway.registry().room_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("memberships still held after close");
        assert!(gateway.registry().members_of(&inbox).is_empty());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("ééé", 2), "éé");
    }
}
