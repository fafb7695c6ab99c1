use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use natter_types::api::Claims;
use natter_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a WebSocket whose token was already validated at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid) {
    let (sender, receiver) = socket.split();
    info!("{} connected to gateway (pre-authenticated)", user_id);
    run_connection_loop(sender, receiver, dispatcher, user_id).await;
}

/// Handle a WebSocket that must identify itself with a token first.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (sender, mut receiver) = socket.split();

    let Some(user_id) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    info!("{} connected to gateway", user_id);
    run_connection_loop(sender, receiver, dispatcher, user_id).await;
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(e) => {
            warn!("Failed to encode gateway event: {}", e);
            None
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match encode(event) {
        Some(msg) => sender.send(msg).await.is_ok(),
        // Unencodable events are skipped, the socket stays up
        None => true,
    }
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
) {
    if !send_event(&mut sender, &GatewayEvent::Ready { user_id }).await {
        return;
    }

    let (conn_id, mut user_rx) = dispatcher.register(user_id).await;

    // Subscribe before announcing so this client gets the online list too
    let mut broadcast_rx = dispatcher.subscribe();
    dispatcher.user_online(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if !send_event(&mut sender, &event).await {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if !send_event(&mut sender, &event).await {
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
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&dispatcher_recv, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

/// Decode and validate a session token (HS256, expiry checked).
pub fn decode_claims(token: &str, jwt_secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
}

/// Decode a token into the user it was issued to.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Uuid> {
    decode_claims(token, jwt_secret).ok().map(|claims| claims.sub)
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Some(user_id) = identify_user(text.as_str(), jwt_secret) {
                    return Some(user_id);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

/// The user an `identify` frame authenticates, if it is one and its token is valid.
/// Any other frame before identification is ignored.
fn identify_user(frame: &str, jwt_secret: &str) -> Option<Uuid> {
    match serde_json::from_str::<GatewayCommand>(frame) {
        Ok(GatewayCommand::Identify { token }) => verify_token(&token, jwt_secret),
        _ => None,
    }
}

async fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Typing { receiver_id } => {
            if !dispatcher.relay_typing(user_id, receiver_id, true).await {
                debug!("{} typing to offline {}, dropped", user_id, receiver_id);
            }
        }

        GatewayCommand::StopTyping { receiver_id } => {
            if !dispatcher.relay_typing(user_id, receiver_id, false).await {
                debug!("{} stopTyping to offline {}, dropped", user_id, receiver_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret";

    fn token_for(user_id: Uuid, secret: &str, expires_in_secs: i64) -> String {
        let exp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
            + expires_in_secs;
        let claims = Claims {
            sub: user_id,
            email: "alice@example.com".into(),
            exp: exp as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn valid_token_yields_its_subject() {
        let alice = Uuid::new_v4();
        let token = token_for(alice, SECRET, 3600);

        assert_eq!(verify_token(&token, SECRET), Some(alice));
        assert_eq!(decode_claims(&token, SECRET).unwrap().email, "alice@example.com");
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let alice = Uuid::new_v4();

        assert_eq!(verify_token(&token_for(alice, "other-secret", 3600), SECRET), None);
        // Well past the default 60s leeway
        assert_eq!(verify_token(&token_for(alice, SECRET, -3600), SECRET), None);
        assert_eq!(verify_token("not.a.jwt", SECRET), None);
    }

    #[test]
    fn identify_frame_binds_token_subject() {
        let alice = Uuid::new_v4();
        let frame = format!(r#"{{"type":"identify","data":{{"token":"{}"}}}}"#, token_for(alice, SECRET, 3600));
        assert_eq!(identify_user(&frame, SECRET), Some(alice));

        let forged = format!(r#"{{"type":"identify","data":{{"token":"{}"}}}}"#, token_for(alice, "forged", 3600));
        assert_eq!(identify_user(&forged, SECRET), None);

        let typing = format!(r#"{{"type":"typing","data":{{"receiverId":"{}"}}}}"#, Uuid::new_v4());
        assert_eq!(identify_user(&typing, SECRET), None);
        assert_eq!(identify_user("garbage", SECRET), None);
    }

    #[tokio::test]
    async fn typing_commands_reach_only_the_named_receiver() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (_conn, mut bob_rx) = dispatcher.register(bob).await;
        let (_conn, mut alice_rx) = dispatcher.register(alice).await;

        handle_command(&dispatcher, alice, GatewayCommand::Typing { receiver_id: bob }).await;
        handle_command(&dispatcher, alice, GatewayCommand::StopTyping { receiver_id: bob }).await;

        assert_eq!(bob_rx.try_recv().unwrap(), GatewayEvent::Typing { sender_id: alice });
        assert_eq!(bob_rx.try_recv().unwrap(), GatewayEvent::StopTyping { sender_id: alice });
        assert!(bob_rx.try_recv().is_err());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_to_absent_receiver_is_dropped() {
        let dispatcher = Dispatcher::new();
        let alice = Uuid::new_v4();
        let (_conn, mut alice_rx) = dispatcher.register(alice).await;

        handle_command(&dispatcher, alice, GatewayCommand::Typing { receiver_id: Uuid::new_v4() }).await;
        handle_command(&dispatcher, alice, GatewayCommand::StopTyping { receiver_id: Uuid::new_v4() }).await;

        assert!(alice_rx.try_recv().is_err());
    }
}
