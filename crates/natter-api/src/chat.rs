//! Message status pipeline and conversation queries.
//!
//! Messages advance `sent → delivered → seen` and never move back. A message
//! becomes `delivered` only when its receiver has a live gateway connection at
//! send time, and `seen` only through an explicit [`mark_seen`]. Fetching a
//! conversation does not change any status.
//!
//! Realtime pushes go through the [`Dispatcher`] and are fire-and-forget: a
//! receiver that disconnects between lookup and push simply misses the event.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use natter_db::models::MessageRow;
use natter_db::{Database, format_timestamp, parse_timestamp};
use natter_gateway::{ConnectionHandle, Dispatcher};
use natter_types::events::GatewayEvent;
use natter_types::models::{Message, MessageStatus, SidebarUser};

use crate::error::ApiError;
use crate::state::db_call;

/// Store a new message from `sender` to `receiver` and, if the receiver is
/// connected, advance it to `delivered` and push it to them.
///
/// `image` is an already-hosted URL. Blank text is treated as absent.
pub async fn send_message(
    db: &Arc<Database>,
    relay: &Dispatcher,
    sender: Uuid,
    receiver: Uuid,
    text: Option<String>,
    image: Option<String>,
) -> Result<Message, ApiError> {
    let text = text.filter(|t| !t.trim().is_empty());
    if text.is_none() && image.is_none() {
        return Err(ApiError::Invalid("message has neither text nor image".into()));
    }

    let rid = receiver.to_string();
    let receiver_exists = db_call(db, move |db| Ok(db.get_user_by_id(&rid)?.is_some())).await?;
    if !receiver_exists {
        return Err(ApiError::NotFound(format!("receiver {}", receiver)));
    }

    let created_at = now();
    let mut message = Message {
        id: Uuid::new_v4(),
        sender_id: sender,
        receiver_id: receiver,
        text,
        image,
        status: MessageStatus::Sent,
        created_at,
        updated_at: created_at,
    };

    let row = to_row(&message);
    db_call(db, move |db| db.insert_message(&row)).await?;

    if let Some(conn) = relay.lookup(receiver).await {
        message = deliver(db, &conn, message).await?;
    }

    info!("{} -> {}: message {} ({})", sender, receiver, message.id, message.status);
    Ok(message)
}

/// Advance a stored message to `delivered` and push it over `conn`.
///
/// If the row moved on in the meantime (the receiver marked the conversation
/// seen between insert and delivery) the stored state is pushed and returned
/// instead, so callers never report a status older than the row's.
pub async fn deliver(
    db: &Arc<Database>,
    conn: &ConnectionHandle,
    mut message: Message,
) -> Result<Message, ApiError> {
    if message.status.can_advance_to(MessageStatus::Delivered) {
        let delivered_at = now();
        let mid = message.id.to_string();
        let stamp = format_timestamp(delivered_at);
        let advanced = db_call(db, move |db| db.mark_delivered(&mid, &stamp)).await?;

        if advanced {
            message.status = MessageStatus::Delivered;
            message.updated_at = delivered_at;
        } else {
            let mid = message.id.to_string();
            let stored = db_call(db, move |db| db.get_message(&mid))
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("message {}", message.id)))?;
            message = stored.into_message()?;
        }
    }

    conn.notify(GatewayEvent::NewMessage(message.clone()));
    debug!("Message {} pushed to {}", message.id, message.receiver_id);
    Ok(message)
}

/// `viewer` has seen everything `other` sent them. Marks all such messages
/// `seen` in one update and tells `other` if they are connected.
/// Returns how many messages changed; a repeated call returns 0.
pub async fn mark_seen(
    db: &Arc<Database>,
    relay: &Dispatcher,
    viewer: Uuid,
    other: Uuid,
) -> Result<usize, ApiError> {
    let (sid, rid) = (other.to_string(), viewer.to_string());
    let stamp = format_timestamp(now());
    let updated = db_call(db, move |db| db.mark_seen(&sid, &rid, &stamp)).await?;

    relay
        .send_to_user(other, GatewayEvent::MessagesSeen { by: viewer })
        .await;

    debug!("{} saw {} messages from {}", viewer, updated, other);
    Ok(updated)
}

/// Every other user with the time of the last message exchanged with `user`,
/// most recent first. Users never talked to sort last.
pub async fn list_conversation_partners(
    db: &Arc<Database>,
    user: Uuid,
) -> Result<Vec<SidebarUser>, ApiError> {
    let uid = user.to_string();
    let rows = db_call(db, move |db| db.get_conversation_partners(&uid)).await?;

    let mut partners = rows
        .into_iter()
        .map(|row| -> anyhow::Result<SidebarUser> {
            let last_message = row.last_message_at.as_deref().map(parse_timestamp).transpose()?;
            Ok(SidebarUser {
                user: row.user.into_profile()?,
                last_message,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    sort_by_last_message(&mut partners);
    Ok(partners)
}

/// Stable sort, newest conversation first; no message counts as the epoch.
pub fn sort_by_last_message(partners: &mut [SidebarUser]) {
    partners.sort_by_key(|p| std::cmp::Reverse(p.last_message.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)));
}

/// All messages between two users, newest first.
pub async fn list_messages(
    db: &Arc<Database>,
    user_a: Uuid,
    user_b: Uuid,
) -> Result<Vec<Message>, ApiError> {
    let (a, b) = (user_a.to_string(), user_b.to_string());
    let rows = db_call(db, move |db| db.get_messages_between(&a, &b)).await?;

    let messages = rows
        .into_iter()
        .map(MessageRow::into_message)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(messages)
}

/// Current time at the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn to_row(message: &Message) -> MessageRow {
    MessageRow {
        id: message.id.to_string(),
        sender_id: message.sender_id.to_string(),
        receiver_id: message.receiver_id.to_string(),
        text: message.text.clone(),
        image: message.image.clone(),
        status: message.status.as_str().to_string(),
        created_at: format_timestamp(message.created_at),
        updated_at: format_timestamp(message.updated_at),
    }
}
