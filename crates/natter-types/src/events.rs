use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms the connection is bound to a user
    Ready { user_id: Uuid },

    /// Everyone currently connected
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers { user_ids: Vec<Uuid> },

    /// A message addressed to this user was delivered
    NewMessage(Message),

    /// The other party has seen this user's messages
    MessagesSeen { by: Uuid },

    /// The other party started typing
    Typing { sender_id: Uuid },

    /// The other party stopped typing
    StopTyping { sender_id: Uuid },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GatewayCommand {
    /// Bind the connection to a user when no token came with the upgrade
    Identify { token: String },

    Typing { receiver_id: Uuid },

    StopTyping { receiver_id: Uuid },
}
