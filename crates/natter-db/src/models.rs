//! Database row types. These map directly to SQLite rows.
//! Conversion into natter-types models happens at the edge, through
//! `into_profile` / `into_message`.

use anyhow::{Context, Result};
use natter_types::models::{Message, MessageStatus, UserProfile};

use crate::parse_timestamp;

#[derive(Clone)]
pub struct UserRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub profile_pic: String,
    pub created_at: String,
}

impl UserRow {
    pub fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            id: self.id.parse().with_context(|| format!("corrupt user id '{}'", self.id))?,
            created_at: parse_timestamp(&self.created_at)?,
            full_name: self.full_name,
            email: self.email,
            profile_pic: self.profile_pic,
        })
    }
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: Option<String>,
    pub image: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id.parse().with_context(|| format!("corrupt message id '{}'", self.id))?,
            sender_id: self
                .sender_id
                .parse()
                .with_context(|| format!("corrupt sender_id on message '{}'", self.id))?,
            receiver_id: self
                .receiver_id
                .parse()
                .with_context(|| format!("corrupt receiver_id on message '{}'", self.id))?,
            status: self.status.parse::<MessageStatus>()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            text: self.text,
            image: self.image,
        })
    }
}

/// A conversation partner with the creation time of the latest message
/// exchanged with the requesting user (None when they never talked).
pub struct PartnerRow {
    pub user: UserRow,
    pub last_message_at: Option<String>,
}
