use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public profile of a registered user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub profile_pic: String,
    pub created_at: DateTime<Utc>,
}

/// Delivery state of a message. Variants are declared in pipeline order so
/// the derived `Ord` matches the only legal direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    /// A status may only move strictly forward.
    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for MessageStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the conversation sidebar: a partner and the time of the last
/// message exchanged with them, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarUser {
    #[serde(flatten)]
    pub user: UserProfile,
    pub last_message: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        use MessageStatus::*;

        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Seen));
        assert!(Delivered.can_advance_to(Seen));

        assert!(!Seen.can_advance_to(Delivered));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Delivered.can_advance_to(Delivered));
    }

    #[test]
    fn status_parses_its_own_output() {
        for status in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(status.as_str().parse::<MessageStatus>().unwrap(), status);
        }
        assert!("read".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn image_only_message_omits_text() {
        let now = Utc::now();
        let msg = Message {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            text: None,
            image: Some("https://img.example/cat.png".into()),
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("text").is_none());
        assert_eq!(json["image"], "https://img.example/cat.png");
        assert_eq!(json["status"], "sent");
        assert!(json.get("_id").is_some());
        assert!(json.get("senderId").is_some());
    }

    #[test]
    fn sidebar_user_flattens_profile() {
        let entry = SidebarUser {
            user: UserProfile {
                id: Uuid::new_v4(),
                full_name: "Ada Lovelace".into(),
                email: "ada@example.com".into(),
                profile_pic: String::new(),
                created_at: Utc::now(),
            },
            last_message: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["fullName"], "Ada Lovelace");
        assert!(json["lastMessage"].is_null());
    }
}
