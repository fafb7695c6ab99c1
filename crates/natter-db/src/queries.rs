use crate::models::{MessageRow, PartnerRow, UserRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str = "id, full_name, email, password, profile_pic, created_at";
const MESSAGE_COLUMNS: &str =
    "id, sender_id, receiver_id, text, image, status, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, full_name, email, password, profile_pic, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id,
                    user.full_name,
                    user.email,
                    user.password,
                    user.profile_pic,
                    user.created_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Returns false when no such user exists.
    pub fn update_profile_pic(&self, id: &str, profile_pic: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET profile_pic = ?2 WHERE id = ?1",
                (id, profile_pic),
            )?;
            Ok(n == 1)
        })
    }

    /// Every other user, paired with the creation time of the latest message
    /// exchanged with `user_id` in either direction. Unordered.
    pub fn get_conversation_partners(&self, user_id: &str) -> Result<Vec<PartnerRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.full_name, u.email, u.password, u.profile_pic, u.created_at,
                        (SELECT m.created_at FROM messages m
                          WHERE (m.sender_id = ?1 AND m.receiver_id = u.id)
                             OR (m.sender_id = u.id AND m.receiver_id = ?1)
                          ORDER BY m.created_at DESC
                          LIMIT 1) AS last_message_at
                 FROM users u
                 WHERE u.id != ?1",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PartnerRow {
                        user: user_from_row(row)?,
                        last_message_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, text, image, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    msg.id,
                    msg.sender_id,
                    msg.receiver_id,
                    msg.text,
                    msg.image,
                    msg.status,
                    msg.created_at,
                    msg.updated_at
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            conn.query_row(&sql, [id], message_from_row).optional()
        })
    }

    /// `sent → delivered` for one message. Returns false if the message had
    /// already moved past `sent` (or does not exist); nothing is changed then.
    pub fn mark_delivered(&self, id: &str, updated_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET status = 'delivered', updated_at = ?2
                 WHERE id = ?1 AND status = 'sent'",
                (id, updated_at),
            )?;
            Ok(n == 1)
        })
    }

    /// Marks every message from `sender_id` to `receiver_id` that is not yet
    /// seen as seen, in a single statement. Returns the number of rows changed.
    pub fn mark_seen(&self, sender_id: &str, receiver_id: &str, updated_at: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE messages SET status = 'seen', updated_at = ?3
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND status != 'seen'",
                (sender_id, receiver_id, updated_at),
            )?;
            Ok(n)
        })
    }

    /// All messages between two users, newest first.
    pub fn get_messages_between(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at DESC, rowid DESC",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_a, user_b], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    conn.query_row(&sql, [value], user_from_row).optional()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        full_name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        profile_pic: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        image: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
