use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                full_name   TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                profile_pic TEXT NOT NULL DEFAULT '',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                sender_id   TEXT NOT NULL REFERENCES users(id),
                receiver_id TEXT NOT NULL REFERENCES users(id),
                text        TEXT,
                image       TEXT,
                status      TEXT NOT NULL DEFAULT 'sent'
                            CHECK (status IN ('sent', 'delivered', 'seen')),
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_pair
                ON messages(sender_id, receiver_id, created_at);

            CREATE INDEX idx_messages_receiver
                ON messages(receiver_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (message invariants)");
        conn.execute_batch(
            "
            CREATE TRIGGER messages_status_forward_only
            BEFORE UPDATE OF status ON messages
            WHEN (CASE NEW.status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END)
               < (CASE OLD.status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 ELSE 2 END)
            BEGIN
                SELECT RAISE(ABORT, 'message status cannot regress');
            END;

            CREATE TRIGGER messages_pair_immutable
            BEFORE UPDATE OF sender_id, receiver_id ON messages
            WHEN NEW.sender_id != OLD.sender_id OR NEW.receiver_id != OLD.receiver_id
            BEGIN
                SELECT RAISE(ABORT, 'message participants are immutable');
            END;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
