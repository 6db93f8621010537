use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            username    TEXT NOT NULL,
            password    TEXT NOT NULL,
            is_admin    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS threads (
            id              TEXT PRIMARY KEY,
            participant_a   TEXT NOT NULL REFERENCES users(id),
            participant_b   TEXT NOT NULL REFERENCES users(id),
            subject         TEXT,
            created_at      TEXT NOT NULL
        );

        -- No uniqueness on the participant pair: the same two users may
        -- open any number of threads.
        CREATE INDEX IF NOT EXISTS idx_threads_participant_a
            ON threads(participant_a);
        CREATE INDEX IF NOT EXISTS idx_threads_participant_b
            ON threads(participant_b);

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            thread_id   TEXT NOT NULL REFERENCES threads(id),
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, created_at, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
