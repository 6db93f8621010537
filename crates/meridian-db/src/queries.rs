use crate::Database;
use crate::models::{MessageRow, ThreadRow, ThreadSummaryRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, username, password, is_admin) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, email, username, password_hash, is_admin],
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

    // -- Threads --

    /// Create a thread and its first message in one transaction. A thread is
    /// never observable without at least one message.
    #[allow(clippy::too_many_arguments)]
    pub fn create_thread_with_message(
        &self,
        thread_id: &str,
        participant_a: &str,
        participant_b: &str,
        subject: Option<&str>,
        message_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO threads (id, participant_a, participant_b, subject, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![thread_id, participant_a, participant_b, subject, created_at],
            )?;
            tx.execute(
                "INSERT INTO messages (id, thread_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![message_id, thread_id, participant_a, content, created_at],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, participant_a, participant_b, subject, created_at
                 FROM threads WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([thread_id], |row| {
                    Ok(ThreadRow {
                        id: row.get(0)?,
                        participant_a: row.get(1)?,
                        participant_b: row.get(2)?,
                        subject: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    /// All threads the user participates in, most recent activity first.
    /// The counterpart participant is joined in so the caller never does a
    /// second lookup per thread.
    pub fn list_threads_for_user(&self, user_id: &str) -> Result<Vec<ThreadSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.subject, u.id, u.email, u.username, t.created_at,
                        COALESCE(MAX(m.created_at), t.created_at) AS last_activity
                 FROM threads t
                 JOIN users u ON u.id = CASE
                     WHEN t.participant_a = ?1 THEN t.participant_b
                     ELSE t.participant_a
                 END
                 LEFT JOIN messages m ON m.thread_id = t.id
                 WHERE t.participant_a = ?1 OR t.participant_b = ?1
                 GROUP BY t.id
                 ORDER BY last_activity DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ThreadSummaryRow {
                        id: row.get(0)?,
                        subject: row.get(1)?,
                        counterpart_id: row.get(2)?,
                        counterpart_email: row.get(3)?,
                        counterpart_username: row.get(4)?,
                        created_at: row.get(5)?,
                        last_activity: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        thread_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, thread_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, thread_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_thread_messages(&self, thread_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_thread_messages(conn, thread_id))
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is always a literal from this module, never user input.
    let sql = format!(
        "SELECT id, email, username, password, is_admin, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                email: row.get(1)?,
                username: row.get(2)?,
                password: row.get(3)?,
                is_admin: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_thread_messages(conn: &Connection, thread_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch sender_username in a single query (eliminates N+1).
    // Ordering is the thread's invariant total order: created_at, then id.
    let mut stmt = conn.prepare(
        "SELECT m.id, m.thread_id, m.sender_id, u.username, m.content, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.thread_id = ?1
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let rows = stmt
        .query_map([thread_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                thread_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row
                    .get::<_, Option<String>>(3)?
                    .unwrap_or_else(|| "unknown".to_string()),
                content: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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
