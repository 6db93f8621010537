/// Database row types — these map directly to SQLite rows.
/// Distinct from meridian-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub is_admin: bool,
    pub created_at: String,
}

pub struct ThreadRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub subject: Option<String>,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub created_at: String,
}

/// One thread-list entry: thread columns plus the counterpart participant
/// and the most recent message timestamp, computed in a single query.
pub struct ThreadSummaryRow {
    pub id: String,
    pub subject: Option<String>,
    pub counterpart_id: String,
    pub counterpart_email: String,
    pub counterpart_username: String,
    pub created_at: String,
    pub last_activity: String,
}
