use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_to_peer_type ON messages(to_peer_type);
CREATE INDEX IF NOT EXISTS idx_messages_to_id        ON messages(to_id);
CREATE INDEX IF NOT EXISTS idx_messages_from_id      ON messages(from_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
