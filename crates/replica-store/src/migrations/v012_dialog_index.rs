use rusqlite::Connection;

const UP_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_dialogs_peer ON dialogs(peer);";

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
