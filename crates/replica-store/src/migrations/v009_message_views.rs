use rusqlite::Connection;

const UP_SQL: &str = "ALTER TABLE messages ADD COLUMN views BIGINT;";

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
