use rusqlite::Connection;

const UP_SQL: &str = "ALTER TABLE dialogs ADD COLUMN pts BIGINT;";

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
