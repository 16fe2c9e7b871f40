use rusqlite::Connection;

const UP_SQL: &str = "CREATE TABLE IF NOT EXISTS blocked (uid BIGINT PRIMARY KEY NOT NULL);";

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
