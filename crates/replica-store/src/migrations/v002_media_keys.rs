use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS media_keys (
    id  BIGINT PRIMARY KEY NOT NULL,   -- media id
    key BLOB NOT NULL,
    iv  BLOB NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
