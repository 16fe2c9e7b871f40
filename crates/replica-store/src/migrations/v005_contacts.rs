use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    user_id BIGINT PRIMARY KEY NOT NULL,
    mutual  BOOLEAN,
    type    BIGINT
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
