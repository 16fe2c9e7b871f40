use rusqlite::Connection;

const UP_SQL: &str = "ALTER TABLE chats ADD COLUMN megagroup BOOLEAN;";

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
