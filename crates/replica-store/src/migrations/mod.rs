//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::open_at`] call. The
//! applied version lives in the `general` table under the `version` key, so a
//! database opened at version N only runs steps N+1 and higher.
//!
//! A step that fails is logged and the version still advances past it. The
//! remaining steps run regardless, which can leave a partially migrated
//! schema behind.
//!
//! [`Database::open_at`]: crate::Database::open_at

pub mod v001_initial;
pub mod v002_media_keys;
pub mod v003_reply_to;
pub mod v004_blocked;
pub mod v005_contacts;
pub mod v006_forward_peer;
pub mod v007_unified_keys;
pub mod v008_dialog_pts;
pub mod v009_message_views;
pub mod v010_megagroup;
pub mod v011_message_indexes;
pub mod v012_dialog_index;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info, warn};

use crate::error::{Result, StoreError};

/// Key of the schema version in the `general` table.
pub const VERSION_KEY: &str = "version";

/// Current schema version. Bump this and add a step whenever the schema
/// changes.
pub const LATEST_VERSION: u32 = 12;

/// One structural change to the schema.
#[derive(Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: fn(&Connection) -> std::result::Result<(), rusqlite::Error>,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "v001_initial", up: v001_initial::up },
    Migration { version: 2, name: "v002_media_keys", up: v002_media_keys::up },
    Migration { version: 3, name: "v003_reply_to", up: v003_reply_to::up },
    Migration { version: 4, name: "v004_blocked", up: v004_blocked::up },
    Migration { version: 5, name: "v005_contacts", up: v005_contacts::up },
    Migration { version: 6, name: "v006_forward_peer", up: v006_forward_peer::up },
    Migration { version: 7, name: "v007_unified_keys", up: v007_unified_keys::up },
    Migration { version: 8, name: "v008_dialog_pts", up: v008_dialog_pts::up },
    Migration { version: 9, name: "v009_message_views", up: v009_message_views::up },
    Migration { version: 10, name: "v010_megagroup", up: v010_megagroup::up },
    Migration { version: 11, name: "v011_message_indexes", up: v011_message_indexes::up },
    Migration { version: 12, name: "v012_dialog_index", up: v012_dialog_index::up },
];

const GENERAL_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS general (
    gkey   TEXT PRIMARY KEY NOT NULL,
    gvalue TEXT NOT NULL
);
"#;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    run_migrations_with(conn, MIGRATIONS)
}

/// Run `steps` (ordered by version) against the connection and return the
/// version the database ends up at.
///
/// Only a failure to read or create the `general` table is returned as an
/// error; step failures are logged.
pub fn run_migrations_with(conn: &Connection, steps: &[Migration]) -> Result<u32> {
    conn.execute_batch(GENERAL_SQL)?;
    let mut current = read_version(conn)?;
    let target = steps.last().map_or(current, |s| s.version);

    info!(
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    for step in steps {
        if step.version <= current {
            continue;
        }
        if step.version != current + 1 {
            error!(
                current_version = current,
                step = step.name,
                "migration steps are not contiguous, stopping"
            );
            break;
        }

        info!(step = step.name, "applying migration");
        if let Err(e) = (step.up)(conn) {
            warn!(step = step.name, error = %e, "migration step failed, continuing");
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!(step = step.name, error = %e, "rollback after failed step failed");
                }
            }
        }

        current = step.version;
        write_version(conn, current)?;
    }

    Ok(current)
}

/// Version stored in `general`, or 0 for a fresh database.
pub fn read_version(conn: &Connection) -> Result<u32> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT gvalue FROM general WHERE gkey = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(0),
        Some(v) => v.trim().parse().map_err(|_| StoreError::Corrupt {
            column: "general.gvalue",
            reason: format!("bad schema version {v:?}"),
        }),
    }
}

fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO general (gkey, gvalue) VALUES (?1, ?2)",
        params![VERSION_KEY, version.to_string()],
    )
    .map_err(|e| StoreError::Migration(format!("failed to record version {version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    fn column_exists(conn: &Connection, table: &str, column: &str) -> bool {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})")).unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(1))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        names.iter().any(|n| n == column)
    }

    #[test]
    fn fresh_database_reaches_latest() {
        let conn = memory();
        assert_eq!(run_migrations(&conn).unwrap(), LATEST_VERSION);
        assert_eq!(read_version(&conn).unwrap(), LATEST_VERSION);

        for table in [
            "users", "chats", "dialogs", "contacts", "messages", "documents", "photos",
            "photo_sizes", "geos", "videos", "audios", "media_keys", "blocked", "general",
        ] {
            assert!(table_exists(&conn, table), "missing table {table}");
        }
        assert!(column_exists(&conn, "messages", "ukey"));
        assert!(column_exists(&conn, "messages", "views"));
        assert!(column_exists(&conn, "dialogs", "pts"));
        assert!(column_exists(&conn, "chats", "megagroup"));
        assert!(!table_exists(&conn, "old_messages"));
    }

    #[test]
    fn rerun_is_a_no_op() {
        let conn = memory();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), LATEST_VERSION);
    }

    #[test]
    fn only_steps_above_stored_version_run() {
        let conn = memory();
        run_migrations_with(&conn, &MIGRATIONS[..2]).unwrap();
        assert_eq!(read_version(&conn).unwrap(), 2);
        assert!(!column_exists(&conn, "messages", "reply_to_msg_id"));

        // Re-running step 3 twice would fail on the duplicate column.
        assert_eq!(run_migrations(&conn).unwrap(), LATEST_VERSION);
        assert!(column_exists(&conn, "messages", "reply_to_msg_id"));
    }

    fn broken(conn: &Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch("ALTER TABLE no_such_table ADD COLUMN x BIGINT;")
    }

    #[test]
    fn failed_step_still_advances_version() {
        let conn = memory();
        let mut steps = MIGRATIONS.to_vec();
        steps[4] = Migration {
            version: 5,
            name: "broken",
            up: broken,
        };

        assert_eq!(run_migrations_with(&conn, &steps).unwrap(), LATEST_VERSION);
        assert_eq!(read_version(&conn).unwrap(), LATEST_VERSION);
        assert!(!table_exists(&conn, "contacts"));
        // Later steps still applied.
        assert!(column_exists(&conn, "dialogs", "pts"));
    }

    #[test]
    fn failed_transactional_step_is_rolled_back() {
        let conn = memory();
        run_migrations_with(&conn, &MIGRATIONS[..6]).unwrap();
        // Leave a stray table behind so the rename inside step 7 fails.
        conn.execute_batch("CREATE TABLE old_messages (x BIGINT);").unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), LATEST_VERSION);
        assert!(conn.is_autocommit());
        assert!(!column_exists(&conn, "messages", "ukey"));
    }

    #[test]
    fn unified_key_rebuild_keeps_rows_apart() {
        let conn = memory();
        run_migrations_with(&conn, &MIGRATIONS[..6]).unwrap();
        conn.execute_batch(
            "INSERT INTO messages (id, to_id, to_peer_type, unread, from_id, out, date, action_type)
             VALUES (100, 7, 1, 0, 9, 0, 1, 0);
             INSERT INTO messages (id, to_id, to_peer_type, unread, from_id, out, date, action_type)
             VALUES (101, 5, 3, 0, 9, 0, 1, 0);",
        )
        .unwrap();

        run_migrations(&conn).unwrap();

        let mut stmt = conn.prepare("SELECT ukey FROM messages ORDER BY id").unwrap();
        let keys: Vec<i64> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec![100, (5_i64 << 32) | 101]);
    }
}
