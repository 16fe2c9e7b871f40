//! Key/value settings (`general` table) and the blocked-user list.

use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Reload the in-memory mirror of the `general` table.
    pub fn reload_general(&mut self) -> Result<()> {
        let mut stmt = self.conn().prepare("SELECT gkey, gvalue FROM general")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut general = std::collections::HashMap::new();
        for row in rows {
            let (k, v): (String, String) = row?;
            general.insert(k, v);
        }
        drop(stmt);

        self.general = general;
        Ok(())
    }

    /// Cached setting value.
    pub fn value(&self, key: &str) -> Option<String> {
        self.general.get(key).cloned()
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO general (gkey, gvalue) VALUES (?1, ?2)",
            params![key, value],
        )?;
        self.general.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    pub fn block_user(&mut self, user_id: i32) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO blocked (uid) VALUES (?1)",
            params![user_id],
        )?;
        Ok(())
    }

    pub fn unblock_user(&mut self, user_id: i32) -> Result<()> {
        self.begin();
        self.conn()
            .execute("DELETE FROM blocked WHERE uid = ?1", params![user_id])?;
        Ok(())
    }

    pub fn blocked_users(&self) -> Result<Vec<i32>> {
        let mut stmt = self.conn().prepare("SELECT uid FROM blocked ORDER BY uid")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, StoreOptions};

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");

        {
            let mut db = Database::open_at(&path, StoreOptions::default()).unwrap();
            db.set_value("mute.42", "1").unwrap();
            assert_eq!(db.value("mute.42").as_deref(), Some("1"));
        }

        let db = Database::open_at(&path, StoreOptions::default()).unwrap();
        assert_eq!(db.value("mute.42").as_deref(), Some("1"));
        assert_eq!(db.value("missing"), None);
    }

    #[test]
    fn block_and_unblock() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        db.block_user(5).unwrap();
        db.block_user(3).unwrap();
        db.block_user(5).unwrap();
        assert_eq!(db.blocked_users().unwrap(), vec![3, 5]);

        db.unblock_user(3).unwrap();
        assert_eq!(db.blocked_users().unwrap(), vec![5]);
    }
}
