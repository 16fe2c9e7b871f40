use rusqlite::params;

use crate::database::Database;
use crate::error::Result;
use crate::models::Contact;
use crate::users::int;

impl Database {
    pub fn insert_contact(&mut self, contact: &Contact) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO contacts (user_id, mutual, type) VALUES (?1, ?2, 0)",
            params![contact.user_id, contact.mutual],
        )?;
        Ok(())
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare("SELECT user_id, mutual FROM contacts")?;
        let rows = stmt.query_map([], |row| {
            Ok(Contact {
                user_id: row.get("user_id")?,
                mutual: int(row, "mutual")?,
            })
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreOptions;

    #[test]
    fn contacts_upsert_by_user() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        db.insert_contact(&Contact { user_id: 7, mutual: false }).unwrap();
        db.insert_contact(&Contact { user_id: 7, mutual: true }).unwrap();
        assert_eq!(
            db.list_contacts().unwrap(),
            vec![Contact { user_id: 7, mutual: true }]
        );
    }
}
