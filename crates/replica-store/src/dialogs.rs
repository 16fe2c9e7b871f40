use replica_shared::{Peer, PeerKind};
use rusqlite::{params, OptionalExtension, Row};

use crate::database::Database;
use crate::error::Result;
use crate::models::Dialog;
use crate::users::int;

const DIALOG_COLUMNS: &str = "peer, peer_type, top_message, unread_count, encrypted, pts";

impl Database {
    pub fn insert_dialog(&mut self, dialog: &Dialog) -> Result<()> {
        self.begin();
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO dialogs ({DIALOG_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ),
            params![
                dialog.peer.id(),
                dialog.peer.kind().as_i64(),
                dialog.top_message,
                dialog.unread_count,
                dialog.encrypted,
                dialog.pts,
            ],
        )?;
        Ok(())
    }

    pub fn get_dialog(&self, peer_id: i32) -> Result<Option<Dialog>> {
        let dialog = self
            .conn()
            .query_row(
                &format!("SELECT {DIALOG_COLUMNS} FROM dialogs WHERE peer = ?1"),
                params![peer_id],
                row_to_dialog,
            )
            .optional()?;
        Ok(dialog)
    }

    pub fn list_dialogs(&self) -> Result<Vec<Dialog>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {DIALOG_COLUMNS} FROM dialogs"))?;
        let rows = stmt.query_map([], row_to_dialog)?;

        let mut dialogs = Vec::new();
        for row in rows {
            dialogs.push(row?);
        }
        Ok(dialogs)
    }

    pub fn update_unread_count(&mut self, peer_id: i32, unread_count: i32) -> Result<()> {
        self.begin();
        self.conn().execute(
            "UPDATE dialogs SET unread_count = ?1 WHERE peer = ?2",
            params![unread_count, peer_id],
        )?;
        Ok(())
    }

    pub fn delete_dialog(&mut self, peer_id: i32) -> Result<bool> {
        self.begin();
        let affected = self
            .conn()
            .execute("DELETE FROM dialogs WHERE peer = ?1", params![peer_id])?;
        Ok(affected > 0)
    }
}

fn row_to_dialog(row: &Row<'_>) -> rusqlite::Result<Dialog> {
    let id: i32 = row.get("peer")?;
    let kind = PeerKind::from_i64(row.get("peer_type")?).unwrap_or(PeerKind::User);

    Ok(Dialog {
        peer: Peer::from_parts(kind, id),
        top_message: int(row, "top_message")?,
        unread_count: int(row, "unread_count")?,
        pts: int(row, "pts")?,
        encrypted: int(row, "encrypted")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreOptions;

    #[test]
    fn dialog_crud() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let dialog = Dialog {
            peer: Peer::Channel(500),
            top_message: 90,
            unread_count: 4,
            pts: 1200,
            encrypted: false,
        };
        db.insert_dialog(&dialog).unwrap();
        assert_eq!(db.get_dialog(500).unwrap(), Some(dialog));

        db.update_unread_count(500, 0).unwrap();
        assert_eq!(db.get_dialog(500).unwrap().unwrap().unread_count, 0);

        assert!(db.delete_dialog(500).unwrap());
        assert!(!db.delete_dialog(500).unwrap());
        assert!(db.list_dialogs().unwrap().is_empty());
    }
}
