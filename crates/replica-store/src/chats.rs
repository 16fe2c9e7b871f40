use rusqlite::{params, OptionalExtension, Row};

use crate::database::Database;
use crate::error::Result;
use crate::models::{Chat, ChatKind};
use crate::users::{int, profile_photo, text};

const CHAT_COLUMNS: &str = "id, participants_count, version, title, date, left, megagroup, type,
    access_hash, photo_id, photo_big_local_id, photo_big_secret, photo_big_dc_id,
    photo_big_volume_id, photo_small_local_id, photo_small_secret, photo_small_dc_id,
    photo_small_volume_id";

impl Database {
    pub fn insert_chat(&mut self, chat: &Chat) -> Result<()> {
        self.begin();
        let photo = chat.photo.clone().unwrap_or_default();

        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO chats ({CHAT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18)"
            ),
            params![
                chat.id,
                chat.participants_count,
                chat.version,
                chat.title,
                chat.date,
                chat.left,
                chat.megagroup,
                chat.kind.as_i64(),
                chat.access_hash,
                photo.photo_id,
                photo.big.local_id,
                photo.big.secret,
                photo.big.dc_id,
                photo.big.volume_id,
                photo.small.local_id,
                photo.small.secret,
                photo.small.dc_id,
                photo.small.volume_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_chat(&self, id: i32) -> Result<Option<Chat>> {
        let chat = self
            .conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id],
                row_to_chat,
            )
            .optional()?;
        Ok(chat)
    }

    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {CHAT_COLUMNS} FROM chats"))?;
        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }
}

fn row_to_chat(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get("id")?,
        kind: ChatKind::from_i64(int(row, "type")?),
        title: text(row, "title")?,
        participants_count: int(row, "participants_count")?,
        version: int(row, "version")?,
        date: int(row, "date")?,
        left: int(row, "left")?,
        megagroup: int(row, "megagroup")?,
        access_hash: int(row, "access_hash")?,
        photo: profile_photo(row)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileLocation, ProfilePhoto};
    use crate::StoreOptions;

    #[test]
    fn chat_round_trip() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let chat = Chat {
            id: 1001,
            kind: ChatKind::Channel,
            title: "news".into(),
            participants_count: 12,
            version: 3,
            date: 1_600_000_000,
            left: false,
            megagroup: true,
            access_hash: -77,
            photo: Some(ProfilePhoto {
                photo_id: 1,
                big: FileLocation::default(),
                small: FileLocation {
                    local_id: 8,
                    secret: 9,
                    dc_id: 2,
                    volume_id: 10,
                },
            }),
        };
        db.insert_chat(&chat).unwrap();

        assert_eq!(db.get_chat(1001).unwrap(), Some(chat.clone()));
        assert!(!chat.is_broadcast_channel());
        assert_eq!(db.list_chats().unwrap().len(), 1);
        assert!(db.get_chat(1).unwrap().is_none());
    }
}
