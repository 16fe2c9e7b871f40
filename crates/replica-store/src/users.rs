use rusqlite::{params, OptionalExtension, Row};

use crate::database::Database;
use crate::error::Result;
use crate::models::{FileLocation, ProfilePhoto, User, UserKind, UserStatus};

const USER_COLUMNS: &str = "id, access_hash, phone, first_name, last_name, username, type,
    photo_id, photo_big_local_id, photo_big_secret, photo_big_dc_id, photo_big_volume_id,
    photo_small_local_id, photo_small_secret, photo_small_dc_id, photo_small_volume_id,
    status_was_online, status_expires, status_type";

impl Database {
    pub fn insert_user(&mut self, user: &User) -> Result<()> {
        self.begin();
        let photo = user.photo.clone().unwrap_or_default();
        let (status_type, was_online, expires) = user.status.to_columns();

        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO users ({USER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19)"
            ),
            params![
                user.id,
                user.access_hash,
                user.phone,
                user.first_name,
                user.last_name,
                user.username,
                user.kind.as_i64(),
                photo.photo_id,
                photo.big.local_id,
                photo.big.secret,
                photo.big.dc_id,
                photo.big.volume_id,
                photo.small.local_id,
                photo.small.secret,
                photo.small.dc_id,
                photo.small.volume_id,
                was_online,
                expires,
                status_type,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: i32) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users"))?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let status = UserStatus::from_columns(
        row.get::<_, Option<i64>>("status_type")?.unwrap_or(0),
        row.get::<_, Option<i32>>("status_was_online")?.unwrap_or(0),
        row.get::<_, Option<i32>>("status_expires")?.unwrap_or(0),
    );

    Ok(User {
        id: row.get("id")?,
        access_hash: row.get::<_, Option<i64>>("access_hash")?.unwrap_or(0),
        kind: UserKind::from_i64(row.get::<_, Option<i64>>("type")?.unwrap_or(0)),
        phone: text(row, "phone")?,
        first_name: text(row, "first_name")?,
        last_name: text(row, "last_name")?,
        username: text(row, "username")?,
        photo: profile_photo(row)?,
        status,
    })
}

/// Nullable text column, read as empty.
pub(crate) fn text(row: &Row<'_>, column: &str) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(column)?.unwrap_or_default())
}

/// Nullable integer column, read as zero.
pub(crate) fn int<T: rusqlite::types::FromSql + Default>(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<T> {
    Ok(row.get::<_, Option<T>>(column)?.unwrap_or_default())
}

/// Shared `photo_*` column block of `users` and `chats`.
pub(crate) fn profile_photo(row: &Row<'_>) -> rusqlite::Result<Option<ProfilePhoto>> {
    let photo_id: i64 = int(row, "photo_id")?;
    if photo_id == 0 {
        return Ok(None);
    }
    Ok(Some(ProfilePhoto {
        photo_id,
        big: FileLocation {
            local_id: int(row, "photo_big_local_id")?,
            secret: int(row, "photo_big_secret")?,
            dc_id: int(row, "photo_big_dc_id")?,
            volume_id: int(row, "photo_big_volume_id")?,
        },
        small: FileLocation {
            local_id: int(row, "photo_small_local_id")?,
            secret: int(row, "photo_small_secret")?,
            dc_id: int(row, "photo_small_dc_id")?,
            volume_id: int(row, "photo_small_volume_id")?,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreOptions;

    fn sample_user() -> User {
        User {
            id: 42,
            access_hash: 0x1234_5678_9abc,
            kind: UserKind::Regular,
            phone: "15550100".into(),
            first_name: "Ada".into(),
            last_name: "L".into(),
            username: "ada".into(),
            photo: Some(ProfilePhoto {
                photo_id: 99,
                big: FileLocation {
                    local_id: 1,
                    secret: 2,
                    dc_id: 3,
                    volume_id: 4,
                },
                small: FileLocation::default(),
            }),
            status: UserStatus::Offline { was_online: 1_700_000_000 },
        }
    }

    #[test]
    fn user_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");

        {
            let mut db = Database::open_at(&path, StoreOptions::default()).unwrap();
            db.insert_user(&sample_user()).unwrap();
        }

        let db = Database::open_at(&path, StoreOptions::default()).unwrap();
        assert_eq!(db.get_user(42).unwrap(), Some(sample_user()));
        assert_eq!(db.get_user(43).unwrap(), None);
    }

    #[test]
    fn insert_replaces() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let mut user = sample_user();
        db.insert_user(&user).unwrap();
        user.first_name = "Grace".into();
        user.photo = None;
        db.insert_user(&user).unwrap();

        let users = db.list_users().unwrap();
        assert_eq!(users, vec![user]);
    }
}
