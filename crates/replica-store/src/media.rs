//! Media sub-records referenced by messages: documents, photos and their
//! sizes, geo points, videos, audios, plus opaque media key material.

use std::collections::HashMap;

use replica_shared::PeerKind;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::database::Database;
use crate::error::Result;
use crate::models::{
    Audio, Document, FileLocation, GeoPoint, MediaKey, Photo, PhotoSize, Video,
};
use crate::users::{int, text};

const STICKER_MIME_TYPE: &str = "image/webp";

impl Database {
    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    pub fn insert_document(&mut self, document: &Document) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO documents
                 (id, dc_id, mime_type, date, file_name, size, access_hash, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                document.id,
                document.dc_id,
                document.mime_type,
                document.date,
                document.file_name,
                document.size,
                document.access_hash,
            ],
        )?;
        if let Some(thumb) = &document.thumb {
            self.insert_photo_size(document.id, thumb)?;
        }
        Ok(())
    }

    pub fn insert_photo(&mut self, photo: &Photo) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO photos (id, caption, date, access_hash)
             VALUES (?1, '', ?2, ?3)",
            params![photo.id, photo.date, photo.access_hash],
        )?;
        for size in &photo.sizes {
            self.insert_photo_size(photo.id, size)?;
        }
        Ok(())
    }

    /// `pid` is the owning photo or document id.
    pub fn insert_photo_size(&mut self, pid: i64, size: &PhotoSize) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO photo_sizes
                 (pid, type, w, h, size, location_local_id, location_secret,
                  location_dc_id, location_volume_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                pid,
                size.kind,
                size.w,
                size.h,
                size.size,
                size.location.local_id,
                size.location.secret,
                size.location.dc_id,
                size.location.volume_id,
            ],
        )?;
        Ok(())
    }

    /// Geo points have no id of their own and are keyed by the raw unified
    /// key of the owning message.
    pub fn insert_geo(&mut self, id: i64, geo: &GeoPoint) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO geos (id, longitude, lat) VALUES (?1, ?2, ?3)",
            params![id, geo.long, geo.lat],
        )?;
        Ok(())
    }

    pub fn insert_video(&mut self, video: &Video) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO videos
                 (id, access_hash, dc_id, date, duration, mime_type, size, w, h)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                video.id,
                video.access_hash,
                video.dc_id,
                video.date,
                video.duration,
                video.mime_type,
                video.size,
                video.w,
                video.h,
            ],
        )?;
        Ok(())
    }

    pub fn insert_audio(&mut self, audio: &Audio) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO audios
                 (id, access_hash, dc_id, date, duration, mime_type, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                audio.id,
                audio.access_hash,
                audio.dc_id,
                audio.date,
                audio.duration,
                audio.mime_type,
                audio.size,
            ],
        )?;
        Ok(())
    }

    pub fn insert_media_key(&mut self, key: &MediaKey) -> Result<()> {
        self.begin();
        self.conn().execute(
            "INSERT OR REPLACE INTO media_keys (id, key, iv) VALUES (?1, ?2, ?3)",
            params![key.media_id, key.key, key.iv],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Point lookups
    // -----------------------------------------------------------------------

    pub fn read_document(&self, id: i64) -> Result<Option<Document>> {
        let document = self
            .conn()
            .query_row(
                "SELECT id, dc_id, mime_type, date, file_name, size, access_hash
                 FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    let mime_type = text(row, "mime_type")?;
                    Ok(Document {
                        id: row.get("id")?,
                        access_hash: int(row, "access_hash")?,
                        dc_id: int(row, "dc_id")?,
                        sticker: mime_type == STICKER_MIME_TYPE,
                        mime_type,
                        date: int(row, "date")?,
                        size: int(row, "size")?,
                        file_name: text(row, "file_name")?,
                        thumb: None,
                    })
                },
            )
            .optional()?;

        let Some(mut document) = document else {
            return Ok(None);
        };
        document.thumb = self.read_photo_sizes(id)?.into_iter().next();
        Ok(Some(document))
    }

    pub fn read_photo(&self, id: i64) -> Result<Option<Photo>> {
        let photo = self
            .conn()
            .query_row(
                "SELECT id, date, access_hash FROM photos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Photo {
                        id: row.get("id")?,
                        access_hash: int(row, "access_hash")?,
                        date: int(row, "date")?,
                        sizes: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut photo) = photo else {
            return Ok(None);
        };
        photo.sizes = self.read_photo_sizes(id)?;
        Ok(Some(photo))
    }

    pub fn read_photo_sizes(&self, pid: i64) -> Result<Vec<PhotoSize>> {
        let mut stmt = self.conn().prepare(
            "SELECT type, w, h, size, location_local_id, location_secret,
                    location_dc_id, location_volume_id
             FROM photo_sizes WHERE pid = ?1 ORDER BY type",
        )?;
        let rows = stmt.query_map(params![pid], row_to_photo_size)?;

        let mut sizes = Vec::new();
        for row in rows {
            sizes.push(row?);
        }
        Ok(sizes)
    }

    pub fn read_geo(&self, id: i64) -> Result<Option<GeoPoint>> {
        let geo = self
            .conn()
            .query_row(
                "SELECT longitude, lat FROM geos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(GeoPoint {
                        long: int(row, "longitude")?,
                        lat: int(row, "lat")?,
                    })
                },
            )
            .optional()?;
        Ok(geo)
    }

    pub fn read_video(&self, id: i64) -> Result<Option<Video>> {
        let video = self
            .conn()
            .query_row(
                "SELECT id, access_hash, dc_id, date, duration, mime_type, size, w, h
                 FROM videos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Video {
                        id: row.get("id")?,
                        access_hash: int(row, "access_hash")?,
                        dc_id: int(row, "dc_id")?,
                        date: int(row, "date")?,
                        duration: int(row, "duration")?,
                        mime_type: text(row, "mime_type")?,
                        size: int(row, "size")?,
                        w: int(row, "w")?,
                        h: int(row, "h")?,
                    })
                },
            )
            .optional()?;
        Ok(video)
    }

    pub fn read_audio(&self, id: i64) -> Result<Option<Audio>> {
        let audio = self
            .conn()
            .query_row(
                "SELECT id, access_hash, dc_id, date, duration, mime_type, size
                 FROM audios WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Audio {
                        id: row.get("id")?,
                        access_hash: int(row, "access_hash")?,
                        dc_id: int(row, "dc_id")?,
                        date: int(row, "date")?,
                        duration: int(row, "duration")?,
                        mime_type: text(row, "mime_type")?,
                        size: int(row, "size")?,
                    })
                },
            )
            .optional()?;
        Ok(audio)
    }

    pub fn read_media_key(&self, media_id: i64) -> Result<Option<MediaKey>> {
        let key = self
            .conn()
            .query_row(
                "SELECT id, key, iv FROM media_keys WHERE id = ?1",
                params![media_id],
                |row| {
                    Ok(MediaKey {
                        media_id: row.get("id")?,
                        key: row.get("key")?,
                        iv: row.get("iv")?,
                    })
                },
            )
            .optional()?;
        Ok(key)
    }

    /// Dialog id -> media ids of the downloadable files its messages carry.
    pub fn media_owners(&self) -> Result<HashMap<i32, Vec<i64>>> {
        Ok(media_owners(self.conn())?)
    }
}

fn row_to_photo_size(row: &Row<'_>) -> rusqlite::Result<PhotoSize> {
    Ok(PhotoSize {
        kind: text(row, "type")?,
        w: int(row, "w")?,
        h: int(row, "h")?,
        size: int(row, "size")?,
        location: FileLocation {
            local_id: int(row, "location_local_id")?,
            secret: int(row, "location_secret")?,
            dc_id: int(row, "location_dc_id")?,
            volume_id: int(row, "location_volume_id")?,
        },
    })
}

const MEDIA_COLUMNS: [&str; 4] = ["media_audio", "media_document", "media_video", "media_photo"];

/// The `Channel` operand of the legacy ownership test. It was written as a
/// bare non-zero constant rather than a comparison.
const LEGACY_CHANNEL_OPERAND: bool = true;

/// Which dialog owns each downloadable media id.
///
/// FIXME: the ownership test reads `kind == Chat || Channel || out`, which is
/// always true, so every file is attributed to `to_id`. Incoming private
/// messages are therefore filed under our own user id instead of the sender.
/// Kept as found until product decides the intended rule.
pub(crate) fn media_owners(conn: &Connection) -> rusqlite::Result<HashMap<i32, Vec<i64>>> {
    let mut owners: HashMap<i32, Vec<i64>> = HashMap::new();

    for column in MEDIA_COLUMNS {
        let mut stmt = conn.prepare(&format!(
            "SELECT to_id, {column} AS media_id, from_id, out, to_peer_type
             FROM messages WHERE {column} <> 0"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i32>("to_id")?,
                row.get::<_, i64>("media_id")?,
                row.get::<_, i32>("from_id")?,
                row.get::<_, bool>("out")?,
                row.get::<_, i64>("to_peer_type")?,
            ))
        })?;

        for row in rows {
            let (to_id, media_id, from_id, out, peer_type) = row?;
            let is_chat = peer_type == PeerKind::Chat.as_i64();
            let owner = if is_chat || LEGACY_CHANNEL_OPERAND || out {
                to_id
            } else {
                from_id
            };
            owners.entry(owner).or_default().push(media_id);
        }
    }

    Ok(owners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreOptions;

    fn size(kind: &str) -> PhotoSize {
        PhotoSize {
            kind: kind.into(),
            w: 90,
            h: 60,
            size: 1024,
            location: FileLocation {
                local_id: 5,
                secret: 6,
                dc_id: 2,
                volume_id: 7,
            },
        }
    }

    #[test]
    fn photo_with_sizes() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let photo = Photo {
            id: 11,
            access_hash: 12,
            date: 13,
            sizes: vec![size("m"), size("s")],
        };
        db.insert_photo(&photo).unwrap();

        let read = db.read_photo(11).unwrap().unwrap();
        assert_eq!(read.sizes.len(), 2);
        assert_eq!(read.sizes[0].kind, "m");
        assert!(db.read_photo(12).unwrap().is_none());
    }

    #[test]
    fn webp_documents_read_as_stickers() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let document = Document {
            id: 21,
            mime_type: STICKER_MIME_TYPE.into(),
            file_name: "s.webp".into(),
            thumb: Some(size("s")),
            ..Default::default()
        };
        db.insert_document(&document).unwrap();

        let read = db.read_document(21).unwrap().unwrap();
        assert!(read.sticker);
        assert_eq!(read.thumb, Some(size("s")));
    }

    #[test]
    fn media_key_round_trip() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let key = MediaKey {
            media_id: 31,
            key: vec![1, 2, 3],
            iv: vec![4, 5],
        };
        db.insert_media_key(&key).unwrap();
        assert_eq!(db.read_media_key(31).unwrap(), Some(key));
        assert_eq!(db.read_media_key(32).unwrap(), None);
    }

    #[test]
    fn geo_and_av_lookups() {
        let mut db = Database::open_in_memory(StoreOptions::default()).unwrap();
        let geo = GeoPoint { lat: 48.85, long: 2.35 };
        db.insert_geo(99, &geo).unwrap();
        assert_eq!(db.read_geo(99).unwrap(), Some(geo));

        let video = Video { id: 41, w: 640, h: 480, ..Default::default() };
        db.insert_video(&video).unwrap();
        assert_eq!(db.read_video(41).unwrap(), Some(video));

        let audio = Audio { id: 51, duration: 30, ..Default::default() };
        db.insert_audio(&audio).unwrap();
        assert_eq!(db.read_audio(51).unwrap(), Some(audio));
    }

    #[test]
    fn ownership_always_resolves_to_recipient() {
        let db = Database::open_in_memory(StoreOptions::default()).unwrap();
        db.conn()
            .execute_batch(
                "INSERT INTO messages (ukey, id, to_id, to_peer_type, unread, from_id, out, date,
                                       action_type, media_document)
                 VALUES (1, 1, 10, 1, 0, 20, 0, 1, 0, 555);",
            )
            .unwrap();

        let owners = db.media_owners().unwrap();
        // An incoming private message would be owned by the sender (20) if
        // the test honoured `out`.
        assert_eq!(owners.get(&10), Some(&vec![555]));
        assert!(!owners.contains_key(&20));
    }
}
