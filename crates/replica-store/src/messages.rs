use replica_shared::{Peer, PeerKind, UnifiedMessageKey};
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use crate::database::Database;
use crate::encryptor::MessageEncryptor;
use crate::error::Result;
use crate::models::{ActionKind, ForwardHeader, Message, MessageAction, MessageMedia};
use crate::users::{int, text};

const MESSAGE_COLUMNS: &str = "ukey, id, to_id, to_peer_type, unread, from_id, out, date,
    fwd_date, fwd_from_id, fwd_from_peer_type, reply_to_msg_id, message,
    action_user_id, action_photo, action_title, action_users, action_type,
    media_audio, media_last_name, media_first_name, media_phone_number,
    media_document, media_geo, media_photo, media_user_id, media_video, media_type, views";

/// A decoded `messages` row whose media still has to be looked up.
struct MessageRow {
    message: Message,
    media_type: i64,
    media_id: i64,
    action_photo: i64,
}

impl Database {
    /// Upsert a message together with the media sub-records it carries.
    ///
    /// `secret_chat` is forwarded to the encryptor.
    pub fn insert_message(&mut self, message: &Message, secret_chat: bool) -> Result<()> {
        self.begin();

        let key = message.key();
        let body = self.encryptor().encrypt(&message.text, secret_chat);
        let fwd = message.fwd_from.clone().unwrap_or_default();
        let action = &message.action;
        let action_users = action
            .users
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let (mut audio, mut document, mut geo, mut photo, mut video) = (0, 0, 0, 0, 0);
        let (mut contact_user, mut phone, mut first, mut last) = (0, "", "", "");
        match &message.media {
            MessageMedia::Empty => {}
            MessageMedia::Audio(a) => audio = a.id,
            MessageMedia::Document(d) => document = d.id,
            MessageMedia::Geo(_) => geo = key.raw(),
            MessageMedia::Photo(p) => photo = p.id,
            MessageMedia::Video(v) => video = v.id,
            MessageMedia::Contact {
                user_id,
                phone_number,
                first_name,
                last_name,
            } => {
                contact_user = *user_id;
                phone = phone_number;
                first = first_name;
                last = last_name;
            }
        }

        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)"
            ),
            params![
                key.raw(),
                message.id,
                message.to.id(),
                message.to.kind().as_i64(),
                message.unread,
                message.from_id,
                message.out,
                message.date,
                fwd.date,
                fwd.from_id,
                fwd.from_kind.map_or(0, PeerKind::as_i64),
                message.reply_to_msg_id,
                body,
                action.user_id,
                action.photo.as_ref().map_or(0, |p| p.id),
                action.title,
                action_users,
                action.kind.as_i64(),
                audio,
                last,
                first,
                phone,
                document,
                geo,
                photo,
                contact_user,
                video,
                message.media.type_code(),
                message.views,
            ],
        )?;

        if let Some(p) = &action.photo {
            self.insert_photo(p)?;
        }
        match &message.media {
            MessageMedia::Photo(p) => self.insert_photo(p)?,
            MessageMedia::Document(d) => self.insert_document(d)?,
            MessageMedia::Geo(g) => self.insert_geo(key.raw(), g)?,
            MessageMedia::Video(v) => self.insert_video(v)?,
            MessageMedia::Audio(a) => self.insert_audio(a)?,
            MessageMedia::Empty | MessageMedia::Contact { .. } => {}
        }
        Ok(())
    }

    pub fn get_message(&self, key: UnifiedMessageKey) -> Result<Option<Message>> {
        let enc = self.encryptor();
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE ukey = ?1"),
                params![key.raw()],
                |row| row_to_message(row, enc),
            )
            .optional()?;
        Ok(row.map(|r| self.hydrate(r)))
    }

    /// A page of a peer's history, newest first.
    ///
    /// Private conversations hold both directions: our messages addressed to
    /// the user and the user's messages addressed to us.
    pub fn read_messages(&self, peer: Peer, offset: i64, limit: i64) -> Result<Vec<Message>> {
        let sql = if peer.is_group() {
            format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE to_id = ?1 AND to_peer_type = ?2
                 ORDER BY id DESC LIMIT ?3 OFFSET ?4"
            )
        } else {
            format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE to_peer_type = ?2
                   AND ((to_id = ?1 AND out = 1) OR (from_id = ?1 AND out = 0))
                 ORDER BY id DESC LIMIT ?3 OFFSET ?4"
            )
        };

        let enc = self.encryptor();
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            params![peer.id(), peer.kind().as_i64(), limit, offset],
            |row| row_to_message(row, enc),
        )?;

        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }
        Ok(raw.into_iter().map(|r| self.hydrate(r)).collect())
    }

    /// Number of stored messages in a peer's history.
    pub fn messages_available(&self, peer: Peer) -> Result<i64> {
        let sql = if peer.is_group() {
            "SELECT COUNT(id) FROM messages WHERE to_id = ?1 AND to_peer_type = ?2"
        } else {
            "SELECT COUNT(id) FROM messages
             WHERE to_peer_type = ?2
               AND ((to_id = ?1 AND out = 1) OR (from_id = ?1 AND out = 0))"
        };
        let count = self.conn().query_row(
            sql,
            params![peer.id(), peer.kind().as_i64()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Clear the unread flag of every message up to `max_id`. For user peers
    /// only our outgoing messages are touched.
    pub fn mark_read_up_to(&mut self, peer: Peer, max_id: i32) -> Result<usize> {
        self.begin();
        let sql = if peer.is_group() {
            "UPDATE messages SET unread = 0
             WHERE unread = 1 AND to_id = ?1 AND to_peer_type = ?2 AND id <= ?3"
        } else {
            "UPDATE messages SET unread = 0
             WHERE unread = 1 AND to_id = ?1 AND out = 1 AND to_peer_type = ?2 AND id <= ?3"
        };
        let affected = self
            .conn()
            .execute(sql, params![peer.id(), peer.kind().as_i64(), max_id])?;
        Ok(affected)
    }

    /// Secret chats acknowledge reads by date rather than by id.
    pub fn mark_read_from_max_date(&mut self, chat_id: i32, max_date: i32) -> Result<usize> {
        self.begin();
        let affected = self.conn().execute(
            "UPDATE messages SET unread = 0 WHERE to_id = ?1 AND date <= ?2",
            params![chat_id, max_date],
        )?;
        Ok(affected)
    }

    pub fn delete_message(&mut self, key: UnifiedMessageKey) -> Result<bool> {
        self.begin();
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE ukey = ?1", params![key.raw()])?;
        Ok(affected > 0)
    }

    /// Drop every message of the conversation with `peer_id`, whatever kind
    /// of peer it is.
    pub fn delete_history(&mut self, peer_id: i32) -> Result<usize> {
        self.begin();
        let affected = self.conn().execute(
            "DELETE FROM messages
             WHERE (to_peer_type = ?2 AND to_id = ?1)
                OR (to_peer_type = ?3 AND to_id = ?1)
                OR (to_peer_type = ?4 AND out = 1 AND to_id = ?1)
                OR (to_peer_type = ?4 AND out = 0 AND from_id = ?1)",
            params![
                peer_id,
                PeerKind::Chat.as_i64(),
                PeerKind::Channel.as_i64(),
                PeerKind::User.as_i64(),
            ],
        )?;
        Ok(affected)
    }

    /// Resolve the media and action photo referenced by a row. Failed
    /// lookups degrade to empty media.
    fn hydrate(&self, row: MessageRow) -> Message {
        let mut message = row.message;
        let id = row.media_id;

        let media = match row.media_type {
            1 => self.lookup("photo", id, Self::read_photo).map(MessageMedia::Photo),
            2 => self.lookup("document", id, Self::read_document).map(MessageMedia::Document),
            3 => self.lookup("geo", id, Self::read_geo).map(MessageMedia::Geo),
            5 => self.lookup("video", id, Self::read_video).map(MessageMedia::Video),
            6 => self.lookup("audio", id, Self::read_audio).map(MessageMedia::Audio),
            _ => None,
        };
        if let Some(media) = media {
            message.media = media;
        }

        if row.action_photo != 0 {
            message.action.photo = self.lookup("action photo", row.action_photo, Self::read_photo);
        }
        message
    }

    fn lookup<T>(
        &self,
        what: &'static str,
        id: i64,
        read: impl Fn(&Self, i64) -> Result<Option<T>>,
    ) -> Option<T> {
        match read(self, id) {
            Ok(found) => found,
            Err(e) => {
                warn!(what, id, error = %e, "media lookup failed");
                None
            }
        }
    }
}

fn row_to_message(row: &Row<'_>, enc: &dyn MessageEncryptor) -> rusqlite::Result<MessageRow> {
    let to_id: i32 = row.get("to_id")?;
    let to_kind = PeerKind::from_i64(row.get("to_peer_type")?).unwrap_or(PeerKind::User);

    let fwd_date: i32 = int(row, "fwd_date")?;
    let fwd_from_id: i32 = int(row, "fwd_from_id")?;
    let fwd_from = if fwd_date != 0 || fwd_from_id != 0 {
        Some(ForwardHeader {
            from_id: fwd_from_id,
            date: fwd_date,
            from_kind: PeerKind::from_i64(int(row, "fwd_from_peer_type")?),
        })
    } else {
        None
    };

    let body = match row.get_ref("message")? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => enc.decrypt(bytes),
        _ => String::new(),
    };

    let users = text(row, "action_users")?
        .split(',')
        .filter_map(|u| u.trim().parse().ok())
        .collect();

    let media_type: i64 = int(row, "media_type")?;
    let media = if media_type == 4 {
        MessageMedia::Contact {
            user_id: int(row, "media_user_id")?,
            phone_number: text(row, "media_phone_number")?,
            first_name: text(row, "media_first_name")?,
            last_name: text(row, "media_last_name")?,
        }
    } else {
        MessageMedia::Empty
    };
    let media_column = match media_type {
        1 => "media_photo",
        2 => "media_document",
        3 => "media_geo",
        5 => "media_video",
        6 => "media_audio",
        _ => "media_type",
    };

    Ok(MessageRow {
        media_id: int(row, media_column)?,
        media_type,
        action_photo: int(row, "action_photo")?,
        message: Message {
            id: row.get("id")?,
            to: Peer::from_parts(to_kind, to_id),
            from_id: row.get("from_id")?,
            date: row.get("date")?,
            unread: row.get("unread")?,
            out: row.get("out")?,
            fwd_from,
            reply_to_msg_id: int(row, "reply_to_msg_id")?,
            text: body,
            action: MessageAction {
                kind: ActionKind::from_i64(row.get("action_type")?),
                user_id: int(row, "action_user_id")?,
                title: text(row, "action_title")?,
                users,
                photo: None,
            },
            media,
            views: int(row, "views")?,
        },
    })
}
