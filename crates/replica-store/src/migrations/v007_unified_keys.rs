//! Rebuild `messages` around the unified message key.
//!
//! Message ids are only unique per feed, so the old `id` primary key let a
//! channel message overwrite a global one with the same id.

use rusqlite::Connection;

const UP_SQL: &str = r#"
BEGIN;
ALTER TABLE messages RENAME TO old_messages;
CREATE TABLE messages (
    ukey               BIGINT PRIMARY KEY NOT NULL,  -- (channel id << 32) | message id
    id                 BIGINT NOT NULL,
    to_id              BIGINT NOT NULL,
    to_peer_type       BIGINT NOT NULL,
    unread             BOOLEAN NOT NULL,
    from_id            BIGINT NOT NULL,
    out                BOOLEAN NOT NULL,
    date               BIGINT NOT NULL,
    fwd_date           BIGINT,
    fwd_from_id        BIGINT,
    fwd_from_peer_type BIGINT,
    reply_to_msg_id    BIGINT,
    message            BLOB,
    action_user_id     BIGINT,
    action_photo       BIGINT,
    action_title       TEXT,
    action_users       TEXT,
    action_type        BIGINT NOT NULL,
    media_audio        BIGINT,
    media_last_name    TEXT,
    media_first_name   TEXT,
    media_phone_number TEXT,
    media_document     BIGINT,
    media_geo          BIGINT,
    media_photo        BIGINT,
    media_user_id      BIGINT,
    media_video        BIGINT,
    media_type         BIGINT
);
INSERT OR REPLACE INTO messages (
    ukey, id, to_id, to_peer_type, unread, from_id, out, date,
    fwd_date, fwd_from_id, fwd_from_peer_type, reply_to_msg_id, message,
    action_user_id, action_photo, action_title, action_users, action_type,
    media_audio, media_last_name, media_first_name, media_phone_number,
    media_document, media_geo, media_photo, media_user_id, media_video, media_type
)
SELECT
    ((CASE WHEN to_peer_type = 3 THEN to_id ELSE 0 END) << 32) | (id & 4294967295),
    id, to_id, to_peer_type, unread, from_id, out, date,
    fwd_date, fwd_from_id, fwd_from_peer_type, reply_to_msg_id, message,
    action_user_id, action_photo, action_title, action_users, action_type,
    media_audio, media_last_name, media_first_name, media_phone_number,
    media_document, media_geo, media_photo, media_user_id, media_video, media_type
FROM old_messages;
DROP TABLE old_messages;
COMMIT;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
