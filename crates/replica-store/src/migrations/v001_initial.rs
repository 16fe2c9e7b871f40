use rusqlite::Connection;


const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                    BIGINT PRIMARY KEY NOT NULL,
    access_hash           BIGINT,
    phone                 TEXT,
    first_name            TEXT,
    last_name             TEXT,
    username              TEXT,
    type                  BIGINT,
    photo_id              BIGINT,
    photo_big_local_id    BIGINT,
    photo_big_secret      BIGINT,
    photo_big_dc_id       BIGINT,
    photo_big_volume_id   BIGINT,
    photo_small_local_id  BIGINT,
    photo_small_secret    BIGINT,
    photo_small_dc_id     BIGINT,
    photo_small_volume_id BIGINT,
    status_was_online     BIGINT,
    status_expires        BIGINT,
    status_type           BIGINT
);

CREATE TABLE IF NOT EXISTS chats (
    id                    BIGINT PRIMARY KEY NOT NULL,
    participants_count    BIGINT,
    version               BIGINT,
    title                 TEXT,
    date                  BIGINT,
    left                  BOOLEAN,
    type                  BIGINT,
    access_hash           BIGINT,
    photo_id              BIGINT,
    photo_big_local_id    BIGINT,
    photo_big_secret      BIGINT,
    photo_big_dc_id       BIGINT,
    photo_big_volume_id   BIGINT,
    photo_small_local_id  BIGINT,
    photo_small_secret    BIGINT,
    photo_small_dc_id     BIGINT,
    photo_small_volume_id BIGINT
);

CREATE TABLE IF NOT EXISTS dialogs (
    peer         BIGINT PRIMARY KEY NOT NULL,
    peer_type    BIGINT NOT NULL,
    top_message  BIGINT,
    unread_count BIGINT,
    encrypted    BOOLEAN
);

CREATE TABLE IF NOT EXISTS messages (
    id                 BIGINT PRIMARY KEY NOT NULL,
    to_id              BIGINT NOT NULL,
    to_peer_type       BIGINT NOT NULL,
    unread             BOOLEAN NOT NULL,
    from_id            BIGINT NOT NULL,
    out                BOOLEAN NOT NULL,
    date               BIGINT NOT NULL,
    fwd_date           BIGINT,
    fwd_from_id        BIGINT,
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

CREATE TABLE IF NOT EXISTS documents (
    id          BIGINT PRIMARY KEY NOT NULL,
    dc_id       BIGINT,
    mime_type   TEXT,
    date        BIGINT,
    file_name   TEXT,
    size        BIGINT,
    access_hash BIGINT,
    type        BIGINT
);

CREATE TABLE IF NOT EXISTS photos (
    id          BIGINT PRIMARY KEY NOT NULL,
    caption     TEXT,
    date        BIGINT,
    access_hash BIGINT
);

CREATE TABLE IF NOT EXISTS photo_sizes (
    pid                BIGINT NOT NULL,       -- photo or document id
    type               TEXT NOT NULL,
    w                  BIGINT,
    h                  BIGINT,
    size               BIGINT,
    location_local_id  BIGINT,
    location_secret    BIGINT,
    location_dc_id     BIGINT,
    location_volume_id BIGINT,
    PRIMARY KEY (pid, type)
);

CREATE TABLE IF NOT EXISTS geos (
    id        BIGINT PRIMARY KEY NOT NULL,     -- unified key of the owning message
    longitude DOUBLE,
    lat       DOUBLE
);

CREATE TABLE IF NOT EXISTS videos (
    id          BIGINT PRIMARY KEY NOT NULL,
    access_hash BIGINT,
    dc_id       BIGINT,
    date        BIGINT,
    duration    BIGINT,
    mime_type   TEXT,
    size        BIGINT,
    w           BIGINT,
    h           BIGINT
);

CREATE TABLE IF NOT EXISTS audios (
    id          BIGINT PRIMARY KEY NOT NULL,
    access_hash BIGINT,
    dc_id       BIGINT,
    date        BIGINT,
    duration    BIGINT,
    mime_type   TEXT,
    size        BIGINT
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)?;
    Ok(())
}
