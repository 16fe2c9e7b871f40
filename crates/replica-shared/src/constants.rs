/// Application name
pub const APP_NAME: &str = "replica";

/// Name of the database file inside the data directory
pub const DATABASE_FILE_NAME: &str = "replica.db";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Marker prepended to message bodies sealed by the body cipher
pub const SEALED_BODY_MAGIC: &[u8; 4] = b"RPX1";

/// Idle window before a batched write transaction is committed
pub const COMMIT_WINDOW_MS: u64 = 1_000;

/// Debounce between a staleness signal and the catch-up request
pub const RESYNC_DEBOUNCE_MS: u64 = 1_500;

/// Interval of the proactive channel difference poll
pub const CHANNEL_POLL_SECS: u64 = 15;

/// Maximum number of updates requested per channel difference
pub const CHANNEL_DIFFERENCE_LIMIT: i32 = 50;

/// Grace period before retired cache entries are dropped
pub const GC_GRACE_MS: u64 = 3_000;

/// Delay between a cleanup request and the eviction sweep
pub const CLEANUP_DELAY_MS: u64 = 60_000;

/// Delay before dialogs are re-fetched after structural updates
pub const DIALOG_REFRESH_MS: u64 = 3_000;

/// Key derivation context for the message body key (BLAKE3)
pub const KDF_CONTEXT_BODY_KEY: &str = "replica-body-key-v1";
