/// Application name
pub const APP_NAME: &str = "Guichet";

/// API version prefix
pub const API_VERSION: &str = "v1";

/// Ed25519 signing seed size in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Maximum message body size in bytes (64 KiB)
pub const MAX_MESSAGE_BODY: usize = 65_536;

/// Maximum request body size accepted by the HTTP API (1 MiB)
pub const MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Session token lifetime in seconds (30 days)
pub const SESSION_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Email verification token lifetime in seconds (48 hours)
pub const VERIFICATION_TTL_SECS: i64 = 48 * 60 * 60;

/// Realtime reconnect: base delay in milliseconds, multiplied by the
/// attempt number (linear backoff).
pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Realtime reconnect: attempts before giving up until the next resync.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Periodic full-state resync interval in seconds.
pub const RESYNC_INTERVAL_SECS: u64 = 60;

/// Delivery retries before an enrollment is marked failed.
pub const ENROLLMENT_MAX_RETRIES: u32 = 3;

/// Delay between enrollment delivery retries in seconds.
pub const ENROLLMENT_RETRY_DELAY_SECS: i64 = 600;

/// How often the server dispatcher scans for due work, in seconds.
pub const DISPATCH_TICK_SECS: u64 = 30;
