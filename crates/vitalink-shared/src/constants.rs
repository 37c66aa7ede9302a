/// Number of messages fetched per page from the durable store.
pub const MESSAGE_PAGE_SIZE: u32 = 50;

/// Time-to-live for local cache entries (24 hours), in milliseconds.
pub const CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Cache key schema version. Bumping this orphans all prior entries.
pub const CACHE_SCHEMA_VERSION: &str = "v2";

/// Trailing debounce before a typing flag is cleared, in milliseconds.
pub const TYPING_DEBOUNCE_MS: u64 = 3_000;

/// Age at which a stored typing flag is treated as "not typing"
/// regardless of its boolean, in milliseconds.
pub const TYPING_STALE_MS: i64 = 10_000;

/// Maximum concurrent profile fetches per directory prefetch batch.
pub const PREFETCH_CHUNK_SIZE: usize = 10;

/// Delay before a pending send is confirmed and mirrored to the
/// durable store, in milliseconds.
pub const SEND_CONFIRM_DELAY_MS: u64 = 500;

/// Maximum number of cached user-search queries per session.
pub const SEARCH_CACHE_CAP: usize = 64;
