/// Wire name of the full online-set broadcast.
pub const EVENT_ONLINE_SET: &str = "online-set";

/// Wire name of a live message push.
pub const EVENT_NEW_MESSAGE: &str = "new-message";

/// Query parameter carrying the clear-text identity at connect time.
pub const QUERY_USER_ID: &str = "userId";

/// Query parameter carrying a signed token at connect time.
pub const QUERY_TOKEN: &str = "token";

/// HTTP header carrying the session token.
pub const HEADER_TOKEN: &str = "token";

/// Prefix of stored image references.
pub const IMAGE_ROUTE_PREFIX: &str = "/api/images/";

/// Maximum JSON request body / image size in bytes (5 MiB)
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Session token lifetime in days
pub const TOKEN_TTL_DAYS: i64 = 7;
