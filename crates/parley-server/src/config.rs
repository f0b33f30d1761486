//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use parley_shared::constants::{DEFAULT_HTTP_PORT, MAX_IMAGE_SIZE, TOKEN_TTL_DAYS};

/// How a live connection proves who it is at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Trust the clear-text `userId` query parameter.
    Query,
    /// Require a signed session token in the `token` query parameter.
    Token,
}

impl IdentityMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "query" => Some(Self::Query),
            "token" => Some(Self::Token),
            _ => None,
        }
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`, or `PORT` to change only the port.
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (see `parley_store::Database::default_path`).
    pub database_path: Option<PathBuf>,

    /// Directory where uploaded images are stored.
    /// Env: `IMAGE_STORAGE_PATH`
    /// Default: `./images`
    pub image_storage_path: PathBuf,

    /// Maximum decoded image size in bytes, also used as the request body limit.
    /// Env: `MAX_IMAGE_SIZE`
    /// Default: 5 MiB
    pub max_image_size: usize,

    /// HMAC secret for session tokens.
    /// Env: `JWT_SECRET`
    /// Default: random per process (tokens do not survive a restart).
    pub jwt_secret: Option<String>,

    /// Session token lifetime in days.
    /// Env: `TOKEN_TTL_DAYS`
    /// Default: `7`
    pub token_ttl_days: i64,

    /// How live connections identify themselves.
    /// Env: `WS_IDENTITY` (`query` | `token`)
    /// Default: `query`
    pub identity_mode: IdentityMode,

    /// Whether a newer connection for the same user closes the older one.
    /// Env: `CLOSE_SUPERSEDED` (true/false)
    /// Default: `true`
    pub close_superseded: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("image_storage_path", &self.image_storage_path)
            .field("max_image_size", &self.max_image_size)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("token_ttl_days", &self.token_ttl_days)
            .field("identity_mode", &self.identity_mode)
            .field("close_superseded", &self.close_superseded)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            image_storage_path: PathBuf::from("./images"),
            max_image_size: MAX_IMAGE_SIZE,
            jwt_secret: None,
            token_ttl_days: TOKEN_TTL_DAYS,
            identity_mode: IdentityMode::Query,
            close_superseded: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(p) => config.http_addr.set_port(p),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, ignoring"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(path) = lookup("IMAGE_STORAGE_PATH") {
            config.image_storage_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_IMAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_image_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_IMAGE_SIZE, using default"),
            }
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            if !secret.is_empty() {
                config.jwt_secret = Some(secret);
            }
        }

        if let Some(val) = lookup("TOKEN_TTL_DAYS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.token_ttl_days = n,
                _ => tracing::warn!(value = %val, "Invalid TOKEN_TTL_DAYS, using default"),
            }
        }

        if let Some(val) = lookup("WS_IDENTITY") {
            match IdentityMode::parse(&val) {
                Some(mode) => config.identity_mode = mode,
                None => tracing::warn!(value = %val, "Invalid WS_IDENTITY, using default"),
            }
        }

        if let Some(val) = lookup("CLOSE_SUPERSEDED") {
            config.close_superseded = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5000).into());
        assert_eq!(config.identity_mode, IdentityMode::Query);
        assert!(config.close_superseded);
        assert_eq!(config.token_ttl_days, 7);
    }

    #[test]
    fn test_port_overrides_addr_port() {
        let config = from_pairs(&[("HTTP_ADDR", "127.0.0.1:8080"), ("PORT", "9000")]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "nope"),
            ("MAX_IMAGE_SIZE", "-3"),
            ("WS_IDENTITY", "magic"),
        ]);
        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.max_image_size, MAX_IMAGE_SIZE);
        assert_eq!(config.identity_mode, IdentityMode::Query);
    }

    #[test]
    fn test_relay_switches() {
        let config = from_pairs(&[("WS_IDENTITY", "Token"), ("CLOSE_SUPERSEDED", "0")]);
        assert_eq!(config.identity_mode, IdentityMode::Token);
        assert!(!config.close_superseded);
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = from_pairs(&[("JWT_SECRET", "hunter2")]);
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
