use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::channel::DEFAULT_MAX_FRAME_LEN;
use crate::error::ConfigError;
use crate::session::{DEFAULT_SESSION_TTL, DEFAULT_TOTAL_ROUNDS};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind_address: SocketAddr,

    /// Size of the generated modulus N
    pub modulus_bits: u64,

    /// Rounds per authentication attempt
    pub total_rounds: u32,

    /// Age after which an unfinished session is dropped
    pub session_ttl: Duration,

    /// Per-read timeout on client connections
    pub read_timeout: Duration,

    /// Accept timeout; expired sessions are swept on every tick
    pub accept_timeout: Duration,

    /// Largest accepted frame payload
    pub max_frame_len: usize,

    /// Registry file
    pub users_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 12345)),
            modulus_bits: 256,
            total_rounds: DEFAULT_TOTAL_ROUNDS,
            session_ttl: DEFAULT_SESSION_TTL,
            read_timeout: Duration::from_secs(30),
            accept_timeout: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            users_file: PathBuf::from("server_users.json"),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let total_rounds = parse_or(&lookup, "FS_AUTH_TOTAL_ROUNDS", defaults.total_rounds)?;
        if total_rounds == 0 {
            return Err(ConfigError::Invalid {
                var: "FS_AUTH_TOTAL_ROUNDS",
                value: "0".to_string(),
                reason: "at least one round is required".to_string(),
            });
        }

        Ok(Self {
            bind_address: parse_or(&lookup, "FS_AUTH_BIND", defaults.bind_address)?,
            modulus_bits: parse_or(&lookup, "FS_AUTH_MODULUS_BITS", defaults.modulus_bits)?,
            total_rounds,
            session_ttl: Duration::from_secs(parse_or(
                &lookup,
                "FS_AUTH_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )?),
            read_timeout: Duration::from_secs(parse_or(
                &lookup,
                "FS_AUTH_READ_TIMEOUT_SECS",
                defaults.read_timeout.as_secs(),
            )?),
            accept_timeout: Duration::from_millis(parse_or(
                &lookup,
                "FS_AUTH_ACCEPT_TIMEOUT_MS",
                defaults.accept_timeout.as_millis() as u64,
            )?),
            max_frame_len: parse_or(&lookup, "FS_AUTH_MAX_FRAME_BYTES", defaults.max_frame_len)?,
            users_file: lookup("FS_AUTH_USERS_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.users_file),
        })
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            var,
            reason: err.to_string(),
            value,
        }),
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_address: String,
    pub keys_file: PathBuf,
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:12345".to_string(),
            keys_file: PathBuf::from("client_keys.json"),
            response_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.total_rounds, 20);
        assert_eq!(config.session_ttl, Duration::from_secs(300));
        assert_eq!(config.max_frame_len, 1_000_000);
        assert_eq!(config.bind_address.port(), 12345);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("FS_AUTH_BIND", "0.0.0.0:9000"),
            ("FS_AUTH_TOTAL_ROUNDS", "8"),
            ("FS_AUTH_SESSION_TTL_SECS", "60"),
            ("FS_AUTH_USERS_FILE", "/tmp/users.json"),
        ]))
        .unwrap();
        assert_eq!(config.bind_address.port(), 9000);
        assert_eq!(config.total_rounds, 8);
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.users_file, PathBuf::from("/tmp/users.json"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = ServerConfig::from_lookup(lookup_from(&[("FS_AUTH_MODULUS_BITS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("FS_AUTH_MODULUS_BITS"));

        let err = ServerConfig::from_lookup(lookup_from(&[("FS_AUTH_TOTAL_ROUNDS", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least one round"));
    }
}
