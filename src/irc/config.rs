/// Server configuration, read from the environment once at startup.
///
/// | variable                  | default                |
/// |---------------------------|------------------------|
/// | `SERVER_NAME`             | system hostname        |
/// | `DRIFTWOOD_BIND`          | `127.0.0.1:6667`       |
/// | `DRIFTWOOD_LOGIN_TIMEOUT` | 30 (seconds)           |
/// | `DRIFTWOOD_IDLE_TIMEOUT`  | 60 (seconds)           |
/// | `DRIFTWOOD_QUIT_TIMEOUT`  | 60 (seconds)           |
/// | `DRIFTWOOD_MOTD`          | none, `\|`-separated   |
use std::time::Duration;

const FALLBACK_SERVER_NAME: &str = "irc.localhost";
const DEFAULT_BIND: &str = "127.0.0.1:6667";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected a whole number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },
    #[error("{var}: must be greater than zero")]
    ZeroDuration { var: &'static str },
    #[error("SERVER_NAME must not contain spaces: {0:?}")]
    InvalidServerName(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Name used as the prefix of server-originated messages.
    pub server_name: String,
    /// Listen addresses.
    pub bind: Vec<String>,
    /// Message of the day, one entry per line.
    pub motd: Vec<String>,
    /// Time a new connection has to complete NICK/USER.
    pub login_timeout: Duration,
    /// Silence after which a registered client is probed with PING.
    pub idle_timeout: Duration,
    /// Grace period after a probe before the client is dropped.
    pub quit_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: FALLBACK_SERVER_NAME.into(),
            bind: vec![DEFAULT_BIND.into()],
            motd: Vec::new(),
            login_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            quit_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let server_name = lookup("SERVER_NAME")
            .filter(|name| !name.is_empty())
            .or_else(system_hostname)
            .unwrap_or(defaults.server_name);
        if server_name.contains(' ') {
            return Err(ConfigError::InvalidServerName(server_name));
        }

        let bind = lookup("DRIFTWOOD_BIND")
            .map(|list| {
                list.split(',')
                    .map(|addr| addr.trim().to_owned())
                    .filter(|addr| !addr.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|addrs| !addrs.is_empty())
            .unwrap_or(defaults.bind);

        let motd = lookup("DRIFTWOOD_MOTD")
            .map(|text| text.split('|').map(str::to_owned).collect::<Vec<_>>())
            .unwrap_or_default();

        let seconds = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            let Some(value) = lookup(var) else {
                return Ok(default);
            };
            let secs: u64 = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidSeconds {
                    var,
                    value: value.clone(),
                })?;
            if secs == 0 {
                return Err(ConfigError::ZeroDuration { var });
            }
            Ok(Duration::from_secs(secs))
        };

        Ok(Config {
            server_name,
            bind,
            motd,
            login_timeout: seconds("DRIFTWOOD_LOGIN_TIMEOUT", defaults.login_timeout)?,
            idle_timeout: seconds("DRIFTWOOD_IDLE_TIMEOUT", defaults.idle_timeout)?,
            quit_timeout: seconds("DRIFTWOOD_QUIT_TIMEOUT", defaults.quit_timeout)?,
        })
    }
}

/// The machine's hostname, if it looks like a qualified name.
fn system_hostname() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| h.contains('.'))
}
