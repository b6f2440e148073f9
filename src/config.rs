use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;

/// Keys that must resolve to a non-blank value, in the order they are reported.
pub const REQUIRED_KEYS: [&str; 4] = ["TOKEN", "ADMIN_CHAT_ID", "PUBLIC_URL", "GRAMMAR_ENDPOINT_URL"];

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_TIMEOUT_SECS: u64 = 9;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const MIN_TIMEOUT_SECS: u64 = 9;
const MAX_TIMEOUT_SECS: u64 = 25;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing critical environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("ADMIN_CHAT_ID must be an integer chat id, got {0:?}")]
    InvalidChatId(String),
    #[error("{key} is not a valid URL: {value:?}")]
    InvalidUrl { key: &'static str, value: String },
    #[error("BIND_ADDR is not a valid socket address: {0:?}")]
    InvalidBindAddr(String),
    #[error("{key} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },
    #[error("GRAMMAR_TIMEOUT_SECS must be between 9 and 25 seconds, got {0}")]
    TimeoutOutOfRange(u64),
    #[error("GRAMMAR_CONNECT_TIMEOUT_SECS ({connect}) must not exceed GRAMMAR_TIMEOUT_SECS ({total})")]
    ConnectExceedsTotal { connect: u64, total: u64 },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub admin_chat_id: i64,
    /// Bot API base URL override (self-hosted API server).
    pub api_url: Option<Url>,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("admin_chat_id", &self.admin_chat_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public URL Telegram delivers updates to.
    pub public_url: Url,
    pub bind_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct GrammarConfig {
    pub endpoint: Url,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub server: ServerConfig,
    pub grammar: GrammarConfig,
}

// ── Optional TOML layer ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    telegram: FileTelegram,
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    grammar: FileGrammar,
}

#[derive(Debug, Deserialize, Default)]
struct FileTelegram {
    token: Option<String>,
    admin_chat_id: Option<toml::Value>,
    api_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileServer {
    public_url: Option<String>,
    bind_addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FileGrammar {
    endpoint_url: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Flatten the file into the same key space the environment uses.
    fn into_values(self) -> HashMap<&'static str, String> {
        let mut values = HashMap::new();
        let mut put = |key: &'static str, value: Option<String>| {
            if let Some(v) = value {
                values.insert(key, v);
            }
        };

        put("TOKEN", self.telegram.token);
        put(
            "ADMIN_CHAT_ID",
            self.telegram.admin_chat_id.map(|v| match v {
                toml::Value::String(s) => s,
                other => other.to_string(),
            }),
        );
        put("TELEGRAM_API_URL", self.telegram.api_url);
        put("PUBLIC_URL", self.server.public_url);
        put("BIND_ADDR", self.server.bind_addr);
        put("GRAMMAR_ENDPOINT_URL", self.grammar.endpoint_url);
        put(
            "GRAMMAR_TIMEOUT_SECS",
            self.grammar.timeout_secs.map(|s| s.to_string()),
        );
        put(
            "GRAMMAR_CONNECT_TIMEOUT_SECS",
            self.grammar.connect_timeout_secs.map(|s| s.to_string()),
        );
        values
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|_| ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
    })
}

fn parse_secs(key: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidSeconds { key, value: v }),
    }
}

impl Config {
    /// Resolve configuration from the optional TOML file at `path` and the
    /// process environment (which wins). A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))
            }
        };

        let config = Self::from_sources(content.as_deref(), |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Resolve configuration from TOML text and an environment lookup.
    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = match file {
            Some(text) => toml::from_str::<FileConfig>(text)?.into_values(),
            None => HashMap::new(),
        };

        let mut get = |key: &'static str| -> Option<String> {
            env(key)
                .or_else(|| values.remove(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let token = get("TOKEN");
        let admin_chat_id = get("ADMIN_CHAT_ID");
        // Vercel exposes its own host as VERCEL_URL, without a scheme
        let public_url = match get("PUBLIC_URL") {
            Some(url) => Some(url),
            None => get("VERCEL_URL").map(|host| {
                if host.contains("://") {
                    host
                } else {
                    format!("https://{host}")
                }
            }),
        };
        let endpoint = get("GRAMMAR_ENDPOINT_URL");

        let missing: Vec<&'static str> = REQUIRED_KEYS
            .iter()
            .zip([&token, &admin_chat_id, &public_url, &endpoint])
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| *key)
            .collect();

        let (Some(bot_token), Some(admin_chat_id), Some(public_url), Some(endpoint)) =
            (token, admin_chat_id, public_url, endpoint)
        else {
            return Err(ConfigError::Missing(missing));
        };

        let admin_chat_id = admin_chat_id
            .parse::<i64>()
            .map_err(|_| ConfigError::InvalidChatId(admin_chat_id.clone()))?;

        let api_url = get("TELEGRAM_API_URL")
            .map(|v| parse_url("TELEGRAM_API_URL", &v))
            .transpose()?;

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidBindAddr(bind_addr.clone()))?;

        let total = parse_secs(
            "GRAMMAR_TIMEOUT_SECS",
            get("GRAMMAR_TIMEOUT_SECS"),
            DEFAULT_TIMEOUT_SECS,
        )?;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&total) {
            return Err(ConfigError::TimeoutOutOfRange(total));
        }
        let connect = parse_secs(
            "GRAMMAR_CONNECT_TIMEOUT_SECS",
            get("GRAMMAR_CONNECT_TIMEOUT_SECS"),
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;
        if connect > total {
            return Err(ConfigError::ConnectExceedsTotal { connect, total });
        }

        Ok(Config {
            telegram: TelegramConfig {
                bot_token,
                admin_chat_id,
                api_url,
            },
            server: ServerConfig {
                public_url: parse_url("PUBLIC_URL", &public_url)?,
                bind_addr,
            },
            grammar: GrammarConfig {
                endpoint: parse_url("GRAMMAR_ENDPOINT_URL", &endpoint)?,
                timeout: Duration::from_secs(total),
                connect_timeout: Duration::from_secs(connect),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("TOKEN", "123:abc"),
            ("ADMIN_CHAT_ID", "1581506880"),
            ("PUBLIC_URL", "https://relay.example.com"),
            ("GRAMMAR_ENDPOINT_URL", "https://grammar.example.com/api/correct"),
        ]
    }

    #[test]
    fn test_env_only_with_defaults() {
        let config = Config::from_sources(None, env_from(&full_env())).unwrap();
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.admin_chat_id, 1581506880);
        assert!(config.telegram.api_url.is_none());
        assert_eq!(config.server.public_url.as_str(), "https://relay.example.com/");
        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.grammar.timeout, Duration::from_secs(9));
        assert_eq!(config.grammar.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_keys_listed_in_order() {
        let err = Config::from_sources(None, env_from(&[("ADMIN_CHAT_ID", "1")])).unwrap_err();
        match &err {
            ConfigError::Missing(keys) => {
                assert_eq!(keys, &vec!["TOKEN", "PUBLIC_URL", "GRAMMAR_ENDPOINT_URL"])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "Missing critical environment variables: TOKEN, PUBLIC_URL, GRAMMAR_ENDPOINT_URL"
        );
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut env = full_env();
        env[0] = ("TOKEN", "   ");
        let err = Config::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref k) if k == &vec!["TOKEN"]));
    }

    #[test]
    fn test_invalid_admin_chat_id() {
        let mut env = full_env();
        env[1] = ("ADMIN_CHAT_ID", "not-a-number");
        let err = Config::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidChatId(_)));
    }

    #[test]
    fn test_timeout_range_enforced() {
        let mut env = full_env();
        env.push(("GRAMMAR_TIMEOUT_SECS", "30"));
        let err = Config::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(err, ConfigError::TimeoutOutOfRange(30)));

        let mut env = full_env();
        env.push(("GRAMMAR_TIMEOUT_SECS", "10"));
        env.push(("GRAMMAR_CONNECT_TIMEOUT_SECS", "12"));
        let err = Config::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ConnectExceedsTotal {
                connect: 12,
                total: 10
            }
        ));
    }

    #[test]
    fn test_file_values_with_env_override() {
        let toml_text = r#"
[telegram]
token = "file-token"
admin_chat_id = 42

[server]
public_url = "https://file.example.com"
bind_addr = "127.0.0.1:9000"

[grammar]
endpoint_url = "https://grammar.example.com/api/correct"
timeout_secs = 20
"#;
        let config =
            Config::from_sources(Some(toml_text), env_from(&[("TOKEN", "env-token")])).unwrap();
        assert_eq!(config.telegram.bot_token, "env-token");
        assert_eq!(config.telegram.admin_chat_id, 42);
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.grammar.timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_bad_url_is_reported() {
        let mut env = full_env();
        env[3] = ("GRAMMAR_ENDPOINT_URL", "grammar endpoint");
        let err = Config::from_sources(None, env_from(&env)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidUrl {
                key: "GRAMMAR_ENDPOINT_URL",
                ..
            }
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = Config::from_sources(None, env_from(&full_env())).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("123:abc"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_vercel_url_stands_in_for_public_url() {
        let mut env = full_env();
        env[2] = ("VERCEL_URL", "relay-abc123.vercel.app");
        let config = Config::from_sources(None, env_from(&env)).unwrap();
        assert_eq!(
            config.server.public_url.as_str(),
            "https://relay-abc123.vercel.app/"
        );

        env[2] = ("VERCEL_URL", "http://localhost:3000");
        let config = Config::from_sources(None, env_from(&env)).unwrap();
        assert_eq!(config.server.public_url.as_str(), "http://localhost:3000/");
    }

    #[test]
    fn test_public_url_wins_over_vercel_url() {
        let mut env = full_env();
        env.push(("VERCEL_URL", "relay-abc123.vercel.app"));
        let config = Config::from_sources(None, env_from(&env)).unwrap();
        assert_eq!(config.server.public_url.as_str(), "https://relay.example.com/");

        let err = Config::from_sources(None, env_from(&[("ADMIN_CHAT_ID", "1")])).unwrap_err();
        assert!(err.to_string().contains("PUBLIC_URL"));
    }
}
