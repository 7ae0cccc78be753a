use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const CHANNEL_ACCESS_TOKEN_ENV: &str = "CHANNEL_ACCESS_TOKEN";
pub const CHANNEL_SECRET_ENV: &str = "CHANNEL_SECRET";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[cfg(feature = "sentry")]
    pub sentry: Option<SentryConfig>,

    #[serde(default)]
    pub http: HTTPConfig,

    #[serde(default)]
    pub line: LineConfig,

    #[serde(default)]
    pub completion: CompletionConfig,
}
impl AppConfig {
    /// Loads the TOML configuration. The default `config.toml` is optional,
    /// an explicitly given path must exist.
    pub fn load(config_filepath: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_filepath {
            Some(path) => path,
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !path.exists() {
                    tracing::debug!("No {DEFAULT_CONFIG_PATH} found, using defaults");
                    return Ok(Self::default());
                }
                path
            }
        };

        let config_content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {config_path:?}"))?;

        Self::parse(&config_content)
            .with_context(|| format!("Failed to parse TOML config file: {config_path:?}"))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Secrets required to talk to both APIs, only ever read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub channel_access_token: String,
    pub channel_secret: String,
    pub openai_api_key: String,
}
impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| -> Result<String> {
            match lookup(key) {
                Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
                Some(_) => bail!("Required {key} environment variable is empty!"),
                None => bail!("Missing required {key} environment variable!"),
            }
        };

        Ok(Self {
            channel_access_token: require(CHANNEL_ACCESS_TOKEN_ENV)?,
            channel_secret: require(CHANNEL_SECRET_ENV)?,
            openai_api_key: require(OPENAI_API_KEY_ENV)?,
        })
    }
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("channel_access_token", &"<redacted>")
            .field("channel_secret", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(feature = "sentry")]
#[derive(Debug, Deserialize)]
pub struct SentryConfig {
    pub dsn: String,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub server_name: Option<String>,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_true")]
    pub send_default_pii: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HTTPConfig {
    #[serde(default = "default_http_address")]
    pub address: SocketAddr,

    #[serde(default)]
    pub tls: Option<TLSConfig>,
}
impl Default for HTTPConfig {
    fn default() -> Self {
        Self {
            address: default_http_address(),
            tls: None,
        }
    }
}

#[cfg_attr(
    not(any(feature = "tls-rustls", feature = "tls-native")),
    allow(dead_code)
)]
#[derive(Debug, Clone, Deserialize)]
pub struct TLSConfig {
    #[serde(deserialize_with = "deserialize_existing_file")]
    pub certificate_path: PathBuf,

    #[serde(deserialize_with = "deserialize_existing_file")]
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    #[serde(default = "default_line_api_base_url")]
    pub api_base_url: String,

    #[serde(
        default = "default_line_timeout_secs",
        deserialize_with = "deserialize_timeout_secs"
    )]
    pub timeout_secs: u64,

    /// Sent in reply to follow events.
    #[serde(default = "default_greeting_text")]
    pub greeting_text: String,

    /// Sent in place of the completion when the completion call fails.
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,
}
impl LineConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
impl Default for LineConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_line_api_base_url(),
            timeout_secs: default_line_timeout_secs(),
            greeting_text: default_greeting_text(),
            fallback_text: default_fallback_text(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_base_url")]
    pub base_url: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(
        default = "default_completion_timeout_secs",
        deserialize_with = "deserialize_timeout_secs"
    )]
    pub timeout_secs: u64,
}
impl CompletionConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_completion_base_url(),
            model: default_completion_model(),
            system_prompt: default_system_prompt(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_http_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8000)
}
fn default_line_api_base_url() -> String {
    "https://api.line.me".to_string()
}
fn default_line_timeout_secs() -> u64 {
    10
}
fn default_greeting_text() -> String {
    "Thank You!".to_string()
}
fn default_fallback_text() -> String {
    "An error occurred.".to_string()
}
fn default_completion_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    30
}
#[cfg(feature = "sentry")]
fn default_true() -> bool {
    true
}

fn deserialize_existing_file<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = PathBuf::deserialize(deserializer)?;
    if !path.exists() {
        return Err(serde::de::Error::custom(format!(
            "File does not exist: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(serde::de::Error::custom(format!(
            "Path is not a file: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// A zero timeout makes every outbound request fail immediately.
fn deserialize_timeout_secs<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    if secs == 0 {
        return Err(serde::de::Error::custom(
            "Timeout must be at least 1 second",
        ));
    }
    Ok(secs)
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.http.address, default_http_address());
        assert!(config.http.tls.is_none());
        assert_eq!(config.line.api_base_url, "https://api.line.me");
        assert_eq!(config.line.greeting_text, "Thank You!");
        assert_eq!(config.line.fallback_text, "An error occurred.");
        assert_eq!(config.completion.model, "gpt-3.5-turbo");
        assert_eq!(config.completion.timeout(), Duration::from_secs(30));
        assert_eq!(config.line.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_sections_keep_remaining_defaults() {
        let config = AppConfig::parse(
            r#"
            [http]
            address = "127.0.0.1:9000"

            [line]
            fallback_text = "エラーが発生しました。"

            [completion]
            model = "gpt-4.1-mini"
            timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.http.address.port(), 9000);
        assert_eq!(config.line.fallback_text, "エラーが発生しました。");
        assert_eq!(config.line.greeting_text, "Thank You!");
        assert_eq!(config.completion.model, "gpt-4.1-mini");
        assert_eq!(config.completion.timeout(), Duration::from_secs(5));
        assert_eq!(config.completion.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_tls_requires_existing_files() {
        let result = AppConfig::parse(
            r#"
            [http.tls]
            certificate_path = "/definitely/not/here.pem"
            key_path = "/definitely/not/here.key"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_timeouts_are_rejected() {
        for content in ["[line]\ntimeout_secs = 0", "[completion]\ntimeout_secs = 0"] {
            let err = AppConfig::parse(content).unwrap_err();
            assert!(
                format!("{err:#}").contains("Timeout must be at least 1 second"),
                "{err:#}"
            );
        }

        let config =
            AppConfig::parse("[line]\ntimeout_secs = 1\n[completion]\ntimeout_secs = 1").unwrap();
        assert_eq!(config.line.timeout(), Duration::from_secs(1));
        assert_eq!(config.completion.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_explicit_missing_config_file_fails() {
        let result = AppConfig::load(Some(PathBuf::from("/definitely/not/config.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_credentials_all_present() {
        let credentials = Credentials::from_lookup(lookup_from(&[
            (CHANNEL_ACCESS_TOKEN_ENV, "token"),
            (CHANNEL_SECRET_ENV, " secret\n"),
            (OPENAI_API_KEY_ENV, "sk-test"),
        ]))
        .unwrap();

        assert_eq!(credentials.channel_access_token, "token");
        assert_eq!(credentials.channel_secret, "secret");
        assert_eq!(credentials.openai_api_key, "sk-test");
    }

    #[test]
    fn test_credentials_missing_or_empty() {
        let err = Credentials::from_lookup(lookup_from(&[
            (CHANNEL_ACCESS_TOKEN_ENV, "token"),
            (OPENAI_API_KEY_ENV, "sk-test"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(CHANNEL_SECRET_ENV));

        let err = Credentials::from_lookup(lookup_from(&[
            (CHANNEL_ACCESS_TOKEN_ENV, "token"),
            (CHANNEL_SECRET_ENV, "secret"),
            (OPENAI_API_KEY_ENV, "   "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(OPENAI_API_KEY_ENV));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let credentials = Credentials::from_lookup(lookup_from(&[
            (CHANNEL_ACCESS_TOKEN_ENV, "token-value"),
            (CHANNEL_SECRET_ENV, "secret-value"),
            (OPENAI_API_KEY_ENV, "sk-value"),
        ]))
        .unwrap();

        let debug = format!("{credentials:?}");
        assert!(!debug.contains("token-value"));
        assert!(!debug.contains("secret-value"));
        assert!(!debug.contains("sk-value"));
    }
}
