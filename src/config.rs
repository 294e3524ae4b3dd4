//! Configuration types.
//!
//! Everything is read from environment variables. [`BotConfig::from_lookup`]
//! takes the lookup as a closure so tests never touch the process
//! environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::detection::DetectionMode;
use crate::dispatch::DispatcherConfig;
use crate::error::ConfigError;
use crate::imaging::FilterSettings;
use crate::session::DEFAULT_DEDUP_CAPACITY;

const DEFAULT_DETECTION_URL: &str = "http://localhost:8080";
const DEFAULT_GROUP_DEBOUNCE_MS: u64 = 1500;

/// Timeout for calls to the detection service and the object store.
pub const COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Path the detection service posts asynchronous results to.
pub const DETECTION_CALLBACK_PATH: &str = "/detections/callback";

/// Query parameter carrying the shared secret on detection callbacks.
pub const CALLBACK_TOKEN_PARAM: &str = "token";

/// Path Telegram delivers updates to in webhook mode.
pub const WEBHOOK_PATH: &str = "/webhook/telegram";

/// Where produced images are uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    Disabled,
    Local(PathBuf),
    Http(String),
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: SecretString,
    /// Public base URL. Enables webhook mode when set.
    pub app_url: Option<String>,
    pub webhook_secret: String,
    pub allowed_users: Vec<String>,
    pub detection_url: String,
    pub detection_mode: DetectionMode,
    pub storage: StorageConfig,
    pub bind_addr: SocketAddr,
    pub dispatcher: DispatcherConfig,
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("TELEGRAM_BOT_TOKEN")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".to_string()))?;

        let app_url = get("BOT_APP_URL").map(|u| u.trim_end_matches('/').to_string());

        let webhook_secret =
            get("WEBHOOK_SECRET").unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        // Telegram accepts 1-256 of [A-Za-z0-9_-]; the same value rides in
        // the detection callback query string unescaped.
        if webhook_secret.len() > 256
            || !webhook_secret
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::InvalidValue {
                key: "WEBHOOK_SECRET".to_string(),
                message: "use 1-256 characters from A-Z, a-z, 0-9, '_' and '-'".to_string(),
            });
        }

        let allowed_users: Vec<String> = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let detection_url = get("DETECTION_SERVICE_URL")
            .unwrap_or_else(|| DEFAULT_DETECTION_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let detection_mode = match get("DETECTION_MODE").as_deref().map(str::to_lowercase) {
            None => DetectionMode::Sync,
            Some(mode) if mode == "sync" => DetectionMode::Sync,
            Some(mode) if mode == "async" => {
                let base = app_url.as_ref().ok_or_else(|| ConfigError::InvalidValue {
                    key: "DETECTION_MODE".to_string(),
                    message: "async mode needs BOT_APP_URL for the callback".to_string(),
                })?;
                DetectionMode::Async {
                    callback_url: format!(
                        "{base}{DETECTION_CALLBACK_PATH}?{CALLBACK_TOKEN_PARAM}={webhook_secret}"
                    ),
                }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "DETECTION_MODE".to_string(),
                    message: format!("expected 'sync' or 'async', got '{other}'"),
                });
            }
        };

        let storage = match (get("STORAGE_DIR"), get("STORAGE_URL")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_URL".to_string(),
                    message: "set only one of STORAGE_DIR and STORAGE_URL".to_string(),
                });
            }
            (Some(dir), None) => StorageConfig::Local(PathBuf::from(dir)),
            (None, Some(url)) => StorageConfig::Http(url),
            (None, None) => StorageConfig::Disabled,
        };

        let bind_addr: SocketAddr = parse_or("BIND_ADDR", get("BIND_ADDR"), || {
            Ok(SocketAddr::from(([0, 0, 0, 0], 8443)))
        })?;

        let debounce_ms: u64 = parse_or("GROUP_DEBOUNCE_MS", get("GROUP_DEBOUNCE_MS"), || {
            Ok(DEFAULT_GROUP_DEBOUNCE_MS)
        })?;

        let dedup_capacity: usize = parse_or("DEDUP_CAPACITY", get("DEDUP_CAPACITY"), || {
            Ok(DEFAULT_DEDUP_CAPACITY)
        })?;
        if dedup_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DEDUP_CAPACITY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let defaults = FilterSettings::default();
        let blur_kernel: usize =
            parse_or("BLUR_KERNEL", get("BLUR_KERNEL"), || Ok(defaults.blur_kernel))?;
        if blur_kernel == 0 {
            return Err(ConfigError::InvalidValue {
                key: "BLUR_KERNEL".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            bot_token,
            app_url,
            webhook_secret,
            allowed_users,
            detection_url,
            detection_mode,
            storage,
            bind_addr,
            dispatcher: DispatcherConfig {
                group_debounce: Duration::from_millis(debounce_ms),
                dedup_capacity,
                filters: FilterSettings {
                    blur_kernel,
                    ..defaults
                },
            },
            log_dir: get("LOG_DIR").map(PathBuf::from),
        })
    }

    /// Full webhook URL, when running in webhook mode.
    pub fn webhook_url(&self) -> Option<String> {
        self.app_url
            .as_ref()
            .map(|base| format!("{base}{WEBHOOK_PATH}"))
    }
}

fn parse_or<T>(
    key: &str,
    raw: Option<String>,
    default: impl FnOnce() -> Result<T, ConfigError>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{value}': {e}"),
        }),
        None => default(),
    }
}
