//! Configuration for the conversation client
//!
//! Values are resolved env > `~/.config/fluentnow/config.toml` > default.
//! The file is a partial overlay; every field is optional.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Fallback backend when no endpoint is configured (local dev server)
pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:8000";

/// Socket path of the conversation endpoint on the backend
pub const CONVERSATION_PATH: &str = "/conversation";

/// Default wall-clock interval between outbound microphone chunks.
///
/// Every call site that slices or forwards captured audio must read the
/// configured interval from [`Config::chunk_interval`]; the cadence is a
/// single value, not a per-site assumption.
pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 300;

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend WebSocket base URL (scheme + host + port)
    pub backend_url: String,

    /// Interval between outbound microphone chunks
    pub chunk_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            chunk_interval: Duration::from_millis(DEFAULT_CHUNK_INTERVAL_MS),
        }
    }
}

impl Config {
    /// Load configuration with env > file > default precedence
    #[must_use]
    pub fn load() -> Self {
        let fc = load_config_file();

        let backend_url = std::env::var("FLUENTNOW_BACKEND_URL")
            .ok()
            .or(fc.connection.backend_url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());

        let chunk_interval_ms = std::env::var("FLUENTNOW_CHUNK_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(fc.audio.chunk_interval_ms)
            .unwrap_or(DEFAULT_CHUNK_INTERVAL_MS);

        Self {
            backend_url,
            chunk_interval: Duration::from_millis(chunk_interval_ms),
        }
    }

    /// Full URL of the conversation endpoint
    #[must_use]
    pub fn conversation_url(&self) -> String {
        format!(
            "{}{CONVERSATION_PATH}",
            self.backend_url.trim_end_matches('/')
        )
    }
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    connection: ConnectionFileConfig,

    #[serde(default)]
    audio: AudioFileConfig,
}

/// `[connection]` section
#[derive(Debug, Default, Deserialize)]
struct ConnectionFileConfig {
    /// Backend WebSocket base URL
    backend_url: Option<String>,
}

/// `[audio]` section
#[derive(Debug, Default, Deserialize)]
struct AudioFileConfig {
    /// Chunk interval in milliseconds
    chunk_interval_ms: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be
/// parsed; a broken file never blocks startup.
fn load_config_file() -> ConfigFile {
    let Some(path) = config_file_path() else {
        return ConfigFile::default();
    };

    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/fluentnow/config.toml`
fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("fluentnow").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_url_joins_path() {
        let config = Config {
            backend_url: "ws://coach.example:8000".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.conversation_url(),
            "ws://coach.example:8000/conversation"
        );
    }

    #[test]
    fn conversation_url_strips_trailing_slash() {
        let config = Config {
            backend_url: "ws://coach.example:8000/".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.conversation_url(),
            "ws://coach.example:8000/conversation"
        );
    }

    #[test]
    fn defaults_point_at_local_dev_server() {
        let config = Config::default();
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
        assert_eq!(
            config.chunk_interval,
            Duration::from_millis(DEFAULT_CHUNK_INTERVAL_MS)
        );
    }

    #[test]
    fn partial_file_overlays_defaults() {
        let fc: ConfigFile = toml::from_str("[audio]\nchunk_interval_ms = 500\n").unwrap();
        assert_eq!(fc.audio.chunk_interval_ms, Some(500));
        assert!(fc.connection.backend_url.is_none());
    }
}
