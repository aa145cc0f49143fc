use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_VERIFIER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_VERIFY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Values as they appear in the TOML file; all optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    verifier_url: Option<String>,
    verify_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    photo_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the face-verification service.
    pub verifier_url: String,
    /// Overall timeout in seconds for one verification request.
    pub verify_timeout_secs: u64,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Root of the local photo store.
    pub photo_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

impl Config {
    /// Load the config file (if any), then apply `FACECLOCK_*` environment
    /// overrides.
    ///
    /// A missing file at the default location is fine; a missing file named
    /// by `FACECLOCK_CONFIG` is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();
        let (path, explicit) = match env("FACECLOCK_CONFIG") {
            Some(p) => (PathBuf::from(p), true),
            None => (xdg_dir("XDG_CONFIG_HOME", ".config").join("faceclock/config.toml"), false),
        };
        let file = read_file(&path, explicit)?;
        let config = Self::resolve(file, env)?;
        tracing::debug!(config_file = %path.display(), ?config, "configuration loaded");
        Ok(config)
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_dir = match env("XDG_DATA_HOME") {
            Some(d) => PathBuf::from(d),
            None => home_dir(&env).join(".local/share"),
        }
        .join("faceclock");

        let verifier_url = env("FACECLOCK_VERIFIER_URL")
            .or(file.verifier_url)
            .unwrap_or_else(|| DEFAULT_VERIFIER_URL.to_string());
        if !(verifier_url.starts_with("http://") || verifier_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "verifier_url",
                value: verifier_url,
                reason: "expected an http:// or https:// URL",
            });
        }

        Ok(Self {
            verifier_url,
            verify_timeout_secs: env_u64(
                &env,
                "FACECLOCK_VERIFY_TIMEOUT_SECS",
                file.verify_timeout_secs,
                DEFAULT_VERIFY_TIMEOUT_SECS,
            )?,
            connect_timeout_secs: env_u64(
                &env,
                "FACECLOCK_CONNECT_TIMEOUT_SECS",
                file.connect_timeout_secs,
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?,
            photo_dir: env_path(&env, "FACECLOCK_PHOTO_DIR")
                .or(file.photo_dir)
                .unwrap_or_else(|| data_dir.join("photos")),
            db_path: env_path(&env, "FACECLOCK_DB_PATH")
                .or(file.db_path)
                .unwrap_or_else(|| data_dir.join("attendance.db")),
        })
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn read_file(path: &Path, explicit: bool) -> Result<FileConfig, ConfigError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            return Ok(FileConfig::default())
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn home_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    PathBuf::from(env("HOME").unwrap_or_else(|| "/tmp".to_string()))
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    let env = |key: &str| std::env::var(key).ok();
    env(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir(&env).join(fallback))
}

fn env_path(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    env(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Positive integer from the environment, else the file value, else the default.
fn env_u64(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    file_value: Option<u64>,
    default: u64,
) -> Result<u64, ConfigError> {
    let value = match env(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: "expected a whole number of seconds",
        })?,
        None => file_value.unwrap_or(default),
    };
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "must be greater than zero",
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/ada")])).unwrap();
        assert_eq!(config.verifier_url, "http://127.0.0.1:8000");
        assert_eq!(config.verify_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.photo_dir,
            PathBuf::from("/home/ada/.local/share/faceclock/photos")
        );
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/ada/.local/share/faceclock/attendance.db")
        );
    }

    #[test]
    fn test_xdg_data_home() {
        let config =
            Config::resolve(FileConfig::default(), env_of(&[("XDG_DATA_HOME", "/data")])).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/data/faceclock/attendance.db"));
    }

    #[test]
    fn test_file_values_then_env_overrides() {
        let file: FileConfig = toml::from_str(
            r#"
            verifier_url = "http://verifier.internal:9000"
            verify_timeout_secs = 12
            db_path = "/srv/faceclock.db"
            "#,
        )
        .unwrap();
        let env = env_of(&[
            ("HOME", "/home/ada"),
            ("FACECLOCK_VERIFY_TIMEOUT_SECS", "45"),
        ]);
        let config = Config::resolve(file, env).unwrap();
        assert_eq!(config.verifier_url, "http://verifier.internal:9000");
        assert_eq!(config.verify_timeout_secs, 45);
        assert_eq!(config.db_path, PathBuf::from("/srv/faceclock.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad_number = env_of(&[("FACECLOCK_CONNECT_TIMEOUT_SECS", "soon")]);
        assert!(matches!(
            Config::resolve(FileConfig::default(), bad_number),
            Err(ConfigError::Invalid { key: "FACECLOCK_CONNECT_TIMEOUT_SECS", .. })
        ));

        let zero = env_of(&[("FACECLOCK_VERIFY_TIMEOUT_SECS", "0")]);
        assert!(Config::resolve(FileConfig::default(), zero).is_err());

        let bad_url = env_of(&[("FACECLOCK_VERIFIER_URL", "localhost:8000")]);
        assert!(matches!(
            Config::resolve(FileConfig::default(), bad_url),
            Err(ConfigError::Invalid { key: "verifier_url", .. })
        ));
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("verifer_url = \"http://x\"").is_err());
    }

    #[test]
    fn test_read_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(read_file(&path, false).is_ok());
        assert!(matches!(read_file(&path, true), Err(ConfigError::Read { .. })));

        std::fs::write(&path, "verify_timeout_secs = \"ten\"").unwrap();
        assert!(matches!(read_file(&path, false), Err(ConfigError::Parse { .. })));
    }
}
