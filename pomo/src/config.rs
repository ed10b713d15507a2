use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub status_interval_ms: u64,
    #[serde(deserialize_with = "human_duration")]
    pub default_duration: Duration,
    pub default_pomodoros: u32,
    pub datetime_format: String,
}

impl SessionConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let socket_path = data_dir()
            .map(|dir| dir.join("pomo.sock"))
            .unwrap_or_else(|| PathBuf::from(pomo_ipc::DEFAULT_SOCKET_PATH));
        Self { socket_path }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = data_dir()
            .map(|dir| dir.join("pomo.db"))
            .unwrap_or_else(|| std::env::temp_dir().join("pomo.db"));
        Self {
            backend: DatabaseBackend::Sqlite,
            path,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: 1000,
            default_duration: Duration::from_secs(25 * 60),
            default_pomodoros: 4,
            datetime_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "pomo", "pomo")
}

fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    parse_duration(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid duration {s:?}")))
}

/// Parses `25`, `25m`, `1h30m` or `90s`. A bare number means minutes.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Ok(minutes) = s.parse::<u64>() {
        let secs = minutes.checked_mul(60)?;
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    let mut total_seconds: u64 = 0;
    let mut current_num = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            current_num.push(c);
        } else {
            let num: u64 = current_num.parse().ok()?;
            current_num.clear();
            let secs = match c {
                'h' => num.checked_mul(3600)?,
                'm' => num.checked_mul(60)?,
                's' => num,
                _ => return None,
            };
            total_seconds = total_seconds.checked_add(secs)?;
        }
    }

    // trailing number without a unit counts as minutes
    if !current_num.is_empty() {
        let num: u64 = current_num.parse().ok()?;
        total_seconds = total_seconds.checked_add(num.checked_mul(60)?)?;
    }

    (total_seconds > 0).then(|| Duration::from_secs(total_seconds))
}

/// Inverse of [`parse_duration`] for display: `25m`, `1h30m`, `1m30s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 {
        out.push_str(&format!("{m}m"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}s"));
    }
    out
}

/// Loads `path`, or `pomo.toml` in the user's config directory when no path
/// is given. A missing default file yields the defaults; a missing explicit
/// file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match project_dirs() {
            Some(proj_dirs) => {
                let path = proj_dirs.config_dir().join("pomo.toml");
                if !path.exists() {
                    return Ok(Config::default());
                }
                path
            }
            None => return Ok(Config::default()),
        },
    };
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file at {:?}", path))
}

/// Creates the directories the socket and database live in.
pub fn ensure_dirs(config: &Config) -> Result<()> {
    let mut dirs = vec![config.server.socket_path.parent()];
    if config.database.backend == DatabaseBackend::Sqlite {
        dirs.push(config.database.path.parent());
    }
    for dir in dirs.into_iter().flatten() {
        if dir.as_os_str().is_empty() {
            continue;
        }
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.toml");
        fs::write(
            &path,
            r#"
[server]
socket_path = "/run/user/1000/pomo.sock"

[database]
backend = "memory"

[session]
default_duration = "50m"
"#,
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.server.socket_path, PathBuf::from("/run/user/1000/pomo.sock"));
        assert_eq!(config.database.backend, DatabaseBackend::Memory);
        assert_eq!(config.session.default_duration, Duration::from_secs(50 * 60));
        assert_eq!(config.session.default_pomodoros, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.notifications.enabled);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pomo.toml");
        fs::write(&path, "[session]\ndefault_duration = \"soon\"\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("25"), Some(Duration::from_secs(1500)));
        assert_eq!(parse_duration("25m"), Some(Duration::from_secs(1500)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("m"), None);
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration("999999999999999999h"), None);
        assert_eq!(parse_duration("999999999999999999"), None);
        assert_eq!(parse_duration("999999999999999999m"), None);
        assert_eq!(parse_duration("18446744073709551615s1s"), None);
        assert_eq!(parse_duration("99999999999999999999s"), None);
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(1500)), "25m");
        assert_eq!(format_duration(Duration::from_secs(5400)), "1h30m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
