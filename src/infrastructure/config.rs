use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TOGGL_TOKEN_FILE: &str = "toggl-api";
const MARVIN_CREDENTIALS_FILE: &str = "marvin-credentials";
const TOGGL_TOKEN_ENV: &str = "TIMESYNC_TOGGL_API_TOKEN";
const MARVIN_ENV_PREFIX: &str = "TIMESYNC_MARVIN_";
const DEFAULT_CATEGORY: &str = "Work";
const DEFAULT_CREATE_CONCURRENCY: usize = 2;

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([(
        APP_JSON,
        serde_json::json!({
            "schema": 1,
            "category": DEFAULT_CATEGORY,
            "timezone": "local",
            "createConcurrency": DEFAULT_CREATE_CONCURRENCY,
            "workspaceId": null
        }),
    )])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

/// Zone used to turn a calendar day into an instant window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZoneSetting {
    Local,
    Named(Tz),
}

impl TimeZoneSetting {
    pub fn parse(value: &str) -> Result<Self, InfraError> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        value
            .parse::<Tz>()
            .map(Self::Named)
            .map_err(|error| {
                InfraError::InvalidConfig(format!("unknown timezone '{value}': {error}"))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub category: String,
    pub timezone: TimeZoneSetting,
    pub create_concurrency: usize,
    pub workspace_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppConfigFile {
    category: Option<String>,
    timezone: Option<String>,
    create_concurrency: Option<usize>,
    workspace_id: Option<i64>,
}

pub fn load_app_config(config_dir: &Path) -> Result<AppConfig, InfraError> {
    let path = config_dir.join(APP_JSON);
    let file: AppConfigFile = serde_json::from_value(read_config(&path)?)?;

    let category = file
        .category
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
    let timezone = match file.timezone.as_deref() {
        Some(raw) => TimeZoneSetting::parse(raw)?,
        None => TimeZoneSetting::Local,
    };

    Ok(AppConfig {
        category,
        timezone,
        create_concurrency: file
            .create_concurrency
            .unwrap_or(DEFAULT_CREATE_CONCURRENCY)
            .max(1),
        workspace_id: file.workspace_id,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarvinCredentials {
    pub sync_server: String,
    pub sync_database: String,
    pub sync_user: String,
    pub sync_password: String,
}

/// Parses the `key: value` credentials file exported by the task service.
/// Blank lines and lines starting with `# ` are skipped.
pub fn parse_credentials_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("# "))
        .filter_map(|line| line.split_once(": "))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

pub fn load_marvin_credentials_from_env(
    config_dir: &Path,
) -> Result<MarvinCredentials, InfraError> {
    load_marvin_credentials(config_dir, |key| std::env::var(key).ok())
}

pub fn load_marvin_credentials<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<MarvinCredentials, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = config_dir.join(MARVIN_CREDENTIALS_FILE);
    let from_file = match fs::read_to_string(&path) {
        Ok(contents) => parse_credentials_file(&contents),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(error) => return Err(error.into()),
    };

    let field = |key: &str, env_suffix: &str| -> Result<String, InfraError> {
        let env_key = format!("{MARVIN_ENV_PREFIX}{env_suffix}");
        optional_lookup_value(&lookup, &[env_key.as_str()])
            .or_else(|| {
                from_file
                    .get(key)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
            .ok_or_else(|| {
                InfraError::Credential(format!(
                    "missing {key} (set {env_key} or add it to {})",
                    path.display()
                ))
            })
    };

    Ok(MarvinCredentials {
        sync_server: field("syncServer", "SYNC_SERVER")?,
        sync_database: field("syncDatabase", "SYNC_DATABASE")?,
        sync_user: field("syncUser", "SYNC_USER")?,
        sync_password: field("syncPassword", "SYNC_PASSWORD")?,
    })
}

pub fn load_toggl_token_from_env(config_dir: &Path) -> Result<String, InfraError> {
    load_toggl_token(config_dir, |key| std::env::var(key).ok())
}

pub fn load_toggl_token<F>(config_dir: &Path, lookup: F) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(token) = optional_lookup_value(&lookup, &[TOGGL_TOKEN_ENV]) {
        return Ok(token);
    }
    let path = config_dir.join(TOGGL_TOKEN_FILE);
    match fs::read_to_string(&path) {
        Ok(raw) if !raw.trim().is_empty() => Ok(raw.trim().to_string()),
        Ok(_) => Err(InfraError::Credential(format!("{} is empty", path.display()))),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            Err(InfraError::Credential(format!(
                "missing toggl api token (set {TOGGL_TOKEN_ENV} or write it to {})",
                path.display()
            )))
        }
        Err(error) => Err(error.into()),
    }
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "timesync-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp dir");
            Self { path }
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn default_config_loads_with_defaults() {
        let dir = TempDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        let config = load_app_config(&dir.path).expect("load config");
        assert_eq!(config.category, "Work");
        assert_eq!(config.timezone, TimeZoneSetting::Local);
        assert_eq!(config.create_concurrency, 2);
        assert_eq!(config.workspace_id, None);
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let dir = TempDir::new();
        fs::write(
            dir.path.join(APP_JSON),
            r#"{"schema": 1, "category": "Datakami", "timezone": "Europe/Amsterdam", "createConcurrency": 0, "workspaceId": 42}"#,
        )
        .expect("write config");
        ensure_default_configs(&dir.path).expect("ensure defaults");

        let config = load_app_config(&dir.path).expect("load config");
        assert_eq!(config.category, "Datakami");
        assert_eq!(
            config.timezone,
            TimeZoneSetting::Named(chrono_tz::Europe::Amsterdam)
        );
        assert_eq!(config.create_concurrency, 1);
        assert_eq!(config.workspace_id, Some(42));
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempDir::new();
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 2}"#).expect("write config");
        match load_app_config(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => {
                assert!(message.contains("unsupported schema"))
            }
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        assert!(TimeZoneSetting::parse("Mars/Olympus").is_err());
        assert_eq!(TimeZoneSetting::parse(" LOCAL ").expect("local"), TimeZoneSetting::Local);
    }

    #[test]
    fn credentials_file_skips_comments() {
        let parsed = parse_credentials_file(
            "# exported credentials\n\nsyncServer: https://sync.example.com\nsyncUser: user-1\napiToken: abc: def\n",
        );
        assert_eq!(parsed.get("syncServer").map(String::as_str), Some("https://sync.example.com"));
        assert_eq!(parsed.get("syncUser").map(String::as_str), Some("user-1"));
        assert_eq!(parsed.get("apiToken").map(String::as_str), Some("abc: def"));
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn marvin_credentials_prefer_environment() {
        let dir = TempDir::new();
        fs::write(
            dir.path.join(MARVIN_CREDENTIALS_FILE),
            "syncServer: https://sync.example.com\nsyncDatabase: u-db\nsyncUser: user-1\nsyncPassword: from-file\n",
        )
        .expect("write credentials");

        let credentials = load_marvin_credentials(&dir.path, |key| match key {
            "TIMESYNC_MARVIN_SYNC_PASSWORD" => Some("from-env".to_string()),
            _ => None,
        })
        .expect("load credentials");

        assert_eq!(credentials.sync_server, "https://sync.example.com");
        assert_eq!(credentials.sync_database, "u-db");
        assert_eq!(credentials.sync_password, "from-env");
    }

    #[test]
    fn marvin_credentials_report_missing_field() {
        let dir = TempDir::new();
        match load_marvin_credentials(&dir.path, |_| None) {
            Err(InfraError::Credential(message)) => assert!(message.contains("syncServer")),
            other => panic!("expected credential error, got {other:?}"),
        }
    }

    #[test]
    fn toggl_token_falls_back_to_file() {
        let dir = TempDir::new();
        assert!(load_toggl_token(&dir.path, |_| None).is_err());

        fs::write(dir.path.join(TOGGL_TOKEN_FILE), "token-from-file\n").expect("write token");
        assert_eq!(
            load_toggl_token(&dir.path, |_| None).expect("token from file"),
            "token-from-file"
        );
        assert_eq!(
            load_toggl_token(&dir.path, |key| (key == TOGGL_TOKEN_ENV)
                .then(|| "token-from-env".to_string()))
            .expect("token from env"),
            "token-from-env"
        );
    }
}
