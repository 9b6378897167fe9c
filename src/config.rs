use crate::error::{BridgeError, Result};
use crate::ledger::LedgerStrategy;
use crate::locator::{HeaderConvention, TimesheetLayout};
use crate::month_sheet::VisibilityMode;
use crate::sheets::auth::ServiceAccountKey;
use crate::sheets::retry::RetryPolicy;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{info, warn};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Application settings
///
/// Read from `config.json` (camelCase keys, every key optional), then
/// overridden by the environment:
/// - `SPREADSHEET_ID` replaces `spreadsheetId`
/// - `PORT` replaces `port`
/// - `CONFIG_PATH` names a different file to read
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[serde(deserialize_with = "port_from_string_or_number")]
    pub port: u16,
    #[serde(alias = "spreadsheetID")]
    pub spreadsheet_id: String,
    /// Ledger sheet receiving production records
    pub production_sheet: String,
    /// Template month-sheet cloned for every new month
    pub timesheet_sheet: String,
    /// Range listing employee names for the form's dropdown
    pub workers_range: String,
    /// Range listing part/operation names for the form's dropdown
    pub operations_range: String,
    pub static_dir: PathBuf,
    pub credentials_path: PathBuf,
    pub visibility_mode: VisibilityMode,
    pub ledger_strategy: LedgerStrategy,
    pub day_header: HeaderConvention,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            spreadsheet_id: String::new(),
            production_sheet: "Выпуск".to_string(),
            timesheet_sheet: "Табель".to_string(),
            workers_range: "Работники!A1:A".to_string(),
            operations_range: "Норма выпуска!A1:A".to_string(),
            static_dir: PathBuf::from("static"),
            credentials_path: PathBuf::from("credentials.json"),
            visibility_mode: VisibilityMode::default(),
            ledger_strategy: LedgerStrategy::default(),
            day_header: HeaderConvention::default(),
            request_timeout_secs: 15,
            retry_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

fn port_from_string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => Ok(n),
        Port::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Returns
    /// * `Result<Config>` - The merged configuration, or a `Config` error when
    ///   no spreadsheet id is available
    pub fn load() -> Result<Config> {
        let path = std::env::var("CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Config::load_from(Path::new(&path), |name| std::env::var(name).ok())
    }

    /// Load configuration from `path`, with `env` supplying overrides
    ///
    /// A missing file means defaults. A malformed file is logged and
    /// ignored, as is an unparseable `PORT`.
    pub fn load_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Configuration read from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Error reading {}: {}", path.display(), e);
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        };

        if let Some(id) = env("SPREADSHEET_ID").filter(|v| !v.trim().is_empty()) {
            config.spreadsheet_id = id.trim().to_string();
        }
        if let Some(port) = env("PORT") {
            match port.trim().parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Ignoring invalid PORT value '{}'", port),
            }
        }

        if config.spreadsheet_id.trim().is_empty() {
            return Err(BridgeError::Config(
                "SpreadsheetID must be specified".to_string(),
            ));
        }
        Ok(config)
    }

    /// Load the service-account key
    ///
    /// `GOOGLE_CREDENTIALS_BASE64` (base64 of the JSON key file) wins over
    /// the file at `credentials_path`.
    pub fn load_credentials(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<ServiceAccountKey> {
        let encoded = env("GOOGLE_CREDENTIALS_BASE64");
        if let Some(encoded) = encoded.filter(|v| !v.trim().is_empty()) {
            let data = STANDARD.decode(encoded.trim()).map_err(|e| {
                BridgeError::Config(format!("failed to decode base64 credentials: {}", e))
            })?;
            info!("Using credentials from GOOGLE_CREDENTIALS_BASE64");
            return ServiceAccountKey::from_json(&data);
        }

        match fs::read(&self.credentials_path) {
            Ok(data) => {
                info!("Using credentials from {}", self.credentials_path.display());
                ServiceAccountKey::from_json(&data)
            }
            Err(_) => Err(BridgeError::Config("no credentials provided".to_string())),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Timesheet grid layout with the configured header convention
    pub fn layout(&self) -> TimesheetLayout {
        TimesheetLayout {
            header: self.day_header,
            ..TimesheetLayout::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn file_values_and_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"port": "9090", "spreadsheetID": "abc123", "productionSheet": "Выпуск 2", "visibilityMode": "singleActive", "ledgerStrategy": "appendOnly"}"#,
        )
        .unwrap();

        let config = Config::load_from(&path, env_of(&[])).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.spreadsheet_id, "abc123");
        assert_eq!(config.production_sheet, "Выпуск 2");
        assert_eq!(config.timesheet_sheet, "Табель");
        assert_eq!(config.visibility_mode, VisibilityMode::SingleActive);
        assert_eq!(config.ledger_strategy, LedgerStrategy::AppendOnly);
        assert_eq!(config.day_header, HeaderConvention::DayOfMonth);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 8081, "spreadsheetId": "from-file"}"#).unwrap();

        let env = env_of(&[("SPREADSHEET_ID", "from-env"), ("PORT", "7000")]);
        let config = Config::load_from(&path, env).unwrap();
        assert_eq!(config.spreadsheet_id, "from-env");
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let env = env_of(&[("SPREADSHEET_ID", "x")]);
        let config = Config::load_from(&path, env).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.production_sheet, "Выпуск");
    }

    #[test]
    fn missing_spreadsheet_id_is_fatal() {
        let dir = tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("absent.json"), env_of(&[]));
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn credentials_from_base64_env() {
        let key = r#"{"client_email": "a@b.iam.gserviceaccount.com", "private_key": "pem"}"#;
        let encoded = STANDARD.encode(key);
        let config = Config {
            spreadsheet_id: "x".into(),
            ..Config::default()
        };
        let env = env_of(&[("GOOGLE_CREDENTIALS_BASE64", encoded.as_str())]);
        let loaded = config.load_credentials(env).unwrap();
        assert_eq!(loaded.client_email, "a@b.iam.gserviceaccount.com");

        let env = env_of(&[("GOOGLE_CREDENTIALS_BASE64", "%%%")]);
        let result = config.load_credentials(env);
        assert!(matches!(result, Err(BridgeError::Config(_))));
    }

    #[test]
    fn credentials_from_file_or_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let mut config = Config {
            spreadsheet_id: "x".into(),
            credentials_path: path.clone(),
            ..Config::default()
        };

        assert!(config.load_credentials(env_of(&[])).is_err());

        let key = r#"{"client_email": "f@b.iam.gserviceaccount.com", "private_key": "pem"}"#;
        fs::write(&path, key).unwrap();
        let loaded = config.load_credentials(env_of(&[])).unwrap();
        assert_eq!(loaded.client_email, "f@b.iam.gserviceaccount.com");

        config.credentials_path = dir.path().join("nope.json");
        assert!(config.load_credentials(env_of(&[])).is_err());
    }
}
