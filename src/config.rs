//! Application configuration
//!
//! Built once at startup from the process environment and an optional
//! `.env` file in the root directory, then passed by reference to whatever
//! needs it. Process variables win over the file, the file wins over the
//! defaults.

use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const ROOT_DIR: &str = "ROOT_DIR";
pub const ASSET_DIR: &str = "ASSET_DIR";
pub const UPLOAD_DIR: &str = "UPLOAD_DIR";
pub const DB_FILE_PATH: &str = "DB_FILE_PATH";
pub const APP_URL: &str = "APP_URL";
pub const HOSTNAME: &str = "HOSTNAME";
pub const PORT: &str = "PORT";
pub const DB_TYPE: &str = "DB_TYPE";
pub const UPLOAD_TYPE: &str = "UPLOAD_TYPE";
pub const GSHEET_SERVICE_ACCOUNT_EMAIL: &str = "GSHEET_SERVICE_ACCOUNT_EMAIL";
pub const GSHEET_SERVICE_ACCOUNT_KEY: &str = "GSHEET_SERVICE_ACCOUNT_KEY";
pub const GSHEET_ACCESS_TOKEN: &str = "GSHEET_ACCESS_TOKEN";
pub const GSHEET_SHEET_ID: &str = "GSHEET_SHEET_ID";
pub const GSHEET_SHEET_NAME: &str = "GSHEET_SHEET_NAME";
pub const GSHEET_SHEET_GID: &str = "GSHEET_SHEET_GID";
pub const GSHEET_API_BASE: &str = "GSHEET_API_BASE";

const DEFAULT_HOSTNAME: &str = "localhost";
const DEFAULT_PORT: u16 = 4200;
const DEFAULT_SHEET_NAME: &str = "Sheet1";
const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown db type: {0}")]
    UnknownDbType(String),

    #[error("Unknown upload type: {0}")]
    UnknownUploadType(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("env {0} not found")]
    Missing(&'static str),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Which todo store backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    File,
    Gsheet,
}

impl FromStr for DbType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(DbType::File),
            "gsheet" => Ok(DbType::Gsheet),
            other => Err(ConfigError::UnknownDbType(other.to_string())),
        }
    }
}

/// Which upload store backend to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadType {
    File,
}

impl FromStr for UploadType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(UploadType::File),
            other => Err(ConfigError::UnknownUploadType(other.to_string())),
        }
    }
}

/// Settings for the spreadsheet backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    /// Numeric grid id of the sheet, needed for row deletion
    pub sheet_gid: i64,
    pub api_base: String,
    pub service_account_email: Option<String>,
    pub service_account_key: Option<PathBuf>,
    /// Fixed bearer token; takes precedence over the service account
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root_dir: PathBuf,
    pub asset_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub db_file_path: PathBuf,
    pub hostname: String,
    pub port: u16,
    /// Public base URL used to build upload links
    pub app_url: String,
    pub db_type: DbType,
    pub upload_type: UploadType,
    /// Present when `db_type` is [`DbType::Gsheet`]
    pub sheet: Option<SheetConfig>,
}

impl Config {
    /// Load configuration from the process environment and `<ROOT_DIR>/.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let process_vars: HashMap<String, String> = std::env::vars().collect();

        let root_dir = match process_vars.get(ROOT_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?,
        };

        let mut vars = read_env_file(&root_dir.join(".env"))?;
        vars.extend(process_vars);
        vars.insert(ROOT_DIR.to_string(), root_dir.to_string_lossy().into_owned());

        Self::from_vars(&vars)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).map(|value| value.trim()).filter(|value| !value.is_empty());

        let root_dir = PathBuf::from(get(ROOT_DIR).unwrap_or("."));
        let path_or = |key: &str, default: &str| match get(key) {
            Some(path) => PathBuf::from(path),
            None => root_dir.join(default),
        };

        let hostname = get(HOSTNAME).unwrap_or(DEFAULT_HOSTNAME).to_string();
        let port = match get(PORT) {
            Some(port) => port.parse().map_err(|_| ConfigError::InvalidValue {
                key: PORT,
                value: port.to_string(),
            })?,
            None => DEFAULT_PORT,
        };
        let app_url = match get(APP_URL) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}:{}", hostname, port),
        };

        let db_type = get(DB_TYPE).unwrap_or("file").parse()?;
        let upload_type = get(UPLOAD_TYPE).unwrap_or("file").parse()?;

        let sheet = match db_type {
            DbType::File => None,
            DbType::Gsheet => {
                let service_account_email = get(GSHEET_SERVICE_ACCOUNT_EMAIL).map(str::to_string);
                let service_account_key = get(GSHEET_SERVICE_ACCOUNT_KEY).map(PathBuf::from);
                let access_token = get(GSHEET_ACCESS_TOKEN).map(str::to_string);
                if access_token.is_none() && service_account_key.is_none() {
                    return Err(ConfigError::Missing(GSHEET_SERVICE_ACCOUNT_KEY));
                }
                let sheet_gid = match get(GSHEET_SHEET_GID) {
                    Some(gid) => gid.parse().map_err(|_| ConfigError::InvalidValue {
                        key: GSHEET_SHEET_GID,
                        value: gid.to_string(),
                    })?,
                    None => 0,
                };

                Some(SheetConfig {
                    spreadsheet_id: get(GSHEET_SHEET_ID)
                        .ok_or(ConfigError::Missing(GSHEET_SHEET_ID))?
                        .to_string(),
                    sheet_name: get(GSHEET_SHEET_NAME).unwrap_or(DEFAULT_SHEET_NAME).to_string(),
                    sheet_gid,
                    api_base: get(GSHEET_API_BASE)
                        .unwrap_or(DEFAULT_API_BASE)
                        .trim_end_matches('/')
                        .to_string(),
                    service_account_email,
                    service_account_key,
                    access_token,
                })
            }
        };

        Ok(Config {
            asset_dir: path_or(ASSET_DIR, "static"),
            upload_dir: path_or(UPLOAD_DIR, "upload"),
            db_file_path: path_or(DB_FILE_PATH, "db/data.json"),
            root_dir,
            hostname,
            port,
            app_url,
            db_type,
            upload_type,
            sheet,
        })
    }

    /// Address string the listener binds to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(parse_env_file(&contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No .env found at {}", path.display());
            Ok(HashMap::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without a
/// key or value are skipped; surrounding quotes on values are removed.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
