//! Todo storage
//!
//! [`TodoStore`] is the capability the HTTP layer talks to. The backend is
//! chosen once from [`Config::db_type`] when the store is opened:
//!
//! - [`FileStore`] keeps todos in memory and mirrors them to a JSON file
//! - [`SheetStore`] keeps one flat-encoded todo per spreadsheet row

pub mod file;
pub mod sheet;

pub use file::FileStore;
pub use sheet::SheetStore;

use log::info;
use thiserror::Error;

use crate::config::{Config, ConfigError, DbType, GSHEET_SHEET_ID};
use crate::oauth::OAuthError;
use crate::schema::CodecError;
use crate::todo::{NewTodo, Todo};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No item found with id {0}")]
    NotFound(String),

    #[error("Insert to gsheet failed, target schema doesn't match")]
    SchemaMismatch,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Fetch gsheet failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetch gsheet. HTTP error! status: {status}, message: {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Auth(#[from] OAuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub enum TodoStore {
    File(FileStore),
    Sheet(SheetStore),
}

impl TodoStore {
    /// Open the backend selected by the configuration.
    pub async fn open(config: &Config) -> StoreResult<Self> {
        match config.db_type {
            DbType::File => {
                info!("Load data from disk {} ...", config.db_file_path.display());
                let store = FileStore::open(&config.db_file_path)?;
                info!("Load data from disk: done. {} rows found", store.len());
                Ok(TodoStore::File(store))
            }
            DbType::Gsheet => {
                let sheet = config
                    .sheet
                    .as_ref()
                    .ok_or(ConfigError::Missing(GSHEET_SHEET_ID))?;
                info!("Using spreadsheet {} ({})", sheet.spreadsheet_id, sheet.sheet_name);
                Ok(TodoStore::Sheet(SheetStore::from_config(sheet)?))
            }
        }
    }

    pub async fn create(&self, new_todo: NewTodo) -> StoreResult<Todo> {
        match self {
            TodoStore::File(store) => store.create(new_todo),
            TodoStore::Sheet(store) => store.create(new_todo).await,
        }
    }

    pub async fn list(&self) -> StoreResult<Vec<Todo>> {
        match self {
            TodoStore::File(store) => Ok(store.list()),
            TodoStore::Sheet(store) => store.list().await,
        }
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Todo>> {
        match self {
            TodoStore::File(store) => Ok(store.get(id)),
            TodoStore::Sheet(store) => store.get(id).await,
        }
    }

    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        match self {
            TodoStore::File(store) => store.remove(id),
            TodoStore::Sheet(store) => store.remove(id).await,
        }
    }

    pub async fn add_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        match self {
            TodoStore::File(store) => store.add_upload(id, file_name),
            TodoStore::Sheet(store) => store.add_upload(id, file_name).await,
        }
    }

    pub async fn remove_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        match self {
            TodoStore::File(store) => store.remove_upload(id, file_name),
            TodoStore::Sheet(store) => store.remove_upload(id, file_name).await,
        }
    }

    /// Flush state before the process exits.
    pub async fn cleanup(&self) -> StoreResult<()> {
        match self {
            TodoStore::File(store) => {
                info!("Persist data to disk...");
                store.cleanup()?;
                info!("Persist data to disk: done.");
                Ok(())
            }
            TodoStore::Sheet(_) => Ok(()),
        }
    }
}
