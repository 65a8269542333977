use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, create_dir_all};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{StoreError, StoreResult};
use crate::todo::{NewTodo, Todo, short_id};

/// On-disk shape of one todo; the id is the key of the enclosing object.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTodo {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    uploads: Vec<String>,
}

/// JSON file backed todo store
///
/// Todos live in memory in insertion order and are written back to the file
/// as `{"<id>": {"name": ..., "uploads": [...]}}` after every change.
pub struct FileStore {
    path: PathBuf,
    todos: Mutex<Vec<Todo>>,
}

impl FileStore {
    /// Load the store from `path`. A missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let todos = load(&path)?;
        Ok(FileStore {
            path,
            todos: Mutex::new(todos),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn create(&self, new_todo: NewTodo) -> StoreResult<Todo> {
        let mut todos = self.lock();
        let mut id = short_id();
        while todos.iter().any(|todo| todo.id == id) {
            id = short_id();
        }
        let todo = Todo::new(id, new_todo);
        todos.push(todo.clone());
        if let Err(e) = self.persist(&todos) {
            todos.pop();
            return Err(e);
        }
        Ok(todo)
    }

    pub fn list(&self) -> Vec<Todo> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<Todo> {
        self.lock().iter().find(|todo| todo.id == id).cloned()
    }

    pub fn remove(&self, id: &str) -> StoreResult<()> {
        let mut todos = self.lock();
        let position = todos
            .iter()
            .position(|todo| todo.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let removed = todos.remove(position);
        if let Err(e) = self.persist(&todos) {
            todos.insert(position, removed);
            return Err(e);
        }
        Ok(())
    }

    pub fn add_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        self.update(id, |todo| todo.add_upload(file_name))
    }

    pub fn remove_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        self.update(id, |todo| todo.remove_upload(file_name))
    }

    pub fn cleanup(&self) -> StoreResult<()> {
        let todos = self.lock();
        self.persist(&todos)
    }

    /// Apply `edit` to one todo and persist if it reports a change. The
    /// in-memory list is left untouched when persisting fails.
    fn update(&self, id: &str, edit: impl FnOnce(&mut Todo) -> bool) -> StoreResult<()> {
        let mut todos = self.lock();
        let position = todos
            .iter()
            .position(|todo| todo.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut edited = todos[position].clone();
        if !edit(&mut edited) {
            return Ok(());
        }
        let previous = std::mem::replace(&mut todos[position], edited);
        if let Err(e) = self.persist(&todos) {
            todos[position] = previous;
            return Err(e);
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Todo>> {
        self.todos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, todos: &[Todo]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent)?;
        }

        let mut document = Map::new();
        for todo in todos {
            let stored = StoredTodo {
                name: todo.name.clone(),
                uploads: todo.uploads.clone(),
            };
            document.insert(todo.id.clone(), serde_json::to_value(stored)?);
        }

        fs::write(&self.path, serde_json::to_string_pretty(&Value::Object(document))?)?;
        Ok(())
    }
}

fn load(path: &Path) -> StoreResult<Vec<Todo>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Data file not exists: {}", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }

    let document: Map<String, Value> = serde_json::from_str(&contents)?;
    document
        .into_iter()
        .map(|(id, value)| {
            let stored: StoredTodo = serde_json::from_value(value)?;
            Ok(Todo {
                id,
                name: stored.name,
                uploads: stored.uploads,
            })
        })
        .collect()
}
