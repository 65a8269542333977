use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::{self, CodecError, FieldType, FlatRecord, NestedRecord, ScalarType, Schema};

lazy_static! {
    static ref TODO_SCHEMA: Schema = Schema::new()
        .field("id", FieldType::String)
        .field("name", FieldType::String)
        .field("uploads", FieldType::array(ScalarType::String));
}

/// A todo item with the file names of its attachments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Attachment file names, in upload order. An empty list and an absent
    /// field mean the same thing.
    #[serde(default)]
    pub uploads: Vec<String>,
}

/// Payload for creating a todo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTodo {
    pub name: String,
}

impl Todo {
    pub fn new(id: impl Into<String>, new_todo: NewTodo) -> Self {
        Todo {
            id: id.into(),
            name: new_todo.name,
            uploads: Vec::new(),
        }
    }

    /// Codec schema for todo rows: `id:string, name:string, uploads:array<string>`
    pub fn schema() -> &'static Schema {
        &TODO_SCHEMA
    }

    pub fn to_record(&self) -> NestedRecord {
        let mut record = NestedRecord::new();
        record.insert("id".to_string(), Value::String(self.id.clone()));
        record.insert("name".to_string(), Value::String(self.name.clone()));
        record.insert(
            "uploads".to_string(),
            Value::Array(self.uploads.iter().cloned().map(Value::String).collect()),
        );
        record
    }

    /// Build a todo from a decoded record. A missing `uploads` field reads
    /// back as an empty list; a missing `id` is an error.
    pub fn from_record(record: NestedRecord) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(record))
    }

    pub fn to_flat(&self) -> Result<FlatRecord, CodecError> {
        schema::encode(&self.to_record(), Self::schema())
    }

    pub fn from_flat(flat: &FlatRecord) -> Result<Self, serde_json::Error> {
        Self::from_record(schema::decode(flat, Self::schema()))
    }

    /// Returns `false` if the file name was already attached.
    pub fn add_upload(&mut self, file_name: &str) -> bool {
        if self.uploads.iter().any(|existing| existing == file_name) {
            return false;
        }
        self.uploads.push(file_name.to_string());
        true
    }

    /// Returns `false` if the file name was not attached.
    pub fn remove_upload(&mut self, file_name: &str) -> bool {
        let before = self.uploads.len();
        self.uploads.retain(|existing| existing != file_name);
        self.uploads.len() != before
    }
}

/// Generate an 8 character id from `[A-Za-z0-9]`
#[cfg(feature = "web")]
pub fn short_id() -> String {
    use rand::Rng;

    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
