//! Flat/nested record codec
//!
//! Spreadsheet rows can only hold scalars, so nested todo records are
//! flattened into path keys before they are written and rebuilt on read:
//!
//! - scalar fields keep their bare name: `name`
//! - array elements are indexed: `uploads[0]`, `uploads[1]`
//! - object entries are dotted: `customFields.priority`
//!
//! The codec is a pure function of its inputs. The [`Schema`] is supplied on
//! every call and decides which keys are meaningful.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use thiserror::Error;

lazy_static! {
    static ref ARRAY_KEY_REGEX: Regex = Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)\[(\d+)\]$").unwrap();
}

/// A record as the application sees it: field name to scalar, list or map.
pub type NestedRecord = Map<String, Value>;

/// A record as a spreadsheet row sees it: path key to scalar.
pub type FlatRecord = Map<String, Value>;

/// Element type of array and object fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Number,
}

/// Wrapper matching the `{"type": "string"}` descriptor form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    #[serde(rename = "type")]
    pub kind: ScalarType,
}

/// Field type descriptor
///
/// Deserializes from the JSON descriptor form, e.g.
/// `{"type": "array", "items": {"type": "string"}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Array { items: ItemType },
    Object { values: ItemType },
}

impl FieldType {
    pub fn array(kind: ScalarType) -> Self {
        FieldType::Array {
            items: ItemType { kind },
        }
    }

    pub fn object(kind: ScalarType) -> Self {
        FieldType::Object {
            values: ItemType { kind },
        }
    }

    fn is_scalar(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Number)
    }
}

/// Ordered mapping from field name to type descriptor
///
/// Field order is insertion order and decides the column order of flattened
/// records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<(String, FieldType)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, or replace the type of an existing one in place.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field_type,
            None => self.fields.push((name, field_type)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, field_type)| *field_type)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, FieldType)> {
        self.fields
            .iter()
            .map(|(name, field_type)| (name.as_str(), *field_type))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a schema from its JSON descriptor object, keeping key order.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, field_type) in &self.fields {
            map.serialize_entry(name, field_type)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let descriptors = Map::<String, Value>::deserialize(deserializer)?;
        let mut schema = Schema::new();
        for (name, descriptor) in descriptors {
            let field_type = FieldType::deserialize(descriptor)
                .map_err(|e| D::Error::custom(format!("field {}: {}", name, e)))?;
            schema = schema.field(name, field_type);
        }
        Ok(schema)
    }
}

/// Errors raised while flattening a record
///
/// Both are caller mistakes: the record does not fit its schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("{field} field is not {expected} type")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },

    #[error("{path}: expect string or number, actual value: {value}")]
    InvalidElementType { path: String, value: Value },

    #[error("{field} field has an entry with an empty key")]
    EmptyEntryKey { field: String },
}

/// Result of comparing a sheet's header row with a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// The store has no header yet
    Missing,
    /// Every header key resolves against the schema
    Matched,
    /// At least one header key is foreign to the schema
    Mismatched,
}

/// Flatten a nested record into path keys.
///
/// Fields are visited in schema order; absent and null fields emit nothing,
/// and so do empty arrays and objects. Array elements and object values are
/// emitted as-is; coercion to the declared element type happens in
/// [`decode`].
///
/// # Errors
/// * [`CodecError::TypeMismatch`] if an array (object) field holds something
///   other than a sequence (map)
/// * [`CodecError::InvalidElementType`] if an element is neither a string
///   nor a number
/// * [`CodecError::EmptyEntryKey`] if an object field has a `""` key, which
///   would flatten to a path key no header accepts
pub fn encode(record: &NestedRecord, schema: &Schema) -> Result<FlatRecord, CodecError> {
    let mut flat = FlatRecord::new();

    for (name, field_type) in schema.fields() {
        let value = match record.get(name) {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };

        match field_type {
            FieldType::String => {
                flat.insert(name.to_string(), Value::String(coerce_string(value)));
            }
            FieldType::Number => {
                if let Some(number) = coerce_number(value) {
                    flat.insert(name.to_string(), Value::Number(number));
                }
            }
            FieldType::Array { .. } => {
                let elements = value.as_array().ok_or_else(|| CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: "array",
                })?;
                for (index, element) in elements.iter().enumerate() {
                    let path = format!("{}[{}]", name, index);
                    if !is_scalar(element) {
                        return Err(CodecError::InvalidElementType {
                            path,
                            value: element.clone(),
                        });
                    }
                    flat.insert(path, element.clone());
                }
            }
            FieldType::Object { .. } => {
                let entries = value.as_object().ok_or_else(|| CodecError::TypeMismatch {
                    field: name.to_string(),
                    expected: "object",
                })?;
                for (key, entry) in entries {
                    if key.is_empty() {
                        return Err(CodecError::EmptyEntryKey {
                            field: name.to_string(),
                        });
                    }
                    let path = format!("{}.{}", name, key);
                    if !is_scalar(entry) {
                        return Err(CodecError::InvalidElementType {
                            path,
                            value: entry.clone(),
                        });
                    }
                    flat.insert(path, entry.clone());
                }
            }
        }
    }

    Ok(flat)
}

/// Rebuild a nested record from path keys.
///
/// Never fails: unknown keys are ignored, null values are skipped, and fields
/// that cannot be recovered are left out of the result. Array elements land
/// in ascending index order whatever the key order of the input; when two
/// keys name the same index (`uploads[1]`, `uploads[01]`) the first one wins.
pub fn decode(flat: &FlatRecord, schema: &Schema) -> NestedRecord {
    let mut nested = NestedRecord::new();

    for (name, field_type) in schema.fields() {
        match field_type {
            FieldType::String | FieldType::Number => {
                let kind = if field_type == FieldType::String {
                    ScalarType::String
                } else {
                    ScalarType::Number
                };
                let value = flat
                    .get(name)
                    .filter(|value| !value.is_null())
                    .and_then(|value| coerce(value, kind));
                if let Some(value) = value {
                    nested.insert(name.to_string(), value);
                }
            }
            FieldType::Array { items } => {
                let mut seen = HashSet::new();
                let mut entries: Vec<(usize, &Value)> = Vec::new();
                for (key, value) in flat {
                    let Some((array_name, index)) = parse_array_key(key) else {
                        continue;
                    };
                    if array_name != name || value.is_null() {
                        continue;
                    }
                    if seen.insert(index) {
                        entries.push((index, value));
                    }
                }
                entries.sort_by_key(|(index, _)| *index);

                let elements: Vec<Value> = entries
                    .into_iter()
                    .filter_map(|(_, value)| coerce(value, items.kind))
                    .collect();
                if !elements.is_empty() {
                    nested.insert(name.to_string(), Value::Array(elements));
                }
            }
            FieldType::Object { values } => {
                let mut entries = Map::new();
                for (key, value) in flat {
                    let Some(entry_key) = parse_object_key(key, name) else {
                        continue;
                    };
                    if value.is_null() || entries.contains_key(entry_key) {
                        continue;
                    }
                    if let Some(value) = coerce(value, values.kind) {
                        entries.insert(entry_key.to_string(), value);
                    }
                }
                if !entries.is_empty() {
                    nested.insert(name.to_string(), Value::Object(entries));
                }
            }
        }
    }

    nested
}

/// Check that every key of a header row resolves against the schema.
///
/// A key is accepted when it is a scalar field name, `name[digits]` for an
/// array field, or `name.key` for an object field. The first foreign key
/// rejects the whole set. An empty header is vacuously valid; use
/// [`check_header`] to tell it apart from a match.
pub fn validate_header_set<S: AsRef<str>>(header: &[S], schema: &Schema) -> bool {
    header
        .iter()
        .all(|key| header_key_matches(key.as_ref(), schema))
}

/// Three-way header check used before appending rows to a shared sheet.
pub fn check_header<S: AsRef<str>>(header: &[S], schema: &Schema) -> HeaderStatus {
    if header.is_empty() {
        HeaderStatus::Missing
    } else if validate_header_set(header, schema) {
        HeaderStatus::Matched
    } else {
        HeaderStatus::Mismatched
    }
}

fn header_key_matches(key: &str, schema: &Schema) -> bool {
    if schema.get(key).is_some_and(|field_type| field_type.is_scalar()) {
        return true;
    }

    // any run of digits is a valid index here, even one decode cannot place
    if let Some(name) = ARRAY_KEY_REGEX
        .captures(key)
        .and_then(|captures| captures.get(1))
    {
        return matches!(schema.get(name.as_str()), Some(FieldType::Array { .. }));
    }

    if let Some((name, entry)) = key.split_once('.') {
        return !entry.is_empty() && matches!(schema.get(name), Some(FieldType::Object { .. }));
    }

    false
}

/// Split `name[index]` into its parts. Indexes too large for `usize` give
/// `None`; header validation does not go through here.
fn parse_array_key(key: &str) -> Option<(&str, usize)> {
    let captures = ARRAY_KEY_REGEX.captures(key)?;
    let name = captures.get(1)?.as_str();
    let index = captures.get(2)?.as_str().parse().ok()?;
    Some((name, index))
}

fn parse_object_key<'a>(key: &'a str, field: &str) -> Option<&'a str> {
    key.strip_prefix(field)?
        .strip_prefix('.')
        .filter(|entry| !entry.is_empty())
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_))
}

fn coerce(value: &Value, kind: ScalarType) -> Option<Value> {
    match kind {
        ScalarType::String => Some(Value::String(coerce_string(value))),
        ScalarType::Number => coerce_number(value).map(Value::Number),
    }
}

fn coerce_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric reading of a value. Strings are parsed after trimming; anything
/// without a finite numeric reading yields `None`.
fn coerce_number(value: &Value) -> Option<Number> {
    match value {
        Value::Number(number) => Some(number.clone()),
        Value::Bool(flag) => Some(Number::from(u8::from(*flag))),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(integer) = trimmed.parse::<i64>() {
                return Some(Number::from(integer));
            }
            trimmed.parse::<f64>().ok().and_then(Number::from_f64)
        }
        _ => None,
    }
}
