//! Spreadsheet backed todo store
//!
//! Row 1 of the sheet holds the path keys produced by the schema codec
//! (`id`, `name`, `uploads[0]`, ...). Every following row is one todo with
//! its cells aligned to that header. Empty cells count as absent.

use log::{debug, warn};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{StoreError, StoreResult};
use crate::config::SheetConfig;
use crate::oauth::{OAuthError, ServiceAccount, TokenSource};
use crate::schema::{FlatRecord, HeaderStatus, check_header};
use crate::todo::{NewTodo, Todo, short_id};

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

struct SheetRow {
    /// Zero-based index among data rows; sheet row number is `position + 2`
    position: usize,
    /// Number of cells the row currently spans
    width: usize,
    todo: Todo,
}

struct Snapshot {
    header: Vec<String>,
    rows: Vec<SheetRow>,
}

impl Snapshot {
    fn find(&self, id: &str) -> Option<&SheetRow> {
        self.rows.iter().find(|row| row.todo.id == id)
    }
}

pub struct SheetStore {
    http: reqwest::Client,
    api_base: String,
    spreadsheet_id: String,
    sheet_name: String,
    sheet_gid: i64,
    tokens: TokenSource,
}

impl SheetStore {
    pub fn new(config: &SheetConfig, tokens: TokenSource, http: reqwest::Client) -> Self {
        SheetStore {
            http,
            api_base: config.api_base.clone(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            sheet_name: config.sheet_name.clone(),
            sheet_gid: config.sheet_gid,
            tokens,
        }
    }

    /// Build the store with the token source the configuration asks for.
    pub fn from_config(config: &SheetConfig) -> StoreResult<Self> {
        let http = reqwest::Client::new();
        let tokens = match (&config.access_token, &config.service_account_key) {
            (Some(token), _) => TokenSource::Static(token.clone()),
            (None, Some(key_path)) => TokenSource::ServiceAccount(ServiceAccount::from_key_file(
                config.service_account_email.clone(),
                key_path,
                http.clone(),
            )?),
            (None, None) => return Err(OAuthError::MissingCredentials.into()),
        };
        Ok(Self::new(config, tokens, http))
    }

    pub async fn create(&self, new_todo: NewTodo) -> StoreResult<Todo> {
        let todo = Todo::new(short_id(), new_todo);
        let flat = todo.to_flat()?;
        let header = self.read_header().await?;

        let rows = match check_header(&header, Todo::schema()) {
            HeaderStatus::Missing => vec![
                flat.keys().map(|key| Value::String(key.clone())).collect::<Vec<_>>(),
                flat.values().cloned().collect(),
            ],
            HeaderStatus::Matched => {
                let (full_header, row) = align_row(&header, &flat);
                if full_header.len() > header.len() {
                    self.batch_update_values(vec![self.header_range(&full_header)]).await?;
                }
                vec![row]
            }
            HeaderStatus::Mismatched => return Err(StoreError::SchemaMismatch),
        };

        let path = format!(
            "{}:append?valueInputOption=RAW&insertDataOption=INSERT_ROWS",
            self.values_path(None)
        );
        self.request(Method::POST, &path, Some(json!({ "values": rows })))
            .await?;
        Ok(todo)
    }

    pub async fn list(&self) -> StoreResult<Vec<Todo>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.rows.into_iter().map(|row| row.todo).collect())
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Todo>> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.find(id).map(|row| row.todo.clone()))
    }

    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        let snapshot = self.snapshot().await?;
        let row = snapshot
            .find(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        // grid indexes are zero-based and include the header row
        let start = row.position + 1;
        let body = json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": self.sheet_gid,
                        "dimension": "ROWS",
                        "startIndex": start,
                        "endIndex": start + 1
                    }
                }
            }]
        });
        self.request(Method::POST, ":batchUpdate", Some(body)).await?;
        Ok(())
    }

    pub async fn add_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        self.update(id, |todo| todo.add_upload(file_name)).await
    }

    pub async fn remove_upload(&self, id: &str, file_name: &str) -> StoreResult<()> {
        self.update(id, |todo| todo.remove_upload(file_name)).await
    }

    /// Rewrite one row after `edit` changed its todo. Cells the new encoding
    /// no longer uses are cleared, and the header grows when the todo now
    /// needs more columns than it lists.
    async fn update(&self, id: &str, edit: impl FnOnce(&mut Todo) -> bool) -> StoreResult<()> {
        let snapshot = self.snapshot().await?;
        if check_header(&snapshot.header, Todo::schema()) == HeaderStatus::Mismatched {
            return Err(StoreError::SchemaMismatch);
        }
        let row = snapshot
            .find(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let mut todo = row.todo.clone();
        if !edit(&mut todo) {
            return Ok(());
        }

        let flat = todo.to_flat()?;
        let (header, mut values) = align_row(&snapshot.header, &flat);
        if values.len() < row.width {
            values.resize(row.width, blank());
        }

        let mut data = Vec::new();
        if header.len() > snapshot.header.len() {
            data.push(self.header_range(&header));
        }
        data.push(self.row_range(row.position + 2, values));
        self.batch_update_values(data).await
    }

    async fn read_header(&self) -> StoreResult<Vec<String>> {
        let response = self
            .request(Method::GET, &self.values_path(Some("1:1")), None)
            .await?;
        let range: ValueRange = serde_json::from_value(response)?;
        Ok(range
            .values
            .into_iter()
            .next()
            .map(|cells| cells.iter().map(cell_text).collect())
            .unwrap_or_default())
    }

    async fn snapshot(&self) -> StoreResult<Snapshot> {
        let response = self
            .request(Method::GET, &self.values_path(None), None)
            .await?;
        let range: ValueRange = serde_json::from_value(response)?;

        let mut rows = range.values.into_iter();
        let header: Vec<String> = match rows.next() {
            Some(cells) => cells.iter().map(cell_text).collect(),
            None => Vec::new(),
        };

        let mut decoded = Vec::new();
        for (position, cells) in rows.enumerate() {
            let flat = row_to_flat(&header, &cells);
            if flat.is_empty() {
                continue;
            }
            match Todo::from_flat(&flat) {
                Ok(todo) => decoded.push(SheetRow {
                    position,
                    width: cells.len(),
                    todo,
                }),
                Err(e) => warn!("Skipping sheet row {}: {}", position + 2, e),
            }
        }

        Ok(Snapshot {
            header,
            rows: decoded,
        })
    }

    async fn batch_update_values(&self, data: Vec<Value>) -> StoreResult<()> {
        let body = json!({
            "valueInputOption": "RAW",
            "data": data
        });
        self.request(Method::POST, "/values:batchUpdate", Some(body))
            .await?;
        Ok(())
    }

    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> StoreResult<Value> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/spreadsheets/{}{}", self.api_base, self.spreadsheet_id, path);
        debug!("{} {}", method, url);

        let mut request = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ApiErrorBody>().await {
                Ok(body) => body.error.message,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    fn values_path(&self, a1: Option<&str>) -> String {
        let range = match a1 {
            Some(a1) => format!("{}!{}", self.sheet_name, a1),
            None => self.sheet_name.clone(),
        };
        format!("/values/{}", urlencoding::encode(&range))
    }

    fn header_range(&self, header: &[String]) -> Value {
        let cells = header.iter().map(|key| Value::String(key.clone())).collect();
        self.row_range(1, cells)
    }

    fn row_range(&self, row_number: usize, values: Vec<Value>) -> Value {
        let last_column = column_letter(values.len().max(1));
        json!({
            "range": format!("{}!A{}:{}{}", self.sheet_name, row_number, last_column, row_number),
            "majorDimension": "ROWS",
            "values": [values]
        })
    }
}

/// Zip a data row with the header into a flat record. Blank cells are left
/// out; when a header key repeats, the first column wins.
pub fn row_to_flat(header: &[String], cells: &[Value]) -> FlatRecord {
    let mut flat = FlatRecord::new();
    for (key, cell) in header.iter().zip(cells) {
        if is_blank(cell) || flat.contains_key(key) {
            continue;
        }
        flat.insert(key.clone(), cell.clone());
    }
    flat
}

/// Lay a flat record out along a header row.
///
/// Returns the header extended with any keys of `flat` it lacks, and the row
/// values in that column order with blanks for keys the record does not use.
pub fn align_row(header: &[String], flat: &FlatRecord) -> (Vec<String>, Vec<Value>) {
    let mut full_header = header.to_vec();
    for key in flat.keys() {
        if !full_header.contains(key) {
            full_header.push(key.clone());
        }
    }

    let row = full_header
        .iter()
        .map(|key| flat.get(key).cloned().unwrap_or_else(blank))
        .collect();
    (full_header, row)
}

/// Convert column number to letter (1 = A, 27 = AA)
pub fn column_letter(col: usize) -> String {
    let mut name = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        name.insert(0, (b'A' + (n % 26) as u8) as char);
        n /= 26;
    }

    name
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn blank() -> Value {
    Value::String(String::new())
}
