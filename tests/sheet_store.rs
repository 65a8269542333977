#![cfg(feature = "web")]

//! Spreadsheet store against an in-process stand-in for the Sheets API.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use rusty_todo::config::SheetConfig;
use rusty_todo::db::{SheetStore, StoreError, TodoStore};
use rusty_todo::todo::NewTodo;

const SPREADSHEET_ID: &str = "test-sheet";
const TOKEN: &str = "test-token";

#[derive(Default)]
struct MockSheet {
    rows: Vec<Vec<Value>>,
    requests: Vec<String>,
}

type Shared = Arc<Mutex<MockSheet>>;

fn api_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": { "code": status.as_u16(), "message": message } }))).into_response()
}

/// Row number from an A1 range like `Sheet1!A3:D3`
fn range_row(range: &str) -> usize {
    let cells = range.rsplit('!').next().unwrap();
    let start = cells.split(':').next().unwrap();
    start
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .unwrap()
}

async fn handle(
    State(sheet): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value == format!("Bearer {}", TOKEN).as_str());
    if !authorized {
        return api_error(StatusCode::UNAUTHORIZED, "Request had invalid authentication credentials.");
    }

    let path = urlencoding::decode(uri.path()).unwrap().into_owned();
    let prefix = format!("/v4/spreadsheets/{}", SPREADSHEET_ID);
    let Some(action) = path.strip_prefix(&prefix) else {
        return api_error(StatusCode::NOT_FOUND, "Requested entity was not found.");
    };

    let mut sheet = sheet.lock().unwrap();
    sheet.requests.push(format!("{} {}", method, action));
    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };

    match (method.as_str(), action) {
        ("GET", "/values/Sheet1!1:1") => match sheet.rows.first() {
            Some(header) => Json(json!({ "range": "Sheet1!A1:Z1", "values": [header] })).into_response(),
            None => Json(json!({ "range": "Sheet1!A1:Z1" })).into_response(),
        },
        ("GET", "/values/Sheet1") => {
            if sheet.rows.is_empty() {
                Json(json!({ "range": "Sheet1" })).into_response()
            } else {
                Json(json!({ "range": "Sheet1", "values": sheet.rows })).into_response()
            }
        }
        ("POST", "/values/Sheet1:append") => {
            for row in body["values"].as_array().unwrap() {
                sheet.rows.push(row.as_array().unwrap().clone());
            }
            Json(json!({})).into_response()
        }
        ("POST", "/values:batchUpdate") => {
            assert_eq!(body["valueInputOption"], "RAW");
            for data in body["data"].as_array().unwrap() {
                let row_number = range_row(data["range"].as_str().unwrap());
                if sheet.rows.len() < row_number {
                    sheet.rows.resize(row_number, Vec::new());
                }
                sheet.rows[row_number - 1] = data["values"][0].as_array().unwrap().clone();
            }
            Json(json!({})).into_response()
        }
        ("POST", ":batchUpdate") => {
            let range = &body["requests"][0]["deleteDimension"]["range"];
            assert_eq!(range["dimension"], "ROWS");
            let start = range["startIndex"].as_u64().unwrap() as usize;
            let end = range["endIndex"].as_u64().unwrap() as usize;
            sheet.rows.drain(start..end);
            Json(json!({})).into_response()
        }
        _ => api_error(StatusCode::NOT_FOUND, "Unknown request"),
    }
}

async fn start_mock(rows: Vec<Vec<Value>>) -> (String, Shared) {
    let shared: Shared = Arc::new(Mutex::new(MockSheet {
        rows,
        requests: Vec::new(),
    }));
    let app = Router::new().fallback(handle).with_state(shared.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/v4", addr), shared)
}

fn sheet_config(api_base: &str, token: &str) -> SheetConfig {
    SheetConfig {
        spreadsheet_id: SPREADSHEET_ID.to_string(),
        sheet_name: "Sheet1".to_string(),
        sheet_gid: 0,
        api_base: api_base.to_string(),
        service_account_email: None,
        service_account_key: None,
        access_token: Some(token.to_string()),
    }
}

async fn open_store(rows: Vec<Vec<Value>>) -> (TodoStore, Shared) {
    let (api_base, shared) = start_mock(rows).await;
    let store = SheetStore::from_config(&sheet_config(&api_base, TOKEN)).unwrap();
    (TodoStore::Sheet(store), shared)
}

fn new_todo(name: &str) -> NewTodo {
    NewTodo {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn test_create_writes_header_then_rows() {
    let (store, shared) = open_store(Vec::new()).await;

    let first = store.create(new_todo("Buy milk")).await.unwrap();
    let second = store.create(new_todo("Walk dog")).await.unwrap();

    {
        let sheet = shared.lock().unwrap();
        assert_eq!(sheet.rows[0], vec![json!("id"), json!("name")]);
        assert_eq!(sheet.rows[1], vec![json!(first.id), json!("Buy milk")]);
        assert_eq!(sheet.rows[2], vec![json!(second.id), json!("Walk dog")]);
    }

    let todos = store.list().await.unwrap();
    assert_eq!(todos, vec![first.clone(), second]);
    assert_eq!(store.get(&first.id).await.unwrap(), Some(first));
    assert_eq!(store.get("nope").await.unwrap(), None);
}

#[tokio::test]
async fn test_uploads_extend_header_and_clear_cells() {
    let (store, shared) = open_store(Vec::new()).await;
    let todo = store.create(new_todo("Pay rent")).await.unwrap();

    store.add_upload(&todo.id, "receipt.pdf").await.unwrap();
    store.add_upload(&todo.id, "lease.png").await.unwrap();
    {
        let sheet = shared.lock().unwrap();
        assert_eq!(
            sheet.rows[0],
            vec![json!("id"), json!("name"), json!("uploads[0]"), json!("uploads[1]")]
        );
        assert_eq!(sheet.rows[1][3], json!("lease.png"));
    }

    let stored = store.get(&todo.id).await.unwrap().unwrap();
    assert_eq!(stored.uploads, vec!["receipt.pdf", "lease.png"]);

    store.remove_upload(&todo.id, "receipt.pdf").await.unwrap();
    {
        let sheet = shared.lock().unwrap();
        assert_eq!(
            sheet.rows[1],
            vec![json!(todo.id), json!("Pay rent"), json!("lease.png"), json!("")]
        );
    }
    let stored = store.get(&todo.id).await.unwrap().unwrap();
    assert_eq!(stored.uploads, vec!["lease.png"]);

    // a second todo is laid out along the widened header
    let other = store.create(new_todo("Call mom")).await.unwrap();
    let sheet = shared.lock().unwrap();
    assert_eq!(
        sheet.rows[2],
        vec![json!(other.id), json!("Call mom"), json!(""), json!("")]
    );
}

#[tokio::test]
async fn test_unchanged_upload_skips_write() {
    let (store, shared) = open_store(Vec::new()).await;
    let todo = store.create(new_todo("Read book")).await.unwrap();

    store.remove_upload(&todo.id, "never-added.png").await.unwrap();
    let sheet = shared.lock().unwrap();
    assert!(!sheet.requests.iter().any(|r| r.ends_with("/values:batchUpdate")));
}

#[tokio::test]
async fn test_remove_deletes_row() {
    let (store, shared) = open_store(Vec::new()).await;
    let first = store.create(new_todo("first")).await.unwrap();
    let second = store.create(new_todo("second")).await.unwrap();

    store.remove(&first.id).await.unwrap();
    assert_eq!(store.list().await.unwrap(), vec![second]);
    assert_eq!(shared.lock().unwrap().rows.len(), 2);

    assert!(matches!(store.remove(&first.id).await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.add_upload(&first.id, "a.png").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reads_existing_rows() {
    let rows = vec![
        vec![json!("name"), json!("uploads[1]"), json!("id"), json!("uploads[0]")],
        vec![json!("Plan trip"), json!("b.png"), json!("t1"), json!("a.png")],
        vec![],
        vec![json!("No uploads"), json!(""), json!("t2")],
    ];
    let (store, _) = open_store(rows).await;

    let todos = store.list().await.unwrap();
    assert_eq!(todos.len(), 2);
    assert_eq!(todos[0].id, "t1");
    assert_eq!(todos[0].uploads, vec!["a.png", "b.png"]);
    assert_eq!(todos[1].id, "t2");
    assert!(todos[1].uploads.is_empty());
}

#[tokio::test]
async fn test_foreign_header_is_rejected() {
    let rows = vec![vec![json!("id"), json!("title")]];
    let (store, shared) = open_store(rows).await;

    assert!(matches!(
        store.create(new_todo("anything")).await,
        Err(StoreError::SchemaMismatch)
    ));
    assert_eq!(shared.lock().unwrap().rows.len(), 1);
}

#[tokio::test]
async fn test_api_errors_surface() {
    let (api_base, _) = start_mock(Vec::new()).await;
    let store = SheetStore::from_config(&sheet_config(&api_base, "wrong-token")).unwrap();

    match store.list().await {
        Err(StoreError::Api { status, message }) => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid authentication"));
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected the request to be rejected"),
    }
}

#[tokio::test]
async fn test_missing_credentials() {
    let mut config = sheet_config("http://127.0.0.1:9/v4", TOKEN);
    config.access_token = None;
    assert!(matches!(
        SheetStore::from_config(&config),
        Err(StoreError::Auth(_))
    ));
}
