use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Request, State, multipart::MultipartError},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::asset::content_type;
use crate::config::Config;
use crate::db::{StoreError, TodoStore};
use crate::todo::{NewTodo, Todo};
use crate::upload::{UploadError, UploadStore};

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_UPLOAD_NAME: &str = "uploaded_file";

pub struct AppState {
    pub store: TodoStore,
    pub uploads: UploadStore,
    pub app_url: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Invalid form data: {0}")]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::NotFound(_)) | AppError::Upload(UploadError::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Upload(UploadError::InvalidPath(_))
            | AppError::Multipart(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// A todo as the browser sees it, with uploads turned into URLs
#[derive(Debug, Serialize)]
pub struct TodoView {
    pub id: String,
    pub name: String,
    pub uploads: Vec<String>,
}

impl TodoView {
    pub fn new(todo: Todo, app_url: &str) -> Self {
        let uploads = todo
            .uploads
            .iter()
            .map(|file_name| upload_url(app_url, &todo.id, file_name))
            .collect();
        TodoView {
            id: todo.id,
            name: todo.name,
            uploads,
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    url: String,
    name: String,
}

/// Public URL of a stored upload
pub fn upload_url(app_url: &str, todo_id: &str, file_name: &str) -> String {
    format!(
        "{}/upload/{}/{}",
        app_url.trim_end_matches('/'),
        urlencoding::encode(todo_id),
        urlencoding::encode(file_name)
    )
}

pub fn router(state: Arc<AppState>, asset_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/todos", get(list_todos).post(create_todo))
        .route("/todos/:id", delete(delete_todo))
        .route("/todos/:id/upload", post(upload_file))
        .route("/todos/:id/upload/:file_name", delete(delete_upload))
        .route("/upload/:id/:file_name", get(view_upload))
        .with_state(state)
        .fallback_service(ServeDir::new(asset_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn(log_request))
        .layer(CorsLayer::permissive())
}

pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = TodoStore::open(&config).await?;
    let uploads = UploadStore::open(&config);

    let app_state = Arc::new(AppState {
        store,
        uploads,
        app_url: config.app_url.clone(),
    });
    let app = router(app_state.clone(), &config.asset_dir);

    let listener = TcpListener::bind(config.socket_addr()).await?;
    info!("Server is running on {}", config.app_url);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.store.cleanup().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for SIGINT: {}", e);
    }
    info!("Received SIGINT, shutting down");
}

async fn log_request(request: Request, next: Next) -> Response {
    info!("{} {}", request.method(), request.uri());
    next.run(request).await
}

async fn list_todos(State(state): State<Arc<AppState>>) -> Result<Json<Vec<TodoView>>, AppError> {
    let todos = state.store.list().await?;
    Ok(Json(
        todos
            .into_iter()
            .map(|todo| TodoView::new(todo, &state.app_url))
            .collect(),
    ))
}

async fn create_todo(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<TodoView>, AppError> {
    let mut name = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("name") {
            name = Some(field.text().await?);
        }
    }

    let name = name.ok_or_else(|| AppError::BadRequest("Missing form field: name".to_string()))?;
    let todo = state.store.create(NewTodo { name }).await?;
    Ok(Json(TodoView::new(todo, &state.app_url)))
}

async fn delete_todo(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let todo = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.clone()))?;

    if !todo.uploads.is_empty() {
        state.uploads.delete_folder(&id).await?;
    }
    state.store.remove(&id).await?;

    Ok(Json(json!({ "id": id })))
}

async fn upload_file(
    Path(id): Path<String>,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    if state.store.get(&id).await?.is_none() {
        return Err(StoreError::NotFound(id).into());
    }

    while let Some(field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let file_name = if file_name.is_empty() {
            DEFAULT_UPLOAD_NAME.to_string()
        } else {
            file_name
        };

        let content = field.bytes().await?;
        let stored = state.uploads.save(&id, &file_name, &content).await?;
        if let Err(e) = state.store.add_upload(&id, &stored.file_name).await {
            if let Err(cleanup) = state.uploads.delete_file(&id, &stored.file_name).await {
                warn!("Failed to remove orphaned upload {}: {}", stored.file_uri, cleanup);
            }
            return Err(e.into());
        }
        info!("Stored upload {}", stored.file_uri);

        return Ok(Json(UploadResponse {
            url: upload_url(&state.app_url, &id, &stored.file_name),
            name: stored.file_name,
        }));
    }

    Err(AppError::BadRequest("File not found in upload".to_string()))
}

async fn view_upload(
    Path((id, file_name)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, AppError> {
    let content = state.uploads.read(&id, &file_name).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&file_name))], content).into_response())
}

async fn delete_upload(
    Path((id, file_name)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, AppError> {
    state.store.remove_upload(&id, &file_name).await?;

    match state.uploads.delete_file(&id, &file_name).await {
        Err(UploadError::NotFound(file_uri)) => warn!("Upload already gone: {}", file_uri),
        result => result?,
    }
    Ok(StatusCode::OK)
}
