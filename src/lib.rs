/*!
# Rusty Todo

A small todo-list web application with file attachments, built in Rust.

## Overview

Todos are stored either in a local JSON file or in a Google spreadsheet that
acts as a database. Records destined for the spreadsheet are flattened into
`column -> cell` pairs by a schema-driven codec, and rows read back are
rebuilt into nested records by the same codec.

## Architecture

### Frontend Layer
- **Technologies**: HTML, vanilla JavaScript modules
- Served as static assets from `ASSET_DIR`, talks to the REST API below

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - Schema Codec - Flattens nested records into spreadsheet columns and back
  - Todo Store - File backed or spreadsheet backed, chosen once at startup
  - Upload Store - Attachment files, one folder per todo
  - Token Source - Service-account OAuth2 tokens for the Sheets API

## Modules

- **schema**: Schema types and the flat/nested codec
- **todo**: Todo model and its schema
- **config**: Configuration from the environment and `.env`
- **oauth**: Service-account JWT assertions and token caching
- **db**: `TodoStore` with the file and spreadsheet backends
- **upload**: Attachment storage
- **asset**: Content types for served files
- **app**: Routing, error responses and the server loop

## REST API Endpoints

- `GET /todos` - Lists todos, uploads rendered as URLs
- `POST /todos` - Creates a todo from a multipart form with a `name` field
- `DELETE /todos/{id}` - Deletes a todo and its uploads
- `POST /todos/{id}/upload` - Attaches a file to a todo
- `DELETE /todos/{id}/upload/{file}` - Removes an attachment
- `GET /upload/{id}/{file}` - Serves an attachment
*/

pub mod config;
pub mod schema;
pub mod todo;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod asset;
#[cfg(feature = "web")]
pub mod db;
#[cfg(feature = "web")]
pub mod oauth;
#[cfg(feature = "web")]
pub mod upload;

pub use schema::{CodecError, FieldType, FlatRecord, NestedRecord, Schema, decode, encode, validate_header_set};
pub use todo::{NewTodo, Todo};
