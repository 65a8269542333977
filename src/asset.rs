use std::path::Path;

/// Content type for a served file, picked by extension
pub fn content_type(file: &str) -> &'static str {
    let extension = Path::new(file)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "html" => "text/html",
        "js" => "application/javascript",
        "json" => "application/json",
        "css" => "text/css",
        "txt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "heic" => "image/heic",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}
