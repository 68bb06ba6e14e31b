//! Extension file routes and middleware
//!
//! Every GET request is mapped onto the extensions root through the
//! normalizer and answered with the file bytes, a 404 or a 500.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::fs;
use tokio_util::io::ReaderStream;

use super::error::{ExtServerError, Result};
use super::server::ExtServerState;

/// A file opened for a single response
#[derive(Debug)]
pub struct ServedFile {
    /// Canonical location of the file
    pub path: PathBuf,
    /// Size in bytes when the file was opened
    pub size: u64,
    file: fs::File,
}

impl ServedFile {
    /// Content type derived from the file extension
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.path)
    }

    /// Turn the open file into a streaming 200 response
    pub fn into_response(self) -> Response {
        let content_type = self.content_type();
        let size = self.size;
        let body = Body::from_stream(ReaderStream::new(self.file));

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CONTENT_LENGTH, size.to_string()),
            ],
            body,
        )
            .into_response()
    }
}

/// Serve a file from the extensions root
///
/// Route: GET /*path
pub async fn serve_extension_file(State(state): State<ExtServerState>, uri: Uri) -> Response {
    let request_path = uri.path();

    match open_served_file(&state, request_path).await {
        Ok(served) => {
            tracing::debug!(path = %request_path, size = served.size, "Serving extension file");
            served.into_response()
        }
        Err(err) => {
            match &err {
                ExtServerError::NotFound { .. } => {
                    tracing::debug!(path = %request_path, "Extension file not found");
                }
                ExtServerError::SandboxViolation { .. } => {
                    tracing::warn!(path = %request_path, "Blocked request outside extensions root");
                }
                _ => {
                    tracing::error!(path = %request_path, error = %err, "Failed to serve extension file");
                }
            }
            err.into_response()
        }
    }
}

/// Resolve `request_path` inside the root and open the file it names.
///
/// Fails closed: anything that is not a plain regular file under the
/// canonical root is an error, and only a missing target is `NotFound`.
pub async fn open_served_file(state: &ExtServerState, request_path: &str) -> Result<ServedFile> {
    let normalized = state.normalizer().normalize(request_path);
    if normalized.escape_attempted() {
        return Err(ExtServerError::SandboxViolation {
            path: request_path.to_string(),
        });
    }

    let canonical = fs::canonicalize(normalized.path())
        .await
        .map_err(|e| classify_io_error(e, request_path))?;

    // Symlinks inside the root may still point elsewhere.
    if !canonical.starts_with(state.root()) {
        return Err(ExtServerError::SandboxViolation {
            path: request_path.to_string(),
        });
    }

    let metadata = fs::metadata(&canonical)
        .await
        .map_err(|e| classify_io_error(e, request_path))?;
    if !metadata.is_file() {
        return Err(ExtServerError::NotFound {
            path: request_path.to_string(),
        });
    }

    let file = fs::File::open(&canonical)
        .await
        .map_err(|e| classify_io_error(e, request_path))?;
    let opened = file
        .metadata()
        .await
        .map_err(|e| classify_io_error(e, request_path))?;

    // A component swapped for a symlink after canonicalization would have
    // opened a different file: the path must still resolve inside the root
    // to the very file behind the handle.
    let rechecked = fs::canonicalize(&canonical)
        .await
        .map_err(|e| classify_io_error(e, request_path))?;
    let current = fs::metadata(&rechecked)
        .await
        .map_err(|e| classify_io_error(e, request_path))?;
    if !rechecked.starts_with(state.root()) || !is_same_file(&opened, &current) {
        return Err(ExtServerError::SandboxViolation {
            path: request_path.to_string(),
        });
    }

    if !opened.is_file() {
        return Err(ExtServerError::NotFound {
            path: request_path.to_string(),
        });
    }

    Ok(ServedFile {
        path: canonical,
        size: opened.len(),
        file,
    })
}

/// Whether two metadata snapshots describe the same file
#[cfg(unix)]
fn is_same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

// No stable file identity off unix; compare what the platform reports.
#[cfg(not(unix))]
fn is_same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len()
        && a.file_type() == b.file_type()
        && a.modified().ok() == b.modified().ok()
        && a.created().ok() == b.created().ok()
}

/// Missing targets become `NotFound`, everything else stays an I/O error
fn classify_io_error(err: std::io::Error, request_path: &str) -> ExtServerError {
    match err.kind() {
        // `file.json/child` walks through a regular file
        ErrorKind::NotFound | ErrorKind::NotADirectory => ExtServerError::NotFound {
            path: request_path.to_string(),
        },
        _ => ExtServerError::Io(err),
    }
}

/// Guess a content type from the file extension
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("json") => "application/json",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("txt") | Some("md") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("wasm") => "application/wasm",
        Some("map") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Adds security headers to every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;

    // Prevent MIME type sniffing
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    response
}
