//! Static file serving for non-WebSocket requests.
//!
//! Files are served from a root directory with a content type chosen by
//! extension. `/` and directory paths map to their `index.html`.

// ============================================================================
// Imports
// ============================================================================

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::response::{NOT_FOUND, ok};

// ============================================================================
// Constants
// ============================================================================

/// File served for `/` and for directory paths.
const INDEX_FILE: &str = "index.html";

/// Content type for unknown extensions.
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// StaticFiles
// ============================================================================

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Creates a file server rooted at `root`.
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request path to a file path below the root.
    ///
    /// The query string is dropped and the path percent-decoded. Returns
    /// `None` for paths that would escape the root.
    #[must_use]
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let path = request_path.split('?').next().unwrap_or_default();
        let decoded = urlencoding::decode(path).ok()?;

        let mut resolved = self.root.clone();
        for component in Path::new(decoded.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return None,
            }
        }

        if resolved == self.root {
            resolved.push(INDEX_FILE);
        }

        Some(resolved)
    }

    /// Builds the full response for `request_path`: `200 OK` with the file,
    /// or `404 Not Found`.
    pub async fn respond(&self, request_path: &str) -> Vec<u8> {
        let Some(mut path) = self.resolve(request_path) else {
            debug!(path = %request_path, "Rejected path outside static root");
            return NOT_FOUND.as_bytes().to_vec();
        };

        if tokio::fs::metadata(&path)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            path.push(INDEX_FILE);
        }

        match tokio::fs::read(&path).await {
            Ok(body) => ok(content_type(&path), &body),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Static file not served");
                NOT_FOUND.as_bytes().to_vec()
            }
        }
    }
}

// ============================================================================
// Public Functions
// ============================================================================

/// Returns the content type for a file path, by extension.
#[must_use]
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

// ============================================================================
// Tests
// ============================================================================
