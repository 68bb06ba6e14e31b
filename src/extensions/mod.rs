//! Sandboxed Extension File Server
//!
//! This module serves the contents of the extensions directory to the
//! embedded web view over loopback HTTP.
//!
//! Security features:
//! - Request paths are decoded and clamped to the extensions root
//! - Traversal attempts and symlinks leaving the root are refused with 500
//! - Read-only, GET/HEAD only
//! - Localhost-only binding

mod error;
mod normalize;
mod routes;
mod server;

pub use error::{ExtServerError, Result};
pub use normalize::{normalize, NormalizedPath, PathNormalizer, DEFAULT_MOUNT_PREFIX};
pub use routes::{content_type_for, open_served_file, serve_extension_file, ServedFile};
pub use server::{build_router, ExtServerConfig, ExtServerState, ExtensionFileServer, ServerHandle};
