//! ext-server - sandboxed HTTP server for extension packages
//!
//! Serves the files of one extensions directory to an embedded web view over
//! loopback HTTP:
//! - Request paths are decoded and clamped to the extensions root
//! - Traversal attempts fail closed with 500, missing files answer 404
//! - Each server instance owns its listener and stops explicitly
//! - Structured logging via `tracing`

pub mod extensions;
pub mod logging;

// Re-export commonly used items
pub use extensions::{
    normalize, ExtServerConfig, ExtServerError, ExtensionFileServer, NormalizedPath,
    PathNormalizer, Result, ServerHandle,
};
pub use logging::{LoggingConfig, LoggingSystem};
