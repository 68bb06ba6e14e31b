//! Request path normalization
//!
//! Turns the raw path of an HTTP request into a filesystem path that always
//! lies inside the extensions root. The algorithm is:
//!
//! 1. percent-decode the whole path,
//! 2. drop the mount prefix segment (`/Extensions`) if it leads the path,
//! 3. resolve `.` and `..` against an empty stack, where `..` on an empty
//!    stack is a no-op (the path is clamped at the root),
//! 4. join what is left onto the root.
//!
//! Normalization never fails. Anything that would have walked above the root,
//! or a segment that is not a plain file name once decoded, is dropped and
//! recorded in [`NormalizedPath::escape_attempted`] so callers can refuse the
//! request instead of serving the clamped target.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;

/// Mount prefix used by the host application for extension URLs
pub const DEFAULT_MOUNT_PREFIX: &str = "Extensions";

/// Result of normalizing a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    path: PathBuf,
    escape_attempted: bool,
}

impl NormalizedPath {
    /// Absolute path inside the root
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the request tried to leave the root while being resolved
    pub fn escape_attempted(&self) -> bool {
        self.escape_attempted
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.path
    }
}

impl AsRef<Path> for NormalizedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Clamps request paths to a single sandbox root
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    root: PathBuf,
    mount_prefix: String,
}

impl PathNormalizer {
    /// Create a normalizer for `root` that strips `mount_prefix`.
    ///
    /// An empty prefix means requests address the root directly.
    pub fn new(root: impl Into<PathBuf>, mount_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            mount_prefix: mount_prefix.into(),
        }
    }

    /// Create a normalizer using [`DEFAULT_MOUNT_PREFIX`]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DEFAULT_MOUNT_PREFIX)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount_prefix(&self) -> &str {
        &self.mount_prefix
    }

    /// Resolve `request_path` to a path inside the root
    pub fn normalize(&self, request_path: &str) -> NormalizedPath {
        let decoded = percent_decode_str(request_path).decode_utf8_lossy();

        let mut segments = decoded.split('/').filter(|s| !s.is_empty()).peekable();
        if !self.mount_prefix.is_empty() && segments.peek() == Some(&self.mount_prefix.as_str()) {
            segments.next();
        }

        let mut stack: Vec<&str> = Vec::new();
        let mut escape_attempted = false;

        for segment in segments {
            match segment {
                "." => {}
                ".." => {
                    if stack.pop().is_none() {
                        escape_attempted = true;
                    }
                }
                name if is_plain_segment(name) => stack.push(name),
                _ => escape_attempted = true,
            }
        }

        let mut path = self.root.clone();
        path.extend(stack);

        NormalizedPath {
            path,
            escape_attempted,
        }
    }
}

/// Normalize `request_path` against `sandbox_root` with the default mount prefix
pub fn normalize(request_path: &str, sandbox_root: impl AsRef<Path>) -> NormalizedPath {
    PathNormalizer::with_root(sandbox_root.as_ref()).normalize(request_path)
}

/// A segment is plain when joining it can only ever add one file name.
///
/// Decoding may have produced backslashes, NUL bytes or drive prefixes that the
/// platform would interpret as more than a name.
fn is_plain_segment(segment: &str) -> bool {
    if segment.contains(['\\', '\0']) {
        return false;
    }

    // Win32 silently trims trailing dots and spaces, so `.. ` would act as `..`.
    #[cfg(windows)]
    if segment.ends_with(['.', ' ']) {
        return false;
    }

    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => name == OsStr::new(segment),
        _ => false,
    }
}
