//! Object key construction and inspection.
//!
//! Temporary keys carry the `tmp-` sentinel and are allocated before the
//! content hash is known. Finalized keys are `<hash>.<type>` and therefore
//! never start with the sentinel.

use crate::declared_type::DeclaredType;
use crate::error::{SinkError, SinkResult};
use crate::hasher::ContentHash;
use ulid::Ulid;

pub const TEMP_KEY_PREFIX: &str = "tmp-";

/// Allocates a temporary key: `tmp-<unix-millis>-<random>.<type>`.
///
/// Pure generation; never consults storage.
pub fn temp_key(declared: &DeclaredType) -> String {
    let id = Ulid::new();
    format!(
        "{}{}-{:020x}.{}",
        TEMP_KEY_PREFIX,
        id.timestamp_ms(),
        id.random(),
        declared.extension()
    )
}

pub fn finalized_key(hash: &ContentHash, declared: &DeclaredType) -> String {
    format!("{}.{}", hash, declared.extension())
}

pub fn is_temp_key(key: &str) -> bool {
    file_name(key).starts_with(TEMP_KEY_PREFIX)
}

/// Accepts a key only in its canonical form: relative, `/`-separated, with
/// no empty, `.` or `..` segments. Every backend stores and lists the same
/// string.
pub fn require_key(key: &str) -> SinkResult<&str> {
    if key.trim().is_empty() {
        return Err(SinkError::invalid_argument("\"key\" is missing"));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(SinkError::invalid_argument(format!(
            "key \"{}\" must be relative with no empty, \".\" or \"..\" segments",
            key
        )));
    }
    Ok(key)
}

/// Extension of the last path segment, if it has a non-empty one.
pub fn key_extension(key: &str) -> Option<&str> {
    let (_, extension) = file_name(key).rsplit_once('.')?;
    if extension.is_empty() {
        None
    } else {
        Some(extension)
    }
}

/// Logical parent directory of a key; the root is the empty string.
pub fn parent_segment(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

/// Normalizes a directory prefix: `/`, empty and absent all mean the root.
pub fn normalize_directory(prefix: Option<&str>) -> String {
    prefix.unwrap_or_default().trim().trim_matches('/').to_string()
}

fn file_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}
