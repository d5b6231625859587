//! Firmware version resolution.
//!
//! The version lives in a C header as a string macro:
//!
//! ```c
//! #define FIRMWARE_VERSION "1.0.6"
//! ```
//!
//! Resolution never fails. An unreadable file or a missing definition yields
//! the [`FirmwareVersion::UNKNOWN`] sentinel and a warning.

use log::{debug, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

/// Resolved firmware version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FirmwareVersion(String);

impl FirmwareVersion {
    /// Sentinel used when the version cannot be resolved.
    pub const UNKNOWN: &'static str = "unknown";

    /// Wrap a version string as-is.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The sentinel version.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    /// True if this is the sentinel.
    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    /// Version as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Version for use inside a file name, with path separators replaced by `_`.
    pub fn file_component(&self) -> String {
        self.0
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect()
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read `path` and extract the string value of macro `name`.
///
/// The file is read on every call.
pub fn resolve_version(path: &Path, name: &str) -> FirmwareVersion {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(
                "Could not read version file {}: {}, using '{}'",
                path.display(),
                e,
                FirmwareVersion::UNKNOWN
            );
            return FirmwareVersion::unknown();
        }
    };

    match find_define(&text, name) {
        Some(value) => {
            debug!("Resolved {} = {:?} from {}", name, value, path.display());
            FirmwareVersion::new(value)
        }
        None => {
            warn!(
                "No '{}' definition found in {}, using '{}'",
                name,
                path.display(),
                FirmwareVersion::UNKNOWN
            );
            FirmwareVersion::unknown()
        }
    }
}

/// Find the first `define <name> "<value>"` in `text` and return `<value>`.
///
/// The `define` keyword may appear anywhere on a line (so `#define` and
/// `# define` both match) but must not be the tail of a longer identifier.
/// The value is everything between the quotes, verbatim, and must be
/// non-empty.
pub fn find_define<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        line.match_indices("define")
            .filter(|(idx, _)| !preceded_by_ident(line, *idx))
            .find_map(|(idx, kw)| parse_after_keyword(&line[idx + kw.len()..], name))
    })
}

fn preceded_by_ident(line: &str, idx: usize) -> bool {
    line[..idx]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
}

fn parse_after_keyword<'a>(rest: &'a str, name: &str) -> Option<&'a str> {
    // At least one whitespace between keyword, name and value
    let after_kw = rest.trim_start();
    if after_kw.len() == rest.len() {
        return None;
    }
    let after_name = after_kw.strip_prefix(name)?;
    let value_part = after_name.trim_start();
    if value_part.len() == after_name.len() {
        return None;
    }
    let quoted = value_part.strip_prefix('"')?;
    let end = quoted.find('"')?;
    let value = &quoted[..end];
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
