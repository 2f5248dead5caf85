//! Utility functions for srcreel
//!
//! Path helpers used when scanning trees and byte formatting used by the CLI.

use crate::error::{ReelError, Result};
use std::path::{Component, Path};

/// Convert `path` under `base` into a `/`-separated relative key
///
/// Keys are the same on every platform, so a recording made on Windows
/// restores the same layout on Unix and the other way around.
///
/// # Errors
///
/// - [`ReelError::Provider`] if `path` is not below `base`
/// - [`ReelError::PathConversion`] if a component is not valid UTF-8
pub fn relative_key(path: &Path, base: &Path) -> Result<String> {
    let relative = path.strip_prefix(base).map_err(|_| {
        ReelError::provider(format!("Path {:?} is not relative to {:?}", path, base))
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .ok_or_else(|| ReelError::PathConversion(part.to_os_string()))?,
            ),
            Component::CurDir => {}
            other => {
                return Err(ReelError::provider(format!(
                    "Unexpected component {:?} in {:?}",
                    other, relative
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Format bytes as human-readable string
///
/// # Examples
///
/// ```rust
/// use srcreel::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
