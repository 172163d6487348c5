//! Utility functions for file naming, path manipulation and log masking

use crate::config::FileCollisionAction;
use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Characters that are not allowed in a filename on common filesystems
const RESERVED_FILENAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Name tried for the `attempt`-th collision: `clip.mp4`, `clip (1).mp4`, `clip (2).mp4`, ...
fn collision_candidate(path: &Path, attempt: u32) -> Result<PathBuf> {
    if attempt == 0 {
        return Ok(path.to_path_buf());
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::Transfer(format!("cannot extract file stem from {}", path.display()))
    })?;
    let parent = path.parent().ok_or_else(|| {
        Error::Transfer(format!(
            "cannot extract parent directory from {}",
            path.display()
        ))
    })?;

    let new_name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{} ({}).{}", stem, attempt, ext),
        None => format!("{} ({})", stem, attempt),
    };
    Ok(parent.join(new_name))
}

/// Create the destination file, handling collisions according to the specified action
///
/// The name is claimed with `create_new`, so two concurrent callers asking for
/// the same path never end up sharing (and truncating) one file.
///
/// # Returns
///
/// The path that was created together with the open file. For Rename action the
/// path may have a ` (N)` suffix. For Skip action an existing file is an error.
/// Overwrite truncates whatever is there.
///
/// # Examples
///
/// ```no_run
/// use bitable_dl::utils::create_unique_file;
/// use bitable_dl::config::FileCollisionAction;
/// use std::path::Path;
///
/// # async fn example() -> bitable_dl::Result<()> {
/// let (path, _file) =
///     create_unique_file(Path::new("/tmp/clip.mp4"), FileCollisionAction::Rename).await?;
/// // If /tmp/clip.mp4 exists, created /tmp/clip (1).mp4
/// // If that exists too, created /tmp/clip (2).mp4, etc.
/// # let _ = path;
/// # Ok(())
/// # }
/// ```
pub async fn create_unique_file(
    path: &Path,
    action: FileCollisionAction,
) -> Result<(PathBuf, tokio::fs::File)> {
    if action == FileCollisionAction::Overwrite {
        let file = tokio::fs::File::create(path).await?;
        return Ok((path.to_path_buf(), file));
    }

    let attempts = match action {
        FileCollisionAction::Rename => MAX_RENAME_ATTEMPTS,
        _ => 0,
    };

    for attempt in 0..=attempts {
        let candidate = collision_candidate(path, attempt)?;
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;
        match opened {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }

    if action == FileCollisionAction::Skip {
        return Err(Error::Transfer(format!(
            "{} already exists and collision action is Skip",
            path.display()
        )));
    }
    Err(Error::Transfer(format!(
        "could not find a unique filename for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}

/// Replace path separators and reserved characters with `_` and trim whitespace
///
/// ```
/// use bitable_dl::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("AIT/001:a?"), "AIT_001_a_");
/// ```
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if RESERVED_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Turn a user-supplied directory into a relative path that cannot escape its root
///
/// Only plain name components survive; `..`, `.`, root and drive prefixes are dropped.
#[must_use]
pub fn confine_relative_dir(dir: &str) -> PathBuf {
    Path::new(dir)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

/// Mask a secret for logging, keeping `show` leading and `hide` trailing characters
///
/// ```
/// use bitable_dl::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("cli_a1b2c3d4e5", 4, 4), "cli_...d4e5");
/// assert_eq!(mask_sensitive("short", 4, 4), "shor***");
/// ```
#[must_use]
pub fn mask_sensitive(value: &str, show: usize, hide: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= show + hide {
        let head: String = chars.iter().take(show).collect();
        return format!("{head}***");
    }
    let head: String = chars[..show].iter().collect();
    let tail: String = chars[chars.len() - hide..].iter().collect();
    format!("{head}...{tail}")
}
