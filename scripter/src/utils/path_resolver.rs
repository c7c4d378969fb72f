use anyhow::Result;
use std::path::{Component, Path, PathBuf};

/// Resolve log folder (absolute path)
pub fn resolve_log_folder(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
        return Ok(normalize_path(dir));
    }

    // Per-user data dir first, then next to the executable.
    let base = match dirs::data_local_dir() {
        Some(d) => d.join("Scripter"),
        None => resolve_deployment_folder().join("Scripter"),
    };
    let log_dir = base.join("logs");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder: {}", e))?;
    Ok(log_dir)
}

/// Resolve deployment folder (absolute path)
pub fn resolve_deployment_folder() -> PathBuf {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(dir) = exe_path.parent() {
            return dir.to_path_buf();
        }
    }

    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Absolute, lexically normalized form of `path` (`.` and `..` resolved, trailing separator dropped).
///
/// Does not touch the filesystem: journal rows may reference folders that no longer exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };

    let mut out = PathBuf::new();
    for comp in absolute.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// String form of [`normalize_path`]. Empty input stays empty.
pub fn normalize_folder(folder: &str) -> String {
    if folder.trim().is_empty() {
        return String::new();
    }
    normalize_path(Path::new(folder))
        .to_string_lossy()
        .to_string()
}

struct Segments<'a> {
    rooted: bool,
    parts: Vec<&'a str>,
}

fn segments(path: &str) -> Segments<'_> {
    Segments {
        rooted: path.starts_with(['/', '\\']),
        parts: path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect(),
    }
}

/// True when `folder` equals `scope` or is nested under it.
///
/// Compares whole path segments, case-insensitively, treating `/` and `\` alike,
/// so `C:\Scripts` never matches `C:\Scripts2`.
pub fn is_within_folder(folder: &str, scope: &str) -> bool {
    let f = segments(folder);
    let s = segments(scope);
    if s.parts.is_empty() && !s.rooted {
        return false;
    }
    if f.rooted != s.rooted || f.parts.len() < s.parts.len() {
        return false;
    }
    f.parts
        .iter()
        .zip(s.parts.iter())
        .all(|(a, b)| a.to_lowercase() == b.to_lowercase())
}

/// First folder segment below `scope`, i.e. the release subfolder a script belongs to.
pub fn release_of(folder: &str, scope: &str) -> Option<String> {
    if !is_within_folder(folder, scope) {
        return None;
    }
    let depth = segments(scope).parts.len();
    segments(folder).parts.get(depth).map(|s| s.to_string())
}
