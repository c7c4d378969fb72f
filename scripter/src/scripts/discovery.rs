// Script discovery
// Enumerates migration files on disk and orders them deterministically.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use glob::{MatchOptions, Pattern};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ConfigError, DiscoveryError};
use crate::scripts::key::ScriptIdentity;

pub const DEFAULT_PATTERN: &str = "*.sql";

/// Ordering basis for discovered scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSortBy {
    Name,
    #[default]
    #[serde(alias = "createdutc")]
    Created,
    #[serde(alias = "modifiedutc")]
    Modified,
}

impl ScriptSortBy {
    /// Total order over candidates: time basis first, then full path (case-insensitive).
    pub fn compare(&self, a: &ScriptCandidate, b: &ScriptCandidate) -> Ordering {
        let by_time = match self {
            ScriptSortBy::Name => Ordering::Equal,
            ScriptSortBy::Created => a.created_utc.cmp(&b.created_utc),
            ScriptSortBy::Modified => a.modified_utc.cmp(&b.modified_utc),
        };
        by_time.then_with(|| a.sort_path().cmp(&b.sort_path()))
    }
}

/// A script found on disk.
#[derive(Debug, Clone)]
pub struct ScriptCandidate {
    pub identity: ScriptIdentity,
    pub contents: String,
    /// Creation time, or last-write time when the filesystem has no usable creation time.
    pub created_utc: DateTime<Utc>,
    pub modified_utc: DateTime<Utc>,
}

impl ScriptCandidate {
    fn sort_path(&self) -> String {
        self.identity.full_path().to_string_lossy().to_lowercase()
    }
}

/// File-system script source: root + glob pattern + recursion flag + ordering.
#[derive(Debug, Clone)]
pub struct FileSystemScriptProvider {
    root: PathBuf,
    pattern: String,
    recursive: bool,
    sort_by: ScriptSortBy,
}

impl FileSystemScriptProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pattern: DEFAULT_PATTERN.to_string(),
            recursive: true,
            sort_by: ScriptSortBy::Created,
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn sort_by(mut self, sort_by: ScriptSortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate, order and read every matching script.
    ///
    /// Any unreadable file fails the whole call.
    pub fn get_scripts(&self) -> Result<Vec<ScriptCandidate>> {
        let pattern = Pattern::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        let match_opts = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::new()
        };

        let root = dunce::canonicalize(&self.root)
            .map_err(|_| ConfigError::FolderNotFound(self.root.clone()))?;

        info!(
            "[PHASE: discovery] [STEP: enumerate] Scanning {:?} for '{}' (recursive={})",
            root, self.pattern, self.recursive
        );

        let max_depth = if self.recursive { usize::MAX } else { 1 };
        let mut found: Vec<ScriptCandidate> = Vec::new();

        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(max_depth)
            .follow_links(true)
        {
            let entry = entry.map_err(|source| DiscoveryError::Walk {
                root: root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().to_string();
            if !pattern.matches_with(&file_name, match_opts) {
                continue;
            }

            let path = entry.path();
            let folder = path
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            let meta = std::fs::metadata(path).map_err(|source| DiscoveryError::Metadata {
                path: path.to_path_buf(),
                source,
            })?;
            let (created_utc, modified_utc) = file_times_utc(&meta);

            found.push(ScriptCandidate {
                identity: ScriptIdentity::new(folder, file_name),
                contents: String::new(),
                created_utc,
                modified_utc,
            });
        }

        found.sort_by(|a, b| self.sort_by.compare(a, b));

        for candidate in found.iter_mut() {
            candidate.contents = read_script_text(&candidate.identity.full_path())?;
        }

        info!(
            "[PHASE: discovery] [STEP: enumerate] Found {} scripts under {:?}",
            found.len(),
            root
        );

        Ok(found)
    }
}

/// Ordering timestamp for a single script, same rule as discovery.
pub fn script_file_time_utc(identity: &ScriptIdentity) -> Result<DateTime<Utc>> {
    let path = identity.full_path();
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("Failed to read file metadata: {:?}", path))?;
    Ok(file_times_utc(&meta).0)
}

fn file_times_utc(meta: &Metadata) -> (DateTime<Utc>, DateTime<Utc>) {
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let created = meta.created().ok().map(DateTime::<Utc>::from);
    (safe_created_utc(created, modified), modified)
}

/// Some filesystems report no creation time, or a sentinel at the platform minimum.
/// Either way the last-write time is used instead.
pub(crate) fn safe_created_utc(
    created: Option<DateTime<Utc>>,
    modified: DateTime<Utc>,
) -> DateTime<Utc> {
    let threshold = Utc
        .with_ymd_and_hms(1970, 1, 2, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    match created {
        Some(t) if t > threshold => t,
        _ => modified,
    }
}

/// Read a script file as-is: BOM detection, UTF-8 otherwise, line endings untouched.
pub fn read_script_text(path: &Path) -> Result<String, DiscoveryError> {
    let bytes = std::fs::read(path).map_err(|source| DiscoveryError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    let (text, lossy) = decode_script_bytes(&bytes);
    if lossy {
        warn!(
            "[PHASE: discovery] [STEP: read_script] {:?} is not valid UTF-8; invalid sequences were replaced",
            path
        );
    }
    Ok(text)
}

/// Returns the decoded text and whether any invalid sequence had to be replaced.
pub(crate) fn decode_script_bytes(bytes: &[u8]) -> (String, bool) {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return decode_utf8(rest);
    }
    // UTF-32 LE shares its first two bytes with UTF-16 LE, so check it first.
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE, 0x00, 0x00]) {
        return decode_utf32(rest, u32::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0x00, 0x00, 0xFE, 0xFF]) {
        return decode_utf32(rest, u32::from_be_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(s) => (s.to_string(), false),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
    }
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> (String, bool) {
    let chunks = bytes.chunks_exact(2);
    let mut lossy = !chunks.remainder().is_empty();
    let units = chunks.map(|c| to_unit([c[0], c[1]]));
    let mut out = String::with_capacity(bytes.len() / 2);
    for decoded in char::decode_utf16(units) {
        match decoded {
            Ok(c) => out.push(c),
            Err(_) => {
                lossy = true;
                out.push(char::REPLACEMENT_CHARACTER);
            }
        }
    }
    if lossy && bytes.len() % 2 != 0 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    (out, lossy)
}

fn decode_utf32(bytes: &[u8], to_scalar: fn([u8; 4]) -> u32) -> (String, bool) {
    let chunks = bytes.chunks_exact(4);
    let mut lossy = !chunks.remainder().is_empty();
    let mut out = String::with_capacity(bytes.len() / 4);
    for c in chunks {
        match char::from_u32(to_scalar([c[0], c[1], c[2], c[3]])) {
            Some(ch) => out.push(ch),
            None => {
                lossy = true;
                out.push(char::REPLACEMENT_CHARACTER);
            }
        }
    }
    if bytes.len() % 4 != 0 {
        out.push(char::REPLACEMENT_CHARACTER);
    }
    (out, lossy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn write_with_mtime(path: &Path, contents: &str, secs_after_2024: u64) {
        fs::write(path, contents).unwrap();
        // 2024-01-01T00:00:00Z
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_704_067_200);
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(base + Duration::from_secs(secs_after_2024))
            .unwrap();
    }

    fn names(scripts: &[ScriptCandidate]) -> Vec<String> {
        scripts
            .iter()
            .map(|s| s.identity.file_name.clone())
            .collect()
    }

    #[test]
    fn discovers_matching_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("R1")).unwrap();
        fs::write(dir.path().join("001_init.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("R1").join("002_addcol.SQL"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a script").unwrap();

        let scripts = FileSystemScriptProvider::new(dir.path())
            .sort_by(ScriptSortBy::Name)
            .get_scripts()
            .unwrap();

        assert_eq!(names(&scripts), vec!["001_init.sql", "002_addcol.SQL"]);
        let root = dunce::canonicalize(dir.path()).unwrap();
        assert_eq!(scripts[0].identity.folder, root.to_string_lossy());
        assert_eq!(
            scripts[1].identity.folder,
            root.join("R1").to_string_lossy()
        );
        assert_eq!(scripts[0].contents, "SELECT 1;");
    }

    #[test]
    fn non_recursive_only_reads_top_level() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("R1")).unwrap();
        fs::write(dir.path().join("001.sql"), "").unwrap();
        fs::write(dir.path().join("R1").join("002.sql"), "").unwrap();

        let scripts = FileSystemScriptProvider::new(dir.path())
            .recursive(false)
            .get_scripts()
            .unwrap();

        assert_eq!(names(&scripts), vec!["001.sql"]);
    }

    #[test]
    fn sorts_by_modified_time_then_path() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("a.sql"), "", 300);
        write_with_mtime(&dir.path().join("b.sql"), "", 100);
        write_with_mtime(&dir.path().join("c.sql"), "", 200);
        write_with_mtime(&dir.path().join("d.sql"), "", 100);

        let scripts = FileSystemScriptProvider::new(dir.path())
            .sort_by(ScriptSortBy::Modified)
            .get_scripts()
            .unwrap();

        assert_eq!(names(&scripts), vec!["b.sql", "d.sql", "c.sql", "a.sql"]);
    }

    #[test]
    fn repeated_discovery_yields_same_order() {
        let dir = tempfile::tempdir().unwrap();
        for (i, name) in ["z.sql", "m.sql", "a.sql"].iter().enumerate() {
            write_with_mtime(&dir.path().join(name), "", i as u64);
        }
        let provider = FileSystemScriptProvider::new(dir.path());
        let first = names(&provider.get_scripts().unwrap());
        let second = names(&provider.get_scripts().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn missing_root_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSystemScriptProvider::new(dir.path().join("nope"))
            .get_scripts()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::FolderNotFound(_))
        ));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileSystemScriptProvider::new(dir.path())
            .with_pattern("[*.sql")
            .get_scripts()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidPattern { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn broken_entry_fails_instead_of_being_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("001.sql"), "").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.sql"), dir.path().join("002.sql"))
            .unwrap();

        let result = FileSystemScriptProvider::new(dir.path()).get_scripts();
        assert!(result.is_err(), "a dangling script entry must not be skipped");
    }

    #[test]
    fn implausible_creation_time_falls_back_to_modified() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let sentinel = Utc.with_ymd_and_hms(1601, 1, 1, 0, 0, 0).unwrap();
        let real = Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap();

        assert_eq!(safe_created_utc(None, modified), modified);
        assert_eq!(safe_created_utc(Some(sentinel), modified), modified);
        assert_eq!(
            safe_created_utc(Some(DateTime::<Utc>::MIN_UTC), modified),
            modified
        );
        assert_eq!(safe_created_utc(Some(real), modified), real);
    }

    #[test]
    fn discovery_listing_breaks_ties_by_full_path() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mk = |folder: &str, file: &str| ScriptCandidate {
            identity: ScriptIdentity::new(folder, file),
            contents: String::new(),
            created_utc: t,
            modified_utc: t,
        };
        let mut v = vec![mk("/s/R2", "001.sql"), mk("/s/R1", "001.sql"), mk("/s", "B.sql")];
        v.sort_by(|a, b| ScriptSortBy::Created.compare(a, b));
        let order: Vec<String> = v.iter().map(|c| c.identity.key()).collect();
        assert_eq!(order, vec!["/s||B.sql", "/s/R1||001.sql", "/s/R2||001.sql"]);
    }

    #[test]
    fn single_file_time_matches_discovery() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(&dir.path().join("001.sql"), "SELECT 1;", 60);

        let scripts = FileSystemScriptProvider::new(dir.path()).get_scripts().unwrap();
        let t = script_file_time_utc(&scripts[0].identity).unwrap();
        assert_eq!(t, scripts[0].created_utc);

        let gone = ScriptIdentity::new(dir.path().to_string_lossy(), "gone.sql");
        assert!(script_file_time_utc(&gone).is_err());
    }

    #[test]
    fn decodes_utf8_bom_and_keeps_line_endings() {
        let (text, lossy) = decode_script_bytes(b"\xEF\xBB\xBFSELECT 1;\r\nGO\r\n");
        assert_eq!(text, "SELECT 1;\r\nGO\r\n");
        assert!(!lossy);
    }

    #[test]
    fn decodes_utf16_le_and_be() {
        let le: Vec<u8> = [0xFF, 0xFE]
            .into_iter()
            .chain("SÉL".encode_utf16().flat_map(|u| u.to_le_bytes()))
            .collect();
        let be: Vec<u8> = [0xFE, 0xFF]
            .into_iter()
            .chain("SÉL".encode_utf16().flat_map(|u| u.to_be_bytes()))
            .collect();
        assert_eq!(decode_script_bytes(&le), ("SÉL".to_string(), false));
        assert_eq!(decode_script_bytes(&be), ("SÉL".to_string(), false));
    }

    #[test]
    fn invalid_utf8_is_replaced_and_flagged() {
        let (text, lossy) = decode_script_bytes(b"SELECT '\xE9';");
        assert!(lossy);
        assert!(text.contains('\u{FFFD}'));
    }
}
