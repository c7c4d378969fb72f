// Script identity
// A script is identified by the absolute folder that contains it plus its file name.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite string form of a script identity: `<folder>||<file>`.
pub struct ScriptKey;

impl ScriptKey {
    /// Reserved separator. Never appears in a normalized folder path.
    pub const SEPARATOR: &'static str = "||";

    /// Join an absolute folder and a file name into a single key.
    ///
    /// The folder must already be absolute and normalized; no normalization happens here.
    pub fn make(folder: &str, file_name: &str) -> String {
        format!("{}{}{}", folder, Self::SEPARATOR, file_name)
    }

    /// Inverse of [`ScriptKey::make`]. Splits at the last separator.
    ///
    /// A key without a separator is treated as a bare file name with an empty folder.
    pub fn split(key: &str) -> (String, String) {
        match key.rfind(Self::SEPARATOR) {
            Some(idx) => (
                key[..idx].to_string(),
                key[idx + Self::SEPARATOR.len()..].to_string(),
            ),
            None => (String::new(), key.to_string()),
        }
    }
}

/// Identity of a script: absolute folder + file name.
///
/// Matching is case-insensitive; use [`ScriptIdentity::match_key`] for set membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScriptIdentity {
    pub folder: String,
    pub file_name: String,
}

impl ScriptIdentity {
    pub fn new(folder: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            file_name: file_name.into(),
        }
    }

    pub fn from_key(key: &str) -> Self {
        let (folder, file_name) = ScriptKey::split(key);
        Self { folder, file_name }
    }

    pub fn key(&self) -> String {
        ScriptKey::make(&self.folder, &self.file_name)
    }

    /// Case-folded key used to compare identities coming from disk and from the journal.
    pub fn match_key(&self) -> String {
        self.key().to_lowercase()
    }

    /// Upper-cased key for case-insensitive ordering. Upper-casing puts `_` after letters,
    /// so `001a.sql` sorts before `001_x.sql`.
    pub fn order_key(&self) -> String {
        self.key().to_uppercase()
    }

    pub fn full_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.folder).join(&self.file_name)
    }
}

impl fmt::Display for ScriptIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_inverse_of_make() {
        let cases = [
            ("/srv/scripts/release-1", "001_init.sql"),
            (r"C:\Scripts\R1", "002 add col.sql"),
            ("", "orphan.sql"),
            ("/a|b/c", "x|y.sql"),
        ];
        for (folder, file) in cases {
            let key = ScriptKey::make(folder, file);
            assert_eq!(
                ScriptKey::split(&key),
                (folder.to_string(), file.to_string()),
                "round trip failed for {:?}",
                key
            );
        }
    }

    #[test]
    fn split_uses_last_separator() {
        let (folder, file) = ScriptKey::split("/odd||folder||001.sql");
        assert_eq!(folder, "/odd||folder");
        assert_eq!(file, "001.sql");
    }

    #[test]
    fn split_without_separator_is_bare_file_name() {
        let (folder, file) = ScriptKey::split("001_init.sql");
        assert_eq!(folder, "");
        assert_eq!(file, "001_init.sql");
    }

    #[test]
    fn match_key_ignores_case() {
        let a = ScriptIdentity::new(r"C:\Scripts\R1", "001_Init.sql");
        let b = ScriptIdentity::new(r"c:\scripts\r1", "001_init.SQL");
        assert_ne!(a, b);
        assert_eq!(a.match_key(), b.match_key());
    }

    #[test]
    fn identity_from_key_round_trips() {
        let id = ScriptIdentity::new("/srv/scripts", "003.sql");
        assert_eq!(ScriptIdentity::from_key(&id.key()), id);
    }
}
