// Reconciliation
// pending = discovered - journaled, with journal rows scoped to the scripts root.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;

use crate::database::journal::HistoryRow;
use crate::scripts::discovery::ScriptCandidate;
use crate::scripts::key::ScriptIdentity;
use crate::utils::path_resolver::{is_within_folder, normalize_folder, release_of};

/// A journaled script that belongs to the configured root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedRow {
    pub script_name: String,
    pub applied_utc: Option<DateTime<Utc>>,
    pub path: String,
    pub release: Option<String>,
}

/// Case-folded keys of the applied identities that live in or under `folder_scope`.
pub fn scoped_applied_keys(applied: &[ScriptIdentity], folder_scope: &str) -> HashSet<String> {
    applied
        .iter()
        .filter(|id| is_within_folder(&id.folder, folder_scope))
        .map(ScriptIdentity::match_key)
        .collect()
}

/// Scripts on disk that the journal has no record of, oldest first, then by identity.
///
/// Journal rows outside `folder_scope` are ignored. Same-named files in different folders
/// are distinct scripts.
pub fn compute_pending(
    candidates: Vec<ScriptCandidate>,
    applied: &[ScriptIdentity],
    folder_scope: &str,
) -> Vec<ScriptCandidate> {
    let applied_keys = scoped_applied_keys(applied, folder_scope);
    let mut seen: HashSet<String> = HashSet::new();

    let mut pending: Vec<ScriptCandidate> = candidates
        .into_iter()
        .filter(|c| {
            let key = c.identity.match_key();
            if applied_keys.contains(&key) {
                return false;
            }
            if !seen.insert(key) {
                // Case-only variants of one name collide under case-insensitive identity.
                warn!(
                    "[PHASE: reconcile] [STEP: compute_pending] Ignoring duplicate identity {}",
                    c.identity
                );
                return false;
            }
            true
        })
        .collect();

    pending.sort_by(pending_order);

    debug!(
        "[PHASE: reconcile] [STEP: compute_pending] {} pending ({} applied in scope)",
        pending.len(),
        applied_keys.len()
    );
    pending
}

/// Creation time, then the `folder||file` key compared case-insensitively.
pub fn pending_order(a: &ScriptCandidate, b: &ScriptCandidate) -> Ordering {
    a.created_utc
        .cmp(&b.created_utc)
        .then_with(|| a.identity.order_key().cmp(&b.identity.order_key()))
}

/// Journal rows recorded under `folder_scope`, in the order they were applied.
pub fn executed_in(history: &[HistoryRow], folder_scope: &str) -> Vec<ExecutedRow> {
    let mut rows: Vec<ExecutedRow> = history
        .iter()
        .filter_map(|h| {
            let path = normalize_folder(h.path.as_deref().unwrap_or_default());
            if !is_within_folder(&path, folder_scope) {
                return None;
            }
            Some(ExecutedRow {
                script_name: h.script_name.clone(),
                applied_utc: h.applied_utc,
                release: release_of(&path, folder_scope),
                path,
            })
        })
        .collect();

    rows.sort_by(|a, b| {
        let by_time = match (a.applied_utc, b.applied_utc) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then_with(|| a.script_name.to_lowercase().cmp(&b.script_name.to_lowercase()))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(folder: &str, file: &str, day: u32) -> ScriptCandidate {
        let t = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        ScriptCandidate {
            identity: ScriptIdentity::new(folder, file),
            contents: format!("-- {}", file),
            created_utc: t,
            modified_utc: t,
        }
    }

    fn files(pending: &[ScriptCandidate]) -> Vec<String> {
        pending.iter().map(|c| c.identity.key()).collect()
    }

    #[test]
    fn pending_is_discovered_minus_applied() {
        let root = "/srv/scripts";
        let candidates = vec![
            candidate(root, "001_init.sql", 1),
            candidate(root, "002_addcol.sql", 2),
            candidate("/srv/scripts/R1", "003_idx.sql", 3),
        ];
        let applied = vec![ScriptIdentity::new(root, "002_addcol.sql")];

        let pending = compute_pending(candidates, &applied, root);

        assert_eq!(
            files(&pending),
            vec!["/srv/scripts||001_init.sql", "/srv/scripts/R1||003_idx.sql"]
        );
    }

    #[test]
    fn applied_match_ignores_case() {
        let candidates = vec![candidate(r"C:\Scripts\R1", "001_Init.sql", 1)];
        let applied = vec![ScriptIdentity::new(r"c:\scripts\r1", "001_init.SQL")];
        assert!(compute_pending(candidates, &applied, r"C:\Scripts").is_empty());
    }

    #[test]
    fn same_name_in_two_releases_stays_distinct() {
        let candidates = vec![
            candidate("/s/R1", "001.sql", 1),
            candidate("/s/R2", "001.sql", 1),
        ];
        let applied = vec![ScriptIdentity::new("/s/R1", "001.sql")];

        let pending = compute_pending(candidates.clone(), &[], "/s");
        assert_eq!(pending.len(), 2);

        let pending = compute_pending(candidates, &applied, "/s");
        assert_eq!(files(&pending), vec!["/s/R2||001.sql"]);
    }

    #[test]
    fn journal_rows_outside_root_do_not_count() {
        // Same folder text with a longer sibling prefix must not be treated as applied.
        let candidates = vec![candidate(r"C:\Scripts", "x.sql", 1)];
        let applied = vec![ScriptIdentity::new(r"C:\Scripts2", "x.sql")];

        let keys = scoped_applied_keys(&applied, r"C:\Scripts");
        assert!(keys.is_empty());
        assert_eq!(compute_pending(candidates, &applied, r"C:\Scripts").len(), 1);
    }

    #[test]
    fn pending_sorted_by_time_then_identity() {
        let candidates = vec![
            candidate("/s", "c.sql", 2),
            candidate("/s", "b.sql", 1),
            candidate("/s", "a.sql", 2),
        ];
        let pending = compute_pending(candidates.clone(), &[], "/s");
        assert_eq!(files(&pending), vec!["/s||b.sql", "/s||a.sql", "/s||c.sql"]);

        let mut reversed = candidates;
        reversed.reverse();
        assert_eq!(files(&compute_pending(reversed, &[], "/s")), files(&pending));
    }

    #[test]
    fn equal_times_order_by_identity_across_folders() {
        let candidates = vec![candidate("/s", "b.sql", 1), candidate("/s/R1", "a.sql", 1)];
        let pending = compute_pending(candidates, &[], "/s");
        assert_eq!(files(&pending), vec!["/s/R1||a.sql", "/s||b.sql"]);
    }

    #[test]
    fn identity_order_ignores_case_with_underscore_after_letters() {
        let candidates = vec![
            candidate("/s", "001_x.sql", 1),
            candidate("/s", "001A.sql", 1),
            candidate("/s", "001b.sql", 1),
        ];
        let pending = compute_pending(candidates, &[], "/s");
        assert_eq!(
            files(&pending),
            vec!["/s||001A.sql", "/s||001b.sql", "/s||001_x.sql"]
        );
    }

    #[test]
    fn case_only_duplicates_are_collapsed() {
        let candidates = vec![candidate("/s", "A.sql", 1), candidate("/s", "a.sql", 1)];
        assert_eq!(compute_pending(candidates, &[], "/s").len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn executed_rows_are_scoped_and_ordered() {
        let t = |d| Some(Utc.with_ymd_and_hms(2024, 2, d, 0, 0, 0).unwrap());
        let row = |id, name: &str, applied, path: Option<&str>| HistoryRow {
            id,
            script_name: name.to_string(),
            applied_utc: applied,
            executed_by: Some("sa".to_string()),
            machine_name: Some("BUILD01".to_string()),
            path: path.map(str::to_string),
        };
        let history = vec![
            row(1, "002.sql", t(2), Some("/srv/scripts/R2")),
            row(2, "001.sql", t(1), Some("/srv/scripts")),
            row(3, "zzz.sql", t(1), Some("/srv/scripts2")),
            row(4, "003.sql", None, Some("/srv/scripts/R2/")),
            row(5, "legacy.sql", t(1), None),
        ];

        let executed = executed_in(&history, "/srv/scripts");

        let names: Vec<&str> = executed.iter().map(|r| r.script_name.as_str()).collect();
        assert_eq!(names, vec!["001.sql", "002.sql", "003.sql"]);
        assert_eq!(executed[0].release, None);
        assert_eq!(executed[1].release.as_deref(), Some("R2"));
        assert_eq!(executed[2].path, "/srv/scripts/R2");
    }
}
