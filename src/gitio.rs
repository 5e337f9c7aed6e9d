//! Git-aware change detection and recency.
//!
//! Every operation is best-effort: a project that is not a git checkout gets
//! empty results, never errors. Git failures degrade the indexer's planner to
//! the hash-comparison path; they must not abort a run.

use git2::{Delta, DiffFindOptions, DiffOptions, Repository, Sort, StatusOptions};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Added/modified/deleted/renamed sets between two states of the tree.
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    /// old path -> new path
    pub renamed: HashMap<String, String>,
}

impl DiffSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.renamed.is_empty()
    }
}

/// Per-file commit recency for ranking.
#[derive(Debug, Clone)]
pub struct RecentFile {
    pub relative_path: String,
    /// Epoch seconds of the most recent commit touching the file.
    pub last_commit_epoch: i64,
    pub commit_count: u32,
    pub authors: Vec<String>,
}

/// Handle over an optional repository at the project root.
pub struct GitTracker {
    repo: Option<Repository>,
}

impl GitTracker {
    /// Open the repository at `root` if one exists. Never fails.
    pub fn open(root: &Path) -> Self {
        let repo = match Repository::open(root) {
            Ok(repo) => Some(repo),
            Err(e) => {
                tracing::debug!(root = %root.display(), error = %e, "no git repository");
                None
            }
        };
        Self { repo }
    }

    pub fn is_repo(&self) -> bool {
        self.repo.is_some()
    }

    /// Full hex id of HEAD, if resolvable.
    pub fn head_commit(&self) -> Option<String> {
        let repo = self.repo.as_ref()?;
        let head = repo.head().ok()?;
        let commit = head.peel_to_commit().ok()?;
        Some(commit.id().to_string())
    }

    /// Short name of the checked-out branch.
    pub fn current_branch(&self) -> Option<String> {
        let repo = self.repo.as_ref()?;
        let head = repo.head().ok()?;
        head.shorthand().map(|s| s.to_string())
    }

    /// Whether the working tree has no uncommitted changes.
    pub fn is_clean(&self) -> bool {
        self.working_tree_changes().is_empty()
    }

    /// Diff between two commits, with rename detection.
    pub fn diff(&self, from_commit: &str, to_commit: &str) -> DiffSet {
        let Some(repo) = self.repo.as_ref() else {
            return DiffSet::default();
        };

        match self.diff_inner(repo, from_commit, to_commit) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(from = from_commit, to = to_commit, error = %e, "git diff failed");
                DiffSet::default()
            }
        }
    }

    fn diff_inner(
        &self,
        repo: &Repository,
        from_commit: &str,
        to_commit: &str,
    ) -> Result<DiffSet, git2::Error> {
        let from_tree = repo
            .revparse_single(from_commit)?
            .peel_to_commit()?
            .tree()?;
        let to_tree = repo.revparse_single(to_commit)?.peel_to_commit()?.tree()?;

        let mut opts = DiffOptions::new();
        let mut diff =
            repo.diff_tree_to_tree(Some(&from_tree), Some(&to_tree), Some(&mut opts))?;

        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let mut set = DiffSet::default();
        for delta in diff.deltas() {
            let new_path = delta
                .new_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());
            let old_path = delta
                .old_file()
                .path()
                .map(|p| p.to_string_lossy().to_string());

            match delta.status() {
                Delta::Added => {
                    if let Some(p) = new_path {
                        set.added.push(p);
                    }
                }
                Delta::Deleted => {
                    if let Some(p) = old_path {
                        set.deleted.push(p);
                    }
                }
                Delta::Modified | Delta::Typechange => {
                    if let Some(p) = new_path {
                        set.modified.push(p);
                    }
                }
                Delta::Renamed | Delta::Copied => {
                    if let (Some(old), Some(new)) = (old_path, new_path) {
                        set.renamed.insert(old, new);
                    }
                }
                _ => {}
            }
        }
        Ok(set)
    }

    /// Uncommitted state of the working tree (staged, unstaged, untracked).
    pub fn working_tree_changes(&self) -> DiffSet {
        let Some(repo) = self.repo.as_ref() else {
            return DiffSet::default();
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);

        let statuses = match repo.statuses(Some(&mut opts)) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "git status failed");
                return DiffSet::default();
            }
        };

        let mut set = DiffSet::default();
        for entry in statuses.iter() {
            let Some(path) = entry.path() else { continue };
            let status = entry.status();

            if status.is_wt_new() || status.is_index_new() {
                set.added.push(path.to_string());
            } else if status.is_wt_deleted() || status.is_index_deleted() {
                set.deleted.push(path.to_string());
            } else if status.is_wt_renamed() || status.is_index_renamed() {
                // statuses() does not expose the old path pair cleanly;
                // treat as modified so the new path is re-indexed.
                set.modified.push(path.to_string());
            } else if status.is_wt_modified() || status.is_index_modified() {
                set.modified.push(path.to_string());
            }
        }
        set
    }

    /// Most recently committed files, ranked newest-first.
    ///
    /// Walks history until `limit` distinct files are seen or the commit
    /// budget runs out, so pathological histories stay cheap.
    pub fn recently_modified(&self, limit: usize) -> Vec<RecentFile> {
        let Some(repo) = self.repo.as_ref() else {
            return Vec::new();
        };

        const COMMIT_BUDGET: usize = 500;

        let mut revwalk = match repo.revwalk() {
            Ok(walk) => walk,
            Err(_) => return Vec::new(),
        };
        if revwalk.push_head().is_err() {
            return Vec::new();
        }
        let _ = revwalk.set_sorting(Sort::TIME);

        let mut order: Vec<String> = Vec::new();
        let mut stats: HashMap<String, RecentFile> = HashMap::new();

        for oid in revwalk.take(COMMIT_BUDGET) {
            if order.len() >= limit {
                break;
            }
            let Ok(oid) = oid else { continue };
            let Ok(commit) = repo.find_commit(oid) else { continue };
            let Ok(tree) = commit.tree() else { continue };
            let parent_tree = commit.parent(0).ok().and_then(|p| p.tree().ok());

            let Ok(diff) = repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            else {
                continue;
            };

            let epoch = commit.time().seconds();
            let author = commit
                .author()
                .name()
                .unwrap_or("unknown")
                .to_string();

            for delta in diff.deltas() {
                let Some(path) = delta.new_file().path().and_then(|p| p.to_str()) else {
                    continue;
                };
                let entry = stats.entry(path.to_string()).or_insert_with(|| {
                    order.push(path.to_string());
                    RecentFile {
                        relative_path: path.to_string(),
                        last_commit_epoch: epoch,
                        commit_count: 0,
                        authors: Vec::new(),
                    }
                });
                entry.commit_count += 1;
                if !entry.authors.contains(&author) {
                    entry.authors.push(author.clone());
                }
            }
        }

        order
            .into_iter()
            .take(limit)
            .filter_map(|path| stats.remove(&path))
            .collect()
    }

    /// Relative paths with uncommitted changes, for crawler annotation.
    pub fn uncommitted_paths(&self) -> HashSet<String> {
        let changes = self.working_tree_changes();
        changes
            .added
            .into_iter()
            .chain(changes.modified)
            .chain(changes.renamed.into_values())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_repo_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitTracker::open(dir.path());

        assert!(!git.is_repo());
        assert!(git.head_commit().is_none());
        assert!(git.current_branch().is_none());
        assert!(git.diff("a", "b").is_empty());
        assert!(git.working_tree_changes().is_empty());
        assert!(git.recently_modified(10).is_empty());
        assert!(git.is_clean());
    }
}
