//! Project crawler.
//!
//! Walks the project root honouring `.gitignore`, the project-local ignore
//! file, and a built-in deny list; resolves languages by extension; hashes
//! content; and annotates files with git recency when a repository is
//! present.

use crate::config::IGNORE_FILE;
use crate::error::{QuarryError, Result};
use crate::gitio::GitTracker;
use crate::types::{content_hash, CrawlReport, CrawledFile, Language};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Directory names and artifacts never worth indexing, regardless of
/// gitignore state.
fn builtin_excludes() -> Vec<&'static str> {
    vec![
        "**/.git/**",
        "**/.quarry/**",
        "**/node_modules/**",
        "**/target/**",
        "**/dist/**",
        "**/build/**",
        "**/out/**",
        "**/coverage/**",
        "**/vendor/**",
        "**/.venv/**",
        "**/venv/**",
        "**/__pycache__/**",
        "**/.next/**",
        "**/*.min.js",
        "**/*.min.css",
        "**/*.map",
    ]
}

/// Crawls the project root and reports candidate files.
pub struct Crawler {
    root: PathBuf,
    extra_excludes: Vec<String>,
    /// Cap on the recency list asked of git.
    git_recency_limit: usize,
}

impl Crawler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_excludes: Vec::new(),
            git_recency_limit: 200,
        }
    }

    /// Add an exclude pattern on top of built-ins and ignore files.
    pub fn with_exclude(mut self, pattern: &str) -> Self {
        self.extra_excludes.push(pattern.to_string());
        self
    }

    /// Walk the project and return every indexable file with its metadata.
    ///
    /// Missing project root is fatal; unreadable or non-UTF-8 files are
    /// skipped with a warning.
    pub fn crawl(&self, git: &GitTracker) -> Result<CrawlReport> {
        if !self.root.is_dir() {
            return Err(QuarryError::MissingProjectRoot(self.root.clone()));
        }

        let excludes = build_globset(
            builtin_excludes()
                .into_iter()
                .chain(self.extra_excludes.iter().map(|s| s.as_str())),
        )?;

        let recency = recency_ranks(git, self.git_recency_limit);
        let uncommitted = if git.is_repo() {
            Some(git.uncommitted_paths())
        } else {
            None
        };

        let walker = WalkBuilder::new(&self.root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .add_custom_ignore_filename(IGNORE_FILE)
            .build();

        let mut report = CrawlReport {
            git_aware: git.is_repo(),
            ..Default::default()
        };

        for entry in walker.filter_map(|e| e.ok()) {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let path = entry.path();

            let rel = match path.strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            if excludes.is_match(rel) {
                continue;
            }

            let Some(language) = language_of(path) else {
                continue;
            };

            let Some(file) = self.read_file(path, rel, language, &recency, &uncommitted)
            else {
                continue;
            };

            report.total_size += file.size;
            *report
                .languages
                .entry(language.as_str().to_string())
                .or_default() += 1;
            report.files.push(file);
        }

        report.total_files = report.files.len();
        tracing::debug!(
            files = report.total_files,
            bytes = report.total_size,
            git = report.git_aware,
            "crawl complete"
        );
        Ok(report)
    }

    fn read_file(
        &self,
        path: &Path,
        rel: &Path,
        language: Language,
        recency: &std::collections::HashMap<String, f32>,
        uncommitted: &Option<std::collections::HashSet<String>>,
    ) -> Option<CrawledFile> {
        let relative_path = rel.to_string_lossy().replace('\\', "/");

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable file skipped");
                return None;
            }
        };
        if std::str::from_utf8(&bytes).is_err() {
            tracing::warn!(path = %path.display(), "non-UTF-8 file skipped");
            return None;
        }

        let metadata = fs::metadata(path).ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(bytes.len() as u64);
        let modified_at = metadata
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Some(CrawledFile {
            git_priority: recency.get(&relative_path).copied(),
            has_uncommitted_changes: uncommitted
                .as_ref()
                .map(|set| set.contains(&relative_path)),
            relative_path,
            absolute_path: path.to_path_buf(),
            language,
            hash: content_hash(&bytes),
            size,
            modified_at,
        })
    }
}

fn language_of(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?;
    Language::from_extension(&ext.to_ascii_lowercase())
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| QuarryError::InvalidQuery(format!("bad glob {pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| QuarryError::InvalidQuery(e.to_string()))
}

/// Normalised recency position per file: most recent commit = 1.0, the
/// `limit`-th = near 0.
fn recency_ranks(git: &GitTracker, limit: usize) -> std::collections::HashMap<String, f32> {
    let recent = git.recently_modified(limit);
    let total = recent.len().max(1) as f32;
    recent
        .into_iter()
        .enumerate()
        .map(|(rank, file)| (file.relative_path, 1.0 - rank as f32 / total))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn crawl_maps_languages_and_hashes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/lib.rs", "pub fn a() {}\n");
        write(dir.path(), "web/app.ts", "export const x = 1;\n");
        write(dir.path(), "README.md", "# nope\n");

        let git = GitTracker::open(dir.path());
        let report = Crawler::new(dir.path()).crawl(&git).unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.languages.get("rust"), Some(&1));
        assert_eq!(report.languages.get("typescript"), Some(&1));
        assert_eq!(
            report.languages.values().sum::<usize>(),
            report.total_files
        );

        let rs = report
            .files
            .iter()
            .find(|f| f.relative_path == "src/lib.rs")
            .unwrap();
        assert_eq!(rs.hash.len(), 16);
        assert!(rs.absolute_path.ends_with("src/lib.rs"));
        assert!(!report.git_aware);
    }

    #[test]
    fn builtin_dirs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/ok.rs", "fn ok() {}\n");
        write(dir.path(), "node_modules/x/bad.ts", "export const y = 2;\n");
        write(dir.path(), "target/debug/gen.rs", "fn gen() {}\n");

        let git = GitTracker::open(dir.path());
        let report = Crawler::new(dir.path()).crawl(&git).unwrap();

        let paths: Vec<_> = report.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/ok.rs"]);
    }

    #[test]
    fn project_ignore_file_applies() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/keep.rs", "fn keep() {}\n");
        write(dir.path(), "src/generated.rs", "fn skip() {}\n");
        write(dir.path(), IGNORE_FILE, "# generated code\nsrc/generated.rs\n");

        let git = GitTracker::open(dir.path());
        let report = Crawler::new(dir.path()).crawl(&git).unwrap();

        let paths: Vec<_> = report.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["src/keep.rs"]);
    }

    #[test]
    fn non_utf8_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/ok.rs", "fn ok() {}\n");
        fs::write(dir.path().join("src/bad.rs"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let git = GitTracker::open(dir.path());
        let report = Crawler::new(dir.path()).crawl(&git).unwrap();
        assert_eq!(report.total_files, 1);
    }

    #[test]
    fn missing_root_is_fatal() {
        let crawler = Crawler::new("/definitely/not/a/real/root");
        let git = GitTracker::open(Path::new("/definitely/not/a/real/root"));
        assert!(crawler.crawl(&git).is_err());
    }
}
