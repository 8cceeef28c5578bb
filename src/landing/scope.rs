use anyhow::{Context, Result};
use git2::{DiffOptions, Repository};
use std::collections::BTreeSet;
use std::path::Path;

/// Paths that were already dirty before a cycle started.
///
/// A path is owned by the cycle iff it is dirty afterwards and was not part of the
/// baseline. Only owned paths are ever staged by landing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingScope {
    baseline: BTreeSet<String>,
}

impl LandingScope {
    /// Snapshot the dirty paths of the repository at `repo_root`.
    pub fn capture(repo_root: &Path) -> Result<Self> {
        Ok(Self {
            baseline: dirty_paths(repo_root)?,
        })
    }

    pub fn baseline(&self) -> &BTreeSet<String> {
        &self.baseline
    }

    /// Currently dirty paths that were clean when the scope was captured, sorted.
    pub fn owned_paths(&self, repo_root: &Path) -> Result<Vec<String>> {
        Ok(dirty_paths(repo_root)?
            .into_iter()
            .filter(|p| !self.baseline.contains(p))
            .collect())
    }
}

/// Paths modified relative to HEAD (staged or not), plus untracked files that are
/// not ignored. Paths are relative to the repository root, `/`-separated.
pub fn dirty_paths(repo_root: &Path) -> Result<BTreeSet<String>> {
    let repo = Repository::open(repo_root)
        .with_context(|| format!("Failed to open git repository at {}", repo_root.display()))?;

    // Unborn HEAD: everything in the index and working tree counts.
    let head_tree = repo.head().ok().and_then(|h| h.peel_to_tree().ok());

    let mut opts = DiffOptions::new();
    opts.include_untracked(true).recurse_untracked_dirs(true);
    let diff = repo
        .diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
        .context("git diff failed while collecting landing scope")?;

    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        let path = delta.new_file().path().or_else(|| delta.old_file().path());
        if let Some(path) = path {
            paths.insert(path.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(paths)
}

#[cfg(test)]
pub(crate) mod test_support {
    use git2::{Repository, Signature};
    use std::path::Path;

    /// Initialise a repo at `dir` with `files` committed on `main`.
    pub fn init_repo(dir: &Path, files: &[(&str, &str)]) -> Repository {
        let repo = Repository::init(dir).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "test").unwrap();
            config.set_str("user.email", "test@test.com").unwrap();
        }
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        {
            let mut index = repo.index().unwrap();
            index
                .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
                .unwrap();
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = Signature::now("test", "test@test.com").unwrap();
            repo.commit(Some("refs/heads/main"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        repo.set_head("refs/heads/main").unwrap();
        repo
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::init_repo;
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_clean_repo_has_no_dirty_paths() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), &[("README.md", "hi\n")]);
        assert!(dirty_paths(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_dirty_paths_cover_modified_untracked_and_deleted() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        fs::write(dir.path().join("a.txt"), "changed\n").unwrap();
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        fs::create_dir_all(dir.path().join("new")).unwrap();
        fs::write(dir.path().join("new/c.txt"), "c\n").unwrap();

        let paths: Vec<_> = dirty_paths(dir.path()).unwrap().into_iter().collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "new/c.txt"]);
    }

    #[test]
    fn test_ignored_files_are_not_dirty() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), &[(".gitignore", "target/\n")]);
        fs::create_dir_all(dir.path().join("target")).unwrap();
        fs::write(dir.path().join("target/out.bin"), "x").unwrap();
        assert!(dirty_paths(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_owned_paths_exclude_baseline() {
        let dir = tempdir().unwrap();
        init_repo(dir.path(), &[("user.txt", "u\n")]);
        fs::write(dir.path().join("user.txt"), "user edit in progress\n").unwrap();

        let scope = LandingScope::capture(dir.path()).unwrap();
        assert!(scope.baseline().contains("user.txt"));

        fs::write(dir.path().join("cycle.txt"), "produced by the cycle\n").unwrap();
        fs::write(dir.path().join("user.txt"), "user edited again\n").unwrap();

        assert_eq!(scope.owned_paths(dir.path()).unwrap(), vec!["cycle.txt"]);
    }

    #[test]
    fn test_not_a_repository_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(LandingScope::capture(dir.path()).is_err());
    }
}
