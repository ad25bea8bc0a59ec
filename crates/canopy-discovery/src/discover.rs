use crate::activity::detect_activity;
use crate::DiscoveryError;
use canopy_core::{naming, Worktree, DETACHED_BRANCH, DETACHED_NAME};
use futures_util::future::{join_all, BoxFuture};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

/// Directories never worth descending into: dependency and cache trees of
/// common ecosystems.
const SKIP_DIRS: &[&str] = &["node_modules", "vendor", "target", "__pycache__", "venv", ".venv"];

/// Lists every worktree of the repository at `repo_path` and enriches each
/// record with its activity signals.
///
/// Path resolution and the `git worktree list` invocation are hard errors;
/// per-worktree probe failures degrade individual fields instead of
/// aborting the batch.
pub async fn discover(repo_path: impl AsRef<Path>) -> Result<Vec<Worktree>, DiscoveryError> {
    let repo_path = repo_path.as_ref();
    let abs = fs::canonicalize(repo_path)
        .await
        .map_err(|source| DiscoveryError::ResolvePath {
            path: repo_path.to_path_buf(),
            source,
        })?;

    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(&abs)
        .output()
        .await
        .map_err(|source| DiscoveryError::GitSpawn {
            path: abs.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(DiscoveryError::WorktreeList {
            path: abs,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut worktrees = parse_worktree_list(&String::from_utf8_lossy(&output.stdout));
    join_all(worktrees.iter_mut().map(detect_activity)).await;
    Ok(worktrees)
}

/// Parses `git worktree list --porcelain` output.
///
/// The first `worktree` line establishes the main-repo path shared by every
/// record in the batch. A `HEAD` or `detached` line seen before any `branch`
/// line marks the record as detached; a later `branch` line always wins.
fn parse_worktree_list(output: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();
    let mut current: Option<Worktree> = None;
    let mut main_repo = PathBuf::new();

    for line in output.lines() {
        let line = line.trim();

        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                worktrees.push(done);
            }
            if main_repo.as_os_str().is_empty() {
                main_repo = PathBuf::from(path);
            }
            current = Some(Worktree::new(path, main_repo.clone()));
        } else if let Some(branch) = line.strip_prefix("branch ") {
            if let Some(wt) = current.as_mut() {
                let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
                wt.branch = branch.to_string();
                wt.name = naming::sanitize(branch);
            }
        } else if line.strip_prefix("HEAD ").is_some() || line.starts_with("detached") {
            if let Some(wt) = current.as_mut() {
                if wt.branch.is_empty() {
                    wt.branch = DETACHED_BRANCH.to_string();
                    wt.name = DETACHED_NAME.to_string();
                }
            }
        }
    }

    if let Some(done) = current.take() {
        worktrees.push(done);
    }

    worktrees
}

/// Recursively scans a directory tree for git repositories and collects the
/// worktrees of each one found. Repositories are not descended into, hidden
/// and dependency directories are skipped, and unreadable directories count
/// as empty. A negative `max_depth` means unlimited.
pub async fn find_all(base_path: impl AsRef<Path>, max_depth: i32) -> Vec<Worktree> {
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    scan(
        base_path.as_ref().to_path_buf(),
        0,
        max_depth,
        &mut seen,
        &mut found,
    )
    .await;
    found
}

fn scan<'a>(
    path: PathBuf,
    depth: i32,
    max_depth: i32,
    seen: &'a mut HashSet<PathBuf>,
    found: &'a mut Vec<Worktree>,
) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        if max_depth >= 0 && depth > max_depth {
            return;
        }

        let git_marker = path.join(".git");
        let is_repo = fs::metadata(&git_marker)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if is_repo {
            match discover(&path).await {
                Ok(worktrees) => {
                    for wt in worktrees {
                        // First occurrence wins; linked worktrees can show up
                        // again under a sibling repository root.
                        if seen.insert(wt.path.clone()) {
                            found.push(wt);
                        }
                    }
                }
                Err(err) => debug!(event = "discover_failed", path = %path.display(), error = %err),
            }
            return;
        }

        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref()) {
                continue;
            }
            scan(entry.path(), depth + 1, max_depth, seen, found).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_WORKTREES: &str = "\
worktree /repos/project
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /repos/project-feature-auth
HEAD 2222222222222222222222222222222222222222
branch refs/heads/feature/auth

worktree /repos/project-bugfix
HEAD 3333333333333333333333333333333333333333
branch refs/heads/bugfix/123
";

    #[test]
    fn parses_one_record_per_worktree_block() {
        let worktrees = parse_worktree_list(THREE_WORKTREES);
        assert_eq!(worktrees.len(), 3);

        let names: Vec<_> = worktrees.iter().map(|wt| wt.name.as_str()).collect();
        assert_eq!(names, ["main", "feature-auth", "bugfix-123"]);

        let branches: Vec<_> = worktrees.iter().map(|wt| wt.branch.as_str()).collect();
        assert_eq!(branches, ["main", "feature/auth", "bugfix/123"]);
    }

    #[test]
    fn every_record_shares_the_first_worktree_as_main_repo() {
        let worktrees = parse_worktree_list(THREE_WORKTREES);
        for wt in &worktrees {
            assert_eq!(wt.main_repo, PathBuf::from("/repos/project"));
        }
        assert_eq!(worktrees[0].path, worktrees[0].main_repo);
    }

    #[test]
    fn detached_block_gets_sentinel_branch_and_name() {
        let output = "\
worktree /repos/project
HEAD 1111111111111111111111111111111111111111
branch refs/heads/main

worktree /repos/project-pinned
HEAD 4444444444444444444444444444444444444444
detached
";
        let worktrees = parse_worktree_list(output);
        assert_eq!(worktrees.len(), 2);
        assert_eq!(worktrees[1].branch, DETACHED_BRANCH);
        assert_eq!(worktrees[1].name, DETACHED_NAME);
    }

    #[test]
    fn head_line_alone_marks_detached_until_branch_arrives() {
        let output = "\
worktree /repos/project
HEAD 1111111111111111111111111111111111111111
";
        let worktrees = parse_worktree_list(output);
        assert_eq!(worktrees.len(), 1);
        assert_eq!(worktrees[0].branch, DETACHED_BRANCH);
        assert_eq!(worktrees[0].name, DETACHED_NAME);

        // The branch line always wins over an earlier HEAD line.
        let with_branch = parse_worktree_list(THREE_WORKTREES);
        assert_eq!(with_branch[0].branch, "main");
    }

    #[test]
    fn blank_lines_and_garbage_are_ignored() {
        let output = "\n\nworktree /repos/solo\nbare\nbranch refs/heads/main\n\n\n";
        let worktrees = parse_worktree_list(output);
        assert_eq!(worktrees.len(), 1);
        assert_eq!(worktrees[0].name, "main");
    }

    #[test]
    fn empty_output_yields_no_records() {
        assert!(parse_worktree_list("").is_empty());
    }
}
