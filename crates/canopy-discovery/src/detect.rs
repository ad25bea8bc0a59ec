use crate::DiscoveryError;
use canopy_core::naming;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;

/// Resolved identity of a single worktree.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeContext {
    /// Sanitized, URL-safe identifier derived from the branch.
    pub name: String,
    /// Current branch, or a describe-style label on a detached HEAD.
    pub branch: String,
    /// Absolute worktree root.
    pub path: PathBuf,
    /// True for a linked worktree as opposed to the main working tree.
    pub is_linked: bool,
    /// Main worktree path when this is a linked worktree and the gitfile
    /// could be resolved.
    pub main_worktree: Option<PathBuf>,
}

/// Resolves the worktree containing `path`.
///
/// Hard errors: the path does not resolve, git cannot be invoked, or the path
/// is not inside a repository.
pub async fn detect_at(path: impl AsRef<Path>) -> Result<WorktreeContext, DiscoveryError> {
    let path = path.as_ref();
    let abs = fs::canonicalize(path)
        .await
        .map_err(|source| DiscoveryError::ResolvePath {
            path: path.to_path_buf(),
            source,
        })?;

    let toplevel = run_git(&abs, &["rev-parse", "--show-toplevel"]).await?;
    let toplevel = match toplevel {
        Some(out) => PathBuf::from(out),
        None => return Err(DiscoveryError::NotARepository { path: abs }),
    };

    let branch = match run_git(&abs, &["rev-parse", "--abbrev-ref", "HEAD"]).await? {
        Some(branch) => branch,
        None => {
            return Err(DiscoveryError::CurrentBranch {
                path: abs,
                stderr: "rev-parse --abbrev-ref HEAD failed".to_string(),
            })
        }
    };

    // On a detached HEAD, prefer a describe label over the bare sentinel.
    let branch = if branch == "HEAD" {
        run_git(&abs, &["describe", "--tags", "--always"])
            .await?
            .unwrap_or(branch)
    } else {
        branch
    };

    let (is_linked, main_worktree) = linked_worktree(&toplevel).await;

    Ok(WorktreeContext {
        name: naming::sanitize(&branch),
        branch,
        path: toplevel,
        is_linked,
        main_worktree,
    })
}

/// Classifies the worktree by its `.git` entry: a directory means the main
/// working tree, a gitfile (`gitdir: .../.git/worktrees/<name>`) means a
/// linked worktree whose main path can be recovered from the gitdir.
async fn linked_worktree(path: &Path) -> (bool, Option<PathBuf>) {
    let git_entry = path.join(".git");
    let meta = match fs::metadata(&git_entry).await {
        Ok(meta) => meta,
        Err(_) => return (false, None),
    };
    if meta.is_dir() {
        return (false, None);
    }

    let content = match fs::read_to_string(&git_entry).await {
        Ok(content) => content,
        Err(_) => return (false, None),
    };
    let line = content.trim();
    let Some(gitdir) = line.strip_prefix("gitdir: ") else {
        return (false, None);
    };

    match gitdir.split_once("/.git/worktrees/") {
        Some((main, _)) => (true, Some(PathBuf::from(main))),
        None => (true, None),
    }
}

async fn run_git(dir: &Path, args: &[&str]) -> Result<Option<String>, DiscoveryError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| DiscoveryError::GitSpawn {
            path: dir.to_path_buf(),
            source,
        })?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(
        String::from_utf8_lossy(&output.stdout).trim().to_string(),
    ))
}
