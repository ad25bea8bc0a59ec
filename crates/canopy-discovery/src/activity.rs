use canopy_core::{AgentInfo, AgentKind, Worktree};
use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use sysinfo::System;
use tokio::fs;
use tokio::process::Command;

/// Marker directory left under a worktree by remote editor sessions.
const EDITOR_MARKER_DIR: &str = ".vscode-server";

/// Process-name fragment identifying the editor.
const EDITOR_SIGNATURE: &str = "code";

const AGENT_SIGNATURES: &[(&str, AgentKind)] =
    &[("claude", AgentKind::Claude), ("gemini", AgentKind::Gemini)];

/// Runs the three activity probes for one worktree concurrently and merges
/// the results into the record once all of them have finished.
///
/// Never fails: a probe whose subprocess or system query errors resolves its
/// own signal to false, independently of the other two. `last_activity` only
/// advances when at least one signal is true.
pub async fn detect_activity(wt: &mut Worktree) {
    let path = wt.path.clone();
    let (agent, has_vscode, git_dirty) = tokio::join!(
        detect_agent(path.clone()),
        detect_editor(path.clone()),
        detect_git_dirty(path),
    );

    wt.has_claude = matches!(agent.as_ref().map(|a| a.kind), Some(AgentKind::Claude));
    wt.has_gemini = matches!(agent.as_ref().map(|a| a.kind), Some(AgentKind::Gemini));
    wt.agent = agent;
    wt.has_vscode = has_vscode;
    wt.git_dirty = git_dirty;

    if wt.agent.is_some() || wt.has_vscode || wt.git_dirty {
        wt.last_activity = Utc::now();
    }
}

/// Sweeps the whole process table once and returns every agent session found,
/// keyed by nothing — callers filter by working directory.
pub async fn detect_agents() -> Vec<AgentInfo> {
    tokio::task::spawn_blocking(|| {
        let sys = System::new_all();
        scan_agents(&sys)
    })
    .await
    .unwrap_or_default()
}

async fn detect_agent(path: PathBuf) -> Option<AgentInfo> {
    tokio::task::spawn_blocking(move || {
        let sys = System::new_all();
        scan_agents(&sys)
            .into_iter()
            .find(|agent| agent.path == path)
    })
    .await
    .ok()
    .flatten()
}

async fn detect_editor(path: PathBuf) -> bool {
    let marker = fs::metadata(path.join(EDITOR_MARKER_DIR))
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if marker {
        return true;
    }

    tokio::task::spawn_blocking(move || {
        let sys = System::new_all();
        editor_attached(&sys, &path)
    })
    .await
    .unwrap_or(false)
}

/// True when `git status --porcelain` reports anything at all for the path.
pub async fn detect_git_dirty(path: impl AsRef<Path>) -> bool {
    let output = Command::new("git")
        .arg("-C")
        .arg(path.as_ref())
        .args(["status", "--porcelain"])
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            !String::from_utf8_lossy(&out.stdout).trim().is_empty()
        }
        _ => false,
    }
}

fn scan_agents(sys: &System) -> Vec<AgentInfo> {
    let mut agents = Vec::new();
    for (pid, process) in sys.processes() {
        let Some(kind) = agent_kind_of(process.name(), process.cmd()) else {
            continue;
        };
        let Some(cwd) = process.cwd() else {
            continue;
        };
        agents.push(AgentInfo {
            kind,
            pid: pid.as_u32(),
            path: cwd.to_path_buf(),
            start_time: epoch_secs(process.start_time()),
            command: process.cmd().join(" "),
        });
    }
    agents
}

fn agent_kind_of(name: &str, cmd: &[String]) -> Option<AgentKind> {
    let name = name.to_ascii_lowercase();
    for (signature, kind) in AGENT_SIGNATURES {
        if name.contains(signature) {
            return Some(*kind);
        }
        if cmd
            .iter()
            .any(|arg| arg.to_ascii_lowercase().contains(signature))
        {
            return Some(*kind);
        }
    }
    None
}

fn editor_attached(sys: &System, path: &Path) -> bool {
    let needle = path.to_string_lossy();
    sys.processes().values().any(|process| {
        process.name().to_ascii_lowercase().contains(EDITOR_SIGNATURE)
            && process.cmd().iter().any(|arg| arg.contains(needle.as_ref()))
    })
}

fn epoch_secs(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn agent_signatures_match_name_or_command_line() {
        assert_eq!(
            agent_kind_of("claude", &cmd(&["claude"])),
            Some(AgentKind::Claude)
        );
        assert_eq!(
            agent_kind_of("node", &cmd(&["node", "/usr/local/bin/claude", "--resume"])),
            Some(AgentKind::Claude)
        );
        assert_eq!(
            agent_kind_of("gemini-cli", &cmd(&["gemini-cli"])),
            Some(AgentKind::Gemini)
        );
        assert_eq!(agent_kind_of("bash", &cmd(&["bash", "-l"])), None);
    }

    #[test]
    fn claude_wins_when_both_signatures_appear() {
        // Signature order is fixed; the first match decides the kind.
        assert_eq!(
            agent_kind_of("claude", &cmd(&["claude", "--review", "gemini.md"])),
            Some(AgentKind::Claude)
        );
    }

    #[test]
    fn epoch_zero_means_unknown_start_time() {
        assert!(epoch_secs(0).is_none());
        let known = epoch_secs(1_700_000_000).expect("valid epoch");
        assert_eq!(known.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn git_dirty_is_false_outside_a_repository() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(!detect_git_dirty(tmp.path()).await);
    }

    #[tokio::test]
    async fn agent_sweep_never_panics() {
        // Contents depend on the host; the sweep itself must always succeed.
        let _ = detect_agents().await;
    }
}
