use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One git working tree, linked or main, plus its activity signals.
///
/// Records are built fresh by every discovery pass and enriched in place by
/// the activity probe; the previous pass's records are discarded wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worktree {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub main_repo: PathBuf,
    pub discovered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    // Activity indicators
    pub has_server: bool,
    pub has_claude: bool,
    pub has_gemini: bool,
    pub has_vscode: bool,
    pub git_dirty: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Worktree {
    pub fn new(path: impl Into<PathBuf>, main_repo: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            name: String::new(),
            path: path.into(),
            branch: String::new(),
            main_repo: main_repo.into(),
            discovered_at: now,
            last_activity: now,
            has_server: false,
            has_claude: false,
            has_gemini: false,
            has_vscode: false,
            git_dirty: false,
            agent: None,
            server: None,
            tags: Vec::new(),
        }
    }
}

/// An active agent session observed on the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentInfo {
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub pid: u32,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub command: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Gemini,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "gemini" => Ok(AgentKind::Gemini),
            other => Err(format!("Unknown agent kind: {other}")),
        }
    }
}

/// Dev-server state for a worktree, fed in by the external supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub port: u16,
    pub status: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// An agent record joined with the worktree it runs in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub worktree: String,
    pub path: PathBuf,
    pub branch: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

/// Point-in-time view of every known worktree and agent, ordered by name.
///
/// Snapshots are immutable value sets: a new pass replaces the whole thing,
/// nothing is patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub workspaces: Vec<Worktree>,
    pub agents: Vec<Agent>,
}

impl Snapshot {
    pub fn new(mut workspaces: Vec<Worktree>) -> Self {
        workspaces.sort_by(|a, b| a.name.cmp(&b.name));
        let agents = workspaces
            .iter()
            .filter_map(|wt| {
                wt.agent.as_ref().map(|agent| Agent {
                    worktree: wt.name.clone(),
                    path: wt.path.clone(),
                    branch: wt.branch.clone(),
                    kind: agent.kind,
                    pid: agent.pid,
                    start_time: agent.start_time,
                })
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            workspaces,
            agents,
        }
    }

    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            workspaces: Vec::new(),
            agents: Vec::new(),
        }
    }
}
