use crate::model::{Agent, AgentKind, ServerInfo, Worktree};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outbound hub envelope, `{"type": ..., "payload": ...}` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HubMessage {
    WorkspacesUpdated(Vec<WorkspacePayload>),
    AgentsUpdated(Vec<AgentPayload>),
    Ping,
}

/// Inbound control messages. Subscribe carries a bare list of topic names;
/// topics are advisory metadata, broadcasts are delivered to every client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe(Vec<String>),
}

/// Workspace shape shared by the push channel and the pull API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspacePayload {
    pub name: String,
    pub path: String,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_repo: Option<String>,
    pub git_dirty: bool,
    pub has_claude: bool,
    pub has_vscode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerPayload {
    pub port: u16,
    pub status: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPayload {
    pub worktree: String,
    pub path: String,
    pub branch: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthPayload {
    pub status: String,
    pub timestamp: String,
}

impl HealthPayload {
    pub fn ok_now() -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl From<&Worktree> for WorkspacePayload {
    fn from(wt: &Worktree) -> Self {
        Self {
            name: wt.name.clone(),
            path: wt.path.display().to_string(),
            branch: wt.branch.clone(),
            main_repo: Some(wt.main_repo.display().to_string()),
            git_dirty: wt.git_dirty,
            has_claude: wt.has_claude,
            has_vscode: wt.has_vscode,
            tags: (!wt.tags.is_empty()).then(|| wt.tags.clone()),
            server: wt.server.as_ref().map(ServerPayload::from),
        }
    }
}

impl From<&ServerInfo> for ServerPayload {
    fn from(server: &ServerInfo) -> Self {
        Self {
            port: server.port,
            status: server.status.clone(),
            url: server.url.clone(),
            health: server.health.clone(),
            started_at: server.started_at,
            uptime: server
                .started_at
                .map(|started| format_duration(Utc::now() - started)),
        }
    }
}

impl From<&Agent> for AgentPayload {
    fn from(agent: &Agent) -> Self {
        Self {
            worktree: agent.worktree.clone(),
            path: agent.path.display().to_string(),
            branch: agent.branch.clone(),
            kind: agent.kind,
            pid: agent.pid,
            start_time: agent.start_time,
            duration: agent
                .start_time
                .map(|started| format_duration(Utc::now() - started)),
        }
    }
}

/// Compact human-readable duration: "42s", "5m", "3h12m", "2d4h".
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        return format!("{secs}s");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{mins}m");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{}h{}m", hours, mins % 60);
    }
    format!("{}d{}h", hours / 24, hours % 24)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentInfo;
    use std::path::PathBuf;

    #[test]
    fn ping_serializes_without_payload() {
        let encoded = serde_json::to_value(HubMessage::Ping).expect("serialize");
        assert_eq!(encoded, serde_json::json!({"type": "ping"}));
    }

    #[test]
    fn subscribe_decodes_topic_list() {
        let decoded: ClientMessage = serde_json::from_str(
            r#"{"type":"subscribe","payload":["workspaces","agents"]}"#,
        )
        .expect("decode");
        assert_eq!(
            decoded,
            ClientMessage::Subscribe(vec!["workspaces".to_string(), "agents".to_string()])
        );
    }

    #[test]
    fn unknown_inbound_type_fails_decode() {
        let result = serde_json::from_str::<ClientMessage>(r#"{"type":"publish","payload":[]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn workspace_payload_matches_wire_contract() {
        let mut wt = Worktree::new("/repos/feature-auth", "/repos/main");
        wt.name = "feature-auth".to_string();
        wt.branch = "feature/auth".to_string();
        wt.git_dirty = true;
        wt.has_claude = true;

        let value = serde_json::to_value(WorkspacePayload::from(&wt)).expect("serialize");
        assert_eq!(value["name"], "feature-auth");
        assert_eq!(value["branch"], "feature/auth");
        assert_eq!(value["main_repo"], "/repos/main");
        assert_eq!(value["git_dirty"], true);
        assert_eq!(value["has_claude"], true);
        assert_eq!(value["has_vscode"], false);
        assert!(value.get("tags").is_none());
        assert!(value.get("server").is_none());
    }

    #[test]
    fn workspaces_updated_envelope_is_tagged_by_type() {
        let mut wt = Worktree::new("/repos/main", "/repos/main");
        wt.name = "main".to_string();
        wt.branch = "main".to_string();

        let message = HubMessage::WorkspacesUpdated(vec![WorkspacePayload::from(&wt)]);
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["type"], "workspaces_updated");
        assert_eq!(value["payload"][0]["name"], "main");

        let round: HubMessage = serde_json::from_value(value).expect("decode");
        assert_eq!(round, message);
    }

    #[test]
    fn agent_payload_includes_duration_when_started() {
        let wt_path = PathBuf::from("/repos/feature-auth");
        let agent = Agent {
            worktree: "feature-auth".to_string(),
            path: wt_path.clone(),
            branch: "feature/auth".to_string(),
            kind: AgentKind::Claude,
            pid: 1234,
            start_time: Some(Utc::now() - Duration::minutes(5)),
        };
        let payload = AgentPayload::from(&agent);
        assert_eq!(payload.kind, AgentKind::Claude);
        assert_eq!(payload.duration.as_deref(), Some("5m"));

        let idle = AgentInfo {
            kind: AgentKind::Gemini,
            pid: 9,
            path: wt_path,
            start_time: None,
            command: String::new(),
        };
        assert!(idle.start_time.is_none());
    }

    #[test]
    fn duration_formatting_scales_with_magnitude() {
        assert_eq!(format_duration(Duration::seconds(42)), "42s");
        assert_eq!(format_duration(Duration::seconds(300)), "5m");
        assert_eq!(format_duration(Duration::minutes(192)), "3h12m");
        assert_eq!(format_duration(Duration::hours(52)), "2d4h");
        assert_eq!(format_duration(Duration::seconds(-5)), "0s");
    }
}
