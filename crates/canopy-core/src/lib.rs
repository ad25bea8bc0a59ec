pub mod model;
pub mod naming;
pub mod wire;

pub use model::{Agent, AgentInfo, AgentKind, ServerInfo, Snapshot, Worktree};
pub use naming::{is_valid_name, sanitize, DEFAULT_NAME, DETACHED_BRANCH, DETACHED_NAME};
