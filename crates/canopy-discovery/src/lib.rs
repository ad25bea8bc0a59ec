//! Worktree discovery and activity detection.
//!
//! Everything here is best-effort observation of external state: git
//! subprocesses, the OS process table, and loopback sockets. Only the very
//! first step of resolving and listing a repository's worktrees is a hard
//! error; every later probe degrades its own signal to a safe default.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod activity;
pub mod detect;
pub mod discover;
pub mod ports;
pub mod registry;

pub use activity::{detect_activity, detect_agents};
pub use detect::{detect_at, WorktreeContext};
pub use discover::{discover, find_all};
pub use ports::{
    find_available_port, is_available, is_listening, listener_pid, wait_for_port,
    wait_for_port_free, PortAllocator, PortError,
};
pub use registry::{SnapshotFile, RegistryError};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to resolve {}: {source}", .path.display())]
    ResolvePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to invoke git in {}: {source}", .path.display())]
    GitSpawn {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a git repository: {}", .path.display())]
    NotARepository { path: PathBuf },
    #[error("git worktree list failed in {}: {stderr}", .path.display())]
    WorktreeList { path: PathBuf, stderr: String },
    #[error("failed to read current branch in {}: {stderr}", .path.display())]
    CurrentBranch { path: PathBuf, stderr: String },
}
