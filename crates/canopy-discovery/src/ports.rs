use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};

/// Per-family connect attempt timeout for [`is_listening`].
const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Poll cadence for the waiters.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum PortError {
    #[error("timed out after {waited:?} waiting for port {port} to start listening")]
    ListenTimeout { port: u16, waited: Duration },
    #[error("timed out after {waited:?} waiting for port {port} to become free")]
    FreeTimeout { port: u16, waited: Duration },
    #[error("no available port in range {min}-{max}")]
    NoFreePort { min: u16, max: u16 },
}

/// True only when the port can be bound on both loopback IPv4 and IPv6.
///
/// Conservative on purpose: a port usable on one family only is reported as
/// unavailable. A successful bind is released before the other family is
/// tried.
pub async fn is_available(port: u16) -> bool {
    let v4 = match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await {
        Ok(listener) => listener,
        Err(_) => return false,
    };
    match TcpListener::bind(SocketAddr::from((Ipv6Addr::LOCALHOST, port))).await {
        Ok(v6) => {
            drop(v4);
            drop(v6);
            true
        }
        Err(_) => {
            drop(v4);
            false
        }
    }
}

/// True when something accepts a loopback connection on the port, on either
/// family. IPv4 is tried first; each attempt gets a short timeout.
pub async fn is_listening(port: u16) -> bool {
    for addr in [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
    ] {
        if let Ok(Ok(_)) = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            return true;
        }
    }
    false
}

/// Polls until the port starts listening or the timeout elapses.
pub async fn wait_for_port(port: u16, wait: Duration) -> Result<(), PortError> {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if is_listening(port).await {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
    Err(PortError::ListenTimeout { port, waited: wait })
}

/// Polls until the port becomes bindable again or the timeout elapses.
pub async fn wait_for_port_free(port: u16, wait: Duration) -> Result<(), PortError> {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if is_available(port).await {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
    Err(PortError::FreeTimeout { port, waited: wait })
}

/// Linear scan of `[min, max]`; the first available port wins.
pub async fn find_available_port(min: u16, max: u16) -> Result<u16, PortError> {
    for port in min..=max {
        if is_available(port).await {
            return Ok(port);
        }
    }
    Err(PortError::NoFreePort { min, max })
}

/// Best-effort PID of the process listening on the port, via lsof. Returns 0
/// whenever the owner cannot be determined; never an authoritative answer.
pub async fn listener_pid(port: u16) -> u32 {
    let output = Command::new("lsof")
        .args(["-i", &format!(":{port}"), "-sTCP:LISTEN", "-t"])
        .output()
        .await;
    let output = match output {
        Ok(out) if out.status.success() => out,
        _ => return 0,
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .and_then(|line| line.trim().parse().ok())
        .unwrap_or(0)
}

/// Deterministic port assignment for worktree names: the same name always
/// hashes to the same port within the configured range.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    min: u16,
    max: u16,
}

impl PortAllocator {
    pub fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.min, self.max)
    }

    /// FNV-1a hash of the name, folded into the range.
    pub fn allocate(&self, name: &str) -> u16 {
        let mut hash: u32 = 2166136261;
        for byte in name.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(16777619);
        }
        let span = u32::from(self.max - self.min) + 1;
        self.min + (hash % span) as u16
    }

    /// The hashed port when it is usable, otherwise derived alternates
    /// (`name-1`, `name-2`, ...) and finally a linear scan of the range.
    pub async fn allocate_with_fallback(
        &self,
        name: &str,
        used: &HashSet<u16>,
    ) -> Result<u16, PortError> {
        let primary = self.allocate(name);
        if !used.contains(&primary) && is_available(primary).await {
            return Ok(primary);
        }

        for attempt in 1..=100 {
            let alternate = self.allocate(&format!("{name}-{attempt}"));
            if !used.contains(&alternate) && is_available(alternate).await {
                return Ok(alternate);
            }
        }

        for port in self.min..=self.max {
            if !used.contains(&port) && is_available(port).await {
                return Ok(port);
            }
        }

        Err(PortError::NoFreePort {
            min: self.min,
            max: self.max,
        })
    }
}
