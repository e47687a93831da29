//! Launching and supervising the foreign host process.

use crate::channels::{Endpoint, SocketGroup, HANDSHAKE_TIMEOUT};
use crate::config::PluginInfo;
use crate::error::{BridgeError, Result};
use crate::rt;
use parking_lot::Mutex;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Override for locating the host binary. Without it the binary is searched
/// next to the current executable and then on `PATH`.
pub const HOST_PATH_ENV: &str = "VINEBRIDGE_HOST_PATH";

const HOST_BINARY_NAME: &str = "vinebridge-host";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Vst2,
    Vst3,
}

impl PluginKind {
    pub fn as_arg(self) -> &'static str {
        match self {
            PluginKind::Vst2 => "vst2",
            PluginKind::Vst3 => "vst3",
        }
    }
}

fn find_host_binary() -> PathBuf {
    if let Some(path) = std::env::var_os(HOST_PATH_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(current) = std::env::current_exe() {
        if let Some(dir) = current.parent() {
            let candidate = dir.join(HOST_BINARY_NAME);
            if candidate.exists() {
                return candidate;
            }
        }
    }

    // Fall back to PATH resolution by the spawn itself.
    PathBuf::from(HOST_BINARY_NAME)
}

/// The spawned host process. Environment variables controlling the foreign
/// compatibility layer are inherited unchanged.
pub struct HostProcess {
    child: Mutex<Child>,
}

impl HostProcess {
    pub fn spawn(kind: PluginKind, group: &SocketGroup, info: &PluginInfo) -> Result<Self> {
        let binary = find_host_binary();
        let mut command = Command::new(&binary);
        command
            .arg(kind.as_arg())
            .arg(group.dir())
            .arg(&info.module_path)
            .stdin(Stdio::null());
        if let Some(group_id) = &info.options.group {
            command.arg("--group").arg(group_id);
        }

        tracing::debug!(binary = %binary.display(), dir = %group.dir().display(), "spawning host process");
        let child = command.spawn().map_err(|e| BridgeError::ModuleLoad {
            path: info.module_path.clone(),
            reason: format!("could not spawn {}: {e}", binary.display()),
        })?;

        Ok(Self {
            child: Mutex::new(child),
        })
    }

    /// Whether the process has not exited yet.
    pub fn is_alive(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Reap the process after its channels were closed. Kills it if it fails
    /// to exit on its own within a grace period.
    pub fn shutdown(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut child = self.child.lock();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(%status, "host process exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                _ => {
                    tracing::warn!("host process did not exit, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
            }
        }
    }
}

/// Accept one endpoint connection while watching the host process. Unless
/// the watchdog is disabled, a host that dies before connecting fails the
/// handshake immediately instead of waiting out the full timeout.
pub fn accept_with_watchdog(
    endpoint: &Endpoint,
    deadline: Instant,
    process: Option<&HostProcess>,
) -> Result<UnixStream> {
    let watchdog = match process {
        Some(process) if !rt::watchdog_disabled() => process,
        _ => return endpoint.accept_by(deadline),
    };

    loop {
        let slice = (Instant::now() + Duration::from_millis(100)).min(deadline);
        match endpoint.accept_by(slice) {
            Ok(stream) => return Ok(stream),
            Err(BridgeError::HandshakeTimeout { .. }) => {
                if !watchdog.is_alive() {
                    return Err(BridgeError::HostDied);
                }
                if Instant::now() >= deadline {
                    return Err(BridgeError::HandshakeTimeout {
                        timeout_secs: HANDSHAKE_TIMEOUT.as_secs(),
                    });
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::connect_by;

    #[test]
    fn watchdog_accept_still_accepts_normal_connections() {
        let group = SocketGroup::create("lifecycle").unwrap();
        let path = group.socket_path("watchdog.sock");
        let endpoint = Endpoint::bind(path.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let connector = std::thread::spawn(move || connect_by(&path, deadline).unwrap());
        let stream = accept_with_watchdog(&endpoint, deadline, None).unwrap();
        drop(stream);
        connector.join().unwrap();
    }

    #[test]
    fn dead_process_fails_fast() {
        let group = SocketGroup::create("lifecycle-dead").unwrap();
        let endpoint = Endpoint::bind(group.socket_path("dead.sock")).unwrap();

        // A process that exits immediately: the accept should fail with
        // `HostDied` well before the ten second deadline.
        let child = Command::new("true").spawn().unwrap();
        let process = HostProcess {
            child: Mutex::new(child),
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        let result = accept_with_watchdog(
            &endpoint,
            Instant::now() + Duration::from_secs(10),
            Some(&process),
        );
        assert!(matches!(result, Err(BridgeError::HostDied)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
