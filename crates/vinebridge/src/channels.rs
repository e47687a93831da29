//! Socket channels between the native stub and the host process.
//!
//! Each plugin instance owns a socket group: a private directory holding one
//! named Unix socket per channel. The stub binds every endpoint, spawns the
//! host process with the directory path, and accepts one connection per
//! socket. Channels are strictly typed; only one request/response pair ever
//! travels over a given socket.
//!
//! Communication is plain blocking I/O on dedicated threads. The protocol is
//! lockstep request/response, so asynchronous I/O would buy nothing here.

use crate::codec;
use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How long the host process gets to connect to every endpoint.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Socket names of the legacy-ABI group.
pub mod vst2_sockets {
    pub const DISPATCH: &str = "dispatch.sock";
    pub const CALLBACK: &str = "callback.sock";
    pub const PARAMETERS: &str = "parameters.sock";
    pub const PROCESS: &str = "process.sock";
}

/// Socket names of the modern-ABI group.
pub mod vst3_sockets {
    pub const CONTROL: &str = "control.sock";
    pub const CALLBACK: &str = "callback.sock";
    pub const AUDIO: &str = "audio.sock";
}

static GROUP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A private directory holding the sockets of one plugin instance.
pub struct SocketGroup {
    dir: PathBuf,
    owns: bool,
}

impl SocketGroup {
    /// Create a fresh group directory with 0700 permissions under the runtime
    /// directory (or the temporary directory as a fallback).
    pub fn create(name_hint: &str) -> Result<Self> {
        use std::os::unix::fs::DirBuilderExt;

        let base = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let suffix = GROUP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = base.join(format!(
            "vinebridge-{name_hint}-{}-{suffix}",
            std::process::id()
        ));

        std::fs::DirBuilder::new()
            .mode(0o700)
            .create(&dir)
            .map_err(|e| {
                BridgeError::SocketSetup(format!("could not create {}: {e}", dir.display()))
            })?;

        Ok(Self { dir, owns: true })
    }

    /// Attach to an existing group directory (host-process side).
    pub fn attach(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            owns: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Shared memory object name, derived from the group directory name so
    /// both sides agree without further negotiation.
    pub fn shm_name(&self) -> String {
        self.dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("vinebridge-{}", std::process::id()))
    }
}

impl Drop for SocketGroup {
    fn drop(&mut self) {
        if self.owns {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

/// A bound endpoint waiting for the host process to connect.
pub struct Endpoint {
    listener: UnixListener,
    path: PathBuf,
}

impl Endpoint {
    pub fn bind(path: PathBuf) -> Result<Self> {
        let listener = UnixListener::bind(&path).map_err(|e| {
            BridgeError::SocketSetup(format!("could not bind {}: {e}", path.display()))
        })?;
        Ok(Self { listener, path })
    }

    /// Accept exactly one connection before `deadline` passes.
    pub fn accept_by(&self, deadline: Instant) -> Result<UnixStream> {
        self.listener.set_nonblocking(true)?;
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(stream);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        tracing::debug!(path = %self.path.display(), "nobody connected in time");
                        return Err(BridgeError::HandshakeTimeout {
                            timeout_secs: HANDSHAKE_TIMEOUT.as_secs(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Connect to a group endpoint, retrying until `deadline` (the stub may not
/// have finished binding when the host process starts up).
pub fn connect_by(path: &Path, deadline: Instant) -> Result<UnixStream> {
    loop {
        match UnixStream::connect(path) {
            Ok(stream) => return Ok(stream),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// The requesting end of a channel. The mutex serialises whole
/// request/response exchanges so concurrent calls cannot interleave frames.
pub struct RequestChannel<Req, Resp> {
    stream: Mutex<UnixStream>,
    limit: u64,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req: Serialize, Resp: DeserializeOwned> RequestChannel<Req, Resp> {
    pub fn new(stream: UnixStream) -> Self {
        Self::with_limit(stream, codec::DEFAULT_FRAME_LIMIT)
    }

    pub fn with_limit(stream: UnixStream, limit: u64) -> Self {
        Self {
            stream: Mutex::new(stream),
            limit,
            _types: PhantomData,
        }
    }

    /// Send one request and block until its response arrives.
    pub fn send_and_receive(&self, request: &Req) -> Result<Resp> {
        let mut stream = self.stream.lock();
        codec::write_frame(&mut *stream, request, self.limit)?;
        Ok(codec::read_frame(&mut *stream, self.limit)?)
    }

    /// Send a value of an out-of-band type. Only used during the startup
    /// sequence (version exchange, configuration push) before the channel
    /// settles into its steady request/response typing.
    pub fn send_raw<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut stream = self.stream.lock();
        codec::write_frame(&mut *stream, value, self.limit)?;
        Ok(())
    }

    /// Receive a value of an out-of-band type; see [`Self::send_raw`].
    pub fn receive_raw<T: DeserializeOwned>(&self) -> Result<T> {
        let mut stream = self.stream.lock();
        Ok(codec::read_frame(&mut *stream, self.limit)?)
    }

    /// Close the underlying socket. The peer's receive loop sees end of
    /// stream; further calls on this channel fail immediately.
    pub fn shutdown(&self) {
        let _ = self.stream.lock().shutdown(std::net::Shutdown::Both);
    }
}

/// The serving end of a channel, owned exclusively by its receiver thread.
pub struct EventChannel<Req, Resp> {
    stream: UnixStream,
    limit: u64,
    _types: PhantomData<fn(Resp) -> Req>,
}

impl<Req: DeserializeOwned, Resp: Serialize> EventChannel<Req, Resp> {
    pub fn new(stream: UnixStream) -> Self {
        Self::with_limit(stream, codec::DEFAULT_FRAME_LIMIT)
    }

    pub fn with_limit(stream: UnixStream, limit: u64) -> Self {
        Self {
            stream,
            limit,
            _types: PhantomData,
        }
    }

    /// Block until the next request arrives.
    pub fn receive(&mut self) -> Result<Req> {
        Ok(codec::read_frame(&mut self.stream, self.limit)?)
    }

    /// Send the response for the request received last.
    pub fn reply(&mut self, response: &Resp) -> Result<()> {
        codec::write_frame(&mut self.stream, response, self.limit)?;
        Ok(())
    }

    /// See [`RequestChannel::send_raw`].
    pub fn send_raw<T: Serialize>(&mut self, value: &T) -> Result<()> {
        codec::write_frame(&mut self.stream, value, self.limit)?;
        Ok(())
    }

    /// See [`RequestChannel::receive_raw`].
    pub fn receive_raw<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(codec::read_frame(&mut self.stream, self.limit)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::vst2::{ParameterRequest, ParameterResponse};

    #[test]
    fn request_response_roundtrip() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel: RequestChannel<ParameterRequest, ParameterResponse> =
            RequestChannel::new(client);
        let mut serving: EventChannel<ParameterRequest, ParameterResponse> =
            EventChannel::new(server);

        let server_thread = std::thread::spawn(move || {
            let request = serving.receive().unwrap();
            assert_eq!(request.index, 7);
            serving
                .reply(&ParameterResponse { value: Some(0.25) })
                .unwrap();
        });

        let response = channel
            .send_and_receive(&ParameterRequest {
                index: 7,
                value: None,
            })
            .unwrap();
        assert_eq!(response.value, Some(0.25));
        server_thread.join().unwrap();
    }

    #[test]
    fn responses_come_back_in_request_order() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel: RequestChannel<ParameterRequest, ParameterResponse> =
            RequestChannel::new(client);
        let mut serving: EventChannel<ParameterRequest, ParameterResponse> =
            EventChannel::new(server);

        let server_thread = std::thread::spawn(move || {
            for _ in 0..16 {
                let request = serving.receive().unwrap();
                serving
                    .reply(&ParameterResponse {
                        value: Some(request.index as f32),
                    })
                    .unwrap();
            }
        });

        for index in 0..16 {
            let response = channel
                .send_and_receive(&ParameterRequest { index, value: None })
                .unwrap();
            assert_eq!(response.value, Some(index as f32));
        }
        server_thread.join().unwrap();
    }

    #[test]
    fn group_directory_is_private_and_cleaned_up() {
        use std::os::unix::fs::PermissionsExt;

        let group = SocketGroup::create("unit").unwrap();
        let dir = group.dir().to_path_buf();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        assert!(group.shm_name().starts_with("vinebridge-unit-"));

        drop(group);
        assert!(!dir.exists());
    }

    #[test]
    fn bind_accept_connect_handshake() {
        let group = SocketGroup::create("handshake").unwrap();
        let path = group.socket_path(vst2_sockets::DISPATCH);
        let endpoint = Endpoint::bind(path.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let connector = std::thread::spawn(move || connect_by(&path, deadline).unwrap());

        let accepted = endpoint.accept_by(deadline).unwrap();
        let connected = connector.join().unwrap();

        // Version exchange over the freshly paired channel.
        use crate::protocol::VersionInfo;
        let stub: RequestChannel<VersionInfo, VersionInfo> = RequestChannel::new(accepted);
        let mut host: EventChannel<VersionInfo, VersionInfo> = EventChannel::new(connected);

        stub.send_raw(&VersionInfo::current()).unwrap();
        let seen: VersionInfo = host.receive_raw().unwrap();
        assert_eq!(seen, VersionInfo::current());
    }

    #[test]
    fn accept_times_out_without_peer() {
        let group = SocketGroup::create("timeout").unwrap();
        let endpoint = Endpoint::bind(group.socket_path("lonely.sock")).unwrap();
        let result = endpoint.accept_by(Instant::now() + Duration::from_millis(50));
        assert!(matches!(result, Err(BridgeError::HandshakeTimeout { .. })));
    }
}
