//! The native-stub side of the modern-ABI bridge: channel ownership,
//! instance creation, and plugin→host callback routing.

use super::{ProxyRegistry, Vst3PluginProxy};
use crate::channels::{
    vst3_sockets, Endpoint, EventChannel, RequestChannel, SocketGroup, HANDSHAKE_TIMEOUT,
};
use crate::config::{BridgeOptions, PluginInfo};
use crate::dispatch::{spawn_receive_loop, MainThreadQueue, ReceiveLoop};
use crate::error::Result;
use crate::lifecycle::{accept_with_watchdog, HostProcess, PluginKind};
use crate::protocol::vst3::{
    result, CallbackRequest, CallbackResponse, Capabilities, ClassId, ControlRequest,
    ControlResponse, ProcessorRequest, ProcessorResponse, TResult,
};
use crate::protocol::VersionInfo;
use crate::rt;
use parking_lot::Mutex;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Instant;

pub struct Vst3PluginBridge {
    control: RequestChannel<ControlRequest, ControlResponse>,
    audio: RequestChannel<ProcessorRequest, ProcessorResponse>,

    callback_shutdown: UnixStream,
    callback_loop: Mutex<Option<ReceiveLoop>>,

    registry: Arc<ProxyRegistry>,
    main_queue: MainThreadQueue,
    options: BridgeOptions,

    host_process: Option<HostProcess>,
    _group: Option<SocketGroup>,
}

impl Vst3PluginBridge {
    /// Set up the socket group, spawn the host process, and finish the
    /// startup handshake.
    pub fn new(info: PluginInfo) -> Result<Arc<Self>> {
        let stem = info
            .module_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());
        let group = SocketGroup::create(&stem)?;

        let control = Endpoint::bind(group.socket_path(vst3_sockets::CONTROL))?;
        let callback = Endpoint::bind(group.socket_path(vst3_sockets::CALLBACK))?;
        let audio = Endpoint::bind(group.socket_path(vst3_sockets::AUDIO))?;

        rt::warn_on_low_resource_limits();
        let host_process = HostProcess::spawn(PluginKind::Vst3, &group, &info)?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let control = accept_with_watchdog(&control, deadline, Some(&host_process))?;
        let callback = accept_with_watchdog(&callback, deadline, Some(&host_process))?;
        let audio = accept_with_watchdog(&audio, deadline, Some(&host_process))?;

        Self::connect(info.options, control, callback, audio, Some(host_process), Some(group))
    }

    fn connect(
        options: BridgeOptions,
        control: UnixStream,
        callback: UnixStream,
        audio: UnixStream,
        host_process: Option<HostProcess>,
        group: Option<SocketGroup>,
    ) -> Result<Arc<Self>> {
        let callback_shutdown = callback.try_clone()?;

        let bridge = Arc::new(Self {
            control: RequestChannel::new(control),
            audio: RequestChannel::new(audio),
            callback_shutdown,
            callback_loop: Mutex::new(None),
            registry: Arc::new(ProxyRegistry::new()),
            main_queue: MainThreadQueue::new(),
            options,
            host_process,
            _group: group,
        });

        bridge.control.send_raw(&VersionInfo::current())?;
        let host_version: VersionInfo = bridge.control.receive_raw()?;
        if host_version != VersionInfo::current() {
            tracing::warn!(
                stub = %VersionInfo::current().version,
                host = %host_version.version,
                "version mismatch between stub and host process"
            );
        }

        let receive_loop = {
            let registry = Arc::clone(&bridge.registry);
            let main_queue = bridge.main_queue.clone();
            spawn_receive_loop(
                "vst3-host-callbacks",
                EventChannel::new(bridge.callback_shutdown.try_clone()?),
                true,
                move |request: CallbackRequest, _on_main_thread| {
                    handle_callback(&registry, &main_queue, request)
                },
            )?
        };
        *bridge.callback_loop.lock() = Some(receive_loop);

        Ok(bridge)
    }

    /// Ask the plugin side to instantiate the class and wrap it in a proxy.
    /// The capability set comes from interface probes against the real
    /// object.
    pub fn create_instance(
        self: &Arc<Self>,
        cid: ClassId,
    ) -> Result<Option<Arc<Vst3PluginProxy>>> {
        match self.send(ControlRequest::CreateInstance { cid })? {
            ControlResponse::Created {
                instance_id,
                capabilities,
            } => Ok(Some(Vst3PluginProxy::new(
                Arc::clone(self),
                instance_id,
                capabilities,
            ))),
            ControlResponse::CreateFailed => Ok(None),
            other => {
                tracing::warn!(?other, "mis-shaped create response");
                Ok(None)
            }
        }
    }

    pub(super) fn send(&self, request: ControlRequest) -> Result<ControlResponse> {
        self.control.send_and_receive(&request)
    }

    pub(super) fn send_audio(&self, request: ProcessorRequest) -> Result<ProcessorResponse> {
        self.audio.send_and_receive(&request)
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Run callbacks that were thunked off the socket thread. The ABI shim
    /// calls this from its GUI-thread timer.
    pub fn drain_main_thread_queue(&self) {
        self.main_queue.drain();
    }

    pub fn capabilities_of(&self, instance_id: u64) -> Option<Capabilities> {
        Some(self.registry.get(instance_id)?.capabilities())
    }
}

impl Drop for Vst3PluginBridge {
    fn drop(&mut self) {
        let _ = self
            .callback_shutdown
            .shutdown(std::net::Shutdown::Both);
        if let Some(receive_loop) = self.callback_loop.lock().take() {
            receive_loop.join();
        }

        self.control.shutdown();
        self.audio.shutdown();
        if let Some(process) = &self.host_process {
            process.shutdown();
        }
    }
}

/// Route one plugin→host callback to the host object registered for the
/// originating instance.
fn handle_callback(
    registry: &ProxyRegistry,
    main_queue: &MainThreadQueue,
    request: CallbackRequest,
) -> CallbackResponse {
    let instance_id = match &request {
        CallbackRequest::BeginEdit { instance_id, .. }
        | CallbackRequest::PerformEdit { instance_id, .. }
        | CallbackRequest::EndEdit { instance_id, .. }
        | CallbackRequest::RestartComponent { instance_id, .. }
        | CallbackRequest::Notify { instance_id, .. }
        | CallbackRequest::ResizeView { instance_id, .. } => *instance_id,
    };

    let Some(proxy) = registry.get(instance_id) else {
        tracing::warn!(instance_id, "callback for unknown instance");
        return CallbackResponse::Result(result::INVALID_ARGUMENT);
    };

    let code = match request {
        CallbackRequest::BeginEdit { param_id, .. } => {
            match proxy.component_handler.lock().clone() {
                Some(handler) => handler.begin_edit(param_id),
                None => missing_handler(instance_id),
            }
        }
        CallbackRequest::PerformEdit {
            param_id,
            value_normalized,
            ..
        } => match proxy.component_handler.lock().clone() {
            Some(handler) => handler.perform_edit(param_id, value_normalized),
            None => missing_handler(instance_id),
        },
        CallbackRequest::EndEdit { param_id, .. } => {
            match proxy.component_handler.lock().clone() {
                Some(handler) => handler.end_edit(param_id),
                None => missing_handler(instance_id),
            }
        }
        // Several hosts only tolerate component restarts from the GUI
        // thread, so the call is thunked onto the idle-drained queue and
        // acknowledged right away.
        CallbackRequest::RestartComponent { flags, .. } => {
            match proxy.component_handler.lock().clone() {
                Some(handler) => {
                    main_queue.push(move || {
                        handler.restart_component(flags);
                    });
                    result::OK
                }
                None => missing_handler(instance_id),
            }
        }
        CallbackRequest::Notify { message, .. } => match proxy.host_connection.lock().clone() {
            Some(connection) => connection.notify(&message),
            None => {
                tracing::warn!(instance_id, "notify callback without a host connection");
                result::INTERNAL_ERROR
            }
        },
        CallbackRequest::ResizeView { new_size, .. } => {
            let view = proxy.last_created_view.lock().upgrade();
            match view.and_then(|view| view.frame.lock().clone()) {
                Some(frame) => frame.resize_view(new_size),
                None => {
                    tracing::warn!(instance_id, "resize callback without a view frame");
                    result::INTERNAL_ERROR
                }
            }
        }
    };

    CallbackResponse::Result(code)
}

fn missing_handler(instance_id: u64) -> TResult {
    tracing::warn!(instance_id, "callback before setComponentHandler()");
    result::INTERNAL_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::vst3::{ConnectTarget, ProcessData, ProcessOutput, ProcessSetup};
    use crate::protocol::AudioShmConfig;
    use crate::shm::AudioShmBuffer;
    use crate::vst3::{ComponentHandler, ConnectPeer, HostContext};

    /// In-process stand-in for the plugin-side host process.
    struct FakePluginHost {
        control_log: Arc<Mutex<Vec<ControlRequest>>>,
        callback: RequestChannel<CallbackRequest, CallbackResponse>,
        shutdown_handles: Vec<UnixStream>,
        threads: Vec<std::thread::JoinHandle<()>>,
    }

    impl FakePluginHost {
        fn start(shm_suffix: &str) -> (FakePluginHost, Arc<Vst3PluginBridge>) {
            let (control_stub, control_host) = UnixStream::pair().unwrap();
            let (callback_stub, callback_host) = UnixStream::pair().unwrap();
            let (audio_stub, audio_host) = UnixStream::pair().unwrap();

            let control_log = Arc::new(Mutex::new(Vec::new()));
            let shutdown_handles = vec![
                control_host.try_clone().unwrap(),
                audio_host.try_clone().unwrap(),
            ];
            let mut threads = Vec::new();

            {
                let log = Arc::clone(&control_log);
                let mut channel: EventChannel<ControlRequest, ControlResponse> =
                    EventChannel::new(control_host);
                threads.push(std::thread::spawn(move || {
                    let _stub_version: VersionInfo = channel.receive_raw().unwrap();
                    channel.send_raw(&VersionInfo::current()).unwrap();

                    let mut next_instance_id = 1u64;
                    while let Ok(request) = channel.receive() {
                        log.lock().push(request.clone());
                        let response = match request {
                            ControlRequest::CreateInstance { .. } => {
                                let instance_id = next_instance_id;
                                next_instance_id += 1;
                                ControlResponse::Created {
                                    instance_id,
                                    capabilities: Capabilities {
                                        audio_processor: true,
                                        edit_controller: true,
                                        connection_point: true,
                                        ..Capabilities::default()
                                    },
                                }
                            }
                            ControlRequest::GetState { .. } => ControlResponse::State {
                                result: result::OK,
                                data: vec![1, 2, 3],
                            },
                            ControlRequest::GetParameterCount { .. } => {
                                ControlResponse::Count(4)
                            }
                            _ => ControlResponse::Result(result::OK),
                        };
                        if channel.reply(&response).is_err() {
                            break;
                        }
                    }
                }));
            }

            {
                let shm_config = AudioShmConfig {
                    name: format!(
                        "vinebridge-test-{}-vst3-{shm_suffix}",
                        std::process::id()
                    ),
                    input_channels: vec![2],
                    output_channels: vec![2],
                    element_size: 4,
                    block_size: 256,
                };
                let mut channel: EventChannel<ProcessorRequest, ProcessorResponse> =
                    EventChannel::new(audio_host);
                threads.push(std::thread::spawn(move || {
                    let mut buffer: Option<AudioShmBuffer> = None;
                    while let Ok(request) = channel.receive() {
                        let response = match request {
                            ProcessorRequest::SetupProcessing { .. } => {
                                buffer =
                                    Some(AudioShmBuffer::create(shm_config.clone()).unwrap());
                                ProcessorResponse::SetupDone {
                                    result: result::OK,
                                    shm_config: shm_config.clone(),
                                }
                            }
                            ProcessorRequest::Process { data, .. } => {
                                if let Some(buffer) = &buffer {
                                    let frames = data.num_samples as usize;
                                    let mut scratch = vec![0.0f32; frames];
                                    for channel_index in 0..2 {
                                        buffer
                                            .read_input_into(0, channel_index, &mut scratch)
                                            .unwrap();
                                        buffer
                                            .write_output(0, channel_index, &scratch)
                                            .unwrap();
                                    }
                                }
                                ProcessorResponse::Processed(ProcessOutput {
                                    result: result::OK,
                                    silence_flags: vec![0],
                                    ..ProcessOutput::default()
                                })
                            }
                            _ => ProcessorResponse::Result(result::OK),
                        };
                        if channel.reply(&response).is_err() {
                            break;
                        }
                    }
                }));
            }

            let bridge = Vst3PluginBridge::connect(
                BridgeOptions::default(),
                control_stub,
                callback_stub,
                audio_stub,
                None,
                None,
            )
            .unwrap();

            (
                FakePluginHost {
                    control_log,
                    callback: RequestChannel::new(callback_host),
                    shutdown_handles,
                    threads,
                },
                bridge,
            )
        }

        fn requests_of<F: Fn(&ControlRequest) -> bool>(&self, filter: F) -> Vec<ControlRequest> {
            self.control_log
                .lock()
                .iter()
                .filter(|request| filter(request))
                .cloned()
                .collect()
        }
    }

    impl Drop for FakePluginHost {
        fn drop(&mut self) {
            for handle in &self.shutdown_handles {
                let _ = handle.shutdown(std::net::Shutdown::Both);
            }
            for thread in self.threads.drain(..) {
                let _ = thread.join();
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    impl ComponentHandler for RecordingHandler {
        fn begin_edit(&self, param_id: u32) -> TResult {
            self.calls.lock().push(format!("begin {param_id}"));
            result::OK
        }
        fn perform_edit(&self, param_id: u32, value_normalized: f64) -> TResult {
            self.calls
                .lock()
                .push(format!("perform {param_id} {value_normalized}"));
            result::OK
        }
        fn end_edit(&self, param_id: u32) -> TResult {
            self.calls.lock().push(format!("end {param_id}"));
            result::OK
        }
        fn restart_component(&self, flags: i32) -> TResult {
            self.calls.lock().push(format!("restart {flags}"));
            result::OK
        }
    }

    struct TestContext;
    impl HostContext for TestContext {
        fn name(&self) -> String {
            "Test DAW".to_string()
        }
    }

    #[test]
    fn connecting_two_proxies_uses_their_ids_directly() {
        let (host, bridge) = FakePluginHost::start("connect");
        let a = bridge.create_instance([1; 16]).unwrap().unwrap();
        let b = bridge.create_instance([2; 16]).unwrap().unwrap();

        assert_eq!(a.connect(&ConnectPeer::Proxy(Arc::clone(&b))), result::OK);

        let connects = host.requests_of(|r| matches!(r, ControlRequest::Connect { .. }));
        assert_eq!(
            connects,
            vec![ControlRequest::Connect {
                instance_id: 1,
                other: ConnectTarget::Proxy(2),
            }]
        );
        // No mirror proxy was allocated on the stub side.
        assert!(a.host_connection.lock().is_none());
        assert!(b.host_connection.lock().is_none());
    }

    #[test]
    fn registrations_balance_deregistrations() {
        let (host, bridge) = FakePluginHost::start("registry");
        let a = bridge.create_instance([1; 16]).unwrap().unwrap();
        let b = bridge.create_instance([2; 16]).unwrap().unwrap();
        assert_eq!(bridge.registry().live_count(), 2);

        let _ = a.parameter_count();
        drop(a);
        drop(b);

        assert_eq!(bridge.registry().live_count(), 0);
        assert_eq!(bridge.registry().counts(), (2, 2));
        let destructs = host.requests_of(|r| matches!(r, ControlRequest::Destruct { .. }));
        assert_eq!(destructs.len(), 2);
    }

    #[test]
    fn state_streams_read_back_the_plugin_bytes() {
        let (host, bridge) = FakePluginHost::start("state");
        let proxy = bridge.create_instance([3; 16]).unwrap().unwrap();

        let mut stream = Vec::new();
        assert_eq!(proxy.get_state(&mut stream), result::OK);
        assert_eq!(stream, vec![1, 2, 3]);

        let mut cursor = std::io::Cursor::new(stream);
        assert_eq!(proxy.set_state(&mut cursor), result::OK);
        let sets = host.requests_of(|r| matches!(r, ControlRequest::SetState { .. }));
        assert_eq!(
            sets,
            vec![ControlRequest::SetState {
                instance_id: 1,
                data: vec![1, 2, 3],
            }]
        );
    }

    #[test]
    fn parameter_edit_callbacks_reach_the_component_handler() {
        let (host, bridge) = FakePluginHost::start("edits");
        let proxy = bridge.create_instance([4; 16]).unwrap().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        proxy.set_component_handler(handler.clone() as Arc<dyn ComponentHandler>);

        let response = host
            .callback
            .send_and_receive(&CallbackRequest::PerformEdit {
                instance_id: 1,
                param_id: 7,
                value_normalized: 0.5,
            })
            .unwrap();
        assert_eq!(response, CallbackResponse::Result(result::OK));
        assert_eq!(handler.calls.lock().as_slice(), &["perform 7 0.5".to_string()]);
    }

    #[test]
    fn restart_component_is_deferred_to_the_idle_queue() {
        let (host, bridge) = FakePluginHost::start("restart");
        let proxy = bridge.create_instance([5; 16]).unwrap().unwrap();
        let handler = Arc::new(RecordingHandler::default());
        proxy.set_component_handler(handler.clone() as Arc<dyn ComponentHandler>);

        let response = host
            .callback
            .send_and_receive(&CallbackRequest::RestartComponent {
                instance_id: 1,
                flags: 2,
            })
            .unwrap();
        assert_eq!(response, CallbackResponse::Result(result::OK));
        assert!(handler.calls.lock().is_empty());

        bridge.drain_main_thread_queue();
        assert_eq!(handler.calls.lock().as_slice(), &["restart 2".to_string()]);
    }

    #[test]
    fn processing_roundtrips_audio_through_shared_memory() {
        let (_host, bridge) = FakePluginHost::start("audio");
        let proxy = bridge.create_instance([6; 16]).unwrap().unwrap();
        let _ = proxy.initialize(Arc::new(TestContext));

        assert_eq!(
            proxy.setup_processing(ProcessSetup {
                process_mode: 0,
                double_precision: false,
                max_samples_per_block: 256,
                sample_rate: 48_000.0,
            }),
            result::OK
        );
        assert_eq!(proxy.set_active(true), result::OK);

        let left = [0.25f32; 256];
        let right = [-0.25f32; 256];
        let mut left_out = [0.0f32; 256];
        let mut right_out = [0.0f32; 256];

        let output = proxy.process(
            ProcessData {
                num_samples: 256,
                ..ProcessData::default()
            },
            &[&left, &right],
            &mut [&mut left_out, &mut right_out],
        );

        assert_eq!(output.result, result::OK);
        assert_eq!(output.silence_flags, vec![0]);
        assert_eq!(left_out, left);
        assert_eq!(right_out, right);
    }

    #[test]
    fn foreign_messages_are_dropped_without_a_wire_roundtrip() {
        let (host, bridge) = FakePluginHost::start("notify");
        let proxy = bridge.create_instance([7; 16]).unwrap().unwrap();

        assert_eq!(proxy.notify(None), result::NOT_IMPLEMENTED);
        assert!(host
            .requests_of(|r| matches!(r, ControlRequest::Notify { .. }))
            .is_empty());
    }
}
