//! The native-stub side of the legacy-ABI bridge.
//!
//! Owns the host-visible effect struct, translates every dispatcher call
//! into a typed event on the dispatch channel, runs the callback-receive
//! thread for plugin→host events, and drives the shared-memory audio
//! round-trip.

use super::abi::{self, host_opcodes, opcodes, AEffect, HostCallbackProc, VstRect};
use super::payload::{self, DispatchWriteback};
use crate::channels::{
    vst2_sockets, Endpoint, EventChannel, RequestChannel, SocketGroup, HANDSHAKE_TIMEOUT,
};
use crate::config::{BridgeOptions, PluginInfo, PRODUCT_NAME_OVERRIDE, VENDOR_NAME_OVERRIDE};
use crate::dispatch::{spawn_receive_loop, ReceiveLoop};
use crate::error::Result;
use crate::lifecycle::{accept_with_watchdog, HostProcess, PluginKind};
use crate::protocol::vst2::{
    Event, EventPayload, EventResult, MidiEventBundle, ParameterRequest, ParameterResponse,
};
use crate::protocol::{Ack, AudioRequest, VersionInfo};
use crate::rt;
use crate::shm::AudioShmBuffer;
use parking_lot::Mutex;
use std::ffi::{c_char, c_void};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Instant;

/// Shared state the callback-receive thread buffers for later, host-driven
/// entry points.
#[derive(Default)]
struct PendingCallbacks {
    /// MIDI events from the plugin must reach the host right after the
    /// audio call returns, or the host discards them.
    midi_events: Mutex<Vec<MidiEventBundle>>,
    /// The last window-resize request, replayed on the next `EditIdle`
    /// because some hosts only accept it on the GUI thread.
    resize: Mutex<Option<(i32, i32)>>,
}

pub struct Vst2PluginBridge {
    effect: std::cell::UnsafeCell<AEffect>,
    host_callback: HostCallbackProc,
    options: BridgeOptions,

    dispatch: RequestChannel<Event, EventResult>,
    parameters: RequestChannel<ParameterRequest, ParameterResponse>,
    process_channel: RequestChannel<AudioRequest, Ack>,

    /// Clone of the callback stream, used to unblock the receive loop on
    /// teardown.
    callback_shutdown: UnixStream,
    callback_loop: Mutex<Option<ReceiveLoop>>,

    process_buffers: Mutex<Option<AudioShmBuffer>>,
    /// Backs the raw pointer handed to the host for `GetChunk`; lives until
    /// the next dispatch-channel call.
    chunk_data: Mutex<Vec<u8>>,
    editor_rect: Mutex<VstRect>,
    pending: Arc<PendingCallbacks>,
    last_priority_sync: Mutex<Instant>,

    host_process: Option<HostProcess>,
    _group: Option<SocketGroup>,
}

// SAFETY: every piece of shared state is behind a mutex, and the effect
// struct itself is only mutated while servicing the host's own dispatcher
// calls, which the ABI requires the host to serialise.
unsafe impl Send for Vst2PluginBridge {}
unsafe impl Sync for Vst2PluginBridge {}

struct EffectPtr(*mut AEffect);
// SAFETY: the bridge (and with it the boxed effect struct) outlives the
// callback thread, which is joined before the bridge is freed.
unsafe impl Send for EffectPtr {}

impl Vst2PluginBridge {
    /// Set up the socket group, spawn the host process, and finish the
    /// startup handshake.
    pub fn new(info: PluginInfo, host_callback: HostCallbackProc) -> Result<Box<Self>> {
        let stem = info
            .module_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".to_string());
        let group = SocketGroup::create(&stem)?;

        let dispatch = Endpoint::bind(group.socket_path(vst2_sockets::DISPATCH))?;
        let callback = Endpoint::bind(group.socket_path(vst2_sockets::CALLBACK))?;
        let parameters = Endpoint::bind(group.socket_path(vst2_sockets::PARAMETERS))?;
        let process = Endpoint::bind(group.socket_path(vst2_sockets::PROCESS))?;

        rt::warn_on_low_resource_limits();
        let host_process = HostProcess::spawn(PluginKind::Vst2, &group, &info)?;

        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let dispatch = accept_with_watchdog(&dispatch, deadline, Some(&host_process))?;
        let callback = accept_with_watchdog(&callback, deadline, Some(&host_process))?;
        let parameters = accept_with_watchdog(&parameters, deadline, Some(&host_process))?;
        let process = accept_with_watchdog(&process, deadline, Some(&host_process))?;

        Self::connect(
            info.options,
            host_callback,
            dispatch,
            callback,
            parameters,
            process,
            Some(host_process),
            Some(group),
        )
    }

    /// Finish construction over already-paired streams. Split out from
    /// [`Self::new`] so tests can drive the bridge against an in-process
    /// counterpart.
    #[allow(clippy::too_many_arguments)]
    fn connect(
        options: BridgeOptions,
        host_callback: HostCallbackProc,
        dispatch: UnixStream,
        callback: UnixStream,
        parameters: UnixStream,
        process: UnixStream,
        host_process: Option<HostProcess>,
        group: Option<SocketGroup>,
    ) -> Result<Box<Self>> {
        let callback_shutdown = callback.try_clone()?;

        let bridge = Box::new(Self {
            effect: std::cell::UnsafeCell::new(AEffect::zeroed()),
            host_callback,
            options,
            dispatch: RequestChannel::new(dispatch),
            parameters: RequestChannel::new(parameters),
            process_channel: RequestChannel::new(process),
            callback_shutdown,
            callback_loop: Mutex::new(None),
            process_buffers: Mutex::new(None),
            chunk_data: Mutex::new(Vec::new()),
            editor_rect: Mutex::new(VstRect::default()),
            pending: Arc::new(PendingCallbacks::default()),
            last_priority_sync: Mutex::new(Instant::now()),
            host_process,
            _group: group,
        });

        // Wire up the host-visible struct. The thunks find the bridge again
        // through the reserved slot, so no process-global state is needed and
        // multiple instances can coexist. The magic stays zero until the
        // plugin's initial snapshot arrives; dispatches before that are
        // dropped.
        {
            let effect = bridge.effect.get();
            unsafe {
                (*effect).dispatcher = Some(dispatch_thunk);
                (*effect).process = Some(process_thunk);
                (*effect).set_parameter = Some(set_parameter_thunk);
                (*effect).get_parameter = Some(get_parameter_thunk);
                (*effect).process_replacing = Some(process_replacing_thunk);
                (*effect).process_double_replacing = Some(process_double_replacing_thunk);
                (*effect).reserved1 = &*bridge as *const Self as isize;
            }
        }

        // Plugin→host callbacks start flowing while the plugin is still
        // loading, so the receive loop has to run before the initial effect
        // snapshot can arrive.
        let receive_loop = {
            let effect = EffectPtr(bridge.effect.get());
            let host_callback = bridge.host_callback;
            let pending = Arc::clone(&bridge.pending);
            let hide_daw = bridge.options.hide_daw;

            spawn_receive_loop(
                "vst2-host-callbacks",
                EventChannel::new(bridge.callback_shutdown.try_clone()?),
                true,
                move |event: Event, _on_main_thread| {
                    handle_host_callback(&effect, host_callback, &pending, hide_daw, event)
                },
            )?
        };
        *bridge.callback_loop.lock() = Some(receive_loop);

        bridge.dispatch.send_raw(&VersionInfo::current())?;
        let host_version: VersionInfo = bridge.dispatch.receive_raw()?;
        if host_version != VersionInfo::current() {
            tracing::warn!(
                stub = %VersionInfo::current().version,
                host = %host_version.version,
                "version mismatch between stub and host process"
            );
        }

        // The plugin's initial effect snapshot, followed by our
        // configuration to complete the startup.
        let fields: crate::protocol::vst2::EffectFields = bridge.dispatch.receive_raw()?;
        unsafe { fields.apply_to(&mut *bridge.effect.get()) };
        bridge.dispatch.send_raw(&bridge.options)?;

        Ok(bridge)
    }

    /// The struct handed to the DAW. Valid for the bridge's lifetime.
    pub fn effect_ptr(&self) -> *mut AEffect {
        self.effect.get()
    }

    /// Dispatcher entry point.
    ///
    /// # Safety
    /// `data` and `value` must satisfy `opcode`'s ABI contract.
    pub unsafe fn dispatch(
        &self,
        opcode: i32,
        index: i32,
        value: isize,
        data: *mut c_void,
        option: f32,
    ) -> isize {
        // Some hosts dispatch before the effect struct has finished
        // initialising; such events cannot be forwarded yet.
        if (*self.effect.get()).magic == 0 {
            tracing::warn!(opcode, "dropping event dispatched before initialisation");
            return 0;
        }

        match opcode {
            // Not forwarded: the host process drives the plugin's idle from
            // a timer. This entry point only replays a buffered resize
            // request, which some hosts require on the GUI thread.
            opcodes::EDIT_IDLE => {
                if let Some((width, height)) = self.pending.resize.lock().take() {
                    (self.host_callback)(
                        self.effect.get(),
                        host_opcodes::SIZE_WINDOW,
                        width,
                        height as isize,
                        std::ptr::null_mut(),
                        0.0,
                    );
                }
                return 0;
            }
            // The libSwell GUI embedding this enables cannot work with a
            // foreign windowing stack, so decline it locally.
            opcodes::CAN_DO if !data.is_null() => {
                let query = abi::read_c_string_ptr(data as *const c_char);
                if query == "hasCockosViewAsConfig" {
                    tracing::debug!("declining libSwell GUI support");
                    return -1;
                }
            }
            // Forwarded with tolerance for the far side already being gone;
            // actual teardown happens when the host frees the bridge.
            opcodes::CLOSE => {
                let event = payload::read_dispatch_event(opcode, index, value, data, option);
                return match self.dispatch.send_and_receive(&event) {
                    Ok(result) => result.return_value as isize,
                    Err(e) => {
                        tracing::debug!(error = %e, "plugin was already gone during close");
                        0
                    }
                };
            }
            _ => {}
        }

        let event = payload::read_dispatch_event(opcode, index, value, data, option);
        let result = match self.dispatch.send_and_receive(&event) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(opcode, error = %e, "dispatch failed");
                return 0;
            }
        };

        // Audio buffer (re)configuration rides back on `MainsChanged`.
        if let EventPayload::AudioShmConfig(config) = &result.payload {
            match AudioShmBuffer::open(config.clone()) {
                Ok(buffer) => *self.process_buffers.lock() = Some(buffer),
                Err(e) => tracing::error!(error = %e, "could not map the shared audio buffer"),
            }
            return result.return_value as isize;
        }

        let mut chunk = self.chunk_data.lock();
        let mut rect = self.editor_rect.lock();
        payload::write_dispatch_result(
            &result,
            opcode,
            value,
            data,
            self.effect.get(),
            &mut DispatchWriteback {
                chunk: &mut chunk,
                rect: &mut rect,
            },
        )
    }

    pub fn get_parameter(&self, index: i32) -> f32 {
        // The parameters channel is shared by both directions of parameter
        // access; the request channel's lock keeps the pairs from
        // interleaving on the wire.
        match self
            .parameters
            .send_and_receive(&ParameterRequest { index, value: None })
        {
            Ok(response) => response.value.unwrap_or_default(),
            Err(e) => {
                tracing::error!(index, error = %e, "getParameter failed");
                0.0
            }
        }
    }

    pub fn set_parameter(&self, index: i32, value: f32) {
        match self.parameters.send_and_receive(&ParameterRequest {
            index,
            value: Some(value),
        }) {
            Ok(response) => debug_assert!(response.value.is_none()),
            Err(e) => tracing::error!(index, error = %e, "setParameter failed"),
        }
    }

    /// One audio block. Copies inputs into the shared buffer, performs the
    /// request/ack round-trip, copies outputs back, then flushes buffered
    /// plugin MIDI while the host still accepts it.
    ///
    /// # Safety
    /// `inputs`/`outputs` must be channel-pointer arrays sized per the
    /// effect struct's pin counts, each channel holding `sample_frames`
    /// samples.
    pub unsafe fn do_process<T: Copy + Default, const REPLACING: bool>(
        &self,
        inputs: *mut *mut T,
        outputs: *mut *mut T,
        sample_frames: i32,
    ) {
        let request = self.build_audio_request::<T>(sample_frames);

        let buffers = self.process_buffers.lock();
        let Some(buffers) = buffers.as_ref() else {
            tracing::error!("audio before MainsChanged(enable), dropping block");
            return;
        };

        let effect = &*self.effect.get();
        let frames = sample_frames.max(0) as usize;
        for channel in 0..effect.num_inputs.max(0) as usize {
            let input = std::slice::from_raw_parts(*inputs.add(channel), frames);
            if let Err(e) = buffers.write_input(0, channel, input) {
                tracing::error!(channel, error = %e, "input copy failed");
                return;
            }
        }

        // The round-trip linearises buffer access; no further
        // synchronisation is involved.
        if let Err(e) = self.process_channel.send_and_receive(&request) {
            tracing::error!(error = %e, "audio round-trip failed");
            return;
        }

        let mut scratch = vec![T::default(); frames];
        for channel in 0..effect.num_outputs.max(0) as usize {
            if buffers
                .read_output_into(0, channel, &mut scratch)
                .is_err()
            {
                continue;
            }
            let output = std::slice::from_raw_parts_mut(*outputs.add(channel), frames);
            if REPLACING {
                output.copy_from_slice(&scratch);
            } else {
                for (out, sample) in output.iter_mut().zip(&scratch) {
                    *out = *sample;
                }
            }
        }

        self.flush_pending_midi();
    }

    fn build_audio_request<T>(&self, sample_frames: i32) -> AudioRequest {
        // Prefetch what practically every plugin asks for during the block,
        // so the far side can answer those queries locally.
        let time_info = unsafe {
            let raw = (self.host_callback)(
                self.effect.get(),
                host_opcodes::GET_TIME,
                0,
                !0,
                std::ptr::null_mut(),
                0.0,
            ) as *const abi::VstTimeInfo;
            if raw.is_null() {
                None
            } else {
                Some(crate::protocol::vst2::TimeInfo::from(&*raw))
            }
        };
        let process_level = unsafe {
            Some((self.host_callback)(
                self.effect.get(),
                host_opcodes::GET_CURRENT_PROCESS_LEVEL,
                0,
                0,
                std::ptr::null_mut(),
                0.0,
            ) as i32)
        };

        let new_realtime_priority = {
            let mut last_sync = self.last_priority_sync.lock();
            if last_sync.elapsed() >= rt::PRIORITY_SYNC_INTERVAL {
                *last_sync = Instant::now();
                rt::get_realtime_priority()
            } else {
                None
            }
        };

        AudioRequest {
            sample_frames,
            double_precision: std::mem::size_of::<T>() == 8,
            time_info,
            process_level,
            new_realtime_priority,
        }
    }

    fn flush_pending_midi(&self) {
        let bundles = std::mem::take(&mut *self.pending.midi_events.lock());
        for bundle in bundles {
            let mut owned = abi::OwnedVstEvents::new(&bundle);
            unsafe {
                (self.host_callback)(
                    self.effect.get(),
                    host_opcodes::PROCESS_EVENTS,
                    0,
                    0,
                    owned.as_mut_ptr() as *mut c_void,
                    0.0,
                );
            }
        }
    }
}

impl Drop for Vst2PluginBridge {
    fn drop(&mut self) {
        // Unblock and reap the callback thread before any shared state goes
        // away. Errors are expected when the far side is already gone.
        let _ = self
            .callback_shutdown
            .shutdown(std::net::Shutdown::Both);
        if let Some(receive_loop) = self.callback_loop.lock().take() {
            receive_loop.join();
        }

        // The host process exits once its channels are closed; only then is
        // it reaped.
        self.dispatch.shutdown();
        self.parameters.shutdown();
        self.process_channel.shutdown();
        if let Some(process) = &self.host_process {
            process.shutdown();
        }
    }
}

/// Handle one plugin→host event on the callback thread.
fn handle_host_callback(
    effect: &EffectPtr,
    host_callback: HostCallbackProc,
    pending: &PendingCallbacks,
    hide_daw: bool,
    event: Event,
) -> EventResult {
    match event.opcode {
        host_opcodes::PROCESS_EVENTS => {
            if let EventPayload::Events(bundle) = event.payload {
                pending.midi_events.lock().push(bundle);
            }
            EventResult::value(1)
        }
        host_opcodes::SIZE_WINDOW => {
            *pending.resize.lock() = Some((event.index, event.value as i32));
            EventResult::value(1)
        }
        host_opcodes::GET_PRODUCT_STRING if hide_daw => {
            tracing::debug!("answering the host's product name with the override");
            EventResult {
                return_value: 1,
                payload: EventPayload::Str(PRODUCT_NAME_OVERRIDE.to_string()),
                value_payload: None,
            }
        }
        host_opcodes::GET_VENDOR_STRING if hide_daw => EventResult {
            return_value: 1,
            payload: EventPayload::Str(VENDOR_NAME_OVERRIDE.to_string()),
            value_payload: None,
        },
        host_opcodes::DEAD_BEEF => {
            tracing::debug!("ignoring host vendor extension probe");
            EventResult::value(0)
        }
        _ => unsafe { payload::passthrough_host_event(effect.0, host_callback, &event) },
    }
}

// ---------------------------------------------------------------------------
// Free-function thunks. The ABI requires plain function pointers; the bridge
// is recovered from the reserved slot of the effect struct.

unsafe fn bridge_from<'a>(effect: *mut AEffect) -> &'a Vst2PluginBridge {
    &*((*effect).reserved1 as *const Vst2PluginBridge)
}

unsafe extern "C" fn dispatch_thunk(
    effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    data: *mut c_void,
    option: f32,
) -> isize {
    bridge_from(effect).dispatch(opcode, index, value, data, option)
}

unsafe extern "C" fn process_thunk(
    effect: *mut AEffect,
    inputs: *mut *mut f32,
    outputs: *mut *mut f32,
    sample_frames: i32,
) {
    bridge_from(effect).do_process::<f32, false>(inputs, outputs, sample_frames)
}

unsafe extern "C" fn process_replacing_thunk(
    effect: *mut AEffect,
    inputs: *mut *mut f32,
    outputs: *mut *mut f32,
    sample_frames: i32,
) {
    bridge_from(effect).do_process::<f32, true>(inputs, outputs, sample_frames)
}

unsafe extern "C" fn process_double_replacing_thunk(
    effect: *mut AEffect,
    inputs: *mut *mut f64,
    outputs: *mut *mut f64,
    sample_frames: i32,
) {
    bridge_from(effect).do_process::<f64, true>(inputs, outputs, sample_frames)
}

unsafe extern "C" fn set_parameter_thunk(effect: *mut AEffect, index: i32, value: f32) {
    bridge_from(effect).set_parameter(index, value)
}

unsafe extern "C" fn get_parameter_thunk(effect: *mut AEffect, index: i32) -> f32 {
    bridge_from(effect).get_parameter(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::vst2::EffectFields;
    use crate::protocol::AudioShmConfig;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn test_host_callback(
        _effect: *mut AEffect,
        _opcode: i32,
        _index: i32,
        _value: isize,
        _data: *mut c_void,
        _option: f32,
    ) -> isize {
        0
    }

    fn initial_fields() -> EffectFields {
        EffectFields {
            num_programs: 1,
            num_params: 8,
            num_inputs: 2,
            num_outputs: 2,
            flags: abi::flags::CAN_REPLACING | abi::flags::PROGRAM_CHUNKS,
            initial_delay: 0,
            unique_id: 0x7465_7374,
            version: 1,
        }
    }

    /// In-process stand-in for the host process: scripted handlers on the
    /// serving end of all four channels.
    struct FakeHost {
        parameter_exchanges: Arc<AtomicUsize>,
        received_chunks: Arc<Mutex<Vec<Vec<u8>>>>,
        shutdown_handles: Vec<UnixStream>,
        threads: Vec<std::thread::JoinHandle<()>>,
    }

    impl FakeHost {
        fn start(shm_name: &str) -> (FakeHost, Box<Vst2PluginBridge>) {
            let (dispatch_stub, dispatch_host) = UnixStream::pair().unwrap();
            let (callback_stub, _callback_host) = UnixStream::pair().unwrap();
            let (parameters_stub, parameters_host) = UnixStream::pair().unwrap();
            let (process_stub, process_host) = UnixStream::pair().unwrap();

            let parameter_exchanges = Arc::new(AtomicUsize::new(0));
            let received_chunks = Arc::new(Mutex::new(Vec::new()));
            let shm_config = AudioShmConfig {
                name: format!("vinebridge-test-{}-{shm_name}", std::process::id()),
                input_channels: vec![2],
                output_channels: vec![2],
                element_size: 4,
                block_size: 512,
            };

            let shutdown_handles = vec![
                dispatch_host.try_clone().unwrap(),
                parameters_host.try_clone().unwrap(),
                process_host.try_clone().unwrap(),
            ];

            let mut threads = Vec::new();

            // Shared buffer handed from the dispatch thread (which creates
            // it on MainsChanged) to the audio thread.
            let buffers: Arc<Mutex<Option<Arc<AudioShmBuffer>>>> = Arc::new(Mutex::new(None));

            {
                let chunks = Arc::clone(&received_chunks);
                let buffers = Arc::clone(&buffers);
                let shm_config = shm_config.clone();
                let mut channel: EventChannel<Event, EventResult> =
                    EventChannel::new(dispatch_host);
                threads.push(std::thread::spawn(move || {
                    // Startup: version exchange, effect snapshot,
                    // configuration.
                    let _stub_version: VersionInfo = channel.receive_raw().unwrap();
                    channel.send_raw(&VersionInfo::current()).unwrap();
                    channel.send_raw(&initial_fields()).unwrap();
                    let _options: BridgeOptions = channel.receive_raw().unwrap();

                    while let Ok(event) = channel.receive() {
                        let result = match event.opcode {
                            opcodes::OPEN => {
                                let mut fields = initial_fields();
                                // A late-initialising plugin fills in its
                                // latency only now.
                                fields.initial_delay = 128;
                                EventResult {
                                    return_value: 0,
                                    payload: EventPayload::Effect(fields),
                                    value_payload: None,
                                }
                            }
                            opcodes::MAINS_CHANGED if event.value == 1 => {
                                let buffer =
                                    AudioShmBuffer::create(shm_config.clone()).unwrap();
                                *buffers.lock() = Some(Arc::new(buffer));
                                EventResult {
                                    return_value: 0,
                                    payload: EventPayload::AudioShmConfig(shm_config.clone()),
                                    value_payload: None,
                                }
                            }
                            opcodes::GET_CHUNK => EventResult {
                                return_value: 4,
                                payload: EventPayload::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
                                value_payload: None,
                            },
                            opcodes::SET_CHUNK => {
                                if let EventPayload::Bytes(bytes) = &event.payload {
                                    chunks.lock().push(bytes.clone());
                                }
                                EventResult::value(1)
                            }
                            opcodes::CLOSE => {
                                let _ = channel.reply(&EventResult::value(0));
                                break;
                            }
                            _ => EventResult::value(0),
                        };
                        if channel.reply(&result).is_err() {
                            break;
                        }
                    }
                }));
            }

            {
                let exchanges = Arc::clone(&parameter_exchanges);
                let mut channel: EventChannel<ParameterRequest, ParameterResponse> =
                    EventChannel::new(parameters_host);
                threads.push(std::thread::spawn(move || {
                    let mut values: HashMap<i32, f32> = HashMap::new();
                    while let Ok(request) = channel.receive() {
                        exchanges.fetch_add(1, Ordering::SeqCst);
                        let response = match request.value {
                            Some(value) => {
                                values.insert(request.index, value);
                                ParameterResponse { value: None }
                            }
                            None => ParameterResponse {
                                value: Some(values.get(&request.index).copied().unwrap_or(0.0)),
                            },
                        };
                        if channel.reply(&response).is_err() {
                            break;
                        }
                    }
                }));
            }

            {
                let buffers = Arc::clone(&buffers);
                let mut channel: EventChannel<AudioRequest, Ack> = EventChannel::new(process_host);
                threads.push(std::thread::spawn(move || {
                    while let Ok(request) = channel.receive() {
                        // Pass-through processing.
                        if let Some(buffer) = buffers.lock().as_ref() {
                            let frames = request.sample_frames as usize;
                            let mut scratch = vec![0.0f32; frames];
                            for channel_index in 0..2 {
                                buffer
                                    .read_input_into(0, channel_index, &mut scratch)
                                    .unwrap();
                                buffer.write_output(0, channel_index, &scratch).unwrap();
                            }
                        }
                        if channel.reply(&Ack).is_err() {
                            break;
                        }
                    }
                }));
            }

            let bridge = Vst2PluginBridge::connect(
                BridgeOptions::default(),
                test_host_callback,
                dispatch_stub,
                callback_stub,
                parameters_stub,
                process_stub,
                None,
                None,
            )
            .unwrap();

            (
                FakeHost {
                    parameter_exchanges,
                    received_chunks,
                    shutdown_handles,
                    threads,
                },
                bridge,
            )
        }

        fn kill(&self) {
            for handle in &self.shutdown_handles {
                let _ = handle.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    impl Drop for FakeHost {
        fn drop(&mut self) {
            self.kill();
            for thread in self.threads.drain(..) {
                let _ = thread.join();
            }
        }
    }

    #[test]
    fn startup_applies_the_initial_effect_snapshot() {
        let (_host, bridge) = FakeHost::start("startup");
        let effect = unsafe { &*bridge.effect_ptr() };
        assert_eq!(effect.magic, abi::EFFECT_MAGIC);
        assert_eq!(effect.num_params, 8);
        assert_eq!(effect.num_inputs, 2);
        assert_eq!(
            effect.reserved1,
            &*bridge as *const Vst2PluginBridge as isize
        );
    }

    #[test]
    fn parameter_roundtrip_uses_exactly_one_exchange_per_call() {
        let (host, bridge) = FakeHost::start("parameters");

        bridge.set_parameter(7, 0.25);
        assert_eq!(bridge.get_parameter(7), 0.25);
        assert_eq!(host.parameter_exchanges.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn open_copies_late_initialised_fields() {
        let (_host, bridge) = FakeHost::start("open");

        let returned =
            unsafe { bridge.dispatch(opcodes::OPEN, 0, 0, std::ptr::null_mut(), 0.0) };
        assert_eq!(returned, 0);

        let effect = unsafe { &*bridge.effect_ptr() };
        assert_eq!(effect.initial_delay, 128);
    }

    #[test]
    fn chunk_pointer_stays_valid_until_next_dispatch() {
        let (host, bridge) = FakeHost::start("chunks");

        let mut chunk_ptr: *mut u8 = std::ptr::null_mut();
        let returned = unsafe {
            bridge.dispatch(
                opcodes::GET_CHUNK,
                0,
                0,
                &mut chunk_ptr as *mut *mut u8 as *mut c_void,
                0.0,
            )
        };
        assert_eq!(returned, 4);
        let bytes = unsafe { std::slice::from_raw_parts(chunk_ptr, 4) };
        assert_eq!(bytes, &[0xde, 0xad, 0xbe, 0xef]);

        // Feed the same bytes back; the far side must decode them
        // identically.
        let chunk = bytes.to_vec();
        unsafe {
            bridge.dispatch(
                opcodes::SET_CHUNK,
                0,
                chunk.len() as isize,
                chunk.as_ptr() as *mut c_void,
                0.0,
            )
        };
        assert_eq!(
            host.received_chunks.lock().as_slice(),
            &[vec![0xde, 0xad, 0xbe, 0xef]]
        );
    }

    #[test]
    fn audio_block_roundtrips_through_shared_memory() {
        let (_host, bridge) = FakeHost::start("audio");

        let returned =
            unsafe { bridge.dispatch(opcodes::MAINS_CHANGED, 0, 1, std::ptr::null_mut(), 0.0) };
        assert_eq!(returned, 0);
        assert!(bridge.process_buffers.lock().is_some());

        let mut left_in = [1.0f32; 64];
        let mut right_in = [-1.0f32; 64];
        let mut left_out = [0.0f32; 64];
        let mut right_out = [0.0f32; 64];
        let mut inputs = [left_in.as_mut_ptr(), right_in.as_mut_ptr()];
        let mut outputs = [left_out.as_mut_ptr(), right_out.as_mut_ptr()];

        unsafe {
            bridge.do_process::<f32, true>(inputs.as_mut_ptr(), outputs.as_mut_ptr(), 64);
        }

        assert_eq!(left_out, [1.0f32; 64]);
        assert_eq!(right_out, [-1.0f32; 64]);
    }

    #[test]
    fn cockos_gui_query_is_answered_locally() {
        let (_host, bridge) = FakeHost::start("cockos");
        let query = std::ffi::CString::new("hasCockosViewAsConfig").unwrap();
        let returned = unsafe {
            bridge.dispatch(
                opcodes::CAN_DO,
                0,
                0,
                query.as_ptr() as *mut c_void,
                0.0,
            )
        };
        assert_eq!(returned, -1);
    }

    #[test]
    fn transport_failure_surfaces_as_generic_failure_without_deadlock() {
        let (host, bridge) = FakeHost::start("crash");

        bridge.set_parameter(3, 0.5);
        host.kill();
        // Give the peer sockets a moment to close down.
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert_eq!(bridge.get_parameter(3), 0.0);
        // Proxy destruction must complete without blocking.
        drop(bridge);
    }
}
