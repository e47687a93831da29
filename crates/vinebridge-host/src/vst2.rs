//! Hosting a real legacy-ABI plugin and serving the stub's channels.

use libloading::Library;
use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vinebridge::channels::{
    connect_by, vst2_sockets, EventChannel, RequestChannel, SocketGroup, HANDSHAKE_TIMEOUT,
};
use vinebridge::config::BridgeOptions;
use vinebridge::error::{BridgeError, Result};
use vinebridge::protocol::vst2::{
    EffectFields, Event, EventPayload, EventResult, IoProperties, MidiKeyName,
    ParameterProperties, ParameterRequest, ParameterResponse, SpeakerArrangement, TimeInfo,
};
use vinebridge::protocol::{Ack, AudioRequest, AudioShmConfig, VersionInfo};
use vinebridge::rt::{self, ScopedFlushToZero, ScopedValueCache, TimedValueCache};
use vinebridge::shm::AudioShmBuffer;
use vinebridge::vst2::abi::{
    self, host_opcodes, opcodes, AEffect, HostCallbackProc, OwnedVstEvents, VstRect, VstTimeInfo,
};

type PluginMain = unsafe extern "C" fn(HostCallbackProc) -> *mut AEffect;

/// Upper bound for one processing block when the DAW never announced a block
/// size before enabling audio.
const DEFAULT_MAX_BLOCK_SIZE: usize = 8192;

const EDITOR_IDLE_INTERVAL: Duration = Duration::from_millis(50);

/// Lifetime of the cached host identity strings.
const HOST_STRING_CACHE_LIFETIME: Duration = Duration::from_secs(5);

/// The one plugin this process hosts. Needed because the host callback
/// handed to the plugin's entry point is a free function, and the plugin
/// starts calling it before the entry point has even returned.
static CURRENT_HOST: AtomicPtr<Vst2PluginHost> = AtomicPtr::new(std::ptr::null_mut());

pub struct Vst2PluginHost {
    shm_name: String,
    callback: RequestChannel<Event, EventResult>,
    effect: AtomicPtr<AEffect>,

    /// Serialises dispatcher access between the control loop and the editor
    /// idle timer.
    plugin_lock: Mutex<()>,

    /// Transport info prefetched with each audio request; answers the
    /// plugin's own queries during the block without re-entering the socket.
    time_info_cache: ScopedValueCache<TimeInfo>,
    process_level_cache: ScopedValueCache<i32>,
    /// Stable storage behind the pointer returned for time queries.
    time_info_storage: Mutex<VstTimeInfo>,
    /// Some plugins poll the DAW's identity strings; they change at most
    /// between sessions, so the answers are kept for a few seconds.
    vendor_string_cache: TimedValueCache<(i64, String)>,
    product_string_cache: TimedValueCache<(i64, String)>,

    buffers: Mutex<Option<Arc<AudioShmBuffer>>>,
    block_size: AtomicUsize,
    editor_open: AtomicBool,
    running: Arc<AtomicBool>,
}

// SAFETY: raw effect pointer access is serialised by `plugin_lock` and the
// per-channel receive loops; everything else is mutex- or atomic-guarded.
unsafe impl Send for Vst2PluginHost {}
unsafe impl Sync for Vst2PluginHost {}

/// Connect to the stub's socket group, load the plugin module, and serve
/// events until the stub disconnects.
pub fn run(socket_dir: &std::path::Path, module_path: &std::path::Path) -> Result<()> {
    let group = SocketGroup::attach(socket_dir);
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

    let mut dispatch: EventChannel<Event, EventResult> =
        EventChannel::new(connect_by(&group.socket_path(vst2_sockets::DISPATCH), deadline)?);
    let callback_stream = connect_by(&group.socket_path(vst2_sockets::CALLBACK), deadline)?;
    let parameters_stream =
        connect_by(&group.socket_path(vst2_sockets::PARAMETERS), deadline)?;
    let process_stream = connect_by(&group.socket_path(vst2_sockets::PROCESS), deadline)?;

    let stub_version: VersionInfo = dispatch.receive_raw()?;
    dispatch.send_raw(&VersionInfo::current())?;
    if stub_version != VersionInfo::current() {
        tracing::warn!(
            stub = %stub_version.version,
            host = %VersionInfo::current().version,
            "version mismatch between stub and host process"
        );
    }

    let host = Arc::new(Vst2PluginHost {
        shm_name: group.shm_name(),
        callback: RequestChannel::new(callback_stream),
        effect: AtomicPtr::new(std::ptr::null_mut()),
        plugin_lock: Mutex::new(()),
        time_info_cache: ScopedValueCache::new(),
        process_level_cache: ScopedValueCache::new(),
        time_info_storage: Mutex::new(unsafe { std::mem::zeroed() }),
        vendor_string_cache: TimedValueCache::new(),
        product_string_cache: TimedValueCache::new(),
        buffers: Mutex::new(None),
        block_size: AtomicUsize::new(DEFAULT_MAX_BLOCK_SIZE),
        editor_open: AtomicBool::new(false),
        running: Arc::new(AtomicBool::new(true)),
    });

    // The plugin calls back into the host during its entry point, so the
    // routing pointer has to be in place before the module loads.
    CURRENT_HOST.store(Arc::as_ptr(&host) as *mut _, Ordering::Release);

    let library = unsafe { Library::new(module_path) }.map_err(|e| BridgeError::ModuleLoad {
        path: module_path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let entry: libloading::Symbol<PluginMain> = unsafe {
        library
            .get(b"VSTPluginMain")
            .or_else(|_| library.get(b"main"))
    }
    .map_err(|e| BridgeError::ModuleLoad {
        path: module_path.to_path_buf(),
        reason: format!("no plugin entry point: {e}"),
    })?;

    let effect = unsafe { entry(host_callback_shim) };
    if effect.is_null() {
        return Err(BridgeError::ModuleLoad {
            path: module_path.to_path_buf(),
            reason: "entry point returned no effect instance".into(),
        });
    }
    host.effect.store(effect, Ordering::Release);
    tracing::info!(path = %module_path.display(), "plugin module loaded");

    // Complete the startup: initial effect snapshot out, configuration in.
    dispatch.send_raw(&EffectFields::from_effect(unsafe { &*effect }))?;
    let _options: BridgeOptions = dispatch.receive_raw()?;

    let mut workers = Vec::new();
    {
        let host = Arc::clone(&host);
        let mut channel: EventChannel<ParameterRequest, ParameterResponse> =
            EventChannel::new(parameters_stream);
        workers.push(std::thread::Builder::new().name("parameters".into()).spawn(
            move || {
                while let Ok(request) = channel.receive() {
                    let response = unsafe { host.handle_parameter(request) };
                    if channel.reply(&response).is_err() {
                        break;
                    }
                }
            },
        )?);
    }
    {
        let host = Arc::clone(&host);
        let mut channel: EventChannel<AudioRequest, Ack> = EventChannel::new(process_stream);
        workers.push(std::thread::Builder::new().name("audio".into()).spawn(
            move || {
                rt::set_realtime_priority(true, rt::DEFAULT_REALTIME_PRIORITY);
                while let Ok(request) = channel.receive() {
                    unsafe { host.handle_audio(&request) };
                    if channel.reply(&Ack).is_err() {
                        break;
                    }
                }
            },
        )?);
    }
    {
        // The stub never forwards the host's idle event; the plugin's editor
        // is driven from this timer instead.
        let host = Arc::clone(&host);
        let running = Arc::clone(&host.running);
        workers.push(std::thread::Builder::new().name("editor-idle".into()).spawn(
            move || {
                while running.load(Ordering::Relaxed) {
                    std::thread::sleep(EDITOR_IDLE_INTERVAL);
                    if host.editor_open.load(Ordering::Relaxed) {
                        unsafe { host.editor_idle() };
                    }
                }
            },
        )?);
    }

    // The dispatcher is served from this thread.
    loop {
        let event = match dispatch.receive() {
            Ok(event) => event,
            Err(e) => {
                tracing::info!(error = %e, "dispatch channel closed, shutting down");
                break;
            }
        };
        let closing = event.opcode == opcodes::CLOSE;
        let response = host.handle_dispatch(&event);
        if dispatch.reply(&response).is_err() || closing {
            break;
        }
    }

    host.running.store(false, Ordering::Relaxed);
    CURRENT_HOST.store(std::ptr::null_mut(), Ordering::Release);
    host.callback.shutdown();
    for worker in workers {
        let _ = worker.join();
    }
    Ok(())
}

impl Vst2PluginHost {
    unsafe fn dispatcher(
        &self,
        opcode: i32,
        index: i32,
        value: isize,
        data: *mut c_void,
        option: f32,
    ) -> isize {
        let effect = self.effect.load(Ordering::Acquire);
        let Some(dispatcher) = (*effect).dispatcher else {
            return 0;
        };
        dispatcher(effect, opcode, index, value, data, option)
    }

    fn handle_dispatch(&self, event: &Event) -> EventResult {
        let _guard = self.plugin_lock.lock();
        unsafe { self.apply_dispatch(event) }
    }

    /// Rebuild the opcode's raw arguments from the wire payload, invoke the
    /// plugin, and capture the outputs the stub needs to write back.
    unsafe fn apply_dispatch(&self, event: &Event) -> EventResult {
        let opcode = event.opcode;
        let index = event.index;
        let value = event.value as isize;
        let option = event.option;

        match (&event.payload, &event.value_payload) {
            (EventPayload::WantsEffectUpdate, _) => {
                let return_value =
                    self.dispatcher(opcode, index, value, std::ptr::null_mut(), option);
                let effect = self.effect.load(Ordering::Acquire);
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::Effect(EffectFields::from_effect(&*effect)),
                    value_payload: None,
                }
            }
            (EventPayload::WantsAudioShmConfig, _) => {
                let return_value =
                    self.dispatcher(opcode, index, value, std::ptr::null_mut(), option);
                match self.configure_buffers() {
                    Ok(config) => EventResult {
                        return_value: return_value as i64,
                        payload: EventPayload::AudioShmConfig(config),
                        value_payload: None,
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "audio buffer setup failed");
                        EventResult::value(0)
                    }
                }
            }
            (EventPayload::WantsRect, _) => {
                let mut rect: *mut VstRect = std::ptr::null_mut();
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    &mut rect as *mut *mut VstRect as *mut c_void,
                    option,
                );
                let payload = if rect.is_null() {
                    EventPayload::None
                } else {
                    EventPayload::Rect((&*rect).into())
                };
                EventResult {
                    return_value: return_value as i64,
                    payload,
                    value_payload: None,
                }
            }
            (EventPayload::WantsChunkBuffer, _) => {
                let mut chunk: *mut u8 = std::ptr::null_mut();
                let length = self.dispatcher(
                    opcode,
                    index,
                    value,
                    &mut chunk as *mut *mut u8 as *mut c_void,
                    option,
                );
                let payload = if chunk.is_null() || length <= 0 {
                    EventPayload::Bytes(Vec::new())
                } else {
                    EventPayload::Bytes(
                        std::slice::from_raw_parts(chunk, length as usize).to_vec(),
                    )
                };
                EventResult {
                    return_value: length as i64,
                    payload,
                    value_payload: None,
                }
            }
            (EventPayload::WantsString, _) => {
                let mut buffer = [0 as c_char; abi::MAX_STRING_LEN];
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    buffer.as_mut_ptr() as *mut c_void,
                    option,
                );
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::Str(abi::read_c_string(&buffer)),
                    value_payload: None,
                }
            }
            (EventPayload::Bytes(bytes), _) => {
                // The chunk length travels through `value`.
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    bytes.len() as isize,
                    bytes.as_ptr() as *mut c_void,
                    option,
                );
                EventResult::value(return_value as i64)
            }
            (EventPayload::Str(text), _) => {
                let text = std::ffi::CString::new(text.as_str()).unwrap_or_default();
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    text.as_ptr() as *mut c_void,
                    option,
                );
                EventResult::value(return_value as i64)
            }
            (EventPayload::Events(bundle), _) => {
                let mut owned = OwnedVstEvents::new(bundle);
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    owned.as_mut_ptr() as *mut c_void,
                    option,
                );
                EventResult::value(return_value as i64)
            }
            (EventPayload::IoProperties(properties), _) => {
                let mut raw: abi::VstPinProperties = std::mem::zeroed();
                properties.write_to(&mut raw);
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    &mut raw as *mut _ as *mut c_void,
                    option,
                );
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::IoProperties(IoProperties::from_raw(&raw)),
                    value_payload: None,
                }
            }
            (EventPayload::ParameterProperties(properties), _) => {
                let mut raw: abi::VstParameterProperties = std::mem::zeroed();
                properties.write_to(&mut raw);
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    &mut raw as *mut _ as *mut c_void,
                    option,
                );
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::ParameterProperties(ParameterProperties::from_raw(
                        &raw,
                    )),
                    value_payload: None,
                }
            }
            (EventPayload::MidiKeyName(name), _) => {
                let mut raw: abi::VstMidiKeyName = std::mem::zeroed();
                name.write_to(&mut raw);
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    &mut raw as *mut _ as *mut c_void,
                    option,
                );
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::MidiKeyName(MidiKeyName::from_raw(&raw)),
                    value_payload: None,
                }
            }
            (EventPayload::SpeakerArrangement(output), value_payload) => {
                let mut raw_output: abi::VstSpeakerArrangement = std::mem::zeroed();
                output.write_to(&mut raw_output);
                let mut raw_input: abi::VstSpeakerArrangement = std::mem::zeroed();
                if let Some(EventPayload::SpeakerArrangement(input)) = value_payload {
                    input.write_to(&mut raw_input);
                }

                let return_value = self.dispatcher(
                    opcode,
                    index,
                    &mut raw_input as *mut _ as isize,
                    &mut raw_output as *mut _ as *mut c_void,
                    option,
                );

                // Only the getter writes results into the two structs.
                if opcode == opcodes::GET_SPEAKER_ARRANGEMENT {
                    EventResult {
                        return_value: return_value as i64,
                        payload: EventPayload::SpeakerArrangement(SpeakerArrangement::from_raw(
                            &raw_output,
                        )),
                        value_payload: Some(EventPayload::SpeakerArrangement(
                            SpeakerArrangement::from_raw(&raw_input),
                        )),
                    }
                } else {
                    EventResult::value(return_value as i64)
                }
            }
            (EventPayload::NativeHandle(handle), _) => {
                let return_value = self.dispatcher(
                    opcode,
                    index,
                    value,
                    *handle as usize as *mut c_void,
                    option,
                );
                if opcode == opcodes::EDIT_OPEN && return_value != 0 {
                    self.editor_open.store(true, Ordering::Relaxed);
                }
                EventResult::value(return_value as i64)
            }
            _ => {
                match opcode {
                    opcodes::SET_BLOCK_SIZE => {
                        self.block_size
                            .store(value.max(1) as usize, Ordering::Relaxed);
                    }
                    opcodes::EDIT_CLOSE => {
                        self.editor_open.store(false, Ordering::Relaxed);
                    }
                    _ => {}
                }
                let return_value =
                    self.dispatcher(opcode, index, value, std::ptr::null_mut(), option);
                EventResult::value(return_value as i64)
            }
        }
    }

    /// Lay out the shared audio buffer for the plugin's current pin counts.
    fn configure_buffers(&self) -> Result<AudioShmConfig> {
        let effect = unsafe { &*self.effect.load(Ordering::Acquire) };
        let element_size = if effect.flags & abi::flags::CAN_DOUBLE_REPLACING != 0 {
            8
        } else {
            4
        };
        let config = AudioShmConfig {
            name: self.shm_name.clone(),
            input_channels: vec![effect.num_inputs.max(0) as u32],
            output_channels: vec![effect.num_outputs.max(0) as u32],
            element_size,
            block_size: self.block_size.load(Ordering::Relaxed) as u32,
        };

        let mut buffers = self.buffers.lock();
        match buffers.take() {
            Some(existing) => {
                // Reconfiguration happens with audio disabled on both sides.
                drop(existing);
                *buffers = Some(Arc::new(AudioShmBuffer::create(config.clone())?));
            }
            None => {
                *buffers = Some(Arc::new(AudioShmBuffer::create(config.clone())?));
            }
        }
        Ok(config)
    }

    unsafe fn handle_parameter(&self, request: ParameterRequest) -> ParameterResponse {
        let effect = self.effect.load(Ordering::Acquire);
        match request.value {
            Some(value) => {
                if let Some(set_parameter) = (*effect).set_parameter {
                    set_parameter(effect, request.index, value);
                }
                ParameterResponse { value: None }
            }
            None => {
                let value = (*effect)
                    .get_parameter
                    .map(|get_parameter| get_parameter(effect, request.index))
                    .unwrap_or(0.0);
                ParameterResponse { value: Some(value) }
            }
        }
    }

    /// Service one audio block. The request/ack protocol means the buffer is
    /// ours until the reply is sent.
    unsafe fn handle_audio(&self, request: &AudioRequest) {
        if let Some(priority) = request.new_realtime_priority {
            rt::set_realtime_priority(true, priority);
        }

        // Keep the prefetched host state alive for queries the plugin makes
        // from inside its processing call.
        let _time_guard = request
            .time_info
            .map(|info| self.time_info_cache.set(info));
        let _level_guard = request
            .process_level
            .map(|level| self.process_level_cache.set(level));
        let _ftz = ScopedFlushToZero::new();

        let buffers = self.buffers.lock().clone();
        let Some(buffers) = buffers else {
            tracing::error!("audio request before buffer configuration");
            return;
        };

        let effect = self.effect.load(Ordering::Acquire);
        let frames = request.sample_frames;
        if request.double_precision {
            let Ok(inputs) = channel_pointers::<f64>(&buffers, effect, true) else {
                return;
            };
            let Ok(outputs) = channel_pointers::<f64>(&buffers, effect, false) else {
                return;
            };
            if let Some(process) = (*effect).process_double_replacing {
                process(
                    effect,
                    inputs.as_ptr() as *mut *mut f64,
                    outputs.as_ptr() as *mut *mut f64,
                    frames,
                );
            }
        } else {
            let Ok(inputs) = channel_pointers::<f32>(&buffers, effect, true) else {
                return;
            };
            let Ok(outputs) = channel_pointers::<f32>(&buffers, effect, false) else {
                return;
            };
            let process = (*effect).process_replacing.or((*effect).process);
            if let Some(process) = process {
                process(
                    effect,
                    inputs.as_ptr() as *mut *mut f32,
                    outputs.as_ptr() as *mut *mut f32,
                    frames,
                );
            }
        }
    }

    unsafe fn editor_idle(&self) {
        let _guard = self.plugin_lock.lock();
        self.dispatcher(opcodes::EDIT_IDLE, 0, 0, std::ptr::null_mut(), 0.0);
    }

    /// One plugin→host callback, either answered from the per-block caches
    /// or forwarded to the stub.
    fn handle_plugin_callback(
        &self,
        opcode: i32,
        index: i32,
        value: isize,
        data: *mut c_void,
        option: f32,
    ) -> isize {
        match opcode {
            host_opcodes::GET_TIME => {
                let info = match self.time_info_cache.get() {
                    Some(info) => Some(info),
                    None => {
                        // Outside a block; ask the actual host.
                        match self.forward_callback(opcode, index, value, option, EventPayload::None)
                        {
                            Some(result) => match result.payload {
                                EventPayload::TimeInfo(info) => Some(info),
                                _ => None,
                            },
                            None => None,
                        }
                    }
                };
                match info {
                    Some(info) => {
                        let mut storage = self.time_info_storage.lock();
                        *storage = VstTimeInfo::from(&info);
                        &*storage as *const VstTimeInfo as isize
                    }
                    None => 0,
                }
            }
            host_opcodes::GET_CURRENT_PROCESS_LEVEL => {
                if let Some(level) = self.process_level_cache.get() {
                    return level as isize;
                }
                self.forward_callback(opcode, index, value, option, EventPayload::None)
                    .map(|result| result.return_value as isize)
                    .unwrap_or(0)
            }
            host_opcodes::PROCESS_EVENTS => {
                let payload =
                    EventPayload::Events(unsafe { abi::read_events(data as *const _) });
                self.forward_callback(opcode, index, value, option, payload)
                    .map(|result| result.return_value as isize)
                    .unwrap_or(0)
            }
            host_opcodes::CAN_DO => {
                let payload = if data.is_null() {
                    EventPayload::None
                } else {
                    EventPayload::Str(unsafe { abi::read_c_string_ptr(data as *const c_char) })
                };
                self.forward_callback(opcode, index, value, option, payload)
                    .map(|result| result.return_value as isize)
                    .unwrap_or(0)
            }
            host_opcodes::GET_VENDOR_STRING | host_opcodes::GET_PRODUCT_STRING => {
                let cache = if opcode == host_opcodes::GET_VENDOR_STRING {
                    &self.vendor_string_cache
                } else {
                    &self.product_string_cache
                };
                let (return_value, text) = match cache.get() {
                    Some(cached) => cached,
                    None => {
                        let Some(result) = self.forward_callback(
                            opcode,
                            index,
                            value,
                            option,
                            EventPayload::WantsString,
                        ) else {
                            return 0;
                        };
                        let text = match result.payload {
                            EventPayload::Str(text) => text,
                            _ => String::new(),
                        };
                        let entry = (result.return_value, text);
                        cache.set(entry.clone(), HOST_STRING_CACHE_LIFETIME);
                        entry
                    }
                };
                unsafe { write_callback_string(data, &text) };
                return_value as isize
            }
            host_opcodes::GET_DIRECTORY => {
                let result =
                    self.forward_callback(opcode, index, value, option, EventPayload::WantsString);
                match result {
                    Some(result) => {
                        if let EventPayload::Str(text) = &result.payload {
                            unsafe { write_callback_string(data, text) };
                        }
                        result.return_value as isize
                    }
                    None => 0,
                }
            }
            _ => self
                .forward_callback(opcode, index, value, option, EventPayload::None)
                .map(|result| result.return_value as isize)
                .unwrap_or(0),
        }
    }

    fn forward_callback(
        &self,
        opcode: i32,
        index: i32,
        value: isize,
        option: f32,
        payload: EventPayload,
    ) -> Option<EventResult> {
        let event = Event {
            opcode,
            index,
            value: value as i64,
            option,
            payload,
            value_payload: None,
        };
        match self.callback.send_and_receive(&event) {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::error!(opcode, error = %e, "host callback failed");
                None
            }
        }
    }
}

/// Copy a returned string into an opcode's caller-provided buffer.
///
/// # Safety
/// `data` must be null or point at a writable string buffer.
unsafe fn write_callback_string(data: *mut c_void, text: &str) {
    if data.is_null() {
        return;
    }
    let buffer = std::slice::from_raw_parts_mut(data as *mut c_char, abi::MAX_STRING_LEN);
    abi::write_c_string(buffer, text);
}

fn channel_pointers<T: Copy>(
    buffers: &AudioShmBuffer,
    effect: *const AEffect,
    inputs: bool,
) -> Result<Vec<*mut T>> {
    let count = unsafe {
        if inputs {
            (*effect).num_inputs.max(0) as usize
        } else {
            (*effect).num_outputs.max(0) as usize
        }
    };
    (0..count)
        .map(|channel| {
            if inputs {
                buffers.input_ptr::<T>(0, channel)
            } else {
                buffers.output_ptr::<T>(0, channel)
            }
        })
        .collect()
}

unsafe extern "C" fn host_callback_shim(
    _effect: *mut AEffect,
    opcode: i32,
    index: i32,
    value: isize,
    data: *mut c_void,
    option: f32,
) -> isize {
    let host = CURRENT_HOST.load(Ordering::Acquire);
    if host.is_null() {
        // Callbacks made before routing is up (or after teardown) get the
        // bare minimum answers.
        return match opcode {
            host_opcodes::VERSION => 2400,
            _ => 0,
        };
    }
    (*host).handle_plugin_callback(opcode, index, value, data, option)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_callbacks_answer_host_version() {
        CURRENT_HOST.store(std::ptr::null_mut(), Ordering::Release);
        let version = unsafe {
            host_callback_shim(
                std::ptr::null_mut(),
                host_opcodes::VERSION,
                0,
                0,
                std::ptr::null_mut(),
                0.0,
            )
        };
        assert_eq!(version, 2400);
    }
}
