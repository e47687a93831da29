//! Stub-side proxies for plugin objects and their editor views.

use super::bridge::Vst3PluginBridge;
use super::{ComponentHandler, ConnectionPoint, HostContext, PlugFrame};
use crate::protocol::vst3::{
    result, BusInfo, Capabilities, ClassId, ConnectTarget, ControlRequest, ControlResponse,
    InstanceId, NotifyMessage, ParameterInfo, ProcessData, ProcessOutput, ProcessSetup,
    ProcessorRequest, ProcessorResponse, ProgramListInfo, TResult, UnitInfo, ViewRect,
};
use crate::shm::AudioShmBuffer;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::{Arc, Weak};

/// The peer of a `connect()`/`disconnect()` call.
pub enum ConnectPeer {
    /// Another one of our proxies; the underlying objects are connected
    /// directly on the plugin side.
    Proxy(Arc<Vst3PluginProxy>),
    /// An opaque host object; a mirror proxy on the plugin side forwards its
    /// `notify()` calls back across the callback channel.
    Host(Arc<dyn ConnectionPoint>),
}

/// Stub-side stand-in for one plugin object. Exclusively owned by the host
/// through its reference counting (modelled by the `Arc`); the bridge and
/// registry only hold weak references back.
pub struct Vst3PluginProxy {
    bridge: Arc<Vst3PluginBridge>,
    instance_id: InstanceId,
    capabilities: Capabilities,

    pub(super) component_handler: Mutex<Option<Arc<dyn ComponentHandler>>>,
    pub(super) host_connection: Mutex<Option<Arc<dyn ConnectionPoint>>>,
    pub(super) last_created_view: Mutex<Weak<Vst3PlugViewProxy>>,
    host_context: Mutex<Option<Arc<dyn HostContext>>>,

    process_buffers: Mutex<Option<AudioShmBuffer>>,
}

impl Vst3PluginProxy {
    pub(super) fn new(
        bridge: Arc<Vst3PluginBridge>,
        instance_id: InstanceId,
        capabilities: Capabilities,
    ) -> Arc<Self> {
        let proxy = Arc::new(Self {
            bridge,
            instance_id,
            capabilities,
            component_handler: Mutex::new(None),
            host_connection: Mutex::new(None),
            last_created_view: Mutex::new(Weak::new()),
            host_context: Mutex::new(None),
            process_buffers: Mutex::new(None),
        });
        proxy.bridge.registry().register(instance_id, &proxy);
        proxy
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// The interfaces the real object implements. The ABI shim only answers
    /// interface queries that are present here.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn send(&self, request: ControlRequest) -> crate::error::Result<ControlResponse> {
        self.bridge.send(request)
    }

    fn send_result(&self, request: ControlRequest) -> TResult {
        match self.send(request) {
            Ok(ControlResponse::Result(code)) => code,
            Ok(other) => {
                tracing::warn!(?other, "mis-shaped control response");
                result::INTERNAL_ERROR
            }
            Err(e) => {
                tracing::error!(error = %e, "control call failed");
                result::INTERNAL_ERROR
            }
        }
    }

    // -- plugin base ---------------------------------------------------------

    pub fn initialize(&self, context: Arc<dyn HostContext>) -> TResult {
        // The mirror context on the plugin side reports the DAW's name, or
        // the override when the DAW is being hidden.
        let host_name = if self.bridge.options().hide_daw {
            crate::config::PRODUCT_NAME_OVERRIDE.to_string()
        } else {
            context.name()
        };
        *self.host_context.lock() = Some(context);

        self.send_result(ControlRequest::Initialize {
            instance_id: self.instance_id,
            host_name,
        })
    }

    pub fn terminate(&self) -> TResult {
        self.send_result(ControlRequest::Terminate {
            instance_id: self.instance_id,
        })
    }

    // -- component -----------------------------------------------------------

    pub fn controller_class_id(&self) -> (TResult, ClassId) {
        match self.send(ControlRequest::GetControllerClassId {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::ClassId { result, cid }) => (result, cid),
            _ => (result::INTERNAL_ERROR, ClassId::default()),
        }
    }

    pub fn set_io_mode(&self, mode: i32) -> TResult {
        self.send_result(ControlRequest::SetIoMode {
            instance_id: self.instance_id,
            mode,
        })
    }

    pub fn bus_count(&self, media_type: i32, direction: i32) -> i32 {
        match self.send(ControlRequest::GetBusCount {
            instance_id: self.instance_id,
            media_type,
            direction,
        }) {
            Ok(ControlResponse::Count(count)) => count,
            _ => 0,
        }
    }

    pub fn bus_info(&self, media_type: i32, direction: i32, index: i32) -> (TResult, BusInfo) {
        match self.send(ControlRequest::GetBusInfo {
            instance_id: self.instance_id,
            media_type,
            direction,
            index,
        }) {
            Ok(ControlResponse::BusInfo { result, info }) => (result, info),
            _ => (result::INTERNAL_ERROR, BusInfo::default()),
        }
    }

    pub fn activate_bus(&self, media_type: i32, direction: i32, index: i32, state: bool) -> TResult {
        self.send_result(ControlRequest::ActivateBus {
            instance_id: self.instance_id,
            media_type,
            direction,
            index,
            state,
        })
    }

    pub fn set_active(&self, state: bool) -> TResult {
        self.send_result(ControlRequest::SetActive {
            instance_id: self.instance_id,
            state,
        })
    }

    // -- state streams -------------------------------------------------------

    /// The plugin's full state, read back into the host's stream.
    pub fn get_state(&self, stream: &mut dyn Write) -> TResult {
        match self.send(ControlRequest::GetState {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::State { result: code, data }) => {
                if stream.write_all(&data).is_err() {
                    return result::INTERNAL_ERROR;
                }
                code
            }
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn set_state(&self, stream: &mut dyn Read) -> TResult {
        let mut data = Vec::new();
        if stream.read_to_end(&mut data).is_err() {
            return result::INVALID_ARGUMENT;
        }
        self.send_result(ControlRequest::SetState {
            instance_id: self.instance_id,
            data,
        })
    }

    pub fn set_component_state(&self, stream: &mut dyn Read) -> TResult {
        let mut data = Vec::new();
        if stream.read_to_end(&mut data).is_err() {
            return result::INVALID_ARGUMENT;
        }
        self.send_result(ControlRequest::SetComponentState {
            instance_id: self.instance_id,
            data,
        })
    }

    // -- connection points ---------------------------------------------------

    pub fn connect(&self, peer: &ConnectPeer) -> TResult {
        let other = match peer {
            ConnectPeer::Proxy(proxy) => ConnectTarget::Proxy(proxy.instance_id()),
            ConnectPeer::Host(connection) => {
                *self.host_connection.lock() = Some(Arc::clone(connection));
                ConnectTarget::HostMirror
            }
        };
        self.send_result(ControlRequest::Connect {
            instance_id: self.instance_id,
            other,
        })
    }

    pub fn disconnect(&self, peer: Option<&Vst3PluginProxy>) -> TResult {
        let other = peer.map(Vst3PluginProxy::instance_id);
        let code = self.send_result(ControlRequest::Disconnect {
            instance_id: self.instance_id,
            other,
        });
        if other.is_none() {
            *self.host_connection.lock() = None;
        }
        code
    }

    /// Forward a connection message to the real object. `None` stands for a
    /// foreign message object that cannot be re-serialised because the
    /// attribute list has no enumeration primitive.
    pub fn notify(&self, message: Option<NotifyMessage>) -> TResult {
        match message {
            Some(message) => self.send_result(ControlRequest::Notify {
                instance_id: self.instance_id,
                message,
            }),
            None => {
                tracing::warn!("dropping unknown message type passed to notify()");
                result::NOT_IMPLEMENTED
            }
        }
    }

    // -- edit controller -----------------------------------------------------

    pub fn set_component_handler(&self, handler: Arc<dyn ComponentHandler>) -> TResult {
        *self.component_handler.lock() = Some(handler);
        self.send_result(ControlRequest::SetComponentHandler {
            instance_id: self.instance_id,
        })
    }

    pub fn parameter_count(&self) -> i32 {
        match self.send(ControlRequest::GetParameterCount {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::Count(count)) => count,
            _ => 0,
        }
    }

    pub fn parameter_info(&self, param_index: i32) -> (TResult, ParameterInfo) {
        match self.send(ControlRequest::GetParameterInfo {
            instance_id: self.instance_id,
            param_index,
        }) {
            Ok(ControlResponse::ParameterInfo { result, info }) => (result, info),
            _ => (result::INTERNAL_ERROR, ParameterInfo::default()),
        }
    }

    pub fn param_string_by_value(&self, param_id: u32, value_normalized: f64) -> (TResult, String) {
        match self.send(ControlRequest::GetParamStringByValue {
            instance_id: self.instance_id,
            param_id,
            value_normalized,
        }) {
            Ok(ControlResponse::Text { result, text }) => (result, text),
            _ => (result::INTERNAL_ERROR, String::new()),
        }
    }

    pub fn param_value_by_string(&self, param_id: u32, string: String) -> (TResult, f64) {
        match self.send(ControlRequest::GetParamValueByString {
            instance_id: self.instance_id,
            param_id,
            string,
        }) {
            Ok(ControlResponse::ValueResult { result, value }) => (result, value),
            _ => (result::INTERNAL_ERROR, 0.0),
        }
    }

    pub fn normalized_param_to_plain(&self, param_id: u32, value_normalized: f64) -> f64 {
        match self.send(ControlRequest::NormalizedParamToPlain {
            instance_id: self.instance_id,
            param_id,
            value_normalized,
        }) {
            Ok(ControlResponse::Value(value)) => value,
            _ => 0.0,
        }
    }

    pub fn plain_param_to_normalized(&self, param_id: u32, plain_value: f64) -> f64 {
        match self.send(ControlRequest::PlainParamToNormalized {
            instance_id: self.instance_id,
            param_id,
            plain_value,
        }) {
            Ok(ControlResponse::Value(value)) => value,
            _ => 0.0,
        }
    }

    pub fn param_normalized(&self, param_id: u32) -> f64 {
        match self.send(ControlRequest::GetParamNormalized {
            instance_id: self.instance_id,
            param_id,
        }) {
            Ok(ControlResponse::Value(value)) => value,
            _ => 0.0,
        }
    }

    pub fn set_param_normalized(&self, param_id: u32, value: f64) -> TResult {
        self.send_result(ControlRequest::SetParamNormalized {
            instance_id: self.instance_id,
            param_id,
            value,
        })
    }

    /// Create the editor-view proxy. Its lifetime is managed by the host; a
    /// weak pointer is kept so `resizeView` callbacks reach the right view.
    pub fn create_view(self: &Arc<Self>, name: &str) -> Option<Arc<Vst3PlugViewProxy>> {
        match self.send(ControlRequest::CreateView {
            instance_id: self.instance_id,
            name: name.to_string(),
        }) {
            Ok(ControlResponse::View { created: true, size }) => {
                let view = Arc::new(Vst3PlugViewProxy {
                    bridge: Arc::clone(&self.bridge),
                    instance_id: self.instance_id,
                    frame: Mutex::new(None),
                    last_size: Mutex::new(size),
                });
                *self.last_created_view.lock() = Arc::downgrade(&view);
                Some(view)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "createView failed");
                None
            }
        }
    }

    // -- unit and program information ---------------------------------------

    pub fn unit_count(&self) -> i32 {
        match self.send(ControlRequest::GetUnitCount {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::Count(count)) => count,
            _ => 0,
        }
    }

    pub fn unit_info(&self, unit_index: i32) -> (TResult, UnitInfo) {
        match self.send(ControlRequest::GetUnitInfo {
            instance_id: self.instance_id,
            unit_index,
        }) {
            Ok(ControlResponse::UnitInfo { result, info }) => (result, info),
            _ => (result::INTERNAL_ERROR, UnitInfo::default()),
        }
    }

    pub fn program_list_count(&self) -> i32 {
        match self.send(ControlRequest::GetProgramListCount {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::Count(count)) => count,
            _ => 0,
        }
    }

    pub fn program_list_info(&self, list_index: i32) -> (TResult, ProgramListInfo) {
        match self.send(ControlRequest::GetProgramListInfo {
            instance_id: self.instance_id,
            list_index,
        }) {
            Ok(ControlResponse::ProgramListInfo { result, info }) => (result, info),
            _ => (result::INTERNAL_ERROR, ProgramListInfo::default()),
        }
    }

    pub fn program_name(&self, list_id: i32, program_index: i32) -> (TResult, String) {
        match self.send(ControlRequest::GetProgramName {
            instance_id: self.instance_id,
            list_id,
            program_index,
        }) {
            Ok(ControlResponse::Text { result, text }) => (result, text),
            _ => (result::INTERNAL_ERROR, String::new()),
        }
    }

    pub fn program_data_supported(&self, list_id: i32) -> TResult {
        self.send_result(ControlRequest::ProgramDataSupported {
            instance_id: self.instance_id,
            list_id,
        })
    }

    pub fn program_data(&self, list_id: i32, program_index: i32, stream: &mut dyn Write) -> TResult {
        match self.send(ControlRequest::GetProgramData {
            instance_id: self.instance_id,
            list_id,
            program_index,
        }) {
            Ok(ControlResponse::State { result: code, data }) => {
                if stream.write_all(&data).is_err() {
                    return result::INTERNAL_ERROR;
                }
                code
            }
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn set_program_data(
        &self,
        list_id: i32,
        program_index: i32,
        stream: &mut dyn Read,
    ) -> TResult {
        let mut data = Vec::new();
        if stream.read_to_end(&mut data).is_err() {
            return result::INVALID_ARGUMENT;
        }
        self.send_result(ControlRequest::SetProgramData {
            instance_id: self.instance_id,
            list_id,
            program_index,
            data,
        })
    }

    pub fn unit_data_supported(&self, unit_id: i32) -> TResult {
        self.send_result(ControlRequest::UnitDataSupported {
            instance_id: self.instance_id,
            unit_id,
        })
    }

    pub fn unit_data(&self, unit_id: i32, stream: &mut dyn Write) -> TResult {
        match self.send(ControlRequest::GetUnitData {
            instance_id: self.instance_id,
            unit_id,
        }) {
            Ok(ControlResponse::State { result: code, data }) => {
                if stream.write_all(&data).is_err() {
                    return result::INTERNAL_ERROR;
                }
                code
            }
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn set_unit_data(&self, unit_id: i32, stream: &mut dyn Read) -> TResult {
        let mut data = Vec::new();
        if stream.read_to_end(&mut data).is_err() {
            return result::INVALID_ARGUMENT;
        }
        self.send_result(ControlRequest::SetUnitData {
            instance_id: self.instance_id,
            unit_id,
            data,
        })
    }

    // -- audio processor -----------------------------------------------------

    fn send_audio(&self, request: ProcessorRequest) -> crate::error::Result<ProcessorResponse> {
        self.bridge.send_audio(request)
    }

    pub fn set_bus_arrangements(&self, inputs: Vec<u64>, outputs: Vec<u64>) -> TResult {
        match self.send_audio(ProcessorRequest::SetBusArrangements {
            instance_id: self.instance_id,
            inputs,
            outputs,
        }) {
            Ok(ProcessorResponse::Result(code)) => code,
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn bus_arrangement(&self, direction: i32, index: i32) -> (TResult, u64) {
        match self.send_audio(ProcessorRequest::GetBusArrangement {
            instance_id: self.instance_id,
            direction,
            index,
        }) {
            Ok(ProcessorResponse::Arrangement {
                result,
                arrangement,
            }) => (result, arrangement),
            _ => (result::INTERNAL_ERROR, 0),
        }
    }

    pub fn can_process_sample_size(&self, double_precision: bool) -> TResult {
        match self.send_audio(ProcessorRequest::CanProcessSampleSize {
            instance_id: self.instance_id,
            double_precision,
        }) {
            Ok(ProcessorResponse::Result(code)) => code,
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn latency_samples(&self) -> u32 {
        match self.send_audio(ProcessorRequest::GetLatencySamples {
            instance_id: self.instance_id,
        }) {
            Ok(ProcessorResponse::Samples(samples)) => samples,
            _ => 0,
        }
    }

    pub fn tail_samples(&self) -> u32 {
        match self.send_audio(ProcessorRequest::GetTailSamples {
            instance_id: self.instance_id,
        }) {
            Ok(ProcessorResponse::Samples(samples)) => samples,
            _ => 0,
        }
    }

    /// Negotiate processing and map the shared audio buffer the plugin side
    /// laid out for the agreed bus configuration.
    pub fn setup_processing(&self, setup: ProcessSetup) -> TResult {
        match self.send_audio(ProcessorRequest::SetupProcessing {
            instance_id: self.instance_id,
            setup,
        }) {
            Ok(ProcessorResponse::SetupDone {
                result: code,
                shm_config,
            }) => {
                match AudioShmBuffer::open(shm_config) {
                    Ok(buffer) => *self.process_buffers.lock() = Some(buffer),
                    Err(e) => {
                        tracing::error!(error = %e, "could not map the shared audio buffer");
                        return result::INTERNAL_ERROR;
                    }
                }
                code
            }
            Ok(ProcessorResponse::Result(code)) => code,
            _ => result::INTERNAL_ERROR,
        }
    }

    pub fn set_processing(&self, state: bool) -> TResult {
        match self.send_audio(ProcessorRequest::SetProcessing {
            instance_id: self.instance_id,
            state,
        }) {
            Ok(ProcessorResponse::Result(code)) => code,
            _ => result::INTERNAL_ERROR,
        }
    }

    /// One processing call. Channel slices are flattened bus-major, matching
    /// the shared buffer layout negotiated in [`Self::setup_processing`].
    pub fn process<T: Copy + Default>(
        &self,
        data: ProcessData,
        inputs: &[&[T]],
        outputs: &mut [&mut [T]],
    ) -> ProcessOutput {
        let failed = || ProcessOutput {
            result: result::INTERNAL_ERROR,
            ..ProcessOutput::default()
        };

        let buffers = self.process_buffers.lock();
        let Some(buffers) = buffers.as_ref() else {
            tracing::error!("process() before setup, dropping block");
            return failed();
        };

        let mut channel = 0;
        let config = buffers.config().clone();
        for (bus, &bus_channels) in config.input_channels.iter().enumerate() {
            for bus_channel in 0..bus_channels as usize {
                let Some(input) = inputs.get(channel) else {
                    break;
                };
                if buffers.write_input(bus, bus_channel, input).is_err() {
                    return failed();
                }
                channel += 1;
            }
        }

        let response = self.send_audio(ProcessorRequest::Process {
            instance_id: self.instance_id,
            data,
        });
        let output = match response {
            Ok(ProcessorResponse::Processed(output)) => output,
            _ => return failed(),
        };

        let mut channel = 0;
        for (bus, &bus_channels) in config.output_channels.iter().enumerate() {
            for bus_channel in 0..bus_channels as usize {
                let Some(target) = outputs.get_mut(channel) else {
                    break;
                };
                let _ = buffers.read_output_into(bus, bus_channel, target);
                channel += 1;
            }
        }

        output
    }
}

impl Drop for Vst3PluginProxy {
    fn drop(&mut self) {
        if let Err(e) = self.bridge.send(ControlRequest::Destruct {
            instance_id: self.instance_id,
        }) {
            tracing::debug!(error = %e, "plugin side was already gone during destruct");
        }
        self.bridge.registry().unregister(self.instance_id);
    }
}

/// Proxy for the editor view created by [`Vst3PluginProxy::create_view`].
pub struct Vst3PlugViewProxy {
    bridge: Arc<Vst3PluginBridge>,
    instance_id: InstanceId,
    pub(super) frame: Mutex<Option<Arc<dyn PlugFrame>>>,
    last_size: Mutex<ViewRect>,
}

impl Vst3PlugViewProxy {
    fn send_result(&self, request: ControlRequest) -> TResult {
        match self.bridge.send(request) {
            Ok(ControlResponse::Result(code)) => code,
            Ok(other) => {
                tracing::warn!(?other, "mis-shaped view response");
                result::INTERNAL_ERROR
            }
            Err(e) => {
                tracing::error!(error = %e, "view call failed");
                result::INTERNAL_ERROR
            }
        }
    }

    /// Embed the view. The parent window handle travels as an integer.
    pub fn attached(&self, parent: u64, platform_type: &str) -> TResult {
        self.send_result(ControlRequest::ViewAttached {
            instance_id: self.instance_id,
            parent,
            platform_type: platform_type.to_string(),
        })
    }

    pub fn removed(&self) -> TResult {
        self.send_result(ControlRequest::ViewRemoved {
            instance_id: self.instance_id,
        })
    }

    pub fn size(&self) -> (TResult, ViewRect) {
        match self.bridge.send(ControlRequest::ViewGetSize {
            instance_id: self.instance_id,
        }) {
            Ok(ControlResponse::Size { result: code, size }) => {
                *self.last_size.lock() = size;
                (code, size)
            }
            _ => (result::INTERNAL_ERROR, *self.last_size.lock()),
        }
    }

    pub fn on_size(&self, new_size: ViewRect) -> TResult {
        *self.last_size.lock() = new_size;
        self.send_result(ControlRequest::ViewOnSize {
            instance_id: self.instance_id,
            new_size,
        })
    }

    pub fn can_resize(&self) -> TResult {
        self.send_result(ControlRequest::ViewCanResize {
            instance_id: self.instance_id,
        })
    }

    /// The plugin may adjust the proposed rectangle; the possibly updated
    /// value comes back with the result code.
    pub fn check_size_constraint(&self, rect: ViewRect) -> (TResult, ViewRect) {
        match self.bridge.send(ControlRequest::ViewCheckSizeConstraint {
            instance_id: self.instance_id,
            rect,
        }) {
            Ok(ControlResponse::Size { result: code, size }) => (code, size),
            _ => (result::INTERNAL_ERROR, rect),
        }
    }

    /// Store the host's frame; `resizeView` callbacks are routed to it.
    pub fn set_frame(&self, frame: Arc<dyn PlugFrame>) {
        *self.frame.lock() = Some(frame);
    }
}

impl Drop for Vst3PlugViewProxy {
    fn drop(&mut self) {
        if let Err(e) = self.bridge.send(ControlRequest::DestroyView {
            instance_id: self.instance_id,
        }) {
            tracing::debug!(error = %e, "plugin side was already gone during view destruct");
        }
    }
}
