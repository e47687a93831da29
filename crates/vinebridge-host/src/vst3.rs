//! Hosting a real modern-ABI plugin: object registry, interface probing,
//! and the control/audio receive loops.

use crate::c_api::{
    self, get_vtbl, result, FUnknownVtbl, IAudioProcessorVtbl, IComponentVtbl,
    IConnectionPointVtbl, IEditControllerVtbl, IPlugViewVtbl, IPluginFactoryVtbl,
    IProgramListDataVtbl, IUnitDataVtbl, IUnitInfoVtbl, RawAudioBusBuffers, RawBusInfo,
    RawParameterInfo, RawProcessContext, RawProcessData, RawProcessSetup, RawProgramListInfo,
    RawUnitInfo, RawViewRect, String128, TResult, Tuid,
};
use crate::shims::{
    release_interface, BStreamShim, CallbackChannel, ComponentHandlerShim, ConnectionPointShim,
    EventListShim, HostApplicationShim, MessageShim, ParameterChangesShim, PlugFrameShim,
};
use libloading::Library;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use vinebridge::channels::{
    connect_by, vst3_sockets, EventChannel, RequestChannel, SocketGroup, HANDSHAKE_TIMEOUT,
};
use vinebridge::error::{BridgeError, Result};
use vinebridge::protocol::vst3::{
    BusInfo, Capabilities, ConnectTarget, ControlRequest, ControlResponse, InstanceId,
    ParameterInfo, ProcessData, ProcessOutput, ProcessorRequest, ProcessorResponse,
    ProgramListInfo, UnitInfo, ViewRect,
};
use vinebridge::protocol::{AudioShmConfig, VersionInfo};
use vinebridge::rt::{self, ScopedFlushToZero};
use vinebridge::shm::AudioShmBuffer;

type FactoryEntry = unsafe extern "system" fn() -> *mut c_void;
type ModuleInitEntry = unsafe extern "system" fn() -> u8;

const MEDIA_TYPE_AUDIO: i32 = 0;
const DIRECTION_INPUT: i32 = 0;
const DIRECTION_OUTPUT: i32 = 1;

/// One plugin object this process hosts, with the interface pointers that
/// were discovered when it was created.
struct HostedObject {
    object: *mut c_void,
    audio_processor: *mut c_void,
    controller: *mut c_void,
    connection_point: *mut c_void,
    unit_info: *mut c_void,
    unit_data: *mut c_void,
    program_list_data: *mut c_void,
    capabilities: Capabilities,

    view: *mut c_void,
    host_context: *mut c_void,
    component_handler: *mut c_void,
    connection_shim: *mut c_void,
    frame_shim: *mut c_void,

    buffers: Option<Arc<AudioShmBuffer>>,
    double_precision: bool,
}

// SAFETY: objects are only touched from the control and audio receive
// loops, which serialise access through the registry mutex.
unsafe impl Send for HostedObject {}

impl HostedObject {
    unsafe fn release_all(&mut self) {
        for pointer in [
            self.view,
            self.frame_shim,
            self.connection_shim,
            self.component_handler,
            self.host_context,
            self.program_list_data,
            self.unit_data,
            self.unit_info,
            self.connection_point,
            self.controller,
            self.audio_processor,
            self.object,
        ] {
            if !pointer.is_null() {
                release_interface(pointer);
            }
        }
    }
}

pub struct Vst3PluginHost {
    registry: Mutex<HashMap<InstanceId, HostedObject>>,
    next_instance_id: AtomicU64,
    callback: CallbackChannel,
    factory: *mut c_void,
    shm_base: String,
}

unsafe impl Send for Vst3PluginHost {}
unsafe impl Sync for Vst3PluginHost {}

/// Connect to the stub's socket group, load the plugin module, and serve
/// requests until the stub disconnects.
pub fn run(socket_dir: &std::path::Path, module_path: &std::path::Path) -> Result<()> {
    let group = SocketGroup::attach(socket_dir);
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

    let mut control: EventChannel<ControlRequest, ControlResponse> =
        EventChannel::new(connect_by(&group.socket_path(vst3_sockets::CONTROL), deadline)?);
    let callback_stream = connect_by(&group.socket_path(vst3_sockets::CALLBACK), deadline)?;
    let audio_stream = connect_by(&group.socket_path(vst3_sockets::AUDIO), deadline)?;

    let stub_version: VersionInfo = control.receive_raw()?;
    control.send_raw(&VersionInfo::current())?;
    if stub_version != VersionInfo::current() {
        tracing::warn!(
            stub = %stub_version.version,
            host = %VersionInfo::current().version,
            "version mismatch between stub and host process"
        );
    }

    let library = unsafe { Library::new(module_path) }.map_err(|e| BridgeError::ModuleLoad {
        path: module_path.to_path_buf(),
        reason: e.to_string(),
    })?;

    // Foreign modules export an optional init hook next to the factory
    // entry point.
    if let Ok(init) = unsafe { library.get::<ModuleInitEntry>(b"InitDll") } {
        unsafe { init() };
    }
    let factory_entry: libloading::Symbol<FactoryEntry> =
        unsafe { library.get(b"GetPluginFactory") }.map_err(|e| BridgeError::ModuleLoad {
            path: module_path.to_path_buf(),
            reason: format!("no factory entry point: {e}"),
        })?;
    let factory = unsafe { factory_entry() };
    if factory.is_null() {
        return Err(BridgeError::ModuleLoad {
            path: module_path.to_path_buf(),
            reason: "module returned no factory".into(),
        });
    }
    tracing::info!(path = %module_path.display(), "plugin module loaded");

    let host = Arc::new(Vst3PluginHost {
        registry: Mutex::new(HashMap::new()),
        next_instance_id: AtomicU64::new(1),
        callback: Arc::new(RequestChannel::new(callback_stream)),
        factory,
        shm_base: group.shm_name(),
    });

    let audio_worker = {
        let host = Arc::clone(&host);
        let mut channel: EventChannel<ProcessorRequest, ProcessorResponse> =
            EventChannel::new(audio_stream);
        std::thread::Builder::new().name("audio".into()).spawn(move || {
            rt::set_realtime_priority(true, rt::DEFAULT_REALTIME_PRIORITY);
            while let Ok(request) = channel.receive() {
                let response = host.handle_audio(request);
                if channel.reply(&response).is_err() {
                    break;
                }
            }
        })?
    };

    loop {
        let request = match control.receive() {
            Ok(request) => request,
            Err(e) => {
                tracing::info!(error = %e, "control channel closed, shutting down");
                break;
            }
        };
        let response = host.handle_control(request);
        if control.reply(&response).is_err() {
            break;
        }
    }

    // Orderly teardown: every object the stub leaked by crashing is still
    // released before the module goes away.
    {
        let mut registry = host.registry.lock();
        for (_, mut object) in registry.drain() {
            unsafe { object.release_all() };
        }
    }
    unsafe { release_interface(host.factory) };
    host.callback.shutdown();
    let _ = audio_worker.join();

    if let Ok(exit) = unsafe { library.get::<ModuleInitEntry>(b"ExitDll") } {
        unsafe { exit() };
    }
    Ok(())
}

/// Query an interface, returning null when unsupported.
unsafe fn query_interface(object: *mut c_void, iid: &Tuid) -> *mut c_void {
    let mut out: *mut c_void = std::ptr::null_mut();
    let vtbl = get_vtbl::<FUnknownVtbl>(object);
    if (vtbl.query_interface)(object, iid, &mut out) != result::OK {
        return std::ptr::null_mut();
    }
    out
}

impl Vst3PluginHost {
    fn handle_control(&self, request: ControlRequest) -> ControlResponse {
        use ControlRequest as Req;
        use ControlResponse as Resp;

        match request {
            Req::CreateInstance { cid } => self.create_instance(cid),
            Req::Destruct { instance_id } => {
                let mut registry = self.registry.lock();
                match registry.remove(&instance_id) {
                    Some(mut object) => {
                        unsafe { object.release_all() };
                        Resp::Result(result::OK)
                    }
                    None => Resp::Result(result::INVALID_ARGUMENT),
                }
            }
            Req::Initialize {
                instance_id,
                host_name,
            } => self.with_object(instance_id, |object| {
                let context = HostApplicationShim::new(host_name.clone()) as *mut c_void;
                object.host_context = context;
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).initialize)(object.object, context)
                };
                Resp::Result(code)
            }),
            Req::Terminate { instance_id } => self.with_object(instance_id, |object| {
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).terminate)(object.object)
                };
                Resp::Result(code)
            }),
            Req::SetComponentHandler { instance_id } => {
                let callback = Arc::clone(&self.callback);
                self.with_object(instance_id, |object| {
                    let Some(controller) = controller_of(object) else {
                        return Resp::Result(result::NOT_IMPLEMENTED);
                    };
                    let shim =
                        ComponentHandlerShim::new(instance_id, Arc::clone(&callback)) as *mut c_void;
                    object.component_handler = shim;
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).set_component_handler)(
                            controller, shim,
                        )
                    };
                    Resp::Result(code)
                })
            }
            Req::Connect { instance_id, other } => self.connect(instance_id, other),
            Req::Disconnect { instance_id, other } => self.disconnect(instance_id, other),
            Req::Notify {
                instance_id,
                message,
            } => self.with_object(instance_id, |object| {
                if object.connection_point.is_null() {
                    return Resp::Result(result::NOT_IMPLEMENTED);
                }
                let shim = MessageShim::from_wire(&message);
                let code = unsafe {
                    let code = (get_vtbl::<IConnectionPointVtbl>(object.connection_point).notify)(
                        object.connection_point,
                        shim as *mut c_void,
                    );
                    release_interface(shim as *mut c_void);
                    code
                };
                Resp::Result(code)
            }),
            Req::GetControllerClassId { instance_id } => {
                self.with_object(instance_id, |object| {
                    let mut cid = Tuid::default();
                    let code = unsafe {
                        (get_vtbl::<IComponentVtbl>(object.object).get_controller_class_id)(
                            object.object,
                            &mut cid,
                        )
                    };
                    Resp::ClassId { result: code, cid }
                })
            }
            Req::SetIoMode { instance_id, mode } => self.with_object(instance_id, |object| {
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).set_io_mode)(object.object, mode)
                };
                Resp::Result(code)
            }),
            Req::GetBusCount {
                instance_id,
                media_type,
                direction,
            } => self.with_object(instance_id, |object| {
                let count = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).get_bus_count)(
                        object.object,
                        media_type,
                        direction,
                    )
                };
                Resp::Count(count)
            }),
            Req::GetBusInfo {
                instance_id,
                media_type,
                direction,
                index,
            } => self.with_object(instance_id, |object| {
                let mut raw: RawBusInfo = unsafe { std::mem::zeroed() };
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).get_bus_info)(
                        object.object,
                        media_type,
                        direction,
                        index,
                        &mut raw,
                    )
                };
                Resp::BusInfo {
                    result: code,
                    info: BusInfo {
                        media_type: raw.media_type,
                        direction: raw.direction,
                        channel_count: raw.channel_count,
                        name: c_api::read_string128(&raw.name),
                        bus_type: raw.bus_type,
                        flags: raw.flags,
                    },
                }
            }),
            Req::ActivateBus {
                instance_id,
                media_type,
                direction,
                index,
                state,
            } => self.with_object(instance_id, |object| {
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).activate_bus)(
                        object.object,
                        media_type,
                        direction,
                        index,
                        state as u8,
                    )
                };
                Resp::Result(code)
            }),
            Req::SetActive { instance_id, state } => self.with_object(instance_id, |object| {
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).set_active)(
                        object.object,
                        state as u8,
                    )
                };
                Resp::Result(code)
            }),
            Req::GetState { instance_id } => self.with_object(instance_id, |object| {
                let stream = BStreamShim::new(Vec::new());
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).get_state)(
                        object.object,
                        stream as *mut c_void,
                    )
                };
                let data = unsafe { BStreamShim::data(stream) };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::State { result: code, data }
            }),
            Req::SetState { instance_id, data } => self.with_object(instance_id, |object| {
                let stream = BStreamShim::new(data.clone());
                let code = unsafe {
                    (get_vtbl::<IComponentVtbl>(object.object).set_state)(
                        object.object,
                        stream as *mut c_void,
                    )
                };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::Result(code)
            }),
            Req::SetComponentState { instance_id, data } => {
                self.with_object(instance_id, |object| {
                    let Some(controller) = controller_of(object) else {
                        return Resp::Result(result::NOT_IMPLEMENTED);
                    };
                    let stream = BStreamShim::new(data.clone());
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).set_component_state)(
                            controller,
                            stream as *mut c_void,
                        )
                    };
                    unsafe { release_interface(stream as *mut c_void) };
                    Resp::Result(code)
                })
            }
            Req::GetParameterCount { instance_id } => self.with_controller(
                instance_id,
                Resp::Count(0),
                |controller| {
                    let count = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).get_parameter_count)(
                            controller,
                        )
                    };
                    Resp::Count(count)
                },
            ),
            Req::GetParameterInfo {
                instance_id,
                param_index,
            } => self.with_controller(
                instance_id,
                Resp::ParameterInfo {
                    result: result::NOT_IMPLEMENTED,
                    info: ParameterInfo::default(),
                },
                |controller| {
                    let mut raw: RawParameterInfo = unsafe { std::mem::zeroed() };
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).get_parameter_info)(
                            controller,
                            param_index,
                            &mut raw,
                        )
                    };
                    Resp::ParameterInfo {
                        result: code,
                        info: ParameterInfo {
                            id: raw.id,
                            title: c_api::read_string128(&raw.title),
                            short_title: c_api::read_string128(&raw.short_title),
                            units: c_api::read_string128(&raw.units),
                            step_count: raw.step_count,
                            default_normalized_value: raw.default_normalized_value,
                            unit_id: raw.unit_id,
                            flags: raw.flags,
                        },
                    }
                },
            ),
            Req::GetParamStringByValue {
                instance_id,
                param_id,
                value_normalized,
            } => self.with_controller(
                instance_id,
                Resp::Text {
                    result: result::NOT_IMPLEMENTED,
                    text: String::new(),
                },
                |controller| {
                    let mut buffer: String128 = [0; 128];
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).get_param_string_by_value)(
                            controller,
                            param_id,
                            value_normalized,
                            &mut buffer,
                        )
                    };
                    Resp::Text {
                        result: code,
                        text: c_api::read_string128(&buffer),
                    }
                },
            ),
            Req::GetParamValueByString {
                instance_id,
                param_id,
                string,
            } => self.with_controller(
                instance_id,
                Resp::ValueResult {
                    result: result::NOT_IMPLEMENTED,
                    value: 0.0,
                },
                |controller| {
                    let wide = c_api::to_utf16_null(&string);
                    let mut value = 0.0;
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).get_param_value_by_string)(
                            controller,
                            param_id,
                            wide.as_ptr(),
                            &mut value,
                        )
                    };
                    Resp::ValueResult {
                        result: code,
                        value,
                    }
                },
            ),
            Req::NormalizedParamToPlain {
                instance_id,
                param_id,
                value_normalized,
            } => self.with_controller(instance_id, Resp::Value(0.0), |controller| {
                let value = unsafe {
                    (get_vtbl::<IEditControllerVtbl>(controller).normalized_param_to_plain)(
                        controller,
                        param_id,
                        value_normalized,
                    )
                };
                Resp::Value(value)
            }),
            Req::PlainParamToNormalized {
                instance_id,
                param_id,
                plain_value,
            } => self.with_controller(instance_id, Resp::Value(0.0), |controller| {
                let value = unsafe {
                    (get_vtbl::<IEditControllerVtbl>(controller).plain_param_to_normalized)(
                        controller,
                        param_id,
                        plain_value,
                    )
                };
                Resp::Value(value)
            }),
            Req::GetParamNormalized {
                instance_id,
                param_id,
            } => self.with_controller(instance_id, Resp::Value(0.0), |controller| {
                let value = unsafe {
                    (get_vtbl::<IEditControllerVtbl>(controller).get_param_normalized)(
                        controller, param_id,
                    )
                };
                Resp::Value(value)
            }),
            Req::SetParamNormalized {
                instance_id,
                param_id,
                value,
            } => self.with_controller(
                instance_id,
                Resp::Result(result::NOT_IMPLEMENTED),
                |controller| {
                    let code = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).set_param_normalized)(
                            controller, param_id, value,
                        )
                    };
                    Resp::Result(code)
                },
            ),
            Req::CreateView { instance_id, name } => {
                let callback = Arc::clone(&self.callback);
                self.with_object(instance_id, |object| {
                    let Some(controller) = controller_of(object) else {
                        return Resp::View {
                            created: false,
                            size: ViewRect::default(),
                        };
                    };
                    let name = CString::new(name.as_str()).unwrap_or_default();
                    let view = unsafe {
                        (get_vtbl::<IEditControllerVtbl>(controller).create_view)(
                            controller,
                            name.as_ptr(),
                        )
                    };
                    if view.is_null() {
                        return Resp::View {
                            created: false,
                            size: ViewRect::default(),
                        };
                    }

                    // Route future resize requests back to the stub.
                    let frame = PlugFrameShim::new(instance_id, Arc::clone(&callback));
                    let mut size = RawViewRect::default();
                    unsafe {
                        (get_vtbl::<IPlugViewVtbl>(view).set_frame)(view, frame as *mut c_void);
                        (get_vtbl::<IPlugViewVtbl>(view).get_size)(view, &mut size);
                    }
                    object.view = view;
                    object.frame_shim = frame as *mut c_void;
                    Resp::View {
                        created: true,
                        size: ViewRect {
                            left: size.left,
                            top: size.top,
                            right: size.right,
                            bottom: size.bottom,
                        },
                    }
                })
            }
            Req::DestroyView { instance_id } => self.with_object(instance_id, |object| {
                if !object.view.is_null() {
                    unsafe { release_interface(object.view) };
                    object.view = std::ptr::null_mut();
                }
                Resp::Result(result::OK)
            }),
            Req::ViewAttached {
                instance_id,
                parent,
                platform_type,
            } => self.with_view(instance_id, |view| {
                let platform = CString::new(platform_type.as_str()).unwrap_or_default();
                let code = unsafe {
                    (get_vtbl::<IPlugViewVtbl>(view).attached)(
                        view,
                        parent as usize as *mut c_void,
                        platform.as_ptr(),
                    )
                };
                Resp::Result(code)
            }),
            Req::ViewRemoved { instance_id } => self.with_view(instance_id, |view| {
                let code = unsafe { (get_vtbl::<IPlugViewVtbl>(view).removed)(view) };
                Resp::Result(code)
            }),
            Req::ViewGetSize { instance_id } => self.with_view(instance_id, |view| {
                let mut size = RawViewRect::default();
                let code = unsafe { (get_vtbl::<IPlugViewVtbl>(view).get_size)(view, &mut size) };
                Resp::Size {
                    result: code,
                    size: ViewRect {
                        left: size.left,
                        top: size.top,
                        right: size.right,
                        bottom: size.bottom,
                    },
                }
            }),
            Req::ViewOnSize {
                instance_id,
                new_size,
            } => self.with_view(instance_id, |view| {
                let mut raw = RawViewRect {
                    left: new_size.left,
                    top: new_size.top,
                    right: new_size.right,
                    bottom: new_size.bottom,
                };
                let code = unsafe { (get_vtbl::<IPlugViewVtbl>(view).on_size)(view, &mut raw) };
                Resp::Result(code)
            }),
            Req::ViewCanResize { instance_id } => self.with_view(instance_id, |view| {
                let code = unsafe { (get_vtbl::<IPlugViewVtbl>(view).can_resize)(view) };
                Resp::Result(code)
            }),
            Req::ViewCheckSizeConstraint { instance_id, rect } => {
                self.with_view(instance_id, |view| {
                    let mut raw = RawViewRect {
                        left: rect.left,
                        top: rect.top,
                        right: rect.right,
                        bottom: rect.bottom,
                    };
                    let code = unsafe {
                        (get_vtbl::<IPlugViewVtbl>(view).check_size_constraint)(view, &mut raw)
                    };
                    Resp::Size {
                        result: code,
                        size: ViewRect {
                            left: raw.left,
                            top: raw.top,
                            right: raw.right,
                            bottom: raw.bottom,
                        },
                    }
                })
            }
            Req::GetUnitCount { instance_id } => {
                self.with_unit_info(instance_id, Resp::Count(0), |unit_info| {
                    let count = unsafe {
                        (get_vtbl::<IUnitInfoVtbl>(unit_info).get_unit_count)(unit_info)
                    };
                    Resp::Count(count)
                })
            }
            Req::GetUnitInfo {
                instance_id,
                unit_index,
            } => self.with_unit_info(
                instance_id,
                Resp::UnitInfo {
                    result: result::NOT_IMPLEMENTED,
                    info: UnitInfo::default(),
                },
                |unit_info| {
                    let mut raw: RawUnitInfo = unsafe { std::mem::zeroed() };
                    let code = unsafe {
                        (get_vtbl::<IUnitInfoVtbl>(unit_info).get_unit_info)(
                            unit_info, unit_index, &mut raw,
                        )
                    };
                    Resp::UnitInfo {
                        result: code,
                        info: UnitInfo {
                            id: raw.id,
                            parent_unit_id: raw.parent_unit_id,
                            name: c_api::read_string128(&raw.name),
                            program_list_id: raw.program_list_id,
                        },
                    }
                },
            ),
            Req::GetProgramListCount { instance_id } => {
                self.with_unit_info(instance_id, Resp::Count(0), |unit_info| {
                    let count = unsafe {
                        (get_vtbl::<IUnitInfoVtbl>(unit_info).get_program_list_count)(unit_info)
                    };
                    Resp::Count(count)
                })
            }
            Req::GetProgramListInfo {
                instance_id,
                list_index,
            } => self.with_unit_info(
                instance_id,
                Resp::ProgramListInfo {
                    result: result::NOT_IMPLEMENTED,
                    info: ProgramListInfo::default(),
                },
                |unit_info| {
                    let mut raw: RawProgramListInfo = unsafe { std::mem::zeroed() };
                    let code = unsafe {
                        (get_vtbl::<IUnitInfoVtbl>(unit_info).get_program_list_info)(
                            unit_info, list_index, &mut raw,
                        )
                    };
                    Resp::ProgramListInfo {
                        result: code,
                        info: ProgramListInfo {
                            id: raw.id,
                            name: c_api::read_string128(&raw.name),
                            program_count: raw.program_count,
                        },
                    }
                },
            ),
            Req::GetProgramName {
                instance_id,
                list_id,
                program_index,
            } => self.with_unit_info(
                instance_id,
                Resp::Text {
                    result: result::NOT_IMPLEMENTED,
                    text: String::new(),
                },
                |unit_info| {
                    let mut buffer: String128 = [0; 128];
                    let code = unsafe {
                        (get_vtbl::<IUnitInfoVtbl>(unit_info).get_program_name)(
                            unit_info,
                            list_id,
                            program_index,
                            &mut buffer,
                        )
                    };
                    Resp::Text {
                        result: code,
                        text: c_api::read_string128(&buffer),
                    }
                },
            ),
            Req::ProgramDataSupported {
                instance_id,
                list_id,
            } => self.with_object(instance_id, |object| {
                if object.program_list_data.is_null() {
                    return Resp::Result(result::NOT_IMPLEMENTED);
                }
                let code = unsafe {
                    (get_vtbl::<IProgramListDataVtbl>(object.program_list_data)
                        .program_data_supported)(object.program_list_data, list_id)
                };
                Resp::Result(code)
            }),
            Req::GetProgramData {
                instance_id,
                list_id,
                program_index,
            } => self.with_object(instance_id, |object| {
                if object.program_list_data.is_null() {
                    return Resp::State {
                        result: result::NOT_IMPLEMENTED,
                        data: Vec::new(),
                    };
                }
                let stream = BStreamShim::new(Vec::new());
                let code = unsafe {
                    (get_vtbl::<IProgramListDataVtbl>(object.program_list_data).get_program_data)(
                        object.program_list_data,
                        list_id,
                        program_index,
                        stream as *mut c_void,
                    )
                };
                let data = unsafe { BStreamShim::data(stream) };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::State { result: code, data }
            }),
            Req::SetProgramData {
                instance_id,
                list_id,
                program_index,
                data,
            } => self.with_object(instance_id, |object| {
                if object.program_list_data.is_null() {
                    return Resp::Result(result::NOT_IMPLEMENTED);
                }
                let stream = BStreamShim::new(data.clone());
                let code = unsafe {
                    (get_vtbl::<IProgramListDataVtbl>(object.program_list_data).set_program_data)(
                        object.program_list_data,
                        list_id,
                        program_index,
                        stream as *mut c_void,
                    )
                };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::Result(code)
            }),
            Req::UnitDataSupported {
                instance_id,
                unit_id,
            } => self.with_object(instance_id, |object| {
                if object.unit_data.is_null() {
                    return Resp::Result(result::NOT_IMPLEMENTED);
                }
                let code = unsafe {
                    (get_vtbl::<IUnitDataVtbl>(object.unit_data).unit_data_supported)(
                        object.unit_data,
                        unit_id,
                    )
                };
                Resp::Result(code)
            }),
            Req::GetUnitData {
                instance_id,
                unit_id,
            } => self.with_object(instance_id, |object| {
                if object.unit_data.is_null() {
                    return Resp::State {
                        result: result::NOT_IMPLEMENTED,
                        data: Vec::new(),
                    };
                }
                let stream = BStreamShim::new(Vec::new());
                let code = unsafe {
                    (get_vtbl::<IUnitDataVtbl>(object.unit_data).get_unit_data)(
                        object.unit_data,
                        unit_id,
                        stream as *mut c_void,
                    )
                };
                let data = unsafe { BStreamShim::data(stream) };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::State { result: code, data }
            }),
            Req::SetUnitData {
                instance_id,
                unit_id,
                data,
            } => self.with_object(instance_id, |object| {
                if object.unit_data.is_null() {
                    return Resp::Result(result::NOT_IMPLEMENTED);
                }
                let stream = BStreamShim::new(data.clone());
                let code = unsafe {
                    (get_vtbl::<IUnitDataVtbl>(object.unit_data).set_unit_data)(
                        object.unit_data,
                        unit_id,
                        stream as *mut c_void,
                    )
                };
                unsafe { release_interface(stream as *mut c_void) };
                Resp::Result(code)
            }),
        }
    }

    /// Instantiate the class and probe every interface the bridge supports.
    fn create_instance(&self, cid: Tuid) -> ControlResponse {
        let factory_vtbl = unsafe { get_vtbl::<IPluginFactoryVtbl>(self.factory) };

        let mut object: *mut c_void = std::ptr::null_mut();
        let mut created = unsafe {
            (factory_vtbl.create_instance)(
                self.factory,
                &cid,
                &c_api::IID_ICOMPONENT,
                &mut object,
            )
        };
        if created != result::OK || object.is_null() {
            // Controller-only classes don't implement the component
            // interface.
            created = unsafe {
                (factory_vtbl.create_instance)(
                    self.factory,
                    &cid,
                    &c_api::IID_IEDIT_CONTROLLER,
                    &mut object,
                )
            };
        }
        if created != result::OK || object.is_null() {
            tracing::warn!("factory refused to instantiate the class");
            return ControlResponse::CreateFailed;
        }

        let hosted = unsafe {
            let audio_processor = query_interface(object, &c_api::IID_IAUDIO_PROCESSOR);
            let controller = query_interface(object, &c_api::IID_IEDIT_CONTROLLER);
            let edit_controller2 = query_interface(object, &c_api::IID_IEDIT_CONTROLLER2);
            let connection_point = query_interface(object, &c_api::IID_ICONNECTION_POINT);
            let unit_info = query_interface(object, &c_api::IID_IUNIT_INFO);
            let unit_data = query_interface(object, &c_api::IID_IUNIT_DATA);
            let program_list_data = query_interface(object, &c_api::IID_IPROGRAM_LIST_DATA);
            let midi_mapping = query_interface(object, &c_api::IID_IMIDI_MAPPING);

            let capabilities = Capabilities {
                audio_processor: !audio_processor.is_null(),
                edit_controller: !controller.is_null(),
                edit_controller2: !edit_controller2.is_null(),
                connection_point: !connection_point.is_null(),
                unit_info: !unit_info.is_null(),
                unit_data: !unit_data.is_null(),
                program_list_data: !program_list_data.is_null(),
                midi_mapping: !midi_mapping.is_null(),
            };
            // Only probed for the capability bitmap.
            if !edit_controller2.is_null() {
                release_interface(edit_controller2);
            }
            if !midi_mapping.is_null() {
                release_interface(midi_mapping);
            }

            HostedObject {
                object,
                audio_processor,
                controller,
                connection_point,
                unit_info,
                unit_data,
                program_list_data,
                capabilities,
                view: std::ptr::null_mut(),
                host_context: std::ptr::null_mut(),
                component_handler: std::ptr::null_mut(),
                connection_shim: std::ptr::null_mut(),
                frame_shim: std::ptr::null_mut(),
                buffers: None,
                double_precision: false,
            }
        };

        let instance_id = self.next_instance_id.fetch_add(1, Ordering::Relaxed);
        let capabilities = hosted.capabilities;
        self.registry.lock().insert(instance_id, hosted);
        tracing::debug!(instance_id, ?capabilities, "instance created");

        ControlResponse::Created {
            instance_id,
            capabilities,
        }
    }

    fn connect(&self, instance_id: InstanceId, other: ConnectTarget) -> ControlResponse {
        let mut registry = self.registry.lock();
        match other {
            ConnectTarget::Proxy(other_id) => {
                // Both ends are our objects; connect them directly so their
                // messages never cross the process boundary.
                let other_cp = match registry.get(&other_id) {
                    Some(other) => other.connection_point,
                    None => return ControlResponse::Result(result::INVALID_ARGUMENT),
                };
                let Some(object) = registry.get_mut(&instance_id) else {
                    return ControlResponse::Result(result::INVALID_ARGUMENT);
                };
                if object.connection_point.is_null() || other_cp.is_null() {
                    return ControlResponse::Result(result::NOT_IMPLEMENTED);
                }
                let code = unsafe {
                    (get_vtbl::<IConnectionPointVtbl>(object.connection_point).connect)(
                        object.connection_point,
                        other_cp,
                    )
                };
                ControlResponse::Result(code)
            }
            ConnectTarget::HostMirror => {
                let Some(object) = registry.get_mut(&instance_id) else {
                    return ControlResponse::Result(result::INVALID_ARGUMENT);
                };
                if object.connection_point.is_null() {
                    return ControlResponse::Result(result::NOT_IMPLEMENTED);
                }
                let shim =
                    ConnectionPointShim::new(instance_id, Arc::clone(&self.callback)) as *mut c_void;
                object.connection_shim = shim;
                let code = unsafe {
                    (get_vtbl::<IConnectionPointVtbl>(object.connection_point).connect)(
                        object.connection_point,
                        shim,
                    )
                };
                ControlResponse::Result(code)
            }
        }
    }

    fn disconnect(&self, instance_id: InstanceId, other: Option<InstanceId>) -> ControlResponse {
        let mut registry = self.registry.lock();
        let other_cp = match other {
            Some(other_id) => match registry.get(&other_id) {
                Some(other) => other.connection_point,
                None => return ControlResponse::Result(result::INVALID_ARGUMENT),
            },
            None => std::ptr::null_mut(),
        };
        let Some(object) = registry.get_mut(&instance_id) else {
            return ControlResponse::Result(result::INVALID_ARGUMENT);
        };
        if object.connection_point.is_null() {
            return ControlResponse::Result(result::NOT_IMPLEMENTED);
        }

        let peer = if other.is_some() {
            other_cp
        } else {
            object.connection_shim
        };
        let code = unsafe {
            (get_vtbl::<IConnectionPointVtbl>(object.connection_point).disconnect)(
                object.connection_point,
                peer,
            )
        };
        if other.is_none() && !object.connection_shim.is_null() {
            unsafe { release_interface(object.connection_shim) };
            object.connection_shim = std::ptr::null_mut();
        }
        ControlResponse::Result(code)
    }

    fn handle_audio(&self, request: ProcessorRequest) -> ProcessorResponse {
        use ProcessorRequest as Req;
        use ProcessorResponse as Resp;

        match request {
            Req::SetBusArrangements {
                instance_id,
                mut inputs,
                mut outputs,
            } => self.with_processor(instance_id, |processor| {
                let code = unsafe {
                    (get_vtbl::<IAudioProcessorVtbl>(processor).set_bus_arrangements)(
                        processor,
                        inputs.as_mut_ptr(),
                        inputs.len() as i32,
                        outputs.as_mut_ptr(),
                        outputs.len() as i32,
                    )
                };
                Resp::Result(code)
            }),
            Req::GetBusArrangement {
                instance_id,
                direction,
                index,
            } => self.with_processor(instance_id, |processor| {
                let mut arrangement = 0u64;
                let code = unsafe {
                    (get_vtbl::<IAudioProcessorVtbl>(processor).get_bus_arrangement)(
                        processor,
                        direction,
                        index,
                        &mut arrangement,
                    )
                };
                Resp::Arrangement {
                    result: code,
                    arrangement,
                }
            }),
            Req::CanProcessSampleSize {
                instance_id,
                double_precision,
            } => self.with_processor(instance_id, |processor| {
                let symbolic = if double_precision {
                    c_api::SYMBOLIC_SAMPLE_SIZE_64
                } else {
                    c_api::SYMBOLIC_SAMPLE_SIZE_32
                };
                let code = unsafe {
                    (get_vtbl::<IAudioProcessorVtbl>(processor).can_process_sample_size)(
                        processor, symbolic,
                    )
                };
                Resp::Result(code)
            }),
            Req::GetLatencySamples { instance_id } => {
                self.with_processor(instance_id, |processor| {
                    let samples = unsafe {
                        (get_vtbl::<IAudioProcessorVtbl>(processor).get_latency_samples)(processor)
                    };
                    Resp::Samples(samples)
                })
            }
            Req::GetTailSamples { instance_id } => self.with_processor(instance_id, |processor| {
                let samples = unsafe {
                    (get_vtbl::<IAudioProcessorVtbl>(processor).get_tail_samples)(processor)
                };
                Resp::Samples(samples)
            }),
            Req::SetupProcessing { instance_id, setup } => self.setup_processing(instance_id, setup),
            Req::SetProcessing { instance_id, state } => {
                self.with_processor(instance_id, |processor| {
                    let code = unsafe {
                        (get_vtbl::<IAudioProcessorVtbl>(processor).set_processing)(
                            processor,
                            state as u8,
                        )
                    };
                    Resp::Result(code)
                })
            }
            Req::Process { instance_id, data } => self.process(instance_id, data),
        }
    }

    /// Negotiate processing and lay out the shared audio buffer for the
    /// plugin's current bus configuration.
    fn setup_processing(
        &self,
        instance_id: InstanceId,
        setup: vinebridge::protocol::vst3::ProcessSetup,
    ) -> ProcessorResponse {
        let mut registry = self.registry.lock();
        let Some(object) = registry.get_mut(&instance_id) else {
            return ProcessorResponse::Result(result::INVALID_ARGUMENT);
        };
        if object.audio_processor.is_null() {
            return ProcessorResponse::Result(result::NOT_IMPLEMENTED);
        }

        let mut raw = RawProcessSetup {
            process_mode: setup.process_mode,
            symbolic_sample_size: if setup.double_precision {
                c_api::SYMBOLIC_SAMPLE_SIZE_64
            } else {
                c_api::SYMBOLIC_SAMPLE_SIZE_32
            },
            max_samples_per_block: setup.max_samples_per_block,
            sample_rate: setup.sample_rate,
        };
        let code = unsafe {
            (get_vtbl::<IAudioProcessorVtbl>(object.audio_processor).setup_processing)(
                object.audio_processor,
                &mut raw,
            )
        };

        let bus_channels = |direction: i32| -> Vec<u32> {
            let component_vtbl = unsafe { get_vtbl::<IComponentVtbl>(object.object) };
            let count = unsafe {
                (component_vtbl.get_bus_count)(object.object, MEDIA_TYPE_AUDIO, direction)
            };
            (0..count.max(0))
                .map(|index| {
                    let mut info: RawBusInfo = unsafe { std::mem::zeroed() };
                    let ok = unsafe {
                        (component_vtbl.get_bus_info)(
                            object.object,
                            MEDIA_TYPE_AUDIO,
                            direction,
                            index,
                            &mut info,
                        )
                    };
                    if ok == result::OK {
                        info.channel_count.max(0) as u32
                    } else {
                        0
                    }
                })
                .collect()
        };

        let config = AudioShmConfig {
            name: format!("{}-{instance_id}", self.shm_base),
            input_channels: bus_channels(DIRECTION_INPUT),
            output_channels: bus_channels(DIRECTION_OUTPUT),
            element_size: if setup.double_precision { 8 } else { 4 },
            block_size: setup.max_samples_per_block.max(1) as u32,
        };
        match AudioShmBuffer::create(config.clone()) {
            Ok(buffer) => {
                object.buffers = Some(Arc::new(buffer));
                object.double_precision = setup.double_precision;
                ProcessorResponse::SetupDone {
                    result: code,
                    shm_config: config,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "could not create the shared audio buffer");
                ProcessorResponse::Result(result::INTERNAL_ERROR)
            }
        }
    }

    /// One processing call: assemble the ABI's process data around the
    /// shared-memory channel runs and capture the outputs.
    fn process(&self, instance_id: InstanceId, data: ProcessData) -> ProcessorResponse {
        let mut registry = self.registry.lock();
        let Some(object) = registry.get_mut(&instance_id) else {
            return ProcessorResponse::Result(result::INVALID_ARGUMENT);
        };
        if object.audio_processor.is_null() {
            return ProcessorResponse::Result(result::NOT_IMPLEMENTED);
        }
        let Some(buffers) = object.buffers.clone() else {
            tracing::error!("process() before setup");
            return ProcessorResponse::Result(result::INTERNAL_ERROR);
        };

        if let Some(priority) = data.new_realtime_priority {
            rt::set_realtime_priority(true, priority);
        }
        let _ftz = ScopedFlushToZero::new();

        let config = buffers.config().clone();
        let double_precision = data.double_precision;

        let collect_pointers = |channel_counts: &[u32], input: bool| -> Vec<Vec<*mut c_void>> {
            channel_counts
                .iter()
                .enumerate()
                .map(|(bus, &channels)| {
                    (0..channels as usize)
                        .map(|channel| {
                            let pointer = if double_precision {
                                if input {
                                    buffers.input_ptr::<f64>(bus, channel).map(|p| p as *mut c_void)
                                } else {
                                    buffers
                                        .output_ptr::<f64>(bus, channel)
                                        .map(|p| p as *mut c_void)
                                }
                            } else if input {
                                buffers.input_ptr::<f32>(bus, channel).map(|p| p as *mut c_void)
                            } else {
                                buffers
                                    .output_ptr::<f32>(bus, channel)
                                    .map(|p| p as *mut c_void)
                            };
                            pointer.unwrap_or(std::ptr::null_mut())
                        })
                        .collect()
                })
                .collect()
        };

        let mut input_pointers = collect_pointers(&config.input_channels, true);
        let mut output_pointers = collect_pointers(&config.output_channels, false);
        let mut input_buses: Vec<RawAudioBusBuffers> = input_pointers
            .iter_mut()
            .map(|channels| RawAudioBusBuffers {
                num_channels: channels.len() as i32,
                silence_flags: 0,
                channel_buffers: channels.as_mut_ptr(),
            })
            .collect();
        let mut output_buses: Vec<RawAudioBusBuffers> = output_pointers
            .iter_mut()
            .map(|channels| RawAudioBusBuffers {
                num_channels: channels.len() as i32,
                silence_flags: 0,
                channel_buffers: channels.as_mut_ptr(),
            })
            .collect();

        let input_changes = ParameterChangesShim::from_wire(&data.input_parameter_changes);
        let output_changes = ParameterChangesShim::empty();
        let input_events = EventListShim::from_wire(&data.input_events);
        let output_events = EventListShim::empty();

        let mut context = data.context.map(|context| RawProcessContext {
            state: context.state,
            sample_rate: context.sample_rate,
            project_time_samples: context.project_time_samples,
            system_time: context.system_time,
            continuous_time_samples: context.continuous_time_samples,
            project_time_music: context.project_time_music,
            bar_position_music: context.bar_position_music,
            cycle_start_music: context.cycle_start_music,
            cycle_end_music: context.cycle_end_music,
            tempo: context.tempo,
            time_sig_numerator: context.time_sig_numerator,
            time_sig_denominator: context.time_sig_denominator,
            chord: Default::default(),
            smpte_offset_subframes: 0,
            frame_rate: Default::default(),
            samples_to_next_clock: 0,
        });

        let mut raw = RawProcessData {
            process_mode: data.process_mode,
            symbolic_sample_size: if double_precision {
                c_api::SYMBOLIC_SAMPLE_SIZE_64
            } else {
                c_api::SYMBOLIC_SAMPLE_SIZE_32
            },
            num_samples: data.num_samples,
            num_inputs: input_buses.len() as i32,
            num_outputs: output_buses.len() as i32,
            inputs: input_buses.as_mut_ptr(),
            outputs: output_buses.as_mut_ptr(),
            input_parameter_changes: input_changes as *mut c_void,
            output_parameter_changes: output_changes as *mut c_void,
            input_events: input_events as *mut c_void,
            output_events: output_events as *mut c_void,
            process_context: context
                .as_mut()
                .map(|context| context as *mut RawProcessContext)
                .unwrap_or(std::ptr::null_mut()),
        };

        let code = unsafe {
            (get_vtbl::<IAudioProcessorVtbl>(object.audio_processor).process)(
                object.audio_processor,
                &mut raw,
            )
        };

        let output = ProcessOutput {
            result: code,
            output_parameter_changes: unsafe { ParameterChangesShim::to_wire(output_changes) },
            output_events: unsafe { EventListShim::to_wire(output_events) },
            silence_flags: output_buses.iter().map(|bus| bus.silence_flags).collect(),
        };

        unsafe {
            release_interface(input_changes as *mut c_void);
            release_interface(output_changes as *mut c_void);
            release_interface(input_events as *mut c_void);
            release_interface(output_events as *mut c_void);
        }

        ProcessorResponse::Processed(output)
    }

    fn with_object<F>(&self, instance_id: InstanceId, operate: F) -> ControlResponse
    where
        F: FnOnce(&mut HostedObject) -> ControlResponse,
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(&instance_id) {
            Some(object) => operate(object),
            None => {
                tracing::warn!(instance_id, "request for unknown instance");
                ControlResponse::Result(result::INVALID_ARGUMENT)
            }
        }
    }

    fn with_controller<F>(
        &self,
        instance_id: InstanceId,
        unsupported: ControlResponse,
        operate: F,
    ) -> ControlResponse
    where
        F: FnOnce(*mut c_void) -> ControlResponse,
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(&instance_id) {
            Some(object) => match controller_of(object) {
                Some(controller) => operate(controller),
                None => unsupported,
            },
            None => ControlResponse::Result(result::INVALID_ARGUMENT),
        }
    }

    fn with_unit_info<F>(
        &self,
        instance_id: InstanceId,
        unsupported: ControlResponse,
        operate: F,
    ) -> ControlResponse
    where
        F: FnOnce(*mut c_void) -> ControlResponse,
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(&instance_id) {
            Some(object) if !object.unit_info.is_null() => operate(object.unit_info),
            Some(_) => unsupported,
            None => ControlResponse::Result(result::INVALID_ARGUMENT),
        }
    }

    fn with_view<F>(&self, instance_id: InstanceId, operate: F) -> ControlResponse
    where
        F: FnOnce(*mut c_void) -> ControlResponse,
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(&instance_id) {
            Some(object) if !object.view.is_null() => operate(object.view),
            Some(_) => ControlResponse::Result(result::NOT_IMPLEMENTED),
            None => ControlResponse::Result(result::INVALID_ARGUMENT),
        }
    }

    fn with_processor<F>(&self, instance_id: InstanceId, operate: F) -> ProcessorResponse
    where
        F: FnOnce(*mut c_void) -> ProcessorResponse,
    {
        let mut registry = self.registry.lock();
        match registry.get_mut(&instance_id) {
            Some(object) if !object.audio_processor.is_null() => operate(object.audio_processor),
            Some(_) => ProcessorResponse::Result(result::NOT_IMPLEMENTED),
            None => ProcessorResponse::Result(result::INVALID_ARGUMENT),
        }
    }
}

fn controller_of(object: &HostedObject) -> Option<*mut c_void> {
    if object.controller.is_null() {
        None
    } else {
        Some(object.controller)
    }
}
