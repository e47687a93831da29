//! Reference-counted interface objects this process hands to the plugin:
//! byte streams, the host context with its message factory, and the
//! callback forwarders that route plugin→host calls over the callback
//! channel.

use crate::c_api::{
    self, get_vtbl, result, FUnknownVtbl, IAttributeListVtbl, IBStreamVtbl,
    IComponentHandlerVtbl, IConnectionPointVtbl, IEventListVtbl, IHostApplicationVtbl,
    IMessageVtbl, IParamValueQueueVtbl, IParameterChangesVtbl, IPlugFrameVtbl, RawEvent,
    RawViewRect, String128, TResult, Tuid,
};
use parking_lot::Mutex;
use std::ffi::{c_char, c_void, CStr, CString};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use vinebridge::channels::RequestChannel;
use vinebridge::protocol::vst3::{
    AttributeValue, CallbackRequest, CallbackResponse, Event, NotifyMessage, ParameterPoint,
    ParameterQueue, ViewRect,
};

pub type CallbackChannel = Arc<RequestChannel<CallbackRequest, CallbackResponse>>;

fn send_callback(channel: &CallbackChannel, request: CallbackRequest) -> TResult {
    match channel.send_and_receive(&request) {
        Ok(CallbackResponse::Result(code)) => code,
        Err(e) => {
            tracing::error!(error = %e, "callback channel failed");
            result::INTERNAL_ERROR
        }
    }
}

/// Generate the `FUnknown` boilerplate for a shim object: refcounted
/// lifetime plus interface queries for the listed ids.
macro_rules! funknown_impl {
    ($shim:ident, $query:ident, $add_ref:ident, $release:ident, [$($iid:expr),+]) => {
        unsafe extern "system" fn $query(
            this: *mut c_void,
            iid: *const Tuid,
            obj: *mut *mut c_void,
        ) -> TResult {
            let iid = &*iid;
            if [c_api::IID_FUNKNOWN, $($iid),+].contains(iid) {
                $add_ref(this);
                *obj = this;
                return result::OK;
            }
            *obj = std::ptr::null_mut();
            result::NO_INTERFACE
        }

        unsafe extern "system" fn $add_ref(this: *mut c_void) -> u32 {
            let shim = &*(this as *const $shim);
            shim.refs.fetch_add(1, Ordering::Relaxed) + 1
        }

        unsafe extern "system" fn $release(this: *mut c_void) -> u32 {
            let shim = &*(this as *const $shim);
            let remaining = shim.refs.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 {
                drop(Box::from_raw(this as *mut $shim));
            }
            remaining
        }
    };
}

/// Release an interface pointer through its vtable.
///
/// # Safety
/// `this` must be a valid interface pointer currently holding a reference.
pub unsafe fn release_interface(this: *mut c_void) {
    let vtbl = get_vtbl::<FUnknownVtbl>(this);
    (vtbl.release)(this);
}

// ---------------------------------------------------------------------------
// IBStream over an in-memory buffer

#[repr(C)]
pub struct BStreamShim {
    vtbl: &'static IBStreamVtbl,
    refs: AtomicU32,
    cursor: Mutex<Cursor<Vec<u8>>>,
}

static BSTREAM_VTBL: IBStreamVtbl = IBStreamVtbl {
    base: FUnknownVtbl {
        query_interface: bstream_query_interface,
        add_ref: bstream_add_ref,
        release: bstream_release,
    },
    read: bstream_read,
    write: bstream_write,
    seek: bstream_seek,
    tell: bstream_tell,
};

funknown_impl!(BStreamShim, bstream_query_interface, bstream_add_ref, bstream_release, [c_api::IID_IBSTREAM]);

impl BStreamShim {
    pub fn new(data: Vec<u8>) -> *mut BStreamShim {
        Box::into_raw(Box::new(Self {
            vtbl: &BSTREAM_VTBL,
            refs: AtomicU32::new(1),
            cursor: Mutex::new(Cursor::new(data)),
        }))
    }

    /// The bytes the plugin wrote into the stream.
    ///
    /// # Safety
    /// `this` must be a live `BStreamShim`.
    pub unsafe fn data(this: *mut BStreamShim) -> Vec<u8> {
        (*this).cursor.lock().get_ref().clone()
    }
}

unsafe extern "system" fn bstream_read(
    this: *mut c_void,
    buffer: *mut c_void,
    num_bytes: i32,
    num_bytes_read: *mut i32,
) -> TResult {
    let shim = &*(this as *const BStreamShim);
    let target = std::slice::from_raw_parts_mut(buffer as *mut u8, num_bytes.max(0) as usize);
    let read = shim.cursor.lock().read(target).unwrap_or(0);
    if !num_bytes_read.is_null() {
        *num_bytes_read = read as i32;
    }
    result::OK
}

unsafe extern "system" fn bstream_write(
    this: *mut c_void,
    buffer: *const c_void,
    num_bytes: i32,
    num_bytes_written: *mut i32,
) -> TResult {
    let shim = &*(this as *const BStreamShim);
    let source = std::slice::from_raw_parts(buffer as *const u8, num_bytes.max(0) as usize);
    let written = shim.cursor.lock().write(source).unwrap_or(0);
    if !num_bytes_written.is_null() {
        *num_bytes_written = written as i32;
    }
    result::OK
}

unsafe extern "system" fn bstream_seek(
    this: *mut c_void,
    pos: i64,
    mode: i32,
    result_pos: *mut i64,
) -> TResult {
    let shim = &*(this as *const BStreamShim);
    let seek = match mode {
        0 => SeekFrom::Start(pos.max(0) as u64),
        1 => SeekFrom::Current(pos),
        2 => SeekFrom::End(pos),
        _ => return result::INVALID_ARGUMENT,
    };
    match shim.cursor.lock().seek(seek) {
        Ok(new_pos) => {
            if !result_pos.is_null() {
                *result_pos = new_pos as i64;
            }
            result::OK
        }
        Err(_) => result::INTERNAL_ERROR,
    }
}

unsafe extern "system" fn bstream_tell(this: *mut c_void, pos: *mut i64) -> TResult {
    let shim = &*(this as *const BStreamShim);
    if pos.is_null() {
        return result::INVALID_ARGUMENT;
    }
    *pos = shim.cursor.lock().position() as i64;
    result::OK
}

// ---------------------------------------------------------------------------
// IAttributeList and IMessage

#[repr(C)]
pub struct AttributeListShim {
    vtbl: &'static IAttributeListVtbl,
    refs: AtomicU32,
    values: Mutex<Vec<(String, AttributeValue)>>,
}

static ATTRIBUTE_LIST_VTBL: IAttributeListVtbl = IAttributeListVtbl {
    base: FUnknownVtbl {
        query_interface: attrs_query_interface,
        add_ref: attrs_add_ref,
        release: attrs_release,
    },
    set_int: attrs_set_int,
    get_int: attrs_get_int,
    set_float: attrs_set_float,
    get_float: attrs_get_float,
    set_string: attrs_set_string,
    get_string: attrs_get_string,
    set_binary: attrs_set_binary,
    get_binary: attrs_get_binary,
};

funknown_impl!(AttributeListShim, attrs_query_interface, attrs_add_ref, attrs_release, [c_api::IID_IATTRIBUTE_LIST]);

impl AttributeListShim {
    fn set(&self, id: *const c_char, value: AttributeValue) -> TResult {
        if id.is_null() {
            return result::INVALID_ARGUMENT;
        }
        let key = unsafe { CStr::from_ptr(id) }.to_string_lossy().into_owned();
        let mut values = self.values.lock();
        values.retain(|(existing, _)| *existing != key);
        values.push((key, value));
        result::OK
    }

    fn get(&self, id: *const c_char) -> Option<AttributeValue> {
        if id.is_null() {
            return None;
        }
        let key = unsafe { CStr::from_ptr(id) }.to_string_lossy();
        self.values
            .lock()
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| value.clone())
    }
}

unsafe extern "system" fn attrs_set_int(
    this: *mut c_void,
    id: *const c_char,
    value: i64,
) -> TResult {
    (*(this as *const AttributeListShim)).set(id, AttributeValue::Int(value))
}

unsafe extern "system" fn attrs_get_int(
    this: *mut c_void,
    id: *const c_char,
    value: *mut i64,
) -> TResult {
    match (*(this as *const AttributeListShim)).get(id) {
        Some(AttributeValue::Int(stored)) => {
            *value = stored;
            result::OK
        }
        _ => result::FALSE,
    }
}

unsafe extern "system" fn attrs_set_float(
    this: *mut c_void,
    id: *const c_char,
    value: f64,
) -> TResult {
    (*(this as *const AttributeListShim)).set(id, AttributeValue::Float(value))
}

unsafe extern "system" fn attrs_get_float(
    this: *mut c_void,
    id: *const c_char,
    value: *mut f64,
) -> TResult {
    match (*(this as *const AttributeListShim)).get(id) {
        Some(AttributeValue::Float(stored)) => {
            *value = stored;
            result::OK
        }
        _ => result::FALSE,
    }
}

unsafe extern "system" fn attrs_set_string(
    this: *mut c_void,
    id: *const c_char,
    string: *const u16,
) -> TResult {
    (*(this as *const AttributeListShim)).set(
        id,
        AttributeValue::Str(c_api::read_utf16_ptr(string)),
    )
}

unsafe extern "system" fn attrs_get_string(
    this: *mut c_void,
    id: *const c_char,
    string: *mut u16,
    size_in_bytes: u32,
) -> TResult {
    match (*(this as *const AttributeListShim)).get(id) {
        Some(AttributeValue::Str(stored)) => {
            let capacity = (size_in_bytes as usize / 2).saturating_sub(1);
            let units: Vec<u16> = stored.encode_utf16().take(capacity).collect();
            for (i, unit) in units.iter().enumerate() {
                *string.add(i) = *unit;
            }
            *string.add(units.len()) = 0;
            result::OK
        }
        _ => result::FALSE,
    }
}

unsafe extern "system" fn attrs_set_binary(
    this: *mut c_void,
    id: *const c_char,
    data: *const c_void,
    size_in_bytes: u32,
) -> TResult {
    let bytes = if data.is_null() {
        Vec::new()
    } else {
        std::slice::from_raw_parts(data as *const u8, size_in_bytes as usize).to_vec()
    };
    (*(this as *const AttributeListShim)).set(id, AttributeValue::Binary(bytes))
}

unsafe extern "system" fn attrs_get_binary(
    this: *mut c_void,
    id: *const c_char,
    data: *mut *const c_void,
    size_in_bytes: *mut u32,
) -> TResult {
    let shim = &*(this as *const AttributeListShim);
    if id.is_null() {
        return result::INVALID_ARGUMENT;
    }
    let key = CStr::from_ptr(id).to_string_lossy();
    let values = shim.values.lock();
    match values.iter().find(|(existing, _)| *existing == key) {
        // The pointer refers to the stored bytes; it stays valid until the
        // attribute is overwritten, matching the interface contract.
        Some((_, AttributeValue::Binary(bytes))) => {
            *data = bytes.as_ptr() as *const c_void;
            *size_in_bytes = bytes.len() as u32;
            result::OK
        }
        _ => result::FALSE,
    }
}

/// A message created by our own factory. Only these can be re-serialised
/// for the wire; the attribute list interface has no enumeration primitive,
/// so foreign message objects are opaque.
#[repr(C)]
pub struct MessageShim {
    vtbl: &'static IMessageVtbl,
    refs: AtomicU32,
    message_id: Mutex<CString>,
    attributes: *mut AttributeListShim,
}

static MESSAGE_VTBL: IMessageVtbl = IMessageVtbl {
    base: FUnknownVtbl {
        query_interface: message_query_interface,
        add_ref: message_add_ref,
        release: message_release,
    },
    get_message_id: message_get_id,
    set_message_id: message_set_id,
    get_attributes: message_get_attributes,
};

unsafe extern "system" fn message_query_interface(
    this: *mut c_void,
    iid: *const Tuid,
    obj: *mut *mut c_void,
) -> TResult {
    let iid = &*iid;
    if [c_api::IID_FUNKNOWN, c_api::IID_IMESSAGE].contains(iid) {
        message_add_ref(this);
        *obj = this;
        return result::OK;
    }
    *obj = std::ptr::null_mut();
    result::NO_INTERFACE
}

unsafe extern "system" fn message_add_ref(this: *mut c_void) -> u32 {
    let shim = &*(this as *const MessageShim);
    shim.refs.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn message_release(this: *mut c_void) -> u32 {
    let shim = &*(this as *const MessageShim);
    let remaining = shim.refs.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        let owned = Box::from_raw(this as *mut MessageShim);
        release_interface(owned.attributes as *mut c_void);
    }
    remaining
}

unsafe extern "system" fn message_get_id(this: *mut c_void) -> *const c_char {
    let shim = &*(this as *const MessageShim);
    shim.message_id.lock().as_ptr()
}

unsafe extern "system" fn message_set_id(this: *mut c_void, id: *const c_char) {
    let shim = &*(this as *const MessageShim);
    let new_id = if id.is_null() {
        CString::default()
    } else {
        CString::new(CStr::from_ptr(id).to_bytes()).unwrap_or_default()
    };
    *shim.message_id.lock() = new_id;
}

unsafe extern "system" fn message_get_attributes(this: *mut c_void) -> *mut c_void {
    let shim = &*(this as *const MessageShim);
    shim.attributes as *mut c_void
}

impl MessageShim {
    pub fn new() -> *mut MessageShim {
        let attributes = Box::into_raw(Box::new(AttributeListShim {
            vtbl: &ATTRIBUTE_LIST_VTBL,
            refs: AtomicU32::new(1),
            values: Mutex::new(Vec::new()),
        }));
        Box::into_raw(Box::new(Self {
            vtbl: &MESSAGE_VTBL,
            refs: AtomicU32::new(1),
            message_id: Mutex::new(CString::default()),
            attributes,
        }))
    }

    /// Whether an `IMessage` pointer is one of our own shims, checked by
    /// vtable identity.
    pub fn is_ours(message: *mut c_void) -> bool {
        if message.is_null() {
            return false;
        }
        let vtbl = unsafe { *(message as *mut *const IMessageVtbl) };
        std::ptr::eq(vtbl, &MESSAGE_VTBL)
    }

    /// # Safety
    /// `this` must be a live `MessageShim`.
    pub unsafe fn to_wire(this: *mut MessageShim) -> NotifyMessage {
        let shim = &*this;
        NotifyMessage {
            message_id: shim.message_id.lock().to_string_lossy().into_owned(),
            attributes: (*shim.attributes).values.lock().clone(),
        }
    }

    /// Materialise an inbound wire message for delivery to the plugin.
    pub fn from_wire(message: &NotifyMessage) -> *mut MessageShim {
        let shim = Self::new();
        unsafe {
            *(*shim).message_id.lock() =
                CString::new(message.message_id.as_str()).unwrap_or_default();
            *(*(*shim).attributes).values.lock() = message.attributes.clone();
        }
        shim
    }
}

// ---------------------------------------------------------------------------
// IHostApplication

#[repr(C)]
pub struct HostApplicationShim {
    vtbl: &'static IHostApplicationVtbl,
    refs: AtomicU32,
    name: String,
}

static HOST_APPLICATION_VTBL: IHostApplicationVtbl = IHostApplicationVtbl {
    base: FUnknownVtbl {
        query_interface: host_app_query_interface,
        add_ref: host_app_add_ref,
        release: host_app_release,
    },
    get_name: host_app_get_name,
    create_instance: host_app_create_instance,
};

funknown_impl!(HostApplicationShim, host_app_query_interface, host_app_add_ref, host_app_release, [c_api::IID_IHOST_APPLICATION]);

impl HostApplicationShim {
    pub fn new(name: String) -> *mut HostApplicationShim {
        Box::into_raw(Box::new(Self {
            vtbl: &HOST_APPLICATION_VTBL,
            refs: AtomicU32::new(1),
            name,
        }))
    }
}

unsafe extern "system" fn host_app_get_name(this: *mut c_void, name: *mut String128) -> TResult {
    let shim = &*(this as *const HostApplicationShim);
    if name.is_null() {
        return result::INVALID_ARGUMENT;
    }
    c_api::write_string128(&mut *name, &shim.name);
    result::OK
}

unsafe extern "system" fn host_app_create_instance(
    _this: *mut c_void,
    cid: *const Tuid,
    iid: *const Tuid,
    obj: *mut *mut c_void,
) -> TResult {
    // The only class the host factory vends is the message type.
    if *cid == c_api::IID_IMESSAGE && *iid == c_api::IID_IMESSAGE {
        *obj = MessageShim::new() as *mut c_void;
        return result::OK;
    }
    *obj = std::ptr::null_mut();
    result::NO_INTERFACE
}

// ---------------------------------------------------------------------------
// IComponentHandler forwarding over the callback channel

#[repr(C)]
pub struct ComponentHandlerShim {
    vtbl: &'static IComponentHandlerVtbl,
    refs: AtomicU32,
    instance_id: u64,
    callback: CallbackChannel,
}

static COMPONENT_HANDLER_VTBL: IComponentHandlerVtbl = IComponentHandlerVtbl {
    base: FUnknownVtbl {
        query_interface: handler_query_interface,
        add_ref: handler_add_ref,
        release: handler_release,
    },
    begin_edit: handler_begin_edit,
    perform_edit: handler_perform_edit,
    end_edit: handler_end_edit,
    restart_component: handler_restart_component,
};

funknown_impl!(ComponentHandlerShim, handler_query_interface, handler_add_ref, handler_release, [c_api::IID_ICOMPONENT_HANDLER]);

impl ComponentHandlerShim {
    pub fn new(instance_id: u64, callback: CallbackChannel) -> *mut ComponentHandlerShim {
        Box::into_raw(Box::new(Self {
            vtbl: &COMPONENT_HANDLER_VTBL,
            refs: AtomicU32::new(1),
            instance_id,
            callback,
        }))
    }
}

unsafe extern "system" fn handler_begin_edit(this: *mut c_void, id: u32) -> TResult {
    let shim = &*(this as *const ComponentHandlerShim);
    send_callback(
        &shim.callback,
        CallbackRequest::BeginEdit {
            instance_id: shim.instance_id,
            param_id: id,
        },
    )
}

unsafe extern "system" fn handler_perform_edit(
    this: *mut c_void,
    id: u32,
    value_normalized: f64,
) -> TResult {
    let shim = &*(this as *const ComponentHandlerShim);
    send_callback(
        &shim.callback,
        CallbackRequest::PerformEdit {
            instance_id: shim.instance_id,
            param_id: id,
            value_normalized,
        },
    )
}

unsafe extern "system" fn handler_end_edit(this: *mut c_void, id: u32) -> TResult {
    let shim = &*(this as *const ComponentHandlerShim);
    send_callback(
        &shim.callback,
        CallbackRequest::EndEdit {
            instance_id: shim.instance_id,
            param_id: id,
        },
    )
}

unsafe extern "system" fn handler_restart_component(this: *mut c_void, flags: i32) -> TResult {
    let shim = &*(this as *const ComponentHandlerShim);
    send_callback(
        &shim.callback,
        CallbackRequest::RestartComponent {
            instance_id: shim.instance_id,
            flags,
        },
    )
}

// ---------------------------------------------------------------------------
// IConnectionPoint mirror for a host-owned connection object

#[repr(C)]
pub struct ConnectionPointShim {
    vtbl: &'static IConnectionPointVtbl,
    refs: AtomicU32,
    instance_id: u64,
    callback: CallbackChannel,
}

static CONNECTION_POINT_VTBL: IConnectionPointVtbl = IConnectionPointVtbl {
    base: FUnknownVtbl {
        query_interface: connection_query_interface,
        add_ref: connection_add_ref,
        release: connection_release,
    },
    connect: connection_connect,
    disconnect: connection_disconnect,
    notify: connection_notify,
};

funknown_impl!(ConnectionPointShim, connection_query_interface, connection_add_ref, connection_release, [c_api::IID_ICONNECTION_POINT]);

impl ConnectionPointShim {
    pub fn new(instance_id: u64, callback: CallbackChannel) -> *mut ConnectionPointShim {
        Box::into_raw(Box::new(Self {
            vtbl: &CONNECTION_POINT_VTBL,
            refs: AtomicU32::new(1),
            instance_id,
            callback,
        }))
    }
}

unsafe extern "system" fn connection_connect(_this: *mut c_void, _other: *mut c_void) -> TResult {
    result::OK
}

unsafe extern "system" fn connection_disconnect(
    _this: *mut c_void,
    _other: *mut c_void,
) -> TResult {
    result::OK
}

unsafe extern "system" fn connection_notify(this: *mut c_void, message: *mut c_void) -> TResult {
    let shim = &*(this as *const ConnectionPointShim);
    if !MessageShim::is_ours(message) {
        tracing::warn!("dropping foreign message object passed to notify()");
        return result::NOT_IMPLEMENTED;
    }
    let wire = MessageShim::to_wire(message as *mut MessageShim);
    send_callback(
        &shim.callback,
        CallbackRequest::Notify {
            instance_id: shim.instance_id,
            message: wire,
        },
    )
}

// ---------------------------------------------------------------------------
// IPlugFrame forwarding resize requests

#[repr(C)]
pub struct PlugFrameShim {
    vtbl: &'static IPlugFrameVtbl,
    refs: AtomicU32,
    instance_id: u64,
    callback: CallbackChannel,
}

static PLUG_FRAME_VTBL: IPlugFrameVtbl = IPlugFrameVtbl {
    base: FUnknownVtbl {
        query_interface: frame_query_interface,
        add_ref: frame_add_ref,
        release: frame_release,
    },
    resize_view: frame_resize_view,
};

funknown_impl!(PlugFrameShim, frame_query_interface, frame_add_ref, frame_release, [c_api::IID_IPLUG_FRAME]);

impl PlugFrameShim {
    pub fn new(instance_id: u64, callback: CallbackChannel) -> *mut PlugFrameShim {
        Box::into_raw(Box::new(Self {
            vtbl: &PLUG_FRAME_VTBL,
            refs: AtomicU32::new(1),
            instance_id,
            callback,
        }))
    }
}

unsafe extern "system" fn frame_resize_view(
    this: *mut c_void,
    _view: *mut c_void,
    new_size: *mut RawViewRect,
) -> TResult {
    let shim = &*(this as *const PlugFrameShim);
    if new_size.is_null() {
        return result::INVALID_ARGUMENT;
    }
    let raw = &*new_size;
    send_callback(
        &shim.callback,
        CallbackRequest::ResizeView {
            instance_id: shim.instance_id,
            new_size: ViewRect {
                left: raw.left,
                top: raw.top,
                right: raw.right,
                bottom: raw.bottom,
            },
        },
    )
}

// ---------------------------------------------------------------------------
// IParameterChanges / IParamValueQueue

#[repr(C)]
pub struct ParamQueueShim {
    vtbl: &'static IParamValueQueueVtbl,
    refs: AtomicU32,
    param_id: u32,
    points: Mutex<Vec<ParameterPoint>>,
}

static PARAM_QUEUE_VTBL: IParamValueQueueVtbl = IParamValueQueueVtbl {
    base: FUnknownVtbl {
        query_interface: queue_query_interface,
        add_ref: queue_add_ref,
        release: queue_release,
    },
    get_parameter_id: queue_get_parameter_id,
    get_point_count: queue_get_point_count,
    get_point: queue_get_point,
    add_point: queue_add_point,
};

funknown_impl!(ParamQueueShim, queue_query_interface, queue_add_ref, queue_release, [c_api::IID_FUNKNOWN]);

unsafe extern "system" fn queue_get_parameter_id(this: *mut c_void) -> u32 {
    (*(this as *const ParamQueueShim)).param_id
}

unsafe extern "system" fn queue_get_point_count(this: *mut c_void) -> i32 {
    (*(this as *const ParamQueueShim)).points.lock().len() as i32
}

unsafe extern "system" fn queue_get_point(
    this: *mut c_void,
    index: i32,
    sample_offset: *mut i32,
    value: *mut f64,
) -> TResult {
    let shim = &*(this as *const ParamQueueShim);
    let points = shim.points.lock();
    match points.get(index.max(0) as usize) {
        Some(point) => {
            *sample_offset = point.sample_offset;
            *value = point.value;
            result::OK
        }
        None => result::INVALID_ARGUMENT,
    }
}

unsafe extern "system" fn queue_add_point(
    this: *mut c_void,
    sample_offset: i32,
    value: f64,
    index: *mut i32,
) -> TResult {
    let shim = &*(this as *const ParamQueueShim);
    let mut points = shim.points.lock();
    points.push(ParameterPoint {
        sample_offset,
        value,
    });
    if !index.is_null() {
        *index = points.len() as i32 - 1;
    }
    result::OK
}

#[repr(C)]
pub struct ParameterChangesShim {
    vtbl: &'static IParameterChangesVtbl,
    refs: AtomicU32,
    queues: Mutex<Vec<*mut ParamQueueShim>>,
}

static PARAMETER_CHANGES_VTBL: IParameterChangesVtbl = IParameterChangesVtbl {
    base: FUnknownVtbl {
        query_interface: changes_query_interface,
        add_ref: changes_add_ref,
        release: changes_release,
    },
    get_parameter_count: changes_get_parameter_count,
    get_parameter_data: changes_get_parameter_data,
    add_parameter_data: changes_add_parameter_data,
};

unsafe extern "system" fn changes_query_interface(
    this: *mut c_void,
    iid: *const Tuid,
    obj: *mut *mut c_void,
) -> TResult {
    if *iid == c_api::IID_FUNKNOWN {
        changes_add_ref(this);
        *obj = this;
        return result::OK;
    }
    *obj = std::ptr::null_mut();
    result::NO_INTERFACE
}

unsafe extern "system" fn changes_add_ref(this: *mut c_void) -> u32 {
    let shim = &*(this as *const ParameterChangesShim);
    shim.refs.fetch_add(1, Ordering::Relaxed) + 1
}

unsafe extern "system" fn changes_release(this: *mut c_void) -> u32 {
    let shim = &*(this as *const ParameterChangesShim);
    let remaining = shim.refs.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        let owned = Box::from_raw(this as *mut ParameterChangesShim);
        for queue in owned.queues.lock().drain(..) {
            release_interface(queue as *mut c_void);
        }
    }
    remaining
}

unsafe extern "system" fn changes_get_parameter_count(this: *mut c_void) -> i32 {
    (*(this as *const ParameterChangesShim)).queues.lock().len() as i32
}

unsafe extern "system" fn changes_get_parameter_data(
    this: *mut c_void,
    index: i32,
) -> *mut c_void {
    let shim = &*(this as *const ParameterChangesShim);
    shim.queues
        .lock()
        .get(index.max(0) as usize)
        .map(|queue| *queue as *mut c_void)
        .unwrap_or(std::ptr::null_mut())
}

unsafe extern "system" fn changes_add_parameter_data(
    this: *mut c_void,
    id: *const u32,
    index: *mut i32,
) -> *mut c_void {
    let shim = &*(this as *const ParameterChangesShim);
    if id.is_null() {
        return std::ptr::null_mut();
    }
    let param_id = *id;
    let mut queues = shim.queues.lock();
    if let Some(position) = queues
        .iter()
        .position(|queue| unsafe { (**queue).param_id } == param_id)
    {
        if !index.is_null() {
            *index = position as i32;
        }
        return queues[position] as *mut c_void;
    }

    let queue = Box::into_raw(Box::new(ParamQueueShim {
        vtbl: &PARAM_QUEUE_VTBL,
        refs: AtomicU32::new(1),
        param_id,
        points: Mutex::new(Vec::new()),
    }));
    queues.push(queue);
    if !index.is_null() {
        *index = queues.len() as i32 - 1;
    }
    queue as *mut c_void
}

impl ParameterChangesShim {
    pub fn from_wire(queues: &[ParameterQueue]) -> *mut ParameterChangesShim {
        let shims = queues
            .iter()
            .map(|queue| {
                Box::into_raw(Box::new(ParamQueueShim {
                    vtbl: &PARAM_QUEUE_VTBL,
                    refs: AtomicU32::new(1),
                    param_id: queue.param_id,
                    points: Mutex::new(queue.points.clone()),
                }))
            })
            .collect();
        Box::into_raw(Box::new(Self {
            vtbl: &PARAMETER_CHANGES_VTBL,
            refs: AtomicU32::new(1),
            queues: Mutex::new(shims),
        }))
    }

    pub fn empty() -> *mut ParameterChangesShim {
        Self::from_wire(&[])
    }

    /// # Safety
    /// `this` must be a live `ParameterChangesShim`.
    pub unsafe fn to_wire(this: *mut ParameterChangesShim) -> Vec<ParameterQueue> {
        (*this)
            .queues
            .lock()
            .iter()
            .map(|queue| unsafe {
                ParameterQueue {
                    param_id: (**queue).param_id,
                    points: (**queue).points.lock().clone(),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// IEventList

#[repr(C)]
pub struct EventListShim {
    vtbl: &'static IEventListVtbl,
    refs: AtomicU32,
    events: Mutex<Vec<Event>>,
}

static EVENT_LIST_VTBL: IEventListVtbl = IEventListVtbl {
    base: FUnknownVtbl {
        query_interface: events_query_interface,
        add_ref: events_add_ref,
        release: events_release,
    },
    get_event_count: events_get_count,
    get_event: events_get_event,
    add_event: events_add_event,
};

funknown_impl!(EventListShim, events_query_interface, events_add_ref, events_release, [c_api::IID_FUNKNOWN]);

unsafe extern "system" fn events_get_count(this: *mut c_void) -> i32 {
    (*(this as *const EventListShim)).events.lock().len() as i32
}

unsafe extern "system" fn events_get_event(
    this: *mut c_void,
    index: i32,
    event: *mut RawEvent,
) -> TResult {
    let shim = &*(this as *const EventListShim);
    let events = shim.events.lock();
    let Some(wire) = events.get(index.max(0) as usize) else {
        return result::INVALID_ARGUMENT;
    };
    *event = raw_from_wire(wire);
    result::OK
}

unsafe extern "system" fn events_add_event(this: *mut c_void, event: *mut RawEvent) -> TResult {
    let shim = &*(this as *const EventListShim);
    if event.is_null() {
        return result::INVALID_ARGUMENT;
    }
    match wire_from_raw(&*event) {
        Some(wire) => {
            shim.events.lock().push(wire);
            result::OK
        }
        None => result::NOT_IMPLEMENTED,
    }
}

impl EventListShim {
    pub fn from_wire(events: &[Event]) -> *mut EventListShim {
        Box::into_raw(Box::new(Self {
            vtbl: &EVENT_LIST_VTBL,
            refs: AtomicU32::new(1),
            events: Mutex::new(events.to_vec()),
        }))
    }

    pub fn empty() -> *mut EventListShim {
        Self::from_wire(&[])
    }

    /// # Safety
    /// `this` must be a live `EventListShim`.
    pub unsafe fn to_wire(this: *mut EventListShim) -> Vec<Event> {
        (*this).events.lock().clone()
    }
}

fn raw_from_wire(event: &Event) -> RawEvent {
    use c_api::{RawDataEvent, RawEventBody, RawNoteOffEvent, RawNoteOnEvent};

    match event {
        Event::NoteOn {
            bus_index,
            sample_offset,
            channel,
            pitch,
            velocity,
            note_id,
            tuning,
        } => RawEvent {
            bus_index: *bus_index,
            sample_offset: *sample_offset,
            ppq_position: 0.0,
            flags: 0,
            event_type: c_api::EVENT_NOTE_ON,
            body: RawEventBody {
                note_on: RawNoteOnEvent {
                    channel: *channel,
                    pitch: *pitch,
                    tuning: *tuning,
                    velocity: *velocity,
                    length: 0,
                    note_id: *note_id,
                },
            },
        },
        Event::NoteOff {
            bus_index,
            sample_offset,
            channel,
            pitch,
            velocity,
            note_id,
        } => RawEvent {
            bus_index: *bus_index,
            sample_offset: *sample_offset,
            ppq_position: 0.0,
            flags: 0,
            event_type: c_api::EVENT_NOTE_OFF,
            body: RawEventBody {
                note_off: RawNoteOffEvent {
                    channel: *channel,
                    pitch: *pitch,
                    velocity: *velocity,
                    note_id: *note_id,
                    tuning: 0.0,
                },
            },
        },
        Event::Data {
            bus_index,
            sample_offset,
            kind,
            bytes,
        } => RawEvent {
            bus_index: *bus_index,
            sample_offset: *sample_offset,
            ppq_position: 0.0,
            flags: 0,
            event_type: c_api::EVENT_DATA,
            body: RawEventBody {
                // Points at the wire event's storage, which outlives the
                // shim handing it out.
                data: RawDataEvent {
                    size: bytes.len() as u32,
                    kind: *kind,
                    bytes: bytes.as_ptr(),
                },
            },
        },
    }
}

fn wire_from_raw(event: &RawEvent) -> Option<Event> {
    unsafe {
        match event.event_type {
            c_api::EVENT_NOTE_ON => {
                let body = event.body.note_on;
                Some(Event::NoteOn {
                    bus_index: event.bus_index,
                    sample_offset: event.sample_offset,
                    channel: body.channel,
                    pitch: body.pitch,
                    velocity: body.velocity,
                    note_id: body.note_id,
                    tuning: body.tuning,
                })
            }
            c_api::EVENT_NOTE_OFF => {
                let body = event.body.note_off;
                Some(Event::NoteOff {
                    bus_index: event.bus_index,
                    sample_offset: event.sample_offset,
                    channel: body.channel,
                    pitch: body.pitch,
                    velocity: body.velocity,
                    note_id: body.note_id,
                })
            }
            c_api::EVENT_DATA => {
                let body = event.body.data;
                let bytes = if body.bytes.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(body.bytes, body.size as usize).to_vec()
                };
                Some(Event::Data {
                    bus_index: event.bus_index,
                    sample_offset: event.sample_offset,
                    kind: body.kind,
                    bytes,
                })
            }
            other => {
                tracing::trace!(event_type = other, "dropping unknown event type");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bstream_write_then_read_back() {
        let stream = BStreamShim::new(Vec::new());
        unsafe {
            let this = stream as *mut c_void;
            let payload = [1u8, 2, 3, 4];
            let mut written = 0;
            assert_eq!(
                bstream_write(this, payload.as_ptr() as *const c_void, 4, &mut written),
                result::OK
            );
            assert_eq!(written, 4);

            assert_eq!(BStreamShim::data(stream), vec![1, 2, 3, 4]);

            let mut pos = 0i64;
            assert_eq!(bstream_seek(this, 0, 0, &mut pos), result::OK);
            let mut buffer = [0u8; 4];
            let mut read = 0;
            assert_eq!(
                bstream_read(this, buffer.as_mut_ptr() as *mut c_void, 4, &mut read),
                result::OK
            );
            assert_eq!(buffer, payload);
            release_interface(this);
        }
    }

    #[test]
    fn our_messages_roundtrip_to_the_wire() {
        let message = MessageShim::new();
        unsafe {
            let id = CString::new("midi_learn").unwrap();
            message_set_id(message as *mut c_void, id.as_ptr());

            let attrs = message_get_attributes(message as *mut c_void);
            let key = CString::new("param").unwrap();
            assert_eq!(attrs_set_int(attrs, key.as_ptr(), 17), result::OK);

            assert!(MessageShim::is_ours(message as *mut c_void));
            let wire = MessageShim::to_wire(message);
            assert_eq!(wire.message_id, "midi_learn");
            assert_eq!(
                wire.attributes,
                vec![("param".to_string(), AttributeValue::Int(17))]
            );
            release_interface(message as *mut c_void);
        }
    }

    #[test]
    fn foreign_messages_are_detected_by_vtable_identity() {
        let stream = BStreamShim::new(Vec::new());
        assert!(!MessageShim::is_ours(stream as *mut c_void));
        unsafe { release_interface(stream as *mut c_void) };
    }

    #[test]
    fn output_parameter_changes_collect_points() {
        let changes = ParameterChangesShim::empty();
        unsafe {
            let this = changes as *mut c_void;
            let param_id = 42u32;
            let mut index = -1;
            let queue = changes_add_parameter_data(this, &param_id, &mut index);
            assert!(!queue.is_null());
            assert_eq!(index, 0);

            let mut point_index = -1;
            assert_eq!(queue_add_point(queue, 10, 0.5, &mut point_index), result::OK);
            assert_eq!(point_index, 0);

            // Adding data for the same id reuses the queue.
            let again = changes_add_parameter_data(this, &param_id, &mut index);
            assert_eq!(again, queue);

            let wire = ParameterChangesShim::to_wire(changes);
            assert_eq!(wire.len(), 1);
            assert_eq!(wire[0].param_id, 42);
            assert_eq!(wire[0].points.len(), 1);
            release_interface(this);
        }
    }

    #[test]
    fn event_list_roundtrips_note_events() {
        let wire_events = vec![Event::NoteOn {
            bus_index: 0,
            sample_offset: 12,
            channel: 0,
            pitch: 60,
            velocity: 0.8,
            note_id: -1,
            tuning: 0.0,
        }];
        let list = EventListShim::from_wire(&wire_events);
        unsafe {
            let this = list as *mut c_void;
            assert_eq!(events_get_count(this), 1);

            let mut raw: RawEvent = std::mem::zeroed();
            assert_eq!(events_get_event(this, 0, &mut raw), result::OK);
            assert_eq!(raw.event_type, c_api::EVENT_NOTE_ON);

            // Round the raw event back in as plugin output.
            assert_eq!(events_add_event(this, &mut raw), result::OK);
            assert_eq!(EventListShim::to_wire(list).len(), 2);
            release_interface(this);
        }
    }
}
