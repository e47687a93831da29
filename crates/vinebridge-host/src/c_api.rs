//! The modern plugin ABI at the byte level: interface ids, vtable layouts,
//! and the fixed C structs the interfaces exchange. Interface ids use the
//! foreign OS byte order, since the modules this process loads were built
//! for it.

use std::ffi::{c_char, c_void};

pub type Tuid = [u8; 16];
pub type TResult = i32;

pub use vinebridge::protocol::vst3::result;

// -- interface ids ----------------------------------------------------------

// 00000000-0000-0000-C000-000000000046
pub const IID_FUNKNOWN: Tuid = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x46,
];

// 22888DDB-156E-45AE-8358-B34808190625
pub const IID_IPLUGIN_BASE: Tuid = [
    0xDB, 0x8D, 0x88, 0x22, 0x6E, 0x15, 0xAE, 0x45, 0x83, 0x58, 0xB3, 0x48, 0x08, 0x19, 0x06,
    0x25,
];

// 7A4D811C-5211-4A1F-AED9-D2EE0B43BF9F
pub const IID_IPLUGIN_FACTORY: Tuid = [
    0x1C, 0x81, 0x4D, 0x7A, 0x11, 0x52, 0x1F, 0x4A, 0xAE, 0xD9, 0xD2, 0xEE, 0x0B, 0x43, 0xBF,
    0x9F,
];

// E831FF31-F2D5-4301-928E-BBEE25697802
pub const IID_ICOMPONENT: Tuid = [
    0x31, 0xFF, 0x31, 0xE8, 0xD5, 0xF2, 0x01, 0x43, 0x92, 0x8E, 0xBB, 0xEE, 0x25, 0x69, 0x78,
    0x02,
];

// 42043F99-B7DA-453C-A569-E79D9AAEC33D
pub const IID_IAUDIO_PROCESSOR: Tuid = [
    0x99, 0x3F, 0x04, 0x42, 0xDA, 0xB7, 0x3C, 0x45, 0xA5, 0x69, 0xE7, 0x9D, 0x9A, 0xAE, 0xC3,
    0x3D,
];

// DCD7BBE3-7742-448D-A874-AACC979C759E
pub const IID_IEDIT_CONTROLLER: Tuid = [
    0xE3, 0xBB, 0xD7, 0xDC, 0x42, 0x77, 0x8D, 0x44, 0xA8, 0x74, 0xAA, 0xCC, 0x97, 0x9C, 0x75,
    0x9E,
];

// 7F4EFE59-F320-4967-AC27-A3AEAFB63038
pub const IID_IEDIT_CONTROLLER2: Tuid = [
    0x59, 0xFE, 0x4E, 0x7F, 0x20, 0xF3, 0x67, 0x49, 0xAC, 0x27, 0xA3, 0xAE, 0xAF, 0xB6, 0x30,
    0x38,
];

// 70A4156F-6E6E-4026-9891-48BFAA60D8D1
pub const IID_ICONNECTION_POINT: Tuid = [
    0x6F, 0x15, 0xA4, 0x70, 0x6E, 0x6E, 0x26, 0x40, 0x98, 0x91, 0x48, 0xBF, 0xAA, 0x60, 0xD8,
    0xD1,
];

// 936F033B-C6C0-47DB-BB08-82F813C1E613
pub const IID_IMESSAGE: Tuid = [
    0x3B, 0x03, 0x6F, 0x93, 0xC0, 0xC6, 0xDB, 0x47, 0xBB, 0x08, 0x82, 0xF8, 0x13, 0xC1, 0xE6,
    0x13,
];

// 1E5F0AEB-CC7F-4533-A254-401138AD5EE4
pub const IID_IATTRIBUTE_LIST: Tuid = [
    0xEB, 0x0A, 0x5F, 0x1E, 0x7F, 0xCC, 0x33, 0x45, 0xA2, 0x54, 0x40, 0x11, 0x38, 0xAD, 0x5E,
    0xE4,
];

// C3BF6EA2-3099-4752-9B6B-F9901EE33E9B
pub const IID_IBSTREAM: Tuid = [
    0xA2, 0x6E, 0xBF, 0xC3, 0x99, 0x30, 0x52, 0x47, 0x9B, 0x6B, 0xF9, 0x90, 0x1E, 0xE3, 0x3E,
    0x9B,
];

// 5BC32507-D060-49EA-A615-1B522B755B29
pub const IID_IPLUG_VIEW: Tuid = [
    0x07, 0x25, 0xC3, 0x5B, 0x60, 0xD0, 0xEA, 0x49, 0xA6, 0x15, 0x1B, 0x52, 0x2B, 0x75, 0x5B,
    0x29,
];

// 367FAF01-AFA9-4693-8D4D-A2A0ED0882A3
pub const IID_IPLUG_FRAME: Tuid = [
    0x01, 0xAF, 0x7F, 0x36, 0xA9, 0xAF, 0x93, 0x46, 0x8D, 0x4D, 0xA2, 0xA0, 0xED, 0x08, 0x82,
    0xA3,
];

// 58E595CC-DB2D-4969-8B6A-AF8C36A664E5
pub const IID_IHOST_APPLICATION: Tuid = [
    0xCC, 0x95, 0xE5, 0x58, 0x2D, 0xDB, 0x69, 0x49, 0x8B, 0x6A, 0xAF, 0x8C, 0x36, 0xA6, 0x64,
    0xE5,
];

// 93A0BEA3-0BD0-45DB-8B89-0B0CC1E46AC6
pub const IID_ICOMPONENT_HANDLER: Tuid = [
    0xA3, 0xBE, 0xA0, 0x93, 0xD0, 0x0B, 0xDB, 0x45, 0x8B, 0x89, 0x0B, 0x0C, 0xC1, 0xE4, 0x6A,
    0xC6,
];

// 8683B01F-7B35-4F70-A265-1DEC353AF4FF
pub const IID_IUNIT_INFO: Tuid = [
    0x1F, 0xB0, 0x83, 0x86, 0x35, 0x7B, 0x70, 0x4F, 0xA2, 0x65, 0x1D, 0xEC, 0x35, 0x3A, 0xF4,
    0xFF,
];

// 6C389611-D391-455D-B870-B83394A0EFDD
pub const IID_IUNIT_DATA: Tuid = [
    0x11, 0x96, 0x38, 0x6C, 0x91, 0xD3, 0x5D, 0x45, 0xB8, 0x70, 0xB8, 0x33, 0x94, 0xA0, 0xEF,
    0xDD,
];

// 8683B01F-7B35-4F70 sibling list-data interface
pub const IID_IPROGRAM_LIST_DATA: Tuid = [
    0x2C, 0x6C, 0xBA, 0x6B, 0x8F, 0x3B, 0x49, 0x4C, 0x81, 0x2A, 0xF3, 0xD4, 0xEF, 0x42, 0x9F,
    0xDC,
];

// DF0FF9F7-49B7-4669-B63A-B7327ADBF5E5
pub const IID_IMIDI_MAPPING: Tuid = [
    0xF7, 0xF9, 0x0F, 0xDF, 0xB7, 0x49, 0x69, 0x46, 0xB6, 0x3A, 0xB7, 0x32, 0x7A, 0xDB, 0xF5,
    0xE5,
];

// -- vtables ----------------------------------------------------------------

#[repr(C)]
pub struct FUnknownVtbl {
    pub query_interface: unsafe extern "system" fn(
        this: *mut c_void,
        iid: *const Tuid,
        obj: *mut *mut c_void,
    ) -> TResult,
    pub add_ref: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
pub struct IPluginFactoryVtbl {
    pub base: FUnknownVtbl,
    pub get_factory_info:
        unsafe extern "system" fn(this: *mut c_void, info: *mut c_void) -> TResult,
    pub count_classes: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_class_info:
        unsafe extern "system" fn(this: *mut c_void, index: i32, info: *mut PClassInfo) -> TResult,
    pub create_instance: unsafe extern "system" fn(
        this: *mut c_void,
        cid: *const Tuid,
        iid: *const Tuid,
        obj: *mut *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IComponentVtbl {
    pub base: FUnknownVtbl,
    // IPluginBase
    pub initialize: unsafe extern "system" fn(this: *mut c_void, context: *mut c_void) -> TResult,
    pub terminate: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    // IComponent
    pub get_controller_class_id:
        unsafe extern "system" fn(this: *mut c_void, class_id: *mut Tuid) -> TResult,
    pub set_io_mode: unsafe extern "system" fn(this: *mut c_void, mode: i32) -> TResult,
    pub get_bus_count:
        unsafe extern "system" fn(this: *mut c_void, media_type: i32, dir: i32) -> i32,
    pub get_bus_info: unsafe extern "system" fn(
        this: *mut c_void,
        media_type: i32,
        dir: i32,
        index: i32,
        info: *mut RawBusInfo,
    ) -> TResult,
    pub get_routing_info: unsafe extern "system" fn(
        this: *mut c_void,
        in_info: *mut c_void,
        out_info: *mut c_void,
    ) -> TResult,
    pub activate_bus: unsafe extern "system" fn(
        this: *mut c_void,
        media_type: i32,
        dir: i32,
        index: i32,
        state: u8,
    ) -> TResult,
    pub set_active: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub set_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
}

#[repr(C)]
pub struct IAudioProcessorVtbl {
    pub base: FUnknownVtbl,
    pub set_bus_arrangements: unsafe extern "system" fn(
        this: *mut c_void,
        inputs: *mut u64,
        num_ins: i32,
        outputs: *mut u64,
        num_outs: i32,
    ) -> TResult,
    pub get_bus_arrangement: unsafe extern "system" fn(
        this: *mut c_void,
        dir: i32,
        index: i32,
        arrangement: *mut u64,
    ) -> TResult,
    pub can_process_sample_size:
        unsafe extern "system" fn(this: *mut c_void, symbolic_sample_size: i32) -> TResult,
    pub get_latency_samples: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub setup_processing:
        unsafe extern "system" fn(this: *mut c_void, setup: *mut RawProcessSetup) -> TResult,
    pub set_processing: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub process:
        unsafe extern "system" fn(this: *mut c_void, data: *mut RawProcessData) -> TResult,
    pub get_tail_samples: unsafe extern "system" fn(this: *mut c_void) -> u32,
}

#[repr(C)]
pub struct IEditControllerVtbl {
    pub base: FUnknownVtbl,
    // IPluginBase
    pub initialize: unsafe extern "system" fn(this: *mut c_void, context: *mut c_void) -> TResult,
    pub terminate: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    // IEditController
    pub set_component_state:
        unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub set_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_state: unsafe extern "system" fn(this: *mut c_void, state: *mut c_void) -> TResult,
    pub get_parameter_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_parameter_info: unsafe extern "system" fn(
        this: *mut c_void,
        param_index: i32,
        info: *mut RawParameterInfo,
    ) -> TResult,
    pub get_param_string_by_value: unsafe extern "system" fn(
        this: *mut c_void,
        id: u32,
        value_normalized: f64,
        string: *mut String128,
    ) -> TResult,
    pub get_param_value_by_string: unsafe extern "system" fn(
        this: *mut c_void,
        id: u32,
        string: *const u16,
        value_normalized: *mut f64,
    ) -> TResult,
    pub normalized_param_to_plain:
        unsafe extern "system" fn(this: *mut c_void, id: u32, value_normalized: f64) -> f64,
    pub plain_param_to_normalized:
        unsafe extern "system" fn(this: *mut c_void, id: u32, plain_value: f64) -> f64,
    pub get_param_normalized: unsafe extern "system" fn(this: *mut c_void, id: u32) -> f64,
    pub set_param_normalized:
        unsafe extern "system" fn(this: *mut c_void, id: u32, value: f64) -> TResult,
    pub set_component_handler:
        unsafe extern "system" fn(this: *mut c_void, handler: *mut c_void) -> TResult,
    pub create_view:
        unsafe extern "system" fn(this: *mut c_void, name: *const c_char) -> *mut c_void,
}

#[repr(C)]
pub struct IConnectionPointVtbl {
    pub base: FUnknownVtbl,
    pub connect: unsafe extern "system" fn(this: *mut c_void, other: *mut c_void) -> TResult,
    pub disconnect: unsafe extern "system" fn(this: *mut c_void, other: *mut c_void) -> TResult,
    pub notify: unsafe extern "system" fn(this: *mut c_void, message: *mut c_void) -> TResult,
}

#[repr(C)]
pub struct IBStreamVtbl {
    pub base: FUnknownVtbl,
    pub read: unsafe extern "system" fn(
        this: *mut c_void,
        buffer: *mut c_void,
        num_bytes: i32,
        num_bytes_read: *mut i32,
    ) -> TResult,
    pub write: unsafe extern "system" fn(
        this: *mut c_void,
        buffer: *const c_void,
        num_bytes: i32,
        num_bytes_written: *mut i32,
    ) -> TResult,
    pub seek: unsafe extern "system" fn(
        this: *mut c_void,
        pos: i64,
        mode: i32,
        result_pos: *mut i64,
    ) -> TResult,
    pub tell: unsafe extern "system" fn(this: *mut c_void, pos: *mut i64) -> TResult,
}

#[repr(C)]
pub struct IPlugViewVtbl {
    pub base: FUnknownVtbl,
    pub is_platform_type_supported:
        unsafe extern "system" fn(this: *mut c_void, platform_type: *const c_char) -> TResult,
    pub attached: unsafe extern "system" fn(
        this: *mut c_void,
        parent: *mut c_void,
        platform_type: *const c_char,
    ) -> TResult,
    pub removed: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    pub on_wheel: unsafe extern "system" fn(this: *mut c_void, distance: f32) -> TResult,
    pub on_key_down: unsafe extern "system" fn(
        this: *mut c_void,
        key: i16,
        key_code: i16,
        modifiers: i16,
    ) -> TResult,
    pub on_key_up: unsafe extern "system" fn(
        this: *mut c_void,
        key: i16,
        key_code: i16,
        modifiers: i16,
    ) -> TResult,
    pub get_size: unsafe extern "system" fn(this: *mut c_void, size: *mut RawViewRect) -> TResult,
    pub on_size:
        unsafe extern "system" fn(this: *mut c_void, new_size: *mut RawViewRect) -> TResult,
    pub on_focus: unsafe extern "system" fn(this: *mut c_void, state: u8) -> TResult,
    pub set_frame: unsafe extern "system" fn(this: *mut c_void, frame: *mut c_void) -> TResult,
    pub can_resize: unsafe extern "system" fn(this: *mut c_void) -> TResult,
    pub check_size_constraint:
        unsafe extern "system" fn(this: *mut c_void, rect: *mut RawViewRect) -> TResult,
}

#[repr(C)]
pub struct IHostApplicationVtbl {
    pub base: FUnknownVtbl,
    pub get_name: unsafe extern "system" fn(this: *mut c_void, name: *mut String128) -> TResult,
    pub create_instance: unsafe extern "system" fn(
        this: *mut c_void,
        cid: *const Tuid,
        iid: *const Tuid,
        obj: *mut *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IComponentHandlerVtbl {
    pub base: FUnknownVtbl,
    pub begin_edit: unsafe extern "system" fn(this: *mut c_void, id: u32) -> TResult,
    pub perform_edit:
        unsafe extern "system" fn(this: *mut c_void, id: u32, value_normalized: f64) -> TResult,
    pub end_edit: unsafe extern "system" fn(this: *mut c_void, id: u32) -> TResult,
    pub restart_component: unsafe extern "system" fn(this: *mut c_void, flags: i32) -> TResult,
}

#[repr(C)]
pub struct IPlugFrameVtbl {
    pub base: FUnknownVtbl,
    pub resize_view: unsafe extern "system" fn(
        this: *mut c_void,
        view: *mut c_void,
        new_size: *mut RawViewRect,
    ) -> TResult,
}

#[repr(C)]
pub struct IMessageVtbl {
    pub base: FUnknownVtbl,
    pub get_message_id: unsafe extern "system" fn(this: *mut c_void) -> *const c_char,
    pub set_message_id: unsafe extern "system" fn(this: *mut c_void, id: *const c_char),
    pub get_attributes: unsafe extern "system" fn(this: *mut c_void) -> *mut c_void,
}

#[repr(C)]
pub struct IAttributeListVtbl {
    pub base: FUnknownVtbl,
    pub set_int:
        unsafe extern "system" fn(this: *mut c_void, id: *const c_char, value: i64) -> TResult,
    pub get_int:
        unsafe extern "system" fn(this: *mut c_void, id: *const c_char, value: *mut i64) -> TResult,
    pub set_float:
        unsafe extern "system" fn(this: *mut c_void, id: *const c_char, value: f64) -> TResult,
    pub get_float:
        unsafe extern "system" fn(this: *mut c_void, id: *const c_char, value: *mut f64) -> TResult,
    pub set_string:
        unsafe extern "system" fn(this: *mut c_void, id: *const c_char, string: *const u16)
            -> TResult,
    pub get_string: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const c_char,
        string: *mut u16,
        size_in_bytes: u32,
    ) -> TResult,
    pub set_binary: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const c_char,
        data: *const c_void,
        size_in_bytes: u32,
    ) -> TResult,
    pub get_binary: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const c_char,
        data: *mut *const c_void,
        size_in_bytes: *mut u32,
    ) -> TResult,
}

#[repr(C)]
pub struct IUnitInfoVtbl {
    pub base: FUnknownVtbl,
    pub get_unit_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_unit_info: unsafe extern "system" fn(
        this: *mut c_void,
        unit_index: i32,
        info: *mut RawUnitInfo,
    ) -> TResult,
    pub get_program_list_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_program_list_info: unsafe extern "system" fn(
        this: *mut c_void,
        list_index: i32,
        info: *mut RawProgramListInfo,
    ) -> TResult,
    pub get_program_name: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
        name: *mut String128,
    ) -> TResult,
    pub get_program_info: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
        attribute_id: *const c_char,
        attribute_value: *mut String128,
    ) -> TResult,
    pub has_program_pitch_names: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
    ) -> TResult,
    pub get_program_pitch_name: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
        midi_pitch: i16,
        name: *mut String128,
    ) -> TResult,
    pub get_selected_unit: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub select_unit: unsafe extern "system" fn(this: *mut c_void, unit_id: i32) -> TResult,
    pub get_unit_by_bus: unsafe extern "system" fn(
        this: *mut c_void,
        media_type: i32,
        dir: i32,
        bus_index: i32,
        channel: i32,
        unit_id: *mut i32,
    ) -> TResult,
    pub set_unit_program_data: unsafe extern "system" fn(
        this: *mut c_void,
        list_or_unit_id: i32,
        program_index: i32,
        data: *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IProgramListDataVtbl {
    pub base: FUnknownVtbl,
    pub program_data_supported:
        unsafe extern "system" fn(this: *mut c_void, list_id: i32) -> TResult,
    pub get_program_data: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
        data: *mut c_void,
    ) -> TResult,
    pub set_program_data: unsafe extern "system" fn(
        this: *mut c_void,
        list_id: i32,
        program_index: i32,
        data: *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IUnitDataVtbl {
    pub base: FUnknownVtbl,
    pub unit_data_supported:
        unsafe extern "system" fn(this: *mut c_void, unit_id: i32) -> TResult,
    pub get_unit_data: unsafe extern "system" fn(
        this: *mut c_void,
        unit_id: i32,
        data: *mut c_void,
    ) -> TResult,
    pub set_unit_data: unsafe extern "system" fn(
        this: *mut c_void,
        unit_id: i32,
        data: *mut c_void,
    ) -> TResult,
}

#[repr(C)]
pub struct IParameterChangesVtbl {
    pub base: FUnknownVtbl,
    pub get_parameter_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_parameter_data:
        unsafe extern "system" fn(this: *mut c_void, index: i32) -> *mut c_void,
    pub add_parameter_data: unsafe extern "system" fn(
        this: *mut c_void,
        id: *const u32,
        index: *mut i32,
    ) -> *mut c_void,
}

#[repr(C)]
pub struct IParamValueQueueVtbl {
    pub base: FUnknownVtbl,
    pub get_parameter_id: unsafe extern "system" fn(this: *mut c_void) -> u32,
    pub get_point_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_point: unsafe extern "system" fn(
        this: *mut c_void,
        index: i32,
        sample_offset: *mut i32,
        value: *mut f64,
    ) -> TResult,
    pub add_point: unsafe extern "system" fn(
        this: *mut c_void,
        sample_offset: i32,
        value: f64,
        index: *mut i32,
    ) -> TResult,
}

#[repr(C)]
pub struct IEventListVtbl {
    pub base: FUnknownVtbl,
    pub get_event_count: unsafe extern "system" fn(this: *mut c_void) -> i32,
    pub get_event:
        unsafe extern "system" fn(this: *mut c_void, index: i32, event: *mut RawEvent) -> TResult,
    pub add_event: unsafe extern "system" fn(this: *mut c_void, event: *mut RawEvent) -> TResult,
}

// -- data structs -----------------------------------------------------------

pub type String128 = [u16; 128];

#[repr(C)]
pub struct PClassInfo {
    pub cid: Tuid,
    pub cardinality: i32,
    pub category: [c_char; 32],
    pub name: [c_char; 64],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBusInfo {
    pub media_type: i32,
    pub direction: i32,
    pub channel_count: i32,
    pub name: String128,
    pub bus_type: i32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawParameterInfo {
    pub id: u32,
    pub title: String128,
    pub short_title: String128,
    pub units: String128,
    pub step_count: i32,
    pub default_normalized_value: f64,
    pub unit_id: i32,
    pub flags: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawUnitInfo {
    pub id: i32,
    pub parent_unit_id: i32,
    pub name: String128,
    pub program_list_id: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProgramListInfo {
    pub id: i32,
    pub name: String128,
    pub program_count: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawViewRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProcessSetup {
    pub process_mode: i32,
    pub symbolic_sample_size: i32,
    pub max_samples_per_block: i32,
    pub sample_rate: f64,
}

pub const SYMBOLIC_SAMPLE_SIZE_32: i32 = 0;
pub const SYMBOLIC_SAMPLE_SIZE_64: i32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawAudioBusBuffers {
    pub num_channels: i32,
    pub silence_flags: u64,
    /// 32-bit and 64-bit channel pointers share this slot.
    pub channel_buffers: *mut *mut c_void,
}

#[repr(C)]
pub struct RawProcessData {
    pub process_mode: i32,
    pub symbolic_sample_size: i32,
    pub num_samples: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub inputs: *mut RawAudioBusBuffers,
    pub outputs: *mut RawAudioBusBuffers,
    pub input_parameter_changes: *mut c_void,
    pub output_parameter_changes: *mut c_void,
    pub input_events: *mut c_void,
    pub output_events: *mut c_void,
    pub process_context: *mut RawProcessContext,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameRate {
    pub frames_per_second: u32,
    pub flags: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Chord {
    pub key_note: u8,
    pub root_note: u8,
    pub chord_mask: i16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawProcessContext {
    pub state: u32,
    pub sample_rate: f64,
    pub project_time_samples: i64,
    pub system_time: i64,
    pub continuous_time_samples: i64,
    pub project_time_music: f64,
    pub bar_position_music: f64,
    pub cycle_start_music: f64,
    pub cycle_end_music: f64,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub chord: Chord,
    pub smpte_offset_subframes: i32,
    pub frame_rate: FrameRate,
    pub samples_to_next_clock: i32,
}

pub const EVENT_NOTE_ON: u16 = 0;
pub const EVENT_NOTE_OFF: u16 = 1;
pub const EVENT_DATA: u16 = 2;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawNoteOnEvent {
    pub channel: i16,
    pub pitch: i16,
    pub tuning: f32,
    pub velocity: f32,
    pub length: i32,
    pub note_id: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawNoteOffEvent {
    pub channel: i16,
    pub pitch: i16,
    pub velocity: f32,
    pub note_id: i32,
    pub tuning: f32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawDataEvent {
    pub size: u32,
    pub kind: u32,
    pub bytes: *const u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union RawEventBody {
    pub note_on: RawNoteOnEvent,
    pub note_off: RawNoteOffEvent,
    pub data: RawDataEvent,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawEvent {
    pub bus_index: i32,
    pub sample_offset: i32,
    pub ppq_position: f64,
    pub flags: u16,
    pub event_type: u16,
    pub body: RawEventBody,
}

// -- helpers ----------------------------------------------------------------

/// Borrow an interface pointer's vtable.
///
/// # Safety
/// `this` must be a valid pointer to an object whose first field is a
/// pointer to a `V`.
pub unsafe fn get_vtbl<'a, V>(this: *mut c_void) -> &'a V {
    &**(this as *mut *mut V)
}

pub fn read_string128(raw: &String128) -> String {
    let end = raw.iter().position(|&c| c == 0).unwrap_or(raw.len());
    String::from_utf16_lossy(&raw[..end])
}

pub fn write_string128(target: &mut String128, source: &str) {
    let mut length = 0;
    for (slot, unit) in target[..127].iter_mut().zip(source.encode_utf16()) {
        *slot = unit;
        length += 1;
    }
    target[length] = 0;
}

pub fn to_utf16_null(source: &str) -> Vec<u16> {
    source.encode_utf16().chain(std::iter::once(0)).collect()
}

pub fn read_utf16_ptr(raw: *const u16) -> String {
    if raw.is_null() {
        return String::new();
    }
    let mut units = Vec::new();
    let mut cursor = raw;
    unsafe {
        while *cursor != 0 {
            units.push(*cursor);
            cursor = cursor.add(1);
        }
    }
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string128_roundtrip_truncates() {
        let mut buffer: String128 = [0; 128];
        write_string128(&mut buffer, "Cutoff Frequency");
        assert_eq!(read_string128(&buffer), "Cutoff Frequency");

        let long = "x".repeat(300);
        write_string128(&mut buffer, &long);
        assert_eq!(read_string128(&buffer).len(), 127);
    }

    #[test]
    fn utf16_pointer_roundtrip() {
        let wide = to_utf16_null("Hällo");
        assert_eq!(read_utf16_ptr(wide.as_ptr()), "Hällo");
        assert_eq!(read_utf16_ptr(std::ptr::null()), "");
    }
}
