//! The legacy plugin ABI at the byte level: the opaque effect struct, its
//! opcodes, and the fixed C structs that travel through `data` pointers.
//! Conversions to and from the wire types live here too, so both sides of
//! the bridge rebuild identical structs.

use crate::protocol::vst2::{
    EffectFields, IoProperties, MidiEvent, MidiEventBundle, MidiKeyName, ParameterProperties,
    Rect, SpeakerArrangement, TimeInfo,
};
use std::ffi::{c_char, c_void};

/// `'VstP'`, the magic every effect struct starts with.
pub const EFFECT_MAGIC: i32 = 0x5673_7450;

pub type DispatcherProc =
    unsafe extern "C" fn(*mut AEffect, i32, i32, isize, *mut c_void, f32) -> isize;
pub type ProcessProc = unsafe extern "C" fn(*mut AEffect, *mut *mut f32, *mut *mut f32, i32);
pub type ProcessDoubleProc =
    unsafe extern "C" fn(*mut AEffect, *mut *mut f64, *mut *mut f64, i32);
pub type SetParameterProc = unsafe extern "C" fn(*mut AEffect, i32, f32);
pub type GetParameterProc = unsafe extern "C" fn(*mut AEffect, i32) -> f32;
/// The host callback handed to the plugin's entry point.
pub type HostCallbackProc =
    unsafe extern "C" fn(*mut AEffect, i32, i32, isize, *mut c_void, f32) -> isize;

/// The opaque effect struct shared with the DAW. Field order and widths are
/// fixed by the ABI.
#[repr(C)]
pub struct AEffect {
    pub magic: i32,
    pub dispatcher: Option<DispatcherProc>,
    pub process: Option<ProcessProc>,
    pub set_parameter: Option<SetParameterProc>,
    pub get_parameter: Option<GetParameterProc>,
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    /// Reserved for the host. The stub stores its bridge pointer here so the
    /// free-function thunks can find it again without any process globals.
    pub reserved1: isize,
    pub reserved2: isize,
    pub initial_delay: i32,
    pub real_qualities: i32,
    pub off_qualities: i32,
    pub io_ratio: f32,
    pub object: *mut c_void,
    pub user: *mut c_void,
    pub unique_id: i32,
    pub version: i32,
    pub process_replacing: Option<ProcessProc>,
    pub process_double_replacing: Option<ProcessDoubleProc>,
    pub future: [u8; 56],
}

impl AEffect {
    /// Zero-initialised struct; some DAW bridges crash on uninitialised
    /// fields before `Open` completes.
    pub fn zeroed() -> Self {
        unsafe { std::mem::zeroed() }
    }
}

pub mod flags {
    pub const HAS_EDITOR: i32 = 1;
    pub const CAN_REPLACING: i32 = 1 << 4;
    pub const PROGRAM_CHUNKS: i32 = 1 << 5;
    pub const IS_SYNTH: i32 = 1 << 8;
    pub const NO_SOUND_IN_STOP: i32 = 1 << 9;
    pub const CAN_DOUBLE_REPLACING: i32 = 1 << 12;
}

/// Dispatcher opcodes (host→plugin).
pub mod opcodes {
    pub const OPEN: i32 = 0;
    pub const CLOSE: i32 = 1;
    pub const SET_PROGRAM: i32 = 2;
    pub const GET_PROGRAM: i32 = 3;
    pub const SET_PROGRAM_NAME: i32 = 4;
    pub const GET_PROGRAM_NAME: i32 = 5;
    pub const GET_PARAM_LABEL: i32 = 6;
    pub const GET_PARAM_DISPLAY: i32 = 7;
    pub const GET_PARAM_NAME: i32 = 8;
    pub const SET_SAMPLE_RATE: i32 = 10;
    pub const SET_BLOCK_SIZE: i32 = 11;
    pub const MAINS_CHANGED: i32 = 12;
    pub const EDIT_GET_RECT: i32 = 13;
    pub const EDIT_OPEN: i32 = 14;
    pub const EDIT_CLOSE: i32 = 15;
    pub const EDIT_IDLE: i32 = 19;
    pub const GET_CHUNK: i32 = 23;
    pub const SET_CHUNK: i32 = 24;
    pub const PROCESS_EVENTS: i32 = 25;
    pub const CAN_BE_AUTOMATED: i32 = 26;
    pub const STRING_TO_PARAMETER: i32 = 27;
    pub const GET_PROGRAM_NAME_INDEXED: i32 = 29;
    pub const GET_INPUT_PROPERTIES: i32 = 33;
    pub const GET_OUTPUT_PROPERTIES: i32 = 34;
    pub const GET_PLUG_CATEGORY: i32 = 35;
    pub const SET_SPEAKER_ARRANGEMENT: i32 = 42;
    pub const SET_BYPASS: i32 = 44;
    pub const GET_EFFECT_NAME: i32 = 45;
    pub const GET_VENDOR_STRING: i32 = 47;
    pub const GET_PRODUCT_STRING: i32 = 48;
    pub const GET_VENDOR_VERSION: i32 = 49;
    pub const VENDOR_SPECIFIC: i32 = 50;
    pub const CAN_DO: i32 = 51;
    pub const GET_TAIL_SIZE: i32 = 52;
    pub const GET_PARAMETER_PROPERTIES: i32 = 56;
    pub const GET_VST_VERSION: i32 = 58;
    pub const GET_MIDI_KEY_NAME: i32 = 66;
    pub const BEGIN_SET_PROGRAM: i32 = 67;
    pub const END_SET_PROGRAM: i32 = 68;
    pub const GET_SPEAKER_ARRANGEMENT: i32 = 69;
    pub const SHELL_GET_NEXT_PLUGIN: i32 = 70;
    pub const START_PROCESS: i32 = 71;
    pub const STOP_PROCESS: i32 = 72;
    pub const SET_PROCESS_PRECISION: i32 = 77;
}

/// Host callback opcodes (plugin→host).
pub mod host_opcodes {
    pub const AUTOMATE: i32 = 0;
    pub const VERSION: i32 = 1;
    pub const CURRENT_ID: i32 = 2;
    pub const IDLE: i32 = 3;
    pub const WANT_MIDI: i32 = 6;
    pub const GET_TIME: i32 = 7;
    pub const PROCESS_EVENTS: i32 = 8;
    pub const IO_CHANGED: i32 = 13;
    pub const SIZE_WINDOW: i32 = 15;
    pub const GET_SAMPLE_RATE: i32 = 16;
    pub const GET_BLOCK_SIZE: i32 = 17;
    pub const GET_INPUT_LATENCY: i32 = 18;
    pub const GET_OUTPUT_LATENCY: i32 = 19;
    pub const GET_CURRENT_PROCESS_LEVEL: i32 = 23;
    pub const GET_AUTOMATION_STATE: i32 = 24;
    pub const GET_VENDOR_STRING: i32 = 32;
    pub const GET_PRODUCT_STRING: i32 = 33;
    pub const GET_VENDOR_VERSION: i32 = 34;
    pub const VENDOR_SPECIFIC: i32 = 35;
    pub const CAN_DO: i32 = 37;
    pub const GET_LANGUAGE: i32 = 38;
    pub const GET_DIRECTORY: i32 = 41;
    pub const UPDATE_DISPLAY: i32 = 42;
    pub const BEGIN_EDIT: i32 = 43;
    pub const END_EDIT: i32 = 44;
    /// REAPER's host-extension probe. Answered locally with 0.
    pub const DEAD_BEEF: i32 = 0xdead_beefu32 as i32;
}

/// Largest string any opcode writes into a caller-provided buffer.
pub const MAX_STRING_LEN: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct VstRect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstTimeInfo {
    pub sample_pos: f64,
    pub sample_rate: f64,
    pub nanoseconds: f64,
    pub ppq_pos: f64,
    pub tempo: f64,
    pub bar_start_pos: f64,
    pub cycle_start_pos: f64,
    pub cycle_end_pos: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
    pub smpte_offset: i32,
    pub smpte_frame_rate: i32,
    pub samples_to_next_clock: i32,
    pub flags: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstPinProperties {
    pub label: [c_char; 64],
    pub flags: i32,
    pub arrangement_type: i32,
    pub short_label: [c_char; 8],
    pub future: [u8; 48],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstParameterProperties {
    pub step_float: f32,
    pub small_step_float: f32,
    pub large_step_float: f32,
    pub label: [c_char; 64],
    pub flags: i32,
    pub min_integer: i32,
    pub max_integer: i32,
    pub step_integer: i32,
    pub large_step_integer: i32,
    pub short_label: [c_char; 8],
    pub display_index: i16,
    pub category: i16,
    pub num_parameters_in_category: i16,
    pub reserved: i16,
    pub category_label: [c_char; 24],
    pub future: [u8; 16],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstMidiKeyName {
    pub this_program_index: i32,
    pub this_key_number: i32,
    pub key_name: [c_char; 64],
    pub reserved: i32,
    pub flags: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstSpeakerProperties {
    pub azimuth: f32,
    pub elevation: f32,
    pub radius: f32,
    pub reserved: f32,
    pub name: [c_char; 64],
    pub speaker_type: i32,
    pub future: [u8; 28],
}

/// Nominal maximum channel count of the fixed-size arrangement struct.
pub const MAX_SPEAKERS: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstSpeakerArrangement {
    pub arrangement_type: i32,
    pub num_channels: i32,
    pub speakers: [VstSpeakerProperties; MAX_SPEAKERS],
}

pub const EVENT_TYPE_MIDI: i32 = 1;
pub const EVENT_TYPE_SYSEX: i32 = 6;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub data: [u8; 16],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstMidiEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub note_length: i32,
    pub note_offset: i32,
    pub midi_data: [u8; 4],
    pub detune: i8,
    pub note_off_velocity: u8,
    pub reserved1: u8,
    pub reserved2: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VstSysExEvent {
    pub event_type: i32,
    pub byte_size: i32,
    pub delta_frames: i32,
    pub flags: i32,
    pub dump_bytes: i32,
    pub reserved1: isize,
    pub sysex_dump: *mut u8,
    pub reserved2: isize,
}

/// Upper bound on events in one rebuilt `VstEvents` block. Bundles beyond
/// this are truncated with a warning; no real host comes close.
pub const MAX_EVENTS: usize = 512;

#[repr(C)]
pub struct VstEvents {
    pub num_events: i32,
    pub reserved: isize,
    pub events: [*mut VstEvent; MAX_EVENTS],
}

// ---------------------------------------------------------------------------
// Fixed-buffer string helpers

pub fn read_c_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn write_c_string(target: &mut [c_char], source: &str) {
    let length = source.len().min(target.len().saturating_sub(1));
    for (slot, byte) in target[..length].iter_mut().zip(source.bytes()) {
        *slot = byte as c_char;
    }
    target[length] = 0;
}

/// Read a NUL-terminated string from an opcode's `data` pointer.
///
/// # Safety
/// `data` must be a valid NUL-terminated C string.
pub unsafe fn read_c_string_ptr(data: *const c_char) -> String {
    std::ffi::CStr::from_ptr(data).to_string_lossy().into_owned()
}

// ---------------------------------------------------------------------------
// Wire type conversions

impl EffectFields {
    pub fn from_effect(effect: &AEffect) -> Self {
        Self {
            num_programs: effect.num_programs,
            num_params: effect.num_params,
            num_inputs: effect.num_inputs,
            num_outputs: effect.num_outputs,
            flags: effect.flags,
            initial_delay: effect.initial_delay,
            unique_id: effect.unique_id,
            version: effect.version,
        }
    }

    /// Copy the serializable fields into the host-visible struct, leaving the
    /// function pointers and reserved slots alone.
    pub fn apply_to(&self, effect: &mut AEffect) {
        effect.magic = EFFECT_MAGIC;
        effect.num_programs = self.num_programs;
        effect.num_params = self.num_params;
        effect.num_inputs = self.num_inputs;
        effect.num_outputs = self.num_outputs;
        effect.flags = self.flags;
        effect.initial_delay = self.initial_delay;
        effect.unique_id = self.unique_id;
        effect.version = self.version;
    }
}

impl From<&VstTimeInfo> for TimeInfo {
    fn from(raw: &VstTimeInfo) -> Self {
        Self {
            sample_pos: raw.sample_pos,
            sample_rate: raw.sample_rate,
            nanoseconds: raw.nanoseconds,
            ppq_pos: raw.ppq_pos,
            tempo: raw.tempo,
            bar_start_pos: raw.bar_start_pos,
            cycle_start_pos: raw.cycle_start_pos,
            cycle_end_pos: raw.cycle_end_pos,
            time_sig_numerator: raw.time_sig_numerator,
            time_sig_denominator: raw.time_sig_denominator,
            smpte_offset: raw.smpte_offset,
            smpte_frame_rate: raw.smpte_frame_rate,
            samples_to_next_clock: raw.samples_to_next_clock,
            flags: raw.flags,
        }
    }
}

impl From<&TimeInfo> for VstTimeInfo {
    fn from(info: &TimeInfo) -> Self {
        Self {
            sample_pos: info.sample_pos,
            sample_rate: info.sample_rate,
            nanoseconds: info.nanoseconds,
            ppq_pos: info.ppq_pos,
            tempo: info.tempo,
            bar_start_pos: info.bar_start_pos,
            cycle_start_pos: info.cycle_start_pos,
            cycle_end_pos: info.cycle_end_pos,
            time_sig_numerator: info.time_sig_numerator,
            time_sig_denominator: info.time_sig_denominator,
            smpte_offset: info.smpte_offset,
            smpte_frame_rate: info.smpte_frame_rate,
            samples_to_next_clock: info.samples_to_next_clock,
            flags: info.flags,
        }
    }
}

impl From<&VstRect> for Rect {
    fn from(raw: &VstRect) -> Self {
        Self {
            top: raw.top,
            left: raw.left,
            bottom: raw.bottom,
            right: raw.right,
        }
    }
}

impl From<&Rect> for VstRect {
    fn from(rect: &Rect) -> Self {
        Self {
            top: rect.top,
            left: rect.left,
            bottom: rect.bottom,
            right: rect.right,
        }
    }
}

impl IoProperties {
    /// # Safety
    /// `raw` must point to a valid pin properties struct.
    pub unsafe fn from_raw(raw: *const VstPinProperties) -> Self {
        let raw = &*raw;
        Self {
            label: read_c_string(&raw.label),
            flags: raw.flags,
            arrangement_type: raw.arrangement_type,
            short_label: read_c_string(&raw.short_label),
        }
    }

    /// # Safety
    /// `target` must point to a writable pin properties struct.
    pub unsafe fn write_to(&self, target: *mut VstPinProperties) {
        let target = &mut *target;
        write_c_string(&mut target.label, &self.label);
        target.flags = self.flags;
        target.arrangement_type = self.arrangement_type;
        write_c_string(&mut target.short_label, &self.short_label);
    }
}

impl ParameterProperties {
    /// # Safety
    /// `raw` must point to a valid parameter properties struct.
    pub unsafe fn from_raw(raw: *const VstParameterProperties) -> Self {
        let raw = &*raw;
        Self {
            step_float: raw.step_float,
            small_step_float: raw.small_step_float,
            large_step_float: raw.large_step_float,
            label: read_c_string(&raw.label),
            flags: raw.flags,
            min_integer: raw.min_integer,
            max_integer: raw.max_integer,
            step_integer: raw.step_integer,
            large_step_integer: raw.large_step_integer,
            short_label: read_c_string(&raw.short_label),
            display_index: raw.display_index,
            category: raw.category,
            num_parameters_in_category: raw.num_parameters_in_category,
            category_label: read_c_string(&raw.category_label),
        }
    }

    /// # Safety
    /// `target` must point to a writable parameter properties struct.
    pub unsafe fn write_to(&self, target: *mut VstParameterProperties) {
        let target = &mut *target;
        target.step_float = self.step_float;
        target.small_step_float = self.small_step_float;
        target.large_step_float = self.large_step_float;
        write_c_string(&mut target.label, &self.label);
        target.flags = self.flags;
        target.min_integer = self.min_integer;
        target.max_integer = self.max_integer;
        target.step_integer = self.step_integer;
        target.large_step_integer = self.large_step_integer;
        write_c_string(&mut target.short_label, &self.short_label);
        target.display_index = self.display_index;
        target.category = self.category;
        target.num_parameters_in_category = self.num_parameters_in_category;
        write_c_string(&mut target.category_label, &self.category_label);
    }
}

impl MidiKeyName {
    /// # Safety
    /// `raw` must point to a valid MIDI key name struct.
    pub unsafe fn from_raw(raw: *const VstMidiKeyName) -> Self {
        let raw = &*raw;
        Self {
            this_program_index: raw.this_program_index,
            this_key_number: raw.this_key_number,
            key_name: read_c_string(&raw.key_name),
        }
    }

    /// # Safety
    /// `target` must point to a writable MIDI key name struct.
    pub unsafe fn write_to(&self, target: *mut VstMidiKeyName) {
        let target = &mut *target;
        target.this_program_index = self.this_program_index;
        target.this_key_number = self.this_key_number;
        write_c_string(&mut target.key_name, &self.key_name);
    }
}

impl SpeakerArrangement {
    /// # Safety
    /// `raw` must point to a valid speaker arrangement struct.
    pub unsafe fn from_raw(raw: *const VstSpeakerArrangement) -> Self {
        let raw = &*raw;
        let channels = (raw.num_channels.max(0) as usize).min(MAX_SPEAKERS);
        Self {
            kind: raw.arrangement_type,
            speakers: raw.speakers[..channels]
                .iter()
                .map(|speaker| speaker.speaker_type)
                .collect(),
        }
    }

    /// # Safety
    /// `target` must point to a writable speaker arrangement struct.
    pub unsafe fn write_to(&self, target: *mut VstSpeakerArrangement) {
        let target = &mut *target;
        target.arrangement_type = self.kind;
        target.num_channels = self.speakers.len() as i32;
        for (slot, &speaker_type) in target
            .speakers
            .iter_mut()
            .zip(self.speakers.iter().take(MAX_SPEAKERS))
        {
            *slot = std::mem::zeroed();
            slot.speaker_type = speaker_type;
        }
    }
}

/// Read a host- or plugin-provided event block into a wire bundle.
///
/// # Safety
/// `raw` must point to a valid `VstEvents` block whose pointer array holds
/// `num_events` valid event pointers.
pub unsafe fn read_events(raw: *const VstEvents) -> MidiEventBundle {
    let header = &*raw;
    let pointers = header.events.as_ptr();
    let mut bundle = MidiEventBundle::new();

    for i in 0..header.num_events.max(0) as usize {
        let event = *pointers.add(i);
        if event.is_null() {
            continue;
        }
        match (*event).event_type {
            EVENT_TYPE_MIDI => {
                let midi = &*(event as *const VstMidiEvent);
                bundle.push(MidiEvent::Midi {
                    delta_frames: midi.delta_frames,
                    data: midi.midi_data,
                    detune: midi.detune,
                    note_off_velocity: midi.note_off_velocity,
                });
            }
            EVENT_TYPE_SYSEX => {
                let sysex = &*(event as *const VstSysExEvent);
                let data = if sysex.sysex_dump.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(sysex.sysex_dump, sysex.dump_bytes.max(0) as usize)
                        .to_vec()
                };
                bundle.push(MidiEvent::SysEx {
                    delta_frames: sysex.delta_frames,
                    data,
                });
            }
            other => tracing::trace!(event_type = other, "dropping unknown event type"),
        }
    }

    bundle
}

enum EventStorage {
    Midi(Box<VstMidiEvent>),
    SysEx(Box<VstSysExEvent>, #[allow(dead_code)] Box<[u8]>),
}

/// An owned, ABI-compatible `VstEvents` block rebuilt from a wire bundle.
/// Keeps every event (and sysex dump) alive for as long as the block is
/// handed out.
pub struct OwnedVstEvents {
    _storage: Vec<EventStorage>,
    block: Box<VstEvents>,
}

impl OwnedVstEvents {
    pub fn new(bundle: &MidiEventBundle) -> Self {
        if bundle.len() > MAX_EVENTS {
            tracing::warn!(
                events = bundle.len(),
                "truncating oversized event bundle to {MAX_EVENTS}"
            );
        }

        let mut storage = Vec::with_capacity(bundle.len().min(MAX_EVENTS));
        let mut block = Box::new(VstEvents {
            num_events: 0,
            reserved: 0,
            events: [std::ptr::null_mut(); MAX_EVENTS],
        });

        for (i, event) in bundle.iter().take(MAX_EVENTS).enumerate() {
            let pointer = match event {
                MidiEvent::Midi {
                    delta_frames,
                    data,
                    detune,
                    note_off_velocity,
                } => {
                    let mut midi = Box::new(VstMidiEvent {
                        event_type: EVENT_TYPE_MIDI,
                        byte_size: std::mem::size_of::<VstMidiEvent>() as i32,
                        delta_frames: *delta_frames,
                        flags: 0,
                        note_length: 0,
                        note_offset: 0,
                        midi_data: *data,
                        detune: *detune,
                        note_off_velocity: *note_off_velocity,
                        reserved1: 0,
                        reserved2: 0,
                    });
                    let pointer = &mut *midi as *mut VstMidiEvent as *mut VstEvent;
                    storage.push(EventStorage::Midi(midi));
                    pointer
                }
                MidiEvent::SysEx { delta_frames, data } => {
                    let mut dump = data.clone().into_boxed_slice();
                    let mut sysex = Box::new(VstSysExEvent {
                        event_type: EVENT_TYPE_SYSEX,
                        byte_size: std::mem::size_of::<VstSysExEvent>() as i32,
                        delta_frames: *delta_frames,
                        flags: 0,
                        dump_bytes: dump.len() as i32,
                        reserved1: 0,
                        sysex_dump: dump.as_mut_ptr(),
                        reserved2: 0,
                    });
                    let pointer = &mut *sysex as *mut VstSysExEvent as *mut VstEvent;
                    storage.push(EventStorage::SysEx(sysex, dump));
                    pointer
                }
            };
            block.events[i] = pointer;
            block.num_events += 1;
        }

        Self {
            _storage: storage,
            block,
        }
    }

    pub fn as_ptr(&self) -> *const VstEvents {
        &*self.block
    }

    pub fn as_mut_ptr(&mut self) -> *mut VstEvents {
        &mut *self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_fields_roundtrip_through_struct() {
        let mut effect = AEffect::zeroed();
        let fields = EffectFields {
            num_programs: 4,
            num_params: 12,
            num_inputs: 2,
            num_outputs: 2,
            flags: flags::CAN_REPLACING | flags::PROGRAM_CHUNKS,
            initial_delay: 64,
            unique_id: 0x5647_0001,
            version: 1200,
        };

        fields.apply_to(&mut effect);
        assert_eq!(effect.magic, EFFECT_MAGIC);
        assert_eq!(EffectFields::from_effect(&effect), fields);
    }

    #[test]
    fn c_string_helpers_truncate_and_terminate() {
        let mut buffer = [0 as c_char; 8];
        write_c_string(&mut buffer, "much longer than the buffer");
        assert_eq!(buffer[7], 0);
        assert_eq!(read_c_string(&buffer).len(), 7);

        write_c_string(&mut buffer, "ok");
        assert_eq!(read_c_string(&buffer), "ok");
    }

    #[test]
    fn events_roundtrip_through_owned_block() {
        let mut bundle = MidiEventBundle::new();
        bundle.push(MidiEvent::Midi {
            delta_frames: 3,
            data: [0x90, 60, 100, 0],
            detune: 0,
            note_off_velocity: 64,
        });
        bundle.push(MidiEvent::SysEx {
            delta_frames: 16,
            data: vec![0xf0, 0x01, 0x02, 0xf7],
        });

        let owned = OwnedVstEvents::new(&bundle);
        let restored = unsafe { read_events(owned.as_ptr()) };
        assert_eq!(restored, bundle);
    }

    #[test]
    fn speaker_arrangement_roundtrip() {
        let arrangement = SpeakerArrangement {
            kind: 1,
            speakers: vec![1, 2],
        };

        let mut raw: VstSpeakerArrangement = unsafe { std::mem::zeroed() };
        unsafe { arrangement.write_to(&mut raw) };
        assert_eq!(raw.num_channels, 2);

        let restored = unsafe { SpeakerArrangement::from_raw(&raw) };
        assert_eq!(restored, arrangement);
    }
}
