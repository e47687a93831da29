//! Wire types for the legacy callback-style plugin ABI.
//!
//! The legacy dispatcher encodes its semantics into opcodes; on the wire each
//! opcode's `data` argument is flattened into one variant of [`EventPayload`],
//! preserving whether it was an integer, a struct, a byte buffer, or a marker
//! asking the other side to allocate and fill the output.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One dispatched event, either host→plugin (dispatcher) or plugin→host
/// (callback channel). `value_payload` is only used by the two speaker
/// arrangement opcodes, the only events where `value` is a pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub opcode: i32,
    pub index: i32,
    pub value: i64,
    pub option: f32,
    pub payload: EventPayload,
    pub value_payload: Option<EventPayload>,
}

/// Response counterpart of [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    pub return_value: i64,
    pub payload: EventPayload,
    pub value_payload: Option<EventPayload>,
}

impl EventResult {
    pub fn value(return_value: i64) -> Self {
        Self {
            return_value,
            payload: EventPayload::None,
            value_payload: None,
        }
    }
}

/// The `data` argument of a dispatched event, flattened per opcode.
///
/// `Wants*` variants are request markers: they tell the receiving side to
/// allocate the output and send it back inline in the [`EventResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    None,
    /// Raw bytes, e.g. a state chunk passed to `SetChunk`.
    Bytes(Vec<u8>),
    /// A NUL-free C string argument.
    Str(String),
    /// An X11 window handle or other pointer passed through as an integer.
    NativeHandle(u64),
    /// Snapshot of the host-visible effect struct.
    Effect(EffectFields),
    /// A bundle of MIDI events for `ProcessEvents`.
    Events(MidiEventBundle),
    TimeInfo(TimeInfo),
    Rect(Rect),
    IoProperties(IoProperties),
    ParameterProperties(ParameterProperties),
    MidiKeyName(MidiKeyName),
    SpeakerArrangement(SpeakerArrangement),
    /// The receiver should respond with a string payload.
    WantsString,
    /// The receiver should respond with the chunk bytes.
    WantsChunkBuffer,
    /// The receiver should respond with the editor rectangle.
    WantsRect,
    /// The receiver should respond with a fresh effect struct snapshot
    /// (late-initialising plugins fill fields only during `Open`).
    WantsEffectUpdate,
    /// The receiver should respond with a shared audio buffer layout.
    WantsAudioShmConfig,
    /// Shared audio buffer layout, sent back for `MainsChanged(enable)`.
    AudioShmConfig(super::AudioShmConfig),
}

/// The serializable fields of the opaque effect struct. Function pointers and
/// reserved slots never cross the process boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectFields {
    pub num_programs: i32,
    pub num_params: i32,
    pub num_inputs: i32,
    pub num_outputs: i32,
    pub flags: i32,
    pub initial_delay: i32,
    pub unique_id: i32,
    pub version: i32,
}

/// One MIDI event with its intra-block offset. System-exclusive data keeps
/// its full byte payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MidiEvent {
    Midi {
        delta_frames: i32,
        data: [u8; 4],
        detune: i8,
        note_off_velocity: u8,
    },
    SysEx {
        delta_frames: i32,
        data: Vec<u8>,
    },
}

pub type MidiEventBundle = SmallVec<[MidiEvent; 16]>;

/// Transport snapshot, mirroring the ABI's time info struct field for field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeInfo {
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

pub mod time_info_flags {
    pub const TRANSPORT_CHANGED: i32 = 1;
    pub const TRANSPORT_PLAYING: i32 = 1 << 1;
    pub const TRANSPORT_CYCLE_ACTIVE: i32 = 1 << 2;
    pub const TRANSPORT_RECORDING: i32 = 1 << 3;
    pub const NANOS_VALID: i32 = 1 << 8;
    pub const PPQ_POS_VALID: i32 = 1 << 9;
    pub const TEMPO_VALID: i32 = 1 << 10;
    pub const BARS_VALID: i32 = 1 << 11;
    pub const CYCLE_POS_VALID: i32 = 1 << 12;
    pub const TIME_SIG_VALID: i32 = 1 << 13;
    pub const SMPTE_VALID: i32 = 1 << 14;
    pub const CLOCK_VALID: i32 = 1 << 15;
}

/// Editor rectangle. The ABI uses 16-bit coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

/// Pin properties for `GetInputProperties`/`GetOutputProperties`. The host
/// may pre-populate the struct, so the request carries it both ways.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoProperties {
    pub label: String,
    pub flags: i32,
    pub arrangement_type: i32,
    pub short_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterProperties {
    pub step_float: f32,
    pub small_step_float: f32,
    pub large_step_float: f32,
    pub label: String,
    pub flags: i32,
    pub min_integer: i32,
    pub max_integer: i32,
    pub step_integer: i32,
    pub large_step_integer: i32,
    pub short_label: String,
    pub display_index: i16,
    pub category: i16,
    pub num_parameters_in_category: i16,
    pub category_label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiKeyName {
    pub this_program_index: i32,
    pub this_key_number: i32,
    pub key_name: String,
}

/// A speaker arrangement with its per-channel speaker types. The fixed-size
/// ABI struct is rebuilt from this on the receiving side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerArrangement {
    pub kind: i32,
    pub speakers: Vec<i32>,
}

/// Request on the parameters channel. `value` is set for `setParameter` and
/// absent for `getParameter`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRequest {
    pub index: i32,
    pub value: Option<f32>,
}

/// Response on the parameters channel. Carries the value for `getParameter`
/// and serves as a bare acknowledgement for `setParameter`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterResponse {
    pub value: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn event_roundtrips_with_marker_payload() {
        let event = Event {
            opcode: crate::vst2::abi::opcodes::GET_CHUNK,
            index: 0,
            value: 0,
            option: 0.0,
            payload: EventPayload::WantsChunkBuffer,
            value_payload: None,
        };

        let bytes = codec::encode(&event).unwrap();
        let decoded: Event = codec::decode(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn event_roundtrips_midi_bundle() {
        let mut events = MidiEventBundle::new();
        events.push(MidiEvent::Midi {
            delta_frames: 0,
            data: [0x90, 60, 100, 0],
            detune: 0,
            note_off_velocity: 0,
        });
        events.push(MidiEvent::SysEx {
            delta_frames: 32,
            data: vec![0xf0, 0x7e, 0xf7],
        });

        let event = Event {
            opcode: crate::vst2::abi::opcodes::PROCESS_EVENTS,
            index: 0,
            value: 0,
            option: 0.0,
            payload: EventPayload::Events(events.clone()),
            value_payload: None,
        };

        let bytes = codec::encode(&event).unwrap();
        let decoded: Event = codec::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, EventPayload::Events(events));
    }

    #[test]
    fn speaker_arrangement_travels_in_both_slots() {
        let event = Event {
            opcode: crate::vst2::abi::opcodes::SET_SPEAKER_ARRANGEMENT,
            index: 0,
            value: 0,
            option: 0.0,
            payload: EventPayload::SpeakerArrangement(SpeakerArrangement {
                kind: 1,
                speakers: vec![1, 2],
            }),
            value_payload: Some(EventPayload::SpeakerArrangement(SpeakerArrangement {
                kind: 1,
                speakers: vec![3, 4],
            })),
        };

        let bytes = codec::encode(&event).unwrap();
        let decoded: Event = codec::decode(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn parameter_request_shapes() {
        let set = ParameterRequest {
            index: 7,
            value: Some(0.25),
        };
        let get = ParameterRequest {
            index: 7,
            value: None,
        };

        let set_decoded: ParameterRequest = codec::decode(&codec::encode(&set).unwrap()).unwrap();
        let get_decoded: ParameterRequest = codec::decode(&codec::encode(&get).unwrap()).unwrap();
        assert_eq!(set, set_decoded);
        assert_eq!(get, get_decoded);
    }
}
