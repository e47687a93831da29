//! Translating raw dispatcher and host-callback arguments to wire events and
//! back. Each opcode's untyped `data`/`value` pair becomes one payload
//! variant; output conventions (out-pointers, caller buffers, mutated
//! structs) are reapplied on the way back.

use super::abi::{self, opcodes, AEffect, HostCallbackProc, VstRect, VstTimeInfo};
use crate::protocol::vst2::{
    Event, EventPayload, EventResult, IoProperties, MidiKeyName, ParameterProperties,
    SpeakerArrangement, TimeInfo,
};
use std::ffi::{c_char, c_void};

/// Build the wire event for one host→plugin dispatcher call.
///
/// # Safety
/// `data` and `value` must match the opcode's ABI contract (e.g. a valid
/// chunk pointer of `value` bytes for `SET_CHUNK`).
pub unsafe fn read_dispatch_event(
    opcode: i32,
    index: i32,
    value: isize,
    data: *mut c_void,
    option: f32,
) -> Event {
    let payload = match opcode {
        // Some improperly coded plugins initialise parts of their effect
        // struct only during `Open`; request a fresh snapshot.
        opcodes::OPEN => EventPayload::WantsEffectUpdate,
        opcodes::MAINS_CHANGED => {
            if value == 1 {
                EventPayload::WantsAudioShmConfig
            } else {
                EventPayload::None
            }
        }
        opcodes::EDIT_GET_RECT => EventPayload::WantsRect,
        // The window handle is only meaningful as an integer on the far side.
        opcodes::EDIT_OPEN => EventPayload::NativeHandle(data as usize as u64),
        opcodes::GET_CHUNK => EventPayload::WantsChunkBuffer,
        opcodes::SET_CHUNK => {
            // The host passes the chunk length through `value`.
            let bytes = std::slice::from_raw_parts(data as *const u8, value.max(0) as usize);
            EventPayload::Bytes(bytes.to_vec())
        }
        opcodes::PROCESS_EVENTS => {
            EventPayload::Events(abi::read_events(data as *const abi::VstEvents))
        }
        // The host may have pre-populated these structs, so they travel in
        // the request too.
        opcodes::GET_INPUT_PROPERTIES | opcodes::GET_OUTPUT_PROPERTIES => {
            EventPayload::IoProperties(IoProperties::from_raw(data as *const _))
        }
        opcodes::GET_PARAMETER_PROPERTIES => {
            EventPayload::ParameterProperties(ParameterProperties::from_raw(data as *const _))
        }
        opcodes::GET_MIDI_KEY_NAME => {
            EventPayload::MidiKeyName(MidiKeyName::from_raw(data as *const _))
        }
        opcodes::SET_SPEAKER_ARRANGEMENT | opcodes::GET_SPEAKER_ARRANGEMENT => {
            EventPayload::SpeakerArrangement(SpeakerArrangement::from_raw(data as *const _))
        }
        // REAPER passes a non-pointer `data` argument here.
        opcodes::VENDOR_SPECIFIC if index == opcodes::SET_SPEAKER_ARRANGEMENT => {
            EventPayload::NativeHandle(data as usize as u64)
        }
        opcodes::SET_PROGRAM_NAME | opcodes::CAN_DO | opcodes::STRING_TO_PARAMETER => {
            if data.is_null() {
                EventPayload::None
            } else {
                EventPayload::Str(abi::read_c_string_ptr(data as *const c_char))
            }
        }
        opcodes::GET_PROGRAM_NAME
        | opcodes::GET_PARAM_LABEL
        | opcodes::GET_PARAM_DISPLAY
        | opcodes::GET_PARAM_NAME
        | opcodes::GET_PROGRAM_NAME_INDEXED
        | opcodes::GET_EFFECT_NAME
        | opcodes::GET_VENDOR_STRING
        | opcodes::GET_PRODUCT_STRING
        | opcodes::SHELL_GET_NEXT_PLUGIN => EventPayload::WantsString,
        _ => EventPayload::None,
    };

    // The two speaker arrangement opcodes are the only events where `value`
    // is a pointer (to the input arrangement) instead of an integer.
    let value_payload = match opcode {
        opcodes::SET_SPEAKER_ARRANGEMENT | opcodes::GET_SPEAKER_ARRANGEMENT => Some(
            EventPayload::SpeakerArrangement(SpeakerArrangement::from_raw(value as *const _)),
        ),
        _ => None,
    };

    Event {
        opcode,
        index,
        value: value as i64,
        option,
        payload,
        value_payload,
    }
}

/// Storage owned by the bridge that ABI out-pointers may reference after a
/// dispatcher call returns.
pub struct DispatchWriteback<'a> {
    /// Backs the raw pointer handed out for `GET_CHUNK`. Stays valid until
    /// the next call on the dispatch channel.
    pub chunk: &'a mut Vec<u8>,
    /// Backs the pointer handed out for `EDIT_GET_RECT`.
    pub rect: &'a mut VstRect,
}

/// Apply a dispatcher response to the ABI's output conventions and return
/// the call's return value.
///
/// # Safety
/// `data`/`value` must be the same pointers the original dispatcher call
/// received, and `effect` the host-visible effect struct.
pub unsafe fn write_dispatch_result(
    result: &EventResult,
    opcode: i32,
    value: isize,
    data: *mut c_void,
    effect: *mut AEffect,
    writeback: &mut DispatchWriteback<'_>,
) -> isize {
    match &result.payload {
        EventPayload::Effect(fields) => {
            fields.apply_to(&mut *effect);
        }
        EventPayload::Rect(rect) => {
            // The plugin returns a pointer to its rectangle; keep our copy
            // alive in the bridge and hand out its address.
            *writeback.rect = VstRect::from(rect);
            *(data as *mut *mut VstRect) = writeback.rect;
        }
        EventPayload::Bytes(bytes) if opcode == opcodes::GET_CHUNK => {
            writeback.chunk.clear();
            writeback.chunk.extend_from_slice(bytes);
            *(data as *mut *mut u8) = writeback.chunk.as_mut_ptr();
        }
        EventPayload::Str(text) => {
            write_string_to(data as *mut c_char, text);
        }
        EventPayload::IoProperties(properties) => {
            properties.write_to(data as *mut _);
        }
        EventPayload::ParameterProperties(properties) => {
            properties.write_to(data as *mut _);
        }
        EventPayload::MidiKeyName(name) => {
            name.write_to(data as *mut _);
        }
        EventPayload::SpeakerArrangement(arrangement) => {
            arrangement.write_to(data as *mut _);
        }
        _ => {}
    }

    // The input arrangement under the `value` pointer gets the same
    // treatment for `GET_SPEAKER_ARRANGEMENT`.
    if let Some(EventPayload::SpeakerArrangement(arrangement)) = &result.value_payload {
        arrangement.write_to(value as *mut _);
    }

    result.return_value as isize
}

unsafe fn write_string_to(target: *mut c_char, text: &str) {
    if target.is_null() {
        return;
    }
    let buffer = std::slice::from_raw_parts_mut(target, abi::MAX_STRING_LEN);
    abi::write_c_string(buffer, text);
}

/// Replay a plugin→host callback event against the DAW's callback function
/// and capture the result. Used for everything the callback thread does not
/// answer locally or buffer.
///
/// # Safety
/// `effect` must be the host-visible effect struct and `callback` the
/// callback function the DAW passed at module entry.
pub unsafe fn passthrough_host_event(
    effect: *mut AEffect,
    callback: HostCallbackProc,
    event: &Event,
) -> EventResult {
    use super::abi::host_opcodes;

    match event.opcode {
        // The return value is a pointer to the host's transport info; that
        // pointer means nothing across processes, so the struct itself is
        // captured into the response.
        host_opcodes::GET_TIME => {
            let raw = callback(
                effect,
                event.opcode,
                event.index,
                event.value as isize,
                std::ptr::null_mut(),
                event.option,
            ) as *const VstTimeInfo;

            if raw.is_null() {
                EventResult::value(0)
            } else {
                EventResult {
                    return_value: 1,
                    payload: EventPayload::TimeInfo(TimeInfo::from(&*raw)),
                    value_payload: None,
                }
            }
        }
        _ => match &event.payload {
            EventPayload::Events(bundle) => {
                let mut owned = abi::OwnedVstEvents::new(bundle);
                let return_value = callback(
                    effect,
                    event.opcode,
                    event.index,
                    event.value as isize,
                    owned.as_mut_ptr() as *mut c_void,
                    event.option,
                );
                EventResult::value(return_value as i64)
            }
            EventPayload::Str(text) => {
                let text = std::ffi::CString::new(text.as_str()).unwrap_or_default();
                let return_value = callback(
                    effect,
                    event.opcode,
                    event.index,
                    event.value as isize,
                    text.as_ptr() as *mut c_void,
                    event.option,
                );
                EventResult::value(return_value as i64)
            }
            EventPayload::WantsString => {
                let mut buffer = [0 as c_char; abi::MAX_STRING_LEN];
                let return_value = callback(
                    effect,
                    event.opcode,
                    event.index,
                    event.value as isize,
                    buffer.as_mut_ptr() as *mut c_void,
                    event.option,
                );
                EventResult {
                    return_value: return_value as i64,
                    payload: EventPayload::Str(abi::read_c_string(&buffer)),
                    value_payload: None,
                }
            }
            EventPayload::NativeHandle(handle) => {
                let return_value = callback(
                    effect,
                    event.opcode,
                    event.index,
                    event.value as isize,
                    *handle as usize as *mut c_void,
                    event.option,
                );
                EventResult::value(return_value as i64)
            }
            _ => {
                let return_value = callback(
                    effect,
                    event.opcode,
                    event.index,
                    event.value as isize,
                    std::ptr::null_mut(),
                    event.option,
                );
                EventResult::value(return_value as i64)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::vst2::EffectFields;

    #[test]
    fn set_chunk_captures_bytes_with_length_from_value() {
        let chunk = [0xde_u8, 0xad, 0xbe, 0xef];
        let event = unsafe {
            read_dispatch_event(
                opcodes::SET_CHUNK,
                0,
                chunk.len() as isize,
                chunk.as_ptr() as *mut c_void,
                0.0,
            )
        };
        assert_eq!(event.payload, EventPayload::Bytes(chunk.to_vec()));
    }

    #[test]
    fn get_chunk_writes_stable_pointer() {
        let mut chunk_storage = Vec::new();
        let mut rect_storage = VstRect::default();
        let mut out: *mut u8 = std::ptr::null_mut();
        let mut effect = AEffect::zeroed();

        let result = EventResult {
            return_value: 4,
            payload: EventPayload::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            value_payload: None,
        };
        let returned = unsafe {
            write_dispatch_result(
                &result,
                opcodes::GET_CHUNK,
                0,
                &mut out as *mut *mut u8 as *mut c_void,
                &mut effect,
                &mut DispatchWriteback {
                    chunk: &mut chunk_storage,
                    rect: &mut rect_storage,
                },
            )
        };

        assert_eq!(returned, 4);
        assert_eq!(out, chunk_storage.as_mut_ptr());
        let seen = unsafe { std::slice::from_raw_parts(out, 4) };
        assert_eq!(seen, &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn open_response_updates_the_effect_struct() {
        let mut chunk_storage = Vec::new();
        let mut rect_storage = VstRect::default();
        let mut effect = AEffect::zeroed();

        let fields = EffectFields {
            num_programs: 1,
            num_params: 3,
            num_inputs: 2,
            num_outputs: 2,
            flags: abi::flags::CAN_REPLACING,
            initial_delay: 0,
            unique_id: 42,
            version: 1,
        };
        let result = EventResult {
            return_value: 0,
            payload: EventPayload::Effect(fields),
            value_payload: None,
        };
        unsafe {
            write_dispatch_result(
                &result,
                opcodes::OPEN,
                0,
                std::ptr::null_mut(),
                &mut effect,
                &mut DispatchWriteback {
                    chunk: &mut chunk_storage,
                    rect: &mut rect_storage,
                },
            )
        };

        assert_eq!(EffectFields::from_effect(&effect), fields);
        assert_eq!(effect.magic, abi::EFFECT_MAGIC);
    }

    #[test]
    fn speaker_arrangements_read_from_both_slots() {
        let mut output: abi::VstSpeakerArrangement = unsafe { std::mem::zeroed() };
        let mut input: abi::VstSpeakerArrangement = unsafe { std::mem::zeroed() };
        unsafe {
            SpeakerArrangement {
                kind: 1,
                speakers: vec![1, 2],
            }
            .write_to(&mut output);
            SpeakerArrangement {
                kind: 2,
                speakers: vec![3],
            }
            .write_to(&mut input);
        }

        let event = unsafe {
            read_dispatch_event(
                opcodes::SET_SPEAKER_ARRANGEMENT,
                0,
                &mut input as *mut _ as isize,
                &mut output as *mut _ as *mut c_void,
                0.0,
            )
        };

        assert_eq!(
            event.payload,
            EventPayload::SpeakerArrangement(SpeakerArrangement {
                kind: 1,
                speakers: vec![1, 2],
            })
        );
        assert_eq!(
            event.value_payload,
            Some(EventPayload::SpeakerArrangement(SpeakerArrangement {
                kind: 2,
                speakers: vec![3],
            }))
        );
    }

    #[test]
    fn string_getters_become_markers() {
        let event = unsafe {
            read_dispatch_event(
                opcodes::GET_PRODUCT_STRING,
                0,
                0,
                std::ptr::null_mut(),
                0.0,
            )
        };
        assert_eq!(event.payload, EventPayload::WantsString);
    }
}
