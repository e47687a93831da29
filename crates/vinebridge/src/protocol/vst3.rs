//! Wire types for the modern multi-interface plugin ABI.
//!
//! Every request carries the 64-bit instance id of the proxy it belongs to.
//! Message families are grouped per channel: control requests travel
//! host→plugin on the control channel, processor requests on the audio
//! channel, and callbacks plugin→host on the callback channel.

use serde::{Deserialize, Serialize};

pub type InstanceId = u64;

/// 16-byte opaque class identifier. Only compared for equality.
pub type ClassId = [u8; 16];

/// ABI result code. Zero is success.
pub type TResult = i32;

pub mod result {
    use super::TResult;

    pub const OK: TResult = 0;
    pub const TRUE: TResult = 0;
    pub const FALSE: TResult = 1;
    pub const INVALID_ARGUMENT: TResult = 2;
    pub const NOT_IMPLEMENTED: TResult = 3;
    pub const INTERNAL_ERROR: TResult = 4;
    pub const NO_INTERFACE: TResult = -1;
}

/// Which interfaces the real object implements, discovered once at
/// construction time by probing on the host side. The stub's proxy only
/// advertises interfaces that are present here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub audio_processor: bool,
    pub edit_controller: bool,
    pub edit_controller2: bool,
    pub connection_point: bool,
    pub unit_info: bool,
    pub unit_data: bool,
    pub program_list_data: bool,
    pub midi_mapping: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusInfo {
    pub media_type: i32,
    pub direction: i32,
    pub channel_count: i32,
    pub name: String,
    pub bus_type: i32,
    pub flags: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub id: u32,
    pub title: String,
    pub short_title: String,
    pub units: String,
    pub step_count: i32,
    pub default_normalized_value: f64,
    pub unit_id: i32,
    pub flags: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub id: i32,
    pub parent_unit_id: i32,
    pub name: String,
    pub program_list_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramListInfo {
    pub id: i32,
    pub name: String,
    pub program_count: i32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSetup {
    pub process_mode: i32,
    pub double_precision: bool,
    pub max_samples_per_block: i32,
    pub sample_rate: f64,
}

/// Transport context for one processing call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessContext {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterPoint {
    pub sample_offset: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterQueue {
    pub param_id: u32,
    pub points: Vec<ParameterPoint>,
}

/// A typed event from the modern ABI's event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    NoteOn {
        bus_index: i32,
        sample_offset: i32,
        channel: i16,
        pitch: i16,
        velocity: f32,
        note_id: i32,
        tuning: f32,
    },
    NoteOff {
        bus_index: i32,
        sample_offset: i32,
        channel: i16,
        pitch: i16,
        velocity: f32,
        note_id: i32,
    },
    Data {
        bus_index: i32,
        sample_offset: i32,
        kind: u32,
        bytes: Vec<u8>,
    },
}

/// Structured processing data. The audio samples travel in the shared buffer;
/// this carries everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessData {
    pub num_samples: i32,
    pub double_precision: bool,
    pub process_mode: i32,
    pub input_parameter_changes: Vec<ParameterQueue>,
    pub input_events: Vec<Event>,
    pub context: Option<ProcessContext>,
    /// See [`super::AudioRequest::new_realtime_priority`].
    pub new_realtime_priority: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub result: TResult,
    pub output_parameter_changes: Vec<ParameterQueue>,
    pub output_events: Vec<Event>,
    /// Per output bus silence flags, one bit per channel.
    pub silence_flags: Vec<u64>,
}

/// A message exchanged over a connection point. Only messages created by our
/// own message factory can be round-tripped; the attribute list has no
/// enumeration primitive, so foreign message objects are dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyMessage {
    pub message_id: String,
    pub attributes: Vec<(String, AttributeValue)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Str(String),
    Binary(Vec<u8>),
}

/// The peer of a `connect()` call: either another one of our proxies,
/// addressed by id, or an opaque host object that gets a mirror proxy on the
/// plugin side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectTarget {
    /// Connect the two underlying plugin objects directly.
    Proxy(InstanceId),
    /// The host placed its own connection object between the two halves;
    /// `notify()` calls are routed back over the callback channel.
    HostMirror,
}

/// Host→plugin control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlRequest {
    CreateInstance {
        cid: ClassId,
    },
    Destruct {
        instance_id: InstanceId,
    },
    Initialize {
        instance_id: InstanceId,
        /// Name reported by the DAW's host context, mirrored on the plugin
        /// side so the plugin sees the same host identity.
        host_name: String,
    },
    Terminate {
        instance_id: InstanceId,
    },
    SetComponentHandler {
        instance_id: InstanceId,
    },
    Connect {
        instance_id: InstanceId,
        other: ConnectTarget,
    },
    Disconnect {
        instance_id: InstanceId,
        other: Option<InstanceId>,
    },
    Notify {
        instance_id: InstanceId,
        message: NotifyMessage,
    },
    GetControllerClassId {
        instance_id: InstanceId,
    },
    SetIoMode {
        instance_id: InstanceId,
        mode: i32,
    },
    GetBusCount {
        instance_id: InstanceId,
        media_type: i32,
        direction: i32,
    },
    GetBusInfo {
        instance_id: InstanceId,
        media_type: i32,
        direction: i32,
        index: i32,
    },
    ActivateBus {
        instance_id: InstanceId,
        media_type: i32,
        direction: i32,
        index: i32,
        state: bool,
    },
    SetActive {
        instance_id: InstanceId,
        state: bool,
    },
    GetState {
        instance_id: InstanceId,
    },
    SetState {
        instance_id: InstanceId,
        data: Vec<u8>,
    },
    SetComponentState {
        instance_id: InstanceId,
        data: Vec<u8>,
    },
    GetParameterCount {
        instance_id: InstanceId,
    },
    GetParameterInfo {
        instance_id: InstanceId,
        param_index: i32,
    },
    GetParamStringByValue {
        instance_id: InstanceId,
        param_id: u32,
        value_normalized: f64,
    },
    GetParamValueByString {
        instance_id: InstanceId,
        param_id: u32,
        string: String,
    },
    NormalizedParamToPlain {
        instance_id: InstanceId,
        param_id: u32,
        value_normalized: f64,
    },
    PlainParamToNormalized {
        instance_id: InstanceId,
        param_id: u32,
        plain_value: f64,
    },
    GetParamNormalized {
        instance_id: InstanceId,
        param_id: u32,
    },
    SetParamNormalized {
        instance_id: InstanceId,
        param_id: u32,
        value: f64,
    },
    CreateView {
        instance_id: InstanceId,
        name: String,
    },
    DestroyView {
        instance_id: InstanceId,
    },
    ViewAttached {
        instance_id: InstanceId,
        parent: u64,
        platform_type: String,
    },
    ViewRemoved {
        instance_id: InstanceId,
    },
    ViewGetSize {
        instance_id: InstanceId,
    },
    ViewOnSize {
        instance_id: InstanceId,
        new_size: ViewRect,
    },
    ViewCanResize {
        instance_id: InstanceId,
    },
    ViewCheckSizeConstraint {
        instance_id: InstanceId,
        rect: ViewRect,
    },
    GetUnitCount {
        instance_id: InstanceId,
    },
    GetUnitInfo {
        instance_id: InstanceId,
        unit_index: i32,
    },
    GetProgramListCount {
        instance_id: InstanceId,
    },
    GetProgramListInfo {
        instance_id: InstanceId,
        list_index: i32,
    },
    GetProgramName {
        instance_id: InstanceId,
        list_id: i32,
        program_index: i32,
    },
    ProgramDataSupported {
        instance_id: InstanceId,
        list_id: i32,
    },
    GetProgramData {
        instance_id: InstanceId,
        list_id: i32,
        program_index: i32,
    },
    SetProgramData {
        instance_id: InstanceId,
        list_id: i32,
        program_index: i32,
        data: Vec<u8>,
    },
    UnitDataSupported {
        instance_id: InstanceId,
        unit_id: i32,
    },
    GetUnitData {
        instance_id: InstanceId,
        unit_id: i32,
    },
    SetUnitData {
        instance_id: InstanceId,
        unit_id: i32,
        data: Vec<u8>,
    },
}

/// Strictly shaped responses: each `ControlRequest` variant maps to exactly
/// one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlResponse {
    Created {
        instance_id: InstanceId,
        capabilities: Capabilities,
    },
    CreateFailed,
    Result(TResult),
    Count(i32),
    ClassId {
        result: TResult,
        cid: ClassId,
    },
    BusInfo {
        result: TResult,
        info: BusInfo,
    },
    State {
        result: TResult,
        data: Vec<u8>,
    },
    ParameterInfo {
        result: TResult,
        info: ParameterInfo,
    },
    Text {
        result: TResult,
        text: String,
    },
    Value(f64),
    ValueResult {
        result: TResult,
        value: f64,
    },
    View {
        created: bool,
        size: ViewRect,
    },
    Size {
        result: TResult,
        size: ViewRect,
    },
    UnitInfo {
        result: TResult,
        info: UnitInfo,
    },
    ProgramListInfo {
        result: TResult,
        info: ProgramListInfo,
    },
}

/// Host→plugin messages on the audio-processor hot path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessorRequest {
    SetBusArrangements {
        instance_id: InstanceId,
        inputs: Vec<u64>,
        outputs: Vec<u64>,
    },
    GetBusArrangement {
        instance_id: InstanceId,
        direction: i32,
        index: i32,
    },
    CanProcessSampleSize {
        instance_id: InstanceId,
        double_precision: bool,
    },
    GetLatencySamples {
        instance_id: InstanceId,
    },
    SetupProcessing {
        instance_id: InstanceId,
        setup: ProcessSetup,
    },
    SetProcessing {
        instance_id: InstanceId,
        state: bool,
    },
    Process {
        instance_id: InstanceId,
        data: ProcessData,
    },
    GetTailSamples {
        instance_id: InstanceId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessorResponse {
    Result(TResult),
    Arrangement {
        result: TResult,
        arrangement: u64,
    },
    Samples(u32),
    /// Response to `SetupProcessing` when activation creates or resizes the
    /// shared audio buffer.
    SetupDone {
        result: TResult,
        shm_config: super::AudioShmConfig,
    },
    Processed(ProcessOutput),
}

/// Plugin→host callbacks, routed back to the host-owned object registered
/// for the originating instance id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackRequest {
    BeginEdit {
        instance_id: InstanceId,
        param_id: u32,
    },
    PerformEdit {
        instance_id: InstanceId,
        param_id: u32,
        value_normalized: f64,
    },
    EndEdit {
        instance_id: InstanceId,
        param_id: u32,
    },
    RestartComponent {
        instance_id: InstanceId,
        flags: i32,
    },
    /// `notify()` through the host's own connection proxy.
    Notify {
        instance_id: InstanceId,
        message: NotifyMessage,
    },
    ResizeView {
        instance_id: InstanceId,
        new_size: ViewRect,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallbackResponse {
    Result(TResult),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn control_request_roundtrip() {
        let request = ControlRequest::Connect {
            instance_id: 1,
            other: ConnectTarget::Proxy(2),
        };
        let decoded: ControlRequest = codec::decode(&codec::encode(&request).unwrap()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn process_data_roundtrip() {
        let data = ProcessData {
            num_samples: 256,
            double_precision: false,
            process_mode: 0,
            input_parameter_changes: vec![ParameterQueue {
                param_id: 4,
                points: vec![ParameterPoint {
                    sample_offset: 0,
                    value: 0.5,
                }],
            }],
            input_events: vec![Event::NoteOn {
                bus_index: 0,
                sample_offset: 12,
                channel: 0,
                pitch: 64,
                velocity: 0.8,
                note_id: -1,
                tuning: 0.0,
            }],
            context: Some(ProcessContext {
                tempo: 140.0,
                sample_rate: 48_000.0,
                ..ProcessContext::default()
            }),
            new_realtime_priority: None,
        };

        let request = ProcessorRequest::Process {
            instance_id: 3,
            data: data.clone(),
        };
        let decoded: ProcessorRequest = codec::decode(&codec::encode(&request).unwrap()).unwrap();
        match decoded {
            ProcessorRequest::Process { instance_id, data: decoded_data } => {
                assert_eq!(instance_id, 3);
                assert_eq!(decoded_data, data);
            }
            other => panic!("expected Process, got {other:?}"),
        }
    }

    #[test]
    fn notify_message_roundtrip() {
        let message = NotifyMessage {
            message_id: "midi_learn".into(),
            attributes: vec![
                ("param".into(), AttributeValue::Int(17)),
                ("blob".into(), AttributeValue::Binary(vec![1, 2, 3])),
            ],
        };
        let request = CallbackRequest::Notify {
            instance_id: 9,
            message: message.clone(),
        };
        let decoded: CallbackRequest = codec::decode(&codec::encode(&request).unwrap()).unwrap();
        match decoded {
            CallbackRequest::Notify { message: decoded_message, .. } => {
                assert_eq!(decoded_message, message)
            }
            other => panic!("expected Notify, got {other:?}"),
        }
    }
}
