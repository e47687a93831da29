//! Wire protocol for the plugin bridge.
//!
//! Every message that crosses a socket lives here so both sides agree on one
//! set of types. Channels are strictly typed: a channel only ever carries one
//! `(request, response)` pair, which keeps the receiving dispatcher
//! monomorphic.

pub mod vst2;
pub mod vst3;

use serde::{Deserialize, Serialize};

/// Version string exchanged right after the socket group is paired.
pub const BRIDGE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            version: BRIDGE_VERSION.to_string(),
        }
    }
}

/// Zero-byte acknowledgement for the audio fast lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack;

/// Per-block processing request. The samples themselves travel through the
/// shared audio buffer, never through the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRequest {
    pub sample_frames: i32,
    pub double_precision: bool,
    /// Transport info prefetched from the DAW so the plugin's own queries can
    /// be answered without re-entering the socket.
    pub time_info: Option<vst2::TimeInfo>,
    /// The DAW's current process level, prefetched for the same reason.
    pub process_level: Option<i32>,
    /// Piggy-backed realtime priority so the host process can mirror the
    /// DAW's audio thread scheduling. Only attached every few seconds.
    pub new_realtime_priority: Option<i32>,
}

/// Layout descriptor for the shared audio buffer. Computed by the host
/// process from the agreed bus configuration; the stub maps the same segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioShmConfig {
    /// Shared memory object name, derived from the socket directory name.
    pub name: String,
    /// Channel count per input bus.
    pub input_channels: Vec<u32>,
    /// Channel count per output bus.
    pub output_channels: Vec<u32>,
    /// Bytes per sample, 4 or 8.
    pub element_size: u32,
    /// Maximum sample frames per block.
    pub block_size: u32,
}

impl AudioShmConfig {
    pub fn total_channels(&self) -> usize {
        (self.input_channels.iter().sum::<u32>() + self.output_channels.iter().sum::<u32>())
            as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn audio_request_roundtrip() {
        let request = AudioRequest {
            sample_frames: 512,
            double_precision: false,
            time_info: Some(vst2::TimeInfo {
                sample_pos: 1024.0,
                sample_rate: 48_000.0,
                tempo: 120.0,
                flags: vst2::time_info_flags::TEMPO_VALID,
                ..vst2::TimeInfo::default()
            }),
            process_level: Some(2),
            new_realtime_priority: Some(5),
        };

        let bytes = codec::encode(&request).unwrap();
        let decoded: AudioRequest = codec::decode(&bytes).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn shm_config_counts_channels() {
        let config = AudioShmConfig {
            name: "vinebridge-test".into(),
            input_channels: vec![2, 1],
            output_channels: vec![2],
            element_size: 4,
            block_size: 512,
        };
        assert_eq!(config.total_channels(), 5);
    }
}
