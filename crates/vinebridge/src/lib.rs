//! Native stub library for bridging Windows audio plugins into a POSIX DAW.
//!
//! One bridged plugin instance spans two processes: this stub, loaded by the
//! DAW in place of the plugin, and a companion host process that has loaded
//! the real plugin module. Every plugin-ABI call is proxied over a group of
//! typed Unix-socket channels; audio samples take a shared-memory fast lane
//! with a strict request/ack round-trip.
//!
//! The thin ABI shims that the DAW links against (the exported entry point
//! for the legacy ABI, the reference-counted vtables for the modern one)
//! adapt onto [`vst2::Vst2PluginBridge`] and [`vst3::Vst3PluginBridge`];
//! everything behind those types is ordinary safe Rust.

pub mod channels;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod rt;
pub mod shm;
pub mod vst2;
pub mod vst3;

pub use config::{BridgeOptions, PluginInfo};
pub use error::{BridgeError, CodecError, Result};
pub use shm::AudioShmBuffer;
pub use vst2::Vst2PluginBridge;
pub use vst3::Vst3PluginBridge;
