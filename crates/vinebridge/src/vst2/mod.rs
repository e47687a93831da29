//! The legacy callback-style plugin ABI: raw struct layer, payload
//! translation, and the stub-side bridge.

pub mod abi;
pub mod bridge;
pub mod payload;

pub use bridge::Vst2PluginBridge;
