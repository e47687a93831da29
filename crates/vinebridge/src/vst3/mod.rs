//! The modern multi-interface plugin ABI: proxy object model, instance
//! registry, and the stub-side bridge.
//!
//! The reference-counted C ABI shim that the DAW actually calls into adapts
//! onto these types; the core models interfaces as traits and proxies as
//! plain structs addressed by instance id.

pub mod bridge;
pub mod proxy;

pub use bridge::Vst3PluginBridge;
pub use proxy::{ConnectPeer, Vst3PlugViewProxy, Vst3PluginProxy};

use crate::protocol::vst3::{InstanceId, NotifyMessage, TResult, ViewRect};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// The host's parameter-edit and restart callbacks.
pub trait ComponentHandler: Send + Sync {
    fn begin_edit(&self, param_id: u32) -> TResult;
    fn perform_edit(&self, param_id: u32, value_normalized: f64) -> TResult;
    fn end_edit(&self, param_id: u32) -> TResult;
    fn restart_component(&self, flags: i32) -> TResult;
}

/// A host-owned connection object placed between two plugin objects.
pub trait ConnectionPoint: Send + Sync {
    fn notify(&self, message: &NotifyMessage) -> TResult;
}

/// The host context handed to `initialize()`.
pub trait HostContext: Send + Sync {
    fn name(&self) -> String;
}

/// The host's frame around an editor view.
pub trait PlugFrame: Send + Sync {
    fn resize_view(&self, new_size: ViewRect) -> TResult;
}

/// Process-wide map from instance id to live proxy. Proxies are owned by the
/// host; the registry only holds non-owning references, which also breaks
/// the host↔plugin callback cycle.
#[derive(Default)]
pub struct ProxyRegistry {
    inner: Mutex<HashMap<InstanceId, Weak<Vst3PluginProxy>>>,
    registrations: std::sync::atomic::AtomicU64,
    deregistrations: std::sync::atomic::AtomicU64,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, instance_id: InstanceId, proxy: &Arc<Vst3PluginProxy>) {
        let previous = self
            .inner
            .lock()
            .insert(instance_id, Arc::downgrade(proxy));
        debug_assert!(previous.is_none(), "instance id reused while live");
        self.registrations
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn unregister(&self, instance_id: InstanceId) {
        if self.inner.lock().remove(&instance_id).is_some() {
            self.deregistrations
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<Arc<Vst3PluginProxy>> {
        self.inner.lock().get(&instance_id)?.upgrade()
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Lifetime bookkeeping, for asserting that registrations and
    /// deregistrations balance at steady state.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.registrations
                .load(std::sync::atomic::Ordering::Relaxed),
            self.deregistrations
                .load(std::sync::atomic::Ordering::Relaxed),
        )
    }
}
