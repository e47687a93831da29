//! Realtime disciplines: denormal handling, short-lived caches, scheduling
//! priority propagation, and the environment knobs around them.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between piggy-backing the DAW audio thread's scheduling priority
/// on an audio request so the host process can mirror it.
pub const PRIORITY_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Baseline SCHED_FIFO priority for bridge threads. The exact value rarely
/// matters; the host's audio thread priority overrides it periodically.
pub const DEFAULT_REALTIME_PRIORITY: i32 = 5;

/// Set to `1` to skip the startup liveness watchdog. Needed when the host
/// process runs in a separate namespace where it cannot be observed.
pub const NO_WATCHDOG_ENV: &str = "VINEBRIDGE_NO_WATCHDOG";

pub fn watchdog_disabled() -> bool {
    std::env::var(NO_WATCHDOG_ENV).as_deref() == Ok("1")
}

/// RAII scope that enables flush-to-zero for denormals, restoring the
/// previous mode on every exit path.
pub struct ScopedFlushToZero {
    #[cfg(target_arch = "x86_64")]
    old_mode: u32,
}

#[cfg(target_arch = "x86_64")]
impl ScopedFlushToZero {
    pub fn new() -> Self {
        use std::arch::x86_64::{_MM_FLUSH_ZERO_ON, _MM_GET_FLUSH_ZERO_MODE, _MM_SET_FLUSH_ZERO_MODE};
        unsafe {
            let old_mode = _MM_GET_FLUSH_ZERO_MODE();
            _MM_SET_FLUSH_ZERO_MODE(_MM_FLUSH_ZERO_ON);
            Self { old_mode }
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl Drop for ScopedFlushToZero {
    fn drop(&mut self) {
        use std::arch::x86_64::_MM_SET_FLUSH_ZERO_MODE;
        unsafe { _MM_SET_FLUSH_ZERO_MODE(self.old_mode) };
    }
}

#[cfg(not(target_arch = "x86_64"))]
impl ScopedFlushToZero {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for ScopedFlushToZero {
    fn default() -> Self {
        Self::new()
    }
}

/// Caches a value for exactly as long as the guard returned by [`set`] is
/// alive. Used to answer repeated synchronous queries a plugin makes during
/// a single host call without re-entering the socket.
///
/// [`set`]: ScopedValueCache::set
pub struct ScopedValueCache<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Default for ScopedValueCache<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Clone> ScopedValueCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached value, if a guard is currently alive.
    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    /// Cache `value` until the returned guard is dropped.
    pub fn set(&self, value: T) -> CacheGuard<T> {
        *self.value.lock() = Some(value);
        CacheGuard {
            value: Arc::clone(&self.value),
        }
    }
}

pub struct CacheGuard<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Drop for CacheGuard<T> {
    fn drop(&mut self) {
        *self.value.lock() = None;
    }
}

/// Caches a value for a wall-clock lifetime. Used for slowly changing
/// cross-process reads like version strings.
pub struct TimedValueCache<T> {
    inner: Mutex<Option<(T, Instant)>>,
}

impl<T> Default for TimedValueCache<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T: Clone> TimedValueCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<T> {
        let inner = self.inner.lock();
        match &*inner {
            Some((value, valid_until)) if Instant::now() <= *valid_until => Some(value.clone()),
            _ => None,
        }
    }

    /// Like [`get`], but a hit extends the lifetime by `lifetime` from now.
    ///
    /// [`get`]: TimedValueCache::get
    pub fn get_and_keep_alive(&self, lifetime: Duration) -> Option<T> {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Some((value, valid_until)) if Instant::now() <= *valid_until => {
                *valid_until = Instant::now() + lifetime;
                Some(value.clone())
            }
            _ => None,
        }
    }

    pub fn set(&self, value: T, lifetime: Duration) {
        *self.inner.lock() = Some((value, Instant::now() + lifetime));
    }
}

/// The calling thread's SCHED_FIFO priority, or `None` when it is not under
/// realtime scheduling.
pub fn get_realtime_priority() -> Option<i32> {
    unsafe {
        if libc::sched_getscheduler(0) != libc::SCHED_FIFO {
            return None;
        }
        let mut param: libc::sched_param = std::mem::zeroed();
        if libc::sched_getparam(0, &mut param) != 0 {
            return None;
        }
        Some(param.sched_priority)
    }
}

/// Switch the calling thread to SCHED_FIFO at `priority`, or back to
/// SCHED_OTHER. Fails quietly when the user lacks realtime privileges.
pub fn set_realtime_priority(sched_fifo: bool, priority: i32) -> bool {
    unsafe {
        let policy = if sched_fifo {
            libc::SCHED_FIFO
        } else {
            libc::SCHED_OTHER
        };
        let param = libc::sched_param {
            sched_priority: if sched_fifo { priority } else { 0 },
        };
        libc::sched_setscheduler(0, policy, &param) == 0
    }
}

fn soft_rlimit(resource: libc::__rlimit_resource_t) -> Option<libc::rlim_t> {
    unsafe {
        let mut limit: libc::rlimit = std::mem::zeroed();
        if libc::getrlimit(resource, &mut limit) != 0 {
            return None;
        }
        Some(limit.rlim_cur)
    }
}

/// Log warnings for resource limits that are known to break shared-memory
/// mapping or get realtime threads killed by the scheduler. Informational
/// only; nothing here changes behaviour.
pub fn warn_on_low_resource_limits() {
    const LOW_MEMLOCK_BYTES: libc::rlim_t = 64 * 1024 * 1024;

    if let Some(memlock) = soft_rlimit(libc::RLIMIT_MEMLOCK) {
        if memlock != libc::RLIM_INFINITY && memlock < LOW_MEMLOCK_BYTES {
            tracing::warn!(
                limit_bytes = memlock,
                "RLIMIT_MEMLOCK is low, mapping shared audio buffers may fail"
            );
        }
    }

    if let Some(rttime) = soft_rlimit(libc::RLIMIT_RTTIME) {
        if rttime != libc::RLIM_INFINITY {
            tracing::warn!(
                limit_us = rttime,
                "RLIMIT_RTTIME is finite, realtime threads may be killed under load"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_cache_is_alive_exactly_while_guard_lives() {
        let cache = ScopedValueCache::new();
        assert_eq!(cache.get(), None::<i32>);

        {
            let _guard = cache.set(42);
            assert_eq!(cache.get(), Some(42));
        }
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn timed_cache_expires() {
        let cache = TimedValueCache::new();
        cache.set("wine-9.0".to_string(), Duration::from_secs(60));
        assert_eq!(cache.get(), Some("wine-9.0".to_string()));

        cache.set("stale".to_string(), Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.get(), None);
    }

    #[test]
    fn timed_cache_keep_alive_extends_lifetime() {
        let cache = TimedValueCache::new();
        cache.set(1u32, Duration::from_millis(100));
        assert_eq!(
            cache.get_and_keep_alive(Duration::from_secs(60)),
            Some(1u32)
        );
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(cache.get(), Some(1u32));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn flush_to_zero_restores_previous_mode() {
        use std::arch::x86_64::_MM_GET_FLUSH_ZERO_MODE;

        let before = unsafe { _MM_GET_FLUSH_ZERO_MODE() };
        {
            let _scope = ScopedFlushToZero::new();
            let _nested = ScopedFlushToZero::new();
        }
        let after = unsafe { _MM_GET_FLUSH_ZERO_MODE() };
        assert_eq!(before, after);
    }

    #[test]
    fn watchdog_flag_reads_environment() {
        std::env::remove_var(NO_WATCHDOG_ENV);
        assert!(!watchdog_disabled());
        std::env::set_var(NO_WATCHDOG_ENV, "1");
        assert!(watchdog_disabled());
        std::env::remove_var(NO_WATCHDOG_ENV);
    }
}
