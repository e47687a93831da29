//! Per-channel receive loops and main-thread thunking.

use crate::channels::EventChannel;
use crate::error::Result;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle to a channel's receiver thread. The loop ends on its own when the
/// peer closes the channel; `join()` then reaps the thread.
pub struct ReceiveLoop {
    thread: Option<JoinHandle<()>>,
}

impl ReceiveLoop {
    /// Wait for the loop to finish. Call after the peer's side of the channel
    /// has been shut down, otherwise this blocks indefinitely.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the blocking receive loop for one serving channel on a dedicated
/// named thread. With `realtime` set the thread elevates itself to SCHED_FIFO
/// so plugin→host calls made from audio code are serviced at audio priority.
///
/// The handler gets each decoded request plus a flag telling it whether it is
/// running on a thread that may perform GUI-affine work. Receive loops always
/// pass `false`; handlers thunk such calls onto a [`MainThreadQueue`] drained
/// at the next host-driven idle.
pub fn spawn_receive_loop<Req, Resp, H>(
    name: &str,
    mut channel: EventChannel<Req, Resp>,
    realtime: bool,
    mut handler: H,
) -> Result<ReceiveLoop>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    H: FnMut(Req, bool) -> Resp + Send + 'static,
{
    let thread_name = name.to_string();
    let thread = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            if realtime {
                crate::rt::set_realtime_priority(true, crate::rt::DEFAULT_REALTIME_PRIORITY);
            }
            loop {
                let request = match channel.receive() {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::debug!(channel = %thread_name, error = %e, "receive loop ended");
                        break;
                    }
                };

                let response = handler(request, false);
                if let Err(e) = channel.reply(&response) {
                    tracing::debug!(channel = %thread_name, error = %e, "reply failed, stopping");
                    break;
                }
            }
        })?;

    Ok(ReceiveLoop {
        thread: Some(thread),
    })
}

type Task = Box<dyn FnOnce() + Send>;

/// Queue for plugin→host calls that some DAWs only accept on the GUI thread.
/// Receiver threads push; the host-driven idle entry point drains.
#[derive(Default, Clone)]
pub struct MainThreadQueue {
    tasks: Arc<Mutex<Vec<Task>>>,
}

impl MainThreadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks.lock().push(Box::new(task));
    }

    /// Run every pending task on the calling thread, in push order.
    pub fn drain(&self) {
        let pending = std::mem::take(&mut *self.tasks.lock());
        for task in pending {
            task();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RequestChannel;
    use crate::protocol::vst2::{ParameterRequest, ParameterResponse};
    use std::os::unix::net::UnixStream;

    #[test]
    fn loop_serves_requests_until_peer_closes() {
        let (client, server) = UnixStream::pair().unwrap();
        let channel: RequestChannel<ParameterRequest, ParameterResponse> =
            RequestChannel::new(client);
        let serving: EventChannel<ParameterRequest, ParameterResponse> = EventChannel::new(server);

        let receive_loop =
            spawn_receive_loop("test-parameters", serving, false, |request, on_main| {
                assert!(!on_main);
                ParameterResponse {
                    value: Some(request.index as f32 * 2.0),
                }
            })
            .unwrap();

        for index in 0..4 {
            let response = channel
                .send_and_receive(&ParameterRequest { index, value: None })
                .unwrap();
            assert_eq!(response.value, Some(index as f32 * 2.0));
        }

        drop(channel);
        receive_loop.join();
    }

    #[test]
    fn main_thread_queue_drains_in_order() {
        let queue = MainThreadQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            queue.push(move || seen.lock().push(i));
        }
        assert!(!queue.is_empty());

        queue.drain();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }
}
