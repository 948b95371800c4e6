//! A bidirectional byte channel layered on a session: a send buffer, a
//! receive buffer, a background polling thread, and an ordered set of
//! observers.

use crate::buffer::CircularBuffer;
use crate::error::ProtocolError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// A passive subscriber to stream events. Notifications are synchronous
/// and delivered in registration order.
pub trait Observer: Send + Sync {
    fn on_next(&self, data: &[u8]);
    fn on_complete(&self);
    fn on_error(&self, code: &str, message: &str);

    /// Fired alongside `on_next` when the polling thread (or
    /// [`DuplexStream::drain_once`]) dispatches inbound data. Default
    /// no-op so observers that only care about `on_next` don't need to
    /// implement it.
    fn on_data_received(&self, _data: &[u8]) {}

    /// Fired after a successful [`DuplexStream::send`] with the bytes just
    /// written to the send buffer.
    fn on_data_sent(&self, _bytes: &[u8]) {}

    /// Fired when a send crosses the send buffer's configured threshold
    /// upward; edge-triggered like [`CircularBuffer::write`]'s return.
    fn on_buffer_threshold(&self, _used: usize, _capacity: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Init,
    Open,
    Active,
    Paused,
    Closing,
    Closed,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub buffer_size: usize,
    pub max_message_size: usize,
    pub poll_interval_ms: u64,
    pub idle_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            buffer_size: 64 * 1024,
            max_message_size: 16 * 1024,
            poll_interval_ms: 50,
            idle_timeout_ms: 0,
        }
    }
}

/// Flags for [`DuplexStream::receive`]. `blocking` is the only flag this
/// spec defines, and it is always rejected — kept as a struct rather than
/// a bare bool so a future flag doesn't become another positional `bool`
/// parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveFlags {
    pub blocking: bool,
}

/// Flags for [`DuplexStream::send`]. Neither flag changes `send`'s
/// behavior today — no reliability or priority tiering is implemented at
/// the stream layer — but the parameter is part of the operation's
/// signature, so callers pass it rather than it being silently dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendFlags {
    pub reliable: bool,
    pub priority: bool,
}

const MAX_OBSERVERS: usize = 16;

struct Inner {
    state: StreamState,
    observers: Vec<Arc<dyn Observer>>,
}

/// Two [`CircularBuffer`]s, a state, and observers. The polling thread (if
/// started) drains `receive` and fans it out to observers at
/// `config.poll_interval_ms`.
pub struct DuplexStream {
    send_buffer: Arc<CircularBuffer>,
    receive_buffer: Arc<CircularBuffer>,
    inner: Arc<Mutex<Inner>>,
    condvar: Arc<Condvar>,
    config: StreamConfig,
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    last_activity_ms: Arc<AtomicU64>,
    stop_flag: Arc<AtomicBool>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
    now_ms: Arc<dyn Fn() -> u64 + Send + Sync>,
}

impl DuplexStream {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_clock(config, Arc::new(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0)
        }))
    }

    /// Construct with an injectable "now" source, for deterministic idle
    /// timeout tests.
    pub fn with_clock(config: StreamConfig, now_ms: Arc<dyn Fn() -> u64 + Send + Sync>) -> Self {
        let started_at = now_ms();
        DuplexStream {
            send_buffer: Arc::new(CircularBuffer::new(config.buffer_size)),
            receive_buffer: Arc::new(CircularBuffer::new(config.buffer_size)),
            inner: Arc::new(Mutex::new(Inner {
                state: StreamState::Init,
                observers: Vec::new(),
            })),
            condvar: Arc::new(Condvar::new()),
            config,
            bytes_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            last_activity_ms: Arc::new(AtomicU64::new(started_at)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            poll_thread: Mutex::new(None),
            now_ms,
        }
    }

    pub fn state(&self) -> StreamState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::SeqCst)
    }

    /// Feed bytes into the receive buffer, as if they had just arrived
    /// over the transport. The polling thread (or a manual call to
    /// [`DuplexStream::drain_once`]) picks them up from here.
    pub fn deliver_inbound(&self, bytes: &[u8]) -> usize {
        let (written, _) = self.receive_buffer.write(bytes);
        self.condvar.notify_all();
        written
    }

    /// Transition `init`/`closed -> open`; starts the polling thread if
    /// `non_blocking` is set.
    pub fn open(&self, non_blocking: bool) -> Result<(), ProtocolError> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(inner.state, StreamState::Init | StreamState::Closed) {
                return Err(ProtocolError::InvalidState(format!(
                    "cannot open from {:?}",
                    inner.state
                )));
            }
            inner.state = StreamState::Open;
        }
        if non_blocking {
            self.start_polling_thread();
        }
        Ok(())
    }

    fn start_polling_thread(&self) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let receive_buffer = self.receive_buffer.clone();
        let inner = self.inner.clone();
        let condvar = self.condvar.clone();
        let stop_flag = self.stop_flag.clone();
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let idle_timeout_ms = self.config.idle_timeout_ms;
        let now_ms = self.now_ms.clone();
        let last_activity = self.last_activity_ms.clone();

        let handle = std::thread::spawn(move || {
            let mut scratch = vec![0u8; 4096];
            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }
                let (_guard, _timeout_result) = {
                    let guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                    condvar
                        .wait_timeout(guard, poll_interval)
                        .unwrap_or_else(|e| e.into_inner())
                };

                if stop_flag.load(Ordering::SeqCst) {
                    break;
                }

                let mut inner_guard = inner.lock().unwrap_or_else(|e| e.into_inner());
                if matches!(inner_guard.state, StreamState::Paused) {
                    continue;
                }
                if matches!(
                    inner_guard.state,
                    StreamState::Closing | StreamState::Closed | StreamState::Error
                ) {
                    break;
                }

                let read = receive_buffer.read(&mut scratch, scratch.len());
                if read > 0 {
                    for observer in inner_guard.observers.iter() {
                        observer.on_next(&scratch[..read]);
                        observer.on_data_received(&scratch[..read]);
                    }
                    last_activity.store(now_ms(), Ordering::SeqCst);
                }

                if idle_timeout_ms > 0 {
                    let elapsed = now_ms().saturating_sub(last_activity.load(Ordering::SeqCst));
                    if elapsed > idle_timeout_ms {
                        warn!(elapsed_ms = elapsed, idle_timeout_ms, "stream idle timeout exceeded");
                        inner_guard.state = StreamState::Error;
                        for observer in inner_guard.observers.iter() {
                            observer.on_error("TIMEOUT", "stream idle timeout exceeded");
                        }
                        break;
                    }
                }
            }
        });
        *self.poll_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Drain the receive buffer once and fan out to observers, for callers
    /// not using the background polling thread (e.g. deterministic tests).
    pub fn drain_once(&self) -> usize {
        let mut scratch = vec![0u8; self.config.max_message_size.max(1)];
        let read = self.receive_buffer.read(&mut scratch, scratch.len());
        if read > 0 {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(inner.state, StreamState::Paused) {
                for observer in inner.observers.iter() {
                    observer.on_next(&scratch[..read]);
                    observer.on_data_received(&scratch[..read]);
                }
            }
        }
        read
    }

    /// Send bytes; legal in `open` or `active`. Transitions `open ->
    /// active` on the first successful send. Fires `on_data_sent` on every
    /// observer, and `on_buffer_threshold` when the write crosses the send
    /// buffer's configured threshold upward.
    pub fn send(&self, bytes: &[u8], _flags: SendFlags) -> Result<(), ProtocolError> {
        if bytes.len() > self.config.max_message_size {
            return Err(ProtocolError::InvalidArgument(format!(
                "message of {} bytes exceeds max_message_size {}",
                bytes.len(),
                self.config.max_message_size
            )));
        }
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !matches!(inner.state, StreamState::Open | StreamState::Active) {
                return Err(ProtocolError::InvalidState(format!(
                    "cannot send from {:?}",
                    inner.state
                )));
            }
            let (written, crossed_threshold) = self.send_buffer.write(bytes);
            if written < bytes.len() {
                return Err(ProtocolError::ResourceExhausted(
                    "send buffer has insufficient space".to_owned(),
                ));
            }
            if inner.state == StreamState::Open {
                inner.state = StreamState::Active;
            }
            for observer in inner.observers.iter() {
                observer.on_data_sent(bytes);
            }
            if crossed_threshold {
                let used = self.send_buffer.used();
                let capacity = self.send_buffer.capacity();
                for observer in inner.observers.iter() {
                    observer.on_buffer_threshold(used, capacity);
                }
            }
        }
        self.bytes_sent.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
        self.last_activity_ms.store((self.now_ms)(), Ordering::SeqCst);
        Ok(())
    }

    /// Take whatever the send buffer is currently holding out, for a
    /// transport-driving loop to actually put on the wire.
    pub fn take_outbound(&self, max: usize) -> Vec<u8> {
        let mut out = vec![0u8; max];
        let read = self.send_buffer.read(&mut out, max);
        out.truncate(read);
        out
    }

    /// `0` immediately if nothing is buffered. `flags.blocking` must be
    /// `false`: this spec does not support a blocking receive, so asking
    /// for one is reported as [`ProtocolError::Unsupported`] rather than
    /// silently behaving non-blockingly anyway. Use [`DuplexStream::poll`]
    /// to wait for data first if a blocking-style call is what's wanted.
    pub fn receive(&self, out: &mut [u8], max: usize, flags: ReceiveFlags) -> Result<usize, ProtocolError> {
        if flags.blocking {
            return Err(ProtocolError::Unsupported(
                "blocking receive is not supported; poll() then receive()".to_owned(),
            ));
        }
        let state = self.state();
        if !matches!(state, StreamState::Open | StreamState::Active) {
            return Err(ProtocolError::InvalidState(format!(
                "cannot receive from {:?}",
                state
            )));
        }
        Ok(self.receive_buffer.read(out, max))
    }

    /// Block (sleeping, not spinning) until data is available or `timeout`
    /// elapses. Returns whether data became available.
    pub fn poll(&self, timeout: Duration) -> bool {
        if self.receive_buffer.used() > 0 {
            return true;
        }
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |_| self.receive_buffer.used() == 0)
            .unwrap_or_else(|e| e.into_inner());
        !result.timed_out()
    }

    pub fn pause(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != StreamState::Active {
            return Err(ProtocolError::InvalidState(format!(
                "cannot pause from {:?}",
                inner.state
            )));
        }
        inner.state = StreamState::Paused;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != StreamState::Paused {
            return Err(ProtocolError::InvalidState(format!(
                "cannot resume from {:?}",
                inner.state
            )));
        }
        inner.state = StreamState::Active;
        Ok(())
    }

    /// Attach an observer; at most [`MAX_OBSERVERS`] per stream.
    pub fn create_observer(&self, observer: Arc<dyn Observer>) -> Result<(), ProtocolError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.observers.len() >= MAX_OBSERVERS {
            return Err(ProtocolError::ResourceExhausted(
                "observer limit of 16 reached".to_owned(),
            ));
        }
        inner.observers.push(observer);
        Ok(())
    }

    /// Idempotent. Transitions to `closing` then `closed`, stops the
    /// polling thread, and notifies every observer with `on_complete`
    /// exactly once no matter how many times `close` is called.
    pub fn close(&self) {
        let already_closed = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.state == StreamState::Closed {
                true
            } else {
                inner.state = StreamState::Closing;
                false
            }
        };
        if already_closed {
            return;
        }

        self.stop_flag.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
        if let Some(handle) = self.poll_thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        debug!(observer_count = inner.observers.len(), "closing stream");
        for observer in inner.observers.iter() {
            observer.on_complete();
        }
        inner.state = StreamState::Closed;
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        self.close();
    }
}
