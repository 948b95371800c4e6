//! Stream backpressure and idle timeout plus observer-ordering and
//! pause/resume properties.

use polycall_protocol::{DuplexStream, Observer, ProtocolError, SendFlags, StreamConfig, StreamState};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingObserver {
    order: Arc<Mutex<Vec<&'static str>>>,
    tag: &'static str,
}

impl Observer for RecordingObserver {
    fn on_next(&self, _data: &[u8]) {
        self.order.lock().unwrap().push(self.tag);
    }
    fn on_complete(&self) {}
    fn on_error(&self, _code: &str, _message: &str) {}
}

#[test]
fn observers_are_notified_in_registration_order() {
    let stream = DuplexStream::new(StreamConfig::default());
    stream.open(false).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    for tag in ["first", "second", "third"] {
        stream
            .create_observer(Arc::new(RecordingObserver {
                order: order.clone(),
                tag,
            }))
            .unwrap();
    }

    stream.deliver_inbound(b"payload");
    stream.drain_once();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[test]
fn drain_once_fires_both_on_next_and_on_data_received() {
    struct DualObserver {
        next_calls: Arc<Mutex<Vec<Vec<u8>>>>,
        received_calls: Arc<Mutex<Vec<Vec<u8>>>>,
    }
    impl Observer for DualObserver {
        fn on_next(&self, data: &[u8]) {
            self.next_calls.lock().unwrap().push(data.to_vec());
        }
        fn on_complete(&self) {}
        fn on_error(&self, _code: &str, _message: &str) {}
        fn on_data_received(&self, data: &[u8]) {
            self.received_calls.lock().unwrap().push(data.to_vec());
        }
    }

    let stream = DuplexStream::new(StreamConfig::default());
    stream.open(false).unwrap();
    let next_calls = Arc::new(Mutex::new(Vec::new()));
    let received_calls = Arc::new(Mutex::new(Vec::new()));
    stream
        .create_observer(Arc::new(DualObserver {
            next_calls: next_calls.clone(),
            received_calls: received_calls.clone(),
        }))
        .unwrap();

    stream.deliver_inbound(b"payload");
    stream.drain_once();

    assert_eq!(*next_calls.lock().unwrap(), vec![b"payload".to_vec()]);
    assert_eq!(*received_calls.lock().unwrap(), vec![b"payload".to_vec()]);
}

#[test]
fn backpressure_then_drain_then_retry_succeeds_without_losing_bytes() {
    let stream = DuplexStream::new(StreamConfig {
        buffer_size: 256,
        max_message_size: 256,
        ..Default::default()
    });
    stream.open(false).unwrap();

    stream.send(&[1u8; 256], SendFlags::default()).unwrap();
    let err = stream.send(&[2u8; 256], SendFlags::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::ResourceExhausted(_)));

    let first = stream.take_outbound(256);
    assert_eq!(first, vec![1u8; 256]);

    stream.send(&[2u8; 256], SendFlags::default()).unwrap();
    let second = stream.take_outbound(256);
    assert_eq!(second, vec![2u8; 256]);
}

#[test]
fn a_message_over_the_configured_max_size_is_rejected_before_touching_the_buffer() {
    let stream = DuplexStream::new(StreamConfig {
        max_message_size: 16,
        ..Default::default()
    });
    stream.open(false).unwrap();
    let err = stream.send(&[0u8; 17], SendFlags::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidArgument(_)));
}

#[test]
fn pausing_suppresses_observer_delivery_and_resuming_restores_it() {
    let stream = DuplexStream::new(StreamConfig::default());
    stream.open(false).unwrap();
    stream.send(b"kick to active", SendFlags::default()).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    struct Counter(Arc<AtomicUsize>);
    impl Observer for Counter {
        fn on_next(&self, _data: &[u8]) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_complete(&self) {}
        fn on_error(&self, _code: &str, _message: &str) {}
    }
    stream.create_observer(Arc::new(Counter(calls.clone()))).unwrap();

    stream.pause().unwrap();
    stream.deliver_inbound(b"while paused");
    stream.drain_once();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    stream.resume().unwrap();
    stream.deliver_inbound(b"after resume");
    stream.drain_once();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn idle_timeout_trips_to_error_state_without_a_real_one_second_sleep() {
    let clock_ms = Arc::new(AtomicU64::new(0));
    let clock_ms_clone = clock_ms.clone();
    let stream = DuplexStream::with_clock(
        StreamConfig {
            idle_timeout_ms: 1_000,
            poll_interval_ms: 10,
            ..Default::default()
        },
        Arc::new(move || clock_ms_clone.load(Ordering::SeqCst)),
    );
    stream.open(true).unwrap();

    // Advance the injected clock past the idle timeout instead of sleeping
    // 1100ms of wall-clock time; the polling thread observes it on its next
    // wakeup (bounded by poll_interval_ms).
    clock_ms.store(1_101, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(stream.state(), StreamState::Error);
    let err = stream.send(b"too late", SendFlags::default()).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidState(_)));
    stream.close();
}

#[test]
fn close_is_idempotent_and_notifies_completion_exactly_once() {
    let stream = DuplexStream::new(StreamConfig::default());
    stream.open(false).unwrap();

    let completions = Arc::new(AtomicUsize::new(0));
    struct CompletionCounter(Arc<AtomicUsize>);
    impl Observer for CompletionCounter {
        fn on_next(&self, _data: &[u8]) {}
        fn on_complete(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_error(&self, _code: &str, _message: &str) {}
    }
    stream.create_observer(Arc::new(CompletionCounter(completions.clone()))).unwrap();

    stream.close();
    stream.close();
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(stream.state(), StreamState::Closed);
}
