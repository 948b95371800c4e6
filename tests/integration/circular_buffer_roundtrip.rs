//! Circular buffer properties: exact round-tripping within capacity,
//! short writes/reads at the boundaries, and edge-triggered threshold
//! notification.

use polycall_protocol::CircularBuffer;

#[test]
fn arbitrary_interleaved_writes_and_reads_preserve_byte_order() {
    let buf = CircularBuffer::new(32);
    let mut reference = Vec::new();

    for chunk in [b"abc".as_slice(), b"defgh".as_slice(), b"ij".as_slice()] {
        let (written, _) = buf.write(chunk);
        assert_eq!(written, chunk.len());
        reference.extend_from_slice(chunk);
    }

    let mut out = vec![0u8; reference.len()];
    let read = buf.read(&mut out, out.len());
    assert_eq!(read, reference.len());
    assert_eq!(out, reference);
    assert_eq!(buf.used(), 0);
}

#[test]
fn writing_past_capacity_never_exceeds_used_and_caps_the_returned_count() {
    let buf = CircularBuffer::new(8);
    let (written, _) = buf.write(&[1u8; 20]);
    assert_eq!(written, 8);
    assert_eq!(buf.used(), 8);
    assert_eq!(buf.available(), 0);
}

#[test]
fn reading_more_than_available_returns_only_what_is_buffered() {
    let buf = CircularBuffer::new(8);
    buf.write(b"xy");
    let mut out = [0u8; 8];
    assert_eq!(buf.read(&mut out, 8), 2);
    assert_eq!(&out[..2], b"xy");
}

#[test]
fn the_ring_wraps_cleanly_across_many_cycles_of_full_capacity_use() {
    let buf = CircularBuffer::new(5);
    for i in 0..50u8 {
        let payload = [i, i.wrapping_add(1), i.wrapping_add(2)];
        buf.write(&payload);
        let mut out = [0u8; 3];
        assert_eq!(buf.read(&mut out, 3), 3);
        assert_eq!(out, payload);
    }
    assert_eq!(buf.used(), 0);
}

#[test]
fn threshold_notification_is_edge_triggered_across_a_full_write_read_write_cycle() {
    let buf = CircularBuffer::new(16);
    buf.set_threshold(8);

    let (_, crossed_up) = buf.write(&[0u8; 8]);
    assert!(crossed_up);
    let (_, crossed_again_while_still_above) = buf.write(&[0u8; 1]);
    assert!(!crossed_again_while_still_above);

    let mut out = [0u8; 5];
    buf.read(&mut out, 5); // used drops to 4, below threshold, rearms

    let (_, crossed_second_time) = buf.write(&[0u8; 6]);
    assert!(crossed_second_time);
}

#[test]
fn flush_discards_buffered_bytes_and_resets_cursors() {
    let buf = CircularBuffer::new(10);
    buf.write(b"hello");
    buf.flush();
    assert_eq!(buf.used(), 0);
    assert_eq!(buf.available(), 10);
    let (written, _) = buf.write(b"world again");
    assert_eq!(written, 10);
}
