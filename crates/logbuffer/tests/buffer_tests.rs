//! LogBuffer read/write integration tests
//!
//! End-to-end coverage of the append path, index selects, time scans and
//! typed projection against a real on-disk store.

use bytes::Bytes;
use logbuffer::{Entry, Error, LogBuffer, LogBufferConfig, Record, SerializerRegistry};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

fn config(dir: &TempDir) -> LogBufferConfig {
    LogBufferConfig {
        base_path: dir.path().to_path_buf(),
        ..Default::default()
    }
}

fn open(dir: &TempDir) -> LogBuffer {
    LogBuffer::open(config(dir)).unwrap()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderA {
    id: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ClickB {
    url: String,
}

fn registry() -> SerializerRegistry {
    let mut registry = SerializerRegistry::new();
    registry.register::<OrderA, _, _>(
        123,
        |a| serde_json::to_vec(a).expect("serializable"),
        |bytes| serde_json::from_slice(bytes).map_err(Into::into),
    );
    registry.register::<ClickB, _, _>(
        124,
        |b| serde_json::to_vec(b).expect("serializable"),
        |bytes| serde_json::from_slice(bytes).map_err(Into::into),
    );
    registry
}

fn open_typed(dir: &TempDir) -> LogBuffer {
    LogBuffer::open_with_serializers(config(dir), registry()).unwrap()
}

// ---------------------------------------------------------------
// Append / read round-trip
// ---------------------------------------------------------------

#[test]
fn test_append_read_roundtrip() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);

    let x = buffer.write(b"x").unwrap();
    let y = buffer.write(b"y").unwrap();
    let z = buffer.write(b"z").unwrap();
    assert_eq!((x.index, y.index, z.index), (0, 1, 2));
    assert_eq!(buffer.write_index().unwrap(), 3);

    let records = buffer.select_from(0).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].payload, Bytes::from("x"));
    assert_eq!(records[1].payload, Bytes::from("y"));
    assert_eq!(records[2].payload, Bytes::from("z"));

    assert!(records[0].timestamp <= records[1].timestamp);
    assert!(records[1].timestamp <= records[2].timestamp);
}

#[test]
fn test_get_and_latest_write() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);

    assert!(buffer.get(0).unwrap().is_none());
    assert!(buffer.latest_write().unwrap().is_none());

    buffer.write(b"first").unwrap();
    buffer.write(b"second").unwrap();

    assert_eq!(buffer.get(0).unwrap().unwrap().payload, Bytes::from("first"));
    assert!(buffer.get(2).unwrap().is_none());
    assert_eq!(
        buffer.latest_write().unwrap().unwrap().payload,
        Bytes::from("second")
    );
}

#[test]
fn test_written_record_carries_payload_and_raw_tag() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);

    let record = buffer.write(b"data").unwrap();
    assert!(record.is_raw());
    assert_eq!(record.payload, Bytes::from("data"));

    let read_back = buffer.get(record.index).unwrap().unwrap();
    assert_eq!(read_back, record);
}

// ---------------------------------------------------------------
// Index range selects
// ---------------------------------------------------------------

#[test]
fn test_select_empty_range() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    buffer.write(b"a").unwrap();

    assert!(buffer.select(0, 0).unwrap().is_empty());
    assert!(buffer.select(1, 1).unwrap().is_empty());
}

#[test]
fn test_select_clamps_at_write_index() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    for i in 0..5u32 {
        buffer.write(&i.to_be_bytes()).unwrap();
    }

    let records = buffer.select(2, 1000).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].index, 2);
    assert_eq!(records[2].index, 4);
}

#[test]
fn test_select_rejects_inverted_range() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);

    let err = buffer.select(3, 2).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn test_select_spans_segment_files() {
    let dir = TempDir::new().unwrap();
    let buffer = LogBuffer::open(LogBufferConfig {
        base_path: dir.path().to_path_buf(),
        logs_per_file: 3,
        ..Default::default()
    })
    .unwrap();

    for i in 0..10u32 {
        buffer.write(format!("p{i}").as_bytes()).unwrap();
    }

    let records = buffer.select_from(0).unwrap();
    assert_eq!(records.len(), 10);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.index, i as u64);
        assert_eq!(record.payload, Bytes::from(format!("p{i}")));
    }
}

// ---------------------------------------------------------------
// Time range scans
// ---------------------------------------------------------------

fn write_spaced(buffer: &LogBuffer, n: usize, gap_ms: u64) -> Vec<Record> {
    let mut records = Vec::new();
    for i in 0..n {
        records.push(buffer.write(format!("r{i}").as_bytes()).unwrap());
        if i + 1 < n {
            std::thread::sleep(std::time::Duration::from_millis(gap_ms));
        }
    }
    records
}

#[test]
fn test_backward_time_scan() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    let written = write_spaced(&buffer, 5, 20);

    // records 1..=3 by their actual timestamps, ascending order
    let records = buffer
        .select_backward(written[1].timestamp, written[3].timestamp)
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].index, 1);
    assert_eq!(records[1].index, 2);
    assert_eq!(records[2].index, 3);
}

#[test]
fn test_backward_scan_exact_timestamp() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    let written = write_spaced(&buffer, 3, 20);

    let exact = buffer
        .select_backward(written[1].timestamp, written[1].timestamp)
        .unwrap();
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].index, 1);
}

#[test]
fn test_forward_scan_from_index() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    let written = write_spaced(&buffer, 5, 20);

    let records = buffer
        .select_forward_at(0, written[1].timestamp, written[3].timestamp)
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].index, 1);
    assert_eq!(records[2].index, 3);
}

#[test]
fn test_forward_scan_includes_exact_bound() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    let written = write_spaced(&buffer, 3, 20);

    let records = buffer
        .select_forward_at(0, written[1].timestamp, written[1].timestamp)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, 1);
}

#[test]
fn test_forward_scan_default_starts_at_newest() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    let written = write_spaced(&buffer, 3, 20);

    // without an explicit start the scan begins at the newest record
    let records = buffer
        .select_forward(written[0].timestamp, written[2].timestamp)
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].index, 2);
}

#[test]
fn test_time_scans_reject_inverted_range() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    buffer.write(b"a").unwrap();

    assert!(matches!(
        buffer.select_forward_at(0, 10, 5).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        buffer.select_backward(10, 5).unwrap_err(),
        Error::InvalidArgument(_)
    ));
}

#[test]
fn test_backward_scan_on_empty_buffer() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    assert!(buffer.select_backward(0, i64::MAX).unwrap().is_empty());
}

// ---------------------------------------------------------------
// Typed writes and projection
// ---------------------------------------------------------------

#[test]
fn test_type_isolation() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    let a1 = OrderA { id: 1 };
    let b1 = ClickB { url: "/one".into() };
    let a2 = OrderA { id: 2 };
    let b2 = ClickB { url: "/two".into() };

    buffer.write_value(&a1).unwrap();
    buffer.write_value(&b1).unwrap();
    buffer.write_value(&a2).unwrap();
    buffer.write_value(&b2).unwrap();

    let orders: Vec<Entry<OrderA>> = buffer.select_typed(0, 4).unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].value, a1);
    assert_eq!(orders[0].index, 0);
    assert_eq!(orders[1].value, a2);
    assert_eq!(orders[1].index, 2);

    let clicks: Vec<Entry<ClickB>> = buffer.select_typed(0, 4).unwrap();
    assert_eq!(clicks.len(), 2);
    assert_eq!(clicks[0].value, b1);
    assert_eq!(clicks[1].value, b2);

    // the raw view still sees all four
    assert_eq!(buffer.select_from(0).unwrap().len(), 4);
}

#[test]
fn test_typed_write_assigns_registered_tag() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    let record = buffer.write_value(&OrderA { id: 7 }).unwrap();
    assert_eq!(record.type_tag, 123);
    assert!(!record.is_raw());
}

#[test]
fn test_record_projection_includes_raw_and_typed() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    buffer.write(b"raw").unwrap();
    buffer.write_value(&OrderA { id: 1 }).unwrap();

    let all: Vec<Entry<Record>> = buffer.select_typed(0, 2).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].value.is_raw());
    assert_eq!(all[1].value.type_tag, 123);
}

#[test]
fn test_typed_projection_excludes_raw_records() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    buffer.write(b"raw").unwrap();
    buffer.write_value(&OrderA { id: 1 }).unwrap();

    let orders: Vec<Entry<OrderA>> = buffer.select_typed_from(0).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].index, 1);
}

#[test]
fn test_write_value_without_encoder() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);

    let err = buffer.write_value(&OrderA { id: 1 }).unwrap_err();
    assert!(matches!(err, Error::NoEncoder { .. }));
}

#[test]
fn test_typed_scan_over_unknown_tag_is_missing_decoder() {
    let dir = TempDir::new().unwrap();

    // write a tagged record, then reopen without that serializer
    {
        let buffer = open_typed(&dir);
        buffer.write_value(&OrderA { id: 1 }).unwrap();
    }

    let mut only_clicks = SerializerRegistry::new();
    only_clicks.register::<ClickB, _, _>(
        124,
        |b| serde_json::to_vec(b).expect("serializable"),
        |bytes| serde_json::from_slice(bytes).map_err(Into::into),
    );
    let buffer = LogBuffer::open_with_serializers(config(&dir), only_clicks).unwrap();

    let err = buffer.select_typed_from::<ClickB>(0).unwrap_err();
    assert!(matches!(err, Error::MissingDecoder { tag: 123 }));

    // the untyped view returns the unknown tag as an opaque record
    let raw = buffer.select_from(0).unwrap();
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0].type_tag, 123);
}

#[test]
fn test_typed_time_scans() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    let r1 = buffer.write_value(&OrderA { id: 1 }).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    buffer.write_value(&ClickB { url: "/x".into() }).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    let r3 = buffer.write_value(&OrderA { id: 2 }).unwrap();

    let orders: Vec<Entry<OrderA>> = buffer
        .select_forward_typed(0, r1.timestamp, r3.timestamp)
        .unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].value, OrderA { id: 1 });
    assert_eq!(orders[1].value, OrderA { id: 2 });

    let backwards: Vec<Entry<OrderA>> = buffer
        .select_backward_typed(r1.timestamp, r3.timestamp)
        .unwrap();
    assert_eq!(backwards.len(), 2);
    assert_eq!(backwards[0].index, r1.index);
}

#[test]
fn test_get_next_of_type() {
    let dir = TempDir::new().unwrap();
    let buffer = open_typed(&dir);

    buffer.write(b"raw").unwrap();
    buffer.write_value(&ClickB { url: "/x".into() }).unwrap();
    buffer.write_value(&OrderA { id: 5 }).unwrap();

    let next = buffer.get_next_of_type::<OrderA>(0).unwrap().unwrap();
    assert_eq!(next.index, 2);
    assert_eq!(next.type_tag, 123);

    // Record matches anything, headers only
    let any = buffer.get_next_of_type::<Record>(1).unwrap().unwrap();
    assert_eq!(any.index, 1);

    assert!(buffer.get_next_of_type::<OrderA>(3).unwrap().is_none());
}

// ---------------------------------------------------------------
// Reopen / recovery
// ---------------------------------------------------------------

#[test]
fn test_reopen_preserves_contents_and_write_index() {
    let dir = TempDir::new().unwrap();
    {
        let buffer = open(&dir);
        buffer.write(b"one").unwrap();
        buffer.write(b"two").unwrap();
        buffer.close().unwrap();
    }

    let buffer = open(&dir);
    assert_eq!(buffer.write_index().unwrap(), 2);
    let records = buffer.select_from(0).unwrap();
    assert_eq!(records[0].payload, Bytes::from("one"));
    assert_eq!(records[1].payload, Bytes::from("two"));

    let third = buffer.write(b"three").unwrap();
    assert_eq!(third.index, 2);
}

#[test]
fn test_timestamps_monotone_across_reopen() {
    let dir = TempDir::new().unwrap();
    let before = {
        let buffer = open(&dir);
        buffer.write(b"a").unwrap()
    };

    let buffer = open(&dir);
    let after = buffer.write(b"b").unwrap();
    assert!(after.timestamp >= before.timestamp);
}

// ---------------------------------------------------------------
// Close semantics
// ---------------------------------------------------------------

#[test]
fn test_operations_after_close_fail() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    buffer.write(b"a").unwrap();
    buffer.close().unwrap();

    assert!(matches!(buffer.write(b"b").unwrap_err(), Error::Closed));
    assert!(matches!(buffer.select_from(0).unwrap_err(), Error::Closed));
    assert!(matches!(buffer.write_index().unwrap_err(), Error::Closed));
}

#[test]
fn test_close_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let buffer = open(&dir);
    buffer.write(b"a").unwrap();
    buffer.close().unwrap();
    buffer.close().unwrap();
}
