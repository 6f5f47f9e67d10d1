mod common;

use bytes::Bytes;
use cdc_capture::event::EventDispatcher;
use cdc_capture::mysql::event::{FormatDescriptionEvent, QueryEvent, RotateEvent, XidEvent};
use cdc_capture::mysql::{
    encode_event, BinlogDecoder, BinlogEvent, BinlogExtractor, EventFramer, EventHeader,
    EventType, Packet, StreamFormat, BINLOG_MAGIC,
};
use cdc_capture::Error;
use common::CollectingListener;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Lays events out back to back starting after the file magic.
struct FileWriter {
    position: u32,
    events: Vec<(Bytes, BinlogEvent)>,
}

impl FileWriter {
    fn new() -> Self {
        Self {
            position: BINLOG_MAGIC.len() as u32,
            events: Vec::new(),
        }
    }

    fn push(&mut self, event_type: EventType, event: BinlogEvent) -> Bytes {
        let mut header = EventHeader {
            timestamp: 1_709_294_400,
            event_type,
            server_id: 1,
            event_length: 0,
            next_position: 0,
            flags: 0,
        };
        let length = encode_event(&header, &event).unwrap().unwrap().len() as u32;
        header.next_position = self.position + length;
        let raw = encode_event(&header, &event).unwrap().unwrap();
        self.position += length;
        self.events.push((raw.clone(), event));
        raw
    }

    fn file(&self) -> Vec<u8> {
        let mut out = BINLOG_MAGIC.to_vec();
        for (raw, _) in &self.events {
            out.extend_from_slice(raw);
        }
        out
    }
}

fn sample_file() -> FileWriter {
    let mut writer = FileWriter::new();
    writer.push(
        EventType::FormatDescription,
        BinlogEvent::FormatDescription(FormatDescriptionEvent {
            binlog_version: 4,
            server_version: "8.0.34".to_string(),
            create_timestamp: 0,
            header_length: 19,
            post_header_lengths: vec![0; 38],
            checksum_alg: Some(0),
        }),
    );
    writer.push(
        EventType::Query,
        BinlogEvent::Query(QueryEvent {
            thread_id: 7,
            exec_time: 0,
            error_code: 0,
            status_vars: Vec::new(),
            schema: "shop".to_string(),
            query: "BEGIN".to_string(),
        }),
    );
    writer.push(EventType::Xid, BinlogEvent::Xid(XidEvent { xid: 99 }));
    writer.push(
        EventType::Rotate,
        BinlogEvent::Rotate(RotateEvent {
            position: 4,
            next_binlog: "mysql-bin.000002".to_string(),
        }),
    );
    writer
}

fn extractor(format: StreamFormat) -> (BinlogExtractor, Arc<CollectingListener>) {
    let listener = Arc::new(CollectingListener::default());
    let dispatcher = Arc::new(EventDispatcher::new().with_listener(listener.clone()));
    let extractor = BinlogExtractor::new(format, dispatcher).with_position("mysql-bin.000001", 4);
    (extractor, listener)
}

fn dump_packet(sequence: u8, event: &[u8]) -> Bytes {
    let mut body = vec![0x00];
    body.extend_from_slice(event);
    Packet::new(sequence, body).unwrap().encode()
}

#[test]
fn test_file_events_decode_in_order() {
    let writer = sample_file();
    let mut framer = EventFramer::for_file();
    framer.feed(&writer.file());

    let mut decoder = BinlogDecoder::new();
    let mut decoded = Vec::new();
    while let Some(raw) = framer.next_event().unwrap() {
        decoded.push(decoder.decode(&raw).unwrap());
    }
    framer.finish().unwrap();

    assert_eq!(decoded.len(), writer.events.len());
    for (got, (_, expected)) in decoded.iter().zip(&writer.events) {
        assert_eq!(&got.event, expected);
    }
    assert_eq!(decoded[1].header.position(), decoded[0].header.next_position);
    assert!(!decoder.checksum_enabled());
    assert_eq!(decoder.format().unwrap().server_version, "8.0.34");
}

#[tokio::test]
async fn test_file_stream_follows_rotate() {
    let file = sample_file().file();
    let (mut extractor, listener) = extractor(StreamFormat::File);

    let stats = extractor.run(file.as_slice()).await.unwrap();

    assert_eq!(stats.events, 4);
    assert_eq!(stats.changes, 0);
    assert_eq!(extractor.position().to_string(), "mysql-bin.000002:4");
    assert!(listener.errors.lock().await.is_empty());
}

#[tokio::test]
async fn test_file_stream_byte_at_a_time() {
    let file = sample_file().file();
    let (mut extractor, _listener) = extractor(StreamFormat::File);
    let (mut tx, rx) = tokio::io::duplex(16);

    let writer = tokio::spawn(async move {
        for byte in file {
            tx.write_all(&[byte]).await.unwrap();
        }
    });
    let stats = extractor.run(rx).await.unwrap();
    writer.await.unwrap();

    assert_eq!(stats.events, 4);
}

#[tokio::test]
async fn test_network_stream_stops_at_eof() {
    let writer = sample_file();
    let mut stream = Vec::new();
    for (sequence, (raw, _)) in writer.events.iter().take(3).enumerate() {
        stream.extend_from_slice(&dump_packet(sequence as u8 + 1, raw));
    }
    stream.extend_from_slice(&Packet::new(4, vec![0xFE, 0, 0, 0, 0]).unwrap().encode());
    // Anything after EOF is never read
    stream.extend_from_slice(&dump_packet(5, &writer.events[3].0));

    let (mut extractor, _listener) = extractor(StreamFormat::Network);
    let stats = extractor.run(stream.as_slice()).await.unwrap();

    assert_eq!(stats.events, 3);
    assert_eq!(extractor.position().file, "mysql-bin.000001");
    assert_eq!(
        extractor.position().offset,
        writer.position as u64 - writer.events[3].0.len() as u64
    );
}

#[tokio::test]
async fn test_network_error_packet_surfaces_server_error() {
    let writer = sample_file();
    let mut stream = dump_packet(1, &writer.events[0].0).to_vec();
    let mut error = vec![0xFF];
    error.extend_from_slice(&1236u16.to_le_bytes());
    error.extend_from_slice(b"#HY000Could not find first log file name");
    stream.extend_from_slice(&Packet::new(2, error).unwrap().encode());

    let (mut extractor, listener) = extractor(StreamFormat::Network);
    let result = extractor.run(stream.as_slice()).await;

    match result {
        Err(Error::Server { code, message }) => {
            assert_eq!(code, 1236);
            assert_eq!(message, "Could not find first log file name");
        }
        other => panic!("expected server error, got {:?}", other),
    }
    let errors = listener.errors.lock().await;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("1236"));
}

#[tokio::test]
async fn test_truncated_file_reports_error_event() {
    let file = sample_file().file();
    let (mut extractor, listener) = extractor(StreamFormat::File);

    let result = extractor.run(&file[..file.len() - 5]).await;

    assert!(matches!(result, Err(Error::TruncatedStream { .. })));
    assert_eq!(listener.errors.lock().await.len(), 1);
    assert_eq!(extractor.stats().events, 3);
}
