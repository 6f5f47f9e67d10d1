#[cfg(test)]
mod tests {
    use super::super::decoder::*;
    use super::super::event::*;
    use super::super::header::{EventHeader, EventType};
    use super::super::rows::{ColumnValue, RowsKind};
    use super::super::status::StatusVariable;
    use super::super::test_utils::{MockColumn, MockEventBuilder, MockValue};
    use crate::Error;
    use bytes::Bytes;

    fn header(event_type: EventType) -> EventHeader {
        EventHeader {
            timestamp: 1_697_369_400,
            event_type,
            server_id: 7,
            event_length: 0,
            next_position: 500,
            flags: 0,
        }
    }

    fn roundtrip(event_type: EventType, event: BinlogEvent) {
        let bytes = encode_event(&header(event_type), &event).unwrap().unwrap();
        let mut decoder = BinlogDecoder::new();
        let decoded = decoder.decode(&bytes).unwrap();
        assert_eq!(decoded.event, event);
        assert_eq!(decoded.header.event_length as usize, bytes.len());
        assert_eq!(encode_event(&decoded.header, &decoded.event).unwrap().unwrap(), bytes);
    }

    #[test]
    fn test_non_row_events_roundtrip() {
        roundtrip(
            EventType::Query,
            BinlogEvent::Query(QueryEvent {
                thread_id: 12,
                exec_time: 0,
                error_code: 0,
                status_vars: vec![
                    StatusVariable::Flags2(0),
                    StatusVariable::Catalog("std".to_string()),
                    StatusVariable::Charset { client: 33, connection: 33, server: 8 },
                ],
                schema: "shop".to_string(),
                query: "BEGIN".to_string(),
            }),
        );
        roundtrip(EventType::Stop, BinlogEvent::Stop);
        roundtrip(
            EventType::Rotate,
            BinlogEvent::Rotate(RotateEvent {
                position: 4,
                next_binlog: "mysql-bin.000002".to_string(),
            }),
        );
        roundtrip(EventType::Intvar, BinlogEvent::Intvar(IntvarEvent { kind: 2, value: 1001 }));
        roundtrip(EventType::Rand, BinlogEvent::Rand(RandEvent { seed1: 1, seed2: u64::MAX }));
        roundtrip(EventType::Xid, BinlogEvent::Xid(XidEvent { xid: 9_876 }));
        roundtrip(
            EventType::Incident,
            BinlogEvent::Incident(IncidentEvent {
                incident: 1,
                message: "lost events".to_string(),
            }),
        );
        roundtrip(
            EventType::Heartbeat,
            BinlogEvent::Heartbeat {
                log_ident: "mysql-bin.000001".to_string(),
            },
        );
        roundtrip(
            EventType::RowsQuery,
            BinlogEvent::RowsQuery(RowsQueryEvent {
                query: "INSERT INTO t VALUES (1)".to_string(),
            }),
        );
        roundtrip(
            EventType::PreviousGtids,
            BinlogEvent::PreviousGtids(PreviousGtidsEvent {
                sets: vec![GtidSidSet {
                    sid: [0xAB; 16],
                    intervals: vec![GtidInterval { start: 1, end: 6 }],
                }],
            }),
        );
    }

    #[test]
    fn test_gtid_event_roundtrip() {
        let gtid = GtidEvent {
            flags: 1,
            sid: [
                0x3e, 0x11, 0xfa, 0x47, 0x71, 0xca, 0x11, 0xe1, 0x9e, 0x33, 0xc8, 0x0a, 0xa9,
                0x42, 0x95, 0x62,
            ],
            gno: 23,
            logical_clock: Some(LogicalClock {
                last_committed: 4,
                sequence_number: 5,
            }),
            trailer: Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7]),
        };
        assert_eq!(gtid.gtid_string(), "3e11fa47-71ca-11e1-9e33-c80aa9429562:23");
        roundtrip(EventType::Gtid, BinlogEvent::Gtid(gtid.clone()));

        let legacy = GtidEvent {
            logical_clock: None,
            trailer: Bytes::new(),
            ..gtid
        };
        roundtrip(EventType::AnonymousGtid, BinlogEvent::AnonymousGtid(legacy));
    }

    #[test]
    fn test_previous_gtids_string() {
        let event = PreviousGtidsEvent {
            sets: vec![GtidSidSet {
                sid: [0; 16],
                intervals: vec![
                    GtidInterval { start: 1, end: 6 },
                    GtidInterval { start: 9, end: 10 },
                ],
            }],
        };
        assert_eq!(
            event.gtid_set_string(),
            "00000000-0000-0000-0000-000000000000:1-5:9"
        );
    }

    #[test]
    fn test_fixed_event_with_trailing_bytes() {
        let mut builder = MockEventBuilder::new();
        let bytes = builder.event(EventType::Xid, &[1, 0, 0, 0, 0, 0, 0, 0, 0xFF]);
        let mut decoder = BinlogDecoder::new();
        assert!(matches!(
            decoder.decode(&bytes),
            Err(Error::TrailingBytes { remaining: 1, .. })
        ));
    }

    #[test]
    fn test_truncated_event() {
        let mut builder = MockEventBuilder::new();
        let bytes = builder.query("shop", "BEGIN");
        let mut decoder = BinlogDecoder::new();
        assert!(matches!(
            decoder.decode(&bytes[..bytes.len() - 3]),
            Err(Error::TruncatedStream { .. })
        ));
        assert!(matches!(
            decoder.decode(&bytes[..10]),
            Err(Error::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_unknown_event_type() {
        let mut builder = MockEventBuilder::new();
        let mut bytes = builder.xid(1).to_vec();
        bytes[4] = 0x7F;
        let mut decoder = BinlogDecoder::new();
        assert!(matches!(
            decoder.decode(&bytes),
            Err(Error::UnknownEventType(0x7F))
        ));
    }

    #[test]
    fn test_unknown_status_variable() {
        let mut builder = MockEventBuilder::new();
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(0);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&[0xEE, 0x00]);
        body.push(0);
        body.extend_from_slice(b"BEGIN");
        let bytes = builder.event(EventType::Query, &body);

        let mut decoder = BinlogDecoder::new();
        assert!(matches!(
            decoder.decode(&bytes),
            Err(Error::UnknownStatusVariable(0xEE))
        ));
    }

    #[test]
    fn test_query_event_from_server_layout() {
        let mut builder = MockEventBuilder::new();
        let bytes = builder.query("shop", "BEGIN");
        let mut decoder = BinlogDecoder::new();
        match decoder.decode(&bytes).unwrap().event {
            BinlogEvent::Query(query) => {
                assert_eq!(query.thread_id, 42);
                assert_eq!(query.schema, "shop");
                assert!(query.is_transaction_begin());
                assert_eq!(
                    query.status_vars,
                    vec![
                        StatusVariable::Flags2(0),
                        StatusVariable::Charset { client: 33, connection: 33, server: 8 },
                    ]
                );
            }
            other => panic!("Expected query event, got {:?}", other),
        }
    }

    #[test]
    fn test_format_description_checksum_is_stripped() {
        let mut builder = MockEventBuilder::new().with_checksum();
        let fde = builder.format_description();
        let xid = builder.xid(77);

        let mut decoder = BinlogDecoder::new();
        match decoder.decode(&fde).unwrap().event {
            BinlogEvent::FormatDescription(format) => {
                assert_eq!(format.server_version, "8.0.34");
                assert_eq!(format.binlog_version, 4);
                assert_eq!(format.checksum_alg, Some(CHECKSUM_ALG_CRC32));
                assert_eq!(format.post_header_lengths.len(), 38);
            }
            other => panic!("Expected format description, got {:?}", other),
        }
        assert!(decoder.checksum_enabled());
        assert_eq!(
            decoder.decode(&xid).unwrap().event,
            BinlogEvent::Xid(XidEvent { xid: 77 })
        );
    }

    #[test]
    fn test_format_description_without_checksum() {
        let mut builder = MockEventBuilder::new();
        let fde = builder.format_description();
        let mut decoder = BinlogDecoder::new();
        let decoded = decoder.decode(&fde).unwrap();
        assert!(!decoder.checksum_enabled());
        match &decoded.event {
            BinlogEvent::FormatDescription(format) => {
                assert_eq!(format.checksum_alg, Some(CHECKSUM_ALG_OFF));
            }
            other => panic!("Expected format description, got {:?}", other),
        }
        assert_eq!(encode_event(&decoded.header, &decoded.event).unwrap().unwrap(), fde);
    }

    #[test]
    fn test_format_description_checksum_off_keeps_reserved_field() {
        // Checksum-aware server with checksums off: alg byte 0 followed by
        // four bytes that are not a checksum
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_le_bytes());
        let mut version = [0u8; SERVER_VERSION_LENGTH];
        version[..6].copy_from_slice(b"5.7.44");
        body.extend_from_slice(&version);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(19);
        body.extend_from_slice(&[8u8; 38]);
        body.push(CHECKSUM_ALG_OFF);
        body.extend_from_slice(&[1, 2, 3, 4]);

        let mut builder = MockEventBuilder::new();
        let fde = builder.event(EventType::FormatDescription, &body);
        let mut decoder = BinlogDecoder::new();
        match decoder.decode(&fde).unwrap().event {
            BinlogEvent::FormatDescription(format) => {
                assert_eq!(format.checksum_alg, Some(CHECKSUM_ALG_OFF));
                assert_eq!(format.post_header_lengths, vec![8u8; 38]);
            }
            other => panic!("Expected format description, got {:?}", other),
        }
        assert!(!decoder.checksum_enabled());

        let xid = builder.xid(5);
        assert_eq!(
            decoder.decode(&xid).unwrap().event,
            BinlogEvent::Xid(XidEvent { xid: 5 })
        );
    }

    #[test]
    fn test_format_description_before_checksums() {
        let event = BinlogEvent::FormatDescription(FormatDescriptionEvent {
            binlog_version: 4,
            server_version: "5.5.62".to_string(),
            create_timestamp: 0,
            header_length: 19,
            post_header_lengths: vec![0x38, 0x0d, 0, 8],
            checksum_alg: None,
        });
        roundtrip(EventType::FormatDescription, event);
    }

    #[test]
    fn test_oversized_fields_fail_to_encode() {
        let query = BinlogEvent::Query(QueryEvent {
            thread_id: 1,
            exec_time: 0,
            error_code: 0,
            status_vars: Vec::new(),
            schema: "s".repeat(256),
            query: "BEGIN".to_string(),
        });
        assert!(matches!(
            encode_event(&header(EventType::Query), &query),
            Err(Error::InvalidMessage { .. })
        ));

        let incident = BinlogEvent::Incident(IncidentEvent {
            incident: 1,
            message: "m".repeat(300),
        });
        assert!(matches!(
            encode_event(&header(EventType::Incident), &incident),
            Err(Error::InvalidMessage { .. })
        ));

        let format = BinlogEvent::FormatDescription(FormatDescriptionEvent {
            binlog_version: 4,
            server_version: "8".repeat(51),
            create_timestamp: 0,
            header_length: 19,
            post_header_lengths: Vec::new(),
            checksum_alg: Some(CHECKSUM_ALG_OFF),
        });
        assert!(matches!(
            encode_event(&header(EventType::FormatDescription), &format),
            Err(Error::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_rows_require_table_map() {
        let mut builder = MockEventBuilder::new();
        let rows = builder.write_rows(99, &[vec![MockValue::Long(1)]]);
        let mut decoder = BinlogDecoder::new();
        assert!(matches!(decoder.decode(&rows), Err(Error::UnknownTable(99))));
    }

    #[test]
    fn test_table_map_then_rows() {
        let mut builder = MockEventBuilder::new();
        let map = builder.table_map(
            42,
            "shop",
            "orders",
            &[MockColumn::Long, MockColumn::Varchar, MockColumn::Long],
        );
        let insert = builder.write_rows(
            42,
            &[
                vec![MockValue::Long(1), MockValue::Varchar("new"), MockValue::Null],
                vec![MockValue::Long(-2), MockValue::Varchar(""), MockValue::Long(5)],
            ],
        );
        let update = builder.update_rows(
            42,
            &[
                vec![MockValue::Long(1), MockValue::Varchar("new"), MockValue::Null],
                vec![MockValue::Long(1), MockValue::Varchar("paid"), MockValue::Long(3)],
            ],
        );

        let mut decoder = BinlogDecoder::new();
        match decoder.decode(&map).unwrap().event {
            BinlogEvent::TableMap(table) => {
                assert_eq!(table.schema, "shop");
                assert_eq!(table.table, "orders");
                assert_eq!(table.column_count(), 3);
                assert_eq!(table.column_metadata, vec![0, 64, 0]);
                assert!(table.is_nullable(2));
            }
            other => panic!("Expected table map, got {:?}", other),
        }
        assert!(decoder.table(42).is_some());

        match decoder.decode(&insert).unwrap().event {
            BinlogEvent::Rows(rows) => {
                assert_eq!(rows.kind, RowsKind::Write);
                assert_eq!(rows.rows.len(), 2);
                let first = rows.rows[0].after.as_ref().unwrap();
                assert_eq!(first[0], Some(ColumnValue::Int(1)));
                assert_eq!(first[1], Some(ColumnValue::Text("new".to_string())));
                assert_eq!(first[2], Some(ColumnValue::Null));
                let second = rows.rows[1].after.as_ref().unwrap();
                assert_eq!(second[0], Some(ColumnValue::Int(-2)));
                assert_eq!(second[2], Some(ColumnValue::Int(5)));
                assert!(rows.rows[0].before.is_none());
            }
            other => panic!("Expected rows event, got {:?}", other),
        }

        match decoder.decode(&update).unwrap().event {
            BinlogEvent::Rows(rows) => {
                assert_eq!(rows.kind, RowsKind::Update);
                assert_eq!(rows.rows.len(), 1);
                let change = &rows.rows[0];
                assert_eq!(
                    change.before.as_ref().unwrap()[1],
                    Some(ColumnValue::Text("new".to_string()))
                );
                assert_eq!(
                    change.after.as_ref().unwrap()[1],
                    Some(ColumnValue::Text("paid".to_string()))
                );
            }
            other => panic!("Expected rows event, got {:?}", other),
        }
    }

    #[test]
    fn test_rows_are_decode_only() {
        let mut builder = MockEventBuilder::new();
        let map = builder.table_map(1, "db", "t", &[MockColumn::Long]);
        let mut decoder = BinlogDecoder::new();
        let decoded = decoder.decode(&map).unwrap();
        assert!(encode_event(&decoded.header, &decoded.event).unwrap().is_none());
    }

    #[test]
    fn test_event_framer_partial_delivery() {
        let mut builder = MockEventBuilder::new();
        let events = vec![builder.query("shop", "BEGIN"), builder.xid(5)];
        let file = super::super::test_utils::binlog_file(&events);

        let mut framer = EventFramer::for_file();
        let mut framed = Vec::new();
        for chunk in file.chunks(3) {
            framer.feed(chunk);
            while let Some(event) = framer.next_event().unwrap() {
                framed.push(event);
            }
        }
        framer.finish().unwrap();
        assert_eq!(framed, events);
    }

    #[test]
    fn test_event_framer_rejects_bad_magic() {
        let mut framer = EventFramer::for_file();
        framer.feed(b"\xfebix");
        assert!(matches!(framer.next_event(), Err(Error::InvalidMessage { .. })));
    }

    #[test]
    fn test_event_framer_reports_cut_event() {
        let mut builder = MockEventBuilder::new();
        let event = builder.xid(5);
        let mut framer = EventFramer::for_events();
        framer.feed(&event[..20]);
        assert!(framer.next_event().unwrap().is_none());
        assert!(matches!(
            framer.finish(),
            Err(Error::TruncatedStream { needed: 27, available: 20 })
        ));
    }
}
