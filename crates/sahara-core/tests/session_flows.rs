//! End-to-end session tests over a scripted transport.

use std::sync::{Arc, Mutex};

use sahara_core::protocol::constants::*;
use sahara_core::protocol::packet;
use sahara_core::{
    MemorySink, MockTransport, Mode, ProtocolError, RetryPolicy, SaharaEvent, SaharaObserver,
    SaharaSession, SessionConfig, SessionError, TransportError,
};

/// Build a framed packet: header, u32 fields, zero padding up to the
/// declared length.
fn framed(command: u32, declared: u32, fields: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(declared as usize);
    buf.extend_from_slice(&command.to_le_bytes());
    buf.extend_from_slice(&declared.to_le_bytes());
    for field in fields {
        buf.extend_from_slice(&field.to_le_bytes());
    }
    assert!(buf.len() <= declared as usize);
    buf.resize(declared as usize, 0);
    buf
}

fn region_record(save_pref: u32, addr: u32, len: u32, desc: &str, file: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MEM_REGION_RECORD_SIZE);
    buf.extend_from_slice(&save_pref.to_le_bytes());
    buf.extend_from_slice(&addr.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    for name in [desc, file] {
        let mut bytes = [0u8; MEM_REGION_NAME_SIZE];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        buf.extend_from_slice(&bytes);
    }
    buf
}

fn test_config() -> SessionConfig {
    SessionConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_ms: 0,
        },
        receive_timeout_secs: 10,
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<SaharaEvent>>,
}

impl RecordingObserver {
    fn region_progress(&self, index: usize) -> Vec<u32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                SaharaEvent::RegionProgress {
                    index: i, percent, ..
                } if *i == index => Some(*percent),
                _ => None,
            })
            .collect()
    }

    fn completed(&self) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SaharaEvent::Complete))
    }
}

impl SaharaObserver for RecordingObserver {
    fn on_event(&self, event: &SaharaEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn queue_hello(mock: &MockTransport) {
    mock.queue_bytes(&framed(CMD_HELLO, LEN_HELLO, &[]));
}

#[test]
fn crash_info_flow_produces_labeled_report() {
    let mock = MockTransport::new();
    queue_hello(&mock);
    mock.queue_bytes(&framed(CMD_READY, LEN_READY, &[]));

    let payloads: [(u32, &[u8]); 4] = [
        (EXEC_BOOT_VERSION_READ, b"1.2.3"),
        (EXEC_PRODUCT_MODEL_READ, b"MODEL-X"),
        (EXEC_SERIAL_NUM_READ, b"SN12345"),
        (EXEC_CRASH_INFO_READ, b"no fault"),
    ];
    for (code, payload) in payloads {
        mock.queue_bytes(&framed(
            CMD_EXECUTE_RESP,
            LEN_EXECUTE_RESP,
            &[code, payload.len() as u32],
        ));
        mock.queue_bytes(payload);
    }

    let handle = mock.clone();
    let mut sink = MemorySink::new();
    let report = SaharaSession::new(mock, test_config())
        .run_crash_info(&mut sink)
        .unwrap();

    assert_eq!(report.boot_version, "1.2.3");
    assert_eq!(report.product_model, "MODEL-X");
    assert_eq!(report.serial_number, "SN12345");
    assert_eq!(report.crash_info, "no fault");

    let expected = b"Crash Summary: \n\
        SBL Version: 1.2.3\n\
        Product Model: MODEL-X\n\
        Serial Num: SN12345\n\
        Crash Info: no fault\n\
        End Basic Crash Information\n";
    assert_eq!(sink.contents("crashinfo.txt").unwrap(), expected);

    // switch, hello resp, 4 x (execute + data), reset
    let writes = handle.get_writes();
    assert_eq!(writes.len(), 11);
    assert_eq!(writes[0], packet::switch_mode(Mode::Command));
    assert_eq!(writes[1], packet::hello_response(Mode::Command));
    assert_eq!(
        writes[2],
        packet::command_execute(EXEC_BOOT_VERSION_READ)
    );
    assert_eq!(writes[10], packet::reset());
    assert!(handle.is_closed());
}

#[test]
fn ram_dump_flow_downloads_all_regions() {
    let regions = [
        region_record(1, 0x1000, 5000, "ddr", "region0.bin"),
        region_record(0, 0, 0, "reserved", "region1.bin"),
        region_record(1, 0x9000, 100, "tail", "region2.bin"),
    ];
    let table: Vec<u8> = regions.concat();

    let mock = MockTransport::new();
    queue_hello(&mock);
    mock.queue_bytes(&framed(
        CMD_MEMORY_DEBUG,
        LEN_MEMORY_DEBUG,
        &[0x2000_0000, table.len() as u32],
    ));
    mock.queue_bytes(&table);
    // region0: 5000 bytes in 2032 + 2032 + 936
    mock.queue_bytes(&vec![0xA1; 2032]);
    mock.queue_bytes(&vec![0xA2; 2032]);
    mock.queue_bytes(&vec![0xA3; 936]);
    // region2: one short read
    mock.queue_bytes(&vec![0xB1; 100]);

    let handle = mock.clone();
    let observer = Arc::new(RecordingObserver::default());
    let mut sink = MemorySink::new();
    let dump = SaharaSession::with_observer(mock, test_config(), Arc::clone(&observer))
        .run_ram_dump(&mut sink)
        .unwrap();

    assert_eq!(dump.regions.len(), 3);
    assert!(dump.is_complete());
    assert_eq!(dump.total_bytes(), 5100);
    assert_eq!(dump.regions[0].name, "region0.bin");
    assert_eq!(dump.regions[0].bytes_written, 5000);
    assert_eq!(dump.regions[1].bytes_written, 0);
    assert!(dump.regions[1].complete);
    assert_eq!(dump.regions[2].bytes_written, 100);

    // Every artifact exists and matches its region length.
    assert_eq!(sink.contents("region0.bin").unwrap().len(), 5000);
    assert_eq!(sink.contents("region1.bin").unwrap().len(), 0);
    assert_eq!(sink.contents("region2.bin").unwrap().len(), 100);
    // Chunks land in order.
    let region0 = sink.contents("region0.bin").unwrap();
    assert_eq!(region0[0], 0xA1);
    assert_eq!(region0[2032], 0xA2);
    assert_eq!(region0[4999], 0xA3);

    // Offset-tracked reads: table, then three chunks, then the tail
    // region, then reset.
    let writes = handle.get_writes();
    assert_eq!(writes[2], packet::memory_read(0x2000_0000, 156));
    assert_eq!(writes[3], packet::memory_read(0x1000, 2032));
    assert_eq!(writes[4], packet::memory_read(0x1000 + 2032, 2032));
    assert_eq!(writes[5], packet::memory_read(0x1000 + 4064, 936));
    assert_eq!(writes[6], packet::memory_read(0x9000, 100));
    assert_eq!(writes[7], packet::reset());

    // 10-point progress thresholds: 2032/5000, 4064/5000, then done.
    assert_eq!(observer.region_progress(0), vec![40, 81, 100]);
    assert!(observer.completed());
}

#[test]
fn end_of_image_truncates_one_region_and_continues() {
    let regions = [
        region_record(1, 0x1000, 4000, "ddr", "a.bin"),
        region_record(1, 0x5000, 100, "tail", "b.bin"),
    ];
    let table: Vec<u8> = regions.concat();

    let mock = MockTransport::new();
    queue_hello(&mock);
    mock.queue_bytes(&framed(
        CMD_MEMORY_DEBUG,
        LEN_MEMORY_DEBUG,
        &[0x2000_0000, table.len() as u32],
    ));
    mock.queue_bytes(&table);
    mock.queue_bytes(&vec![0xC1; 2032]);
    // Target aborts the rest of region a.
    mock.queue_bytes(&framed(
        CMD_END_TRANSFER_IMAGE,
        LEN_END_TRANSFER_IMAGE,
        &[0, 0],
    ));
    mock.queue_bytes(&vec![0xC2; 100]);

    let mut sink = MemorySink::new();
    let dump = SaharaSession::new(mock, test_config())
        .run_ram_dump(&mut sink)
        .unwrap();

    assert_eq!(dump.regions.len(), 2);
    assert!(!dump.is_complete());
    assert!(!dump.regions[0].complete);
    assert_eq!(dump.regions[0].bytes_written, 2032);
    assert!(dump.regions[0].bytes_written < 4000);
    assert!(dump.regions[1].complete);

    // Partial data is kept, the next region still downloads.
    assert_eq!(sink.contents("a.bin").unwrap().len(), 2032);
    assert_eq!(sink.contents("b.bin").unwrap().len(), 100);
}

#[test]
fn zero_region_table_is_invalid_and_writes_nothing() {
    let mock = MockTransport::new();
    queue_hello(&mock);
    mock.queue_bytes(&framed(CMD_MEMORY_DEBUG, LEN_MEMORY_DEBUG, &[0x2000_0000, 30]));
    // 30 bytes cannot hold a single 52-byte record.
    mock.queue_bytes(&[0u8; 30]);

    let handle = mock.clone();
    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_ram_dump(&mut sink)
        .unwrap_err();

    assert!(matches!(err, SessionError::InvalidMemoryTable));
    assert!(sink.is_empty());
    // Teardown still resets the target.
    assert_eq!(handle.get_writes().last().unwrap(), &packet::reset());
    assert!(handle.is_closed());
}

#[test]
fn non_hello_reply_aborts_as_unsupported() {
    let mock = MockTransport::new();
    mock.queue_bytes(&framed(CMD_READY, LEN_READY, &[]));

    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_crash_info(&mut sink)
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::UnexpectedCommand {
            expected: CMD_HELLO,
            actual: CMD_READY,
        }
    ));
}

#[test]
fn peer_close_is_a_transport_error() {
    let mock = MockTransport::new();
    mock.queue_close();

    let handle = mock.clone();
    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_crash_info(&mut sink)
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Transport(TransportError::PeerClosed)
    ));
    assert!(handle.is_closed());
}

#[test]
fn ready_wait_gives_up_after_bounded_retries() {
    let mock = MockTransport::new();
    queue_hello(&mock);
    for _ in 0..3 {
        mock.queue_bytes(&framed(CMD_DONE_RESP, LEN_DONE_RESP, &[0]));
    }

    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_crash_info(&mut sink)
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::RetriesExhausted {
            context: "ready wait",
            attempts: 3,
        }
    ));
}

#[test]
fn repeated_short_table_reads_surface_desync() {
    let mock = MockTransport::new();
    queue_hello(&mock);
    mock.queue_bytes(&framed(
        CMD_MEMORY_DEBUG,
        LEN_MEMORY_DEBUG,
        &[0x2000_0000, 104],
    ));
    // Each attempt gets 52 of the requested 104 bytes, then silence.
    mock.queue_bytes(&[0x11; 52]);
    mock.queue_timeout();
    mock.queue_bytes(&[0x11; 52]);
    mock.queue_timeout();
    mock.queue_bytes(&[0x11; 52]);

    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_ram_dump(&mut sink)
        .unwrap_err();

    assert!(matches!(err, SessionError::ProtocolDesync { attempts: 3 }));
    assert!(sink.is_empty());
}

#[test]
fn oversized_header_is_fatal() {
    let mock = MockTransport::new();
    let mut hostile = Vec::new();
    hostile.extend_from_slice(&CMD_HELLO.to_le_bytes());
    hostile.extend_from_slice(&0x00FF_0000u32.to_le_bytes());
    mock.queue_bytes(&hostile);

    let mut sink = MemorySink::new();
    let err = SaharaSession::new(mock, test_config())
        .run_crash_info(&mut sink)
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::OversizedPacket { .. })
    ));
}

#[test]
fn cancelled_session_still_resets_the_target() {
    let mock = MockTransport::new();
    queue_hello(&mock);

    let handle = mock.clone();
    let mut sink = MemorySink::new();
    let session = SaharaSession::new(mock, test_config());
    session.cancel_token().cancel();
    let err = session.run_crash_info(&mut sink).unwrap_err();

    assert!(matches!(err, SessionError::Cancelled));
    let writes = handle.get_writes();
    assert_eq!(writes[0], packet::switch_mode(Mode::Command));
    assert_eq!(writes.last().unwrap(), &packet::reset());
    assert!(handle.is_closed());
}
