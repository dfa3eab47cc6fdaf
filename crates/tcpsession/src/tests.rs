use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use rstest::rstest;

use crate::http1;
use crate::packet::{ConnectionId, TcpPacket, parse_record};
use crate::{ParseErrorKind, TcpMessage};

/// Build a minimal TCP segment: 20-byte header, PSH|ACK, then payload.
fn segment(src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; 20];
    seg[0..2].copy_from_slice(&src_port.to_be_bytes());
    seg[2..4].copy_from_slice(&dst_port.to_be_bytes());
    seg[4..8].copy_from_slice(&seq.to_be_bytes());
    seg[8..12].copy_from_slice(&ack.to_be_bytes());
    seg[12] = 5 << 4; // data offset: 5 words, no options
    seg[13] = 0x18; // PSH|ACK
    seg.extend_from_slice(payload);
    seg
}

/// Build a capture record with an IPv4 source address.
fn record(addr: [u8; 4], src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; 16];
    rec[..4].copy_from_slice(&addr);
    rec.extend(segment(src_port, dst_port, seq, ack, payload));
    rec
}

fn packet(src_port: u16, dst_port: u16, seq: u32, ack: u32, payload: &[u8]) -> TcpPacket {
    let rec = record([10, 0, 0, 1], src_port, dst_port, seq, ack, payload);
    parse_record(&rec, Instant::now()).unwrap()
}

// =========================================================================
// Capture record parsing
// =========================================================================

#[test]
fn test_parse_record_ipv4() {
    let p = packet(40000, 80, 1000, 500, b"hello");
    assert_eq!(p.addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    assert_eq!(p.src_port, 40000);
    assert_eq!(p.dst_port, 80);
    assert_eq!(p.seq, 1000);
    assert_eq!(p.ack(), 500);
    assert_eq!(p.flags, 0x18);
    assert_eq!(p.payload(), b"hello");
    assert_eq!(p.seq_end(), 1005);
}

#[test]
fn test_parse_record_ipv6() {
    let v6 = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
    let mut rec = v6.octets().to_vec();
    rec.extend(segment(40000, 80, 1, 2, b"x"));
    let p = parse_record(&rec, Instant::now()).unwrap();
    assert_eq!(p.addr, IpAddr::V6(v6));
}

#[test]
fn test_parse_record_connection_id() {
    let p = packet(40000, 80, 1000, 500, b"hello");
    assert_eq!(
        p.id(),
        ConnectionId {
            ack: 500,
            src_port: 40000,
            dst_port: 80
        }
    );
}

#[test]
fn test_parse_record_tcp_options_respected() {
    // Data offset of 8 words: 12 bytes of options before the payload.
    let mut seg = segment(40000, 80, 1000, 500, b"");
    seg[12] = 8 << 4;
    seg.extend_from_slice(&[0u8; 12]); // options
    seg.extend_from_slice(b"body");
    let mut rec = vec![0u8; 16];
    rec.extend(seg);
    let p = parse_record(&rec, Instant::now()).unwrap();
    assert_eq!(p.payload(), b"body");
}

#[rstest]
#[case::record_too_short(vec![0u8; 10], ParseErrorKind::RecordTooShort)]
#[case::segment_too_short([vec![0u8; 16], vec![0u8; 8]].concat(), ParseErrorKind::SegmentTooShort)]
#[case::empty_payload(record([10, 0, 0, 1], 40000, 80, 1, 2, b""), ParseErrorKind::EmptyPayload)]
fn test_parse_record_rejects(#[case] raw: Vec<u8>, #[case] kind: ParseErrorKind) {
    let err = parse_record(&raw, Instant::now()).unwrap_err();
    assert_eq!(err.kind, kind);
    assert_eq!(err.len, raw.len());
}

#[test]
fn test_parse_record_offset_out_of_bounds() {
    // Offset claims 15 words (60 bytes) but the segment is 25 bytes.
    let mut raw = record([10, 0, 0, 1], 40000, 80, 1, 2, b"hello");
    raw[16 + 12] = 15 << 4;
    let err = parse_record(&raw, Instant::now()).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::OffsetOutOfBounds);
}

#[test]
fn test_set_ack_moves_connection_id() {
    let mut p = packet(40000, 80, 1000, 800, b"hello");
    p.set_ack(700);
    assert_eq!(p.ack(), 700);
    assert_eq!(p.id().ack, 700);
}

// =========================================================================
// Expect: 100-continue detection and splice
// =========================================================================

const EXPECT_POST: &[u8] =
    b"POST /p HTTP/1.1\r\nContent-Length: 5\r\nExpect: 100-continue\r\n\r\n";

#[test]
fn test_expect_continue_detected() {
    let p = packet(40000, 80, 2000, 700, EXPECT_POST);
    assert!(p.has_expect_continue());
}

#[rstest]
#[case::not_post(b"GET /p HTTP/1.1\r\nExpect: 100-continue\r\n\r\n".to_vec())]
#[case::marker_not_last(b"POST /p HTTP/1.1\r\nExpect: 100-continue\r\nHost: a\r\n\r\n".to_vec())]
#[case::no_marker(b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\n".to_vec())]
#[case::shorter_than_marker(b"POST /p\r\n".to_vec())]
fn test_expect_continue_not_detected(#[case] payload: Vec<u8>) {
    let p = packet(40000, 80, 2000, 700, &payload);
    assert!(!p.has_expect_continue());
}

#[test]
fn test_strip_expect_continue() {
    let mut p = packet(40000, 80, 2000, 700, EXPECT_POST);
    let original_end = p.seq_end();
    p.strip_expect_continue();
    assert_eq!(
        p.payload(),
        b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\n".as_slice()
    );
    // The wire still saw the full segment: sequence arithmetic is unchanged.
    assert_eq!(p.seq_end(), original_end);
}

#[test]
fn test_strip_expect_continue_noop_without_marker() {
    let mut p = packet(40000, 80, 2000, 700, b"POST /p HTTP/1.1\r\n\r\n");
    p.strip_expect_continue();
    assert_eq!(p.payload(), b"POST /p HTTP/1.1\r\n\r\n");
}

// =========================================================================
// HTTP/1.x completeness
// =========================================================================

#[rstest]
#[case::get_headers_only(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec(), true)]
#[case::get_headers_partial(b"GET / HTTP/1.1\r\nHost: a\r\n".to_vec(), false)]
#[case::post_content_length_met(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".to_vec(), true)]
#[case::post_content_length_short(b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\nhello".to_vec(), false)]
#[case::post_no_framing(b"POST / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec(), false)]
#[case::post_chunked_terminated(
    b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n".to_vec(),
    true
)]
#[case::post_chunked_unterminated(
    b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n".to_vec(),
    false
)]
#[case::bad_content_length(b"POST / HTTP/1.1\r\nContent-Length: many\r\n\r\nhello".to_vec(), false)]
fn test_request_complete(#[case] data: Vec<u8>, #[case] complete: bool) {
    assert_eq!(http1::request_complete(&data), complete);
}

#[rstest]
#[case::content_length_met(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok".to_vec(), true)]
#[case::content_length_short(b"HTTP/1.1 200 OK\r\nContent-Length: 9\r\n\r\nok".to_vec(), false)]
#[case::no_content(b"HTTP/1.1 204 No Content\r\n\r\n".to_vec(), true)]
#[case::not_modified(b"HTTP/1.1 304 Not Modified\r\n\r\n".to_vec(), true)]
#[case::continue_interim(b"HTTP/1.1 100 Continue\r\n\r\n".to_vec(), true)]
#[case::unframed_read_until_close(b"HTTP/1.1 200 OK\r\n\r\npartial".to_vec(), false)]
#[case::chunked_terminated(
    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n".to_vec(),
    true
)]
fn test_response_complete(#[case] data: Vec<u8>, #[case] complete: bool) {
    assert_eq!(http1::response_complete(&data), complete);
}

#[test]
fn test_chunked_embedded_terminal_pattern_not_confused() {
    // A chunk whose *data* contains "0\r\n\r\n" must not end the body early.
    let data = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nc\r\n0\r\n\r\nhello\r\n\r\n0\r\n\r\n";
    assert!(http1::request_complete(data));
    let req = http1::try_parse_request(data).unwrap();
    assert_eq!(req.body, b"0\r\n\r\nhello\r\n");
}

#[test]
fn test_chunked_extensions_and_trailers() {
    let data =
        b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=v\r\nhello\r\n0\r\nX-Sum: 1\r\n\r\n";
    assert!(http1::request_complete(data));
    assert_eq!(http1::try_parse_request(data).unwrap().body, b"hello");
}

#[test]
fn test_try_parse_request_fields() {
    let data = b"GET /path?q=1 HTTP/1.1\r\nHost: example.com\r\nCookie: a=1\r\nCookie: b=2\r\n\r\n";
    let req = http1::try_parse_request(data).unwrap();
    assert_eq!(req.method, http::Method::GET);
    assert_eq!(req.uri.path(), "/path");
    assert_eq!(req.headers.get("host").unwrap(), "example.com");
    assert_eq!(req.headers.get_all("cookie").iter().count(), 2);
    assert!(req.body.is_empty());
}

#[test]
fn test_try_parse_response_fields() {
    let data = b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nNot Found";
    let res = http1::try_parse_response(data).unwrap();
    assert_eq!(res.status, http::StatusCode::NOT_FOUND);
    assert_eq!(res.body, b"Not Found");
}

#[test]
fn test_try_parse_content_length_ignores_trailing_bytes() {
    let data = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloEXTRA";
    assert_eq!(http1::try_parse_request(data).unwrap().body, b"hello");
}

#[test]
fn test_sniffers() {
    assert!(http1::is_request(b"GET / HTTP/1.1\r\n"));
    assert!(http1::is_request(b"DELETE /x HTTP/1.1\r\n"));
    assert!(!http1::is_request(b"HTTP/1.1 200 OK\r\n"));
    assert!(http1::is_response(b"HTTP/1.0 301 Moved\r\n"));
    assert!(!http1::is_response(b"POST / HTTP/1.1\r\n"));
}

// =========================================================================
// Message assembly
// =========================================================================

#[test]
fn test_message_single_packet() {
    let p = packet(40000, 80, 1000, 500, b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
    let mut m = TcpMessage::new(&p, true);
    m.add(p);
    m.update_response_ack();

    assert_eq!(m.seq, 1000);
    assert_eq!(m.ack, 500);
    assert_eq!(m.response_ack, 1000 + 28);
    assert_eq!(
        m.response_id(),
        ConnectionId {
            ack: 1000 + 28,
            src_port: 80,
            dst_port: 40000
        }
    );
    assert!(m.is_finished());
    assert_eq!(m.bytes(), b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n");
}

#[test]
fn test_message_out_of_order_segments_assemble_by_seq() {
    let head = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
    let first = packet(40000, 80, 1000, 500, head);
    let mid = packet(40000, 80, 1000 + head.len() as u32, 500, b"hello");
    let tail = packet(40000, 80, 1000 + head.len() as u32 + 5, 500, b"world");

    // Arrival order: tail, head, mid.
    let mut m = TcpMessage::new(&tail, true);
    m.add(tail);
    assert!(!m.is_finished());
    m.add(first);
    assert!(!m.is_finished());
    m.add(mid);
    assert!(m.is_finished());

    let mut expected = head.to_vec();
    expected.extend_from_slice(b"helloworld");
    assert_eq!(m.bytes(), expected);
}

#[test]
fn test_message_gap_blocks_finish() {
    let head = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
    let first = packet(40000, 80, 1000, 500, head);
    // Body segment starts one byte late: a hole the tap never saw.
    let body = packet(40000, 80, 1000 + head.len() as u32 + 1, 500, b"hello");

    let mut m = TcpMessage::new(&first, true);
    m.add(first);
    m.add(body);
    assert!(!m.is_finished());
}

#[test]
fn test_message_response_ack_tracks_furthest_packet() {
    let first = packet(40000, 80, 1000, 500, b"GET / HT");
    let second = packet(40000, 80, 1008, 500, b"TP/1.1\r\n\r\n");
    let mut m = TcpMessage::new(&first, true);
    m.add(first);
    m.update_response_ack();
    assert_eq!(m.response_ack, 1008);
    m.add(second);
    m.update_response_ack();
    assert_eq!(m.response_ack, 1018);
}

#[test]
fn test_message_stripped_expect_line_is_not_a_gap() {
    let headers = packet(40000, 80, 2000, 700, EXPECT_POST);
    let body_seq = headers.seq_end();
    let body = packet(40000, 80, body_seq, 700, b"hello");

    let mut m = TcpMessage::new(&headers, true);
    m.add(headers);
    m.strip_expect_continue(0);
    m.add(body);

    assert!(m.is_finished());
    assert_eq!(
        m.bytes(),
        b"POST /p HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello".as_slice()
    );
}

#[test]
fn test_message_time_window() {
    let t0 = Instant::now();
    let rec_a = record([10, 0, 0, 1], 40000, 80, 1000, 500, b"GET / HT");
    let rec_b = record([10, 0, 0, 1], 40000, 80, 1008, 500, b"TP/1.1\r\n\r\n");
    let a = parse_record(&rec_a, t0).unwrap();
    let b = parse_record(&rec_b, t0 + Duration::from_millis(40)).unwrap();

    let mut m = TcpMessage::new(&a, true);
    m.add(a);
    m.add(b);
    assert_eq!(m.start(), t0);
    assert_eq!(m.end(), t0 + Duration::from_millis(40));
}

#[test]
fn test_message_typed_views() {
    let p = packet(40000, 80, 1000, 500, b"POST /api HTTP/1.1\r\nContent-Length: 2\r\n\r\nok");
    let mut m = TcpMessage::new(&p, true);
    m.add(p);
    let req = m.to_request().unwrap();
    assert_eq!(req.method, http::Method::POST);
    assert_eq!(req.body, b"ok");
    assert!(m.to_response().is_none());

    let p = packet(80, 40000, 500, 1042, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    let mut m = TcpMessage::new(&p, false);
    m.add(p);
    let res = m.to_response().unwrap();
    assert_eq!(res.status, http::StatusCode::OK);
}
