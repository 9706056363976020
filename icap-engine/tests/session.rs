mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{BrokenScanner, EICAR, EICAR_NAME, exchange, exchange_with, parse_all, test_config};
use icap_engine::{ConnectionSession, EngineContext, Response, Segments, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::time::timeout;
use rstest::rstest;

fn reqmod(service: &str, extra_headers: &str, req_hdr: &[u8], body_chunks: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "REQMOD icap://127.0.0.1:1344/{service} ICAP/1.0\r\n\
         Host: 127.0.0.1\r\n\
         {extra_headers}\
         Encapsulated: req-hdr=0, req-body={}\r\n\r\n",
        req_hdr.len()
    )
    .into_bytes();
    raw.extend_from_slice(req_hdr);
    raw.extend_from_slice(body_chunks);
    raw
}

const POST_HDR: &[u8] = b"POST /upload HTTP/1.1\r\nHost: www.example.com\r\nContent-Length: 10\r\n\r\n";

#[tokio::test]
async fn options_echo_advertises_both_methods_and_keeps_connection() {
    let req = b"OPTIONS icap://127.0.0.1:1344/echo ICAP/1.0\r\nHost: 127.0.0.1\r\n\r\n\
                OPTIONS icap://127.0.0.1:1344/virus_scan ICAP/1.0\r\nHost: 127.0.0.1\r\n\r\n";
    let out = exchange(req).await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("Encapsulated: null-body=0\r\n"), "{text}");

    let responses = parse_all(&out).await;
    assert_eq!(responses.len(), 2);
    for resp in &responses {
        assert_eq!(resp.status_code, StatusCode::Ok200);
        assert_eq!(resp.get_header("methods"), Some("REQMOD, RESPMOD"));
        assert_eq!(resp.get_header("istag"), Some("\"TESTTAG\""));
        assert_eq!(resp.get_header("allow"), Some("204"));
        assert_eq!(resp.get_header("preview"), Some("0"));
        assert_eq!(resp.get_header("transfer-complete"), Some("*"));
    }
}

#[tokio::test]
async fn options_loop_is_capped() {
    let one = b"OPTIONS icap://h/info ICAP/1.0\r\n\r\n";
    let req = one.repeat(5);
    let cfg = test_config().with_max_options_per_connection(2);
    let out = exchange_with(&req, cfg, Arc::new(common::FakeScanner)).await;
    assert_eq!(parse_all(&out).await.len(), 2);
}

#[tokio::test]
async fn info_lists_every_endpoint() {
    let res_hdr = b"HTTP/1.1 200 OK\r\n\r\n";
    let mut req = format!(
        "RESPMOD icap://127.0.0.1:1344/info ICAP/1.0\r\nEncapsulated: res-hdr=0, res-body={}\r\n\r\n",
        res_hdr.len()
    )
    .into_bytes();
    req.extend_from_slice(res_hdr);
    req.extend_from_slice(b"3\r\nabc\r\n0\r\n\r\n");

    let out = exchange(&req).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, StatusCode::Ok200);
    let body = String::from_utf8(resp.segments.res_body).unwrap();
    let lines: Vec<&str> = body.split("\r\n").filter(|l| !l.is_empty()).collect();
    assert_eq!(
        lines,
        [
            "OPTIONS icap://127.0.0.1:1344/info ICAP/1.0",
            "OPTIONS icap://127.0.0.1:1344/echo ICAP/1.0",
            "OPTIONS icap://127.0.0.1:1344/virus_scan ICAP/1.0",
            "REQMOD icap://127.0.0.1:1344/echo ICAP/1.0",
            "REQMOD icap://127.0.0.1:1344/virus_scan ICAP/1.0",
            "RESPMOD icap://127.0.0.1:1344/info ICAP/1.0",
            "RESPMOD icap://127.0.0.1:1344/echo ICAP/1.0",
            "RESPMOD icap://127.0.0.1:1344/virus_scan ICAP/1.0",
        ]
    );
}

#[tokio::test]
async fn echo_with_ieof_preview_returns_body_without_continue() {
    let req = reqmod("echo", "Preview: 10\r\n", POST_HDR, b"A\r\nHi, there!\r\n0; ieof\r\n\r\n");
    let out = exchange(&req).await;
    let text = String::from_utf8_lossy(&out);
    assert!(!text.contains("100 Continue"), "{text}");

    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, StatusCode::Ok200);
    assert_eq!(resp.segments.req_hdr, POST_HDR);
    assert_eq!(resp.segments.req_body, b"Hi, there!");
    assert!(resp.closes_connection());
}

#[tokio::test]
async fn preview_terminator_gets_one_continue_then_full_body() {
    let req = reqmod(
        "echo",
        "Preview: 4\r\n",
        POST_HDR,
        b"4\r\nHi, \r\n0\r\n\r\n6\r\nthere!\r\n0\r\n\r\n",
    );
    let out = exchange(&req).await;
    let responses = parse_all(&out).await;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].status_code, StatusCode::Continue100);
    assert_eq!(responses[1].segments.req_body, b"Hi, there!");
    assert_eq!(
        String::from_utf8_lossy(&out).matches("100 Continue").count(),
        1
    );
}

#[tokio::test]
async fn echo_roundtrip_preserves_every_segment() {
    let res_hdr = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n";
    let req_hdr = b"GET /index.html HTTP/1.1\r\nHost: www.example.com\r\n\r\n";
    let mut req = format!(
        "RESPMOD icap://h/echo ICAP/1.0\r\nEncapsulated: req-hdr=0, res-hdr={}, res-body={}\r\n\r\n",
        req_hdr.len(),
        req_hdr.len() + res_hdr.len()
    )
    .into_bytes();
    req.extend_from_slice(req_hdr);
    req.extend_from_slice(res_hdr);
    req.extend_from_slice(b"7\r\n<html>\n\r\n8\r\n</html>\n\r\n0\r\n\r\n");

    let out = exchange(&req).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(
        resp.segments,
        Segments {
            req_hdr: req_hdr.to_vec(),
            req_body: Vec::new(),
            res_hdr: res_hdr.to_vec(),
            res_body: b"<html>\n</html>\n".to_vec(),
        }
    );
}

#[rstest]
#[case("Allow: 204\r\n", StatusCode::NoContent204)]
#[case("", StatusCode::Ok200)]
#[tokio::test]
async fn empty_echo_honours_allow_204(#[case] extra: &str, #[case] expected: StatusCode) {
    let req = format!(
        "REQMOD icap://h/echo ICAP/1.0\r\n{extra}Encapsulated: null-body=0\r\n\r\n"
    );
    let out = exchange(req.as_bytes()).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, expected);
    assert!(resp.segments.is_empty());
}

#[rstest]
#[case("Allow: 204\r\nPreview: 0\r\n", StatusCode::NoContent204)]
#[case("Allow: 204\r\n", StatusCode::NoContent204)]
#[case("", StatusCode::Ok200)]
#[tokio::test]
async fn echo_of_header_with_empty_body_allows_204(
    #[case] extra: &str,
    #[case] expected: StatusCode,
) {
    let get = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n";
    let body: &[u8] = if extra.contains("Preview") {
        b"0; ieof\r\n\r\n"
    } else {
        b"0\r\n\r\n"
    };
    let req = reqmod("echo", extra, get, body);
    let out = exchange(&req).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, expected);
    if expected == StatusCode::Ok200 {
        assert_eq!(resp.segments.req_hdr, get);
    } else {
        assert!(resp.segments.is_empty());
    }
}

#[tokio::test]
async fn endless_header_line_gets_400_while_stream_stays_open() {
    common::init_tracing();
    let (client, server) = duplex(64 * 1024);
    let ctx = Arc::new(EngineContext::new(test_config(), Arc::new(common::FakeScanner)));
    let session = tokio::spawn(ConnectionSession::new(server, ctx).run());

    let (mut rx, mut tx) = tokio::io::split(client);
    let writer = tokio::spawn(async move {
        let _ = tx.write_all(b"OPTIONS icap://h/echo ICAP/1.0\r\nX-Pad: ").await;
        let _ = tx.write_all(&vec![b'a'; 512 * 1024]).await;
        tx
    });

    let mut head = [0u8; 24];
    timeout(Duration::from_secs(2), rx.read_exact(&mut head))
        .await
        .expect("400 before the client stops sending")
        .expect("read status line");
    assert_eq!(&head, b"ICAP/1.0 400 Bad Request");

    writer.abort();
    let _ = timeout(Duration::from_secs(2), session).await;
}

#[tokio::test]
async fn virus_scan_clean_content() {
    let req = reqmod("virus_scan", "", POST_HDR, b"A\r\nHi, there!\r\n0\r\n\r\n");
    let out = exchange(&req).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, StatusCode::Ok200);
    let head = String::from_utf8(resp.segments.res_hdr).unwrap();
    assert!(head.starts_with("HTTP/1.1 200 OK\r\n"), "{head}");
    assert!(resp.segments.res_body.is_empty());
}

#[tokio::test]
async fn virus_scan_detects_eicar() {
    let mut chunks = format!("{:X}\r\n", EICAR.len()).into_bytes();
    chunks.extend_from_slice(EICAR);
    chunks.extend_from_slice(b"\r\n0\r\n\r\n");
    let req = reqmod("virus_scan", "", POST_HDR, &chunks);

    let out = exchange(&req).await;
    let resp = parse_all(&out).await.remove(0);
    let head = String::from_utf8(resp.segments.res_hdr).unwrap();
    assert!(head.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{head}");
    assert!(head.contains(&format!("X-Threat-Description: {EICAR_NAME}\r\n")));
    assert_eq!(
        resp.segments.res_body,
        format!("Virus Found: {EICAR_NAME}\n").into_bytes()
    );
}

#[tokio::test]
async fn scanner_failure_is_500_with_cause() {
    let req = reqmod("virus_scan", "", POST_HDR, b"3\r\nabc\r\n0\r\n\r\n");
    let out = exchange_with(&req, test_config(), Arc::new(BrokenScanner)).await;
    let resp = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, StatusCode::InternalServerError500);
    let cause = String::from_utf8(resp.opt_body.unwrap()).unwrap();
    assert!(cause.contains("database missing"), "{cause}");
}

#[rstest]
#[case(&b"OPTIONS icap://h/nope ICAP/1.0\r\n\r\n"[..], StatusCode::NotFound404)]
#[case(&b"REQMOD icap://h/info ICAP/1.0\r\nEncapsulated: null-body=0\r\n\r\n"[..], StatusCode::MethodNotAllowed405)]
#[case(&b"RESPMOD icap://h/nope ICAP/1.0\r\nEncapsulated: null-body=0\r\n\r\n"[..], StatusCode::MethodNotAllowed405)]
#[case(&b"GET icap://h/echo ICAP/1.0\r\n\r\n"[..], StatusCode::MethodNotAllowed405)]
#[case(&b"OPTIONS http://h/echo ICAP/1.0\r\n\r\n"[..], StatusCode::BadRequest400)]
#[case(&b"OPTIONS icap://h/echo\r\n\r\n"[..], StatusCode::BadRequest400)]
#[case(&b"REQMOD icap://h/echo ICAP/1.0\r\nHost: h\r\n\r\n"[..], StatusCode::BadRequest400)]
#[case(&b"REQMOD icap://h/echo ICAP/1.0\r\nPreview: abc\r\nEncapsulated: null-body=0\r\n\r\n"[..], StatusCode::BadRequest400)]
#[case(&b"REQMOD icap://h/echo ICAP/1.0\r\nEncapsulated: req-hdr=0, bogus=4\r\n\r\n"[..], StatusCode::BadRequest400)]
#[tokio::test]
async fn rejections_close_the_connection(#[case] req: &[u8], #[case] expected: StatusCode) {
    // a second request after the rejection must never be answered
    let mut raw = req.to_vec();
    raw.extend_from_slice(b"OPTIONS icap://h/echo ICAP/1.0\r\n\r\n");
    let out = exchange(&raw).await;
    let responses = parse_all(&out).await;
    assert_eq!(responses.len(), 1, "{}", String::from_utf8_lossy(&out));
    assert_eq!(responses[0].status_code, expected);
    assert!(responses[0].closes_connection());
}

#[tokio::test]
async fn bad_uri_cause_is_sent_as_opt_body() {
    let out = exchange(b"REQMOD icaps://h/echo ICAP/1.0\r\nEncapsulated: null-body=0\r\n\r\n").await;
    let text = String::from_utf8_lossy(&out);
    assert!(text.starts_with("ICAP/1.0 400 Bad Request\r\n"), "{text}");
    assert!(text.contains("Encapsulated: opt-body=0\r\n\r\n10\r\nInvalid ICAP URI\r\n0\r\n\r\n"));
}

#[tokio::test]
async fn broken_chunk_trailer_is_500_and_close() {
    let req = reqmod("echo", "", POST_HDR, b"A\r\nHi, there!XX0\r\n\r\n");
    let out = exchange(&req).await;
    let responses = parse_all(&out).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].status_code, StatusCode::InternalServerError500);
    assert!(responses[0].closes_connection());
}

#[tokio::test]
async fn truncated_header_block_gets_no_response() {
    let out = exchange(b"OPTIONS icap://h/echo ICAP/1.0\r\nHost: h").await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn truncated_body_is_500() {
    let req = reqmod("echo", "", POST_HDR, b"A\r\nHi");
    let out = exchange(&req).await;
    let resp: Response = parse_all(&out).await.remove(0);
    assert_eq!(resp.status_code, StatusCode::InternalServerError500);
}
