use criterion::{Criterion, black_box, criterion_group, criterion_main};
use icap_engine::{ChunkedBodyDecoder, DecodeMode, Encapsulated, Response, Segments, StatusCode};

fn chunked_body(total: usize, chunk: usize) -> Vec<u8> {
    let mut raw = Vec::with_capacity(total + total / chunk * 8 + 8);
    let mut left = total;
    while left > 0 {
        let n = left.min(chunk);
        raw.extend_from_slice(format!("{n:X}\r\n").as_bytes());
        raw.extend(std::iter::repeat_n(b'x', n));
        raw.extend_from_slice(b"\r\n");
        left -= n;
    }
    raw.extend_from_slice(b"0\r\n\r\n");
    raw
}

fn bench_chunked_decode(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let raw = chunked_body(256 * 1024, 8 * 1024);

    c.bench_function("chunked_decode_256k_in_8k_chunks", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut src: &[u8] = black_box(&raw);
                let mut out = Vec::new();
                ChunkedBodyDecoder::new(DecodeMode::Full)
                    .decode(&mut src, &mut out)
                    .await
                    .unwrap();
                out
            })
        })
    });
}

fn bench_encapsulated_parse(c: &mut Criterion) {
    c.bench_function("encapsulated_parse_three_parts", |b| {
        b.iter(|| Encapsulated::parse(black_box("req-hdr=0, res-hdr=822, res-body=1655")).unwrap())
    });
}

fn bench_response_encode(c: &mut Criterion) {
    let segments = Segments {
        req_hdr: b"POST /upload HTTP/1.1\r\nHost: www.example.com\r\n\r\n".to_vec(),
        req_body: vec![42u8; 16 * 1024],
        ..Segments::default()
    };

    c.bench_function("response_to_raw_echo_16k", |b| {
        b.iter(|| {
            Response::new(StatusCode::Ok200, "OK")
                .add_header("istag", "\"BENCH\"")
                .add_header("connection", "close")
                .with_segments(black_box(segments.clone()))
                .to_raw()
        })
    });
}

criterion_group!(
    benches,
    bench_chunked_decode,
    bench_encapsulated_parse,
    bench_response_encode
);
criterion_main!(benches);
