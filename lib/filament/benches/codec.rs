use criterion::{black_box, criterion_group, criterion_main, Criterion};

use filament::http::{HttpRequest, HttpResponse};
use filament::ws::frame::{prepare_frame, FrameDecoder};
use filament::ws::{WS_BINARY, WS_FIN};

fn http_parse(c: &mut Criterion) {
    let mut request = HttpRequest::new();
    request.set_begin("GET", "/api/resource?query=value");
    request.set_header("Host", "example.com");
    request.set_header("Accept", "*/*");
    request.set_header("User-Agent", "bench");
    request.set_body(b"");

    let wire = request.cache().to_vec();

    c.bench_function("http_request_parse", |b| {
        b.iter(|| {
            let mut parsed = HttpRequest::new();
            parsed.receive_header(black_box(&wire));
            black_box(parsed.receive_body(&[]))
        })
    });

    let mut response = HttpResponse::new();
    response.set_begin(200);
    response.set_header("Server", "bench");
    response.set_body(&[0x55; 4096]);

    let wire = response.cache().to_vec();

    c.bench_function("http_response_parse", |b| {
        b.iter(|| {
            let mut parsed = HttpResponse::new();
            parsed.receive_header(black_box(&wire));
            black_box(parsed.receive_body(&[]))
        })
    });
}

fn ws_codec(c: &mut Criterion) {
    let payload = vec![0xABu8; 4096];

    c.bench_function("ws_frame_encode_masked", |b| {
        b.iter(|| black_box(prepare_frame(WS_FIN | WS_BINARY, true, black_box(&payload), None)))
    });

    let wire = prepare_frame(WS_FIN | WS_BINARY, true, &payload, None);

    c.bench_function("ws_frame_decode_masked", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.feed(black_box(&wire));
            black_box(decoder.decode().unwrap())
        })
    });
}

criterion_group!(benches, http_parse, ws_codec);
criterion_main!(benches);
