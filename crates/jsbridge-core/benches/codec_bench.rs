// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the wire codec: building the injected statement
// for one envelope and decoding a fetched queue batch.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use jsbridge_core::codec::{decode, escape_for_script_literal, script_for_message};
use jsbridge_core::types::{CallbackId, Envelope, Request, Response};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A request with a moderately nested payload full of characters that need
/// escaping.
fn sample_request() -> Envelope {
    Request::new(
        "echoHandler",
        json!({
            "title": "It's a \"quoted\" title",
            "lines": ["first\nsecond", "tab\there", "sep\u{2028}arator"],
            "counts": [1, 2, 3, 4, 5, 6, 7, 8],
            "nested": {"ok": true, "ratio": 0.75, "none": null},
        }),
        Some(CallbackId::from("objc_cb_1")),
    )
    .into()
}

/// A JSON array of `n` alternating requests and responses, as `_fetchQueue`
/// would return it.
fn sample_batch(n: usize) -> String {
    let envelopes: Vec<Envelope> = (0..n)
        .map(|i| {
            if i % 2 == 0 {
                Request::new("jsCallNativeHandler", json!({"seq": i}), None).into()
            } else {
                Response::new(format!("objc_cb_{i}").into(), json!("Response from JS")).into()
            }
        })
        .collect();
    serde_json::to_string(&envelopes).expect("serialize batch")
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Benchmark building the `_handleMessageFromObjC` statement.
fn bench_script_for_message(c: &mut Criterion) {
    let envelope = sample_request();

    c.bench_function("script_for_message (nested payload)", |b| {
        b.iter(|| {
            let script = script_for_message(black_box(&envelope));
            assert!(script.is_ok());
        });
    });
}

/// Benchmark the literal escaper alone on a 64 KiB string.
fn bench_escape(c: &mut Criterion) {
    let text = "a'b\"c\\d\ne".repeat(64 * 1024 / 10);

    c.bench_function("escape_for_script_literal (64 KiB)", |b| {
        b.iter(|| black_box(escape_for_script_literal(black_box(&text))));
    });
}

/// Benchmark decoding a 100-message queue.
fn bench_decode(c: &mut Criterion) {
    let batch = sample_batch(100);

    c.bench_function("decode (100 envelopes)", |b| {
        b.iter(|| {
            let decoded = decode(black_box(&batch)).expect("decode");
            assert_eq!(decoded.len(), 100);
        });
    });
}

criterion_group!(benches, bench_script_for_message, bench_escape, bench_decode);
criterion_main!(benches);
