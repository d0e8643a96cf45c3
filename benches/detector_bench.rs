use std::collections::HashSet;
use std::hint::black_box;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use solana_copy_trader::detector::buy_detector::BuyDetector;
use solana_copy_trader::detector::event::parse_batch;
use solana_copy_trader::detector::seen_cache::SeenCache;

const WALLET: &str = "Wallet1111111111111111111111111111111111111";

fn webhook_body() -> serde_json::Value {
    json!([{
        "signature": "S1111111111111111111111111111111111111111111",
        "type": "SWAP",
        "tokenTransfers": [
            {
                "mint": "Mint111111111111111111111111111111111111111",
                "toUserAccount": WALLET,
                "fromUserAccount": "Pool111111111111111111111111111111111111111",
                "tokenAmount": 10_000_000.0
            },
            {
                "mint": "Mint222222222222222222222222222222222222222",
                "toUserAccount": "Other11111111111111111111111111111111111111",
                "tokenAmount": 5_000_000.0
            }
        ],
        "nativeTransfers": [
            { "fromUserAccount": WALLET, "amount": 50_000_000u64 },
            { "fromUserAccount": "Feepayer111111111111111111111111111111111", "amount": 5_000u64 }
        ]
    }])
}

fn bench_parse_batch(c: &mut Criterion) {
    let body = webhook_body();
    c.bench_function("parse_batch", |b| {
        b.iter(|| parse_batch(black_box(body.clone())))
    });
}

fn bench_detect(c: &mut Criterion) {
    let tx = parse_batch(webhook_body()).remove(0);
    let detector = BuyDetector::new(HashSet::new(), 0);
    let tracked: HashSet<String> = [WALLET.to_string()].into_iter().collect();

    c.bench_function("detect_buy_signals", |b| {
        b.iter(|| {
            // Fresh cache per iteration so the debounce never absorbs the
            // signal we are measuring.
            let seen = SeenCache::new(Duration::from_secs(600));
            detector.detect(black_box(&tx), black_box(&tracked), &seen)
        })
    });
}

criterion_group!(benches, bench_parse_batch, bench_detect);
criterion_main!(benches);
